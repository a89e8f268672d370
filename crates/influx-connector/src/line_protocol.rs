// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Point model and InfluxDB Line Protocol encoding.
//!
//! Line Protocol format:
//! ```text
//! measurement,tag1=val1,tag2=val2 field1=val1,field2=val2 timestamp_ns
//! ```
//!
//! See: <https://docs.influxdata.com/influxdb/v1/write_protocols/line_protocol_reference/>

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

/// Line Protocol encoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LineProtocolError {
    #[error("Measurement name is empty")]
    EmptyMeasurement,

    #[error("Point for measurement {0} has no fields")]
    NoFields(String),
}

/// A value that can be stored in an InfluxDB field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    /// 64-bit floating point.
    Float(f64),
    /// 64-bit signed integer.
    Integer(i64),
    /// UTF-8 string.
    String(String),
    /// Boolean value.
    Boolean(bool),
}

impl FieldValue {
    /// Format this value for InfluxDB Line Protocol.
    ///
    /// - Float: written as-is (e.g., `3.14`)
    /// - Integer: suffixed with `i` (e.g., `42i`)
    /// - String: quoted with double quotes, inner quotes escaped (e.g., `"hello"`)
    /// - Boolean: `true` or `false`
    pub fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Float(v) => format!("{}", v),
            FieldValue::Integer(v) => format!("{}i", v),
            FieldValue::String(v) => {
                let escaped = v.replace('\\', "\\\\").replace('"', "\\\"");
                format!("\"{}\"", escaped)
            }
            FieldValue::Boolean(v) => v.to_string(),
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_line_protocol())
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Integer(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Boolean(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::String(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::String(v)
    }
}

/// One measurement sample: measurement name, tag set and field set.
///
/// Maps are ordered so that encoding is canonical (tags sorted by key,
/// as InfluxDB recommends).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Point {
    /// Measurement name (topic the sample arrived on).
    pub measurement: String,
    /// Indexed metadata.
    pub tags: BTreeMap<String, String>,
    /// Sample values.
    pub fields: BTreeMap<String, FieldValue>,
}

impl Point {
    /// Create an empty point for a measurement.
    pub fn new(measurement: impl Into<String>) -> Self {
        Self {
            measurement: measurement.into(),
            ..Default::default()
        }
    }

    /// Add a tag (builder style).
    pub fn tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    /// Add a field (builder style).
    pub fn field(mut self, key: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Encode this point as a single Line Protocol line.
    ///
    /// InfluxDB rejects points without fields, so an empty field set is an error
    /// rather than a malformed line.
    pub fn to_line(&self, timestamp_ns: i64) -> Result<String, LineProtocolError> {
        if self.measurement.is_empty() {
            return Err(LineProtocolError::EmptyMeasurement);
        }
        if self.fields.is_empty() {
            return Err(LineProtocolError::NoFields(self.measurement.clone()));
        }

        let mut line = escape_measurement(&self.measurement);

        for (key, value) in &self.tags {
            line.push(',');
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&escape_key(value));
        }

        line.push(' ');

        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_key(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&timestamp_ns.to_string());

        Ok(line)
    }
}

/// Escape measurement name per Line Protocol spec.
/// Spaces and commas must be escaped with backslash.
fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

/// Undo [`escape_measurement`] on a measurement read from a raw line.
pub(crate) fn unescape_measurement(s: &str) -> Cow<'_, str> {
    if s.contains('\\') {
        Cow::Owned(s.replace("\\,", ",").replace("\\ ", " "))
    } else {
        Cow::Borrowed(s)
    }
}

/// Escape a tag key, tag value or field key.
/// Commas, equals signs, and spaces must be escaped.
fn escape_key(s: &str) -> String {
    s.replace(',', "\\,")
        .replace('=', "\\=")
        .replace(' ', "\\ ")
}

/// Byte offsets of the two unescaped section separators of a raw line.
///
/// Returns `(end_of_series_key, end_of_fields)`. Spaces inside quoted string
/// fields and backslash-escaped spaces are skipped. `None` when the line does
/// not have a field section.
pub(crate) fn section_bounds(line: &str) -> Option<(usize, Option<usize>)> {
    let mut escaped = false;
    let mut in_quotes = false;
    let mut first = None;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match ch {
            '\\' => escaped = true,
            '"' if first.is_some() => in_quotes = !in_quotes,
            ' ' if !in_quotes => match first {
                None => first = Some(idx),
                Some(_) => return first.map(|f| (f, Some(idx))),
            },
            _ => {}
        }
    }

    first.map(|f| (f, None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_value_float() {
        let v = FieldValue::Float(3.15);
        assert_eq!(v.to_line_protocol(), "3.15");
    }

    #[test]
    fn test_field_value_integer() {
        let v = FieldValue::Integer(42);
        assert_eq!(v.to_line_protocol(), "42i");
    }

    #[test]
    fn test_field_value_string_with_quotes() {
        let v = FieldValue::String("say \"hi\"".to_string());
        assert_eq!(v.to_line_protocol(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn test_field_value_boolean() {
        assert_eq!(FieldValue::Boolean(true).to_line_protocol(), "true");
        assert_eq!(FieldValue::Boolean(false).to_line_protocol(), "false");
    }

    #[test]
    fn test_point_simple_line() {
        let point = Point::new("temperature").field("value", 23.5);
        assert_eq!(
            point.to_line(1_000_000_000).unwrap(),
            "temperature value=23.5 1000000000"
        );
    }

    #[test]
    fn test_point_tags_sorted() {
        let point = Point::new("weather")
            .tag("station", "north")
            .tag("location", "room1")
            .field("temp", 22.1)
            .field("humidity", 65i64)
            .field("ok", true);

        assert_eq!(
            point.to_line(2_000_000_000).unwrap(),
            "weather,location=room1,station=north humidity=65i,ok=true,temp=22.1 2000000000"
        );
    }

    #[test]
    fn test_point_escape_special_chars() {
        let point = Point::new("my measurement")
            .tag("tag key", "tag,value")
            .field("field=key", "hello \"world\"");

        assert_eq!(
            point.to_line(3_000_000_000).unwrap(),
            "my\\ measurement,tag\\ key=tag\\,value field\\=key=\"hello \\\"world\\\"\" 3000000000"
        );
    }

    #[test]
    fn test_point_without_fields_rejected() {
        let point = Point::new("empty").tag("host", "a");
        assert_eq!(
            point.to_line(1),
            Err(LineProtocolError::NoFields("empty".into()))
        );
        assert_eq!(
            Point::new("").field("v", 1i64).to_line(1),
            Err(LineProtocolError::EmptyMeasurement)
        );
    }

    #[test]
    fn test_section_bounds() {
        let line = "cpu,host=a value=1 10";
        assert_eq!(section_bounds(line), Some((10, Some(18))));

        let quoted = "log msg=\"a b c\" 5";
        let (series, fields) = section_bounds(quoted).unwrap();
        assert_eq!(&quoted[..series], "log");
        assert_eq!(&quoted[series + 1..fields.unwrap()], "msg=\"a b c\"");

        let escaped = "my\\ m v=1";
        assert_eq!(section_bounds(escaped), Some((5, None)));

        assert_eq!(section_bounds("nofields"), None);
    }
}

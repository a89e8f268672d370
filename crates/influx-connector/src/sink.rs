// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Capability traits connecting the data-plane stages.

use crate::bus::BusError;
use crate::flatten::FlattenError;
use crate::line_protocol::unescape_measurement;
use crate::store::StoreError;
use async_trait::async_trait;
use std::borrow::Cow;
use thiserror::Error;

/// Errors raised while handing a payload to the next stage.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error(transparent)]
    Flatten(#[from] FlattenError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Bus(#[from] BusError),

    #[error("No routing attribute in payload: {0:?}")]
    NoAttribute(String),
}

/// Consumer of raw payloads (ingestion buffer output).
#[async_trait]
pub trait Sink: Send + Sync {
    async fn write(&self, payload: &[u8]) -> Result<(), SinkError>;
}

/// Consumer of payloads received on a named topic (subscriber output).
#[async_trait]
pub trait TopicSink: Send + Sync {
    async fn write(&self, payload: &[u8], topic: &str) -> Result<(), SinkError>;
}

/// Derives the routing key of an outbound payload.
pub trait AttributeExtractor: Send + Sync {
    fn attribute<'a>(&self, payload: &'a str) -> Result<Cow<'a, str>, SinkError>;
}

/// Routes Line Protocol text by measurement name.
///
/// The key is everything before the first unescaped comma, or before the
/// first unescaped space when the point carries no tags. Escaped commas and
/// spaces are unescaped, so `my\ topic` routes to the topic `my topic`.
#[derive(Debug, Clone, Copy, Default)]
pub struct MeasurementExtractor;

impl AttributeExtractor for MeasurementExtractor {
    fn attribute<'a>(&self, payload: &'a str) -> Result<Cow<'a, str>, SinkError> {
        let mut escaped = false;
        for (idx, ch) in payload.char_indices() {
            if escaped {
                escaped = false;
                continue;
            }
            match ch {
                '\\' => escaped = true,
                ',' | ' ' if idx > 0 => return Ok(unescape_measurement(&payload[..idx])),
                ',' | ' ' => break,
                _ => {}
            }
        }
        Err(SinkError::NoAttribute(payload.chars().take(64).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_before_comma() {
        let ex = MeasurementExtractor;
        assert_eq!(ex.attribute("camera1,host=a v=1 10").unwrap(), "camera1");
    }

    #[test]
    fn test_measurement_without_tags() {
        let ex = MeasurementExtractor;
        assert_eq!(ex.attribute("cpu value=1,x=2 10").unwrap(), "cpu");
    }

    #[test]
    fn test_measurement_escaped() {
        let ex = MeasurementExtractor;
        assert_eq!(ex.attribute("my\\ topic,host=a v=1").unwrap(), "my topic");
        assert_eq!(ex.attribute("a\\,b v=1").unwrap(), "a,b");
        assert!(matches!(ex.attribute("plain v=1").unwrap(), Cow::Borrowed("plain")));
    }

    #[test]
    fn test_measurement_matches_written_point() {
        let line = crate::line_protocol::Point::new("line 1, cam")
            .field("v", 1i64)
            .to_line(10)
            .unwrap();
        assert_eq!(MeasurementExtractor.attribute(&line).unwrap(), "line 1, cam");
    }

    #[test]
    fn test_missing_attribute() {
        let ex = MeasurementExtractor;
        assert!(matches!(ex.attribute(""), Err(SinkError::NoAttribute(_))));
        assert!(ex.attribute("nodelimiter").is_err());
        assert!(ex.attribute(",leading v=1").is_err());
    }
}

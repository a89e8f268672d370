// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Millisecond timestamps added to data in profiling mode.

use crate::bus::Message;
use crate::line_protocol::section_bounds;
use serde_json::Value;
use std::time::{SystemTime, UNIX_EPOCH};

/// Set when a message is received from a subscription.
pub const TS_ENTRY: &str = "tsIdbconnEntry";
/// Set when the writer starts processing a message.
pub const TS_PROC_ENTRY: &str = "tsIdbconnProcEntry";
/// Set when the write request is issued.
pub const TS_HTTP_ENTRY: &str = "tsIdbconnHttpEntry";

/// Set when a push notification reaches the ingest handler.
pub const TS_PUB_ENTRY: &str = "ts_idbconn_pub_entry";
/// Set when the entry is queued.
pub const TS_PUB_QUEUE_ENTRY: &str = "ts_idbconn_pub_queue_entry";
/// Milliseconds the ingest handler spent on the entry before queueing it.
pub const TS_RESPONSE_WRITE: &str = "ts_idbconn_influx_respose_write";
/// Set when an ingest worker dequeues the entry.
pub const TS_PUB_QUEUE_EXIT: &str = "ts_idbconn_pub_queue_exit";

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as i64)
}

/// Nanoseconds since the Unix epoch.
pub fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos() as i64)
}

/// Append `key=value` pairs to the field set of a Line Protocol line.
///
/// Lines without a field section are returned unchanged.
pub fn stamp_line(line: &str, stamps: &[(&str, i64)]) -> String {
    let Some((_, fields_end)) = section_bounds(line) else {
        return line.to_string();
    };
    let split = fields_end.unwrap_or(line.len());

    let mut out = String::with_capacity(line.len() + stamps.len() * 32);
    out.push_str(&line[..split]);
    for (key, value) in stamps {
        out.push(',');
        out.push_str(key);
        out.push('=');
        out.push_str(&value.to_string());
    }
    out.push_str(&line[split..]);
    out
}

/// Record the current time under `key` as a string field.
pub fn stamp_message(data: &mut Message, key: &str) -> i64 {
    let now = now_millis();
    data.insert(key.to_string(), Value::String(now.to_string()));
    now
}

/// Read back a stamp written by [`stamp_message`].
pub fn read_stamp(data: &Message, key: &str) -> Option<i64> {
    match data.get(key)? {
        Value::String(s) => s.parse().ok(),
        Value::Number(n) => n.as_i64(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamp_line_with_timestamp() {
        let out = stamp_line("cpu,host=a v=1 10", &[("ts_a", 5), ("ts_b", 6)]);
        assert_eq!(out, "cpu,host=a v=1,ts_a=5,ts_b=6 10");
    }

    #[test]
    fn test_stamp_line_without_timestamp() {
        let out = stamp_line("cpu v=1", &[("ts", 7)]);
        assert_eq!(out, "cpu v=1,ts=7");
    }

    #[test]
    fn test_stamp_line_quoted_spaces() {
        let out = stamp_line("log msg=\"a b\" 3", &[("ts", 1)]);
        assert_eq!(out, "log msg=\"a b\",ts=1 3");
    }

    #[test]
    fn test_stamp_line_not_a_point() {
        assert_eq!(stamp_line("garbage", &[("ts", 1)]), "garbage");
    }

    #[test]
    fn test_stamp_message_roundtrip() {
        let mut data = Message::new();
        let now = stamp_message(&mut data, TS_ENTRY);
        assert!(now > 0);
        assert_eq!(read_stamp(&data, TS_ENTRY), Some(now));
        assert_eq!(read_stamp(&data, "missing"), None);
    }
}

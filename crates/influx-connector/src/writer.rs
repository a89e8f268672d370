// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Bus message to store writer.

use crate::config::RuntimeOptions;
use crate::flatten::{parse_object, FlattenRules};
use crate::line_protocol::FieldValue;
use crate::profiling::{self, now_millis, TS_ENTRY, TS_HTTP_ENTRY, TS_PROC_ENTRY};
use crate::sink::{SinkError, TopicSink};
use crate::store::PointWriter;
use async_trait::async_trait;
use std::sync::Arc;

/// Flattens JSON messages into points named after their topic and writes
/// them to the store.
pub struct InfluxWriter {
    rules: Arc<FlattenRules>,
    store: Arc<dyn PointWriter>,
    runtime: RuntimeOptions,
}

impl InfluxWriter {
    pub fn new(rules: Arc<FlattenRules>, store: Arc<dyn PointWriter>, runtime: RuntimeOptions) -> Self {
        Self {
            rules,
            store,
            runtime,
        }
    }
}

#[async_trait]
impl TopicSink for InfluxWriter {
    async fn write(&self, payload: &[u8], topic: &str) -> Result<(), SinkError> {
        let mut data = parse_object(payload)?;
        let (entry, proc_entry) = if self.runtime.profiling {
            let proc_entry = profiling::stamp_message(&mut data, TS_PROC_ENTRY);
            (profiling::read_stamp(&data, TS_ENTRY), proc_entry)
        } else {
            (None, 0)
        };

        let mut point = self.rules.flatten_object(data, topic);
        tracing::debug!("Flattened point for {}: {:?}", topic, point.fields);

        let http_entry = now_millis();
        if self.runtime.profiling {
            point
                .fields
                .insert(TS_HTTP_ENTRY.to_string(), FieldValue::String(http_entry.to_string()));
        }

        self.store.write_point(&point).await?;

        if let Some(entry) = entry {
            let exit = now_millis();
            tracing::info!(
                topic,
                latency_ms = exit - entry,
                json_ms = http_entry - proc_entry,
                http_ms = exit - http_entry,
                "Point written"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn writer(store: Arc<MemoryStore>, profiling: bool) -> InfluxWriter {
        let rules = FlattenRules::new(["sensor"], ["roi"]);
        InfluxWriter::new(
            Arc::new(rules),
            store,
            RuntimeOptions {
                dev_mode: true,
                profiling,
            },
        )
    }

    #[tokio::test]
    async fn test_write_flattened_point() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(store.clone(), false);

        w.write(br#"{"sensor":"cam1","temp":42.5,"roi":{"x":1}}"#, "camera")
            .await
            .unwrap();

        let points = store.points();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].measurement, "camera");
        assert_eq!(points[0].tags["sensor"], "cam1");
        assert_eq!(points[0].fields["temp"], FieldValue::Float(42.5));
        assert_eq!(points[0].fields["roi"], FieldValue::String(r#"{"x":1}"#.into()));
    }

    #[tokio::test]
    async fn test_malformed_then_next_ok() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(store.clone(), false);

        let err = w.write(b"{not json", "camera").await.unwrap_err();
        assert!(matches!(err, SinkError::Flatten(_)));

        w.write(br#"{"v":1}"#, "camera").await.unwrap();
        assert_eq!(store.points().len(), 1);
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);
        let w = writer(store.clone(), false);

        let err = w.write(br#"{"v":1}"#, "camera").await.unwrap_err();
        assert!(matches!(err, SinkError::Store(_)));
    }

    #[tokio::test]
    async fn test_profiling_stamps() {
        let store = Arc::new(MemoryStore::new());
        let w = writer(store.clone(), true);

        w.write(br#"{"v":1,"tsIdbconnEntry":"1000"}"#, "camera")
            .await
            .unwrap();

        let points = store.points();
        let point = &points[0];
        assert!(point.fields.contains_key(TS_PROC_ENTRY));
        assert!(point.fields.contains_key(TS_HTTP_ENTRY));
        assert_eq!(point.fields[TS_ENTRY], FieldValue::String("1000".into()));
    }
}

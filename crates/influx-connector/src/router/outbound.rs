// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Outbound router: store push data to bus publishers.

use super::{RouterError, TopicRegistry, TopicStatsSnapshot};
use crate::bus::{BusConfig, BusConnector, Message, Publisher};
use crate::sink::{AttributeExtractor, Sink, SinkError};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Owns one publisher per topic and routes payloads by attribute.
pub struct OutboundRouter {
    registry: TopicRegistry<dyn Publisher>,
    extractor: Arc<dyn AttributeExtractor>,
    unrouted: AtomicU64,
    stopped: AtomicBool,
}

impl OutboundRouter {
    pub fn new(connector: Arc<dyn BusConnector>, extractor: Arc<dyn AttributeExtractor>) -> Self {
        Self {
            registry: TopicRegistry::new(connector),
            extractor,
            unrouted: AtomicU64::new(0),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a topic to publish on.
    pub fn register_topic(&mut self, name: &str) -> Result<(), RouterError> {
        self.registry.register_topic(name)
    }

    /// Declare that `name` gets its own client connection.
    pub fn register_client(&mut self, name: &str) -> Result<(), RouterError> {
        self.registry.register_client(name)
    }

    /// Open the client connection of `name`.
    pub async fn create_client(&mut self, name: &str, config: &BusConfig) -> Result<(), RouterError> {
        self.registry.create_client(name, config).await
    }

    /// Create a publisher for every registered topic with a client.
    ///
    /// Failures are logged and leave the topic unpublishable. Returns the
    /// number of publishers created.
    pub async fn start_all(&mut self) -> usize {
        let mut started = 0;
        for (topic, client) in self.registry.connected_topics() {
            match client.publisher(&topic).await {
                Ok(publisher) => {
                    tracing::info!("Publisher started for topic {}", topic);
                    self.registry.insert_endpoint(topic, publisher);
                    started += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to create publisher for {}: {}", topic, e);
                }
            }
        }
        started
    }

    /// Whether a publisher exists for `topic`.
    pub fn is_publishable(&self, topic: &str) -> bool {
        self.registry.endpoint(topic).is_some()
    }

    /// Publish `payload` on the topic named by its routing attribute.
    ///
    /// Payloads without a matching publisher are dropped silently.
    pub async fn dispatch(&self, payload: &[u8]) -> Result<(), SinkError> {
        let text = String::from_utf8_lossy(payload);
        let key = self.extractor.attribute(&text)?.into_owned();

        let Some(publisher) = self.registry.endpoint(&key) else {
            self.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::debug!("No publisher for {}, dropping", key);
            return Ok(());
        };

        let mut data = Message::new();
        data.insert("data".to_string(), Value::String(text.into_owned()));

        let stats = self.registry.topic_stats(&key);
        match publisher.publish(data).await {
            Ok(()) => {
                if let Some(stats) = stats {
                    stats.record_message(payload.len());
                }
                Ok(())
            }
            Err(e) => {
                if let Some(stats) = stats {
                    stats.record_error();
                }
                Err(e.into())
            }
        }
    }

    /// Payloads that matched no publisher.
    pub fn unrouted(&self) -> u64 {
        self.unrouted.load(Ordering::Relaxed)
    }

    /// Per-topic statistics.
    pub fn stats(&self) -> Vec<TopicStatsSnapshot> {
        self.registry.stats()
    }

    /// Close every publisher, then every client.
    pub async fn stop_all(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        for (topic, publisher) in self.registry.endpoints() {
            if let Err(e) = publisher.close().await {
                tracing::warn!("Failed to close publisher {}: {}", topic, e);
            }
        }
        self.registry.close_clients().await;
        tracing::info!("Outbound router stopped");
    }
}

#[async_trait]
impl Sink for OutboundRouter {
    async fn write(&self, payload: &[u8]) -> Result<(), SinkError> {
        self.dispatch(payload).await
    }
}

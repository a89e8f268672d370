// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Inbound router: bus subscriptions to a topic sink.

use super::{RouterError, TopicRegistry, TopicStats, TopicStatsSnapshot};
use crate::bus::{BusConfig, BusConnector, BusError, Subscriber};
use crate::config::RuntimeOptions;
use crate::profiling::{self, TS_ENTRY};
use crate::sink::{SinkError, TopicSink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Owns one subscriber per topic and the workers draining them.
pub struct InboundRouter {
    registry: TopicRegistry<dyn Subscriber>,
    runtime: RuntimeOptions,
    cancel: CancellationToken,
    tracker: TaskTracker,
    running: AtomicBool,
    stopped: AtomicBool,
}

impl InboundRouter {
    pub fn new(connector: Arc<dyn BusConnector>, runtime: RuntimeOptions) -> Self {
        Self {
            registry: TopicRegistry::new(connector),
            runtime,
            cancel: CancellationToken::new(),
            tracker: TaskTracker::new(),
            running: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    /// Register a topic to subscribe to.
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

    /// Create a subscriber for every registered topic with a client.
    ///
    /// Failures are logged and leave the topic unsubscribed. Returns the
    /// number of subscribers created.
    pub async fn start_all(&mut self) -> usize {
        let mut started = 0;
        for (topic, client) in self.registry.connected_topics() {
            match client.subscriber(&topic).await {
                Ok(subscriber) => {
                    tracing::info!("Subscriber started for topic {}", topic);
                    self.registry.insert_endpoint(topic, subscriber);
                    started += 1;
                }
                Err(e) => {
                    tracing::error!("Failed to create subscriber for {}: {}", topic, e);
                }
            }
        }
        started
    }

    /// Whether a subscriber exists for `topic`.
    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.registry.endpoint(topic).is_some()
    }

    /// Spawn `workers` workers per subscribed topic, each writing received
    /// messages to `sink`. Returns the number of workers spawned.
    pub fn receive_all(&self, sink: Arc<dyn TopicSink>, workers: usize) -> Result<usize, RouterError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(RouterError::AlreadyRunning);
        }

        let mut spawned = 0;
        for (topic, subscriber) in self.registry.endpoints() {
            let stats = self
                .registry
                .topic_stats(topic)
                .unwrap_or_else(|| Arc::new(TopicStats::new(topic.as_str())));

            for id in 0..workers {
                let worker = Worker {
                    id,
                    topic: topic.clone(),
                    subscriber: Arc::clone(subscriber),
                    sink: Arc::clone(&sink),
                    stats: Arc::clone(&stats),
                    runtime: self.runtime,
                    cancel: self.cancel.clone(),
                };
                self.tracker.spawn(worker.run());
                spawned += 1;
            }
        }

        tracing::info!(
            "Started {} workers for {} topics",
            spawned,
            self.registry.topics().len()
        );
        Ok(spawned)
    }

    /// Per-topic statistics.
    pub fn stats(&self) -> Vec<TopicStatsSnapshot> {
        self.registry.stats()
    }

    /// Stop the workers, wait for them, then close subscribers and clients.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }

        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;

        for (topic, subscriber) in self.registry.endpoints() {
            if let Err(e) = subscriber.close().await {
                tracing::warn!("Failed to close subscriber {}: {}", topic, e);
            }
        }
        self.registry.close_clients().await;
        tracing::info!("Inbound router stopped");
    }
}

struct Worker {
    id: usize,
    topic: String,
    subscriber: Arc<dyn Subscriber>,
    sink: Arc<dyn TopicSink>,
    stats: Arc<TopicStats>,
    runtime: RuntimeOptions,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        tracing::debug!("Worker {} for topic {} started", self.id, self.topic);

        loop {
            let received = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                received = self.subscriber.receive() => received,
            };

            let mut data = match received {
                Ok(envelope) => envelope.data,
                Err(BusError::Closed(_)) => break,
                Err(e) => {
                    tracing::warn!("Receive on {} failed: {}", self.topic, e);
                    self.stats.record_error();
                    tokio::select! {
                        _ = self.cancel.cancelled() => break,
                        _ = tokio::time::sleep(RECEIVE_RETRY_DELAY) => continue,
                    }
                }
            };

            if self.runtime.profiling {
                profiling::stamp_message(&mut data, TS_ENTRY);
            }

            let bytes = match serde_json::to_vec(&data) {
                Ok(bytes) => bytes,
                Err(e) => {
                    tracing::warn!("Cannot encode message from {}: {}", self.topic, e);
                    self.stats.record_error();
                    continue;
                }
            };

            match self.sink.write(&bytes, &self.topic).await {
                Ok(()) => self.stats.record_message(bytes.len()),
                Err(SinkError::Flatten(e)) => {
                    tracing::warn!("Dropping message from {}: {}", self.topic, e);
                    self.stats.record_dropped();
                }
                Err(e) => {
                    tracing::error!("Write for {} failed: {}", self.topic, e);
                    self.stats.record_error();
                }
            }
        }

        tracing::debug!("Worker {} for topic {} exited", self.id, self.topic);
    }
}

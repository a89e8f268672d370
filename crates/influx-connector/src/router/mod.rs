// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Topic routing over the message bus.
//!
//! Two routers share the same registration model:
//!
//! - [`OutboundRouter`] owns one publisher per topic and dispatches store
//!   push data to the publisher named by the payload's measurement.
//! - [`InboundRouter`] owns one subscriber per topic and runs a worker pool
//!   per topic that hands every message to a [`crate::sink::TopicSink`].
//!
//! Registration happens once at startup (`register_topic`,
//! `register_client`, `create_client`, then `start_all`). The maps are not
//! modified afterwards. Teardown closes endpoints before clients.

mod inbound;
mod outbound;
mod stats;

pub use inbound::InboundRouter;
pub use outbound::OutboundRouter;
pub use stats::{TopicStats, TopicStatsSnapshot};

use crate::bus::{BusClient, BusConfig, BusConnector, BusError};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Router errors.
#[derive(Debug, Error)]
pub enum RouterError {
    #[error("{kind} {name} already registered")]
    AlreadyRegistered { kind: &'static str, name: String },

    #[error("No client registered for topic {0}")]
    NotRegistered(String),

    #[error("Bus error: {0}")]
    Bus(#[from] BusError),

    #[error("Router already running")]
    AlreadyRunning,
}

/// Topic, client and endpoint maps of one router.
pub(crate) struct TopicRegistry<E: ?Sized> {
    connector: Arc<dyn BusConnector>,
    topics: Vec<String>,
    client_names: Vec<String>,
    clients: HashMap<String, Arc<dyn BusClient>>,
    endpoints: HashMap<String, Arc<E>>,
    stats: HashMap<String, Arc<TopicStats>>,
}

impl<E: ?Sized> TopicRegistry<E> {
    pub(crate) fn new(connector: Arc<dyn BusConnector>) -> Self {
        Self {
            connector,
            topics: Vec::new(),
            client_names: Vec::new(),
            clients: HashMap::new(),
            endpoints: HashMap::new(),
            stats: HashMap::new(),
        }
    }

    pub(crate) fn register_topic(&mut self, name: &str) -> Result<(), RouterError> {
        if self.topics.iter().any(|t| t == name) {
            return Err(RouterError::AlreadyRegistered {
                kind: "Topic",
                name: name.to_string(),
            });
        }
        self.topics.push(name.to_string());
        self.stats
            .insert(name.to_string(), Arc::new(TopicStats::new(name)));
        Ok(())
    }

    pub(crate) fn register_client(&mut self, name: &str) -> Result<(), RouterError> {
        if self.client_names.iter().any(|c| c == name) {
            return Err(RouterError::AlreadyRegistered {
                kind: "Client",
                name: name.to_string(),
            });
        }
        self.client_names.push(name.to_string());
        Ok(())
    }

    pub(crate) async fn create_client(
        &mut self,
        name: &str,
        config: &BusConfig,
    ) -> Result<(), RouterError> {
        if !self.client_names.iter().any(|c| c == name) {
            return Err(RouterError::NotRegistered(name.to_string()));
        }
        if self.clients.contains_key(name) {
            return Err(RouterError::AlreadyRegistered {
                kind: "Client connection",
                name: name.to_string(),
            });
        }

        let client = self.connector.connect(config).await?;
        self.clients.insert(name.to_string(), client);
        Ok(())
    }

    /// Registered topics that have a live client, in registration order.
    pub(crate) fn connected_topics(&self) -> Vec<(String, Arc<dyn BusClient>)> {
        self.topics
            .iter()
            .filter_map(|topic| match self.clients.get(topic) {
                Some(client) => Some((topic.clone(), Arc::clone(client))),
                None => {
                    tracing::warn!("Topic {} has no client, not started", topic);
                    None
                }
            })
            .collect()
    }

    pub(crate) fn insert_endpoint(&mut self, topic: String, endpoint: Arc<E>) {
        self.endpoints.insert(topic, endpoint);
    }

    pub(crate) fn endpoint(&self, topic: &str) -> Option<&Arc<E>> {
        self.endpoints.get(topic)
    }

    pub(crate) fn endpoints(&self) -> impl Iterator<Item = (&String, &Arc<E>)> {
        self.endpoints.iter()
    }

    pub(crate) fn topic_stats(&self, topic: &str) -> Option<Arc<TopicStats>> {
        self.stats.get(topic).cloned()
    }

    pub(crate) fn stats(&self) -> Vec<TopicStatsSnapshot> {
        self.topics
            .iter()
            .filter_map(|t| self.stats.get(t))
            .map(|s| s.snapshot())
            .collect()
    }

    pub(crate) fn topics(&self) -> &[String] {
        &self.topics
    }

    /// Close every client. Errors are logged.
    pub(crate) async fn close_clients(&self) {
        for (name, client) in &self.clients {
            if let Err(e) = client.close().await {
                tracing::warn!("Failed to close client {}: {}", name, e);
            }
        }
    }
}

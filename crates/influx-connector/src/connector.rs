// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connector orchestration.
//!
//! Startup order:
//!
//! 1. store bootstrap (admin user, database)
//! 2. outbound publishers, store subscription, push endpoint
//! 3. inbound subscribers and their workers
//! 4. query service
//!
//! Shutdown runs the push endpoint first, then the inbound router, the
//! query service and finally the outbound publishers.

use crate::bus::{BusClient, BusConfig, BusConnector, Service};
use crate::config::{ConfigError, ConnectorConfig};
use crate::influx::InfluxHttpStore;
use crate::ingest::{IngestError, IngestServer, IngestStatsSnapshot};
use crate::query::{QueryError, QueryService};
use crate::query_filter::{QueryFilterError, QueryValidator};
use crate::router::{InboundRouter, OutboundRouter, RouterError, TopicStatsSnapshot};
use crate::sink::{MeasurementExtractor, Sink, TopicSink};
use crate::store::{PointWriter, QueryExecutor, StoreError};
use crate::writer::InfluxWriter;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Startup and shutdown errors.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Router error: {0}")]
    Router(#[from] RouterError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    #[error("Query blacklist error: {0}")]
    Filter(#[from] QueryFilterError),

    #[error("Query service error: {0}")]
    Query(#[from] QueryError),

    #[error("Task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Connector wiring, ready to start.
pub struct Connector {
    config: ConnectorConfig,
    bus: Arc<dyn BusConnector>,
    writer: Arc<dyn PointWriter>,
    executor: Arc<dyn QueryExecutor>,
    influx: Option<Arc<InfluxHttpStore>>,
}

impl Connector {
    /// Connector backed by the InfluxDB server of `config`.
    pub fn new(config: ConnectorConfig, bus: Arc<dyn BusConnector>) -> Result<Self, ConnectorError> {
        config.validate()?;
        let influx = Arc::new(InfluxHttpStore::new(&config.influxdb)?);
        Ok(Self {
            config,
            bus,
            writer: influx.clone(),
            executor: influx.clone(),
            influx: Some(influx),
        })
    }

    /// Connector backed by any store. Database and subscription management
    /// are skipped.
    pub fn with_store<S>(
        config: ConnectorConfig,
        bus: Arc<dyn BusConnector>,
        store: Arc<S>,
    ) -> Result<Self, ConnectorError>
    where
        S: PointWriter + QueryExecutor + 'static,
    {
        config.validate()?;
        Ok(Self {
            config,
            bus,
            writer: store.clone(),
            executor: store,
            influx: None,
        })
    }

    /// Start every configured component.
    pub async fn start(self) -> Result<ConnectorHandle, ConnectorError> {
        let runtime = self.config.runtime();
        if runtime.dev_mode {
            tracing::warn!("Running in dev mode, plaintext transports allowed");
        }

        if let Some(influx) = &self.influx {
            self.bootstrap(influx).await?;
        }

        let mut handle = ConnectorHandle::default();
        if let Err(e) = self.start_components(&mut handle).await {
            tracing::error!("Startup failed: {}", e);
            if let Err(e) = handle.shutdown().await {
                tracing::warn!("Cleanup after failed startup: {}", e);
            }
            return Err(e);
        }

        tracing::info!("{} started", self.config.connector.app_name);
        Ok(handle)
    }

    async fn start_components(&self, handle: &mut ConnectorHandle) -> Result<(), ConnectorError> {
        let runtime = self.config.runtime();

        if !self.config.publishers.is_empty() {
            let outbound = Arc::new(self.start_outbound().await?);
            handle.outbound = Some(Arc::clone(&outbound));

            if self.config.ingest.subscribe {
                if let Some(influx) = &self.influx {
                    self.subscribe(influx).await?;
                }
            }

            let sink: Arc<dyn Sink> = outbound;
            let server = IngestServer::start(
                &self.config.ingest,
                runtime,
                sink,
                self.config.connector.pub_workers,
            )
            .await?;
            handle.ingest = Some(server);
        }

        if !self.config.subscribers.is_empty() {
            handle.inbound = Some(self.start_inbound().await?);
        }

        if self.config.query.enabled {
            handle.query = self.start_query().await?;
        }
        Ok(())
    }

    async fn bootstrap(&self, influx: &InfluxHttpStore) -> Result<(), ConnectorError> {
        let settings = &self.config.influxdb;
        if settings.create_admin && !settings.username.is_empty() {
            influx
                .create_admin_user(&settings.username, &settings.password)
                .await?;
        }
        influx
            .create_database(&settings.database, &settings.retention)
            .await?;
        Ok(())
    }

    async fn subscribe(&self, influx: &InfluxHttpStore) -> Result<(), ConnectorError> {
        let database = &self.config.influxdb.database;
        let ingest = &self.config.ingest;
        let scheme = if ingest.cert.is_some() { "https" } else { "http" };
        let destination = format!("{}://{}", scheme, ingest.address());

        let dropped = influx.drop_all_subscriptions(database).await?;
        if dropped > 0 {
            tracing::info!("Dropped {} stale subscriptions on {}", dropped, database);
        }
        influx
            .create_subscription(&format!("{}Subscription", database), database, &destination)
            .await?;
        Ok(())
    }

    async fn start_outbound(&self) -> Result<OutboundRouter, ConnectorError> {
        let mut router = OutboundRouter::new(Arc::clone(&self.bus), Arc::new(MeasurementExtractor));
        for topic in &self.config.publishers {
            router.register_topic(&topic.topic)?;
            if let Some(bus) = &topic.bus {
                router.register_client(&topic.topic)?;
                if let Err(e) = router.create_client(&topic.topic, bus).await {
                    tracing::error!("Client for publisher {} failed: {}", topic.topic, e);
                }
            }
        }

        let started = router.start_all().await;
        tracing::info!(
            "{} of {} publishers started",
            started,
            self.config.publishers.len()
        );
        Ok(router)
    }

    async fn start_inbound(&self) -> Result<InboundRouter, ConnectorError> {
        let runtime = self.config.runtime();
        let mut router = InboundRouter::new(Arc::clone(&self.bus), runtime);
        for topic in &self.config.subscribers {
            let name = topic.logical_topic();
            router.register_topic(name)?;
            if let Some(bus) = &topic.bus {
                router.register_client(name)?;
                if let Err(e) = router.create_client(name, bus).await {
                    tracing::error!("Client for subscriber {} failed: {}", name, e);
                }
            }
        }

        let started = router.start_all().await;
        tracing::info!(
            "{} of {} subscribers started",
            started,
            self.config.subscribers.len()
        );

        let sink: Arc<dyn TopicSink> = Arc::new(InfluxWriter::new(
            Arc::new(self.config.rules.flatten_rules()),
            Arc::clone(&self.writer),
            runtime,
        ));
        router.receive_all(sink, self.config.connector.sub_workers)?;
        Ok(router)
    }

    async fn start_query(&self) -> Result<Option<QueryTask>, ConnectorError> {
        let validator = QueryValidator::compile(&self.config.rules.blacklist_query)?;
        if !validator.has_blacklist() {
            tracing::warn!("No query blacklist configured");
        }

        let name = self.config.service_name().to_string();
        let config = self.config.query.bus.clone().unwrap_or(Value::Null);
        let (client, service) = match open_service(self.bus.as_ref(), &config, &name).await {
            Ok(opened) => opened,
            Err(e) => {
                tracing::error!("Query service {} not started: {}", name, e);
                return Ok(None);
            }
        };

        let query = QueryService::new(
            Arc::clone(&service),
            Arc::new(validator),
            Arc::clone(&self.executor),
        );
        let cancel = CancellationToken::new();
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { query.run(cancel).await }
        });

        Ok(Some(QueryTask {
            cancel,
            task,
            service,
            client,
        }))
    }
}

async fn open_service(
    bus: &dyn BusConnector,
    config: &BusConfig,
    name: &str,
) -> Result<(Arc<dyn BusClient>, Arc<dyn Service>), crate::bus::BusError> {
    let client = bus.connect(config).await?;
    let service = client.service(name).await?;
    Ok((client, service))
}

struct QueryTask {
    cancel: CancellationToken,
    task: JoinHandle<Result<(), QueryError>>,
    service: Arc<dyn Service>,
    client: Arc<dyn BusClient>,
}

impl QueryTask {
    async fn stop(self) -> Result<(), ConnectorError> {
        self.cancel.cancel();
        let result = self.task.await;
        if let Err(e) = self.service.close().await {
            tracing::warn!("Failed to close query service: {}", e);
        }
        if let Err(e) = self.client.close().await {
            tracing::warn!("Failed to close query client: {}", e);
        }
        result??;
        Ok(())
    }
}

/// Running connector.
#[derive(Default)]
pub struct ConnectorHandle {
    ingest: Option<IngestServer>,
    inbound: Option<InboundRouter>,
    outbound: Option<Arc<OutboundRouter>>,
    query: Option<QueryTask>,
}

impl ConnectorHandle {
    /// Address of the push endpoint, when publishers are configured.
    pub fn ingest_addr(&self) -> Option<SocketAddr> {
        self.ingest.as_ref().map(IngestServer::local_addr)
    }

    /// Push endpoint counters.
    pub fn ingest_stats(&self) -> Option<IngestStatsSnapshot> {
        self.ingest.as_ref().map(IngestServer::stats)
    }

    /// Per-topic statistics of the subscribers.
    pub fn inbound_stats(&self) -> Vec<TopicStatsSnapshot> {
        self.inbound
            .as_ref()
            .map(InboundRouter::stats)
            .unwrap_or_default()
    }

    /// Per-topic statistics of the publishers.
    pub fn outbound_stats(&self) -> Vec<TopicStatsSnapshot> {
        self.outbound
            .as_ref()
            .map(|router| router.stats())
            .unwrap_or_default()
    }

    /// Whether the query service is running.
    pub fn query_running(&self) -> bool {
        self.query.as_ref().is_some_and(|q| !q.task.is_finished())
    }

    /// Stop every component. Returns the query service error, if its loop
    /// ended on a transport failure.
    pub async fn shutdown(self) -> Result<(), ConnectorError> {
        tracing::info!("Shutting down");

        if let Some(ingest) = &self.ingest {
            ingest.shutdown().await;
        }
        if let Some(inbound) = &self.inbound {
            inbound.stop().await;
        }
        let query = match self.query {
            Some(query) => query.stop().await,
            None => Ok(()),
        };
        if let Some(outbound) = &self.outbound {
            outbound.stop_all().await;
        }

        tracing::info!("Shutdown complete");
        query
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::config::{InfluxConfig, TopicConfig};
    use crate::store::MemoryStore;

    fn dev_config() -> ConnectorConfig {
        let mut config = ConnectorConfig::new(InfluxConfig::new("http://localhost:8086", "datain"));
        config.connector.dev_mode = true;
        config.ingest.host = "127.0.0.1".to_string();
        config.ingest.port = 0;
        config
    }

    #[tokio::test]
    async fn test_start_without_topics() {
        let bus = LocalBus::new();
        let handle = Connector::with_store(dev_config(), Arc::new(bus), Arc::new(MemoryStore::new()))
            .unwrap()
            .start()
            .await
            .unwrap();

        assert!(handle.ingest_addr().is_none());
        assert!(handle.inbound_stats().is_empty());
        assert!(handle.query_running());
        handle.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_config_rejected() {
        let mut config = dev_config();
        config.connector.sub_workers = 0;
        let result = Connector::with_store(
            config,
            Arc::new(LocalBus::new()),
            Arc::new(MemoryStore::new()),
        );
        assert!(matches!(result, Err(ConnectorError::Config(_))));
    }

    #[tokio::test]
    async fn test_unconnected_topic_not_started() {
        let bus = LocalBus::new();
        let mut config = dev_config();
        config.add_subscriber(TopicConfig::unconnected("Camera/camera1"));
        config.add_subscriber(TopicConfig::new("Camera/camera2", Value::Null));

        let handle = Connector::with_store(config, Arc::new(bus.clone()), Arc::new(MemoryStore::new()))
            .unwrap()
            .start()
            .await
            .unwrap();

        assert_eq!(bus.subscriber_count("camera1"), 0);
        assert_eq!(bus.subscriber_count("camera2"), 1);
        assert_eq!(handle.inbound_stats().len(), 2);
        handle.shutdown().await.unwrap();
        assert_eq!(bus.subscriber_count("camera2"), 0);
    }

    #[tokio::test]
    async fn test_query_service_name_taken() {
        let bus = LocalBus::new();
        let other = bus.connect(&Value::Null).await.unwrap();
        let _taken = other.service("InfluxDBConnector").await.unwrap();

        let handle = Connector::with_store(dev_config(), Arc::new(bus), Arc::new(MemoryStore::new()))
            .unwrap()
            .start()
            .await
            .unwrap();
        assert!(!handle.query_running());
        handle.shutdown().await.unwrap();
    }
}

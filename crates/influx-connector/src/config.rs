// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Connector configuration.
//!
//! Loaded once from a TOML file and read-only afterwards.

use crate::bus::BusConfig;
use crate::flatten::FlattenRules;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Maximum number of publisher topics.
pub const MAX_PUBLISHER_TOPICS: usize = 50;

/// Maximum number of subscriber topics.
pub const MAX_SUBSCRIBER_TOPICS: usize = 50;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Process-wide settings.
    #[serde(default)]
    pub connector: GeneralConfig,

    /// Store connection.
    pub influxdb: InfluxConfig,

    /// Subscription push endpoint.
    #[serde(default)]
    pub ingest: IngestConfig,

    /// Flattening and query rules.
    #[serde(default)]
    pub rules: RulesConfig,

    /// Outbound topics (store data republished on the bus).
    #[serde(default)]
    pub publishers: Vec<TopicConfig>,

    /// Inbound topics (bus data written to the store).
    #[serde(default)]
    pub subscribers: Vec<TopicConfig>,

    /// Query service.
    #[serde(default)]
    pub query: QueryConfig,
}

/// Process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Application name, also the query service name.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Plaintext transports allowed.
    #[serde(default)]
    pub dev_mode: bool,

    /// Add timing fields along the data path.
    #[serde(default)]
    pub profiling: bool,

    /// Ingest workers feeding outbound publishers.
    #[serde(default = "default_workers")]
    pub pub_workers: usize,

    /// Workers per subscribed topic.
    #[serde(default = "default_workers")]
    pub sub_workers: usize,
}

fn default_app_name() -> String {
    "InfluxDBConnector".to_string()
}

fn default_workers() -> usize {
    5
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            dev_mode: false,
            profiling: false,
            pub_workers: default_workers(),
            sub_workers: default_workers(),
        }
    }
}

/// InfluxDB connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxConfig {
    /// Base URL, e.g. `https://localhost:8086`.
    #[serde(default = "default_influx_url")]
    pub url: String,

    /// Database name.
    pub database: String,

    #[serde(default)]
    pub username: String,

    #[serde(default)]
    pub password: String,

    /// Retention duration of the database (`7d`, `1h`, ...). Empty keeps the
    /// server default.
    #[serde(default)]
    pub retention: String,

    /// Create `username` as an admin user at startup.
    #[serde(default)]
    pub create_admin: bool,

    /// CA bundle used to verify the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Client certificate presented to the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_cert: Option<PathBuf>,

    /// Key of `client_cert`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_key: Option<PathBuf>,

    /// HTTP request timeout (seconds).
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_influx_url() -> String {
    "https://localhost:8086".to_string()
}

fn default_timeout() -> u64 {
    60
}

impl InfluxConfig {
    /// Settings for `database` with defaults everywhere else.
    pub fn new(url: impl Into<String>, database: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            database: database.into(),
            username: String::new(),
            password: String::new(),
            retention: String::new(),
            create_admin: false,
            ca_cert: None,
            client_cert: None,
            client_key: None,
            timeout_secs: default_timeout(),
        }
    }

    /// Set credentials.
    pub fn with_credentials(mut self, username: &str, password: &str) -> Self {
        self.username = username.to_string();
        self.password = password.to_string();
        self
    }
}

/// Subscription push endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Listen host; also the host InfluxDB pushes to.
    #[serde(default = "default_ingest_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_ingest_port")]
    pub port: u16,

    /// Bounded queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Largest accepted push body in bytes, 0 for no limit.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,

    /// Register an InfluxDB subscription pointing at this endpoint.
    #[serde(default = "default_true")]
    pub subscribe: bool,

    /// Server certificate (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cert: Option<PathBuf>,

    /// Server private key (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<PathBuf>,

    /// CA used to verify client certificates (PEM).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// Reject clients without a certificate.
    #[serde(default = "default_true")]
    pub require_client_cert: bool,
}

fn default_ingest_host() -> String {
    "localhost".to_string()
}

fn default_ingest_port() -> u16 {
    61971
}

fn default_queue_capacity() -> usize {
    100
}

fn default_max_body_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            host: default_ingest_host(),
            port: default_ingest_port(),
            queue_capacity: default_queue_capacity(),
            max_body_bytes: default_max_body_bytes(),
            subscribe: true,
            cert: None,
            key: None,
            ca_cert: None,
            require_client_cert: true,
        }
    }
}

impl IngestConfig {
    /// `host:port` to listen on.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Flattening and query rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RulesConfig {
    /// Top-level keys written as tags.
    #[serde(default)]
    pub tag_keys: Vec<String>,

    /// Keys stored as JSON text instead of being flattened.
    #[serde(default)]
    pub ignore_keys: Vec<String>,

    /// Keywords that make a query invalid.
    #[serde(default)]
    pub blacklist_query: Vec<String>,
}

impl RulesConfig {
    /// Flattening rules.
    pub fn flatten_rules(&self) -> FlattenRules {
        FlattenRules::new(self.tag_keys.iter().cloned(), self.ignore_keys.iter().cloned())
    }
}

/// One bus topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopicConfig {
    /// Topic as configured; for subscribers `Publisher/topic`.
    pub topic: String,

    /// Transport settings. Without them the topic gets no client.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<BusConfig>,
}

impl TopicConfig {
    /// Topic with transport settings.
    pub fn new(topic: impl Into<String>, bus: BusConfig) -> Self {
        Self {
            topic: topic.into(),
            bus: Some(bus),
        }
    }

    /// Topic without transport settings.
    pub fn unconnected(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            bus: None,
        }
    }

    /// Name used on the bus: the second `/` segment when present.
    pub fn logical_topic(&self) -> &str {
        logical_topic(&self.topic)
    }
}

/// Second segment of a `/`-delimited topic string, or the whole string.
pub fn logical_topic(topic: &str) -> &str {
    match topic.split('/').nth(1) {
        Some(segment) if !segment.is_empty() => segment,
        _ => topic,
    }
}

/// Query service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// Run the query service.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Service name override; defaults to the application name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,

    /// Transport settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bus: Option<BusConfig>,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            service_name: None,
            bus: None,
        }
    }
}

/// Flags read on the data path.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RuntimeOptions {
    pub dev_mode: bool,
    pub profiling: bool,
}

impl ConnectorConfig {
    /// Minimal configuration for `database`.
    pub fn new(influxdb: InfluxConfig) -> Self {
        Self {
            connector: GeneralConfig::default(),
            influxdb,
            ingest: IngestConfig::default(),
            rules: RulesConfig::default(),
            publishers: Vec::new(),
            subscribers: Vec::new(),
            query: QueryConfig::default(),
        }
    }

    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Runtime flags.
    pub fn runtime(&self) -> RuntimeOptions {
        RuntimeOptions {
            dev_mode: self.connector.dev_mode,
            profiling: self.connector.profiling,
        }
    }

    /// Name of the query service.
    pub fn service_name(&self) -> &str {
        self.query
            .service_name
            .as_deref()
            .unwrap_or(&self.connector.app_name)
    }

    /// Add an outbound topic.
    pub fn add_publisher(&mut self, topic: TopicConfig) {
        self.publishers.push(topic);
    }

    /// Add an inbound topic.
    pub fn add_subscriber(&mut self, topic: TopicConfig) {
        self.subscribers.push(topic);
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.influxdb.database.is_empty() {
            return Err(ConfigError::Invalid("influxdb.database is empty".into()));
        }
        if self.connector.pub_workers == 0 || self.connector.sub_workers == 0 {
            return Err(ConfigError::Invalid(
                "pub_workers and sub_workers must be at least 1".into(),
            ));
        }
        if self.ingest.queue_capacity == 0 {
            return Err(ConfigError::Invalid(
                "ingest.queue_capacity must be at least 1".into(),
            ));
        }
        if self.connector.app_name.is_empty() {
            return Err(ConfigError::Invalid("connector.app_name is empty".into()));
        }

        if self.publishers.len() > MAX_PUBLISHER_TOPICS {
            return Err(ConfigError::Invalid(format!(
                "{} publisher topics configured, at most {} allowed",
                self.publishers.len(),
                MAX_PUBLISHER_TOPICS
            )));
        }
        if self.subscribers.len() > MAX_SUBSCRIBER_TOPICS {
            return Err(ConfigError::Invalid(format!(
                "{} subscriber topics configured, at most {} allowed",
                self.subscribers.len(),
                MAX_SUBSCRIBER_TOPICS
            )));
        }

        check_topics("publisher", self.publishers.iter().map(|t| t.topic.as_str()))?;
        check_topics(
            "subscriber",
            self.subscribers.iter().map(TopicConfig::logical_topic),
        )?;

        if !self.connector.dev_mode {
            let ingest = &self.ingest;
            if !self.publishers.is_empty() && (ingest.cert.is_none() || ingest.key.is_none()) {
                return Err(ConfigError::Invalid(
                    "ingest.cert and ingest.key are required outside dev_mode".into(),
                ));
            }
            if !self.publishers.is_empty() && ingest.require_client_cert && ingest.ca_cert.is_none()
            {
                return Err(ConfigError::Invalid(
                    "ingest.ca_cert is required to verify client certificates".into(),
                ));
            }
            if self.influxdb.url.starts_with("http://") {
                return Err(ConfigError::Invalid(
                    "plain http store URL is only allowed in dev_mode".into(),
                ));
            }
        }

        if self.influxdb.client_cert.is_some() != self.influxdb.client_key.is_some() {
            return Err(ConfigError::Invalid(
                "influxdb.client_cert and influxdb.client_key go together".into(),
            ));
        }

        Ok(())
    }
}

fn check_topics<'a>(
    role: &str,
    topics: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for topic in topics {
        if topic.is_empty() {
            return Err(ConfigError::Invalid(format!("empty {} topic", role)));
        }
        if !seen.insert(topic) {
            return Err(ConfigError::Invalid(format!(
                "duplicate {} topic {}",
                role, topic
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn dev_config() -> ConnectorConfig {
        let mut config = ConnectorConfig::new(InfluxConfig::new("http://localhost:8086", "datain"));
        config.connector.dev_mode = true;
        config
    }

    #[test]
    fn test_parse_full_config() {
        let toml_str = r#"
[connector]
app_name = "InfluxDBConnector"
dev_mode = true
profiling = false
pub_workers = 3
sub_workers = 2

[influxdb]
url = "http://localhost:8086"
database = "datain"
username = "admin"
password = "secret"
retention = "1d"

[ingest]
port = 61000
queue_capacity = 10

[rules]
tag_keys = ["sensor"]
ignore_keys = ["defects"]
blacklist_query = ["drop", "delete"]

[[publishers]]
topic = "camera1_stream_results"
bus = { type = "local" }

[[subscribers]]
topic = "VideoAnalytics/camera1_stream_results"
bus = { type = "local" }
"#;
        let config: ConnectorConfig = toml::from_str(toml_str).unwrap();
        config.validate().unwrap();

        assert_eq!(config.connector.pub_workers, 3);
        assert_eq!(config.ingest.port, 61000);
        assert_eq!(config.ingest.host, "localhost");
        assert_eq!(config.rules.blacklist_query, vec!["drop", "delete"]);
        assert_eq!(config.subscribers[0].logical_topic(), "camera1_stream_results");
        assert!(config.publishers[0].bus.is_some());
        assert_eq!(config.service_name(), "InfluxDBConnector");
        assert_eq!(
            config.runtime(),
            RuntimeOptions {
                dev_mode: true,
                profiling: false
            }
        );
    }

    #[test]
    fn test_defaults() {
        let config: ConnectorConfig = toml::from_str(
            r#"
[influxdb]
database = "datain"
"#,
        )
        .unwrap();

        assert_eq!(config.connector.app_name, "InfluxDBConnector");
        assert_eq!(config.connector.pub_workers, 5);
        assert_eq!(config.ingest.port, 61971);
        assert_eq!(config.ingest.queue_capacity, 100);
        assert_eq!(config.ingest.max_body_bytes, 64 * 1024 * 1024);
        assert!(config.ingest.require_client_cert);
        assert_eq!(config.influxdb.timeout_secs, 60);
        assert!(config.query.enabled);
    }

    #[test]
    fn test_logical_topic() {
        assert_eq!(logical_topic("Publisher/topic1"), "topic1");
        assert_eq!(logical_topic("topic1"), "topic1");
        assert_eq!(logical_topic("a/b/c"), "b");
        assert_eq!(logical_topic("trailing/"), "trailing/");
    }

    #[test]
    fn test_validate_limits() {
        let mut config = dev_config();
        for i in 0..=MAX_PUBLISHER_TOPICS {
            config.add_publisher(TopicConfig::new(format!("t{}", i), serde_json::Value::Null));
        }
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = dev_config();
        config.connector.sub_workers = 0;
        assert!(config.validate().is_err());

        let mut config = dev_config();
        config.ingest.queue_capacity = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_duplicate_topics() {
        let mut config = dev_config();
        config.add_subscriber(TopicConfig::new("A/topic", serde_json::Value::Null));
        config.add_subscriber(TopicConfig::new("B/topic", serde_json::Value::Null));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate subscriber topic topic"));
    }

    #[test]
    fn test_validate_production_requires_tls() {
        let mut config = ConnectorConfig::new(InfluxConfig::new("https://localhost:8086", "datain"));
        config.add_publisher(TopicConfig::new("t", serde_json::Value::Null));
        assert!(config.validate().is_err());

        config.ingest.cert = Some("server.pem".into());
        config.ingest.key = Some("server.key".into());
        assert!(config.validate().is_err());

        config.ingest.ca_cert = Some("ca.pem".into());
        config.validate().unwrap();

        config.influxdb.url = "http://localhost:8086".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[connector]
dev_mode = true

[influxdb]
url = "http://127.0.0.1:8086"
database = "metrics"
"#
        )
        .unwrap();

        let config = ConnectorConfig::from_file(file.path()).unwrap();
        assert_eq!(config.influxdb.database, "metrics");

        let missing = ConnectorConfig::from_file("/nonexistent/connector.toml");
        assert!(matches!(missing, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = dev_config();
        config.add_publisher(TopicConfig::new("out", serde_json::json!({"type": "local"})));
        config.rules.tag_keys = vec!["sensor".into()];

        let toml_str = toml::to_string_pretty(&config).unwrap();
        let parsed: ConnectorConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.publishers.len(), 1);
        assert_eq!(parsed.rules.tag_keys, vec!["sensor"]);
    }
}

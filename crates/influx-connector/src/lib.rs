// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB connector for a topic-based message bus.
//!
//! Moves data both ways between bus topics and an InfluxDB 1.x server and
//! answers filtered queries.
//!
//! # Features
//!
//! - **Inbound**: JSON messages received on subscribed topics are flattened
//!   into points (dotted keys, configured tag keys) and written to the store
//! - **Outbound**: InfluxDB subscription pushes are received on an HTTP(S)
//!   endpoint, buffered, and republished on the topic named by each line's
//!   measurement
//! - **Queries**: a request/reply service runs `SELECT` queries that pass a
//!   keyword blacklist and returns the first result series
//!
//! # Quick Start
//!
//! ```bash
//! # Write an example configuration
//! influx-connector gen-config --output connector.toml
//!
//! # Check it
//! influx-connector validate --config connector.toml
//!
//! # Run
//! influx-connector --config connector.toml
//! ```
//!
//! # Configuration File
//!
//! ```toml
//! [connector]
//! app_name = "InfluxDBConnector"
//! dev_mode = true
//!
//! [influxdb]
//! url = "http://localhost:8086"
//! database = "datain"
//!
//! [rules]
//! tag_keys = ["sensor"]
//! blacklist_query = ["drop", "delete"]
//!
//! [[subscribers]]
//! topic = "Camera/camera1"
//! bus = {}
//! ```

pub mod bus;
pub mod config;
pub mod connector;
pub mod flatten;
pub mod influx;
pub mod ingest;
pub mod line_protocol;
pub mod profiling;
pub mod query;
pub mod query_filter;
pub mod router;
pub mod sink;
pub mod store;
pub mod writer;

pub use bus::{BusConnector, LocalBus};
pub use config::{ConfigError, ConnectorConfig, InfluxConfig, TopicConfig};
pub use connector::{Connector, ConnectorError, ConnectorHandle};
pub use flatten::{flatten, FlattenError, FlattenRules};
pub use influx::InfluxHttpStore;
pub use ingest::{IngestBuffer, IngestError, IngestServer};
pub use line_protocol::{FieldValue, Point};
pub use query::{QueryError, QueryService};
pub use query_filter::{Classification, QueryValidator};
pub use router::{InboundRouter, OutboundRouter, RouterError, TopicStatsSnapshot};
pub use sink::{AttributeExtractor, MeasurementExtractor, Sink, SinkError, TopicSink};
pub use store::{MemoryStore, PointWriter, QueryExecutor, Series, StoreError};
pub use writer::InfluxWriter;

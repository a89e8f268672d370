// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB connector CLI
//!
//! # Usage
//!
//! ```bash
//! # Run with a configuration file
//! influx-connector --config connector.toml
//!
//! # Generate an example configuration
//! influx-connector gen-config --output connector.toml
//!
//! # Validate a configuration file
//! influx-connector validate --config connector.toml
//! ```

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use influx_connector::config::{IngestConfig, RulesConfig};
use influx_connector::{
    Connector, ConnectorConfig, ConnectorHandle, InfluxConfig, LocalBus, TopicConfig,
    TopicStatsSnapshot,
};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// InfluxDB connector
#[derive(Parser, Debug)]
#[command(name = "influx-connector")]
#[command(about = "Bridges message bus topics and InfluxDB")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Statistics reporting interval (seconds, 0 to disable)
    #[arg(long, default_value = "0")]
    stats_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Generate example configuration file
    GenConfig {
        /// Output file path
        #[arg(short, long, default_value = "connector.toml")]
        output: PathBuf,
    },

    /// Validate a configuration file
    Validate {
        /// Configuration file path
        #[arg(short, long)]
        config: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Some(cmd) = args.command {
        return match cmd {
            Commands::GenConfig { output } => cmd_gen_config(output),
            Commands::Validate { config } => cmd_validate(config),
        };
    }

    let Some(path) = args.config else {
        bail!("Missing --config (see `influx-connector gen-config`)");
    };
    let config = ConnectorConfig::from_file(&path)
        .with_context(|| format!("loading {}", path.display()))?;

    println!("InfluxDB Connector v{}", env!("CARGO_PKG_VERSION"));
    println!("=====================================");
    println!("Store:       {} ({})", config.influxdb.url, config.influxdb.database);
    println!("Publishers:  {}", config.publishers.len());
    println!("Subscribers: {}", config.subscribers.len());
    println!();
    println!("Press Ctrl+C to stop...");
    println!();

    tracing::warn!(
        "Using the in-process bus: publishers, subscribers and the query service are local to this process"
    );
    let bus = Arc::new(LocalBus::new());
    let handle = Connector::new(config, bus)?.start().await?;
    let handle = Arc::new(handle);

    let stats_task = (args.stats_interval > 0).then(|| {
        let stats_handle = Arc::clone(&handle);
        let period = Duration::from_secs(args.stats_interval);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                interval.tick().await;
                print_stats(&stats_handle);
            }
        })
    });

    tokio::signal::ctrl_c().await?;
    println!("\nShutting down...");
    if let Some(task) = stats_task {
        task.abort();
        let _ = task.await;
    }

    println!("\nFinal Statistics:");
    print_stats(&handle);

    match Arc::try_unwrap(handle) {
        Ok(handle) => handle.shutdown().await?,
        Err(_) => bail!("connector handle still shared at shutdown"),
    }
    Ok(())
}

fn cmd_gen_config(output: PathBuf) -> anyhow::Result<()> {
    let mut config = ConnectorConfig::new(
        InfluxConfig::new("https://localhost:8086", "datain").with_credentials("admin", "admin"),
    );
    config.influxdb.retention = "7d".into();
    config.influxdb.create_admin = true;
    config.ingest = IngestConfig {
        cert: Some("certs/server.crt".into()),
        key: Some("certs/server.key".into()),
        ca_cert: Some("certs/ca.crt".into()),
        ..Default::default()
    };
    config.rules = RulesConfig {
        tag_keys: vec!["sensor".into(), "camera".into()],
        ignore_keys: vec!["defects".into()],
        blacklist_query: vec![
            "drop".into(),
            "delete".into(),
            "alter".into(),
            "create".into(),
            "grant".into(),
            "revoke".into(),
        ],
    };
    config.add_publisher(TopicConfig::new("camera1", json!({})));
    config.add_subscriber(TopicConfig::new("Camera/camera1", json!({})));

    let toml_str = toml::to_string_pretty(&config)?;
    let content = format!(
        r#"# InfluxDB Connector Configuration
# Generated by influx-connector gen-config

{}
"#,
        toml_str
    );

    std::fs::write(&output, content)?;
    println!("Generated configuration file: {}", output.display());
    Ok(())
}

fn cmd_validate(config_path: PathBuf) -> anyhow::Result<()> {
    match ConnectorConfig::from_file(&config_path) {
        Ok(config) => {
            println!("Configuration valid!");
            println!();
            println!("Application: {}", config.connector.app_name);
            println!("Database:    {}", config.influxdb.database);
            println!("Publishers:  {}", config.publishers.len());
            for topic in &config.publishers {
                println!("  -> {}", topic.topic);
            }
            println!("Subscribers: {}", config.subscribers.len());
            for topic in &config.subscribers {
                println!("  <- {} ({})", topic.topic, topic.logical_topic());
            }
            Ok(())
        }
        Err(e) => {
            eprintln!("Configuration invalid: {}", e);
            std::process::exit(1);
        }
    }
}

fn print_stats(handle: &ConnectorHandle) {
    println!("--- Connector Statistics ---");
    if let Some(ingest) = handle.ingest_stats() {
        println!(
            "  Ingest: {} accepted, {} dropped, {} delivered, {} failed",
            ingest.accepted, ingest.dropped, ingest.delivered, ingest.failed
        );
    }
    for stat in handle.outbound_stats() {
        print_topic("->", &stat);
    }
    for stat in handle.inbound_stats() {
        print_topic("<-", &stat);
    }
}

fn print_topic(direction: &str, stat: &TopicStatsSnapshot) {
    println!(
        "  {} {}: {} msgs ({:.1} msg/s), {} bytes, {} dropped, {} errors",
        direction,
        stat.topic,
        stat.messages_routed,
        stat.messages_per_second(),
        format_bytes(stat.bytes_routed),
        stat.messages_dropped,
        stat.errors
    );
}

fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    }
}

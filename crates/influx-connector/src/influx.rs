// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! InfluxDB 1.x HTTP client.
//!
//! Writes go to `/write` as Line Protocol with nanosecond precision, queries
//! to `/query`. Database, user and subscription management statements are
//! sent as `POST /query`.

use crate::config::InfluxConfig;
use crate::line_protocol::Point;
use crate::profiling::now_nanos;
use crate::store::{PointWriter, QueryExecutor, Series, StoreError};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct QueryResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StatementResult {
    #[serde(default)]
    series: Vec<Series>,
    #[serde(default)]
    error: Option<String>,
}

/// InfluxDB HTTP store.
#[derive(Debug, Clone)]
pub struct InfluxHttpStore {
    client: reqwest::Client,
    base_url: String,
    database: String,
    username: String,
    password: String,
}

impl InfluxHttpStore {
    /// Build a client from connection settings.
    pub fn new(config: &InfluxConfig) -> Result<Self, StoreError> {
        let mut builder =
            reqwest::Client::builder().timeout(Duration::from_secs(config.timeout_secs.max(1)));

        if let Some(ref ca) = config.ca_cert {
            let pem = read_pem(ca)?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| StoreError::Unavailable(format!("invalid CA {}: {}", ca.display(), e)))?;
            builder = builder.add_root_certificate(cert);
        }

        if let (Some(cert), Some(key)) = (&config.client_cert, &config.client_key) {
            let mut pem = read_pem(cert)?;
            pem.push(b'\n');
            pem.extend(read_pem(key)?);
            let identity = reqwest::Identity::from_pem(&pem)
                .map_err(|e| StoreError::Unavailable(format!("invalid client identity: {}", e)))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| StoreError::Unavailable(format!("HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
            database: config.database.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        })
    }

    /// Database points are written to.
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Create a database, with a default retention duration when `retention`
    /// is not empty.
    pub async fn create_database(&self, name: &str, retention: &str) -> Result<(), StoreError> {
        let mut statement = format!("CREATE DATABASE {}", quote_ident(name));
        if !retention.is_empty() {
            if !retention.chars().all(|c| c.is_ascii_alphanumeric()) {
                return Err(StoreError::QueryFailed(format!(
                    "invalid retention duration {:?}",
                    retention
                )));
            }
            statement.push_str(" WITH DURATION ");
            statement.push_str(retention);
        }

        self.manage(&statement).await?;
        tracing::info!("Database {} ready", name);
        Ok(())
    }

    /// Create an admin user. An existing user is not an error.
    pub async fn create_admin_user(&self, username: &str, password: &str) -> Result<(), StoreError> {
        let statement = format!(
            "CREATE USER {} WITH PASSWORD {} WITH ALL PRIVILEGES",
            quote_ident(username),
            quote_literal(password)
        );
        match self.manage(&statement).await {
            Ok(_) => {
                tracing::info!("Created admin user {}", username);
                Ok(())
            }
            Err(StoreError::QueryFailed(msg)) if msg.contains("already exists") => {
                tracing::info!("Admin user {} already exists", username);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drop every subscription of `database`. Returns how many were dropped.
    pub async fn drop_all_subscriptions(&self, database: &str) -> Result<usize, StoreError> {
        let results = self.execute(Method::GET, "SHOW SUBSCRIPTIONS", None, None).await?;
        let series = first_statement(results)?;

        let mut dropped = 0;
        for s in series.iter().filter(|s| s.name == database) {
            let rp_col = column(s, "retention_policy").unwrap_or(0);
            let name_col = column(s, "name").unwrap_or(1);

            for row in &s.values {
                let (Some(rp), Some(name)) = (
                    row.get(rp_col).and_then(|v| v.as_str()),
                    row.get(name_col).and_then(|v| v.as_str()),
                ) else {
                    continue;
                };

                let statement = format!(
                    "DROP SUBSCRIPTION {} ON {}.{}",
                    quote_ident(name),
                    quote_ident(database),
                    quote_ident(rp)
                );
                self.manage(&statement).await?;
                tracing::debug!("Dropped subscription {} on {}.{}", name, database, rp);
                dropped += 1;
            }
        }

        Ok(dropped)
    }

    /// Create a subscription pushing every write of `database` to
    /// `destination`. An existing subscription with that name is not an error.
    pub async fn create_subscription(
        &self,
        name: &str,
        database: &str,
        destination: &str,
    ) -> Result<(), StoreError> {
        let statement = format!(
            "CREATE SUBSCRIPTION {} ON {}.\"autogen\" DESTINATIONS ALL {}",
            quote_ident(name),
            quote_ident(database),
            quote_literal(destination)
        );

        match self.manage(&statement).await {
            Ok(_) => {
                tracing::info!("Created subscription {} -> {}", name, destination);
                Ok(())
            }
            Err(StoreError::QueryFailed(msg)) if msg.contains("already exists") => {
                tracing::info!("Subscription {} already exists", name);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Write raw Line Protocol.
    pub async fn write_lines(&self, body: String) -> Result<(), StoreError> {
        let url = format!("{}/write", self.base_url);
        let request = self
            .authorize(self.client.post(&url))
            .query(&[("db", self.database.as_str()), ("precision", "ns")])
            .body(body);

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let text = response.text().await.unwrap_or_default();
        let message = error_message(&text);
        if status.is_server_error() {
            Err(StoreError::Unavailable(format!("{}: {}", status, message)))
        } else {
            Err(StoreError::WriteFailed(format!("{}: {}", status, message)))
        }
    }

    async fn manage(&self, statement: &str) -> Result<Vec<Series>, StoreError> {
        let results = self.execute(Method::POST, statement, None, None).await?;
        first_statement(results)
    }

    async fn execute(
        &self,
        method: Method,
        statement: &str,
        database: Option<&str>,
        epoch: Option<&str>,
    ) -> Result<Vec<StatementResult>, StoreError> {
        let url = format!("{}/query", self.base_url);
        let mut params = vec![("q", statement)];
        if let Some(db) = database {
            params.push(("db", db));
        }
        if let Some(epoch) = epoch {
            params.push(("epoch", epoch));
        }

        let response = self
            .authorize(self.client.request(method, &url))
            .query(&params)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if status.is_server_error() {
            return Err(StoreError::Unavailable(format!(
                "{}: {}",
                status,
                error_message(&text)
            )));
        }
        if status != StatusCode::OK {
            return Err(StoreError::QueryFailed(format!(
                "{}: {}",
                status,
                error_message(&text)
            )));
        }

        let parsed: QueryResponse =
            serde_json::from_str(&text).map_err(|e| StoreError::InvalidResponse(e.to_string()))?;
        if let Some(error) = parsed.error {
            return Err(StoreError::QueryFailed(error));
        }
        Ok(parsed.results)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.username.is_empty() {
            request
        } else {
            request.basic_auth(&self.username, Some(&self.password))
        }
    }
}

#[async_trait]
impl PointWriter for InfluxHttpStore {
    async fn write_point(&self, point: &Point) -> Result<(), StoreError> {
        let line = point.to_line(now_nanos())?;
        self.write_lines(line).await
    }
}

#[async_trait]
impl QueryExecutor for InfluxHttpStore {
    async fn query(&self, command: &str) -> Result<Vec<Series>, StoreError> {
        let results = self
            .execute(Method::GET, command, Some(self.database.as_str()), Some("s"))
            .await?;
        first_statement(results)
    }
}

fn first_statement(results: Vec<StatementResult>) -> Result<Vec<Series>, StoreError> {
    let first = results.into_iter().next().unwrap_or_default();
    match first.error {
        Some(error) => Err(StoreError::QueryFailed(error)),
        None => Ok(first.series),
    }
}

fn column(series: &Series, name: &str) -> Option<usize> {
    series.columns.iter().position(|c| c == name)
}

/// `{"error": "..."}` bodies carry the useful part of a failure.
fn error_message(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_else(|_| body.trim().to_string())
}

fn quote_ident(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

fn quote_literal(s: &str) -> String {
    format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'"))
}

fn read_pem(path: &std::path::Path) -> Result<Vec<u8>, StoreError> {
    std::fs::read(path)
        .map_err(|e| StoreError::Unavailable(format!("cannot read {}: {}", path.display(), e)))
}

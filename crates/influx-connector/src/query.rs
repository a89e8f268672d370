// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query request/reply service.
//!
//! Bus clients send `{"command": "<query>"}` to the service and receive
//! `{"Data": "<first series as JSON>"}`. Denied, missing or failing queries
//! get `{"Data": ""}`. Only a transport failure ends the loop.

use crate::bus::{BusError, Message, Service};
use crate::query_filter::QueryValidator;
use crate::store::{QueryExecutor, StoreError};
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Request key holding the query text.
pub const COMMAND_KEY: &str = "command";

/// Reply key holding the result.
pub const DATA_KEY: &str = "Data";

/// Query service errors.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Service receive failed: {0}")]
    Receive(#[from] BusError),
}

#[derive(Debug, Error)]
enum Rejection {
    #[error("no data")]
    NoData,

    #[error("please send a valid query")]
    Invalid,

    #[error("please send a valid query ({0})")]
    Store(#[from] StoreError),
}

/// Answers queries received on a bus service.
pub struct QueryService {
    service: Arc<dyn Service>,
    validator: Arc<QueryValidator>,
    executor: Arc<dyn QueryExecutor>,
}

impl QueryService {
    pub fn new(
        service: Arc<dyn Service>,
        validator: Arc<QueryValidator>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            service,
            validator,
            executor,
        }
    }

    /// Serve requests until `cancel` fires or the transport fails.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueryError> {
        tracing::info!("Query service {} ready", self.service.name());

        loop {
            let request = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                request = self.service.receive_request() => request,
            };

            let request = match request {
                Ok(request) => request,
                Err(e) => {
                    if cancel.is_cancelled() {
                        break;
                    }
                    tracing::error!("Query service {} receive failed: {}", self.service.name(), e);
                    return Err(e.into());
                }
            };

            let reply = self.answer(&request.data).await;
            if let Err(e) = request.respond(reply) {
                tracing::warn!("Cannot send query reply: {}", e);
            }
        }

        tracing::info!("Query service {} stopped", self.service.name());
        Ok(())
    }

    /// Build the reply for one request.
    pub async fn answer(&self, request: &Message) -> Message {
        let data = match self.execute(request).await {
            Ok(text) => text,
            Err(Rejection::NoData) => {
                tracing::debug!("no data");
                String::new()
            }
            Err(e) => {
                tracing::warn!("{}", e);
                String::new()
            }
        };

        let mut reply = Message::new();
        reply.insert(DATA_KEY.to_string(), Value::String(data));
        reply
    }

    async fn execute(&self, request: &Message) -> Result<String, Rejection> {
        let command = request
            .get(COMMAND_KEY)
            .and_then(Value::as_str)
            .ok_or(Rejection::Invalid)?;

        if !self.validator.classify(command).is_allowed() {
            tracing::debug!("Query denied: {}", command);
            return Err(Rejection::Invalid);
        }

        let series = self.executor.query(command).await?;
        let first = series.first().ok_or(Rejection::NoData)?;
        serde_json::to_string(first).map_err(|_| Rejection::Invalid)
    }
}

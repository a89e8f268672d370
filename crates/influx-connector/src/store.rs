// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Time-series store interface.
//!
//! The connector only needs two operations from the store: write one point
//! and run one query. [`crate::influx::InfluxHttpStore`] talks to InfluxDB
//! over HTTP; [`MemoryStore`] keeps everything in memory.

use crate::line_protocol::{LineProtocolError, Point};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Invalid store response: {0}")]
    InvalidResponse(String),

    #[error("Line protocol error: {0}")]
    LineProtocol(#[from] LineProtocolError),
}

/// One result series, in the InfluxDB 1.x JSON layout.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Series {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tags: BTreeMap<String, String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<Vec<Value>>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub partial: bool,
}

/// Writes points to the store.
#[async_trait]
pub trait PointWriter: Send + Sync {
    /// Write one point stamped with the current time.
    async fn write_point(&self, point: &Point) -> Result<(), StoreError>;
}

/// Runs read queries against the configured database.
#[async_trait]
pub trait QueryExecutor: Send + Sync {
    /// Execute `command` with second precision timestamps and return the
    /// series of the first statement.
    async fn query(&self, command: &str) -> Result<Vec<Series>, StoreError>;
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// In-memory store.
///
/// Keeps every written point, answers queries from a fixed table and can be
/// switched to an unavailable state.
#[derive(Default)]
pub struct MemoryStore {
    points: Mutex<Vec<Point>>,
    queries: Mutex<Vec<String>>,
    responses: Mutex<HashMap<String, Vec<Series>>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer `command` with `series`.
    pub fn set_response(&self, command: &str, series: Vec<Series>) {
        lock(&self.responses).insert(command.to_string(), series);
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Points written so far.
    pub fn points(&self) -> Vec<Point> {
        lock(&self.points).clone()
    }

    /// Queries executed so far.
    pub fn queries(&self) -> Vec<String> {
        lock(&self.queries).clone()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable("memory store offline".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PointWriter for MemoryStore {
    async fn write_point(&self, point: &Point) -> Result<(), StoreError> {
        self.check_available()?;
        if point.fields.is_empty() {
            return Err(LineProtocolError::NoFields(point.measurement.clone()).into());
        }
        lock(&self.points).push(point.clone());
        Ok(())
    }
}

#[async_trait]
impl QueryExecutor for MemoryStore {
    async fn query(&self, command: &str) -> Result<Vec<Series>, StoreError> {
        self.check_available()?;
        lock(&self.queries).push(command.to_string());
        Ok(lock(&self.responses)
            .get(command)
            .cloned()
            .unwrap_or_default())
    }
}

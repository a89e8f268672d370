// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Subscription push ingestion.
//!
//! InfluxDB pushes every write of a subscribed database to an HTTP
//! endpoint as Line Protocol. The handler acknowledges immediately and
//! queues each line without waiting; when the queue is full the line is
//! dropped. A fixed pool of workers drains the queue into a [`Sink`].
//!
//! ```text
//! POST / --> handler --try_send--> [bounded queue] --> worker x N --> Sink
//! ```

mod server;
mod tls;

pub use server::{push_routes, IngestServer};
pub use tls::{load_server_config, TlsError, TlsFiles};

use crate::config::RuntimeOptions;
use crate::profiling::{self, TS_PUB_QUEUE_EXIT};
use crate::sink::Sink;
use bytes::Bytes;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Ingestion errors.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("Ingest queue full, entry dropped")]
    QueueFull,

    #[error("Ingest queue closed")]
    Closed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] TlsError),

    #[error("Certificate and key are required outside dev mode")]
    TlsRequired,
}

/// Ingestion counters.
#[derive(Debug, Default)]
pub struct IngestStats {
    accepted: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Point-in-time copy of [`IngestStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestStatsSnapshot {
    pub accepted: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
}

impl IngestStats {
    pub fn snapshot(&self) -> IngestStatsSnapshot {
        IngestStatsSnapshot {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Bounded queue between the push handler and the workers.
#[derive(Clone)]
pub struct IngestBuffer {
    tx: mpsc::Sender<Bytes>,
    rx: Arc<Mutex<mpsc::Receiver<Bytes>>>,
    stats: Arc<IngestStats>,
    runtime: RuntimeOptions,
}

impl IngestBuffer {
    /// Create a queue holding at most `capacity` entries.
    pub fn new(capacity: usize, runtime: RuntimeOptions) -> Self {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            stats: Arc::new(IngestStats::default()),
            runtime,
        }
    }

    /// Queue one entry without waiting.
    pub fn enqueue(&self, entry: Bytes) -> Result<(), IngestError> {
        match self.tx.try_send(entry) {
            Ok(()) => {
                self.stats.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                Err(IngestError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(IngestError::Closed),
        }
    }

    /// Counters.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn runtime(&self) -> RuntimeOptions {
        self.runtime
    }

    /// Spawn `workers` tasks draining the queue into `sink` until `cancel`
    /// fires.
    pub fn spawn_workers(
        &self,
        sink: Arc<dyn Sink>,
        workers: usize,
        tracker: &TaskTracker,
        cancel: CancellationToken,
    ) {
        for id in 0..workers {
            let buffer = self.clone();
            let sink = Arc::clone(&sink);
            let cancel = cancel.clone();
            tracker.spawn(async move { buffer.drain(id, sink, cancel).await });
        }
        tracing::info!("Started {} ingest workers", workers);
    }

    async fn drain(self, id: usize, sink: Arc<dyn Sink>, cancel: CancellationToken) {
        tracing::debug!("Ingest worker {} started", id);

        loop {
            let entry = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                entry = async { self.rx.lock().await.recv().await } => match entry {
                    Some(entry) => entry,
                    None => break,
                },
            };

            let entry = if self.runtime.profiling {
                let line = String::from_utf8_lossy(&entry);
                Bytes::from(profiling::stamp_line(
                    &line,
                    &[(TS_PUB_QUEUE_EXIT, profiling::now_millis())],
                ))
            } else {
                entry
            };

            match sink.write(&entry).await {
                Ok(()) => {
                    self.stats.delivered.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => {
                    self.stats.failed.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!("Ingest worker {}: {}", id, e);
                }
            }
        }

        tracing::debug!("Ingest worker {} exited", id);
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! HTTP push endpoint.

use super::tls::{load_server_config, TlsFiles};
use super::{IngestBuffer, IngestError, IngestStatsSnapshot};
use crate::config::{IngestConfig, RuntimeOptions};
use crate::profiling::{self, TS_PUB_ENTRY, TS_PUB_QUEUE_ENTRY, TS_RESPONSE_WRITE};
use crate::sink::Sink;
use axum::{
    body::Bytes,
    extract::{DefaultBodyLimit, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use hyper_util::rt::{TokioExecutor, TokioIo, TokioTimer};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tower_http::trace::TraceLayer;

const ACK_BODY: &str = "Received a POST request\n";
const HSTS: &str = "max-age=1024000; includeSubDomains";

/// Pause after a failed `accept` (e.g. out of file descriptors).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);
const MAX_HEADER_BYTES: usize = 1 << 20;

/// Per-connection limits of the TLS listener.
#[derive(Debug, Clone, Copy)]
struct ConnLimits {
    handshake: Duration,
    header_read: Duration,
}

impl Default for ConnLimits {
    fn default() -> Self {
        Self {
            handshake: Duration::from_secs(60),
            header_read: Duration::from_secs(60),
        }
    }
}

/// Handler state.
pub struct IngestState {
    buffer: IngestBuffer,
}

/// Routes of the push endpoint. Bodies larger than `max_body_bytes` are
/// refused with `413`; 0 lifts the limit.
pub fn push_routes(buffer: IngestBuffer, max_body_bytes: usize) -> Router {
    let body_limit = if max_body_bytes == 0 {
        DefaultBodyLimit::disable()
    } else {
        DefaultBodyLimit::max(max_body_bytes)
    };

    Router::new()
        .route("/", post(handle_push))
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(IngestState { buffer }))
}

/// POST / - queue every line of the body, acknowledge immediately.
async fn handle_push(State(state): State<Arc<IngestState>>, body: Bytes) -> Response {
    let runtime = state.buffer.runtime();
    let received = profiling::now_millis();
    let text = String::from_utf8_lossy(&body);

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let entry = if runtime.profiling {
            let now = profiling::now_millis();
            profiling::stamp_line(
                line,
                &[
                    (TS_PUB_ENTRY, received),
                    (TS_RESPONSE_WRITE, now - received),
                    (TS_PUB_QUEUE_ENTRY, now),
                ],
            )
        } else {
            line.to_string()
        };

        match state.buffer.enqueue(Bytes::from(entry)) {
            Ok(()) => {}
            Err(IngestError::QueueFull) => {
                tracing::debug!("Discarding the point. Stream generation faster than Publish!");
            }
            Err(e) => tracing::warn!("Cannot queue point: {}", e),
        }
    }

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::STRICT_TRANSPORT_SECURITY, HSTS),
        ],
        ACK_BODY,
    )
        .into_response()
}

/// Running push endpoint with its worker pool.
pub struct IngestServer {
    local_addr: SocketAddr,
    buffer: IngestBuffer,
    cancel: CancellationToken,
    tracker: TaskTracker,
}

impl IngestServer {
    /// Bind the endpoint, start `workers` queue workers feeding `sink`, and
    /// start serving.
    ///
    /// TLS is used whenever a certificate is configured. Without one the
    /// endpoint serves plaintext, which is only accepted in development mode.
    pub async fn start(
        config: &IngestConfig,
        runtime: RuntimeOptions,
        sink: Arc<dyn Sink>,
        workers: usize,
    ) -> Result<Self, IngestError> {
        let tls = match (&config.cert, &config.key) {
            (Some(cert), Some(key)) => Some(TlsAcceptor::from(load_server_config(&TlsFiles {
                cert: cert.clone(),
                key: key.clone(),
                ca_cert: config.ca_cert.clone(),
                require_client_cert: config.require_client_cert,
            })?)),
            _ if runtime.dev_mode => None,
            _ => return Err(IngestError::TlsRequired),
        };

        let listener = TcpListener::bind(config.address()).await?;
        let local_addr = listener.local_addr()?;

        let buffer = IngestBuffer::new(config.queue_capacity, runtime);
        let cancel = CancellationToken::new();
        let tracker = TaskTracker::new();
        buffer.spawn_workers(sink, workers, &tracker, cancel.clone());

        let app = push_routes(buffer.clone(), config.max_body_bytes);
        match tls {
            Some(acceptor) => {
                tracing::info!("Ingest endpoint listening on https://{}", local_addr);
                tracker.spawn(serve_tls(
                    listener,
                    acceptor,
                    app,
                    ConnLimits::default(),
                    tracker.clone(),
                    cancel.clone(),
                ));
            }
            None => {
                tracing::warn!(
                    "Ingest endpoint listening on http://{} without TLS (dev mode)",
                    local_addr
                );
                let shutdown = cancel.clone().cancelled_owned();
                tracker.spawn(async move {
                    if let Err(e) = axum::serve(listener, app)
                        .with_graceful_shutdown(shutdown)
                        .await
                    {
                        tracing::error!("Ingest server error: {}", e);
                    }
                });
            }
        }

        Ok(Self {
            local_addr,
            buffer,
            cancel,
            tracker,
        })
    }

    /// Bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Queue counters.
    pub fn stats(&self) -> IngestStatsSnapshot {
        self.buffer.stats()
    }

    /// Stop accepting, stop the workers and wait for every task.
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.tracker.close();
        self.tracker.wait().await;
        tracing::info!("Ingest endpoint stopped");
    }
}

async fn serve_tls(
    listener: TcpListener,
    acceptor: TlsAcceptor,
    app: Router,
    limits: ConnLimits,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    loop {
        let accepted = tokio::select! {
            res = listener.accept() => res,
            _ = cancel.cancelled() => break,
        };
        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::select! {
                    _ = tokio::time::sleep(ACCEPT_BACKOFF) => {}
                    _ = cancel.cancelled() => break,
                }
                continue;
            }
        };

        let acceptor = acceptor.clone();
        let service = TowerToHyperService::new(app.clone());
        let cancel = cancel.clone();
        tracker.spawn(async move {
            let handshake = tokio::time::timeout(limits.handshake, acceptor.accept(stream));
            let stream = tokio::select! {
                res = handshake => match res {
                    Ok(Ok(stream)) => stream,
                    Ok(Err(e)) => {
                        tracing::debug!("TLS handshake with {} failed: {}", peer, e);
                        return;
                    }
                    Err(_) => {
                        tracing::debug!("TLS handshake with {} timed out", peer);
                        return;
                    }
                },
                _ = cancel.cancelled() => return,
            };

            let mut builder = auto::Builder::new(TokioExecutor::new());
            builder
                .http1()
                .timer(TokioTimer::new())
                .header_read_timeout(limits.header_read)
                .max_buf_size(MAX_HEADER_BYTES);
            let conn = builder.serve_connection(TokioIo::new(stream), service);
            tokio::pin!(conn);

            tokio::select! {
                res = conn.as_mut() => {
                    if let Err(e) = res {
                        tracing::debug!("Connection from {} closed: {}", peer, e);
                    }
                }
                _ = cancel.cancelled() => {
                    conn.as_mut().graceful_shutdown();
                    let _ = conn.await;
                }
            }
        });
    }
}

// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus abstraction.
//!
//! The connector only needs topic-addressed publish, subscribe and
//! request/reply. Any transport providing those can be plugged in by
//! implementing [`BusConnector`] and the endpoint traits.
//!
//! # Integration
//!
//! ```ignore
//! impl BusConnector for MyTransport {
//!     async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn BusClient>, BusError> {
//!         // Open a connection described by `config`...
//!     }
//! }
//! ```
//!
//! [`LocalBus`] is an in-process implementation used by tests and by the
//! standalone binary.

pub mod local;

pub use local::LocalBus;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Bus message payload: JSON object keyed by field name.
pub type Message = Map<String, Value>;

/// Transport specific connection settings, opaque to the connector.
pub type BusConfig = Value;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("Bus connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Endpoint closed: {0}")]
    Closed(String),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("No service named {0}")]
    NoService(String),

    #[error("Encoding error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Message received from a subscription.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    /// Topic the message was published on.
    pub topic: String,
    /// Message body.
    pub data: Message,
}

/// Reply channel of a service request.
pub trait ReplySender: Send {
    /// Send the reply. Consumes the sender, a request is answered once.
    fn send(self: Box<Self>, reply: Message) -> Result<(), BusError>;
}

/// A request received by a [`Service`].
pub struct ServiceRequest {
    /// Request body.
    pub data: Message,
    reply: Box<dyn ReplySender>,
}

impl ServiceRequest {
    /// Create a request answered through `reply`.
    pub fn new(data: Message, reply: impl ReplySender + 'static) -> Self {
        Self {
            data,
            reply: Box::new(reply),
        }
    }

    /// Answer the request.
    pub fn respond(self, reply: Message) -> Result<(), BusError> {
        self.reply.send(reply)
    }
}

impl fmt::Debug for ServiceRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRequest")
            .field("data", &self.data)
            .finish_non_exhaustive()
    }
}

/// Opens bus connections.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Open a client connection.
    async fn connect(&self, config: &BusConfig) -> Result<Arc<dyn BusClient>, BusError>;
}

/// One bus connection.
#[async_trait]
pub trait BusClient: Send + Sync {
    /// Create a publisher bound to `topic`.
    async fn publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, BusError>;

    /// Create a subscriber bound to `topic`.
    async fn subscriber(&self, topic: &str) -> Result<Arc<dyn Subscriber>, BusError>;

    /// Register a request/reply service named `name`.
    async fn service(&self, name: &str) -> Result<Arc<dyn Service>, BusError>;

    /// Close the connection.
    async fn close(&self) -> Result<(), BusError>;
}

/// Publishing endpoint.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish one message.
    async fn publish(&self, data: Message) -> Result<(), BusError>;

    /// Topic name.
    fn topic(&self) -> &str;

    /// Close the endpoint.
    async fn close(&self) -> Result<(), BusError>;
}

/// Subscribing endpoint.
///
/// Several tasks may call [`Subscriber::receive`] concurrently; each message
/// is handed to exactly one of them.
#[async_trait]
pub trait Subscriber: Send + Sync {
    /// Wait for the next message.
    async fn receive(&self) -> Result<Envelope, BusError>;

    /// Topic name.
    fn topic(&self) -> &str;

    /// Close the endpoint. Pending and later receives fail with
    /// [`BusError::Closed`].
    async fn close(&self) -> Result<(), BusError>;
}

/// Request/reply service endpoint.
#[async_trait]
pub trait Service: Send + Sync {
    /// Wait for the next request.
    async fn receive_request(&self) -> Result<ServiceRequest, BusError>;

    /// Service name.
    fn name(&self) -> &str;

    /// Close the endpoint.
    async fn close(&self) -> Result<(), BusError>;
}

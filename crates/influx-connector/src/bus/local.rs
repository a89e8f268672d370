// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! In-process bus.
//!
//! Every subscriber endpoint on a topic receives its own copy of each
//! published message. Concurrent receivers sharing one endpoint split the
//! messages between them.

use super::{
    BusClient, BusConfig, BusConnector, BusError, Envelope, Message, Publisher, ReplySender,
    Service, ServiceRequest, Subscriber,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

type SubscriberSlot = (u64, mpsc::UnboundedSender<Envelope>);

#[derive(Default)]
struct Inner {
    subscribers: Mutex<HashMap<String, Vec<SubscriberSlot>>>,
    services: Mutex<HashMap<String, mpsc::UnboundedSender<ServiceRequest>>>,
    refused: Mutex<HashSet<String>>,
    next_id: AtomicU64,
}

/// In-process message bus.
#[derive(Clone, Default)]
pub struct LocalBus {
    inner: Arc<Inner>,
}

impl LocalBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make endpoint creation for `topic` fail with
    /// [`BusError::ConnectionFailed`].
    pub fn refuse_topic(&self, topic: &str) {
        lock(&self.inner.refused).insert(topic.to_string());
    }

    /// Publish directly on the bus. Returns the number of endpoints reached.
    pub fn publish(&self, topic: &str, data: Message) -> usize {
        let mut subscribers = lock(&self.inner.subscribers);
        let Some(slots) = subscribers.get_mut(topic) else {
            return 0;
        };

        slots.retain(|(_, tx)| !tx.is_closed());
        let envelope = Envelope {
            topic: topic.to_string(),
            data,
        };
        slots
            .iter()
            .filter(|(_, tx)| tx.send(envelope.clone()).is_ok())
            .count()
    }

    /// Open a subscriber endpoint without going through a client.
    pub fn subscribe(&self, topic: &str) -> LocalSubscriber {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.inner.subscribers)
            .entry(topic.to_string())
            .or_default()
            .push((id, tx));

        LocalSubscriber {
            id,
            topic: topic.to_string(),
            bus: self.clone(),
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }
    }

    /// Number of open subscriber endpoints on `topic`.
    pub fn subscriber_count(&self, topic: &str) -> usize {
        lock(&self.inner.subscribers)
            .get(topic)
            .map_or(0, |slots| slots.iter().filter(|(_, tx)| !tx.is_closed()).count())
    }

    /// Send a request to the service `name` and wait for its reply.
    pub async fn request(&self, name: &str, data: Message) -> Result<Message, BusError> {
        let tx = lock(&self.inner.services)
            .get(name)
            .cloned()
            .ok_or_else(|| BusError::NoService(name.to_string()))?;

        let (reply_tx, reply_rx) = oneshot::channel();
        tx.send(ServiceRequest::new(data, LocalReply(reply_tx)))
            .map_err(|_| BusError::Closed(name.to_string()))?;

        reply_rx
            .await
            .map_err(|_| BusError::Closed(name.to_string()))
    }

    fn check_topic(&self, topic: &str) -> Result<(), BusError> {
        if lock(&self.inner.refused).contains(topic) {
            return Err(BusError::ConnectionFailed(format!(
                "topic {} refused by bus",
                topic
            )));
        }
        Ok(())
    }

    fn unsubscribe(&self, topic: &str, id: u64) {
        if let Some(slots) = lock(&self.inner.subscribers).get_mut(topic) {
            slots.retain(|(slot_id, _)| *slot_id != id);
        }
    }
}

#[async_trait]
impl BusConnector for LocalBus {
    async fn connect(&self, _config: &BusConfig) -> Result<Arc<dyn BusClient>, BusError> {
        Ok(Arc::new(LocalClient {
            bus: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Client connection to a [`LocalBus`].
pub struct LocalClient {
    bus: LocalBus,
    closed: AtomicBool,
}

impl LocalClient {
    fn ensure_open(&self) -> Result<(), BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::ConnectionFailed("client closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BusClient for LocalClient {
    async fn publisher(&self, topic: &str) -> Result<Arc<dyn Publisher>, BusError> {
        self.ensure_open()?;
        self.bus.check_topic(topic)?;
        Ok(Arc::new(LocalPublisher {
            topic: topic.to_string(),
            bus: self.bus.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    async fn subscriber(&self, topic: &str) -> Result<Arc<dyn Subscriber>, BusError> {
        self.ensure_open()?;
        self.bus.check_topic(topic)?;
        Ok(Arc::new(self.bus.subscribe(topic)))
    }

    async fn service(&self, name: &str) -> Result<Arc<dyn Service>, BusError> {
        self.ensure_open()?;
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut services = lock(&self.bus.inner.services);
            if services.get(name).is_some_and(|tx| !tx.is_closed()) {
                return Err(BusError::ConnectionFailed(format!(
                    "service {} already registered",
                    name
                )));
            }
            services.insert(name.to_string(), tx);
        }

        Ok(Arc::new(LocalService {
            name: name.to_string(),
            bus: self.bus.clone(),
            rx: tokio::sync::Mutex::new(rx),
            closed: CancellationToken::new(),
        }))
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Publisher endpoint of a [`LocalBus`].
pub struct LocalPublisher {
    topic: String,
    bus: LocalBus,
    closed: AtomicBool,
}

#[async_trait]
impl Publisher for LocalPublisher {
    async fn publish(&self, data: Message) -> Result<(), BusError> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(BusError::Closed(self.topic.clone()));
        }
        self.bus.publish(&self.topic, data);
        Ok(())
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// Subscriber endpoint of a [`LocalBus`].
pub struct LocalSubscriber {
    id: u64,
    topic: String,
    bus: LocalBus,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<Envelope>>,
    closed: CancellationToken,
}

#[async_trait]
impl Subscriber for LocalSubscriber {
    async fn receive(&self) -> Result<Envelope, BusError> {
        let closed = || BusError::Closed(self.topic.clone());

        tokio::select! {
            _ = self.closed.cancelled() => Err(closed()),
            envelope = async { self.rx.lock().await.recv().await } => envelope.ok_or_else(closed),
        }
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.cancel();
        self.bus.unsubscribe(&self.topic, self.id);
        Ok(())
    }
}

/// Service endpoint of a [`LocalBus`].
pub struct LocalService {
    name: String,
    bus: LocalBus,
    rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<ServiceRequest>>,
    closed: CancellationToken,
}

#[async_trait]
impl Service for LocalService {
    async fn receive_request(&self) -> Result<ServiceRequest, BusError> {
        let closed = || BusError::Closed(self.name.clone());

        tokio::select! {
            _ = self.closed.cancelled() => Err(closed()),
            request = async { self.rx.lock().await.recv().await } => request.ok_or_else(closed),
        }
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn close(&self) -> Result<(), BusError> {
        self.closed.cancel();
        lock(&self.bus.inner.services).remove(&self.name);
        Ok(())
    }
}

struct LocalReply(oneshot::Sender<Message>);

impl ReplySender for LocalReply {
    fn send(self: Box<Self>, reply: Message) -> Result<(), BusError> {
        self.0
            .send(reply)
            .map_err(|_| BusError::Closed("requester went away".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn msg(value: serde_json::Value) -> Message {
        value.as_object().cloned().unwrap()
    }

    #[tokio::test]
    async fn test_publish_fans_out_to_endpoints() {
        let bus = LocalBus::new();
        let a = bus.subscribe("camera");
        let b = bus.subscribe("camera");

        assert_eq!(bus.publish("camera", msg(json!({"v": 1}))), 2);
        assert_eq!(bus.publish("other", msg(json!({"v": 2}))), 0);

        assert_eq!(a.receive().await.unwrap().data["v"], 1);
        assert_eq!(b.receive().await.unwrap().data["v"], 1);
    }

    #[tokio::test]
    async fn test_shared_endpoint_delivers_once() {
        let bus = LocalBus::new();
        let sub = Arc::new(bus.subscribe("t"));

        for i in 0..10 {
            bus.publish("t", msg(json!({ "i": i })));
        }

        let mut handles = Vec::new();
        for _ in 0..3 {
            let sub = Arc::clone(&sub);
            handles.push(tokio::spawn(async move {
                let mut seen = Vec::new();
                while let Ok(Ok(env)) =
                    tokio::time::timeout(Duration::from_millis(50), sub.receive()).await
                {
                    seen.push(env.data["i"].as_i64().unwrap());
                }
                seen
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort();
        assert_eq!(all, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_close_wakes_pending_receive() {
        let bus = LocalBus::new();
        let sub = Arc::new(bus.subscribe("t"));

        let waiting = {
            let sub = Arc::clone(&sub);
            tokio::spawn(async move { sub.receive().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        sub.close().await.unwrap();

        let result = waiting.await.unwrap();
        assert!(matches!(result, Err(BusError::Closed(_))));
        assert_eq!(bus.subscriber_count("t"), 0);
    }

    #[tokio::test]
    async fn test_refused_topic_and_closed_client() {
        let bus = LocalBus::new();
        bus.refuse_topic("bad");
        let client = bus.connect(&serde_json::Value::Null).await.unwrap();

        assert!(matches!(
            client.publisher("bad").await,
            Err(BusError::ConnectionFailed(_))
        ));
        assert!(client.publisher("good").await.is_ok());

        client.close().await.unwrap();
        assert!(client.subscriber("good").await.is_err());
    }

    #[tokio::test]
    async fn test_publisher_closed() {
        let bus = LocalBus::new();
        let client = bus.connect(&serde_json::Value::Null).await.unwrap();
        let publisher = client.publisher("t").await.unwrap();
        let sub = bus.subscribe("t");

        publisher.publish(msg(json!({"a": 1}))).await.unwrap();
        assert_eq!(sub.receive().await.unwrap().topic, "t");

        publisher.close().await.unwrap();
        assert!(publisher.publish(msg(json!({"a": 2}))).await.is_err());
    }

    #[tokio::test]
    async fn test_request_reply() {
        let bus = LocalBus::new();
        let client = bus.connect(&serde_json::Value::Null).await.unwrap();
        let service = client.service("echo").await.unwrap();

        let server = tokio::spawn(async move {
            let request = service.receive_request().await.unwrap();
            let reply = request.data.clone();
            request.respond(reply).unwrap();
        });

        let reply = bus.request("echo", msg(json!({"x": "y"}))).await.unwrap();
        assert_eq!(reply["x"], "y");
        server.await.unwrap();

        assert!(matches!(
            bus.request("missing", Message::new()).await,
            Err(BusError::NoService(_))
        ));
    }
}

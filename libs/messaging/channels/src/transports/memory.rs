//! In-process `memory` transport
//!
//! A broker with one delivery thread standing in for a middleware event loop.
//! Publishers hand envelopes to the delivery thread, which invokes every
//! subscriber callback for the topic in publish order. Services queue requests
//! in a bounded per-service queue and answer them from `spin_once`.

use crate::error::TransportError;
use crate::runtime::Activator;
use crate::transport::{
    ClientLink, DeliveryFn, Envelope, Middleware, PublisherLink, RequestHandler, ServiceLink,
    SubscriberLink,
};
use bytes::Bytes;
use config::TransportOptions;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const TRANSPORT_NAME: &str = "memory";

/// Envelopes waiting for the delivery thread
const DEFAULT_DELIVERY_CAPACITY: usize = 1024;

struct Delivery {
    topic: String,
    body: Bytes,
}

struct PendingRequest {
    body: Bytes,
    reply: Sender<Result<Bytes, TransportError>>,
}

struct BrokerInner {
    topics: RwLock<HashMap<String, HashMap<Uuid, DeliveryFn>>>,
    services: RwLock<HashMap<String, Sender<PendingRequest>>>,
    deliveries: Mutex<Option<Sender<Delivery>>>,
    service_capacity: usize,
    closed: AtomicBool,
}

impl BrokerInner {
    fn subscriber_count(&self, topic: &str) -> usize {
        self.topics.read().get(topic).map_or(0, HashMap::len)
    }

    fn subscribers(&self, topic: &str) -> Vec<DeliveryFn> {
        self.topics
            .read()
            .get(topic)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

/// In-process broker implementing [`Middleware`]
pub struct MemoryBroker {
    name: String,
    inner: Arc<BrokerInner>,
}

impl std::fmt::Debug for MemoryBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBroker")
            .field("name", &self.name)
            .field("topics", &self.inner.topics.read().len())
            .field("services", &self.inner.services.read().len())
            .finish()
    }
}

impl MemoryBroker {
    pub fn new(name: impl Into<String>) -> Result<Self, TransportError> {
        Self::with_capacity(
            name,
            DEFAULT_DELIVERY_CAPACITY,
            config::defaults::SERVICE_QUEUE_SIZE,
        )
    }

    pub fn with_capacity(
        name: impl Into<String>,
        delivery_capacity: usize,
        service_capacity: usize,
    ) -> Result<Self, TransportError> {
        let name = name.into();
        let (tx, rx) = bounded::<Delivery>(delivery_capacity.max(1));
        let inner = Arc::new(BrokerInner {
            topics: RwLock::new(HashMap::new()),
            services: RwLock::new(HashMap::new()),
            deliveries: Mutex::new(Some(tx)),
            service_capacity: service_capacity.max(1),
            closed: AtomicBool::new(false),
        });

        let weak = Arc::downgrade(&inner);
        thread::Builder::new()
            .name(format!("{}-delivery", name))
            .spawn(move || {
                for delivery in rx.iter() {
                    let Some(inner) = weak.upgrade() else { break };
                    for deliver in inner.subscribers(&delivery.topic) {
                        deliver(delivery.body.clone());
                    }
                }
                debug!("Delivery thread exiting");
            })
            .map_err(|e| TransportError::backend(format!("failed to spawn delivery thread: {}", e)))?;

        Ok(Self { name, inner })
    }

    /// Subscribers currently attached to a topic
    pub fn subscriber_count(&self, topic: &str) -> usize {
        self.inner.subscriber_count(topic)
    }

    pub fn is_advertised(&self, service: &str) -> bool {
        self.inner.services.read().contains_key(service)
    }
}

impl Middleware for MemoryBroker {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_publisher(&self, topic: &str) -> Result<Box<dyn PublisherLink>, TransportError> {
        if self.inner.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(MemoryPublisher {
            topic: topic.to_string(),
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn open_subscriber(
        &self,
        topic: &str,
        deliver: DeliveryFn,
    ) -> Result<Box<dyn SubscriberLink>, TransportError> {
        if self.inner.is_closed() {
            return Err(TransportError::Closed);
        }
        let id = Uuid::new_v4();
        self.inner
            .topics
            .write()
            .entry(topic.to_string())
            .or_default()
            .insert(id, deliver);
        debug!("Subscriber {} attached to '{}'", id, topic);
        Ok(Box::new(MemorySubscriber {
            topic: topic.to_string(),
            id,
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn advertise_service(&self, service: &str) -> Result<Box<dyn ServiceLink>, TransportError> {
        if self.inner.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut services = self.inner.services.write();
        if services.contains_key(service) {
            return Err(TransportError::rejected(format!(
                "service '{}' is already advertised",
                service
            )));
        }
        let (tx, rx) = bounded(self.inner.service_capacity);
        services.insert(service.to_string(), tx);
        info!("Service '{}' advertised", service);
        Ok(Box::new(MemoryService {
            service: service.to_string(),
            requests: rx,
            inner: self.inner.clone(),
            closed: AtomicBool::new(false),
        }))
    }

    fn open_client(&self, service: &str) -> Result<Box<dyn ClientLink>, TransportError> {
        if self.inner.is_closed() {
            return Err(TransportError::Closed);
        }
        Ok(Box::new(MemoryClient {
            service: service.to_string(),
            inner: self.inner.clone(),
        }))
    }

    fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.deliveries.lock().take();
        self.inner.topics.write().clear();
        self.inner.services.write().clear();
        info!("Broker '{}' shut down", self.name);
    }
}

impl Drop for MemoryBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct MemoryPublisher {
    topic: String,
    inner: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl PublisherLink for MemoryPublisher {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire)
            && !self.inner.is_closed()
            && self.inner.subscriber_count(&self.topic) > 0
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let sender = self
            .inner
            .deliveries
            .lock()
            .clone()
            .ok_or(TransportError::Closed)?;
        let topic = String::from_utf8_lossy(&envelope.topic).into_owned();
        sender
            .send(Delivery {
                topic,
                body: envelope.body,
            })
            .map_err(|_| TransportError::Closed)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

struct MemorySubscriber {
    topic: String,
    id: Uuid,
    inner: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl SubscriberLink for MemorySubscriber {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.inner.is_closed()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut topics = self.inner.topics.write();
        if let Some(subs) = topics.get_mut(&self.topic) {
            subs.remove(&self.id);
            if subs.is_empty() {
                topics.remove(&self.topic);
            }
        }
        debug!("Subscriber {} detached from '{}'", self.id, self.topic);
    }
}

impl Drop for MemorySubscriber {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryService {
    service: String,
    requests: Receiver<PendingRequest>,
    inner: Arc<BrokerInner>,
    closed: AtomicBool,
}

impl ServiceLink for MemoryService {
    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.inner.is_closed()
    }

    fn spin_once(
        &self,
        handler: RequestHandler<'_>,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        match self.requests.recv_timeout(timeout) {
            Ok(request) => {
                let reply = handler(request.body);
                if request.reply.send(reply).is_err() {
                    warn!("Client of '{}' left before its reply was sent", self.service);
                }
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.inner.services.write().remove(&self.service);
        debug!("Service '{}' withdrawn", self.service);
    }
}

impl Drop for MemoryService {
    fn drop(&mut self) {
        self.close();
    }
}

struct MemoryClient {
    service: String,
    inner: Arc<BrokerInner>,
}

impl ClientLink for MemoryClient {
    fn is_connected(&self) -> bool {
        !self.inner.is_closed() && self.inner.services.read().contains_key(&self.service)
    }

    fn call(&self, body: Bytes) -> Result<Bytes, TransportError> {
        let requests = self
            .inner
            .services
            .read()
            .get(&self.service)
            .cloned()
            .ok_or_else(|| {
                TransportError::not_connected(format!("service '{}' is not advertised", self.service))
            })?;

        let (reply_tx, reply_rx) = bounded(1);
        requests
            .send(PendingRequest {
                body,
                reply: reply_tx,
            })
            .map_err(|_| TransportError::Closed)?;
        drop(requests);

        reply_rx.recv().map_err(|_| TransportError::Closed)?
    }

    fn close(&self) {}
}

/// Activator for [`MemoryBroker`]
///
/// Recognised options: `delivery_capacity`, `service_queue_size`.
#[derive(Debug, Clone)]
pub struct MemoryActivator {
    transport: String,
}

impl Default for MemoryActivator {
    fn default() -> Self {
        Self::named(TRANSPORT_NAME)
    }
}

impl MemoryActivator {
    /// Activator serving the broker under another transport name
    pub fn named(transport: impl Into<String>) -> Self {
        Self {
            transport: transport.into(),
        }
    }
}

fn usize_option(options: &TransportOptions, key: &str, default: usize) -> usize {
    options
        .get(key)
        .and_then(serde_json::Value::as_u64)
        .map(|value| value as usize)
        .unwrap_or(default)
}

impl Activator for MemoryActivator {
    fn transport(&self) -> &str {
        &self.transport
    }

    fn activate(&self, options: &TransportOptions) -> Result<Arc<dyn Middleware>, TransportError> {
        let broker = MemoryBroker::with_capacity(
            self.transport.clone(),
            usize_option(options, "delivery_capacity", DEFAULT_DELIVERY_CAPACITY),
            usize_option(
                options,
                "service_queue_size",
                config::defaults::SERVICE_QUEUE_SIZE,
            ),
        )?;
        Ok(Arc::new(broker))
    }

    fn deactivate(&self, middleware: &Arc<dyn Middleware>) {
        middleware.shutdown();
    }
}

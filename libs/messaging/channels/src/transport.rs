//! Transport collaborator contract
//!
//! Backends only move opaque bytes and answer "am I connected". Encoding,
//! establishment policy and queueing live in the channels built on top.

use crate::error::TransportError;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

/// Encoded unit exchanged over a topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub topic: Bytes,
    pub body: Bytes,
}

impl Envelope {
    pub fn new(topic: impl Into<Bytes>, body: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            body: body.into(),
        }
    }
}

/// Called by the backend on its own delivery thread for every inbound body
///
/// Must not block: the delivery thread is shared by every subscriber.
pub type DeliveryFn = Arc<dyn Fn(Bytes) + Send + Sync>;

/// Handles one request body and produces the reply body
pub type RequestHandler<'a> = &'a mut dyn FnMut(Bytes) -> Result<Bytes, TransportError>;

/// An activated middleware instance
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str;

    fn open_publisher(&self, topic: &str) -> Result<Box<dyn PublisherLink>, TransportError>;

    fn open_subscriber(
        &self,
        topic: &str,
        deliver: DeliveryFn,
    ) -> Result<Box<dyn SubscriberLink>, TransportError>;

    fn advertise_service(&self, service: &str) -> Result<Box<dyn ServiceLink>, TransportError>;

    fn open_client(&self, service: &str) -> Result<Box<dyn ClientLink>, TransportError>;

    /// Release backend resources; links opened earlier report disconnected
    fn shutdown(&self) {}
}

pub trait PublisherLink: Send + Sync {
    /// Probe used by establishment
    fn is_connected(&self) -> bool;

    fn send(&self, envelope: Envelope) -> Result<(), TransportError>;

    fn close(&self);
}

pub trait SubscriberLink: Send + Sync {
    fn is_connected(&self) -> bool;

    fn close(&self);
}

/// Receive side of a request/reply service
///
/// The backend invokes the handler from inside `spin_once` and sends whatever
/// it returns as the reply, so the handler runs on the thread pumping the link.
pub trait ServiceLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Serve at most one request, waiting up to `timeout` for it
    ///
    /// Returns `Ok(true)` when a request was handled.
    fn spin_once(
        &self,
        handler: RequestHandler<'_>,
        timeout: Duration,
    ) -> Result<bool, TransportError>;

    fn close(&self);
}

pub trait ClientLink: Send + Sync {
    fn is_connected(&self) -> bool;

    /// Send a request body and block for the reply body
    fn call(&self, body: Bytes) -> Result<Bytes, TransportError>;

    fn close(&self);
}

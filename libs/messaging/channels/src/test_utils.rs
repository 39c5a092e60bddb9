//! Test doubles for probes and transports

use crate::error::TransportError;
use crate::transport::{
    ClientLink, DeliveryFn, Envelope, Middleware, PublisherLink, RequestHandler, ServiceLink,
    SubscriberLink,
};
use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Probe that fails until its Nth call
#[derive(Debug, Clone)]
pub struct ScriptedProbe {
    succeed_on: Option<u32>,
    calls: Arc<AtomicU32>,
}

impl ScriptedProbe {
    /// Fails `n - 1` times, then succeeds on every call from the `n`th on
    pub fn succeed_on(n: u32) -> Self {
        Self {
            succeed_on: Some(n.max(1)),
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn always() -> Self {
        Self::succeed_on(1)
    }

    pub fn never() -> Self {
        Self {
            succeed_on: None,
            calls: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn probe(&self) -> bool {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.succeed_on.map_or(false, |n| call >= n)
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn as_fn(&self) -> impl FnMut() -> bool + '_ {
        move || self.probe()
    }
}

type RawRequest = (Bytes, Sender<Result<Bytes, TransportError>>);

#[derive(Default)]
struct FlakyState {
    subscribers: Mutex<HashMap<String, Vec<DeliveryFn>>>,
    services: Mutex<HashMap<String, Sender<RawRequest>>>,
    sent: Mutex<Vec<Envelope>>,
    unreachable: AtomicBool,
    fail_open: AtomicBool,
    publishers_opened: AtomicUsize,
}

impl FlakyState {
    fn reachable(&self) -> bool {
        !self.unreachable.load(Ordering::SeqCst)
    }

    fn check_open(&self) -> Result<(), TransportError> {
        if self.fail_open.load(Ordering::SeqCst) {
            Err(TransportError::backend("scripted open failure"))
        } else {
            Ok(())
        }
    }
}

/// Transport whose reachability is switched by the test
///
/// Every link probes as connected only while the middleware is reachable.
/// Sent envelopes are recorded rather than delivered; tests feed listeners
/// with [`FlakyMiddleware::deliver`] and servers with [`FlakyMiddleware::request`].
#[derive(Clone)]
pub struct FlakyMiddleware {
    name: String,
    state: Arc<FlakyState>,
}

impl FlakyMiddleware {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: Arc::new(FlakyState::default()),
        }
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Make every `open_*`/`advertise_*` call fail with a backend error
    pub fn fail_open(&self, fail: bool) {
        self.state.fail_open.store(fail, Ordering::SeqCst);
    }

    /// Envelopes sent by publishers so far
    pub fn sent(&self) -> Vec<Envelope> {
        self.state.sent.lock().clone()
    }

    pub fn publishers_opened(&self) -> usize {
        self.state.publishers_opened.load(Ordering::SeqCst)
    }

    /// Invoke every subscriber callback of a topic with a raw body
    pub fn deliver(&self, topic: &str, body: impl Into<Bytes>) {
        let body = body.into();
        let subscribers = self
            .state
            .subscribers
            .lock()
            .get(topic)
            .cloned()
            .unwrap_or_default();
        for deliver in subscribers {
            deliver(body.clone());
        }
    }

    /// Queue a raw request body for a service; the receiver yields the reply
    pub fn request(
        &self,
        service: &str,
        body: impl Into<Bytes>,
    ) -> Result<Receiver<Result<Bytes, TransportError>>, TransportError> {
        let requests = self
            .state
            .services
            .lock()
            .get(service)
            .cloned()
            .ok_or_else(|| TransportError::not_connected(service.to_string()))?;
        let (tx, rx) = bounded(1);
        requests
            .send((body.into(), tx))
            .map_err(|_| TransportError::Closed)?;
        Ok(rx)
    }
}

impl Middleware for FlakyMiddleware {
    fn name(&self) -> &str {
        &self.name
    }

    fn open_publisher(&self, _topic: &str) -> Result<Box<dyn PublisherLink>, TransportError> {
        self.state.check_open()?;
        self.state.publishers_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FlakyLink {
            state: self.state.clone(),
        }))
    }

    fn open_subscriber(
        &self,
        topic: &str,
        deliver: DeliveryFn,
    ) -> Result<Box<dyn SubscriberLink>, TransportError> {
        self.state.check_open()?;
        self.state
            .subscribers
            .lock()
            .entry(topic.to_string())
            .or_default()
            .push(deliver);
        Ok(Box::new(FlakyLink {
            state: self.state.clone(),
        }))
    }

    fn advertise_service(&self, service: &str) -> Result<Box<dyn ServiceLink>, TransportError> {
        self.state.check_open()?;
        let (tx, rx) = bounded(1);
        self.state.services.lock().insert(service.to_string(), tx);
        Ok(Box::new(FlakyService {
            state: self.state.clone(),
            requests: rx,
        }))
    }

    fn open_client(&self, service: &str) -> Result<Box<dyn ClientLink>, TransportError> {
        self.state.check_open()?;
        Ok(Box::new(FlakyClient {
            middleware: self.clone(),
            service: service.to_string(),
        }))
    }
}

struct FlakyLink {
    state: Arc<FlakyState>,
}

impl PublisherLink for FlakyLink {
    fn is_connected(&self) -> bool {
        self.state.reachable()
    }

    fn send(&self, envelope: Envelope) -> Result<(), TransportError> {
        if !self.state.reachable() {
            return Err(TransportError::not_connected("flaky transport unreachable"));
        }
        self.state.sent.lock().push(envelope);
        Ok(())
    }

    fn close(&self) {}
}

impl SubscriberLink for FlakyLink {
    fn is_connected(&self) -> bool {
        self.state.reachable()
    }

    fn close(&self) {}
}

struct FlakyService {
    state: Arc<FlakyState>,
    requests: Receiver<RawRequest>,
}

impl ServiceLink for FlakyService {
    fn is_connected(&self) -> bool {
        self.state.reachable()
    }

    fn spin_once(
        &self,
        handler: RequestHandler<'_>,
        timeout: Duration,
    ) -> Result<bool, TransportError> {
        match self.requests.recv_timeout(timeout) {
            Ok((body, reply)) => {
                let _ = reply.send(handler(body));
                Ok(true)
            }
            Err(RecvTimeoutError::Timeout) => Ok(false),
            Err(RecvTimeoutError::Disconnected) => Err(TransportError::Closed),
        }
    }

    fn close(&self) {}
}

struct FlakyClient {
    middleware: FlakyMiddleware,
    service: String,
}

impl ClientLink for FlakyClient {
    fn is_connected(&self) -> bool {
        self.middleware.state.reachable()
            && self.middleware.state.services.lock().contains_key(&self.service)
    }

    fn call(&self, body: Bytes) -> Result<Bytes, TransportError> {
        let reply = self.middleware.request(&self.service, body)?;
        reply.recv().map_err(|_| TransportError::Closed)?
    }

    fn close(&self) {}
}

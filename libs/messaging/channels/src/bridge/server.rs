use super::handoff::{Handoff, Offer};
use super::{RequestArgs, Server};
use crate::descriptor::ChannelDescriptor;
use crate::error::{ChannelError, TransportError};
use crate::establish::Establisher;
use crate::link::{Connection, ConnectionState, Establish};
use crate::registry::ChannelContext;
use crate::transport::{Middleware, ServiceLink};
use bytes::Bytes;
use codec::{Codec, Value};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Request/reply server bridging a callback-driven service to blocking calls
///
/// A pump thread drives the transport's service link. When a request arrives
/// the transport callback parks it in the single-slot `inbound` queue and then
/// blocks until [`Server::reply`] fills the single-slot `outbound` queue.
pub struct BridgeServer {
    endpoint: Arc<ServerEndpoint>,
}

struct ServerEndpoint {
    descriptor: ChannelDescriptor,
    middleware: Arc<dyn Middleware>,
    codec: Arc<Codec>,
    establisher: Establisher,
    connection: Connection<dyn ServiceLink>,
    handoff: Arc<Handoff>,
    pending: AtomicBool,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    pump: Mutex<Option<JoinHandle<()>>>,
}

impl BridgeServer {
    pub fn new(context: ChannelContext) -> Self {
        let ChannelContext {
            descriptor,
            middleware,
            codec,
            establisher,
            watchdog,
        } = context;

        let (shutdown_tx, shutdown_rx) = bounded(0);
        let endpoint = Arc::new(ServerEndpoint {
            descriptor,
            middleware,
            codec,
            establisher,
            connection: Connection::new(),
            handoff: Arc::new(Handoff::new()),
            pending: AtomicBool::new(false),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            pump: Mutex::new(None),
        });

        if !endpoint.descriptor.should_wait() {
            let weak: Weak<dyn Establish> = Arc::downgrade(&endpoint) as Weak<dyn Establish>;
            watchdog.register(weak);
        }
        debug!("Server created for {}", endpoint.descriptor);

        Self { endpoint }
    }

    /// Whether a request has been handed out and not yet replied to
    pub fn has_pending_request(&self) -> bool {
        self.endpoint.pending.load(Ordering::Acquire)
    }

    pub fn is_pumping(&self) -> bool {
        self.endpoint.pump.lock().is_some()
    }
}

impl ServerEndpoint {
    fn ensure_pump(&self, link: Arc<dyn ServiceLink>) -> Result<(), ChannelError> {
        let mut pump = self.pump.lock();
        if pump.is_some() {
            return Ok(());
        }

        let handoff = self.handoff.clone();
        let shutdown = self.shutdown_rx.clone();
        let name = self.name().to_string();
        let handle = thread::Builder::new()
            .name(format!("conduit-pump{}", name.replace('/', "-")))
            .spawn(move || run_pump(link, handoff, shutdown, name))
            .map_err(|e| TransportError::backend(format!("failed to spawn pump thread: {}", e)))?;
        *pump = Some(handle);
        debug!("Pump started for server '{}'", self.name());
        Ok(())
    }

    fn await_request(&self) -> Result<Option<RequestArgs>, ChannelError> {
        if self.connection.is_closed() {
            return Err(ChannelError::closed(self.name()));
        }
        if self.pending.load(Ordering::Acquire) {
            return Err(ChannelError::RequestOutstanding {
                channel: self.name().to_string(),
            });
        }
        if !self.establish(None)? {
            return Ok(None);
        }

        let link = self.connection.link().ok_or_else(|| ChannelError::NotEstablished {
            channel: self.name().to_string(),
        })?;
        self.ensure_pump(link)?;

        let body = match self
            .handoff
            .take_request(self.descriptor.should_wait(), &self.shutdown_rx)
        {
            Ok(Some(body)) => body,
            Ok(None) => return Ok(None),
            Err(_) => return Err(ChannelError::closed(self.name())),
        };
        self.pending.store(true, Ordering::Release);

        match self.decode(&body) {
            Ok(args) => Ok(Some(args)),
            Err(e) => {
                warn!("Server '{}' could not decode request: {}", self.name(), e);
                Ok(Some(RequestArgs::default()))
            }
        }
    }

    fn decode(&self, body: &[u8]) -> Result<RequestArgs, ChannelError> {
        let value = self.codec.decode(body)?;
        RequestArgs::from_value(value)
    }

    fn reply(&self, value: &Value) -> Result<(), ChannelError> {
        if self.connection.is_closed() {
            return Err(ChannelError::closed(self.name()));
        }
        if !self.pending.swap(false, Ordering::AcqRel) {
            return Err(ChannelError::NoPendingRequest {
                channel: self.name().to_string(),
            });
        }

        let body = match self.codec.encode(value) {
            Ok(body) => Bytes::from(body),
            Err(e) => {
                // still owed a reply
                self.pending.store(true, Ordering::Release);
                return Err(e.into());
            }
        };

        match self.handoff.offer_reply(body) {
            Ok(Offer::Accepted) => Ok(()),
            Ok(Offer::SlotFull) => {
                warn!(
                    "Server '{}' reply slot occupied, dropped newest reply",
                    self.name()
                );
                Err(ChannelError::CapacityExceeded {
                    channel: self.name().to_string(),
                    slot: "outbound",
                })
            }
            Err(_) => Err(ChannelError::closed(self.name())),
        }
    }

    fn close(&self) {
        let Some(link) = self.connection.close() else {
            return;
        };
        self.shutdown_tx.lock().take();
        if let Some(link) = link {
            link.close();
        }
        if let Some(pump) = self.pump.lock().take() {
            if pump.join().is_err() {
                warn!("Pump thread of '{}' panicked", self.name());
            }
        }
        self.pending.store(false, Ordering::Release);
        debug!("Server '{}' closed", self.name());
    }
}

fn run_pump(
    link: Arc<dyn ServiceLink>,
    handoff: Arc<Handoff>,
    shutdown: Receiver<()>,
    name: String,
) {
    let poll = config::defaults::PUMP_POLL_TIMEOUT;
    let mut handler = |request: Bytes| handoff.exchange(request, &shutdown);

    loop {
        if matches!(shutdown.try_recv(), Err(TryRecvError::Disconnected)) {
            break;
        }
        match link.spin_once(&mut handler, poll) {
            Ok(_) => {}
            Err(TransportError::Closed) => {
                debug!("Service link of '{}' closed", name);
                break;
            }
            Err(e) => {
                warn!("Pump for '{}' failed to spin: {}", name, e);
                thread::sleep(poll);
            }
        }
    }
    debug!("Pump for '{}' stopped", name);
}

impl Establish for ServerEndpoint {
    fn name(&self) -> &str {
        self.descriptor.endpoint()
    }

    fn is_established(&self) -> bool {
        self.connection.is_established()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.connection.establish(
            "Server",
            &self.descriptor,
            &self.establisher,
            repeats,
            || self.middleware.advertise_service(self.descriptor.endpoint()),
            |link| link.is_connected(),
        )
    }
}

impl Server for BridgeServer {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.endpoint.descriptor
    }

    fn state(&self) -> ConnectionState {
        self.endpoint.connection.state()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.endpoint.establish(repeats)
    }

    fn await_request(&self) -> Result<Option<RequestArgs>, ChannelError> {
        self.endpoint.await_request()
    }

    fn reply(&self, value: &Value) -> Result<(), ChannelError> {
        self.endpoint.reply(value)
    }

    fn close(&self) {
        self.endpoint.close();
    }
}

impl Drop for BridgeServer {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

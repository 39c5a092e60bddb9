use super::{Client, RequestArgs};
use crate::descriptor::ChannelDescriptor;
use crate::error::ChannelError;
use crate::establish::Establisher;
use crate::link::{Connection, ConnectionState, Establish};
use crate::registry::ChannelContext;
use crate::transport::{ClientLink, Middleware};
use bytes::Bytes;
use codec::{Codec, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Request/reply client over a transport service call
pub struct BridgeClient {
    endpoint: Arc<ClientEndpoint>,
}

struct ClientEndpoint {
    descriptor: ChannelDescriptor,
    middleware: Arc<dyn Middleware>,
    codec: Arc<Codec>,
    establisher: Establisher,
    connection: Connection<dyn ClientLink>,
    calls: AtomicU64,
}

impl BridgeClient {
    pub fn new(context: ChannelContext) -> Self {
        let ChannelContext {
            descriptor,
            middleware,
            codec,
            establisher,
            watchdog,
        } = context;

        let endpoint = Arc::new(ClientEndpoint {
            descriptor,
            middleware,
            codec,
            establisher,
            connection: Connection::new(),
            calls: AtomicU64::new(0),
        });

        if !endpoint.descriptor.should_wait() {
            let weak: Weak<dyn Establish> = Arc::downgrade(&endpoint) as Weak<dyn Establish>;
            watchdog.register(weak);
        }
        debug!("Client created for {}", endpoint.descriptor);

        Self { endpoint }
    }

    /// Calls that received a reply
    pub fn calls(&self) -> u64 {
        self.endpoint.calls.load(Ordering::Relaxed)
    }
}

impl ClientEndpoint {
    fn request(&self, args: RequestArgs) -> Result<Option<Value>, ChannelError> {
        if self.connection.is_closed() {
            return Err(ChannelError::closed(self.name()));
        }
        if !self.establish(None)? {
            return Ok(None);
        }

        let link = self.connection.link().ok_or_else(|| ChannelError::NotEstablished {
            channel: self.name().to_string(),
        })?;
        let body = Bytes::from(self.codec.encode(&args.into_value())?);

        // the link lock is not held across the call so close() can proceed
        let reply = link.call(body)?;
        self.calls.fetch_add(1, Ordering::Relaxed);

        match self.codec.decode(&reply) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                warn!("Client '{}' could not decode reply: {}", self.name(), e);
                Ok(None)
            }
        }
    }

    fn close(&self) {
        let Some(link) = self.connection.close() else {
            return;
        };
        if let Some(link) = link {
            link.close();
        }
        debug!("Client '{}' closed", self.name());
    }
}

impl Establish for ClientEndpoint {
    fn name(&self) -> &str {
        self.descriptor.endpoint()
    }

    fn is_established(&self) -> bool {
        self.connection.is_established()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.connection.establish(
            "Client",
            &self.descriptor,
            &self.establisher,
            repeats,
            || self.middleware.open_client(self.descriptor.endpoint()),
            |link| link.is_connected(),
        )
    }
}

impl Client for BridgeClient {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.endpoint.descriptor
    }

    fn state(&self) -> ConnectionState {
        self.endpoint.connection.state()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.endpoint.establish(repeats)
    }

    fn request(&self, args: RequestArgs) -> Result<Option<Value>, ChannelError> {
        self.endpoint.request(args)
    }

    fn close(&self) {
        self.endpoint.close();
    }
}

impl Drop for BridgeClient {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

//! Channel registry
//!
//! Maps `(data kind, transport)` to a constructor for each channel role. The
//! registry is assembled once through a [`RegistryBuilder`], where a duplicate
//! pair is a configuration error, and is immutable afterwards so concurrent
//! resolution needs no locking.

use crate::bridge::{self, Client, Server};
use crate::descriptor::ChannelDescriptor;
use crate::error::{ChannelError, Role};
use crate::establish::Establisher;
use crate::pubsub::{self, Listener, Publisher};
use crate::transport::Middleware;
use crate::transports::memory;
use crate::watchdog::Watchdog;
use codec::Codec;
use once_cell::sync::Lazy;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::debug;

static STANDARD: Lazy<Arc<ChannelRegistry>> = Lazy::new(|| {
    let mut builder = RegistryBuilder::new();
    if let Err(e) = builder.standard_channels(memory::TRANSPORT_NAME) {
        panic!("invalid built-in channel registry: {}", e);
    }
    Arc::new(builder.build())
});

/// Everything a constructor needs to build one channel
#[derive(Clone)]
pub struct ChannelContext {
    pub descriptor: ChannelDescriptor,
    pub middleware: Arc<dyn Middleware>,
    pub codec: Arc<Codec>,
    pub establisher: Establisher,
    pub watchdog: Watchdog,
}

impl std::fmt::Debug for ChannelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelContext")
            .field("descriptor", &self.descriptor)
            .field("middleware", &self.middleware.name())
            .field("establisher", &self.establisher)
            .finish()
    }
}

pub type Constructor<T> =
    Arc<dyn Fn(ChannelContext) -> Result<Box<T>, ChannelError> + Send + Sync>;

type Key = (String, String);

fn key(data_kind: &str, transport: &str) -> Key {
    (data_kind.to_string(), transport.to_string())
}

fn insert<T: ?Sized>(
    table: &mut HashMap<Key, Constructor<T>>,
    role: Role,
    data_kind: &str,
    transport: &str,
    constructor: Constructor<T>,
) -> Result<(), ChannelError> {
    let key = key(data_kind, transport);
    if table.contains_key(&key) {
        return Err(ChannelError::duplicate_registration(role, data_kind, transport));
    }
    debug!("Registered {} for {}/{}", role, data_kind, transport);
    table.insert(key, constructor);
    Ok(())
}

fn lookup<T: ?Sized>(
    table: &HashMap<Key, Constructor<T>>,
    role: Role,
    data_kind: &str,
    transport: &str,
) -> Result<Constructor<T>, ChannelError> {
    table
        .get(&key(data_kind, transport))
        .cloned()
        .ok_or_else(|| ChannelError::unknown_channel(role, data_kind, transport))
}

/// Mutable registry used during startup
#[derive(Default)]
pub struct RegistryBuilder {
    publishers: HashMap<Key, Constructor<dyn Publisher>>,
    listeners: HashMap<Key, Constructor<dyn Listener>>,
    servers: HashMap<Key, Constructor<dyn Server>>,
    clients: HashMap<Key, Constructor<dyn Client>>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publisher<F>(
        &mut self,
        data_kind: &str,
        transport: &str,
        constructor: F,
    ) -> Result<&mut Self, ChannelError>
    where
        F: Fn(ChannelContext) -> Result<Box<dyn Publisher>, ChannelError> + Send + Sync + 'static,
    {
        let constructor: Constructor<dyn Publisher> = Arc::new(constructor);
        insert(&mut self.publishers, Role::Publisher, data_kind, transport, constructor)?;
        Ok(self)
    }

    pub fn listener<F>(
        &mut self,
        data_kind: &str,
        transport: &str,
        constructor: F,
    ) -> Result<&mut Self, ChannelError>
    where
        F: Fn(ChannelContext) -> Result<Box<dyn Listener>, ChannelError> + Send + Sync + 'static,
    {
        let constructor: Constructor<dyn Listener> = Arc::new(constructor);
        insert(&mut self.listeners, Role::Listener, data_kind, transport, constructor)?;
        Ok(self)
    }

    pub fn server<F>(
        &mut self,
        data_kind: &str,
        transport: &str,
        constructor: F,
    ) -> Result<&mut Self, ChannelError>
    where
        F: Fn(ChannelContext) -> Result<Box<dyn Server>, ChannelError> + Send + Sync + 'static,
    {
        let constructor: Constructor<dyn Server> = Arc::new(constructor);
        insert(&mut self.servers, Role::Server, data_kind, transport, constructor)?;
        Ok(self)
    }

    pub fn client<F>(
        &mut self,
        data_kind: &str,
        transport: &str,
        constructor: F,
    ) -> Result<&mut Self, ChannelError>
    where
        F: Fn(ChannelContext) -> Result<Box<dyn Client>, ChannelError> + Send + Sync + 'static,
    {
        let constructor: Constructor<dyn Client> = Arc::new(constructor);
        insert(&mut self.clients, Role::Client, data_kind, transport, constructor)?;
        Ok(self)
    }

    /// Register every built-in data kind for a transport
    pub fn standard_channels(&mut self, transport: &str) -> Result<&mut Self, ChannelError> {
        pubsub::register(self, transport)?;
        bridge::register(self, transport)?;
        Ok(self)
    }

    pub fn build(self) -> ChannelRegistry {
        debug!(
            "Channel registry built: {} publishers, {} listeners, {} servers, {} clients",
            self.publishers.len(),
            self.listeners.len(),
            self.servers.len(),
            self.clients.len()
        );
        ChannelRegistry {
            publishers: self.publishers,
            listeners: self.listeners,
            servers: self.servers,
            clients: self.clients,
        }
    }
}

/// Immutable `(data kind, transport)` dispatch table
pub struct ChannelRegistry {
    publishers: HashMap<Key, Constructor<dyn Publisher>>,
    listeners: HashMap<Key, Constructor<dyn Listener>>,
    servers: HashMap<Key, Constructor<dyn Server>>,
    clients: HashMap<Key, Constructor<dyn Client>>,
}

impl std::fmt::Debug for ChannelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelRegistry")
            .field("transports", &self.transports())
            .field("data_kinds", &self.data_kinds())
            .finish()
    }
}

impl ChannelRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Built-in channels on the `memory` transport
    ///
    /// # Panics
    ///
    /// If the built-in registrations collide, which is a bug in this crate.
    pub fn standard() -> Arc<ChannelRegistry> {
        STANDARD.clone()
    }

    pub fn resolve_publisher(
        &self,
        data_kind: &str,
        transport: &str,
    ) -> Result<Constructor<dyn Publisher>, ChannelError> {
        lookup(&self.publishers, Role::Publisher, data_kind, transport)
    }

    pub fn resolve_listener(
        &self,
        data_kind: &str,
        transport: &str,
    ) -> Result<Constructor<dyn Listener>, ChannelError> {
        lookup(&self.listeners, Role::Listener, data_kind, transport)
    }

    pub fn resolve_server(
        &self,
        data_kind: &str,
        transport: &str,
    ) -> Result<Constructor<dyn Server>, ChannelError> {
        lookup(&self.servers, Role::Server, data_kind, transport)
    }

    pub fn resolve_client(
        &self,
        data_kind: &str,
        transport: &str,
    ) -> Result<Constructor<dyn Client>, ChannelError> {
        lookup(&self.clients, Role::Client, data_kind, transport)
    }

    pub fn contains(&self, role: Role, data_kind: &str, transport: &str) -> bool {
        let key = key(data_kind, transport);
        match role {
            Role::Publisher => self.publishers.contains_key(&key),
            Role::Listener => self.listeners.contains_key(&key),
            Role::Server => self.servers.contains_key(&key),
            Role::Client => self.clients.contains_key(&key),
        }
    }

    fn keys(&self) -> impl Iterator<Item = &Key> {
        self.publishers
            .keys()
            .chain(self.listeners.keys())
            .chain(self.servers.keys())
            .chain(self.clients.keys())
    }

    /// Transports with at least one registered channel, sorted
    pub fn transports(&self) -> Vec<String> {
        self.keys()
            .map(|(_, transport)| transport.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Data kinds with at least one registered channel, sorted
    pub fn data_kinds(&self) -> Vec<String> {
        self.keys()
            .map(|(data_kind, _)| data_kind.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Total registered constructors across every role
    pub fn len(&self) -> usize {
        self.publishers.len() + self.listeners.len() + self.servers.len() + self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! ChannelFactory for building channels from descriptors and configuration
//!
//! The factory ties the pieces together: it validates the descriptor, resolves
//! a constructor from the registry, activates the transport through the
//! runtime and hands the constructor a [`ChannelContext`]. Resolution happens
//! before activation, so an unknown pair never starts a transport.

use crate::bridge::{Client, Server};
use crate::descriptor::ChannelDescriptor;
use crate::error::{ChannelError, Role};
use crate::establish::Establisher;
use crate::fallback::FallbackChannel;
use crate::pubsub::{Listener, Publisher};
use crate::registry::{ChannelContext, ChannelRegistry};
use crate::runtime::{Runtime, RuntimeGuard};
use crate::watchdog::Watchdog;
use codec::Codec;
use config::ConduitConfig;
use dashmap::DashSet;
use std::sync::Arc;
use tracing::{debug, warn};

/// Factory for publishers, listeners, servers and clients
#[derive(Debug, Clone)]
pub struct ChannelFactory {
    registry: Arc<ChannelRegistry>,
    runtime: Arc<Runtime>,
    watchdog: Watchdog,
    codec: Arc<Codec>,
    establisher: Establisher,
    config: Arc<ConduitConfig>,
    fallback_on_missing: bool,
    /// Missing pairs already reported, so each is logged once
    reported: Arc<DashSet<String>>,
    /// Set when the runtime is the global one
    exit_guard: Option<Arc<RuntimeGuard>>,
}

impl ChannelFactory {
    pub fn new(registry: Arc<ChannelRegistry>, runtime: Arc<Runtime>) -> Self {
        Self {
            registry,
            runtime,
            watchdog: Watchdog::global().clone(),
            codec: Arc::new(Codec::new()),
            establisher: Establisher::default(),
            config: Arc::new(ConduitConfig::default()),
            fallback_on_missing: false,
            reported: Arc::new(DashSet::new()),
            exit_guard: None,
        }
    }

    /// Built-in registry on the process-wide runtime and watchdog
    ///
    /// The global runtime's transports are deactivated once every standard
    /// factory (and clone) has been dropped.
    pub fn standard() -> Self {
        let guard = Runtime::global_guard();
        let mut factory = Self::new(ChannelRegistry::standard(), guard.runtime().clone());
        factory.exit_guard = Some(guard);
        factory
    }

    /// Built-in registry on a fresh runtime configured from `config`
    ///
    /// Channels get their own watchdog ticking at the configured interval.
    pub fn from_config(config: ConduitConfig) -> Self {
        let runtime = Arc::new(Runtime::from_config(&config));
        Self::new(ChannelRegistry::standard(), runtime)
            .with_watchdog(Watchdog::new(config.establish.watchdog_interval()))
            .with_establisher(Establisher::new(config.establish.poll_interval()))
            .with_fallback(config.global.fallback_on_missing)
            .with_config(config)
    }

    pub fn with_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_runtime(mut self, runtime: Arc<Runtime>) -> Self {
        self.runtime = runtime;
        self.exit_guard = None;
        self
    }

    pub fn with_watchdog(mut self, watchdog: Watchdog) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub fn with_codec(mut self, codec: Codec) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    pub fn with_establisher(mut self, establisher: Establisher) -> Self {
        self.establisher = establisher;
        self
    }

    /// Substitute fallback channels for unregistered pairs instead of failing
    pub fn with_fallback(mut self, enabled: bool) -> Self {
        self.fallback_on_missing = enabled;
        self
    }

    /// Configuration consulted by the `*_named` constructors
    pub fn with_config(mut self, config: ConduitConfig) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn registry(&self) -> &Arc<ChannelRegistry> {
        &self.registry
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn watchdog(&self) -> &Watchdog {
        &self.watchdog
    }

    pub fn config(&self) -> &ConduitConfig {
        &self.config
    }

    /// Descriptor of a channel declared under `[channels.<name>]`
    pub fn descriptor(&self, name: &str) -> Result<ChannelDescriptor, ChannelError> {
        ChannelDescriptor::from_config(&self.config, name)
    }

    fn context(&self, descriptor: ChannelDescriptor) -> Result<ChannelContext, ChannelError> {
        let middleware = self.runtime.middleware(descriptor.transport())?;
        Ok(ChannelContext {
            descriptor,
            middleware,
            codec: self.codec.clone(),
            establisher: self.establisher.clone(),
            watchdog: self.watchdog.clone(),
        })
    }

    /// Decide between failing and a fallback for an unresolvable pair
    fn missing(
        &self,
        role: Role,
        descriptor: &ChannelDescriptor,
        err: ChannelError,
    ) -> Result<FallbackChannel, ChannelError> {
        if !self.fallback_on_missing || !matches!(err, ChannelError::UnknownChannel { .. }) {
            return Err(err);
        }
        let key = format!("{}:{}/{}", role, descriptor.data_kind(), descriptor.transport());
        if self.reported.insert(key) {
            warn!(
                "No {} registered for {}/{}, using fallback channel",
                role,
                descriptor.data_kind(),
                descriptor.transport()
            );
        }
        Ok(FallbackChannel::new(descriptor.clone()))
    }

    pub fn publisher(&self, descriptor: ChannelDescriptor) -> Result<Box<dyn Publisher>, ChannelError> {
        descriptor.validate()?;
        let constructor = match self
            .registry
            .resolve_publisher(descriptor.data_kind(), descriptor.transport())
        {
            Ok(constructor) => constructor,
            Err(e) => return Ok(Box::new(self.missing(Role::Publisher, &descriptor, e)?)),
        };
        debug!("Creating publisher for {}", descriptor);
        constructor(self.context(descriptor)?)
    }

    pub fn listener(&self, descriptor: ChannelDescriptor) -> Result<Box<dyn Listener>, ChannelError> {
        descriptor.validate()?;
        let constructor = match self
            .registry
            .resolve_listener(descriptor.data_kind(), descriptor.transport())
        {
            Ok(constructor) => constructor,
            Err(e) => return Ok(Box::new(self.missing(Role::Listener, &descriptor, e)?)),
        };
        debug!("Creating listener for {}", descriptor);
        constructor(self.context(descriptor)?)
    }

    pub fn server(&self, descriptor: ChannelDescriptor) -> Result<Box<dyn Server>, ChannelError> {
        descriptor.validate()?;
        let constructor = match self
            .registry
            .resolve_server(descriptor.data_kind(), descriptor.transport())
        {
            Ok(constructor) => constructor,
            Err(e) => return Ok(Box::new(self.missing(Role::Server, &descriptor, e)?)),
        };
        debug!("Creating server for {}", descriptor);
        constructor(self.context(descriptor)?)
    }

    pub fn client(&self, descriptor: ChannelDescriptor) -> Result<Box<dyn Client>, ChannelError> {
        descriptor.validate()?;
        let constructor = match self
            .registry
            .resolve_client(descriptor.data_kind(), descriptor.transport())
        {
            Ok(constructor) => constructor,
            Err(e) => return Ok(Box::new(self.missing(Role::Client, &descriptor, e)?)),
        };
        debug!("Creating client for {}", descriptor);
        constructor(self.context(descriptor)?)
    }

    pub fn publisher_named(&self, name: &str) -> Result<Box<dyn Publisher>, ChannelError> {
        self.publisher(self.descriptor(name)?)
    }

    pub fn listener_named(&self, name: &str) -> Result<Box<dyn Listener>, ChannelError> {
        self.listener(self.descriptor(name)?)
    }

    pub fn server_named(&self, name: &str) -> Result<Box<dyn Server>, ChannelError> {
        self.server(self.descriptor(name)?)
    }

    pub fn client_named(&self, name: &str) -> Result<Box<dyn Client>, ChannelError> {
        self.client(self.descriptor(name)?)
    }
}

//! Middleware runtime activation
//!
//! A [`Runtime`] owns one [`Activator`] per transport name and activates each
//! transport at most once, the first time a channel needs it. Runtimes are
//! plain values: pass one to a [`crate::ChannelFactory`], or share the lazily
//! built [`Runtime::global`].
//!
//! Owned runtimes deactivate their transports on drop. The global runtime lives
//! in a static, so it deactivates when the last [`RuntimeGuard`] from
//! [`Runtime::global_guard`] goes away; [`crate::ChannelFactory::standard`]
//! holds one, so a program using standard factories shuts its transports down
//! as it exits `main`.

use crate::error::{ChannelError, TransportError};
use crate::transport::Middleware;
use crate::transports::memory::MemoryActivator;
use config::{ConduitConfig, TransportOptions};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};

static GLOBAL: Lazy<Arc<Runtime>> = Lazy::new(|| Arc::new(Runtime::with_builtin()));

static GLOBAL_GUARD: Lazy<Mutex<Weak<RuntimeGuard>>> = Lazy::new(|| Mutex::new(Weak::new()));

/// Brings a transport's process-wide middleware up and down
pub trait Activator: Send + Sync {
    /// Transport name channels refer to
    fn transport(&self) -> &str;

    fn activate(&self, options: &TransportOptions) -> Result<Arc<dyn Middleware>, TransportError>;

    fn deactivate(&self, middleware: &Arc<dyn Middleware>);
}

#[derive(Default)]
pub struct Runtime {
    activators: DashMap<String, Arc<dyn Activator>>,
    options: DashMap<String, TransportOptions>,
    active: DashMap<String, Arc<dyn Middleware>>,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("transports", &self.transports())
            .field("active", &self.active_transports())
            .finish()
    }
}

impl Runtime {
    /// Runtime with no transports
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime with the built-in `memory` transport
    pub fn with_builtin() -> Self {
        let runtime = Self::new();
        runtime.register_activator(Arc::new(MemoryActivator::default()));
        runtime
    }

    /// Built-in runtime with transport options from configuration
    pub fn from_config(config: &ConduitConfig) -> Self {
        let runtime = Self::with_builtin();
        runtime.configure(config);
        runtime
    }

    /// Process-wide runtime, built on first use
    ///
    /// Statics are never dropped; hold a [`Runtime::global_guard`] for as long
    /// as the process uses it, or call [`Runtime::shutdown`] before exiting.
    pub fn global() -> Arc<Runtime> {
        GLOBAL.clone()
    }

    /// Shared guard that shuts the global runtime down when its last holder drops
    pub fn global_guard() -> Arc<RuntimeGuard> {
        let mut slot = GLOBAL_GUARD.lock();
        if let Some(guard) = slot.upgrade() {
            return guard;
        }
        let guard = Arc::new(RuntimeGuard::new(Self::global()));
        *slot = Arc::downgrade(&guard);
        guard
    }

    /// Add or replace the activator for its transport
    pub fn register_activator(&self, activator: Arc<dyn Activator>) {
        let transport = activator.transport().to_string();
        if self.activators.insert(transport.clone(), activator).is_some() {
            warn!("Replaced activator for transport '{}'", transport);
        } else {
            debug!("Registered activator for transport '{}'", transport);
        }
    }

    /// Options handed to an activator on activation
    pub fn set_options(&self, transport: &str, options: TransportOptions) {
        self.options.insert(transport.to_string(), options);
    }

    /// Copy every `[transports.<name>]` table into this runtime
    pub fn configure(&self, config: &ConduitConfig) {
        for (transport, options) in &config.transports {
            self.set_options(transport, options.clone());
        }
    }

    /// Middleware for a transport, activating it on first use
    pub fn middleware(&self, transport: &str) -> Result<Arc<dyn Middleware>, ChannelError> {
        if let Some(active) = self.active.get(transport) {
            return Ok(active.value().clone());
        }

        let activator = self
            .activators
            .get(transport)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                ChannelError::invalid_descriptor(format!(
                    "no activator registered for transport '{}'",
                    transport
                ))
            })?;

        match self.active.entry(transport.to_string()) {
            Entry::Occupied(entry) => Ok(entry.get().clone()),
            Entry::Vacant(entry) => {
                let options = self
                    .options
                    .get(transport)
                    .map(|entry| entry.value().clone())
                    .unwrap_or_default();
                let middleware = activator.activate(&options)?;
                info!("Activated transport '{}'", transport);
                entry.insert(middleware.clone());
                Ok(middleware)
            }
        }
    }

    pub fn is_active(&self, transport: &str) -> bool {
        self.active.contains_key(transport)
    }

    /// Transports with an activator, sorted
    pub fn transports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.activators.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    pub fn active_transports(&self) -> Vec<String> {
        let mut names: Vec<String> = self.active.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Deactivate one transport; the next channel that needs it activates it again
    pub fn deactivate(&self, transport: &str) -> bool {
        match self.active.remove(transport) {
            Some((name, middleware)) => {
                match self.activators.get(&name) {
                    Some(activator) => activator.deactivate(&middleware),
                    None => warn!("No activator left to deactivate '{}'", name),
                }
                info!("Deactivated transport '{}'", name);
                true
            }
            None => false,
        }
    }

    /// Deactivate every active transport
    pub fn shutdown(&self) {
        for transport in self.active_transports() {
            self.deactivate(&transport);
        }
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Deactivates every transport of a shared runtime when dropped
#[derive(Debug)]
pub struct RuntimeGuard {
    runtime: Arc<Runtime>,
}

impl RuntimeGuard {
    pub fn new(runtime: Arc<Runtime>) -> Self {
        Self { runtime }
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }
}

impl Drop for RuntimeGuard {
    fn drop(&mut self) {
        debug!("Runtime guard released, shutting transports down");
        self.runtime.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::FlakyMiddleware;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct CountingActivator {
        activations: AtomicUsize,
        deactivations: AtomicUsize,
        seen_options: parking_lot::Mutex<Option<TransportOptions>>,
    }

    impl Activator for CountingActivator {
        fn transport(&self) -> &str {
            "counting"
        }

        fn activate(
            &self,
            options: &TransportOptions,
        ) -> Result<Arc<dyn Middleware>, TransportError> {
            self.activations.fetch_add(1, Ordering::SeqCst);
            *self.seen_options.lock() = Some(options.clone());
            Ok(Arc::new(FlakyMiddleware::new("counting")))
        }

        fn deactivate(&self, _middleware: &Arc<dyn Middleware>) {
            self.deactivations.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_activates_at_most_once() {
        let activator = Arc::new(CountingActivator::default());
        let runtime = Runtime::new();
        runtime.register_activator(activator.clone());

        let first = runtime.middleware("counting").unwrap();
        let second = runtime.middleware("counting").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(activator.activations.load(Ordering::SeqCst), 1);
        assert!(runtime.is_active("counting"));
    }

    #[test]
    fn test_concurrent_activation_is_single() {
        let activator = Arc::new(CountingActivator::default());
        let runtime = Arc::new(Runtime::new());
        runtime.register_activator(activator.clone());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let runtime = runtime.clone();
                std::thread::spawn(move || runtime.middleware("counting").is_ok())
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(activator.activations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unknown_transport_is_configuration_error() {
        let runtime = Runtime::with_builtin();
        let err = runtime.middleware("yarp").err().unwrap();
        assert!(err.is_configuration_error());
        assert_eq!(runtime.transports(), vec!["memory".to_string()]);
    }

    #[test]
    fn test_options_reach_activator() {
        let activator = Arc::new(CountingActivator::default());
        let runtime = Runtime::new();
        runtime.register_activator(activator.clone());
        let mut options = TransportOptions::new();
        options.insert("port".to_string(), serde_json::json!(5555));
        runtime.set_options("counting", options.clone());

        runtime.middleware("counting").unwrap();
        assert_eq!(activator.seen_options.lock().clone(), Some(options));
    }

    #[test]
    fn test_shutdown_and_drop_deactivate() {
        let activator = Arc::new(CountingActivator::default());
        {
            let runtime = Runtime::new();
            runtime.register_activator(activator.clone());
            runtime.middleware("counting").unwrap();
            runtime.shutdown();
            assert!(!runtime.is_active("counting"));
            assert_eq!(activator.deactivations.load(Ordering::SeqCst), 1);

            runtime.middleware("counting").unwrap();
        }
        assert_eq!(activator.activations.load(Ordering::SeqCst), 2);
        assert_eq!(activator.deactivations.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_guard_deactivates_shared_runtime() {
        let activator = Arc::new(CountingActivator::default());
        let runtime = Arc::new(Runtime::new());
        runtime.register_activator(activator.clone());
        runtime.middleware("counting").unwrap();

        let guard = RuntimeGuard::new(runtime.clone());
        assert!(Arc::ptr_eq(guard.runtime(), &runtime));
        drop(guard);
        assert!(!runtime.is_active("counting"));
        assert_eq!(activator.deactivations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_global_guard_is_shared() {
        let first = Runtime::global_guard();
        let second = Runtime::global_guard();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(Arc::ptr_eq(first.runtime(), &Runtime::global()));
    }
}

//! Mode-switched wrapping of application functions
//!
//! A [`Communicator`] binds channel names to descriptors and a [`Mode`]. The
//! same call site then publishes, listens, serves or requests depending on the
//! mode, which lets one program run as producer on one machine and consumer
//! on another by changing configuration only.
//!
//! ```rust
//! use channels::{ChannelDescriptor, ChannelFactory, Communicator, RequestArgs};
//! use codec::Value;
//! use config::Mode;
//!
//! let communicator = Communicator::new(ChannelFactory::standard());
//! communicator.register("sum", ChannelDescriptor::new("NativeObject", "memory", "/sum"));
//!
//! // no mode: the function runs as if unwrapped
//! let out = communicator
//!     .call("sum", RequestArgs::positional([1i64, 2]), |args| {
//!         Value::Int(args.args.iter().filter_map(Value::as_i64).sum())
//!     })
//!     .unwrap();
//! assert_eq!(out, Some(Value::Int(3)));
//!
//! communicator.activate("sum", Mode::Disable).unwrap();
//! assert_eq!(communicator.call("sum", RequestArgs::default(), |_| Value::Null).unwrap(), None);
//! ```

use crate::bridge::{Client, RequestArgs, Server};
use crate::descriptor::ChannelDescriptor;
use crate::error::ChannelError;
use crate::factory::ChannelFactory;
use crate::pubsub::{Listener, Publisher};
use codec::Value;
use config::Mode;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

/// Channel created on the first call in the bound mode
enum Executor {
    Publisher(Box<dyn Publisher>),
    Listener(Box<dyn Listener>),
    Server(Box<dyn Server>),
    Client(Box<dyn Client>),
}

struct Binding {
    descriptor: ChannelDescriptor,
    mode: Option<Mode>,
    executor: Option<Arc<Executor>>,
}

pub struct Communicator {
    factory: ChannelFactory,
    bindings: Mutex<HashMap<String, Binding>>,
}

impl std::fmt::Debug for Communicator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bindings = self.bindings.lock();
        let mut modes: Vec<_> = bindings
            .iter()
            .map(|(name, binding)| (name.clone(), binding.mode))
            .collect();
        modes.sort_by(|a, b| a.0.cmp(&b.0));
        f.debug_struct("Communicator").field("bindings", &modes).finish()
    }
}

impl Communicator {
    pub fn new(factory: ChannelFactory) -> Self {
        Self {
            factory,
            bindings: Mutex::new(HashMap::new()),
        }
    }

    /// Bind every channel declared in the factory's configuration
    ///
    /// Channels carrying a `mode` are activated in that mode.
    pub fn from_config(factory: ChannelFactory) -> Result<Self, ChannelError> {
        let communicator = Self::new(factory);
        let mut names: Vec<String> = communicator.factory.config().channels.keys().cloned().collect();
        names.sort();
        for name in names {
            let descriptor = communicator.factory.descriptor(&name)?;
            communicator.register(&name, descriptor);
            let mode = communicator
                .factory
                .config()
                .channel(&name)
                .and_then(|settings| settings.mode);
            if let Some(mode) = mode {
                communicator.activate(&name, mode)?;
            }
        }
        Ok(communicator)
    }

    pub fn factory(&self) -> &ChannelFactory {
        &self.factory
    }

    /// Bind `name` to a descriptor, replacing any earlier binding
    pub fn register(&self, name: &str, descriptor: ChannelDescriptor) {
        debug!("Registered communicator channel '{}' as {}", name, descriptor);
        self.bindings.lock().insert(
            name.to_string(),
            Binding {
                descriptor,
                mode: None,
                executor: None,
            },
        );
    }

    /// Switch the mode of a bound channel
    ///
    /// The previous executor, if any, is dropped and a new one is created on
    /// the next call.
    pub fn activate(&self, name: &str, mode: Mode) -> Result<(), ChannelError> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(name).ok_or_else(|| unbound(name))?;
        if binding.mode != Some(mode) {
            binding.executor = None;
        }
        binding.mode = Some(mode);
        info!("Communicator channel '{}' activated in {} mode", name, mode);
        Ok(())
    }

    /// Back to passthrough
    pub fn deactivate(&self, name: &str) -> Result<(), ChannelError> {
        let mut bindings = self.bindings.lock();
        let binding = bindings.get_mut(name).ok_or_else(|| unbound(name))?;
        binding.mode = None;
        binding.executor = None;
        Ok(())
    }

    pub fn mode(&self, name: &str) -> Option<Mode> {
        self.bindings.lock().get(name).and_then(|binding| binding.mode)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.bindings.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Run `func` according to the mode bound to `name`
    ///
    /// - none: `func(args)` unchanged
    /// - `Publish`: `func(args)`, then publish the result
    /// - `Listen`: `func` is skipped, the listened value is returned
    /// - `Reply`: wait for a request, run `func` on its arguments, reply with the result
    /// - `Request`: `func` is skipped, `args` are sent to the server and its reply returned
    /// - `Disable`: nothing runs, `None` is returned
    pub fn call<F>(&self, name: &str, args: RequestArgs, func: F) -> Result<Option<Value>, ChannelError>
    where
        F: FnOnce(RequestArgs) -> Value,
    {
        let (mode, executor) = {
            let mut bindings = self.bindings.lock();
            let binding = bindings.get_mut(name).ok_or_else(|| unbound(name))?;
            match binding.mode {
                None => (None, None),
                Some(Mode::Disable) => (Some(Mode::Disable), None),
                Some(mode) => {
                    let executor = match &binding.executor {
                        Some(executor) => executor.clone(),
                        None => {
                            let created = Arc::new(self.create(mode, binding.descriptor.clone())?);
                            binding.executor = Some(created.clone());
                            created
                        }
                    };
                    (Some(mode), Some(executor))
                }
            }
        };

        // channel calls may block, so the binding lock is released first
        match (mode, executor.as_deref()) {
            (None, _) => Ok(Some(func(args))),
            (Some(Mode::Disable), _) => Ok(None),
            (_, Some(Executor::Publisher(publisher))) => {
                let value = func(args);
                publisher.publish(&value)?;
                Ok(Some(value))
            }
            (_, Some(Executor::Listener(listener))) => listener.listen(),
            (_, Some(Executor::Server(server))) => {
                let Some(request) = server.await_request()? else {
                    return Ok(None);
                };
                let value = func(request);
                server.reply(&value)?;
                Ok(Some(value))
            }
            (_, Some(Executor::Client(client))) => client.request(args),
            (Some(_), None) => Ok(None),
        }
    }

    fn create(&self, mode: Mode, descriptor: ChannelDescriptor) -> Result<Executor, ChannelError> {
        let executor = match mode {
            Mode::Publish => Executor::Publisher(self.factory.publisher(descriptor)?),
            Mode::Listen => Executor::Listener(self.factory.listener(descriptor)?),
            Mode::Reply => Executor::Server(self.factory.server(descriptor)?),
            Mode::Request => Executor::Client(self.factory.client(descriptor)?),
            Mode::Disable => {
                return Err(ChannelError::invalid_descriptor(
                    "disabled channels have no executor",
                ))
            }
        };
        debug!("Created {} executor", mode);
        Ok(executor)
    }
}

fn unbound(name: &str) -> ChannelError {
    ChannelError::invalid_descriptor(format!("no communicator channel named '{}'", name))
}

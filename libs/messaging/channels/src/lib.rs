//! # Conduit Channels
//!
//! Transport-agnostic publishers, listeners, servers and clients.
//!
//! ## Architecture Role
//!
//! ```text
//! ChannelDescriptor ──▶ ChannelFactory ──resolve──▶ ChannelRegistry
//!                             │                        (data kind, transport) → constructor
//!                             └──activate──▶ Runtime ──▶ Middleware (memory, ...)
//!
//! Publisher / Listener ──▶ Codec ──▶ Envelope ──▶ transport
//! Server ◀── Handoff (inbound/outbound single slots) ◀── transport callback
//! ```
//!
//! Channels establish lazily: the first `publish`, `listen`, `await_request` or
//! `request` probes the transport. Blocking channels wait for the peer;
//! non-blocking channels probe once and leave the rest to the [`Watchdog`],
//! degrading to "nothing sent" and "no data" until the peer shows up.
//!
//! ## Usage
//!
//! ```rust
//! use channels::{ChannelDescriptor, ChannelFactory, ChannelRegistry, Runtime, Watchdog};
//! use codec::Value;
//! use config::ChannelOptions;
//! use std::sync::Arc;
//!
//! let factory = ChannelFactory::new(ChannelRegistry::standard(), Arc::new(Runtime::with_builtin()))
//!     .with_watchdog(Watchdog::manual());
//! let descriptor = ChannelDescriptor::new("NativeObject", "memory", "/greetings")
//!     .with_options(ChannelOptions::non_blocking());
//!
//! let listener = factory.listener(descriptor.clone()).unwrap();
//! let publisher = factory.publisher(descriptor).unwrap();
//!
//! assert!(listener.establish(None).unwrap());
//! assert!(publisher.publish(&Value::from("hello")).unwrap());
//! ```

pub mod bridge;
pub mod communicator;
pub mod descriptor;
pub mod error;
pub mod establish;
pub mod factory;
pub mod fallback;
pub mod link;
pub mod pubsub;
pub mod registry;
pub mod runtime;
pub mod test_utils;
pub mod transport;
pub mod transports;
pub mod watchdog;

pub use bridge::{BridgeClient, BridgeServer, Client, RequestArgs, Server};
pub use communicator::Communicator;
pub use descriptor::{kinds, ChannelDescriptor};
pub use error::{ChannelError, Role, TransportError};
pub use establish::Establisher;
pub use factory::ChannelFactory;
pub use fallback::FallbackChannel;
pub use link::{Connection, ConnectionState, Establish};
pub use pubsub::{
    AudioChunk, AudioFormat, ImageFormat, Listener, NativeFormat, PayloadFormat, Publisher,
    TopicListener, TopicPublisher,
};
pub use registry::{ChannelContext, ChannelRegistry, Constructor, RegistryBuilder};
pub use runtime::{Activator, Runtime, RuntimeGuard};
pub use transport::{
    ClientLink, DeliveryFn, Envelope, Middleware, PublisherLink, RequestHandler, ServiceLink,
    SubscriberLink,
};
pub use transports::{MemoryActivator, MemoryBroker};
pub use watchdog::Watchdog;

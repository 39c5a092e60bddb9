//! Stand-in channels for `(data kind, transport)` pairs with no registration
//!
//! Used by the factory only when `fallback_on_missing` is enabled. They never
//! establish and never move data, so code written against a missing transport
//! keeps running as if its peer were absent.

use crate::bridge::{Client, RequestArgs, Server};
use crate::descriptor::ChannelDescriptor;
use crate::error::ChannelError;
use crate::link::ConnectionState;
use crate::pubsub::{Listener, Publisher};
use codec::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

#[derive(Debug)]
pub struct FallbackChannel {
    descriptor: ChannelDescriptor,
    discarded: AtomicU64,
}

impl FallbackChannel {
    pub fn new(descriptor: ChannelDescriptor) -> Self {
        Self {
            descriptor,
            discarded: AtomicU64::new(0),
        }
    }

    /// Values handed to `publish` or `reply` and thrown away
    pub fn discarded(&self) -> u64 {
        self.discarded.load(Ordering::Relaxed)
    }

    fn discard(&self, what: &str) {
        self.discarded.fetch_add(1, Ordering::Relaxed);
        debug!("Fallback {} discarded for {}", what, self.descriptor);
    }
}

impl Publisher for FallbackChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Unestablished
    }

    fn establish(&self, _repeats: Option<u32>) -> Result<bool, ChannelError> {
        Ok(false)
    }

    fn publish(&self, _value: &Value) -> Result<bool, ChannelError> {
        self.discard("publish");
        Ok(false)
    }

    fn close(&self) {}
}

impl Listener for FallbackChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Unestablished
    }

    fn establish(&self, _repeats: Option<u32>) -> Result<bool, ChannelError> {
        Ok(false)
    }

    fn listen(&self) -> Result<Option<Value>, ChannelError> {
        Ok(None)
    }

    fn queued(&self) -> usize {
        0
    }

    fn dropped(&self) -> u64 {
        0
    }

    fn close(&self) {}
}

impl Server for FallbackChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Unestablished
    }

    fn establish(&self, _repeats: Option<u32>) -> Result<bool, ChannelError> {
        Ok(false)
    }

    fn await_request(&self) -> Result<Option<RequestArgs>, ChannelError> {
        Ok(Some(RequestArgs::default()))
    }

    /// Accepted and discarded, whether or not a request is pending
    fn reply(&self, _value: &Value) -> Result<(), ChannelError> {
        self.discard("reply");
        Ok(())
    }

    fn close(&self) {}
}

impl Client for FallbackChannel {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    fn state(&self) -> ConnectionState {
        ConnectionState::Unestablished
    }

    fn establish(&self, _repeats: Option<u32>) -> Result<bool, ChannelError> {
        Ok(false)
    }

    fn request(&self, _args: RequestArgs) -> Result<Option<Value>, ChannelError> {
        Ok(None)
    }

    fn close(&self) {}
}

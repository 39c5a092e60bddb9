//! Connection state shared by every channel

use crate::descriptor::ChannelDescriptor;
use crate::error::{ChannelError, TransportError};
use crate::establish::Establisher;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use tracing::info;

/// Connection states of a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Nothing attempted yet
    #[default]
    Unestablished,
    /// Handshake succeeded; send/receive are valid
    Established,
    /// Last attempt did not connect; a later attempt may still succeed
    Failed,
}

impl ConnectionState {
    fn as_u8(self) -> u8 {
        match self {
            ConnectionState::Unestablished => 0,
            ConnectionState::Established => 1,
            ConnectionState::Failed => 2,
        }
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => ConnectionState::Established,
            2 => ConnectionState::Failed,
            _ => ConnectionState::Unestablished,
        }
    }
}

/// Lock-free cell holding a [`ConnectionState`]
#[derive(Debug, Default)]
pub struct StateCell(AtomicU8);

impl StateCell {
    pub fn new(state: ConnectionState) -> Self {
        Self(AtomicU8::new(state.as_u8()))
    }

    pub fn get(&self) -> ConnectionState {
        ConnectionState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn set(&self, state: ConnectionState) {
        self.0.store(state.as_u8(), Ordering::Release);
    }

    pub fn is_established(&self) -> bool {
        self.get() == ConnectionState::Established
    }
}

/// Anything the watchdog can retry
pub trait Establish: Send + Sync {
    /// Label used in logs
    fn name(&self) -> &str;

    fn is_established(&self) -> bool;

    /// Attempt the transport handshake
    ///
    /// `repeats` bounds the number of probes; `None` applies the channel's own
    /// blocking or non-blocking policy. Returns `Ok(false)` when the probe never
    /// succeeded. Cheap and idempotent once established.
    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError>;
}

/// Transport link of one channel plus its connection state
///
/// The link lock is held only while the link is opened or swapped, never while
/// probing, so `close()` from another thread always gets through and cancels a
/// pending wait.
pub struct Connection<L: ?Sized> {
    link: Mutex<Option<Arc<L>>>,
    state: StateCell,
    closed: AtomicBool,
}

impl<L: ?Sized> Default for Connection<L> {
    fn default() -> Self {
        Self::new()
    }
}

impl<L: ?Sized> Connection<L> {
    pub fn new() -> Self {
        Self {
            link: Mutex::new(None),
            state: StateCell::default(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state.get()
    }

    pub fn is_established(&self) -> bool {
        self.state.is_established()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Current link, if one was opened
    pub fn link(&self) -> Option<Arc<L>> {
        self.link.lock().clone()
    }

    /// Mark closed and hand back the link for the caller to close
    ///
    /// Returns `None` on every call after the first.
    pub fn close(&self) -> Option<Option<Arc<L>>> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return None;
        }
        let link = self.link.lock().take();
        self.state.set(ConnectionState::Unestablished);
        Some(link)
    }

    /// Open the link on first use, then probe it under the establisher's policy
    pub fn establish<O, P>(
        &self,
        role: &str,
        descriptor: &ChannelDescriptor,
        establisher: &Establisher,
        repeats: Option<u32>,
        open: O,
        probe: P,
    ) -> Result<bool, ChannelError>
    where
        O: FnOnce() -> Result<Box<L>, TransportError>,
        P: Fn(&L) -> bool,
    {
        if self.state.is_established() {
            return Ok(true);
        }
        if self.is_closed() {
            return Err(ChannelError::closed(descriptor.endpoint()));
        }

        let link = {
            let mut slot = self.link.lock();
            if self.is_closed() {
                return Err(ChannelError::closed(descriptor.endpoint()));
            }
            match slot.as_ref() {
                Some(link) => link.clone(),
                None => match open() {
                    Ok(opened) => {
                        let opened: Arc<L> = Arc::from(opened);
                        *slot = Some(opened.clone());
                        opened
                    }
                    Err(e) => {
                        self.state.set(ConnectionState::Failed);
                        return Err(e.into());
                    }
                },
            }
        };
        if self.state.is_established() {
            return Ok(true);
        }

        let connected = establisher.await_connection_unless(
            || probe(&link),
            || self.is_closed(),
            descriptor.should_wait(),
            repeats,
        );
        if connected {
            self.state.set(ConnectionState::Established);
            info!(
                "{} '{}' established on '{}'",
                role,
                descriptor.endpoint(),
                descriptor.transport()
            );
        } else {
            self.state.set(ConnectionState::Failed);
        }
        if self.is_closed() {
            // close() may have run while probing
            self.state.set(ConnectionState::Unestablished);
            return Err(ChannelError::closed(descriptor.endpoint()));
        }
        Ok(connected)
    }
}

//! Single-slot rendezvous between a transport callback and the application
//!
//! The callback side calls [`Handoff::exchange`]: it puts the request into the
//! `inbound` slot and then blocks on the `outbound` slot until the application
//! replies. Both slots hold one item, so at most one exchange is in flight.
//! Every blocking wait also watches a shutdown channel; dropping its sender
//! releases whoever is waiting.

use crate::error::TransportError;
use bytes::Bytes;
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};

#[derive(Debug)]
pub struct Handoff {
    inbound_tx: Sender<Bytes>,
    inbound_rx: Receiver<Bytes>,
    outbound_tx: Sender<Bytes>,
    outbound_rx: Receiver<Bytes>,
}

/// Outcome of offering a reply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Offer {
    Accepted,
    /// Slot already held an undelivered reply; the offered one was dropped
    SlotFull,
}

impl Default for Handoff {
    fn default() -> Self {
        Self::new()
    }
}

impl Handoff {
    pub fn new() -> Self {
        let (inbound_tx, inbound_rx) = bounded(1);
        let (outbound_tx, outbound_rx) = bounded(1);
        Self {
            inbound_tx,
            inbound_rx,
            outbound_tx,
            outbound_rx,
        }
    }

    /// Callback side: hand over a request and wait for its reply
    pub fn exchange(&self, request: Bytes, shutdown: &Receiver<()>) -> Result<Bytes, TransportError> {
        select! {
            send(self.inbound_tx, request) -> sent => sent.map_err(|_| TransportError::Closed)?,
            recv(shutdown) -> _ => return Err(TransportError::Closed),
        }
        select! {
            recv(self.outbound_rx) -> reply => reply.map_err(|_| TransportError::Closed),
            recv(shutdown) -> _ => Err(TransportError::Closed),
        }
    }

    /// Application side: next request, `None` when non-blocking and empty
    pub fn take_request(
        &self,
        blocking: bool,
        shutdown: &Receiver<()>,
    ) -> Result<Option<Bytes>, TransportError> {
        if !blocking {
            return match self.inbound_rx.try_recv() {
                Ok(request) => Ok(Some(request)),
                Err(TryRecvError::Empty) => Ok(None),
                Err(TryRecvError::Disconnected) => Err(TransportError::Closed),
            };
        }
        select! {
            recv(self.inbound_rx) -> request => request.map(Some).map_err(|_| TransportError::Closed),
            recv(shutdown) -> _ => Err(TransportError::Closed),
        }
    }

    /// Application side: place a reply without ever blocking
    pub fn offer_reply(&self, reply: Bytes) -> Result<Offer, TransportError> {
        match self.outbound_tx.try_send(reply) {
            Ok(()) => Ok(Offer::Accepted),
            Err(TrySendError::Full(_)) => Ok(Offer::SlotFull),
            Err(TrySendError::Disconnected(_)) => Err(TransportError::Closed),
        }
    }

    /// Request waiting for the application
    pub fn request_waiting(&self) -> bool {
        !self.inbound_rx.is_empty()
    }

    /// Reply not yet collected by the callback
    pub fn reply_waiting(&self) -> bool {
        !self.outbound_rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_exchange_rendezvous() {
        let handoff = Arc::new(Handoff::new());
        let (_shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let callback = {
            let handoff = handoff.clone();
            let shutdown = shutdown_rx.clone();
            thread::spawn(move || handoff.exchange(Bytes::from_static(b"req"), &shutdown))
        };

        let request = handoff.take_request(true, &shutdown_rx).unwrap();
        assert_eq!(request, Some(Bytes::from_static(b"req")));
        assert_eq!(
            handoff.offer_reply(Bytes::from_static(b"rep")).unwrap(),
            Offer::Accepted
        );
        assert_eq!(callback.join().unwrap().unwrap(), Bytes::from_static(b"rep"));
    }

    #[test]
    fn test_second_reply_is_dropped_not_blocked() {
        let handoff = Handoff::new();
        assert_eq!(
            handoff.offer_reply(Bytes::from_static(b"one")).unwrap(),
            Offer::Accepted
        );
        assert_eq!(
            handoff.offer_reply(Bytes::from_static(b"two")).unwrap(),
            Offer::SlotFull
        );
        assert!(handoff.reply_waiting());
    }

    #[test]
    fn test_non_blocking_take_on_empty() {
        let handoff = Handoff::new();
        let (_tx, rx) = bounded::<()>(0);
        assert_eq!(handoff.take_request(false, &rx).unwrap(), None);
        assert!(!handoff.request_waiting());
    }

    #[test]
    fn test_shutdown_releases_waiting_callback() {
        let handoff = Arc::new(Handoff::new());
        let (shutdown_tx, shutdown_rx) = bounded::<()>(0);

        let callback = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.exchange(Bytes::from_static(b"req"), &shutdown_rx))
        };
        thread::sleep(Duration::from_millis(20));
        drop(shutdown_tx);
        assert_eq!(callback.join().unwrap(), Err(TransportError::Closed));
    }
}

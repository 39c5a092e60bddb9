use super::format::PayloadFormat;
use super::Listener;
use crate::descriptor::ChannelDescriptor;
use crate::error::ChannelError;
use crate::establish::Establisher;
use crate::link::{Connection, ConnectionState, Establish};
use crate::registry::ChannelContext;
use crate::transport::{DeliveryFn, Middleware, SubscriberLink};
use bytes::Bytes;
use codec::{Codec, Value};
use crossbeam_channel::{bounded, select, Receiver, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};

/// Listener for one topic, generic over the payload format
///
/// The transport's delivery thread only ever `try_send`s into a bounded
/// inbound queue; decoding happens on the thread calling `listen()`. A blocked
/// `listen()` returns [`ChannelError::Closed`] once the listener is closed.
pub struct TopicListener<F: PayloadFormat> {
    endpoint: Arc<ListenerEndpoint<F>>,
}

struct ListenerEndpoint<F> {
    descriptor: ChannelDescriptor,
    middleware: Arc<dyn Middleware>,
    codec: Arc<Codec>,
    establisher: Establisher,
    format: F,
    connection: Connection<dyn SubscriberLink>,
    inbound_tx: Sender<Bytes>,
    inbound_rx: Receiver<Bytes>,
    shutdown_tx: Mutex<Option<Sender<()>>>,
    shutdown_rx: Receiver<()>,
    dropped: Arc<AtomicU64>,
}

impl<F: PayloadFormat> TopicListener<F> {
    pub fn new(context: ChannelContext, format: F) -> Self {
        let ChannelContext {
            descriptor,
            middleware,
            codec,
            establisher,
            watchdog,
        } = context;

        let (inbound_tx, inbound_rx) = bounded(descriptor.options().queue_size.max(1));
        let (shutdown_tx, shutdown_rx) = bounded(0);
        let endpoint = Arc::new(ListenerEndpoint {
            descriptor,
            middleware,
            codec,
            establisher,
            format,
            connection: Connection::new(),
            inbound_tx,
            inbound_rx,
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_rx,
            dropped: Arc::new(AtomicU64::new(0)),
        });

        if !endpoint.descriptor.should_wait() {
            let weak: Weak<dyn Establish> = Arc::downgrade(&endpoint) as Weak<dyn Establish>;
            watchdog.register(weak);
        }
        debug!("Listener created for {}", endpoint.descriptor);

        Self { endpoint }
    }

    pub fn format(&self) -> &F {
        &self.endpoint.format
    }
}

impl<F: PayloadFormat> ListenerEndpoint<F> {
    fn delivery_fn(&self) -> DeliveryFn {
        let tx = self.inbound_tx.clone();
        let dropped = self.dropped.clone();
        let channel = self.descriptor.endpoint().to_string();
        Arc::new(move |body: Bytes| match tx.try_send(body) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                let total = dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    "Listener '{}' inbound queue full, dropped newest message ({} dropped so far)",
                    channel, total
                );
            }
            Err(TrySendError::Disconnected(_)) => {}
        })
    }

    fn decode(&self, body: &[u8]) -> Result<Value, ChannelError> {
        let value = self.codec.decode(body)?;
        self.format.validate(self.descriptor.endpoint(), &value)?;
        Ok(value)
    }

    fn listen(&self) -> Result<Option<Value>, ChannelError> {
        if self.connection.is_closed() {
            return Err(ChannelError::closed(self.descriptor.endpoint()));
        }
        if !self.establish(None)? {
            return Ok(None);
        }

        let blocking = self.descriptor.should_wait();
        loop {
            let body = if blocking {
                select! {
                    recv(self.inbound_rx) -> body => match body {
                        Ok(body) => body,
                        Err(_) => return Err(ChannelError::closed(self.descriptor.endpoint())),
                    },
                    recv(self.shutdown_rx) -> _ => {
                        return Err(ChannelError::closed(self.descriptor.endpoint()))
                    }
                }
            } else {
                match self.inbound_rx.try_recv() {
                    Ok(body) => body,
                    Err(TryRecvError::Empty) => return Ok(None),
                    Err(TryRecvError::Disconnected) => {
                        return Err(ChannelError::closed(self.descriptor.endpoint()))
                    }
                }
            };

            match self.decode(&body) {
                Ok(value) => return Ok(Some(value)),
                Err(e) => warn!(
                    "Listener '{}' discarded a message: {}",
                    self.descriptor.endpoint(),
                    e
                ),
            }
        }
    }

    fn close(&self) {
        let Some(link) = self.connection.close() else {
            return;
        };
        // wakes a blocked listen()
        self.shutdown_tx.lock().take();
        if let Some(link) = link {
            link.close();
        }
        debug!("Listener '{}' closed", self.descriptor.endpoint());
    }
}

impl<F: PayloadFormat> Establish for ListenerEndpoint<F> {
    fn name(&self) -> &str {
        self.descriptor.endpoint()
    }

    fn is_established(&self) -> bool {
        self.connection.is_established()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.connection.establish(
            "Listener",
            &self.descriptor,
            &self.establisher,
            repeats,
            || {
                self.middleware
                    .open_subscriber(self.descriptor.endpoint(), self.delivery_fn())
            },
            |link| link.is_connected(),
        )
    }
}

impl<F: PayloadFormat> Listener for TopicListener<F> {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.endpoint.descriptor
    }

    fn state(&self) -> ConnectionState {
        self.endpoint.connection.state()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.endpoint.establish(repeats)
    }

    fn listen(&self) -> Result<Option<Value>, ChannelError> {
        self.endpoint.listen()
    }

    fn queued(&self) -> usize {
        self.endpoint.inbound_rx.len()
    }

    fn dropped(&self) -> u64 {
        self.endpoint.dropped.load(Ordering::Relaxed)
    }

    fn close(&self) {
        self.endpoint.close();
    }
}

impl<F: PayloadFormat> Drop for TopicListener<F> {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

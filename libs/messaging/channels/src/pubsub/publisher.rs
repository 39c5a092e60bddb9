use super::format::PayloadFormat;
use super::Publisher;
use crate::descriptor::ChannelDescriptor;
use crate::error::ChannelError;
use crate::establish::Establisher;
use crate::link::{Connection, ConnectionState, Establish};
use crate::registry::ChannelContext;
use crate::transport::{Envelope, Middleware, PublisherLink};
use bytes::Bytes;
use codec::{Codec, Value};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::debug;

/// Publisher for one topic, generic over the payload format
pub struct TopicPublisher<F: PayloadFormat> {
    endpoint: Arc<PublisherEndpoint<F>>,
}

struct PublisherEndpoint<F> {
    descriptor: ChannelDescriptor,
    middleware: Arc<dyn Middleware>,
    codec: Arc<Codec>,
    establisher: Establisher,
    format: F,
    topic: Bytes,
    connection: Connection<dyn PublisherLink>,
    sent: AtomicU64,
}

impl<F: PayloadFormat> TopicPublisher<F> {
    pub fn new(context: ChannelContext, format: F) -> Self {
        let ChannelContext {
            descriptor,
            middleware,
            codec,
            establisher,
            watchdog,
        } = context;

        let endpoint = Arc::new(PublisherEndpoint {
            topic: Bytes::copy_from_slice(descriptor.endpoint().as_bytes()),
            descriptor,
            middleware,
            codec,
            establisher,
            format,
            connection: Connection::new(),
            sent: AtomicU64::new(0),
        });

        if !endpoint.descriptor.should_wait() {
            let weak: Weak<dyn Establish> = Arc::downgrade(&endpoint) as Weak<dyn Establish>;
            watchdog.register(weak);
        }
        debug!("Publisher created for {}", endpoint.descriptor);

        Self { endpoint }
    }

    pub fn format(&self) -> &F {
        &self.endpoint.format
    }

    /// Messages handed to the transport so far
    pub fn sent(&self) -> u64 {
        self.endpoint.sent.load(Ordering::Relaxed)
    }
}

impl<F: PayloadFormat> Establish for PublisherEndpoint<F> {
    fn name(&self) -> &str {
        self.descriptor.endpoint()
    }

    fn is_established(&self) -> bool {
        self.connection.is_established()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.connection.establish(
            "Publisher",
            &self.descriptor,
            &self.establisher,
            repeats,
            || self.middleware.open_publisher(self.descriptor.endpoint()),
            |link| link.is_connected(),
        )
    }
}

impl<F: PayloadFormat> PublisherEndpoint<F> {
    fn publish(&self, value: &Value) -> Result<bool, ChannelError> {
        if self.connection.is_closed() {
            return Err(ChannelError::closed(self.descriptor.endpoint()));
        }
        self.format.validate(self.descriptor.endpoint(), value)?;

        if !self.establish(None)? {
            debug!(
                "Publisher '{}' not established, nothing sent",
                self.descriptor.endpoint()
            );
            return Ok(false);
        }

        let body = self.codec.encode(value)?;
        let link = self.connection.link().ok_or_else(|| ChannelError::NotEstablished {
            channel: self.descriptor.endpoint().to_string(),
        })?;
        link.send(Envelope::new(self.topic.clone(), body))?;
        self.sent.fetch_add(1, Ordering::Relaxed);
        Ok(true)
    }

    fn close(&self) {
        let Some(link) = self.connection.close() else {
            return;
        };
        if let Some(link) = link {
            link.close();
        }
        debug!("Publisher '{}' closed", self.descriptor.endpoint());
    }
}

impl<F: PayloadFormat> Publisher for TopicPublisher<F> {
    fn descriptor(&self) -> &ChannelDescriptor {
        &self.endpoint.descriptor
    }

    fn state(&self) -> ConnectionState {
        self.endpoint.connection.state()
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError> {
        self.endpoint.establish(repeats)
    }

    fn publish(&self, value: &Value) -> Result<bool, ChannelError> {
        self.endpoint.publish(value)
    }

    fn close(&self) {
        self.endpoint.close();
    }
}

impl<F: PayloadFormat> Drop for TopicPublisher<F> {
    fn drop(&mut self) {
        self.endpoint.close();
    }
}

//! Publish/subscribe channels
//!
//! `publish()` and `listen()` establish on first use. Until establishment
//! succeeds they degrade to "nothing sent" and "no data" instead of failing,
//! so polling loops need no error handling for a peer that is not up yet.

pub mod format;
mod listener;
mod publisher;

pub use format::{AudioChunk, AudioFormat, ImageFormat, NativeFormat, PayloadFormat};
pub use listener::TopicListener;
pub use publisher::TopicPublisher;

use crate::descriptor::{kinds, ChannelDescriptor};
use crate::error::ChannelError;
use crate::link::ConnectionState;
use crate::registry::{ChannelContext, RegistryBuilder};
use codec::Value;

pub trait Publisher: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    fn state(&self) -> ConnectionState;

    fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    /// Attempt establishment now instead of on the first publish
    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError>;

    /// Validate, encode and send one value
    ///
    /// Returns `Ok(false)` without sending when the channel is not established.
    /// Shape mismatches are rejected before any establishment attempt.
    fn publish(&self, value: &Value) -> Result<bool, ChannelError>;

    fn close(&self);
}

pub trait Listener: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    fn state(&self) -> ConnectionState;

    fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError>;

    /// Next decoded value
    ///
    /// Blocking listeners (`should_wait`) suspend until a value arrives.
    /// Non-blocking listeners return `Ok(None)` when nothing is queued.
    /// Messages that fail to decode are logged and skipped.
    fn listen(&self) -> Result<Option<Value>, ChannelError>;

    /// Messages waiting in the inbound queue
    fn queued(&self) -> usize;

    /// Messages discarded because the inbound queue was full
    fn dropped(&self) -> u64;

    fn close(&self);
}

fn native_publisher(context: ChannelContext) -> Result<Box<dyn Publisher>, ChannelError> {
    Ok(Box::new(TopicPublisher::new(context, NativeFormat)))
}

fn native_listener(context: ChannelContext) -> Result<Box<dyn Listener>, ChannelError> {
    Ok(Box::new(TopicListener::new(context, NativeFormat)))
}

fn image_publisher(context: ChannelContext) -> Result<Box<dyn Publisher>, ChannelError> {
    let format = ImageFormat::from_options(context.descriptor.options());
    Ok(Box::new(TopicPublisher::new(context, format)))
}

fn image_listener(context: ChannelContext) -> Result<Box<dyn Listener>, ChannelError> {
    let format = ImageFormat::from_options(context.descriptor.options());
    Ok(Box::new(TopicListener::new(context, format)))
}

fn audio_publisher(context: ChannelContext) -> Result<Box<dyn Publisher>, ChannelError> {
    let format = AudioFormat::from_options(context.descriptor.options());
    Ok(Box::new(TopicPublisher::new(context, format)))
}

fn audio_listener(context: ChannelContext) -> Result<Box<dyn Listener>, ChannelError> {
    let format = AudioFormat::from_options(context.descriptor.options());
    Ok(Box::new(TopicListener::new(context, format)))
}

/// Register the built-in publishers and listeners for a transport
pub fn register(builder: &mut RegistryBuilder, transport: &str) -> Result<(), ChannelError> {
    builder
        .publisher(kinds::NATIVE_OBJECT, transport, native_publisher)?
        .listener(kinds::NATIVE_OBJECT, transport, native_listener)?
        .publisher(kinds::IMAGE, transport, image_publisher)?
        .listener(kinds::IMAGE, transport, image_listener)?
        .publisher(kinds::AUDIO_CHUNK, transport, audio_publisher)?
        .listener(kinds::AUDIO_CHUNK, transport, audio_listener)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::establish::Establisher;
    use crate::test_utils::FlakyMiddleware;
    use crate::transport::Middleware;
    use crate::watchdog::Watchdog;
    use codec::{Codec, DType, TypedBuffer};
    use config::ChannelOptions;
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    fn context(
        data_kind: &str,
        options: ChannelOptions,
        middleware: Arc<FlakyMiddleware>,
        watchdog: &Watchdog,
    ) -> ChannelContext {
        ChannelContext {
            descriptor: ChannelDescriptor::new(data_kind, "flaky", "/topic").with_options(options),
            middleware: middleware as Arc<dyn Middleware>,
            codec: Arc::new(Codec::new()),
            establisher: Establisher::new(Duration::from_millis(1)),
            watchdog: watchdog.clone(),
        }
    }

    #[test]
    fn test_unestablished_publish_sends_nothing() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        middleware.set_reachable(false);
        let watchdog = Watchdog::manual();
        let publisher = native_publisher(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::non_blocking(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();

        assert!(!publisher.publish(&Value::Int(1)).unwrap());
        assert_eq!(publisher.state(), ConnectionState::Failed);
        assert!(middleware.sent().is_empty());
    }

    #[test]
    fn test_non_blocking_publisher_converges_through_watchdog() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        middleware.set_reachable(false);
        let watchdog = Watchdog::manual();
        let publisher = native_publisher(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::non_blocking(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();
        assert_eq!(watchdog.pending(), 1);

        watchdog.sweep();
        assert!(!publisher.is_established());

        middleware.set_reachable(true);
        watchdog.sweep();
        assert!(publisher.is_established());
        assert_eq!(watchdog.pending(), 0);

        assert!(publisher.publish(&Value::from("hello")).unwrap());
        assert_eq!(middleware.sent().len(), 1);
    }

    #[test]
    fn test_blocking_channels_skip_watchdog() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        let watchdog = Watchdog::manual();
        let _listener = native_listener(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::default(),
            middleware,
            &watchdog,
        ))
        .unwrap();
        assert_eq!(watchdog.pending(), 0);
    }

    #[test]
    fn test_image_mismatch_rejected_before_send() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        let watchdog = Watchdog::manual();
        let publisher = image_publisher(context(
            kinds::IMAGE,
            ChannelOptions::default().with_image(4, 2, true, false),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();

        let wrong = TypedBuffer::zeros(DType::UInt8, vec![3, 3, 3]).unwrap();
        let err = publisher.publish(&Value::Buffer(wrong)).unwrap_err();
        assert!(matches!(err, ChannelError::ShapeMismatch { .. }));
        assert_eq!(middleware.publishers_opened(), 0);
        assert_eq!(publisher.state(), ConnectionState::Unestablished);

        let right = TypedBuffer::zeros(DType::UInt8, vec![2, 4, 3]).unwrap();
        assert!(publisher.publish(&Value::Buffer(right)).unwrap());
        assert_eq!(middleware.sent().len(), 1);
    }

    #[test]
    fn test_open_failure_surfaces_transport_error() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        middleware.fail_open(true);
        let watchdog = Watchdog::manual();
        let listener = native_listener(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::non_blocking(),
            middleware,
            &watchdog,
        ))
        .unwrap();

        let err = listener.listen().unwrap_err();
        assert!(matches!(err, ChannelError::Transport(_)));
        assert_eq!(listener.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_listener_skips_undecodable_messages() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        let watchdog = Watchdog::manual();
        let codec = Codec::new();
        let listener = native_listener(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::non_blocking(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();
        assert!(listener.establish(None).unwrap());

        middleware.deliver("/topic", b"{not json".to_vec());
        middleware.deliver("/topic", codec.encode(&Value::Int(7)).unwrap());
        assert_eq!(listener.listen().unwrap(), Some(Value::Int(7)));
        assert_eq!(listener.listen().unwrap(), None);
    }

    #[test]
    fn test_closed_channels_refuse_work() {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        let watchdog = Watchdog::manual();
        let publisher = native_publisher(context(
            kinds::NATIVE_OBJECT,
            ChannelOptions::default(),
            middleware,
            &watchdog,
        ))
        .unwrap();
        publisher.close();
        assert!(matches!(
            publisher.publish(&Value::Null),
            Err(ChannelError::Closed { .. })
        ));
    }

    type Listening = thread::JoinHandle<Result<Option<Value>, ChannelError>>;

    fn blocked_listen(reachable: bool) -> (Arc<dyn Listener>, Listening) {
        let middleware = Arc::new(FlakyMiddleware::new("flaky"));
        middleware.set_reachable(reachable);
        let watchdog = Watchdog::manual();
        let listener: Arc<dyn Listener> = Arc::from(
            native_listener(context(
                kinds::NATIVE_OBJECT,
                ChannelOptions::default(),
                middleware,
                &watchdog,
            ))
            .unwrap(),
        );
        let waiting = {
            let listener = listener.clone();
            thread::spawn(move || listener.listen())
        };
        thread::sleep(Duration::from_millis(20));
        (listener, waiting)
    }

    #[test]
    fn test_close_wakes_blocked_listen() {
        let (listener, waiting) = blocked_listen(true);
        let started = Instant::now();
        listener.close();
        assert!(matches!(
            waiting.join().unwrap(),
            Err(ChannelError::Closed { .. })
        ));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_close_ends_wait_for_missing_peer() {
        let (listener, waiting) = blocked_listen(false);
        listener.close();
        assert!(matches!(
            waiting.join().unwrap(),
            Err(ChannelError::Closed { .. })
        ));
        assert_eq!(listener.state(), ConnectionState::Unestablished);
    }
}

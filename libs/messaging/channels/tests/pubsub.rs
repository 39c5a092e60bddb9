//! Publish/subscribe over the in-process transport

use channels::{
    kinds, AudioChunk, ChannelDescriptor, ChannelError, ChannelFactory, ChannelRegistry,
    MemoryActivator, RegistryBuilder, Runtime, Watchdog,
};
use codec::{DType, TypedBuffer, Value};
use config::ChannelOptions;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn memory_factory() -> ChannelFactory {
    ChannelFactory::new(ChannelRegistry::standard(), Arc::new(Runtime::with_builtin()))
        .with_watchdog(Watchdog::manual())
}

fn poll<T>(mut attempt: impl FnMut() -> Option<T>) -> Option<T> {
    for _ in 0..400 {
        if let Some(found) = attempt() {
            return Some(found);
        }
        thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test_log::test]
fn test_blocking_pubsub_on_custom_transport() {
    let mut builder = RegistryBuilder::new();
    builder.standard_channels("T").unwrap();
    let runtime = Arc::new(Runtime::new());
    runtime.register_activator(Arc::new(MemoryActivator::named("T")));
    let factory = ChannelFactory::new(Arc::new(builder.build()), runtime.clone())
        .with_watchdog(Watchdog::manual());

    let descriptor = ChannelDescriptor::new(kinds::NATIVE_OBJECT, "T", "/numbers");
    let listener = factory.listener(descriptor.clone()).unwrap();
    let publisher = factory.publisher(descriptor).unwrap();
    assert!(runtime.is_active("T"));

    let receiver = thread::spawn(move || {
        (0..3)
            .map(|_| listener.listen().unwrap())
            .collect::<Vec<_>>()
    });

    for n in 1..=3i64 {
        assert!(publisher.publish(&Value::Int(n)).unwrap());
    }

    let received = receiver.join().unwrap();
    assert_eq!(
        received,
        vec![Some(Value::Int(1)), Some(Value::Int(2)), Some(Value::Int(3))]
    );
}

#[test]
fn test_full_queue_keeps_oldest_message() {
    let factory = memory_factory();
    let descriptor = ChannelDescriptor::new(kinds::NATIVE_OBJECT, "memory", "/burst")
        .with_options(ChannelOptions::non_blocking().with_queue_size(1));
    let listener = factory.listener(descriptor.clone()).unwrap();
    let publisher = factory.publisher(descriptor).unwrap();
    assert!(listener.establish(None).unwrap());

    assert!(publisher.publish(&Value::from("first")).unwrap());
    assert!(publisher.publish(&Value::from("second")).unwrap());

    assert_eq!(poll(|| (listener.dropped() == 1).then_some(())), Some(()));
    assert_eq!(listener.queued(), 1);
    assert_eq!(listener.listen().unwrap(), Some(Value::from("first")));
    assert_eq!(listener.listen().unwrap(), None);
}

#[test]
fn test_non_blocking_listener_before_publisher() {
    let factory = memory_factory();
    let descriptor = ChannelDescriptor::new(kinds::NATIVE_OBJECT, "memory", "/late")
        .with_options(ChannelOptions::non_blocking());

    let publisher = factory.publisher(descriptor.clone()).unwrap();
    // nobody subscribed yet
    assert!(!publisher.publish(&Value::Int(0)).unwrap());

    let listener = factory.listener(descriptor).unwrap();
    assert_eq!(listener.listen().unwrap(), None);

    factory.watchdog().sweep();
    assert!(publisher.is_established());
    assert!(publisher.publish(&Value::Int(1)).unwrap());
    assert_eq!(poll(|| listener.listen().unwrap()), Some(Value::Int(1)));
}

#[test]
fn test_image_frames_checked_on_both_ends() {
    let factory = memory_factory();
    let options = ChannelOptions::non_blocking().with_image(4, 2, true, false);
    let descriptor = ChannelDescriptor::new(kinds::IMAGE, "memory", "/camera").with_options(options);
    let listener = factory.listener(descriptor.clone()).unwrap();
    let publisher = factory.publisher(descriptor).unwrap();
    assert!(listener.establish(None).unwrap());

    let wrong = TypedBuffer::zeros(DType::UInt8, vec![4, 4, 3]).unwrap();
    assert!(matches!(
        publisher.publish(&Value::Buffer(wrong)),
        Err(ChannelError::ShapeMismatch { .. })
    ));

    let pixels: Vec<u8> = (0..24).collect();
    let frame = TypedBuffer::from_slice(vec![2, 4, 3], &pixels).unwrap();
    assert!(publisher.publish(&Value::Buffer(frame.clone())).unwrap());

    let received = poll(|| listener.listen().unwrap()).unwrap();
    let received = received.as_buffer().unwrap();
    assert_eq!(received.shape(), &[2, 4, 3]);
    assert_eq!(received.to_vec::<u8>().unwrap(), pixels);
}

#[test]
fn test_audio_chunks_adopt_layout() {
    let factory = memory_factory();
    let options = ChannelOptions::non_blocking().with_queue_size(4);
    let descriptor = ChannelDescriptor::new(kinds::AUDIO_CHUNK, "memory", "/mic").with_options(options);
    let listener = factory.listener(descriptor.clone()).unwrap();
    let publisher = factory.publisher(descriptor).unwrap();
    assert!(listener.establish(None).unwrap());

    let samples: Vec<f32> = (0..8).map(|i| i as f32 / 8.0).collect();
    let chunk = AudioChunk::from_interleaved(&samples, 2, 16_000).unwrap();
    assert!(publisher.publish(&chunk.clone().into_value()).unwrap());

    // the first chunk fixed the layout at [4, 2]
    let mono = AudioChunk::from_interleaved(&samples, 1, 16_000).unwrap();
    assert!(publisher.publish(&mono.into_value()).is_err());

    let received = poll(|| listener.listen().unwrap()).unwrap();
    let received = AudioChunk::from_value(&received).unwrap();
    assert_eq!(received, chunk);
    assert_eq!((received.chunk(), received.channels()), (4, 2));
}

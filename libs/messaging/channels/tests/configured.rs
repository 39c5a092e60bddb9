//! Configuration-driven factories, fallback channels and background establishment

use channels::test_utils::FlakyMiddleware;
use channels::{
    kinds, Activator, ChannelDescriptor, ChannelError, ChannelFactory, Communicator, Middleware,
    RegistryBuilder, RequestArgs, Runtime, TransportError, Watchdog,
};
use codec::Value;
use config::{ChannelOptions, ConduitConfig, Mode, TransportOptions};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Serves one shared flaky middleware under the name "flaky"
struct FlakyActivator(Arc<FlakyMiddleware>);

impl Activator for FlakyActivator {
    fn transport(&self) -> &str {
        "flaky"
    }

    fn activate(&self, _options: &TransportOptions) -> Result<Arc<dyn Middleware>, TransportError> {
        let middleware: Arc<dyn Middleware> = self.0.clone();
        Ok(middleware)
    }

    fn deactivate(&self, _middleware: &Arc<dyn Middleware>) {}
}

const CONFIG: &str = r#"
[global]
fallback_on_missing = true

[establish]
poll_interval_ms = 5
watchdog_interval_ms = 10

[transports.memory]
service_queue_size = 2

[channels.status]
data_kind = "NativeObject"
endpoint = "/status"
mode = "publish"
should_wait = false

[channels.status_in]
data_kind = "NativeObject"
endpoint = "/status"
mode = "listen"
should_wait = false

[channels.preview]
data_kind = "Image"
transport = "nowhere"
endpoint = "/preview"
"#;

#[test_log::test]
fn test_factory_from_config_file_values() {
    let config = ConduitConfig::from_toml_str(CONFIG).unwrap();
    let factory = ChannelFactory::from_config(config);

    assert!(factory.config().global.fallback_on_missing);
    assert_eq!(factory.watchdog().interval(), Duration::from_millis(10));

    let listener = factory.listener_named("status_in").unwrap();
    let publisher = factory.publisher_named("status").unwrap();
    assert!(listener.establish(None).unwrap());
    assert!(publisher.publish(&Value::from("ready")).unwrap());

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut received = None;
    while received.is_none() && Instant::now() < deadline {
        received = listener.listen().unwrap();
        thread::sleep(Duration::from_millis(2));
    }
    assert_eq!(received, Some(Value::from("ready")));
}

#[test]
fn test_fallback_for_unregistered_transport() {
    let config = ConduitConfig::from_toml_str(CONFIG).unwrap();
    let factory = ChannelFactory::from_config(config);

    let publisher = factory.publisher_named("preview").unwrap();
    assert!(!publisher.publish(&Value::Null).unwrap());
    let listener = factory.listener_named("preview").unwrap();
    assert_eq!(listener.listen().unwrap(), None);
    assert!(!factory.runtime().is_active("nowhere"));

    let strict = factory.clone().with_fallback(false);
    assert!(matches!(
        strict.publisher_named("preview").err(),
        Some(ChannelError::UnknownChannel { .. })
    ));
}

#[test]
fn test_communicator_modes_from_config() {
    let config = ConduitConfig::from_toml_str(CONFIG).unwrap();
    let communicator = Communicator::from_config(ChannelFactory::from_config(config)).unwrap();

    assert_eq!(communicator.mode("status"), Some(Mode::Publish));
    assert_eq!(communicator.mode("status_in"), Some(Mode::Listen));
    assert_eq!(communicator.mode("preview"), None);

    let echoed = communicator
        .call("preview", RequestArgs::positional([7i64]), |args| {
            args.args[0].clone()
        })
        .unwrap();
    assert_eq!(echoed, Some(Value::Int(7)));
}

#[test_log::test]
fn test_background_watchdog_establishes_late_peer() {
    let middleware = Arc::new(FlakyMiddleware::new("flaky"));
    middleware.set_reachable(false);

    let mut builder = RegistryBuilder::new();
    builder.standard_channels("flaky").unwrap();
    let runtime = Arc::new(Runtime::new());
    runtime.register_activator(Arc::new(FlakyActivator(middleware.clone())));
    let watchdog = Watchdog::new(Duration::from_millis(5));
    let factory = ChannelFactory::new(Arc::new(builder.build()), runtime)
        .with_watchdog(watchdog.clone());

    let descriptor = ChannelDescriptor::new(kinds::NATIVE_OBJECT, "flaky", "/late")
        .with_options(ChannelOptions::non_blocking());
    let publisher = factory.publisher(descriptor).unwrap();
    assert!(!publisher.publish(&Value::Int(1)).unwrap());
    assert!(watchdog.is_running());

    middleware.set_reachable(true);
    let deadline = Instant::now() + Duration::from_secs(2);
    while !publisher.is_established() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(publisher.is_established());
    assert!(publisher.publish(&Value::Int(2)).unwrap());
    assert_eq!(middleware.sent().len(), 1);
}

//! Request/reply channels
//!
//! Transports answer service calls from a callback that must return the reply
//! before control goes back to their event loop. [`BridgeServer`] turns that
//! into a blocking `await_request()` / `reply()` pair for the application,
//! with at most one exchange in flight.

mod client;
mod handoff;
mod server;

pub use client::BridgeClient;
pub use handoff::{Handoff, Offer};
pub use server::BridgeServer;

use crate::descriptor::{kinds, ChannelDescriptor};
use crate::error::ChannelError;
use crate::link::ConnectionState;
use crate::registry::{ChannelContext, RegistryBuilder};
use codec::{CodecError, Map, Value};

/// Positional and keyword arguments of one request
///
/// Wire form is the two element list `[args, kwargs]`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestArgs {
    pub args: Vec<Value>,
    pub kwargs: Map,
}

impl RequestArgs {
    pub fn new(args: Vec<Value>, kwargs: Map) -> Self {
        Self { args, kwargs }
    }

    pub fn positional<I, V>(args: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self {
            args: args.into_iter().map(Into::into).collect(),
            kwargs: Map::new(),
        }
    }

    pub fn with_kwarg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.kwargs.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty() && self.kwargs.is_empty()
    }

    pub fn into_value(self) -> Value {
        Value::List(vec![Value::List(self.args), Value::Map(self.kwargs)])
    }

    pub fn from_value(value: Value) -> Result<Self, ChannelError> {
        let Value::List(mut parts) = value else {
            return Err(CodecError::decode(0, "request arguments must be a [args, kwargs] list").into());
        };
        if parts.len() != 2 {
            return Err(CodecError::decode(
                0,
                format!("request arguments hold {} elements, expected 2", parts.len()),
            )
            .into());
        }
        let kwargs = parts.pop();
        let args = parts.pop();
        match (args, kwargs) {
            (Some(Value::List(args)), Some(Value::Map(kwargs))) => Ok(Self { args, kwargs }),
            (args, kwargs) => Err(CodecError::decode(
                0,
                format!(
                    "request arguments must be [list, map], got [{}, {}]",
                    args.as_ref().map_or("none", Value::kind),
                    kwargs.as_ref().map_or("none", Value::kind)
                ),
            )
            .into()),
        }
    }
}

impl From<RequestArgs> for Value {
    fn from(args: RequestArgs) -> Self {
        args.into_value()
    }
}

pub trait Server: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    fn state(&self) -> ConnectionState;

    fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError>;

    /// Wait for the next request
    ///
    /// `Ok(None)` means not established yet, or nothing queued on a
    /// non-blocking server. A request that fails to decode yields empty
    /// arguments and still has to be replied to. Calling again before
    /// replying fails with [`ChannelError::RequestOutstanding`].
    fn await_request(&self) -> Result<Option<RequestArgs>, ChannelError>;

    /// Answer the request returned by the last `await_request()`
    ///
    /// Fails with [`ChannelError::NoPendingRequest`] when there is none.
    fn reply(&self, value: &Value) -> Result<(), ChannelError>;

    fn close(&self);
}

pub trait Client: Send + Sync {
    fn descriptor(&self) -> &ChannelDescriptor;

    fn state(&self) -> ConnectionState;

    fn is_established(&self) -> bool {
        self.state() == ConnectionState::Established
    }

    fn establish(&self, repeats: Option<u32>) -> Result<bool, ChannelError>;

    /// Call the service and wait for its reply
    ///
    /// `Ok(None)` when not established or when the reply cannot be decoded.
    fn request(&self, args: RequestArgs) -> Result<Option<Value>, ChannelError>;

    fn close(&self);
}

fn native_server(context: ChannelContext) -> Result<Box<dyn Server>, ChannelError> {
    Ok(Box::new(BridgeServer::new(context)))
}

fn native_client(context: ChannelContext) -> Result<Box<dyn Client>, ChannelError> {
    Ok(Box::new(BridgeClient::new(context)))
}

/// Register the built-in servers and clients for a transport
pub fn register(builder: &mut RegistryBuilder, transport: &str) -> Result<(), ChannelError> {
    builder
        .server(kinds::NATIVE_OBJECT, transport, native_server)?
        .client(kinds::NATIVE_OBJECT, transport, native_client)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::establish::Establisher;
    use crate::test_utils::FlakyMiddleware;
    use crate::transport::Middleware;
    use crate::transports::memory::MemoryBroker;
    use crate::watchdog::Watchdog;
    use bytes::Bytes;
    use codec::Codec;
    use config::ChannelOptions;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn context(
        options: ChannelOptions,
        middleware: Arc<dyn Middleware>,
        watchdog: &Watchdog,
    ) -> ChannelContext {
        ChannelContext {
            descriptor: ChannelDescriptor::new(kinds::NATIVE_OBJECT, "test", "/service")
                .with_options(options),
            middleware,
            codec: Arc::new(Codec::new()),
            establisher: Establisher::new(Duration::from_millis(1)),
            watchdog: watchdog.clone(),
        }
    }

    #[test]
    fn test_request_args_wire_form() {
        let args = RequestArgs::positional([1i64, 2]).with_kwarg("scale", 0.5);
        let value = args.clone().into_value();
        assert_eq!(value.as_list().map(<[Value]>::len), Some(2));
        assert_eq!(RequestArgs::from_value(value).unwrap(), args);

        assert!(RequestArgs::from_value(Value::Int(3)).is_err());
        assert!(RequestArgs::from_value(Value::List(vec![Value::Null, Value::Null])).is_err());
        assert!(RequestArgs::default().is_empty());
    }

    #[test]
    fn test_reply_without_request_fails_fast() {
        let middleware = Arc::new(FlakyMiddleware::new("test"));
        let watchdog = Watchdog::manual();
        let server = native_server(context(ChannelOptions::default(), middleware, &watchdog)).unwrap();

        let err = server.reply(&Value::Int(1)).unwrap_err();
        assert!(matches!(err, ChannelError::NoPendingRequest { .. }));
    }

    #[test]
    fn test_request_then_reply_round_trip() {
        let middleware = Arc::new(FlakyMiddleware::new("test"));
        let watchdog = Watchdog::manual();
        let codec = Codec::new();
        let server = native_server(context(
            ChannelOptions::default(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();
        assert!(server.establish(None).unwrap());

        let body = codec
            .encode(&RequestArgs::positional([Value::from("ping")]).into_value())
            .unwrap();
        let reply_rx = middleware.request("/service", body).unwrap();

        let request = server.await_request().unwrap().unwrap();
        assert_eq!(request.args, vec![Value::from("ping")]);
        assert!(matches!(
            server.await_request(),
            Err(ChannelError::RequestOutstanding { .. })
        ));

        server.reply(&Value::from("pong")).unwrap();
        let reply = reply_rx.recv_timeout(Duration::from_secs(2)).unwrap().unwrap();
        assert_eq!(codec.decode(&reply).unwrap(), Value::from("pong"));

        assert!(matches!(
            server.reply(&Value::Null),
            Err(ChannelError::NoPendingRequest { .. })
        ));
    }

    #[test]
    fn test_undecodable_request_yields_empty_args() {
        let middleware = Arc::new(FlakyMiddleware::new("test"));
        let watchdog = Watchdog::manual();
        let server = native_server(context(
            ChannelOptions::default(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();
        assert!(server.establish(None).unwrap());

        let reply_rx = middleware.request("/service", Bytes::from_static(b"\x00garbage")).unwrap();
        let request = server.await_request().unwrap().unwrap();
        assert!(request.is_empty());

        server.reply(&Value::Null).unwrap();
        assert!(reply_rx.recv_timeout(Duration::from_secs(2)).unwrap().is_ok());
    }

    #[test]
    fn test_non_blocking_server_without_request() {
        let middleware = Arc::new(FlakyMiddleware::new("test"));
        let watchdog = Watchdog::manual();
        let server = native_server(context(
            ChannelOptions::non_blocking(),
            middleware.clone(),
            &watchdog,
        ))
        .unwrap();
        assert_eq!(watchdog.pending(), 1);
        assert_eq!(server.await_request().unwrap(), None);
        assert!(server.is_established());
    }

    #[test]
    fn test_unreachable_client_returns_none() {
        let middleware = Arc::new(FlakyMiddleware::new("test"));
        middleware.set_reachable(false);
        let watchdog = Watchdog::manual();
        let client = native_client(context(ChannelOptions::non_blocking(), middleware, &watchdog)).unwrap();

        assert_eq!(client.request(RequestArgs::default()).unwrap(), None);
        assert_eq!(client.state(), ConnectionState::Failed);
    }

    #[test]
    fn test_client_server_over_memory_broker() {
        let broker: Arc<dyn Middleware> = Arc::new(MemoryBroker::new("memory").unwrap());
        let watchdog = Watchdog::manual();
        let server = native_server(context(
            ChannelOptions::default(),
            broker.clone(),
            &watchdog,
        ))
        .unwrap();
        let client = native_client(context(ChannelOptions::default(), broker, &watchdog)).unwrap();
        assert!(server.establish(None).unwrap());

        let caller = thread::spawn(move || {
            client.request(RequestArgs::positional([2i64, 3]).with_kwarg("op", "add"))
        });

        let request = server.await_request().unwrap().unwrap();
        let sum: i64 = request.args.iter().filter_map(Value::as_i64).sum();
        assert_eq!(request.kwargs.get("op"), Some(&Value::from("add")));
        server.reply(&Value::Int(sum)).unwrap();

        assert_eq!(caller.join().unwrap().unwrap(), Some(Value::Int(5)));
        server.close();
    }

    #[test]
    fn test_close_releases_pump() {
        let broker: Arc<dyn Middleware> = Arc::new(MemoryBroker::new("memory").unwrap());
        let watchdog = Watchdog::manual();
        let server = BridgeServer::new(context(ChannelOptions::non_blocking(), broker, &watchdog));

        assert_eq!(Server::await_request(&server).unwrap(), None);
        assert!(server.is_pumping());
        Server::close(&server);
        assert!(!server.is_pumping());
        assert!(matches!(
            Server::await_request(&server),
            Err(ChannelError::Closed { .. })
        ));
    }
}

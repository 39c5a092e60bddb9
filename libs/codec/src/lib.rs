//! # Conduit Value Codec
//!
//! Transport-neutral encoding of native values for every Conduit channel.
//!
//! ## Value Universe
//!
//! - Scalars, strings, booleans, null
//! - Ordered sequences and string-keyed mappings (key order is not preserved)
//! - Binary blobs
//! - **Typed numeric buffers** with dtype, shape and byte order, at any depth
//! - Extension values encoded by registered [`CodecPlugin`]s
//!
//! ## Architecture Role
//!
//! ```text
//! application value ──encode──▶ JSON tree ──▶ bytes ──▶ transport envelope
//!                                   │
//!            decode hooks ◀─────────┘  (buffer markers, plugin markers)
//! ```
//!
//! Encoding consults the plugin registry for values the base encoder does not
//! recognise and fails with [`CodecError::UnsupportedType`] when no plugin
//! claims them. Decoding runs every embedded object through the
//! [`DecodeHook`] chain, so call sites can change how markers are
//! materialised without touching the base format.
//!
//! ## Usage
//!
//! ```rust
//! use codec::{Codec, TypedBuffer, Value};
//!
//! let codec = Codec::new();
//! let frame = TypedBuffer::from_slice(vec![2, 2], &[0.0f32, 1.0, 2.0, 3.0]).unwrap();
//! let value = Value::map([("x", Value::Int(1)), ("buf", Value::Buffer(frame))]);
//!
//! let bytes = codec.encode(&value).unwrap();
//! assert_eq!(codec.decode(&bytes).unwrap(), value);
//! ```

pub mod buffer;
pub mod codec;
pub mod error;
pub mod hooks;
pub mod plugins;
pub mod value;

pub use buffer::{ByteOrder, DType, Element, TypedBuffer};
pub use codec::{Codec, CodecBuilder, MAX_NESTING};
pub use error::CodecError;
pub use hooks::{BufferFields, DecodeHook, Decoded, PluginHook, RawBufferHook, TypedBufferHook};
pub use plugins::{CodecPlugin, DecimalPlugin, PluginRegistry};
pub use value::{ExtensionValue, Map, Value};

/// Reserved key marking an embedded typed buffer
pub const BUFFER_MARKER: &str = "__buffer__";

/// Reserved key marking a base64 byte blob
pub const BYTES_MARKER: &str = "__bytes__";

/// Reserved key marking a non-finite float
pub const FLOAT_MARKER: &str = "__float__";

/// Reserved key marking a plugin-encoded value
pub const PLUGIN_MARKER: &str = "__plugin__";

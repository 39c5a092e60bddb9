//! Decode hooks
//!
//! The decoder rebuilds every JSON object bottom-up and hands it to the hook
//! chain before it becomes a plain [`Value::Map`]. Hooks are how the same base
//! format turns buffer markers into arrays, keeps them as raw bytes, or
//! restores plugin values.

use crate::buffer::{ByteOrder, DType, TypedBuffer};
use crate::error::CodecError;
use crate::plugins::PluginRegistry;
use crate::value::{Map, Value};
use crate::{BUFFER_MARKER, PLUGIN_MARKER};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use std::fmt::Debug;
use std::sync::Arc;

/// Result of running a hook on one decoded object
#[derive(Debug)]
pub enum Decoded {
    /// The hook replaced the object
    Value(Value),
    /// The hook left the object alone; later hooks still see it
    Object(Map),
}

/// Per-object decode extension point
pub trait DecodeHook: Send + Sync + Debug {
    fn decode_object(&self, object: Map) -> Result<Decoded, CodecError>;
}

/// Parsed fields of a buffer marker object
#[derive(Debug)]
pub struct BufferFields {
    pub dtype: DType,
    pub shape: Vec<usize>,
    pub byte_order: ByteOrder,
    pub data: Vec<u8>,
}

impl BufferFields {
    /// Extract the four buffer fields from a marker object
    pub fn parse(object: &Map) -> Result<Self, CodecError> {
        let dtype = field_str(object, "dtype")?.parse::<DType>()?;
        let byte_order = field_str(object, "byte_order")?.parse::<ByteOrder>()?;
        let shape = match object.get("shape") {
            Some(Value::List(dims)) => dims
                .iter()
                .map(|d| match d {
                    Value::Int(n) if *n > 0 => usize::try_from(*n).map_err(|_| {
                        CodecError::invalid_buffer(format!("shape entry {} is too large", n))
                    }),
                    Value::Int(n) => Err(CodecError::invalid_buffer(format!(
                        "shape entries must be positive, got {}",
                        n
                    ))),
                    other => Err(CodecError::invalid_buffer(format!(
                        "shape entries must be positive integers, got {}",
                        other.kind()
                    ))),
                })
                .collect::<Result<Vec<_>, _>>()?,
            _ => return Err(CodecError::invalid_buffer("missing or malformed 'shape'")),
        };
        let data = BASE64
            .decode(field_str(object, "data")?)
            .map_err(|e| CodecError::invalid_buffer(format!("'data' is not base64: {}", e)))?;
        Ok(Self {
            dtype,
            shape,
            byte_order,
            data,
        })
    }
}

fn field_str<'a>(object: &'a Map, key: &str) -> Result<&'a str, CodecError> {
    object
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| CodecError::invalid_buffer(format!("missing or malformed '{}'", key)))
}

/// Turns buffer markers into [`TypedBuffer`]s in host byte order
#[derive(Debug, Clone, Copy, Default)]
pub struct TypedBufferHook;

impl DecodeHook for TypedBufferHook {
    fn decode_object(&self, object: Map) -> Result<Decoded, CodecError> {
        if !object.contains_key(BUFFER_MARKER) {
            return Ok(Decoded::Object(object));
        }
        let fields = BufferFields::parse(&object)?;
        let buffer =
            TypedBuffer::from_raw(fields.dtype, fields.shape, fields.byte_order, fields.data)?;
        Ok(Decoded::Value(Value::Buffer(buffer.into_native_order())))
    }
}

/// Leaves buffer markers as plain maps whose `data` is the raw byte blob
///
/// Useful for relays that forward buffers without interpreting them.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawBufferHook;

impl DecodeHook for RawBufferHook {
    fn decode_object(&self, object: Map) -> Result<Decoded, CodecError> {
        if !object.contains_key(BUFFER_MARKER) {
            return Ok(Decoded::Object(object));
        }
        let fields = BufferFields::parse(&object)?;
        let shape = fields.shape.iter().map(|d| Value::Int(*d as i64)).collect();
        Ok(Decoded::Value(Value::map([
            ("dtype", Value::from(fields.dtype.name())),
            ("shape", Value::List(shape)),
            ("byte_order", Value::from(fields.byte_order.name())),
            ("data", Value::Bytes(fields.data)),
        ])))
    }
}

/// Restores plugin payloads through the plugin registry
#[derive(Debug, Clone)]
pub struct PluginHook {
    plugins: Arc<PluginRegistry>,
}

impl PluginHook {
    pub fn new(plugins: Arc<PluginRegistry>) -> Self {
        Self { plugins }
    }
}

impl DecodeHook for PluginHook {
    fn decode_object(&self, mut object: Map) -> Result<Decoded, CodecError> {
        let name = match object.get(PLUGIN_MARKER).and_then(Value::as_str) {
            Some(name) => name.to_string(),
            None => return Ok(Decoded::Object(object)),
        };
        match self.plugins.find(&name) {
            Some(plugin) => {
                let payload = object.remove("payload").unwrap_or_default();
                plugin.decode(payload).map(Decoded::Value)
            }
            None => {
                tracing::debug!("No codec plugin '{}' registered, keeping raw object", name);
                Ok(Decoded::Object(object))
            }
        }
    }
}

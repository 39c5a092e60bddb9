//! Value codec
//!
//! Encodes [`Value`]s to a self-describing JSON byte encoding and back. Anything
//! plain JSON cannot carry losslessly is written as a tagged object:
//!
//! ```text
//! bytes     {"__bytes__": "<base64>"}
//! float     {"__float__": "nan" | "inf" | "-inf"}
//! buffer    {"__buffer__": true, "dtype": "float32", "shape": [2, 2],
//!            "byte_order": "little", "data": "<base64>"}
//! plugin    {"__plugin__": "decimal", "payload": <value>}
//! ```
//!
//! Tagged objects may appear at any nesting depth up to [`MAX_NESTING`] JSON
//! containers; the encoder refuses deeper values so whatever it writes also
//! decodes. Maps whose keys collide with the reserved markers are not
//! representable.

use crate::error::CodecError;
use crate::hooks::{DecodeHook, Decoded, PluginHook, RawBufferHook, TypedBufferHook};
use crate::plugins::{CodecPlugin, PluginRegistry};
use crate::value::{Map, Value};
use crate::{BUFFER_MARKER, BYTES_MARKER, FLOAT_MARKER, PLUGIN_MARKER};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::{Map as JsonMap, Value as Json};
use std::sync::Arc;

/// Deepest JSON container nesting the encoder will produce
///
/// Stays under the decoder's recursion limit of 128.
pub const MAX_NESTING: usize = 100;

/// Encoder/decoder configured with plugins and a decode hook chain
#[derive(Debug, Clone)]
pub struct Codec {
    plugins: Arc<PluginRegistry>,
    hooks: Vec<Arc<dyn DecodeHook>>,
}

impl Default for Codec {
    fn default() -> Self {
        Self::new()
    }
}

impl Codec {
    /// Codec with the built-in plugins and typed buffer decoding
    pub fn new() -> Self {
        CodecBuilder::new().build()
    }

    pub fn builder() -> CodecBuilder {
        CodecBuilder::new()
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Encode a value to bytes
    pub fn encode(&self, value: &Value) -> Result<Vec<u8>, CodecError> {
        let json = self.encode_json(value)?;
        serde_json::to_vec(&json).map_err(|e| CodecError::unsupported_type(e.to_string()))
    }

    /// Decode bytes produced by [`Codec::encode`]
    pub fn decode(&self, bytes: &[u8]) -> Result<Value, CodecError> {
        let json: Json = serde_json::from_slice(bytes)?;
        self.decode_json(json)
    }

    /// Encode to the intermediate JSON tree
    pub fn encode_json(&self, value: &Value) -> Result<Json, CodecError> {
        self.encode_nested(value, 0)
    }

    /// `depth` counts the containers already open around `value`
    fn encode_nested(&self, value: &Value, depth: usize) -> Result<Json, CodecError> {
        let inner = match value {
            Value::List(_) | Value::Map(_) | Value::Bytes(_) | Value::Buffer(_) => depth + 1,
            Value::Extension(_) => depth + 1,
            Value::Float(f) if !f.is_finite() => depth + 1,
            _ => depth,
        };
        // buffers open a second container for their shape
        let deepest = if matches!(value, Value::Buffer(_)) { inner + 1 } else { inner };
        if deepest > MAX_NESTING {
            return Err(CodecError::TooDeep { limit: MAX_NESTING });
        }
        Ok(match value {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Int(i) => Json::from(*i),
            Value::Float(f) => match serde_json::Number::from_f64(*f) {
                Some(n) => Json::Number(n),
                None => tagged(FLOAT_MARKER, Json::String(non_finite_name(*f).to_string())),
            },
            Value::Str(s) => Json::String(s.clone()),
            Value::Bytes(bytes) => tagged(BYTES_MARKER, Json::String(BASE64.encode(bytes))),
            Value::List(items) => Json::Array(
                items
                    .iter()
                    .map(|item| self.encode_nested(item, inner))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut object = JsonMap::with_capacity(map.len());
                for (key, item) in map {
                    object.insert(key.clone(), self.encode_nested(item, inner)?);
                }
                Json::Object(object)
            }
            Value::Buffer(buffer) => {
                let mut object = JsonMap::with_capacity(5);
                object.insert(BUFFER_MARKER.to_string(), Json::Bool(true));
                object.insert("dtype".to_string(), Json::from(buffer.dtype().name()));
                object.insert(
                    "shape".to_string(),
                    Json::Array(buffer.shape().iter().map(|d| Json::from(*d)).collect()),
                );
                object.insert(
                    "byte_order".to_string(),
                    Json::from(buffer.byte_order().name()),
                );
                object.insert(
                    "data".to_string(),
                    Json::String(BASE64.encode(buffer.as_bytes())),
                );
                Json::Object(object)
            }
            Value::Extension(ext) => {
                let (name, payload) = self.plugins.encode(ext.as_ref())?;
                let mut object = JsonMap::with_capacity(2);
                object.insert(PLUGIN_MARKER.to_string(), Json::from(name));
                object.insert("payload".to_string(), self.encode_nested(&payload, inner)?);
                Json::Object(object)
            }
        })
    }

    /// Decode from the intermediate JSON tree
    pub fn decode_json(&self, json: Json) -> Result<Value, CodecError> {
        Ok(match json {
            Json::Array(items) => Value::List(
                items
                    .into_iter()
                    .map(|item| self.decode_json(item))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(object) => {
                let mut map = Map::new();
                for (key, item) in object {
                    map.insert(key, self.decode_json(item)?);
                }
                self.decode_object(map)?
            }
            scalar => Value::from(scalar),
        })
    }

    fn decode_object(&self, map: Map) -> Result<Value, CodecError> {
        if map.len() == 1 {
            if let Some(Value::Str(text)) = map.get(BYTES_MARKER) {
                let bytes = BASE64
                    .decode(text)
                    .map_err(|e| CodecError::decode(0, format!("invalid byte blob: {}", e)))?;
                return Ok(Value::Bytes(bytes));
            }
            if let Some(Value::Str(text)) = map.get(FLOAT_MARKER) {
                return parse_non_finite(text).map(Value::Float);
            }
        }

        let mut object = map;
        for hook in &self.hooks {
            match hook.decode_object(object)? {
                Decoded::Value(value) => return Ok(value),
                Decoded::Object(unchanged) => object = unchanged,
            }
        }
        Ok(Value::Map(object))
    }
}

/// Builder for [`Codec`]
#[derive(Debug)]
pub struct CodecBuilder {
    plugins: PluginRegistry,
    extra_hooks: Vec<Arc<dyn DecodeHook>>,
    raw_buffers: bool,
}

impl Default for CodecBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecBuilder {
    pub fn new() -> Self {
        Self {
            plugins: PluginRegistry::with_builtin(),
            extra_hooks: Vec::new(),
            raw_buffers: false,
        }
    }

    /// Register an additional encode plugin
    pub fn plugin(mut self, plugin: Arc<dyn CodecPlugin>) -> Result<Self, CodecError> {
        self.plugins.register(plugin)?;
        Ok(self)
    }

    /// Add a decode hook that runs before the built-in hooks
    pub fn hook(mut self, hook: Arc<dyn DecodeHook>) -> Self {
        self.extra_hooks.push(hook);
        self
    }

    /// Decode buffer markers as raw byte maps instead of typed buffers
    pub fn raw_buffers(mut self, raw: bool) -> Self {
        self.raw_buffers = raw;
        self
    }

    pub fn build(self) -> Codec {
        let plugins = Arc::new(self.plugins);
        let mut hooks = self.extra_hooks;
        hooks.push(Arc::new(PluginHook::new(plugins.clone())));
        if self.raw_buffers {
            hooks.push(Arc::new(RawBufferHook));
        } else {
            hooks.push(Arc::new(TypedBufferHook));
        }
        Codec { plugins, hooks }
    }
}

fn tagged(marker: &str, value: Json) -> Json {
    let mut object = JsonMap::with_capacity(1);
    object.insert(marker.to_string(), value);
    Json::Object(object)
}

fn non_finite_name(f: f64) -> &'static str {
    if f.is_nan() {
        "nan"
    } else if f.is_sign_positive() {
        "inf"
    } else {
        "-inf"
    }
}

fn parse_non_finite(text: &str) -> Result<f64, CodecError> {
    match text {
        "nan" => Ok(f64::NAN),
        "inf" => Ok(f64::INFINITY),
        "-inf" => Ok(f64::NEG_INFINITY),
        other => Err(CodecError::decode(
            0,
            format!("unknown float marker '{}'", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::{ByteOrder, DType, TypedBuffer};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn sample() -> Value {
        let buf = TypedBuffer::from_slice(vec![2, 2], &[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        Value::map([
            ("x", Value::Int(1)),
            ("buf", Value::Buffer(buf)),
            ("name", Value::from("probe")),
        ])
    }

    #[test]
    fn test_round_trip_with_buffer() {
        let codec = Codec::new();
        let value = sample();
        let bytes = codec.encode(&value).unwrap();
        let decoded = codec.decode(&bytes).unwrap();
        assert_eq!(decoded, value);

        let buf = decoded.get("buf").and_then(Value::as_buffer).unwrap();
        assert_eq!(buf.dtype(), DType::Float32);
        assert_eq!(buf.shape(), &[2, 2]);
    }

    #[test]
    fn test_buffer_wire_layout() {
        let codec = Codec::new();
        let buf = TypedBuffer::from_slice(vec![3], &[7i16, 8, 9])
            .unwrap()
            .with_byte_order(ByteOrder::Big);
        let json = codec.encode_json(&Value::Buffer(buf)).unwrap();
        assert_eq!(json[BUFFER_MARKER], Json::Bool(true));
        assert_eq!(json["dtype"], "int16");
        assert_eq!(json["shape"], serde_json::json!([3]));
        assert_eq!(json["byte_order"], "big");
    }

    #[test]
    fn test_foreign_byte_order_is_corrected() {
        let codec = Codec::new();
        let foreign = match ByteOrder::native() {
            ByteOrder::Little => ByteOrder::Big,
            ByteOrder::Big => ByteOrder::Little,
        };
        let buf = TypedBuffer::from_slice(vec![2], &[0.25f64, -8.0])
            .unwrap()
            .with_byte_order(foreign);
        let decoded = codec
            .decode(&codec.encode(&Value::Buffer(buf)).unwrap())
            .unwrap();
        let buf = decoded.as_buffer().unwrap();
        assert_eq!(buf.byte_order(), ByteOrder::native());
        assert_eq!(buf.to_vec::<f64>().unwrap(), vec![0.25, -8.0]);
    }

    #[test]
    fn test_bytes_and_non_finite_floats() {
        let codec = Codec::new();
        let value = Value::List(vec![
            Value::Bytes(vec![0, 255, 10]),
            Value::Float(f64::NAN),
            Value::Float(f64::NEG_INFINITY),
            Value::Float(2.5),
        ]);
        let decoded = codec.decode(&codec.encode(&value).unwrap()).unwrap();
        assert_eq!(decoded, value);
    }

    #[test]
    fn test_decimal_extension() {
        let codec = Codec::new();
        let value = Value::map([("price", Value::extension(dec!(19.99)))]);
        let decoded = codec.decode(&codec.encode(&value).unwrap()).unwrap();
        assert_eq!(
            decoded.get("price").and_then(|v| v.as_extension::<Decimal>()),
            Some(&dec!(19.99))
        );
    }

    #[test]
    fn test_unsupported_extension_fails() {
        #[derive(Debug, PartialEq)]
        struct Opaque;

        let codec = Codec::new();
        let err = codec.encode(&Value::extension(Opaque)).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedType { .. }));
    }

    #[test]
    fn test_malformed_input_is_decode_error() {
        let codec = Codec::new();
        assert!(matches!(
            codec.decode(b"{not json").unwrap_err(),
            CodecError::Decode { .. }
        ));
        assert!(matches!(
            codec.decode(br#"{"__bytes__": "***"}"#).unwrap_err(),
            CodecError::Decode { .. }
        ));
    }

    #[test]
    fn test_nesting_limit_is_symmetric() {
        let codec = Codec::new();
        let nest = |levels: usize| {
            (0..levels).fold(Value::Int(1), |inner, _| Value::List(vec![inner]))
        };

        let deepest = nest(MAX_NESTING);
        let bytes = codec.encode(&deepest).unwrap();
        assert_eq!(codec.decode(&bytes).unwrap(), deepest);

        assert!(matches!(
            codec.encode(&nest(MAX_NESTING + 1)).unwrap_err(),
            CodecError::TooDeep { .. }
        ));
        let buried = (0..MAX_NESTING - 1)
            .fold(Value::Bytes(vec![1]), |inner, _| Value::List(vec![inner]));
        assert!(codec.encode(&buried).is_ok());
        let buried = Value::List(vec![buried]);
        assert!(codec.encode(&buried).is_err());
    }

    #[test]
    fn test_hostile_buffer_shape_is_decode_error() {
        let codec = Codec::new();
        let payload = br#"{"__buffer__":true,"dtype":"uint8","shape":[4294967296,4294967296,2],"byte_order":"little","data":""}"#;
        let err = codec.decode(payload).unwrap_err();
        assert!(err.is_decode_error());

        let payload = br#"{"__buffer__":true,"dtype":"float64","shape":[2,0],"byte_order":"little","data":""}"#;
        assert!(codec.decode(payload).unwrap_err().is_decode_error());
    }

    #[test]
    fn test_raw_buffer_codec() {
        let codec = Codec::builder().raw_buffers(true).build();
        let decoded = codec.decode(&Codec::new().encode(&sample()).unwrap()).unwrap();
        let raw = decoded.get("buf").unwrap();
        assert!(raw.as_buffer().is_none());
        assert_eq!(
            raw.get("data").map(|d| d.kind()),
            Some("bytes"),
            "buffer should stay as raw bytes"
        );
    }

    #[test]
    fn test_custom_hook_runs_first() {
        #[derive(Debug)]
        struct Redact;

        impl DecodeHook for Redact {
            fn decode_object(&self, object: Map) -> Result<Decoded, CodecError> {
                if object.contains_key("secret") {
                    return Ok(Decoded::Value(Value::from("<redacted>")));
                }
                Ok(Decoded::Object(object))
            }
        }

        let codec = Codec::builder().hook(Arc::new(Redact)).build();
        let value = Value::List(vec![Value::map([("secret", Value::Int(42))])]);
        let decoded = codec.decode(&codec.encode(&value).unwrap()).unwrap();
        assert_eq!(decoded, Value::List(vec![Value::from("<redacted>")]));
    }
}

//! Codec plugins for values the base encoder does not recognise
//!
//! A plugin claims [`Value::Extension`] payloads of the types it understands,
//! turns them into an ordinary [`Value`] for the wire, and restores them when the
//! decode hook meets the plugin marker.

use crate::error::CodecError;
use crate::value::{ExtensionValue, Value};
use rust_decimal::Decimal;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::Arc;

/// Encoder/decoder pair for one family of extension values
pub trait CodecPlugin: Send + Sync + Debug {
    /// Name written to the wire marker; must be unique within a registry
    fn name(&self) -> &'static str;

    /// Encode the value if this plugin owns its type, `None` otherwise
    fn encode(&self, value: &dyn ExtensionValue) -> Option<Result<Value, CodecError>>;

    /// Restore a value from the payload this plugin produced
    fn decode(&self, payload: Value) -> Result<Value, CodecError>;
}

/// Ordered set of codec plugins
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: Vec<Arc<dyn CodecPlugin>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the plugins shipped with the codec
    pub fn with_builtin() -> Self {
        Self {
            plugins: vec![Arc::new(DecimalPlugin)],
        }
    }

    /// Add a plugin; names must be unique
    pub fn register(&mut self, plugin: Arc<dyn CodecPlugin>) -> Result<(), CodecError> {
        if self.find(plugin.name()).is_some() {
            return Err(CodecError::plugin(
                plugin.name(),
                "a plugin with this name is already registered",
            ));
        }
        tracing::debug!("Registered codec plugin '{}'", plugin.name());
        self.plugins.push(plugin);
        Ok(())
    }

    pub fn find(&self, name: &str) -> Option<&Arc<dyn CodecPlugin>> {
        self.plugins.iter().find(|p| p.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.plugins.iter().map(|p| p.name())
    }

    /// Offer the value to each plugin in registration order
    pub fn encode(&self, value: &dyn ExtensionValue) -> Result<(&'static str, Value), CodecError> {
        for plugin in &self.plugins {
            if let Some(encoded) = plugin.encode(value) {
                return encoded.map(|payload| (plugin.name(), payload));
            }
        }
        Err(CodecError::unsupported_type(value.type_name()))
    }
}

/// Encodes `rust_decimal::Decimal` as its exact string form
#[derive(Debug, Clone, Copy, Default)]
pub struct DecimalPlugin;

impl CodecPlugin for DecimalPlugin {
    fn name(&self) -> &'static str {
        "decimal"
    }

    fn encode(&self, value: &dyn ExtensionValue) -> Option<Result<Value, CodecError>> {
        value
            .as_any()
            .downcast_ref::<Decimal>()
            .map(|d| Ok(Value::Str(d.to_string())))
    }

    fn decode(&self, payload: Value) -> Result<Value, CodecError> {
        let text = payload
            .as_str()
            .ok_or_else(|| CodecError::plugin(self.name(), "payload is not a string"))?;
        Decimal::from_str(text)
            .map(Value::extension)
            .map_err(|e| CodecError::plugin(self.name(), e.to_string()))
    }
}

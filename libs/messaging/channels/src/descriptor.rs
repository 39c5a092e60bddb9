//! Channel descriptors
//!
//! A descriptor names the registry entry a channel is built from plus the
//! endpoint and options it is bound to. It cannot change once a channel owns it.

use crate::error::ChannelError;
use config::{ChannelOptions, ChannelSettings, ConduitConfig};
use std::fmt;

/// Data kinds with built-in channel implementations
pub mod kinds {
    /// Any codec value
    pub const NATIVE_OBJECT: &str = "NativeObject";
    /// Typed buffer frames of `[height, width]` or `[height, width, 3]`
    pub const IMAGE: &str = "Image";
    /// Float32 `[chunk, channels]` sample buffers plus a sample rate
    pub const AUDIO_CHUNK: &str = "AudioChunk";
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    data_kind: String,
    transport: String,
    endpoint: String,
    options: ChannelOptions,
}

impl ChannelDescriptor {
    pub fn new(
        data_kind: impl Into<String>,
        transport: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            data_kind: data_kind.into(),
            transport: transport.into(),
            endpoint: endpoint.into(),
            options: ChannelOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ChannelOptions) -> Self {
        self.options = options;
        self
    }

    /// Descriptor for a configured channel
    pub fn from_settings(settings: &ChannelSettings, default_transport: &str) -> Self {
        Self {
            data_kind: settings.data_kind.clone(),
            transport: settings.transport_or(default_transport).to_string(),
            endpoint: settings.endpoint.clone(),
            options: settings.options.clone(),
        }
    }

    /// Descriptor for the `[channels.<name>]` table of a configuration
    pub fn from_config(config: &ConduitConfig, name: &str) -> Result<Self, ChannelError> {
        let settings = config.channel(name).ok_or_else(|| {
            ChannelError::invalid_descriptor(format!("no channel named '{}' in configuration", name))
        })?;
        let descriptor = Self::from_settings(settings, &config.global.default_transport);
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub fn data_kind(&self) -> &str {
        &self.data_kind
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.options
    }

    pub fn should_wait(&self) -> bool {
        self.options.should_wait
    }

    /// Reject descriptors no registry entry could match
    pub fn validate(&self) -> Result<(), ChannelError> {
        if self.data_kind.trim().is_empty() {
            return Err(ChannelError::invalid_descriptor("data kind is empty"));
        }
        if self.transport.trim().is_empty() {
            return Err(ChannelError::invalid_descriptor(format!(
                "transport is empty for endpoint '{}'",
                self.endpoint
            )));
        }
        if self.endpoint.trim().is_empty() {
            return Err(ChannelError::invalid_descriptor(format!(
                "endpoint is empty for {} on '{}'",
                self.data_kind, self.transport
            )));
        }
        if self.options.queue_size == 0 {
            return Err(ChannelError::invalid_descriptor(format!(
                "queue_size of '{}' must be at least 1",
                self.endpoint
            )));
        }
        Ok(())
    }
}

impl fmt::Display for ChannelDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.data_kind, self.transport, self.endpoint)
    }
}

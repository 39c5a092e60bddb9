//! Per-channel configuration

use crate::defaults;
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;

/// Role a communicator plays for one named channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    Publish,
    Listen,
    Reply,
    Request,
    Disable,
}

impl Mode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Publish => "publish",
            Mode::Listen => "listen",
            Mode::Reply => "reply",
            Mode::Request => "request",
            Mode::Disable => "disable",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "publish" => Ok(Mode::Publish),
            "listen" => Ok(Mode::Listen),
            "reply" => Ok(Mode::Reply),
            "request" => Ok(Mode::Request),
            "disable" => Ok(Mode::Disable),
            other => Err(format!(
                "unknown mode '{}' (expected publish, listen, reply, request or disable)",
                other
            )),
        }
    }
}

/// Options carried by a channel descriptor
///
/// Unset dimensions accept any value; configuration files may also spell that
/// as `-1`. For audio channels an unset `chunk`
/// or `channels` is adopted from the first published chunk.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ChannelOptions {
    /// Block in `establish` until connected instead of deferring to the watchdog
    pub should_wait: bool,
    /// Inbound queue capacity of listeners
    pub queue_size: usize,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "any_if_negative"
    )]
    pub width: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "any_if_negative"
    )]
    pub height: Option<u32>,
    /// Image frames carry three colour planes
    pub rgb: bool,
    /// Image frames are float32 instead of uint8
    pub fp: bool,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "any_if_negative"
    )]
    pub channels: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "any_if_negative"
    )]
    pub rate: Option<u32>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        deserialize_with = "any_if_negative"
    )]
    pub chunk: Option<u32>,
}

/// Reads a dimension where a negative number means "accept any"
fn any_if_negative<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    match Option::<i64>::deserialize(deserializer)? {
        Some(n) if n < 0 => Ok(None),
        Some(n) => u32::try_from(n).map(Some).map_err(|_| {
            serde::de::Error::custom(format!("dimension {} does not fit in 32 bits", n))
        }),
        None => Ok(None),
    }
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            should_wait: true,
            queue_size: defaults::LISTENER_QUEUE_SIZE,
            width: None,
            height: None,
            rgb: true,
            fp: false,
            channels: None,
            rate: None,
            chunk: None,
        }
    }
}

impl ChannelOptions {
    /// Options for a channel that never blocks on establishment
    pub fn non_blocking() -> Self {
        Self {
            should_wait: false,
            ..Self::default()
        }
    }

    pub fn with_should_wait(mut self, should_wait: bool) -> Self {
        self.should_wait = should_wait;
        self
    }

    pub fn with_queue_size(mut self, queue_size: usize) -> Self {
        self.queue_size = queue_size;
        self
    }

    /// Fix the frame geometry of an image channel
    pub fn with_image(mut self, width: u32, height: u32, rgb: bool, fp: bool) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self.rgb = rgb;
        self.fp = fp;
        self
    }

    /// Fix the stream layout of an audio channel
    pub fn with_audio(mut self, rate: u32, chunk: u32, channels: u32) -> Self {
        self.rate = Some(rate);
        self.chunk = Some(chunk);
        self.channels = Some(channels);
        self
    }
}

/// One `[channels.<name>]` table
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChannelSettings {
    pub data_kind: String,
    /// Falls back to `global.default_transport` when absent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transport: Option<String>,
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(flatten)]
    pub options: ChannelOptions,
}

impl ChannelSettings {
    pub fn new(data_kind: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            data_kind: data_kind.into(),
            transport: None,
            endpoint: endpoint.into(),
            mode: None,
            options: ChannelOptions::default(),
        }
    }

    /// Transport for this channel given the global default
    pub fn transport_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.transport.as_deref().unwrap_or(default)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_parsing() {
        assert_eq!("publish".parse::<Mode>().unwrap(), Mode::Publish);
        assert_eq!(" Listen ".parse::<Mode>().unwrap(), Mode::Listen);
        assert_eq!("disable".parse::<Mode>().unwrap(), Mode::Disable);
        assert!("broadcast".parse::<Mode>().is_err());
        assert_eq!(Mode::Reply.to_string(), "reply");
    }

    #[test]
    fn test_option_defaults() {
        let options = ChannelOptions::default();
        assert!(options.should_wait);
        assert_eq!(options.queue_size, defaults::LISTENER_QUEUE_SIZE);
        assert!(options.rgb);
        assert!(!options.fp);
        assert_eq!(options.width, None);

        assert!(!ChannelOptions::non_blocking().should_wait);
    }

    #[test]
    fn test_negative_dimensions_accept_any() {
        let options: ChannelOptions =
            serde_json::from_str(r#"{"width": -1, "height": 480, "chunk": -1}"#).unwrap();
        assert_eq!(options.width, None);
        assert_eq!(options.height, Some(480));
        assert_eq!(options.chunk, None);

        assert!(serde_json::from_str::<ChannelOptions>(r#"{"width": 5000000000}"#).is_err());
    }

    #[test]
    fn test_transport_fallback() {
        let mut settings = ChannelSettings::new("NativeObject", "/cam");
        assert_eq!(settings.transport_or("memory"), "memory");
        settings.transport = Some("zeromq".to_string());
        assert_eq!(settings.transport_or("memory"), "zeromq");
    }
}

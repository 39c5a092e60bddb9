//! Layered Conduit configuration
//!
//! Loading order, later layers winning:
//! 1. base TOML file (`config/conduit.toml` unless a path is given)
//! 2. `environments/<env>.toml` next to the base file, when an environment is named
//! 3. `CONDUIT_*` environment variables, nested keys separated by `__`
//!    (e.g. `CONDUIT_GLOBAL__FALLBACK_ON_MISSING=true`)

use crate::channel::ChannelSettings;
use crate::defaults;
use anyhow::{bail, Context, Result};
use config_crate::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Free-form options handed to a transport activator
pub type TransportOptions = BTreeMap<String, serde_json::Value>;

/// Complete configuration of a Conduit process
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConduitConfig {
    pub global: GlobalConfig,
    pub establish: EstablishConfig,
    pub transports: HashMap<String, TransportOptions>,
    pub channels: HashMap<String, ChannelSettings>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GlobalConfig {
    /// Transport used by channels that do not name one
    pub default_transport: String,
    /// Substitute fallback channels for unregistered (data kind, transport) pairs
    pub fallback_on_missing: bool,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            default_transport: defaults::default_transport(),
            fallback_on_missing: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EstablishConfig {
    pub poll_interval_ms: u64,
    pub watchdog_interval_ms: u64,
}

impl Default for EstablishConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: defaults::POLL_INTERVAL_MS,
            watchdog_interval_ms: defaults::WATCHDOG_INTERVAL_MS,
        }
    }
}

impl EstablishConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_millis(self.watchdog_interval_ms)
    }
}

impl ConduitConfig {
    /// Load configuration from files with environment overrides
    pub fn load(base_path: Option<&Path>, environment: Option<&str>) -> Result<Self> {
        let explicit = base_path.is_some();
        let base = base_path.unwrap_or(Path::new(defaults::DEFAULT_CONFIG_PATH));

        let mut builder = Config::builder().add_source(File::from(base).required(explicit));
        if !explicit && !base.exists() {
            debug!("No config file at {:?}, using defaults", base);
        }

        if let Some(env) = environment {
            let env_file = environments_dir(base).join(format!("{}.toml", env));
            if env_file.exists() {
                info!("Loading environment config: {:?}", env_file);
                builder = builder.add_source(File::from(env_file));
            } else {
                warn!("Environment config not found: {:?}", env_file);
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(defaults::ENV_PREFIX)
                .prefix_separator("_")
                .separator(defaults::ENV_SEPARATOR)
                .try_parsing(true),
        );

        let config = builder.build().context("Failed to build configuration")?;
        let mut parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        if let Ok(transport) = std::env::var(defaults::DEFAULT_TRANSPORT_ENV) {
            if !transport.trim().is_empty() {
                debug!("Default transport overridden by environment: {}", transport);
                parsed.global.default_transport = transport;
            }
        }

        parsed.validate()?;
        Ok(parsed)
    }

    /// Parse an inline TOML document without file or environment layers
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from_str(contents, FileFormat::Toml))
            .build()
            .context("Failed to parse configuration")?;
        let parsed: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Render the effective configuration as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }

    /// Reject settings no channel could be built from
    pub fn validate(&self) -> Result<()> {
        if self.global.default_transport.trim().is_empty() {
            bail!("global.default_transport must not be empty");
        }
        if self.establish.poll_interval_ms == 0 {
            bail!("establish.poll_interval_ms must be positive");
        }
        if self.establish.watchdog_interval_ms == 0 {
            bail!("establish.watchdog_interval_ms must be positive");
        }
        for (name, channel) in &self.channels {
            if channel.data_kind.trim().is_empty() {
                bail!("channel '{}' has an empty data_kind", name);
            }
            if channel.endpoint.trim().is_empty() {
                bail!("channel '{}' has an empty endpoint", name);
            }
            if matches!(&channel.transport, Some(t) if t.trim().is_empty()) {
                bail!("channel '{}' names an empty transport", name);
            }
            if channel.options.queue_size == 0 {
                bail!("channel '{}' needs a queue_size of at least 1", name);
            }
        }
        Ok(())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelSettings> {
        self.channels.get(name)
    }

    /// Options for a transport, empty when it has no table
    pub fn transport_options(&self, transport: &str) -> TransportOptions {
        self.transports.get(transport).cloned().unwrap_or_default()
    }

    /// Resolved transport of a named channel
    pub fn channel_transport(&self, name: &str) -> Option<&str> {
        self.channels
            .get(name)
            .map(|channel| channel.transport_or(&self.global.default_transport))
    }
}

fn environments_dir(base: &Path) -> PathBuf {
    match base.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.join("environments"),
        _ => PathBuf::from("environments"),
    }
}

/// Convenience function to load configuration from the default location
pub fn load_config(environment: Option<&str>) -> Result<ConduitConfig> {
    ConduitConfig::load(None, environment)
}

//! Default values shared by every Conduit crate

use std::time::Duration;

/// Transport used when a channel does not name one
pub const DEFAULT_TRANSPORT: &str = "memory";

/// Environment variable overriding [`DEFAULT_TRANSPORT`]
pub const DEFAULT_TRANSPORT_ENV: &str = "CONDUIT_DEFAULT_TRANSPORT";

/// Prefix for environment overrides of configuration keys
pub const ENV_PREFIX: &str = "CONDUIT";

/// Separator between nested keys in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Base configuration file consulted by [`crate::ConduitConfig::load`]
pub const DEFAULT_CONFIG_PATH: &str = "config/conduit.toml";

/// Directory holding `<environment>.toml` overlays
pub const ENVIRONMENTS_DIR: &str = "config/environments";

/// Delay between connection probes while waiting for establishment
pub const POLL_INTERVAL_MS: u64 = 20;

/// Delay between watchdog sweeps
pub const WATCHDOG_INTERVAL_MS: u64 = 250;

/// Inbound queue capacity of a listener
pub const LISTENER_QUEUE_SIZE: usize = 8;

/// Pending request capacity of a service endpoint
pub const SERVICE_QUEUE_SIZE: usize = 1;

/// Poll timeout of a request/reply pump between shutdown checks
pub const PUMP_POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub fn poll_interval() -> Duration {
    Duration::from_millis(POLL_INTERVAL_MS)
}

pub fn watchdog_interval() -> Duration {
    Duration::from_millis(WATCHDOG_INTERVAL_MS)
}

/// Default transport, honouring [`DEFAULT_TRANSPORT_ENV`]
pub fn default_transport() -> String {
    std::env::var(DEFAULT_TRANSPORT_ENV)
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| DEFAULT_TRANSPORT.to_string())
}

//! # Conduit Configuration
//!
//! Layered configuration and shared defaults for Conduit channels.
//!
//! ## Features
//!
//! - **Defaults**: poll and watchdog intervals, queue capacities, default transport
//! - **Channel Settings**: data kind, transport, endpoint, mode and typed-payload options
//! - **Layered Loading**: TOML file, environment overlay, `CONDUIT_*` variables
//!
//! ## Usage
//!
//! ```rust
//! use config::{ConduitConfig, Mode};
//!
//! let config = ConduitConfig::from_toml_str(r#"
//! [channels.camera]
//! data_kind = "Image"
//! endpoint = "/cam/left"
//! mode = "publish"
//! width = 320
//! height = 240
//! "#).unwrap();
//!
//! let camera = config.channel("camera").unwrap();
//! assert_eq!(camera.mode, Some(Mode::Publish));
//! assert_eq!(config.channel_transport("camera"), Some("memory"));
//! ```

pub mod channel;
pub mod defaults;
pub mod settings;

// Re-export commonly used types
pub use channel::{ChannelOptions, ChannelSettings, Mode};
pub use settings::{load_config, ConduitConfig, EstablishConfig, GlobalConfig, TransportOptions};

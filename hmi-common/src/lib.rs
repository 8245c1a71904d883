//! SCADA HMI Common Library
//!
//! This crate provides shared types and utilities for the HMI communication core
//! and the display layer that consumes it:
//!
//! - [`value`] - Variable values (`Value`) and timestamps
//! - [`status`] - Connection state and status snapshots
//! - [`config`] - Configuration loading (JSON5 format) and logging settings
//! - [`error`] - Error types

pub mod config;
pub mod error;
pub mod status;
pub mod value;

// Re-export commonly used types at the crate root
pub use config::{LogFormat, LoggingConfig, load_config, parse_config};
pub use error::{Error, Result};
pub use status::{ConnectionState, ConnectionStatus};
pub use value::{Value, current_timestamp_millis};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over `config.level`. Text output omits the
/// target; JSON output is one object per event for log collectors.
///
/// ```ignore
/// let logging = LoggingConfig { level: "debug".into(), format: LogFormat::Json };
/// hmi_common::init_tracing(&logging)?;
/// ```
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| Error::Logging(format!("invalid level '{}': {}", config.level, e)))?,
    };

    let subscriber = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Text => subscriber.with(fmt::layer().with_target(false)).try_init(),
        LogFormat::Json => subscriber.with(fmt::layer().json()).try_init(),
    };

    installed.map_err(|e| Error::Logging(e.to_string()))
}

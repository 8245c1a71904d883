use thiserror::Error;

/// Errors raised while loading configuration or setting up logging.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

/// Result type alias using the common Error.
pub type Result<T> = std::result::Result<T, Error>;

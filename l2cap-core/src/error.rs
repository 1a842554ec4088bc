#![forbid(unsafe_code)]

//! Common error type for the tester crates.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TesterError {
    /// I/O related failures.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration parsing failures.
    #[error("Config parse error: {0}")]
    ConfigParse(toml::de::Error),

    /// A parameter block contradicts itself.
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),
}

/// Convenient alias for results throughout the tester crates.
pub type TesterResult<T> = Result<T, TesterError>;

//! Error types for basket construction and backtesting.

use thiserror::Error;

/// Main error type for the crate.
#[derive(Error, Debug)]
pub enum BasketError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Empty universe: {0}")]
    EmptyUniverse(String),

    #[error("No data loaded")]
    NoData,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

/// Result type alias for basket operations.
pub type Result<T> = std::result::Result<T, BasketError>;

//! CLI error types and conversions

use crate::dataset::DatasetError;
use crate::extractor::ExtractError;

/// CLI errors
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Extraction error
    #[error("extraction error: {0}")]
    ExtractError(#[from] ExtractError),

    /// Dataset error
    #[error("dataset error: {0}")]
    DatasetError(#[from] DatasetError),

    /// Invalid argument
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    ConfigurationError(String),

    /// Background operation did not report back
    #[error("operation '{0}' ended without a result")]
    NoResult(String),
}

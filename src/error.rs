//! Error types for the simulation pipeline.

use thiserror::Error;

/// Main error type for portfolio simulation and analytics.
#[derive(Error, Debug)]
pub enum FolioError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    #[error("Optimization error: {0}")]
    OptimizationError(String),

    #[error("Transient network failure: {0}")]
    TransientNetwork(String),

    #[error("Malformed response from data source: {0}")]
    MalformedResponse(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),
}

impl FolioError {
    /// Whether a retry against the data source is worthwhile.
    ///
    /// Only transient network failures qualify; a malformed response stays
    /// malformed no matter how often it is refetched.
    pub fn is_transient(&self) -> bool {
        matches!(self, FolioError::TransientNetwork(_))
    }
}

/// Result type alias for simulation operations.
pub type Result<T> = std::result::Result<T, FolioError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let transient = FolioError::TransientNetwork("connection reset".to_string());
        assert!(transient.is_transient());

        let malformed = FolioError::MalformedResponse("got HTML, expected JSON".to_string());
        assert!(!malformed.is_transient());

        let config = FolioError::ConfigError("bad method".to_string());
        assert!(!config.is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = FolioError::ConfigError("unsupported allocation method: magic".to_string());
        assert!(err.to_string().contains("magic"));
    }
}

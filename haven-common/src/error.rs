//! Error types for the haven toolkit
//!
//! Only resolution, configuration and data errors abort a run. Route and
//! scoring failures are absorbed per candidate by the selector and kept in
//! its failure log; the variants exist here so every layer speaks the same
//! taxonomy.

use thiserror::Error as ThisError;

/// Main error type for haven operations
#[derive(Debug, ThisError)]
pub enum Error {
    /// Nothing to match a query against; a reference join is unusable
    #[error("Cannot resolve '{query}': no candidates in {context}")]
    ResolutionFailure { query: String, context: String },

    /// Invalid run configuration, detected before any external call
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// A score input that would divide by zero or take the root of a non-positive number
    #[error("Degenerate score: {0}")]
    DegenerateScore(String),

    /// The router returned nothing usable for a candidate
    #[error("Route unavailable: {0}")]
    RouteUnavailable(String),

    /// HTTP-specific error (bad status, malformed payload, provider error status)
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network connectivity issues; these are retried
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Invalid parameters passed to an operation
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Malformed reference table or output serialization failure
    #[error("Data error: {0}")]
    DataError(String),

    /// File I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

impl Error {
    /// Whether the failure is transient and worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::NetworkError(_))
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        match err.into_kind() {
            csv::ErrorKind::Io(io) => Error::IoError(io),
            other => Error::DataError(format!("CSV: {other:?}")),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        if err.is_io() {
            Error::IoError(err.into())
        } else {
            Error::DataError(format!("JSON: {err}"))
        }
    }
}

#[cfg(feature = "http")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            Error::NetworkError(err.to_string())
        } else if err.is_decode() {
            Error::HttpError(format!("malformed response: {err}"))
        } else {
            Error::HttpError(err.to_string())
        }
    }
}

/// Convenience result type for haven operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_errors_are_retryable() {
        assert!(Error::NetworkError("reset".into()).is_retryable());
        assert!(!Error::HttpError("500".into()).is_retryable());
        assert!(!Error::Configuration("bad".into()).is_retryable());
    }

    #[test]
    fn test_resolution_failure_message() {
        let err = Error::ResolutionFailure {
            query: "Moldova".into(),
            context: "population table".into(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot resolve 'Moldova': no candidates in population table"
        );
    }

    #[test]
    fn test_json_error_maps_to_data_error() {
        let err: Error = serde_json::from_str::<serde_json::Value>("{not json")
            .unwrap_err()
            .into();
        assert!(matches!(err, Error::DataError(_)));
    }
}

// herringbone/src/error.rs

use std::fmt;
use std::io;

/// Custom error type for pipeline operations.
///
/// The taxonomy follows the failure-isolation rules of the pipeline:
/// input and config errors affect a single unit of work, transient store
/// errors are retried, and only an exhausted retry budget escalates to a
/// fatal stage error.
#[derive(Debug)]
pub enum HerringboneError {
    /// Malformed event or rule payload; the unit of work is skipped and logged
    InputError(String),
    /// Bad operator configuration (e.g. a rule regex that does not compile);
    /// the offending rule is disabled, other rules continue
    ConfigError(String),
    /// Transient data-store failure; retried with bounded backoff
    TransientStoreError(String),
    /// Incident reconciliation race; retried with a fresh read
    ConcurrencyConflict(String),
    /// Store unreachable beyond the retry budget; halts the affected stage
    FatalStageError(String),
    /// IO-related errors
    IoError(io::Error),
}

impl fmt::Display for HerringboneError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HerringboneError::InputError(e) => write!(f, "Input error: {}", e),
            HerringboneError::ConfigError(e) => write!(f, "Config error: {}", e),
            HerringboneError::TransientStoreError(e) => write!(f, "Transient store error: {}", e),
            HerringboneError::ConcurrencyConflict(e) => write!(f, "Concurrency conflict: {}", e),
            HerringboneError::FatalStageError(e) => write!(f, "Fatal stage error: {}", e),
            HerringboneError::IoError(e) => write!(f, "IO error: {}", e),
        }
    }
}

impl std::error::Error for HerringboneError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            HerringboneError::IoError(e) => Some(e),
            _ => None,
        }
    }
}

impl HerringboneError {
    /// Whether the operation that produced this error may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HerringboneError::TransientStoreError(_) | HerringboneError::ConcurrencyConflict(_)
        )
    }
}

impl From<io::Error> for HerringboneError {
    fn from(err: io::Error) -> Self {
        HerringboneError::IoError(err)
    }
}

impl From<serde_json::Error> for HerringboneError {
    fn from(err: serde_json::Error) -> Self {
        HerringboneError::InputError(format!("JSON parsing error: {}", err))
    }
}

impl From<serde_yaml::Error> for HerringboneError {
    fn from(err: serde_yaml::Error) -> Self {
        HerringboneError::ConfigError(format!("YAML parsing error: {}", err))
    }
}

impl From<regex::Error> for HerringboneError {
    fn from(err: regex::Error) -> Self {
        HerringboneError::ConfigError(format!("Regex error: {}", err))
    }
}

impl From<sled::Error> for HerringboneError {
    fn from(err: sled::Error) -> Self {
        HerringboneError::TransientStoreError(format!("Sled error: {}", err))
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, HerringboneError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(HerringboneError::TransientStoreError("timeout".into()).is_retryable());
        assert!(HerringboneError::ConcurrencyConflict("stale read".into()).is_retryable());
        assert!(!HerringboneError::ConfigError("bad regex".into()).is_retryable());
        assert!(!HerringboneError::FatalStageError("store down".into()).is_retryable());
    }

    #[test]
    fn test_display() {
        let e = HerringboneError::ConfigError("bad regex in rule r1".into());
        assert_eq!(e.to_string(), "Config error: bad regex in rule r1");
    }
}

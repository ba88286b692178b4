//! Error types for elibmetrics.
//!
//! Every fallible operation returns `Result<T, ElibError>`. The fetch layer
//! folds these into [`crate::fetch::FetchOutcome`] before they reach the
//! orchestrator, and the orchestrator is the only place that swallows them.

use thiserror::Error;

/// Main error type for elibmetrics operations.
#[derive(Debug, Error)]
pub enum ElibError {
    /// The remote site has no author with this identifier (terminal)
    #[error("author {0} not found")]
    NotFound(u32),

    /// Network error, timeout or unexpected page state (safe to retry later)
    #[error("transient failure: {0}")]
    Transient(String),

    /// Page content changed shape or carried unparseable numbers
    #[error("Parse error: {0}")]
    Parse(String),

    /// Browser automation error
    #[error("Browser error: {0}")]
    Browser(String),

    /// Optical character recognition error
    #[error("OCR error: {0}")]
    Ocr(String),

    /// Network/HTTP request error
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Record store error
    #[error("Store error: {0}")]
    Store(#[from] sqlx::Error),

    /// File I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV report error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(String),
}

impl ElibError {
    /// Whether a later run may succeed for the same identifier.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ElibError::Transient(_) | ElibError::Browser(_) | ElibError::Network(_)
        )
    }
}

/// Result type alias using `ElibError`
pub type Result<T> = std::result::Result<T, ElibError>;

/// Extension trait for adding context to Option types
pub trait OptionExt<T> {
    /// Convert Option to Result with a parse error message
    fn ok_or_parse(self, msg: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_parse(self, msg: &str) -> Result<T> {
        self.ok_or_else(|| ElibError::Parse(msg.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(ElibError::Transient("timeout".into()).is_transient());
        assert!(!ElibError::NotFound(7).is_transient());
        assert!(!ElibError::Parse("bad".into()).is_transient());
    }

    #[test]
    fn test_ok_or_parse() {
        let missing: Option<u32> = None;
        match missing.ok_or_parse("hirshIndex missing") {
            Err(ElibError::Parse(msg)) => assert_eq!(msg, "hirshIndex missing"),
            other => panic!("unexpected: {:?}", other),
        }
    }
}

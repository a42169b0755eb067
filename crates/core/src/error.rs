//! Error types for the codeloop domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each collaborator boundary has its own error enum.

use thiserror::Error;

/// The top-level error type for all codeloop operations.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    /// A provider failure the user can fix, with instructions attached
    #[error("Provider error: {source}\n\n{help}")]
    ProviderHelp { source: ProviderError, help: String },

    // --- Execution errors ---
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    // --- Computer state sync ---
    #[error("State sync failed: {0}")]
    Sync(String),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

/// Render an error together with its `source()` chain.
///
/// Used wherever a failure is shown to the model as console output, so the
/// model sees the underlying cause and not just the outermost wrapper.
pub fn report(err: &(dyn std::error::Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str("\n\nCaused by:\n    ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError { status_code: u16, message: String },

    #[error("Rate limited by provider: {message}")]
    RateLimited { message: String },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Max budget exceeded: spent ${spent_usd:.4} of ${max_usd:.4}")]
    BudgetExceeded { spent_usd: f64, max_usd: f64 },

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("Language not supported: {0}")]
    UnsupportedLanguage(String),

    #[error("Failed to start {language} runtime: {reason}")]
    SpawnFailed { language: String, reason: String },

    #[error("Runtime I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 500,
            message: "upstream failure".into(),
        });
        assert!(err.to_string().contains("500"));
        assert!(err.to_string().contains("upstream failure"));
    }

    #[test]
    fn budget_error_shows_amounts() {
        let err = ProviderError::BudgetExceeded {
            spent_usd: 1.5,
            max_usd: 1.0,
        };
        let text = err.to_string();
        assert!(text.contains("1.5000"));
        assert!(text.contains("1.0000"));
    }

    #[test]
    fn report_includes_cause_chain() {
        let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
        let err = Error::Execution(ExecutionError::Io(io));
        let text = report(&err);
        assert!(text.starts_with("Execution error"));
        assert!(text.contains("Caused by"));
        assert!(text.contains("pipe closed"));
    }

    #[test]
    fn provider_help_keeps_source_and_instructions() {
        let err = Error::ProviderHelp {
            source: ProviderError::AuthenticationFailed("bad key".into()),
            help: "Reset your key.".into(),
        };
        let text = err.to_string();
        assert!(text.contains("bad key"));
        assert!(text.ends_with("Reset your key."));
        assert!(std::error::Error::source(&err).is_some());
    }
}

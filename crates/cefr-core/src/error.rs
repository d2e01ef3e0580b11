//! Error types for the CEFR diagnostic engine.
//!
//! The core surfaces four domain failures to its caller (`NotFound`,
//! `AccessDenied`, `GenerationFailed`, `NoResponses`) alongside configuration,
//! storage and state-machine errors. Nothing in the core retries; the caller
//! decides how to present each failure.

use std::path::PathBuf;

/// A specialized `Result` type for diagnostic engine operations.
pub type Result<T> = std::result::Result<T, DiagError>;

/// Errors that can occur while running an exam.
#[derive(Debug, thiserror::Error)]
pub enum DiagError {
    // ========================================================================
    // Configuration Errors
    // ========================================================================
    /// Invalid JSON syntax in the configuration file.
    #[error("Invalid JSON in config file '{path}': {message}\n\nSuggestion: Validate your cefr.json with a JSON linter")]
    ConfigParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Description of the parse error.
        message: String,
    },

    /// Configuration validation failed.
    #[error("Invalid configuration: {message}\n\nSuggestion: {suggestion}")]
    ConfigValidationError {
        /// Description of the validation failure.
        message: String,
        /// Actionable suggestion for the user.
        suggestion: String,
    },

    // ========================================================================
    // Domain Errors
    // ========================================================================
    /// An exam or question does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of entity that was looked up ("exam", "question").
        entity: &'static str,
        /// Identifier that was looked up.
        id: String,
    },

    /// The caller does not own the exam, or the exam is in the wrong status
    /// for the requested operation.
    #[error("Access denied: {reason}")]
    AccessDenied {
        /// Why access was refused.
        reason: String,
    },

    /// The LLM gateway failed or returned a payload that does not match the
    /// expected schema.
    #[error("Question generation failed ({kind}): {message}\n\nSuggestion: {suggestion}")]
    GenerationFailed {
        /// Category of the failure.
        kind: GatewayErrorKind,
        /// Detailed error message.
        message: String,
        /// Actionable suggestion for the operator.
        suggestion: String,
    },

    /// `analyze` was called on an exam with no recorded responses.
    #[error("No responses recorded for exam {exam_id}")]
    NoResponses {
        /// The exam that was analysed.
        exam_id: String,
    },

    /// Results were requested for an exam that has not been analysed.
    #[error("Results for exam {exam_id} are not yet available (status: {status})")]
    NotAnalyzed {
        /// The exam whose results were requested.
        exam_id: String,
        /// The exam's current status.
        status: String,
    },

    /// The question already has a recorded answer in this exam.
    #[error("Question {question_id} was already answered in exam {exam_id}")]
    AlreadyAnswered {
        /// The exam.
        exam_id: String,
        /// The question that was answered again.
        question_id: String,
    },

    /// A request carried invalid input (empty answer, unknown skill, ...).
    #[error("Invalid request: {0}")]
    InvalidInput(String),

    // ========================================================================
    // State Machine Errors
    // ========================================================================
    /// Invalid exam status transition attempted.
    #[error("Invalid state transition: cannot go from {from} to {to}")]
    InvalidStateTransition {
        /// The current status.
        from: String,
        /// The attempted target status.
        to: String,
    },

    // ========================================================================
    // Storage Errors
    // ========================================================================
    /// The backing store failed.
    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // General I/O Errors
    // ========================================================================
    /// General I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Categories of LLM gateway failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayErrorKind {
    /// Authentication failure (invalid API key, expired credentials).
    Authentication,
    /// Rate limit exceeded.
    RateLimit,
    /// Server error (5xx responses).
    Server,
    /// Network connectivity issues or timeouts.
    Network,
    /// The reply was not valid JSON or violated the question schema.
    InvalidPayload,
    /// Other unclassified errors.
    Other,
}

impl std::fmt::Display for GatewayErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Authentication => write!(f, "authentication"),
            Self::RateLimit => write!(f, "rate_limit"),
            Self::Server => write!(f, "server"),
            Self::Network => write!(f, "network"),
            Self::InvalidPayload => write!(f, "invalid_payload"),
            Self::Other => write!(f, "other"),
        }
    }
}

impl GatewayErrorKind {
    /// Returns a suggestion message for this error kind.
    #[must_use]
    pub const fn suggestion(&self) -> &'static str {
        match self {
            Self::Authentication => "Check the gateway API key environment variable",
            Self::RateLimit => "Wait and request the question again",
            Self::Server => "Retry later; the LLM service may be experiencing issues",
            Self::Network => "Check network connectivity to the gateway base URL",
            Self::InvalidPayload => "Request the question again; the model reply was unusable",
            Self::Other => "Check the LLM provider's status page",
        }
    }

    /// Classifies an HTTP status code returned by the gateway.
    #[must_use]
    pub const fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Authentication,
            429 => Self::RateLimit,
            500..=599 => Self::Server,
            _ => Self::Other,
        }
    }
}

impl DiagError {
    /// Creates a new `ConfigParseError` with the given path and message.
    #[must_use]
    pub fn config_parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::ConfigParseError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Creates a new `ConfigValidationError` with the given message and suggestion.
    #[must_use]
    pub fn config_validation(message: impl Into<String>, suggestion: impl Into<String>) -> Self {
        Self::ConfigValidationError {
            message: message.into(),
            suggestion: suggestion.into(),
        }
    }

    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl std::fmt::Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Creates a new `AccessDenied` error.
    #[must_use]
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Creates a new `GenerationFailed` error with the suggestion for its kind.
    #[must_use]
    pub fn generation_failed(kind: GatewayErrorKind, message: impl Into<String>) -> Self {
        Self::GenerationFailed {
            kind,
            message: message.into(),
            suggestion: kind.suggestion().to_string(),
        }
    }

    /// Creates a new `NoResponses` error.
    #[must_use]
    pub fn no_responses(exam_id: impl std::fmt::Display) -> Self {
        Self::NoResponses {
            exam_id: exam_id.to_string(),
        }
    }

    /// Creates a new `NotAnalyzed` error.
    #[must_use]
    pub fn not_analyzed(exam_id: impl std::fmt::Display, status: impl std::fmt::Display) -> Self {
        Self::NotAnalyzed {
            exam_id: exam_id.to_string(),
            status: status.to_string(),
        }
    }

    /// Creates a new `AlreadyAnswered` error.
    #[must_use]
    pub fn already_answered(
        exam_id: impl std::fmt::Display,
        question_id: impl std::fmt::Display,
    ) -> Self {
        Self::AlreadyAnswered {
            exam_id: exam_id.to_string(),
            question_id: question_id.to_string(),
        }
    }

    /// Creates a new `InvalidStateTransition` error.
    #[must_use]
    pub fn invalid_transition(from: impl std::fmt::Display, to: impl std::fmt::Display) -> Self {
        Self::InvalidStateTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl std::fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Returns `true` if the same request may succeed when re-issued.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::GenerationFailed {
                kind: GatewayErrorKind::RateLimit
                    | GatewayErrorKind::Server
                    | GatewayErrorKind::Network
                    | GatewayErrorKind::InvalidPayload,
                ..
            }
        )
    }

    /// Returns `true` if the error was caused by the caller's request rather
    /// than by the engine or one of its collaborators.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::AccessDenied { .. }
                | Self::NoResponses { .. }
                | Self::NotAnalyzed { .. }
                | Self::AlreadyAnswered { .. }
                | Self::InvalidInput(_)
                | Self::InvalidStateTransition { .. }
        )
    }
}

//! Storage errors.

use cefr_core::DiagError;
use std::path::PathBuf;
use uuid::Uuid;

/// Result type for storage operations.
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Errors raised by [`crate::SqliteStore`] and question bank loading.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// SQLite returned an error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A JSON column or file could not be (de)serialized.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A stored row holds a value the domain types reject.
    #[error("Corrupt {table} row {id}: {message}")]
    Corrupt {
        /// Table the row came from.
        table: &'static str,
        /// Row identifier.
        id: String,
        /// What was wrong with it.
        message: String,
    },

    /// The connection mutex was poisoned by a panicking holder.
    #[error("Failed to lock connection: {0}")]
    LockPoisoned(String),

    /// A referenced exam does not exist.
    #[error("exam not found: {0}")]
    ExamNotFound(Uuid),

    /// A response was appended to an exam that is no longer in progress.
    #[error("exam {exam_id} is not in progress (status: {status})")]
    ExamClosed {
        /// The exam.
        exam_id: Uuid,
        /// Its current status.
        status: String,
    },

    /// An exam changed status after it was read.
    #[error("exam {exam_id} is now {current}; refusing to set it to {requested}")]
    StatusConflict {
        /// The exam.
        exam_id: Uuid,
        /// Status found in the database.
        current: String,
        /// Status the caller tried to write.
        requested: String,
    },

    /// The exam already holds a response to this question.
    #[error("question {question_id} was already answered in exam {exam_id}")]
    AlreadyAnswered {
        /// The exam.
        exam_id: Uuid,
        /// The question.
        question_id: Uuid,
    },

    /// The question bank file could not be read.
    #[error("Failed to read question bank '{path}': {source}\n\nSuggestion: Check the path passed to `cefr seed`")]
    BankRead {
        /// Path of the file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// An entry of the question bank is not a usable question.
    #[error("Invalid question #{index} in bank: {message}")]
    InvalidBankEntry {
        /// 1-based position in the bank.
        index: usize,
        /// Why it was rejected.
        message: String,
    },
}

impl StoreError {
    pub(crate) fn corrupt(table: &'static str, id: impl Into<String>, message: impl ToString) -> Self {
        Self::Corrupt {
            table,
            id: id.into(),
            message: message.to_string(),
        }
    }
}

impl From<StoreError> for DiagError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ExamNotFound(id) => Self::not_found("exam", id),
            StoreError::ExamClosed { .. } => Self::access_denied(err.to_string()),
            StoreError::StatusConflict {
                current, requested, ..
            } => Self::invalid_transition(current, requested),
            StoreError::AlreadyAnswered {
                exam_id,
                question_id,
            } => Self::already_answered(exam_id, question_id),
            other => Self::storage(other),
        }
    }
}

//! Exam session state for the diagnostic engine.
//!
//! An exam moves along a single path:
//! `InProgress` -> `PendingAnalysis` -> `Completed`. Responses may only be
//! appended while the exam is `InProgress`; a `Completed` exam may be
//! re-analysed, which overwrites its results.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DiagError, Result};
use crate::model::CefrLevel;

// ============================================================================
// ExamStatus
// ============================================================================

/// Current status of an exam session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamStatus {
    /// Questions are being served and answered.
    #[default]
    InProgress,
    /// The taker has submitted; results have not been computed yet.
    PendingAnalysis,
    /// Results have been computed and stored.
    Completed,
}

impl ExamStatus {
    /// Returns the snake_case name used on the wire and in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::InProgress => "in_progress",
            Self::PendingAnalysis => "pending_analysis",
            Self::Completed => "completed",
        }
    }

    /// Returns `true` for the terminal `Completed` status.
    ///
    /// # Examples
    ///
    /// ```
    /// use cefr_core::ExamStatus;
    ///
    /// assert!(ExamStatus::Completed.is_terminal());
    /// assert!(!ExamStatus::PendingAnalysis.is_terminal());
    /// ```
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed)
    }

    /// Returns `true` if responses may be appended in this status.
    #[must_use]
    pub const fn accepts_responses(&self) -> bool {
        matches!(self, Self::InProgress)
    }

    /// Returns `true` if the exam may be analysed in this status.
    #[must_use]
    pub const fn is_analyzable(&self) -> bool {
        matches!(self, Self::PendingAnalysis | Self::Completed)
    }
}

impl fmt::Display for ExamStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ExamStatus {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "in_progress" => Ok(Self::InProgress),
            "pending_analysis" => Ok(Self::PendingAnalysis),
            "completed" => Ok(Self::Completed),
            other => Err(DiagError::storage(format!("unknown exam status '{other}'"))),
        }
    }
}

// ============================================================================
// ExamType
// ============================================================================

/// Kind of exam the taker started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExamType {
    /// Initial placement test.
    Placement,
    /// Practice session (default).
    #[default]
    Practice,
    /// Full-length diagnostic.
    Full,
}

impl ExamType {
    /// Returns the snake_case name used on the wire and in storage.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Placement => "placement",
            Self::Practice => "practice",
            Self::Full => "full",
        }
    }
}

impl std::str::FromStr for ExamType {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "placement" => Ok(Self::Placement),
            "practice" => Ok(Self::Practice),
            "full" => Ok(Self::Full),
            other => Err(DiagError::InvalidInput(format!(
                "unknown exam type '{other}': expected one of 'placement', 'practice', 'full'"
            ))),
        }
    }
}

// ============================================================================
// ExamOutcome
// ============================================================================

/// Results written onto an exam when it is analysed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamOutcome {
    /// Overall percentage of correct answers.
    pub total_score: u8,
    /// Overall CEFR band.
    pub cefr_level: CefrLevel,
    /// Templated feedback text.
    pub feedback_summary: String,
}

// ============================================================================
// ExamSession
// ============================================================================

/// One user's attempt at an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSession {
    /// Exam identifier.
    pub id: Uuid,
    /// Owner of the exam.
    pub user_id: String,
    /// Kind of exam.
    pub exam_type: ExamType,
    /// Why the taker is learning English; shapes generated questions.
    pub learning_purpose: String,
    /// Current status.
    pub status: ExamStatus,
    /// Overall score once analysed.
    pub total_score: Option<u8>,
    /// Overall CEFR band once analysed.
    pub cefr_level: Option<CefrLevel>,
    /// Feedback text once analysed.
    pub feedback_summary: Option<String>,
    /// When the exam started.
    pub started_at: DateTime<Utc>,
    /// When the taker submitted the exam.
    pub ended_at: Option<DateTime<Utc>>,
    /// When the session was last modified.
    pub updated_at: DateTime<Utc>,
}

impl ExamSession {
    /// Creates a new in-progress exam for `user_id`.
    ///
    /// # Examples
    ///
    /// ```
    /// use cefr_core::{ExamSession, ExamStatus, ExamType};
    ///
    /// let exam = ExamSession::new("user-1", ExamType::Placement, "business");
    /// assert_eq!(exam.status, ExamStatus::InProgress);
    /// assert!(exam.cefr_level.is_none());
    /// ```
    #[must_use]
    pub fn new(
        user_id: impl Into<String>,
        exam_type: ExamType,
        learning_purpose: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            exam_type,
            learning_purpose: learning_purpose.into(),
            status: ExamStatus::InProgress,
            total_score: None,
            cefr_level: None,
            feedback_summary: None,
            started_at: now,
            ended_at: None,
            updated_at: now,
        }
    }

    /// Updates the `updated_at` timestamp to the current time.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Fails with `AccessDenied` unless `user_id` owns this exam.
    pub fn ensure_owned_by(&self, user_id: &str) -> Result<()> {
        if self.user_id == user_id {
            Ok(())
        } else {
            Err(DiagError::access_denied(format!(
                "exam {} does not belong to the caller",
                self.id
            )))
        }
    }

    /// Fails with `AccessDenied` unless the exam is still in progress.
    pub fn ensure_in_progress(&self) -> Result<()> {
        if self.status.accepts_responses() {
            Ok(())
        } else {
            Err(DiagError::access_denied(format!(
                "exam {} is not in progress (status: {})",
                self.id, self.status
            )))
        }
    }

    /// Moves the exam from `InProgress` to `PendingAnalysis`.
    pub fn submit(&mut self) -> Result<()> {
        if self.status != ExamStatus::InProgress {
            return Err(DiagError::invalid_transition(
                self.status,
                ExamStatus::PendingAnalysis,
            ));
        }
        self.status = ExamStatus::PendingAnalysis;
        self.ended_at = Some(Utc::now());
        self.touch();
        Ok(())
    }

    /// Records analysis results and moves the exam to `Completed`.
    ///
    /// Allowed from `PendingAnalysis`, and from `Completed` to overwrite a
    /// previous analysis.
    pub fn complete(&mut self, outcome: ExamOutcome) -> Result<()> {
        if !self.status.is_analyzable() {
            return Err(DiagError::invalid_transition(
                self.status,
                ExamStatus::Completed,
            ));
        }
        self.status = ExamStatus::Completed;
        self.total_score = Some(outcome.total_score);
        self.cefr_level = Some(outcome.cefr_level);
        self.feedback_summary = Some(outcome.feedback_summary);
        self.touch();
        Ok(())
    }

    /// Returns the stored outcome, if the exam has been analysed.
    #[must_use]
    pub fn outcome(&self) -> Option<ExamOutcome> {
        match (self.total_score, self.cefr_level, &self.feedback_summary) {
            (Some(total_score), Some(cefr_level), Some(feedback_summary)) => Some(ExamOutcome {
                total_score,
                cefr_level,
                feedback_summary: feedback_summary.clone(),
            }),
            _ => None,
        }
    }

    /// Returns the time between start and submission, or until now for an
    /// exam still in progress.
    #[must_use]
    pub fn elapsed(&self) -> chrono::Duration {
        self.ended_at.unwrap_or_else(Utc::now) - self.started_at
    }
}

// ============================================================================
// Tests
// ============================================================================

//! CEFR Report Generation
//!
//! Builds an [`ExamReport`] from an analysed exam and its responses. Reports
//! serialize to JSON for programmatic access or render to Markdown for the
//! exam taker.
//!
//! # Generators
//!
//! - [`json::JsonGenerator`] - JSON output, compact or pretty
//! - [`MarkdownGenerator`] - Human-readable Markdown
//!
//! # Example
//!
//! ```rust
//! use cefr_core::{ExamSession, ResponseRecord};
//! use cefr_report::{ExamReport, MarkdownGenerator};
//!
//! fn render(exam: &ExamSession, responses: &[ResponseRecord]) -> cefr_report::Result<String> {
//!     let report = ExamReport::from_exam(exam, responses)?;
//!     Ok(MarkdownGenerator::new(&report).generate())
//! }
//! ```

pub mod json;
mod markdown;

pub use markdown::MarkdownGenerator;

use cefr_core::scoring::{skill_scores, strong_skills, tally, weak_skills};
use cefr_core::{
    CefrLevel, DifficultyLevel, ExamSession, ExamStatus, ExamType, ResponseRecord, SkillType,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur during report generation.
#[derive(Debug, Error)]
pub enum ReportError {
    /// Failed to serialize the report to JSON.
    #[error("failed to serialize report: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Failed to write report files.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The exam cannot be reported on yet.
    #[error("exam {exam_id} has not been analysed (status: {status})\n\nSuggestion: Submit and analyse the exam before generating a report")]
    NotAnalyzed {
        /// The exam.
        exam_id: Uuid,
        /// Its current status.
        status: ExamStatus,
    },

    /// The responses do not belong to the exam.
    #[error("invalid report data: {0}")]
    InvalidData(String),
}

/// Result type for report operations.
pub type Result<T> = std::result::Result<T, ReportError>;

// ============================================================================
// ExamReport
// ============================================================================

/// Complete report on one analysed exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamReport {
    /// The exam.
    pub exam_id: Uuid,
    /// Owner of the exam.
    pub user_id: String,
    /// Kind of exam.
    pub exam_type: ExamType,
    /// Learning purpose the questions were shaped for.
    pub learning_purpose: String,
    /// Headline results.
    pub summary: ReportSummary,
    /// Stored feedback text.
    pub feedback_summary: String,
    /// One line per skill, in reporting order.
    pub skills: Vec<SkillLine>,
    /// Skills at or above the strong threshold.
    pub strong_skills: Vec<SkillType>,
    /// Skills below the weak threshold.
    pub weak_skills: Vec<SkillType>,
    /// Answers in the order they were given.
    pub timeline: Vec<TimelineEntry>,
}

/// Headline results of an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    /// Overall CEFR band.
    pub cefr_level: CefrLevel,
    /// Overall percentage of correct answers.
    pub total_score: u8,
    /// Questions answered.
    pub total_questions: usize,
    /// Questions answered correctly.
    pub correct_answers: usize,
    /// When the exam started.
    pub started_at: DateTime<Utc>,
    /// When the exam was submitted.
    pub ended_at: Option<DateTime<Utc>>,
    /// Seconds between start and submission.
    pub duration_seconds: u64,
}

/// Per-skill results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillLine {
    /// The skill.
    pub skill_type: SkillType,
    /// Correct answers.
    pub correct: usize,
    /// Answers given.
    pub total: usize,
    /// Percentage score, 0 when the skill was never asked.
    pub score: u8,
}

impl SkillLine {
    /// Returns `true` if the skill was asked at least once.
    #[must_use]
    pub const fn assessed(&self) -> bool {
        self.total > 0
    }
}

/// One answered question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    /// 1-based position within the exam.
    pub number: usize,
    /// When the answer was recorded.
    pub timestamp: DateTime<Utc>,
    /// Skill of the question.
    pub skill_type: SkillType,
    /// Difficulty of the question.
    pub difficulty_level: DifficultyLevel,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Seconds spent on the question.
    pub time_taken_seconds: u32,
}

impl ExamReport {
    /// Builds a report from a completed exam and its responses in creation order.
    pub fn from_exam(exam: &ExamSession, responses: &[ResponseRecord]) -> Result<Self> {
        let outcome = exam
            .outcome()
            .filter(|_| exam.status == ExamStatus::Completed)
            .ok_or(ReportError::NotAnalyzed {
                exam_id: exam.id,
                status: exam.status,
            })?;

        if let Some(stray) = responses.iter().find(|r| r.exam_id != exam.id) {
            return Err(ReportError::InvalidData(format!(
                "response {} belongs to exam {}, not {}",
                stray.id, stray.exam_id, exam.id
            )));
        }

        let scores = skill_scores(responses);
        let skills = tally(responses)
            .into_iter()
            .map(|(skill_type, tally)| SkillLine {
                skill_type,
                correct: tally.correct,
                total: tally.total,
                score: tally.score(),
            })
            .collect();

        let timeline = responses
            .iter()
            .enumerate()
            .map(|(i, r)| TimelineEntry {
                number: i + 1,
                timestamp: r.created_at,
                skill_type: r.skill_type,
                difficulty_level: r.difficulty_level,
                is_correct: r.is_correct,
                time_taken_seconds: r.time_taken_seconds,
            })
            .collect();

        Ok(Self {
            exam_id: exam.id,
            user_id: exam.user_id.clone(),
            exam_type: exam.exam_type,
            learning_purpose: exam.learning_purpose.clone(),
            summary: ReportSummary {
                cefr_level: outcome.cefr_level,
                total_score: outcome.total_score,
                total_questions: responses.len(),
                correct_answers: responses.iter().filter(|r| r.is_correct).count(),
                started_at: exam.started_at,
                ended_at: exam.ended_at,
                duration_seconds: u64::try_from(exam.elapsed().num_seconds()).unwrap_or(0),
            },
            feedback_summary: outcome.feedback_summary,
            skills,
            strong_skills: strong_skills(&scores),
            weak_skills: weak_skills(&scores),
            timeline,
        })
    }

    /// Average seconds spent per answered question.
    #[must_use]
    pub fn average_time_seconds(&self) -> u32 {
        let count = u32::try_from(self.timeline.len()).unwrap_or(u32::MAX);
        if count == 0 {
            return 0;
        }
        let total: u32 = self.timeline.iter().map(|e| e.time_taken_seconds).sum();
        total / count
    }
}

// ============================================================================
// Test fixtures
// ============================================================================


// ============================================================================
// Tests
// ============================================================================

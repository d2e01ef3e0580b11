//! Exam lifecycle facade used by the HTTP API and the CLI.
//!
//! [`ExamEngine`] owns the injected collaborators, enforces ownership and
//! status rules, and delegates to the [`AdaptiveSelector`] and
//! [`ScoringEngine`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{DiagError, Result};
use crate::exam::{ExamSession, ExamStatus, ExamType};
use crate::gateway::{HintPrompt, LlmGateway};
use crate::history::{summarize, ExamSummary, UserAnalytics, HISTORY_LIMIT};
use crate::model::{NewResponse, ResponseRecord, SkillType};
use crate::scoring::{tally, AnalysisResult, ScoringEngine, SkillTally};
use crate::selector::{AdaptiveSelector, Selection};
use crate::store::{ExamStore, InMemoryStore, QuestionStore, ResponseLog};

/// Learning purpose used when neither the request nor the engine names one.
pub const DEFAULT_PURPOSE: &str = "general";

/// An answer sent by the exam taker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerSubmission {
    /// The question being answered.
    pub question_id: Uuid,
    /// The chosen option key.
    pub user_answer: String,
    /// Seconds spent on the question.
    #[serde(default)]
    pub time_taken_seconds: u32,
}

/// Result of recording an answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerReceipt {
    /// The stored response.
    pub response_id: Uuid,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Short verdict for display.
    pub message: String,
    /// Answers recorded so far, including this one.
    pub questions_answered: usize,
}

/// How far an exam has progressed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamProgress {
    /// The exam.
    pub exam_id: Uuid,
    /// Current status.
    pub status: ExamStatus,
    /// Answers recorded so far.
    pub questions_answered: usize,
    /// Correct answers so far.
    pub correct_answers: usize,
}

/// A user's in-progress exam with its answered count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveExam {
    /// The exam.
    #[serde(flatten)]
    pub exam: ExamSession,
    /// Answers recorded so far.
    pub questions_answered: usize,
}

/// One answered question in the results view. The correct answer is only
/// revealed here, after analysis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultLine {
    /// The question.
    pub question_id: Uuid,
    /// Question text, when the question is still stored.
    pub question: Option<String>,
    /// Skill of the question.
    pub skill_type: SkillType,
    /// Answer given.
    pub user_answer: String,
    /// Correct answer, when the question is still stored.
    pub correct_answer: Option<String>,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Seconds spent.
    pub time_taken_seconds: u32,
}

/// Stored outcome of an analysed exam, with per-response detail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamResults {
    /// The completed exam.
    pub exam: ExamSession,
    /// Every answered question in order.
    pub responses: Vec<ResultLine>,
    /// Correct and total answers per skill.
    pub skill_breakdown: BTreeMap<SkillType, SkillTally>,
}

/// Runs exams against injected stores and an LLM gateway.
#[derive(Clone)]
pub struct ExamEngine {
    exams: Arc<dyn ExamStore>,
    questions: Arc<dyn QuestionStore>,
    responses: Arc<dyn ResponseLog>,
    gateway: Arc<dyn LlmGateway>,
    selector: AdaptiveSelector,
    scoring: ScoringEngine,
    default_purpose: String,
}

impl std::fmt::Debug for ExamEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExamEngine")
            .field("default_purpose", &self.default_purpose)
            .finish_non_exhaustive()
    }
}

impl ExamEngine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        exams: Arc<dyn ExamStore>,
        questions: Arc<dyn QuestionStore>,
        responses: Arc<dyn ResponseLog>,
        gateway: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            selector: AdaptiveSelector::new(
                Arc::clone(&questions),
                Arc::clone(&responses),
                Arc::clone(&gateway),
            ),
            scoring: ScoringEngine::new(Arc::clone(&exams), Arc::clone(&responses)),
            exams,
            questions,
            responses,
            gateway,
            default_purpose: DEFAULT_PURPOSE.to_string(),
        }
    }

    /// Creates an engine backed by a single in-memory store.
    #[must_use]
    pub fn in_memory(store: Arc<InMemoryStore>, gateway: Arc<dyn LlmGateway>) -> Self {
        Self::new(store.clone(), store.clone(), store, gateway)
    }

    /// Sets the learning purpose used when a new exam does not name one.
    #[must_use]
    pub fn with_default_purpose(mut self, purpose: impl Into<String>) -> Self {
        self.default_purpose = purpose.into();
        self
    }

    async fn owned_exam(&self, exam_id: Uuid, user_id: &str) -> Result<ExamSession> {
        let exam = self
            .exams
            .get(exam_id)
            .await?
            .ok_or_else(|| DiagError::not_found("exam", exam_id))?;
        exam.ensure_owned_by(user_id)?;
        Ok(exam)
    }

    /// Starts a new in-progress exam.
    pub async fn start_exam(
        &self,
        user_id: &str,
        exam_type: ExamType,
        purpose: Option<&str>,
    ) -> Result<ExamSession> {
        if user_id.trim().is_empty() {
            return Err(DiagError::InvalidInput("user id must not be empty".to_string()));
        }
        let purpose = purpose
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .unwrap_or(&self.default_purpose);

        let exam = ExamSession::new(user_id, exam_type, purpose);
        self.exams.create(&exam).await?;
        info!(
            exam_id = %exam.id,
            user_id = %user_id,
            exam_type = exam.exam_type.as_str(),
            "Exam started"
        );
        Ok(exam)
    }

    /// Returns the user's newest in-progress exam, if any.
    pub async fn active_exam(&self, user_id: &str) -> Result<Option<ActiveExam>> {
        let Some(exam) = self.exams.active_for_user(user_id).await? else {
            return Ok(None);
        };
        let questions_answered = self.responses.all_for_exam(exam.id).await?.len();
        Ok(Some(ActiveExam {
            exam,
            questions_answered,
        }))
    }

    /// Selects the next question of an in-progress exam.
    pub async fn next_question(&self, exam_id: Uuid, user_id: &str) -> Result<Selection> {
        let exam = self.owned_exam(exam_id, user_id).await?;
        exam.ensure_in_progress()?;
        self.selector
            .select_next(exam_id, &exam.learning_purpose)
            .await
    }

    /// Grades and records an answer.
    pub async fn submit_answer(
        &self,
        exam_id: Uuid,
        user_id: &str,
        submission: AnswerSubmission,
    ) -> Result<AnswerReceipt> {
        let exam = self.owned_exam(exam_id, user_id).await?;
        exam.ensure_in_progress()?;

        if submission.user_answer.trim().is_empty() {
            return Err(DiagError::InvalidInput("answer must not be empty".to_string()));
        }

        let question = self
            .questions
            .get(submission.question_id)
            .await?
            .ok_or_else(|| DiagError::not_found("question", submission.question_id))?;
        let is_correct = question.is_correct(&submission.user_answer);

        let record = self
            .responses
            .append(NewResponse {
                exam_id,
                question_id: question.id,
                skill_type: question.skill_type,
                difficulty_level: question.difficulty_level,
                user_answer: submission.user_answer,
                is_correct,
                time_taken_seconds: submission.time_taken_seconds,
            })
            .await?;
        let questions_answered = self.responses.all_for_exam(exam_id).await?.len();

        info!(
            exam_id = %exam_id,
            question_id = %question.id,
            is_correct,
            "Answer recorded"
        );
        Ok(AnswerReceipt {
            response_id: record.id,
            is_correct,
            message: if is_correct { "Correct!" } else { "Incorrect" }.to_string(),
            questions_answered,
        })
    }

    /// Moves an exam to pending analysis.
    pub async fn submit_exam(&self, exam_id: Uuid, user_id: &str) -> Result<ExamSession> {
        let mut exam = self.owned_exam(exam_id, user_id).await?;
        let read_status = exam.status;
        exam.submit()?;
        self.exams.update(&exam, read_status).await?;
        info!(exam_id = %exam_id, user_id = %user_id, "Exam submitted");
        Ok(exam)
    }

    /// Scores a submitted exam and marks it completed.
    pub async fn analyze(&self, exam_id: Uuid, user_id: &str) -> Result<AnalysisResult> {
        self.scoring.analyze(exam_id, user_id).await
    }

    /// Asks the gateway for a hint on one question of an in-progress exam.
    pub async fn hint(&self, exam_id: Uuid, user_id: &str, question_id: Uuid) -> Result<String> {
        let exam = self.owned_exam(exam_id, user_id).await?;
        exam.ensure_in_progress()?;

        let question = self
            .questions
            .get(question_id)
            .await?
            .ok_or_else(|| DiagError::not_found("question", question_id))?;

        self.gateway
            .generate_hint(&HintPrompt {
                content: question.content,
                skill_type: question.skill_type,
                difficulty_level: question.difficulty_level,
            })
            .await
            .map_err(|e| {
                warn!(exam_id = %exam_id, question_id = %question_id, error = %e, "Hint generation failed");
                e
            })
    }

    /// Returns the stored outcome of a completed exam.
    pub async fn results(&self, exam_id: Uuid, user_id: &str) -> Result<ExamResults> {
        let exam = self.owned_exam(exam_id, user_id).await?;
        if exam.status != ExamStatus::Completed {
            return Err(DiagError::not_analyzed(exam_id, exam.status));
        }

        let records = self.responses.all_for_exam(exam_id).await?;
        let skill_breakdown = tally(&records);

        let mut responses = Vec::with_capacity(records.len());
        for record in records {
            let question = self.questions.get(record.question_id).await?;
            responses.push(ResultLine {
                question_id: record.question_id,
                question: question.as_ref().map(|q| q.content.clone()),
                skill_type: record.skill_type,
                user_answer: record.user_answer,
                correct_answer: question.map(|q| q.correct_answer),
                is_correct: record.is_correct,
                time_taken_seconds: record.time_taken_seconds,
            });
        }

        Ok(ExamResults {
            exam,
            responses,
            skill_breakdown,
        })
    }

    /// Returns an owned exam and all of its responses in order.
    pub async fn exam_with_responses(
        &self,
        exam_id: Uuid,
        user_id: &str,
    ) -> Result<(ExamSession, Vec<ResponseRecord>)> {
        let exam = self.owned_exam(exam_id, user_id).await?;
        let responses = self.responses.all_for_exam(exam_id).await?;
        Ok((exam, responses))
    }

    /// Lists the user's most recent exams, newest first.
    pub async fn history(&self, user_id: &str) -> Result<Vec<ExamSummary>> {
        let exams = self.exams.list_for_user(user_id, HISTORY_LIMIT).await?;
        Ok(exams.iter().map(ExamSummary::from).collect())
    }

    /// Aggregates the user's completed exams.
    pub async fn analytics(&self, user_id: &str) -> Result<UserAnalytics> {
        let exams = self.exams.list_for_user(user_id, usize::MAX).await?;
        let mut completed = Vec::new();
        for exam in exams.into_iter().filter(|e| e.status.is_terminal()) {
            let responses = self.responses.all_for_exam(exam.id).await?;
            completed.push((exam, responses));
        }
        Ok(summarize(&completed))
    }

    /// Returns the progress of an exam regardless of its owner.
    pub async fn progress(&self, exam_id: Uuid) -> Result<ExamProgress> {
        let exam = self
            .exams
            .get(exam_id)
            .await?
            .ok_or_else(|| DiagError::not_found("exam", exam_id))?;
        let responses = self.responses.all_for_exam(exam_id).await?;
        Ok(ExamProgress {
            exam_id,
            status: exam.status,
            questions_answered: responses.len(),
            correct_answers: responses.iter().filter(|r| r.is_correct).count(),
        })
    }
}

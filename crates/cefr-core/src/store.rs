//! Persistence seams consumed by the engine.
//!
//! The engine never talks to a database directly. It receives trait objects
//! for the question store, the response log and the exam store, so a SQLite
//! implementation, a test fake or [`InMemoryStore`] can be swapped in freely.

use std::cmp::Reverse;
use std::collections::HashMap;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{DiagError, Result};
use crate::exam::{ExamSession, ExamStatus};
use crate::model::{
    DifficultyLevel, NewQuestion, NewResponse, Question, ResponseRecord, SkillType,
};

/// Number of recent responses the adaptive selector looks at.
pub const RECENT_RESPONSE_LIMIT: usize = 5;

/// Stores questions keyed by skill and difficulty.
#[async_trait]
pub trait QuestionStore: Send + Sync {
    /// Returns a uniformly random question matching `skill` and `level`,
    /// skipping the ids in `exclude`.
    async fn find_random(
        &self,
        skill: SkillType,
        level: DifficultyLevel,
        exclude: &[Uuid],
    ) -> Result<Option<Question>>;

    /// Stores a new question and returns it with its identifier.
    async fn insert(&self, question: NewQuestion) -> Result<Question>;

    /// Looks up a question by identifier.
    async fn get(&self, id: Uuid) -> Result<Option<Question>>;
}

/// Append-only log of answered questions.
#[async_trait]
pub trait ResponseLog: Send + Sync {
    /// Returns up to `limit` responses of the exam, newest first.
    async fn recent_for_exam(&self, exam_id: Uuid, limit: usize) -> Result<Vec<ResponseRecord>>;

    /// Returns every response of the exam in creation order.
    async fn all_for_exam(&self, exam_id: Uuid) -> Result<Vec<ResponseRecord>>;

    /// Appends a response.
    ///
    /// Implementations must refuse the append with `AccessDenied` when the
    /// exam is not in progress and with `AlreadyAnswered` when the question
    /// already has a response in the exam, checked atomically with the write.
    async fn append(&self, response: NewResponse) -> Result<ResponseRecord>;
}

/// Stores exam sessions.
#[async_trait]
pub trait ExamStore: Send + Sync {
    /// Stores a newly started exam.
    async fn create(&self, exam: &ExamSession) -> Result<()>;

    /// Looks up an exam by identifier.
    async fn get(&self, id: Uuid) -> Result<Option<ExamSession>>;

    /// Overwrites a stored exam if its stored status is still `expected`.
    ///
    /// A status that moved on since the exam was read fails with
    /// `InvalidStateTransition` and writes nothing.
    async fn update(&self, exam: &ExamSession, expected: ExamStatus) -> Result<()>;

    /// Returns the most recently started in-progress exam of the user.
    async fn active_for_user(&self, user_id: &str) -> Result<Option<ExamSession>>;

    /// Returns up to `limit` exams of the user, most recently started first.
    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ExamSession>>;
}

// ============================================================================
// InMemoryStore
// ============================================================================

#[derive(Debug, Default)]
struct Inner {
    questions: Vec<Question>,
    exams: HashMap<Uuid, ExamSession>,
    responses: Vec<ResponseRecord>,
}

/// Volatile store implementing all three persistence traits.
///
/// Every operation takes a single lock, so the status check in
/// [`ResponseLog::append`] and the write are atomic.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    inner: Mutex<Inner>,
}

impl InMemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store pre-filled with questions.
    #[must_use]
    pub fn with_questions(questions: impl IntoIterator<Item = NewQuestion>) -> Self {
        let inner = Inner {
            questions: questions
                .into_iter()
                .map(NewQuestion::into_question)
                .collect(),
            ..Inner::default()
        };
        Self {
            inner: Mutex::new(inner),
        }
    }

    /// Returns the number of stored questions.
    pub async fn question_count(&self) -> usize {
        self.inner.lock().await.questions.len()
    }
}

#[async_trait]
impl QuestionStore for InMemoryStore {
    async fn find_random(
        &self,
        skill: SkillType,
        level: DifficultyLevel,
        exclude: &[Uuid],
    ) -> Result<Option<Question>> {
        let inner = self.inner.lock().await;
        let matches: Vec<&Question> = inner
            .questions
            .iter()
            .filter(|q| q.skill_type == skill && q.difficulty_level == level)
            .filter(|q| !exclude.contains(&q.id))
            .collect();
        Ok(matches
            .choose(&mut rand::thread_rng())
            .map(|q| (*q).clone()))
    }

    async fn insert(&self, question: NewQuestion) -> Result<Question> {
        let question = question.into_question();
        self.inner.lock().await.questions.push(question.clone());
        Ok(question)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Question>> {
        let inner = self.inner.lock().await;
        Ok(inner.questions.iter().find(|q| q.id == id).cloned())
    }
}

#[async_trait]
impl ResponseLog for InMemoryStore {
    async fn recent_for_exam(&self, exam_id: Uuid, limit: usize) -> Result<Vec<ResponseRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .responses
            .iter()
            .rev()
            .filter(|r| r.exam_id == exam_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn all_for_exam(&self, exam_id: Uuid) -> Result<Vec<ResponseRecord>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .responses
            .iter()
            .filter(|r| r.exam_id == exam_id)
            .cloned()
            .collect())
    }

    async fn append(&self, response: NewResponse) -> Result<ResponseRecord> {
        let mut inner = self.inner.lock().await;
        let exam = inner
            .exams
            .get(&response.exam_id)
            .ok_or_else(|| DiagError::not_found("exam", response.exam_id))?;
        if exam.status != ExamStatus::InProgress {
            return Err(DiagError::access_denied(format!(
                "exam {} is not in progress (status: {})",
                exam.id, exam.status
            )));
        }
        if inner
            .responses
            .iter()
            .any(|r| r.exam_id == response.exam_id && r.question_id == response.question_id)
        {
            return Err(DiagError::already_answered(
                response.exam_id,
                response.question_id,
            ));
        }
        let record = response.into_record();
        inner.responses.push(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl ExamStore for InMemoryStore {
    async fn create(&self, exam: &ExamSession) -> Result<()> {
        self.inner.lock().await.exams.insert(exam.id, exam.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExamSession>> {
        Ok(self.inner.lock().await.exams.get(&id).cloned())
    }

    async fn update(&self, exam: &ExamSession, expected: ExamStatus) -> Result<()> {
        let mut inner = self.inner.lock().await;
        match inner.exams.get_mut(&exam.id) {
            Some(stored) if stored.status == expected => {
                *stored = exam.clone();
                Ok(())
            }
            Some(stored) => Err(DiagError::invalid_transition(stored.status, exam.status)),
            None => Err(DiagError::not_found("exam", exam.id)),
        }
    }

    async fn active_for_user(&self, user_id: &str) -> Result<Option<ExamSession>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .exams
            .values()
            .filter(|e| e.user_id == user_id && e.status == ExamStatus::InProgress)
            .max_by_key(|e| e.started_at)
            .cloned())
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ExamSession>> {
        let inner = self.inner.lock().await;
        let mut exams: Vec<ExamSession> = inner
            .exams
            .values()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect();
        exams.sort_by_key(|e| Reverse(e.started_at));
        exams.truncate(limit);
        Ok(exams)
    }
}

//! Adaptive question selection.
//!
//! The next difficulty and skill are pure functions of a bounded, newest-first
//! [`RecentHistory`]. [`AdaptiveSelector`] wires those functions to the stores
//! and the LLM gateway: it reuses a stored question when one matches and asks
//! the gateway for a new one otherwise.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::Result;
use crate::gateway::{LlmGateway, QuestionPrompt, RecentCorrectness};
use crate::model::{DifficultyLevel, QuestionForClient, ResponseRecord, SkillType};
use crate::store::{QuestionStore, ResponseLog, RECENT_RESPONSE_LIMIT};

/// Number of newest responses the correctness ratio is computed over.
pub const RATIO_WINDOW: usize = 3;

// ============================================================================
// RecentHistory
// ============================================================================

/// The parts of a response the selector looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Skill of the answered question.
    pub skill_type: SkillType,
    /// Difficulty of the answered question.
    pub difficulty_level: DifficultyLevel,
    /// Whether the answer was correct.
    pub is_correct: bool,
}

impl From<&ResponseRecord> for Observation {
    fn from(record: &ResponseRecord) -> Self {
        Self {
            skill_type: record.skill_type,
            difficulty_level: record.difficulty_level,
            is_correct: record.is_correct,
        }
    }
}

/// Up to five recent observations, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecentHistory {
    entries: Vec<Observation>,
}

impl RecentHistory {
    /// Maximum number of observations kept.
    pub const CAPACITY: usize = RECENT_RESPONSE_LIMIT;

    /// Creates an empty history.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Builds a history from observations already ordered newest first.
    /// Anything past [`Self::CAPACITY`] is dropped.
    pub fn from_newest_first(observations: impl IntoIterator<Item = Observation>) -> Self {
        Self {
            entries: observations.into_iter().take(Self::CAPACITY).collect(),
        }
    }

    /// Builds a history from response records ordered newest first.
    #[must_use]
    pub fn from_records(records: &[ResponseRecord]) -> Self {
        Self::from_newest_first(records.iter().map(Observation::from))
    }

    /// Records a new observation, evicting the oldest when full.
    pub fn push(&mut self, observation: Observation) {
        self.entries.insert(0, observation);
        self.entries.truncate(Self::CAPACITY);
    }

    /// The newest observation.
    #[must_use]
    pub fn latest(&self) -> Option<&Observation> {
        self.entries.first()
    }

    /// Number of observations held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` when no response has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The newest `min(3, len)` observations.
    #[must_use]
    pub fn ratio_window(&self) -> &[Observation] {
        &self.entries[..self.entries.len().min(RATIO_WINDOW)]
    }

    /// Correct answers over the whole history, as sent to the gateway.
    #[must_use]
    pub fn correctness(&self) -> RecentCorrectness {
        RecentCorrectness {
            correct: self.entries.iter().filter(|o| o.is_correct).count(),
            total: self.entries.len(),
        }
    }
}

// ============================================================================
// Pure selection rules
// ============================================================================

/// Picks the next difficulty level.
///
/// With no history the exam starts at level 3. Otherwise the ratio of correct
/// answers among the newest three decides: at least two thirds moves one level
/// up, at most one third moves one level down, anything between stays.
///
/// # Examples
///
/// ```
/// use cefr_core::selector::{next_difficulty, Observation, RecentHistory};
/// use cefr_core::{DifficultyLevel, SkillType};
///
/// let level = DifficultyLevel::new(4).unwrap();
/// let answer = |is_correct| Observation {
///     skill_type: SkillType::Grammar,
///     difficulty_level: level,
///     is_correct,
/// };
/// let history = RecentHistory::from_newest_first([answer(true), answer(true), answer(false)]);
/// assert_eq!(next_difficulty(&history).get(), 5);
/// ```
#[must_use]
pub fn next_difficulty(history: &RecentHistory) -> DifficultyLevel {
    let Some(latest) = history.latest() else {
        return DifficultyLevel::START;
    };
    let last = latest.difficulty_level;

    let window = history.ratio_window();
    let size = window.len();
    let correct = window.iter().filter(|o| o.is_correct).count();

    // correct / size >= 2/3 and correct / size <= 1/3, compared exactly.
    if correct * 3 >= size * 2 {
        last.harder()
    } else if correct * 3 <= size {
        last.easier()
    } else {
        last
    }
}

/// Picks the next skill by round-robin over [`SkillType::ROTATION`].
///
/// A last skill outside the rotation restarts it at grammar.
#[must_use]
pub fn next_skill(history: &RecentHistory) -> SkillType {
    let rotation = SkillType::ROTATION;
    history.latest().map_or_else(
        || rotation[history.len() % rotation.len()],
        |latest| {
            rotation
                .iter()
                .position(|skill| *skill == latest.skill_type)
                .map_or(rotation[0], |index| rotation[(index + 1) % rotation.len()])
        },
    )
}

/// The (skill, difficulty) pair the next question should have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Skill of the next question.
    pub skill_type: SkillType,
    /// Difficulty of the next question.
    pub difficulty_level: DifficultyLevel,
}

/// Computes the full target for the next question.
#[must_use]
pub fn plan_next(history: &RecentHistory) -> Target {
    Target {
        skill_type: next_skill(history),
        difficulty_level: next_difficulty(history),
    }
}

// ============================================================================
// AdaptiveSelector
// ============================================================================

/// Where the served question came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionSource {
    /// Reused from the question store.
    Stored,
    /// Generated by the LLM gateway and persisted.
    Generated,
}

/// Result of selecting the next question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    /// Skill of the question.
    pub skill_type: SkillType,
    /// Difficulty of the question.
    pub difficulty_level: DifficultyLevel,
    /// The question, without its answer.
    pub question: QuestionForClient,
    /// Where the question came from.
    pub source: QuestionSource,
}

/// Chooses the next question of an exam.
#[derive(Clone)]
pub struct AdaptiveSelector {
    questions: Arc<dyn QuestionStore>,
    responses: Arc<dyn ResponseLog>,
    gateway: Arc<dyn LlmGateway>,
}

impl std::fmt::Debug for AdaptiveSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdaptiveSelector").finish_non_exhaustive()
    }
}

impl AdaptiveSelector {
    /// Creates a selector over the given collaborators.
    #[must_use]
    pub fn new(
        questions: Arc<dyn QuestionStore>,
        responses: Arc<dyn ResponseLog>,
        gateway: Arc<dyn LlmGateway>,
    ) -> Self {
        Self {
            questions,
            responses,
            gateway,
        }
    }

    /// Selects the next question for `exam_id`.
    ///
    /// Reads the five newest responses, computes the target and samples a
    /// stored question the exam has not answered yet. On a miss, exactly one question is generated and
    /// persisted before it is returned. Gateway failures propagate unchanged.
    pub async fn select_next(&self, exam_id: Uuid, purpose: &str) -> Result<Selection> {
        let recent = self
            .responses
            .recent_for_exam(exam_id, RecentHistory::CAPACITY)
            .await?;
        let history = RecentHistory::from_records(&recent);
        let target = plan_next(&history);

        let answered: Vec<Uuid> = self
            .responses
            .all_for_exam(exam_id)
            .await?
            .into_iter()
            .map(|r| r.question_id)
            .collect();
        let question_number = u32::try_from(answered.len())
            .unwrap_or(u32::MAX)
            .saturating_add(1);

        if let Some(question) = self
            .questions
            .find_random(target.skill_type, target.difficulty_level, &answered)
            .await?
        {
            info!(
                exam_id = %exam_id,
                skill = %target.skill_type,
                level = target.difficulty_level.get(),
                question_id = %question.id,
                "Serving stored question"
            );
            return Ok(Selection {
                skill_type: target.skill_type,
                difficulty_level: target.difficulty_level,
                question: question.for_client(question_number),
                source: QuestionSource::Stored,
            });
        }

        info!(
            exam_id = %exam_id,
            skill = %target.skill_type,
            level = target.difficulty_level.get(),
            "No stored question matches; requesting one from the gateway"
        );
        let prompt = QuestionPrompt {
            skill_type: target.skill_type,
            difficulty_level: target.difficulty_level,
            purpose: purpose.to_string(),
            recent: history.correctness(),
        };
        let generated = self
            .gateway
            .generate_question(&prompt)
            .await
            .map_err(|e| {
                warn!(exam_id = %exam_id, error = %e, "Question generation failed");
                e
            })?;

        let question = self
            .questions
            .insert(generated.into_new_question(target.skill_type, target.difficulty_level))
            .await?;

        Ok(Selection {
            skill_type: target.skill_type,
            difficulty_level: target.difficulty_level,
            question: question.for_client(question_number),
            source: QuestionSource::Generated,
        })
    }
}

//! Domain types shared by the selector, the scoring engine and the stores.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DiagError;

// ============================================================================
// SkillType
// ============================================================================

/// One of the six assessed competencies.
///
/// Declaration order is the reporting order used by the scoring engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillType {
    /// Grammar.
    Grammar,
    /// Vocabulary.
    Vocabulary,
    /// Reading comprehension.
    Reading,
    /// Listening comprehension.
    Listening,
    /// Writing.
    Writing,
    /// Speaking.
    Speaking,
}

impl SkillType {
    /// All six skills in reporting order.
    pub const ALL: [Self; 6] = [
        Self::Grammar,
        Self::Vocabulary,
        Self::Reading,
        Self::Listening,
        Self::Writing,
        Self::Speaking,
    ];

    /// The skills the adaptive selector cycles through, in order.
    pub const ROTATION: [Self; 4] = [Self::Grammar, Self::Vocabulary, Self::Reading, Self::Listening];

    /// Returns the lowercase wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Grammar => "grammar",
            Self::Vocabulary => "vocabulary",
            Self::Reading => "reading",
            Self::Listening => "listening",
            Self::Writing => "writing",
            Self::Speaking => "speaking",
        }
    }
}

impl fmt::Display for SkillType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SkillType {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|skill| skill.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DiagError::InvalidInput(format!("unknown skill type '{s}'")))
    }
}

// ============================================================================
// CefrLevel
// ============================================================================

/// CEFR proficiency band, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CefrLevel {
    /// Beginner.
    A1,
    /// Elementary.
    A2,
    /// Intermediate.
    B1,
    /// Upper intermediate.
    B2,
    /// Advanced.
    C1,
    /// Proficient.
    C2,
}

impl CefrLevel {
    /// All bands, lowest first.
    pub const ALL: [Self; 6] = [Self::A1, Self::A2, Self::B1, Self::B2, Self::C1, Self::C2];

    /// Returns the band label.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::A1 => "A1",
            Self::A2 => "A2",
            Self::B1 => "B1",
            Self::B2 => "B2",
            Self::C1 => "C1",
            Self::C2 => "C2",
        }
    }
}

impl fmt::Display for CefrLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CefrLevel {
    type Err = DiagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| DiagError::InvalidInput(format!("unknown CEFR level '{s}'")))
    }
}

// ============================================================================
// DifficultyLevel
// ============================================================================

/// Question difficulty, an integer in `1..=6` mapped one-to-one onto CEFR bands.
///
/// # Examples
///
/// ```
/// use cefr_core::{CefrLevel, DifficultyLevel};
///
/// let level = DifficultyLevel::new(4).unwrap();
/// assert_eq!(level.cefr(), CefrLevel::B2);
/// assert_eq!(DifficultyLevel::MAX.harder(), DifficultyLevel::MAX);
/// assert!(DifficultyLevel::new(7).is_none());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct DifficultyLevel(u8);

impl DifficultyLevel {
    /// Easiest level (A1).
    pub const MIN: Self = Self(1);
    /// Hardest level (C2).
    pub const MAX: Self = Self(6);
    /// Level every exam starts at (B1).
    pub const START: Self = Self(3);

    /// Creates a level, returning `None` outside `1..=6`.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value >= Self::MIN.0 && value <= Self::MAX.0 {
            Some(Self(value))
        } else {
            None
        }
    }

    /// Returns the raw level.
    #[must_use]
    pub const fn get(self) -> u8 {
        self.0
    }

    /// One level up, saturating at 6.
    #[must_use]
    pub const fn harder(self) -> Self {
        if self.0 < Self::MAX.0 {
            Self(self.0 + 1)
        } else {
            self
        }
    }

    /// One level down, saturating at 1.
    #[must_use]
    pub const fn easier(self) -> Self {
        if self.0 > Self::MIN.0 {
            Self(self.0 - 1)
        } else {
            self
        }
    }

    /// The CEFR band this level corresponds to.
    #[must_use]
    pub const fn cefr(self) -> CefrLevel {
        match self.0 {
            1 => CefrLevel::A1,
            2 => CefrLevel::A2,
            3 => CefrLevel::B1,
            4 => CefrLevel::B2,
            5 => CefrLevel::C1,
            _ => CefrLevel::C2,
        }
    }
}

impl Default for DifficultyLevel {
    fn default() -> Self {
        Self::START
    }
}

impl TryFrom<u8> for DifficultyLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("difficulty level must be 1-6, got {value}"))
    }
}

impl From<DifficultyLevel> for u8 {
    fn from(level: DifficultyLevel) -> Self {
        level.0
    }
}

impl fmt::Display for DifficultyLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Questions
// ============================================================================

/// Answer options keyed by letter ("A", "B", ...).
pub type QuestionOptions = BTreeMap<String, String>;

/// A stored question, including its correct answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// Question identifier.
    pub id: Uuid,
    /// Skill the question assesses.
    pub skill_type: SkillType,
    /// Difficulty level of the question.
    pub difficulty_level: DifficultyLevel,
    /// Question text.
    pub content: String,
    /// Answer options keyed by letter.
    pub options: QuestionOptions,
    /// Key of the correct option.
    pub correct_answer: String,
    /// Why the correct answer is correct, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    /// When the question was stored.
    pub created_at: DateTime<Utc>,
}

impl Question {
    /// Returns `true` if `answer` matches the correct answer, ignoring
    /// surrounding whitespace and letter case.
    #[must_use]
    pub fn is_correct(&self, answer: &str) -> bool {
        answer
            .trim()
            .eq_ignore_ascii_case(self.correct_answer.trim())
    }

    /// Strips the answer for delivery to the exam taker.
    #[must_use]
    pub fn for_client(&self, question_number: u32) -> QuestionForClient {
        QuestionForClient {
            id: self.id,
            skill_type: self.skill_type,
            difficulty_level: self.difficulty_level,
            cefr_level: self.difficulty_level.cefr(),
            content: self.content.clone(),
            options: self.options.clone(),
            question_number,
        }
    }
}

/// A question to be inserted into the question store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewQuestion {
    /// Skill the question assesses.
    pub skill_type: SkillType,
    /// Difficulty level of the question.
    pub difficulty_level: DifficultyLevel,
    /// Question text.
    pub content: String,
    /// Answer options keyed by letter.
    pub options: QuestionOptions,
    /// Key of the correct option.
    pub correct_answer: String,
    /// Optional explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
}

impl NewQuestion {
    /// Assigns an identifier and creation time.
    #[must_use]
    pub fn into_question(self) -> Question {
        Question {
            id: Uuid::new_v4(),
            skill_type: self.skill_type,
            difficulty_level: self.difficulty_level,
            content: self.content,
            options: self.options,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
            created_at: Utc::now(),
        }
    }
}

/// The question as sent to the exam taker. Has no answer field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionForClient {
    /// Question identifier, echoed back when answering.
    pub id: Uuid,
    /// Skill the question assesses.
    pub skill_type: SkillType,
    /// Difficulty level of the question.
    pub difficulty_level: DifficultyLevel,
    /// CEFR band of the difficulty level.
    pub cefr_level: CefrLevel,
    /// Question text.
    pub content: String,
    /// Answer options keyed by letter.
    pub options: QuestionOptions,
    /// 1-based position of this question within the exam.
    pub question_number: u32,
}

// ============================================================================
// Responses
// ============================================================================

/// An answered question, joined with the question's skill and difficulty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Response identifier.
    pub id: Uuid,
    /// Exam the response belongs to.
    pub exam_id: Uuid,
    /// Question that was answered.
    pub question_id: Uuid,
    /// Skill of the answered question.
    pub skill_type: SkillType,
    /// Difficulty of the answered question.
    pub difficulty_level: DifficultyLevel,
    /// The raw answer given.
    pub user_answer: String,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Seconds the exam taker spent on the question.
    pub time_taken_seconds: u32,
    /// When the response was recorded.
    pub created_at: DateTime<Utc>,
}

/// A response to be appended to the response log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewResponse {
    /// Exam the response belongs to.
    pub exam_id: Uuid,
    /// Question that was answered.
    pub question_id: Uuid,
    /// Skill of the answered question.
    pub skill_type: SkillType,
    /// Difficulty of the answered question.
    pub difficulty_level: DifficultyLevel,
    /// The raw answer given.
    pub user_answer: String,
    /// Whether the answer was correct.
    pub is_correct: bool,
    /// Seconds the exam taker spent on the question.
    pub time_taken_seconds: u32,
}

impl NewResponse {
    /// Assigns an identifier and creation time.
    #[must_use]
    pub fn into_record(self) -> ResponseRecord {
        ResponseRecord {
            id: Uuid::new_v4(),
            exam_id: self.exam_id,
            question_id: self.question_id,
            skill_type: self.skill_type,
            difficulty_level: self.difficulty_level,
            user_answer: self.user_answer,
            is_correct: self.is_correct,
            time_taken_seconds: self.time_taken_seconds,
            created_at: Utc::now(),
        }
    }
}

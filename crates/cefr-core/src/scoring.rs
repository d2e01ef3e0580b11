//! Scoring and CEFR leveling.
//!
//! Scores are whole percentages rounded half-up. The CEFR band comes from the
//! mean of the six skill scores; thresholds are compared against the sum so no
//! floating point is involved.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::{DiagError, Result};
use crate::exam::ExamOutcome;
use crate::model::{CefrLevel, ResponseRecord, SkillType};
use crate::store::{ExamStore, ResponseLog};

/// Skill scores below this are areas for improvement.
pub const WEAK_THRESHOLD: u8 = 60;

/// Skill scores at or above this are strong areas.
pub const STRONG_THRESHOLD: u8 = 80;

/// Per-skill percentage, always holding all six skills in reporting order.
pub type SkillScores = BTreeMap<SkillType, u8>;

/// `round(100 * correct / total)` with halves rounded up; 0 when `total` is 0.
///
/// # Examples
///
/// ```
/// use cefr_core::scoring::percentage;
///
/// assert_eq!(percentage(2, 3), 67);
/// assert_eq!(percentage(1, 8), 13);
/// assert_eq!(percentage(0, 0), 0);
/// ```
#[must_use]
pub fn percentage(correct: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let rounded = (200 * correct.min(total) + total) / (2 * total);
    u8::try_from(rounded).unwrap_or(100)
}

/// Correct and total answers for one skill.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillTally {
    /// Correct answers.
    pub correct: usize,
    /// Answers given.
    pub total: usize,
}

impl SkillTally {
    /// The skill's percentage score.
    #[must_use]
    pub fn score(&self) -> u8 {
        percentage(self.correct, self.total)
    }
}

/// Counts answers per skill. Every skill is present, with zero counts when
/// it was never asked.
#[must_use]
pub fn tally(responses: &[ResponseRecord]) -> BTreeMap<SkillType, SkillTally> {
    let mut tallies: BTreeMap<SkillType, SkillTally> = SkillType::ALL
        .into_iter()
        .map(|skill| (skill, SkillTally::default()))
        .collect();
    for response in responses {
        let entry = tallies.entry(response.skill_type).or_default();
        entry.total += 1;
        if response.is_correct {
            entry.correct += 1;
        }
    }
    tallies
}

/// Per-skill scores over all six skills.
#[must_use]
pub fn skill_scores(responses: &[ResponseRecord]) -> SkillScores {
    tally(responses)
        .into_iter()
        .map(|(skill, tally)| (skill, tally.score()))
        .collect()
}

/// Maps the mean of the six skill scores onto a CEFR band.
#[must_use]
pub fn cefr_from_scores(scores: &SkillScores) -> CefrLevel {
    let skills = SkillType::ALL.len() as u32;
    let sum: u32 = SkillType::ALL
        .iter()
        .map(|skill| u32::from(scores.get(skill).copied().unwrap_or(0)))
        .sum();

    // mean >= t  <=>  sum >= t * 6
    match sum {
        s if s >= 90 * skills => CefrLevel::C2,
        s if s >= 75 * skills => CefrLevel::C1,
        s if s >= 60 * skills => CefrLevel::B2,
        s if s >= 45 * skills => CefrLevel::B1,
        s if s >= 30 * skills => CefrLevel::A2,
        _ => CefrLevel::A1,
    }
}

/// Skills scoring at least [`STRONG_THRESHOLD`], in reporting order.
#[must_use]
pub fn strong_skills(scores: &SkillScores) -> Vec<SkillType> {
    scores
        .iter()
        .filter(|(_, score)| **score >= STRONG_THRESHOLD)
        .map(|(skill, _)| *skill)
        .collect()
}

/// Skills scoring below [`WEAK_THRESHOLD`], in reporting order.
#[must_use]
pub fn weak_skills(scores: &SkillScores) -> Vec<SkillType> {
    scores
        .iter()
        .filter(|(_, score)| **score < WEAK_THRESHOLD)
        .map(|(skill, _)| *skill)
        .collect()
}

fn join_or(skills: &[SkillType], fallback: &str) -> String {
    if skills.is_empty() {
        fallback.to_string()
    } else {
        skills
            .iter()
            .map(SkillType::as_str)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Renders the deterministic feedback text stored on the exam.
#[must_use]
pub fn feedback_summary(cefr_level: CefrLevel, total_score: u8, scores: &SkillScores) -> String {
    let mut summary = format!(
        "CEFR Level: {cefr_level}\n\
         Overall Score: {total_score}%\n\
         \n\
         Strong Areas: {}\n\
         Areas for Improvement: {}\n\
         \n\
         Skill Breakdown:",
        join_or(&strong_skills(scores), "Continue practicing"),
        join_or(&weak_skills(scores), "Great job! Keep it up"),
    );
    for (skill, score) in scores {
        let _ = write!(summary, "\n- {skill}: {score}%");
    }
    summary
}

/// Outcome of analysing an exam.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisResult {
    /// The analysed exam.
    pub exam_id: Uuid,
    /// Overall CEFR band.
    pub cefr_level: CefrLevel,
    /// Overall percentage of correct answers.
    pub total_score: u8,
    /// Percentage per skill.
    pub skill_scores: SkillScores,
    /// Templated feedback text.
    pub feedback_summary: String,
    /// Number of answered questions.
    pub total_questions: usize,
    /// Number of correct answers.
    pub correct_answers: usize,
    /// Skills at or above the strong threshold.
    pub strong_skills: Vec<SkillType>,
    /// Skills below the weak threshold.
    pub weak_skills: Vec<SkillType>,
}

impl AnalysisResult {
    /// The subset written onto the exam.
    #[must_use]
    pub fn outcome(&self) -> ExamOutcome {
        ExamOutcome {
            total_score: self.total_score,
            cefr_level: self.cefr_level,
            feedback_summary: self.feedback_summary.clone(),
        }
    }
}

/// Scores a response set.
///
/// # Errors
///
/// Returns `DiagError::NoResponses` when `responses` is empty.
pub fn score_responses(exam_id: Uuid, responses: &[ResponseRecord]) -> Result<AnalysisResult> {
    if responses.is_empty() {
        return Err(DiagError::no_responses(exam_id));
    }

    let skill_scores = skill_scores(responses);
    let correct_answers = responses.iter().filter(|r| r.is_correct).count();
    let total_score = percentage(correct_answers, responses.len());
    let cefr_level = cefr_from_scores(&skill_scores);

    Ok(AnalysisResult {
        exam_id,
        cefr_level,
        total_score,
        feedback_summary: feedback_summary(cefr_level, total_score, &skill_scores),
        total_questions: responses.len(),
        correct_answers,
        strong_skills: strong_skills(&skill_scores),
        weak_skills: weak_skills(&skill_scores),
        skill_scores,
    })
}

// ============================================================================
// ScoringEngine
// ============================================================================

/// Analyses submitted exams and writes the outcome back.
#[derive(Clone)]
pub struct ScoringEngine {
    exams: Arc<dyn ExamStore>,
    responses: Arc<dyn ResponseLog>,
}

impl std::fmt::Debug for ScoringEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScoringEngine").finish_non_exhaustive()
    }
}

impl ScoringEngine {
    /// Creates an engine over the given stores.
    #[must_use]
    pub fn new(exams: Arc<dyn ExamStore>, responses: Arc<dyn ResponseLog>) -> Self {
        Self { exams, responses }
    }

    /// Scores the exam and marks it completed.
    ///
    /// Re-analysing a completed exam overwrites the stored outcome with the
    /// same values. An exam that is missing, owned by someone else, or still
    /// in progress is refused with `AccessDenied`; an exam without responses
    /// fails with `NoResponses` and is left untouched.
    pub async fn analyze(&self, exam_id: Uuid, user_id: &str) -> Result<AnalysisResult> {
        let mut exam = self
            .exams
            .get(exam_id)
            .await?
            .filter(|exam| exam.user_id == user_id)
            .ok_or_else(|| DiagError::access_denied(format!("no exam {exam_id} for this user")))?;

        if !exam.status.is_analyzable() {
            return Err(DiagError::access_denied(format!(
                "exam {exam_id} cannot be analysed while {}",
                exam.status
            )));
        }

        let responses = self.responses.all_for_exam(exam_id).await?;
        let result = score_responses(exam_id, &responses)?;

        let read_status = exam.status;
        exam.complete(result.outcome())?;
        self.exams.update(&exam, read_status).await?;

        info!(
            exam_id = %exam_id,
            cefr = %result.cefr_level,
            total_score = result.total_score,
            questions = result.total_questions,
            "Exam analysed"
        );
        Ok(result)
    }
}

//! Per-user exam history and progress analytics.
//!
//! History lists a user's most recent exams in any status. Analytics only
//! looks at completed exams: the newest ones with their answer counts,
//! success rates per assessed skill, and an overall average and best level.

use std::cmp::Reverse;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::exam::{ExamSession, ExamStatus, ExamType};
use crate::model::{CefrLevel, ResponseRecord, SkillType};
use crate::scoring::{percentage, tally};

/// Number of exams returned by the history view.
pub const HISTORY_LIMIT: usize = 20;

/// Number of completed exams listed in the analytics view.
pub const RECENT_COMPLETED_LIMIT: usize = 10;

/// One row of a user's exam history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExamSummary {
    /// The exam.
    pub id: Uuid,
    /// Kind of exam.
    pub exam_type: ExamType,
    /// Current status.
    pub status: ExamStatus,
    /// When the exam started.
    pub started_at: DateTime<Utc>,
    /// When the exam was submitted.
    pub ended_at: Option<DateTime<Utc>>,
    /// Overall score once analysed.
    pub total_score: Option<u8>,
    /// Overall CEFR band once analysed.
    pub cefr_level: Option<CefrLevel>,
}

impl From<&ExamSession> for ExamSummary {
    fn from(exam: &ExamSession) -> Self {
        Self {
            id: exam.id,
            exam_type: exam.exam_type,
            status: exam.status,
            started_at: exam.started_at,
            ended_at: exam.ended_at,
            total_score: exam.total_score,
            cefr_level: exam.cefr_level,
        }
    }
}

/// A completed exam with its answer counts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedExam {
    /// The exam.
    pub id: Uuid,
    /// Kind of exam.
    pub exam_type: ExamType,
    /// Overall CEFR band.
    pub cefr_level: Option<CefrLevel>,
    /// Overall score.
    pub total_score: Option<u8>,
    /// When the exam was submitted.
    pub ended_at: Option<DateTime<Utc>>,
    /// Answers recorded.
    pub total_questions: usize,
    /// Correct answers.
    pub correct_answers: usize,
}

/// Success rate for one skill across all completed exams.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillPerformance {
    /// The skill.
    pub skill_type: SkillType,
    /// Answers given.
    pub total: usize,
    /// Correct answers.
    pub correct: usize,
    /// Percentage of correct answers, rounded half-up.
    pub success_rate: u8,
}

/// Totals across all completed exams.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverallProgress {
    /// Number of completed exams.
    pub total_exams: usize,
    /// Mean overall score, rounded half-up.
    pub average_score: Option<u8>,
    /// Best CEFR band reached.
    pub highest_level: Option<CefrLevel>,
}

/// Progress analytics for one user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAnalytics {
    /// Newest completed exams first.
    pub recent_exams: Vec<CompletedExam>,
    /// Skills that were assessed at least once, in reporting order.
    pub skill_performance: Vec<SkillPerformance>,
    /// Totals.
    pub overall: OverallProgress,
}

/// Builds analytics from completed exams and their responses.
///
/// Callers pass only completed exams; the order of `completed` does not
/// matter.
#[must_use]
pub fn summarize(completed: &[(ExamSession, Vec<ResponseRecord>)]) -> UserAnalytics {
    let mut recent_exams: Vec<CompletedExam> = completed
        .iter()
        .map(|(exam, responses)| CompletedExam {
            id: exam.id,
            exam_type: exam.exam_type,
            cefr_level: exam.cefr_level,
            total_score: exam.total_score,
            ended_at: exam.ended_at,
            total_questions: responses.len(),
            correct_answers: responses.iter().filter(|r| r.is_correct).count(),
        })
        .collect();
    // `None` sorts before `Some`, so unfinished timestamps land last.
    recent_exams.sort_by_key(|e| Reverse(e.ended_at));
    recent_exams.truncate(RECENT_COMPLETED_LIMIT);

    let all_responses: Vec<ResponseRecord> = completed
        .iter()
        .flat_map(|(_, responses)| responses.iter().cloned())
        .collect();
    let skill_performance = tally(&all_responses)
        .into_iter()
        .filter(|(_, t)| t.total > 0)
        .map(|(skill_type, t)| SkillPerformance {
            skill_type,
            total: t.total,
            correct: t.correct,
            success_rate: percentage(t.correct, t.total),
        })
        .collect();

    let scores: Vec<usize> = completed
        .iter()
        .filter_map(|(exam, _)| exam.total_score.map(usize::from))
        .collect();
    let average_score = if scores.is_empty() {
        None
    } else {
        let n = scores.len();
        let sum: usize = scores.iter().sum();
        u8::try_from((2 * sum + n) / (2 * n)).ok()
    };

    UserAnalytics {
        recent_exams,
        skill_performance,
        overall: OverallProgress {
            total_exams: completed.len(),
            average_score,
            highest_level: completed.iter().filter_map(|(exam, _)| exam.cefr_level).max(),
        },
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::exam::ExamOutcome;
    use crate::model::{DifficultyLevel, NewResponse};

    fn completed_exam(score: u8, level: CefrLevel, ended_minutes: i64) -> ExamSession {
        let mut exam = ExamSession::new("u1", ExamType::Placement, "general");
        exam.submit().unwrap();
        exam.ended_at = Some(exam.started_at + Duration::minutes(ended_minutes));
        exam.complete(ExamOutcome {
            total_score: score,
            cefr_level: level,
            feedback_summary: String::new(),
        })
        .unwrap();
        exam
    }

    fn answers(exam: &ExamSession, given: &[(SkillType, bool)]) -> Vec<ResponseRecord> {
        given
            .iter()
            .map(|&(skill_type, is_correct)| {
                NewResponse {
                    exam_id: exam.id,
                    question_id: Uuid::new_v4(),
                    skill_type,
                    difficulty_level: DifficultyLevel::START,
                    user_answer: "A".to_string(),
                    is_correct,
                    time_taken_seconds: 10,
                }
                .into_record()
            })
            .collect()
    }

    #[test]
    fn test_summary_copies_exam_fields() {
        let exam = completed_exam(72, CefrLevel::B2, 5);
        let summary = ExamSummary::from(&exam);
        assert_eq!(summary.id, exam.id);
        assert_eq!(summary.status, ExamStatus::Completed);
        assert_eq!(summary.total_score, Some(72));
        assert_eq!(summary.cefr_level, Some(CefrLevel::B2));
        assert_eq!(summary.ended_at, exam.ended_at);
    }

    #[test]
    fn test_summarize_two_exams() {
        let older = completed_exam(50, CefrLevel::A2, 5);
        let newer = completed_exam(75, CefrLevel::B1, 60);
        let older_answers = answers(
            &older,
            &[(SkillType::Grammar, true), (SkillType::Grammar, false)],
        );
        let newer_answers = answers(
            &newer,
            &[
                (SkillType::Grammar, true),
                (SkillType::Reading, true),
                (SkillType::Reading, false),
                (SkillType::Listening, true),
            ],
        );

        let analytics = summarize(&[(older.clone(), older_answers), (newer.clone(), newer_answers)]);

        assert_eq!(
            analytics
                .recent_exams
                .iter()
                .map(|e| e.id)
                .collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert_eq!(analytics.recent_exams[0].total_questions, 4);
        assert_eq!(analytics.recent_exams[0].correct_answers, 3);

        // grammar 2/3, reading 1/2, listening 1/1
        let rates: Vec<(SkillType, u8)> = analytics
            .skill_performance
            .iter()
            .map(|p| (p.skill_type, p.success_rate))
            .collect();
        assert_eq!(
            rates,
            vec![
                (SkillType::Grammar, 67),
                (SkillType::Reading, 50),
                (SkillType::Listening, 100),
            ]
        );

        // (50 + 75) / 2 = 62.5
        assert_eq!(analytics.overall.total_exams, 2);
        assert_eq!(analytics.overall.average_score, Some(63));
        assert_eq!(analytics.overall.highest_level, Some(CefrLevel::B1));
    }

    #[test]
    fn test_summarize_nothing() {
        let analytics = summarize(&[]);
        assert!(analytics.recent_exams.is_empty());
        assert!(analytics.skill_performance.is_empty());
        assert_eq!(analytics.overall, OverallProgress::default());
    }

    #[test]
    fn test_recent_exams_are_capped() {
        let completed: Vec<_> = (0..12)
            .map(|i| (completed_exam(60, CefrLevel::B1, i), Vec::new()))
            .collect();
        let analytics = summarize(&completed);
        assert_eq!(analytics.recent_exams.len(), RECENT_COMPLETED_LIMIT);
        assert_eq!(analytics.recent_exams[0].id, completed[11].0.id);
        assert_eq!(analytics.overall.total_exams, 12);
    }
}

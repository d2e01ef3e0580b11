//! Markdown report generation.
//!
//! [`MarkdownGenerator`] turns an [`ExamReport`] into a document with:
//!
//! - A summary table with the CEFR band and headline numbers
//! - A per-skill table with strong and weak areas
//! - The stored feedback text
//! - A timeline of every answer

use chrono::{DateTime, Utc};
use std::fmt::Write;

use cefr_core::SkillType;

use crate::{ExamReport, SkillLine, TimelineEntry};

/// Generates Markdown reports for analysed exams.
pub struct MarkdownGenerator<'a> {
    report: &'a ExamReport,
}

impl<'a> MarkdownGenerator<'a> {
    /// Creates a new Markdown generator for the given report.
    #[must_use]
    pub const fn new(report: &'a ExamReport) -> Self {
        Self { report }
    }

    /// Generates the complete Markdown report, ending with a footer that
    /// carries the generation time.
    #[must_use]
    pub fn generate(&self) -> String {
        let mut output = self.generate_body();
        Self::write_footer(&mut output);
        output
    }

    fn generate_body(&self) -> String {
        let mut output = String::new();

        self.write_title(&mut output);
        self.write_summary(&mut output);
        self.write_skills(&mut output);
        self.write_feedback(&mut output);
        self.write_timeline(&mut output);

        output
    }

    fn write_title(&self, output: &mut String) {
        let _ = writeln!(
            output,
            "# CEFR Diagnostic Report: {}\n",
            escape_markdown(&self.report.user_id)
        );
    }

    fn write_summary(&self, output: &mut String) {
        let report = self.report;
        let summary = &report.summary;

        let _ = writeln!(output, "## Summary\n");
        let _ = writeln!(output, "| Metric | Value |");
        let _ = writeln!(output, "|--------|-------|");
        let _ = writeln!(output, "| Exam | {} |", report.exam_id);
        let _ = writeln!(output, "| Type | {} |", report.exam_type.as_str());
        let _ = writeln!(
            output,
            "| Purpose | {} |",
            escape_markdown(&report.learning_purpose)
        );
        let _ = writeln!(output, "| CEFR Level | **{}** |", summary.cefr_level);
        let _ = writeln!(output, "| Total Score | {}% |", summary.total_score);
        let _ = writeln!(
            output,
            "| Correct Answers | {} / {} |",
            summary.correct_answers, summary.total_questions
        );
        let _ = writeln!(
            output,
            "| Started | {} |",
            format_timestamp(&summary.started_at)
        );
        let _ = writeln!(
            output,
            "| Duration | {} |",
            format_duration(summary.duration_seconds)
        );
        let _ = writeln!(
            output,
            "| Average Time per Question | {} |",
            format_duration(u64::from(report.average_time_seconds()))
        );
        let _ = writeln!(output);
    }

    fn write_skills(&self, output: &mut String) {
        let _ = writeln!(output, "## Skills\n");
        let _ = writeln!(output, "| Skill | Correct | Total | Score |");
        let _ = writeln!(output, "|-------|---------|-------|-------|");
        for line in &self.report.skills {
            Self::write_skill_line(output, line);
        }
        let _ = writeln!(output);

        let _ = writeln!(
            output,
            "**Strong Areas**: {}\n",
            join_skills(&self.report.strong_skills)
        );
        let _ = writeln!(
            output,
            "**Areas for Improvement**: {}\n",
            join_skills(&self.report.weak_skills)
        );
    }

    fn write_skill_line(output: &mut String, line: &SkillLine) {
        let score = if line.assessed() {
            format!("{}%", line.score)
        } else {
            "not assessed".to_string()
        };
        let _ = writeln!(
            output,
            "| {} | {} | {} | {score} |",
            line.skill_type, line.correct, line.total
        );
    }

    fn write_feedback(&self, output: &mut String) {
        let _ = writeln!(output, "## Feedback\n");
        let _ = writeln!(output, "```text");
        let _ = writeln!(output, "{}", self.report.feedback_summary.replace("```", "'''"));
        let _ = writeln!(output, "```\n");
    }

    fn write_timeline(&self, output: &mut String) {
        let _ = writeln!(output, "## Timeline\n");

        if self.report.timeline.is_empty() {
            let _ = writeln!(output, "*No answers recorded.*\n");
            return;
        }

        let _ = writeln!(output, "| # | Time | Skill | Difficulty | Result | Time Taken |");
        let _ = writeln!(output, "|---|------|-------|------------|--------|------------|");
        for entry in &self.report.timeline {
            Self::write_timeline_entry(output, entry);
        }
        let _ = writeln!(output);
    }

    fn write_timeline_entry(output: &mut String, entry: &TimelineEntry) {
        let time = format_timestamp(&entry.timestamp);
        let level = entry.difficulty_level;
        let result = if entry.is_correct { "correct" } else { "incorrect" };
        let taken = format_duration(u64::from(entry.time_taken_seconds));
        let _ = writeln!(
            output,
            "| {} | {time} | {} | {} ({}) | {result} | {taken} |",
            entry.number,
            entry.skill_type,
            level.get(),
            level.cefr()
        );
    }

    fn write_footer(output: &mut String) {
        let _ = writeln!(output, "---");
        let timestamp = format_timestamp(&Utc::now());
        let _ = writeln!(output, "*Generated by cefr at {timestamp}*");
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Formats seconds as e.g. "45s", "1m 5s" or "1h 1m 1s".
fn format_duration(seconds: u64) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;

    let mut parts = Vec::new();

    if hours > 0 {
        parts.push(format!("{hours}h"));
    }
    if minutes > 0 {
        parts.push(format!("{minutes}m"));
    }
    if secs > 0 || parts.is_empty() {
        parts.push(format!("{secs}s"));
    }

    parts.join(" ")
}

fn format_timestamp(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn join_skills(skills: &[SkillType]) -> String {
    if skills.is_empty() {
        return "None".to_string();
    }
    skills
        .iter()
        .map(SkillType::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Escapes Markdown control characters in free text.
fn escape_markdown(text: &str) -> String {
    let mut result = String::with_capacity(text.len());

    for ch in text.chars() {
        match ch {
            '*' | '_' | '`' | '#' | '[' | ']' | '(' | ')' | '!' | '\\' | '<' | '>' | '|' => {
                result.push('\\');
                result.push(ch);
            }
            '\n' => result.push_str("<br>"),
            _ => result.push(ch),
        }
    }

    result
}

// ============================================================================
// Tests
// ============================================================================

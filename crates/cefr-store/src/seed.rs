//! Question bank loading.
//!
//! A bank is a JSON array of questions:
//!
//! ```json
//! [
//!   {
//!     "skill_type": "grammar",
//!     "difficulty_level": 2,
//!     "content": "She ___ to school every day.",
//!     "options": {"A": "go", "B": "goes", "C": "going"},
//!     "correct_answer": "B"
//!   }
//! ]
//! ```

use std::path::Path;

use cefr_core::gateway::GeneratedQuestion;
use cefr_core::NewQuestion;

use crate::error::{StoreError, StoreResult};

/// Parses and validates a question bank.
///
/// Option keys and answers are normalized the same way generated questions
/// are, so seeded and generated questions grade identically.
pub fn parse_question_bank(json: &str) -> StoreResult<Vec<NewQuestion>> {
    let entries: Vec<NewQuestion> = serde_json::from_str(json)?;
    entries
        .into_iter()
        .enumerate()
        .map(|(i, entry)| normalize(i + 1, entry))
        .collect()
}

/// Reads and validates a question bank file.
pub fn load_question_bank(path: &Path) -> StoreResult<Vec<NewQuestion>> {
    let json = std::fs::read_to_string(path).map_err(|source| StoreError::BankRead {
        path: path.to_path_buf(),
        source,
    })?;
    parse_question_bank(&json)
}

fn normalize(index: usize, entry: NewQuestion) -> StoreResult<NewQuestion> {
    let NewQuestion {
        skill_type,
        difficulty_level,
        content,
        options,
        correct_answer,
        explanation,
    } = entry;

    GeneratedQuestion {
        question: content,
        options,
        correct_answer,
        explanation,
    }
    .validate()
    .map(|q| q.into_new_question(skill_type, difficulty_level))
    .map_err(|e| StoreError::InvalidBankEntry {
        index,
        message: e.to_string(),
    })
}

//! SQLite persistence for CEFR diagnostic exams.
//!
//! [`SqliteStore`] implements the engine's question store, response log and
//! exam store over a single connection.

pub mod error;
pub mod schema;
pub mod seed;

use std::path::Path;
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use cefr_core::store::{ExamStore, QuestionStore, ResponseLog};
use cefr_core::{
    CefrLevel, DifficultyLevel, ExamSession, ExamStatus, ExamType, NewQuestion, NewResponse,
    Question, ResponseRecord, Result, SkillType,
};

pub use error::{StoreError, StoreResult};
pub use seed::{load_question_bank, parse_question_bank};

const QUESTION_COLUMNS: &str =
    "id, skill_type, difficulty_level, content, options, correct_answer, explanation, created_at";

const EXAM_COLUMNS: &str = "id, user_id, exam_type, learning_purpose, status, total_score, \
     cefr_level, feedback_summary, started_at, ended_at, updated_at";

const RESPONSE_COLUMNS: &str = "id, exam_id, question_id, skill_type, difficulty_level, \
     user_answer, is_correct, time_taken_seconds, created_at";

/// SQLite-backed store for questions, exams and responses.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore").finish_non_exhaustive()
    }
}

impl SqliteStore {
    /// Opens or creates a database at `path`.
    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        if !schema::is_initialized(&conn) {
            info!(path = %path.as_ref().display(), "Initializing database schema");
        }
        schema::initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    /// Creates an in-memory database.
    pub fn in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        schema::initialize_schema(&conn)?;
        Ok(Self::from_connection(conn))
    }

    fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    fn with_conn<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut conn = self
            .conn
            .lock()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
        f(&mut conn)
    }

    /// Inserts a batch of questions in one transaction.
    pub fn seed(&self, questions: Vec<NewQuestion>) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let tx = conn.transaction()?;
            let mut inserted = 0;
            for question in questions {
                insert_question(&tx, &question.into_question())?;
                inserted += 1;
            }
            tx.commit()?;
            info!(count = inserted, "Seeded question bank");
            Ok(inserted)
        })
    }

    /// Number of stored questions.
    pub fn question_count(&self) -> StoreResult<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row("SELECT COUNT(*) FROM questions", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or(0))
        })
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(table: &'static str, id: &str, raw: &str) -> StoreResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(table, id, e))
}

fn parse_uuid(table: &'static str, id: &str, raw: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(raw).map_err(|e| StoreError::corrupt(table, id, e))
}

fn parse_level(table: &'static str, id: &str, raw: i64) -> StoreResult<DifficultyLevel> {
    u8::try_from(raw)
        .ok()
        .and_then(DifficultyLevel::new)
        .ok_or_else(|| StoreError::corrupt(table, id, format!("difficulty level {raw}")))
}

fn parse_field<T: FromStr>(table: &'static str, id: &str, raw: &str) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    raw.parse().map_err(|e| StoreError::corrupt(table, id, e))
}

struct QuestionRow {
    id: String,
    skill_type: String,
    difficulty_level: i64,
    content: String,
    options: String,
    correct_answer: String,
    explanation: Option<String>,
    created_at: String,
}

impl QuestionRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            skill_type: row.get(1)?,
            difficulty_level: row.get(2)?,
            content: row.get(3)?,
            options: row.get(4)?,
            correct_answer: row.get(5)?,
            explanation: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    fn into_question(self) -> StoreResult<Question> {
        const T: &str = "questions";
        Ok(Question {
            id: parse_uuid(T, &self.id, &self.id)?,
            skill_type: parse_field::<SkillType>(T, &self.id, &self.skill_type)?,
            difficulty_level: parse_level(T, &self.id, self.difficulty_level)?,
            options: serde_json::from_str(&self.options)
                .map_err(|e| StoreError::corrupt(T, &self.id, e))?,
            created_at: parse_timestamp(T, &self.id, &self.created_at)?,
            content: self.content,
            correct_answer: self.correct_answer,
            explanation: self.explanation,
        })
    }
}

struct ExamRow {
    id: String,
    user_id: String,
    exam_type: String,
    learning_purpose: String,
    status: String,
    total_score: Option<i64>,
    cefr_level: Option<String>,
    feedback_summary: Option<String>,
    started_at: String,
    ended_at: Option<String>,
    updated_at: String,
}

impl ExamRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            user_id: row.get(1)?,
            exam_type: row.get(2)?,
            learning_purpose: row.get(3)?,
            status: row.get(4)?,
            total_score: row.get(5)?,
            cefr_level: row.get(6)?,
            feedback_summary: row.get(7)?,
            started_at: row.get(8)?,
            ended_at: row.get(9)?,
            updated_at: row.get(10)?,
        })
    }

    fn into_exam(self) -> StoreResult<ExamSession> {
        const T: &str = "exams";
        let id = &self.id;
        let total_score = self
            .total_score
            .map(|score| {
                u8::try_from(score)
                    .ok()
                    .filter(|s| *s <= 100)
                    .ok_or_else(|| StoreError::corrupt(T, id, format!("total score {score}")))
            })
            .transpose()?;
        let cefr_level = self
            .cefr_level
            .as_deref()
            .map(|raw| parse_field::<CefrLevel>(T, id, raw))
            .transpose()?;
        let ended_at = self
            .ended_at
            .as_deref()
            .map(|raw| parse_timestamp(T, id, raw))
            .transpose()?;

        Ok(ExamSession {
            id: parse_uuid(T, id, id)?,
            exam_type: parse_field::<ExamType>(T, id, &self.exam_type)?,
            status: parse_field::<ExamStatus>(T, id, &self.status)?,
            total_score,
            cefr_level,
            started_at: parse_timestamp(T, id, &self.started_at)?,
            ended_at,
            updated_at: parse_timestamp(T, id, &self.updated_at)?,
            user_id: self.user_id,
            learning_purpose: self.learning_purpose,
            feedback_summary: self.feedback_summary,
        })
    }
}

struct ResponseRow {
    id: String,
    exam_id: String,
    question_id: String,
    skill_type: String,
    difficulty_level: i64,
    user_answer: String,
    is_correct: bool,
    time_taken_seconds: i64,
    created_at: String,
}

impl ResponseRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            exam_id: row.get(1)?,
            question_id: row.get(2)?,
            skill_type: row.get(3)?,
            difficulty_level: row.get(4)?,
            user_answer: row.get(5)?,
            is_correct: row.get(6)?,
            time_taken_seconds: row.get(7)?,
            created_at: row.get(8)?,
        })
    }

    fn into_record(self) -> StoreResult<ResponseRecord> {
        const T: &str = "responses";
        let id = &self.id;
        Ok(ResponseRecord {
            id: parse_uuid(T, id, id)?,
            exam_id: parse_uuid(T, id, &self.exam_id)?,
            question_id: parse_uuid(T, id, &self.question_id)?,
            skill_type: parse_field::<SkillType>(T, id, &self.skill_type)?,
            difficulty_level: parse_level(T, id, self.difficulty_level)?,
            time_taken_seconds: u32::try_from(self.time_taken_seconds)
                .map_err(|e| StoreError::corrupt(T, id, e))?,
            created_at: parse_timestamp(T, id, &self.created_at)?,
            user_answer: self.user_answer,
            is_correct: self.is_correct,
        })
    }
}

fn insert_question(conn: &Connection, question: &Question) -> StoreResult<()> {
    conn.execute(
        "INSERT INTO questions (id, skill_type, difficulty_level, content, options, correct_answer, explanation, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            question.id.to_string(),
            question.skill_type.as_str(),
            question.difficulty_level.get(),
            question.content,
            serde_json::to_string(&question.options)?,
            question.correct_answer,
            question.explanation,
            timestamp(&question.created_at),
        ],
    )?;
    Ok(())
}

fn query_responses(
    conn: &Connection,
    sql: &str,
    params: impl rusqlite::Params,
) -> StoreResult<Vec<ResponseRecord>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, ResponseRow::read)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(ResponseRow::into_record).collect()
}

// ============================================================================
// Engine traits
// ============================================================================

#[async_trait]
impl QuestionStore for SqliteStore {
    async fn find_random(
        &self,
        skill: SkillType,
        level: DifficultyLevel,
        exclude: &[Uuid],
    ) -> Result<Option<Question>> {
        let mut sql = format!(
            "SELECT {QUESTION_COLUMNS} FROM questions
             WHERE skill_type = ?1 AND difficulty_level = ?2"
        );
        if !exclude.is_empty() {
            let placeholders: Vec<String> =
                (3..exclude.len() + 3).map(|i| format!("?{i}")).collect();
            sql.push_str(&format!(" AND id NOT IN ({})", placeholders.join(", ")));
        }
        sql.push_str(" ORDER BY RANDOM() LIMIT 1");

        let mut values: Vec<Value> = vec![
            Value::from(skill.as_str().to_string()),
            Value::from(i64::from(level.get())),
        ];
        values.extend(exclude.iter().map(|id| Value::from(id.to_string())));

        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(&sql, params_from_iter(values), QuestionRow::read)
                .optional()?)
        })?;
        Ok(row.map(QuestionRow::into_question).transpose()?)
    }

    async fn insert(&self, question: NewQuestion) -> Result<Question> {
        let question = question.into_question();
        self.with_conn(|conn| insert_question(conn, &question))?;
        debug!(question_id = %question.id, skill = %question.skill_type, "Stored question");
        Ok(question)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Question>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {QUESTION_COLUMNS} FROM questions WHERE id = ?1"),
                    params![id.to_string()],
                    QuestionRow::read,
                )
                .optional()?)
        })?;
        Ok(row.map(QuestionRow::into_question).transpose()?)
    }
}

#[async_trait]
impl ResponseLog for SqliteStore {
    async fn recent_for_exam(&self, exam_id: Uuid, limit: usize) -> Result<Vec<ResponseRecord>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(self.with_conn(|conn| {
            query_responses(
                conn,
                &format!(
                    "SELECT {RESPONSE_COLUMNS} FROM responses
                     WHERE exam_id = ?1 ORDER BY seq DESC LIMIT ?2"
                ),
                params![exam_id.to_string(), limit],
            )
        })?)
    }

    async fn all_for_exam(&self, exam_id: Uuid) -> Result<Vec<ResponseRecord>> {
        Ok(self.with_conn(|conn| {
            query_responses(
                conn,
                &format!(
                    "SELECT {RESPONSE_COLUMNS} FROM responses
                     WHERE exam_id = ?1 ORDER BY seq ASC"
                ),
                params![exam_id.to_string()],
            )
        })?)
    }

    async fn append(&self, response: NewResponse) -> Result<ResponseRecord> {
        let record = response.into_record();
        self.with_conn(|conn| {
            // Status and duplicate checks share one write transaction with the insert.
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let status: Option<String> = tx
                .query_row(
                    "SELECT status FROM exams WHERE id = ?1",
                    params![record.exam_id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            match status.as_deref() {
                None => return Err(StoreError::ExamNotFound(record.exam_id)),
                Some(status) if status != ExamStatus::InProgress.as_str() => {
                    return Err(StoreError::ExamClosed {
                        exam_id: record.exam_id,
                        status: status.to_string(),
                    });
                }
                Some(_) => {}
            }

            let answered: bool = tx.query_row(
                "SELECT EXISTS(SELECT 1 FROM responses WHERE exam_id = ?1 AND question_id = ?2)",
                params![record.exam_id.to_string(), record.question_id.to_string()],
                |row| row.get(0),
            )?;
            if answered {
                return Err(StoreError::AlreadyAnswered {
                    exam_id: record.exam_id,
                    question_id: record.question_id,
                });
            }

            tx.execute(
                "INSERT INTO responses (id, exam_id, question_id, skill_type, difficulty_level, user_answer, is_correct, time_taken_seconds, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    record.id.to_string(),
                    record.exam_id.to_string(),
                    record.question_id.to_string(),
                    record.skill_type.as_str(),
                    record.difficulty_level.get(),
                    record.user_answer,
                    record.is_correct,
                    record.time_taken_seconds,
                    timestamp(&record.created_at),
                ],
            )?;
            tx.commit()?;
            Ok(())
        })?;
        Ok(record)
    }
}

#[async_trait]
impl ExamStore for SqliteStore {
    async fn create(&self, exam: &ExamSession) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                &format!(
                    "INSERT INTO exams ({EXAM_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"
                ),
                params![
                    exam.id.to_string(),
                    exam.user_id,
                    exam.exam_type.as_str(),
                    exam.learning_purpose,
                    exam.status.as_str(),
                    exam.total_score,
                    exam.cefr_level.map(|level| level.as_str()),
                    exam.feedback_summary,
                    timestamp(&exam.started_at),
                    exam.ended_at.as_ref().map(timestamp),
                    timestamp(&exam.updated_at),
                ],
            )?;
            Ok(())
        })?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<ExamSession>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {EXAM_COLUMNS} FROM exams WHERE id = ?1"),
                    params![id.to_string()],
                    ExamRow::read,
                )
                .optional()?)
        })?;
        Ok(row.map(ExamRow::into_exam).transpose()?)
    }

    async fn update(&self, exam: &ExamSession, expected: ExamStatus) -> Result<()> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE exams SET
                    status = ?2, total_score = ?3, cefr_level = ?4, feedback_summary = ?5,
                    ended_at = ?6, updated_at = ?7, learning_purpose = ?8
                 WHERE id = ?1 AND status = ?9",
                params![
                    exam.id.to_string(),
                    exam.status.as_str(),
                    exam.total_score,
                    exam.cefr_level.map(|level| level.as_str()),
                    exam.feedback_summary,
                    exam.ended_at.as_ref().map(timestamp),
                    timestamp(&exam.updated_at),
                    exam.learning_purpose,
                    expected.as_str(),
                ],
            )?;
            if changed > 0 {
                return Ok(());
            }
            let current: Option<String> = conn
                .query_row(
                    "SELECT status FROM exams WHERE id = ?1",
                    params![exam.id.to_string()],
                    |row| row.get(0),
                )
                .optional()?;
            Err(current.map_or(StoreError::ExamNotFound(exam.id), |current| {
                StoreError::StatusConflict {
                    exam_id: exam.id,
                    current,
                    requested: exam.status.as_str().to_string(),
                }
            }))
        })?;
        Ok(())
    }

    async fn active_for_user(&self, user_id: &str) -> Result<Option<ExamSession>> {
        let row = self.with_conn(|conn| {
            Ok(conn
                .query_row(
                    &format!(
                        "SELECT {EXAM_COLUMNS} FROM exams
                         WHERE user_id = ?1 AND status = ?2
                         ORDER BY started_at DESC LIMIT 1"
                    ),
                    params![user_id, ExamStatus::InProgress.as_str()],
                    ExamRow::read,
                )
                .optional()?)
        })?;
        Ok(row.map(ExamRow::into_exam).transpose()?)
    }

    async fn list_for_user(&self, user_id: &str, limit: usize) -> Result<Vec<ExamSession>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EXAM_COLUMNS} FROM exams
                 WHERE user_id = ?1
                 ORDER BY started_at DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![user_id, limit], ExamRow::read)?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            Ok(rows)
        })?;
        Ok(rows
            .into_iter()
            .map(ExamRow::into_exam)
            .collect::<StoreResult<Vec<_>>>()?)
    }
}

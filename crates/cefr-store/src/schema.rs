//! SQLite schema for questions, exams and responses.

use rusqlite::{Connection, OptionalExtension};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Creates the tables if needed and applies pending migrations.
pub fn initialize_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .optional()?
        .unwrap_or(0);

    if current < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS questions (
            id TEXT PRIMARY KEY,
            skill_type TEXT NOT NULL,
            difficulty_level INTEGER NOT NULL CHECK (difficulty_level BETWEEN 1 AND 6),
            content TEXT NOT NULL,
            options TEXT NOT NULL,
            correct_answer TEXT NOT NULL,
            explanation TEXT,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_questions_skill_level
            ON questions (skill_type, difficulty_level);

        CREATE TABLE IF NOT EXISTS exams (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            exam_type TEXT NOT NULL,
            learning_purpose TEXT NOT NULL,
            status TEXT NOT NULL,
            total_score INTEGER,
            cefr_level TEXT,
            feedback_summary TEXT,
            started_at TEXT NOT NULL,
            ended_at TEXT,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_exams_user_status
            ON exams (user_id, status, started_at);

        CREATE TABLE IF NOT EXISTS responses (
            seq INTEGER PRIMARY KEY AUTOINCREMENT,
            id TEXT NOT NULL UNIQUE,
            exam_id TEXT NOT NULL REFERENCES exams (id),
            question_id TEXT NOT NULL REFERENCES questions (id),
            skill_type TEXT NOT NULL,
            difficulty_level INTEGER NOT NULL,
            user_answer TEXT NOT NULL,
            is_correct INTEGER NOT NULL,
            time_taken_seconds INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_responses_exam
            ON responses (exam_id, seq);

        INSERT INTO schema_version (version) VALUES (1);",
    )
}

/// Returns `true` if the schema has been applied.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
        [],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .unwrap_or(false)
}

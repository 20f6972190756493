//! Database schema definitions
//!
//! This module contains all SQL schema definitions for the Harvest-Frontier database.

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Track crawl epochs
CREATE TABLE IF NOT EXISTS epochs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    started_at TEXT NOT NULL,
    finished_at TEXT,
    config_hash TEXT NOT NULL,
    status TEXT NOT NULL
);

-- Jobs that exhausted retries or failed permanently
CREATE TABLE IF NOT EXISTS dead_letters (
    epoch_id INTEGER NOT NULL REFERENCES epochs(id),
    job_id INTEGER NOT NULL,
    url TEXT NOT NULL,
    domain TEXT NOT NULL,
    attempts INTEGER NOT NULL,
    final_error TEXT NOT NULL,
    job_json TEXT NOT NULL,
    dead_lettered_at TEXT NOT NULL,
    PRIMARY KEY (epoch_id, job_id)
);

CREATE INDEX IF NOT EXISTS idx_dead_letters_domain ON dead_letters(domain);

-- Most recent checkpoint; at most one row
CREATE TABLE IF NOT EXISTS checkpoint (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    payload TEXT NOT NULL,
    saved_at TEXT NOT NULL
);
"#;

/// Initializes the database schema
pub fn initialize_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(SCHEMA_SQL)?;
    Ok(())
}

//! SQLite storage implementation
//!
//! This module provides a SQLite-based implementation of the Storage trait.

use crate::state::JobId;
use crate::storage::schema::initialize_schema;
use crate::storage::traits::{Storage, StorageError, StorageResult};
use crate::storage::{DeadLetter, EpochRecord, EpochStatus};
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

/// SQLite storage backend
pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    /// Opens or creates the database at `path`
    pub fn new(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA foreign_keys = ON;
            PRAGMA temp_store = MEMORY;
        ",
        )?;

        initialize_schema(&conn)?;

        Ok(Self { conn })
    }

    /// Creates an in-memory database (for testing)
    pub fn new_in_memory() -> StorageResult<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        initialize_schema(&conn)?;
        Ok(Self { conn })
    }
}

fn epoch_from_row(row: &Row<'_>) -> rusqlite::Result<EpochRecord> {
    Ok(EpochRecord {
        id: row.get(0)?,
        started_at: row.get(1)?,
        finished_at: row.get(2)?,
        config_hash: row.get(3)?,
        status: EpochStatus::from_db_string(&row.get::<_, String>(4)?)
            .unwrap_or(EpochStatus::Interrupted),
    })
}

impl Storage for SqliteStorage {
    // ===== Epoch Management =====

    fn create_epoch(&mut self, config_hash: &str) -> StorageResult<i64> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO epochs (started_at, config_hash, status) VALUES (?1, ?2, ?3)",
            params![now, config_hash, EpochStatus::Running.to_db_string()],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn get_epoch(&self, epoch_id: i64) -> StorageResult<EpochRecord> {
        self.conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM epochs WHERE id = ?1",
                params![epoch_id],
                epoch_from_row,
            )
            .optional()?
            .ok_or(StorageError::EpochNotFound(epoch_id))
    }

    fn get_latest_epoch(&self) -> StorageResult<Option<EpochRecord>> {
        let epoch = self
            .conn
            .query_row(
                "SELECT id, started_at, finished_at, config_hash, status FROM epochs ORDER BY id DESC LIMIT 1",
                [],
                epoch_from_row,
            )
            .optional()?;
        Ok(epoch)
    }

    fn finish_epoch(&mut self, epoch_id: i64, status: EpochStatus) -> StorageResult<()> {
        let finished_at = match status {
            EpochStatus::Running => None,
            _ => Some(Utc::now().to_rfc3339()),
        };
        let updated = self.conn.execute(
            "UPDATE epochs SET status = ?1, finished_at = ?2 WHERE id = ?3",
            params![status.to_db_string(), finished_at, epoch_id],
        )?;
        if updated == 0 {
            return Err(StorageError::EpochNotFound(epoch_id));
        }
        Ok(())
    }

    // ===== Dead Letters =====

    fn insert_dead_letter(&mut self, epoch_id: i64, letter: &DeadLetter) -> StorageResult<()> {
        let job_json = serde_json::to_string(&letter.job)?;
        self.conn.execute(
            "INSERT OR REPLACE INTO dead_letters
             (epoch_id, job_id, url, domain, attempts, final_error, job_json, dead_lettered_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                epoch_id,
                letter.job.id.0 as i64,
                letter.job.url,
                letter.job.domain,
                letter.job.attempts,
                letter.final_error,
                job_json,
                letter.dead_lettered_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    fn list_dead_letters(&self, epoch_id: i64, limit: usize) -> StorageResult<Vec<DeadLetter>> {
        let mut stmt = self.conn.prepare(
            "SELECT job_json, final_error, dead_lettered_at FROM dead_letters
             WHERE epoch_id = ?1
             ORDER BY dead_lettered_at DESC, job_id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![epoch_id, limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut letters = Vec::new();
        for row in rows {
            let (job_json, final_error, at) = row?;
            letters.push(decode_letter(&job_json, final_error, &at)?);
        }
        Ok(letters)
    }

    fn take_dead_letter(
        &mut self,
        epoch_id: i64,
        job_id: JobId,
    ) -> StorageResult<Option<DeadLetter>> {
        let tx = self.conn.transaction()?;

        let row = tx
            .query_row(
                "SELECT job_json, final_error, dead_lettered_at FROM dead_letters
                 WHERE epoch_id = ?1 AND job_id = ?2",
                params![epoch_id, job_id.0 as i64],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((job_json, final_error, at)) = row else {
            return Ok(None);
        };
        let letter = decode_letter(&job_json, final_error, &at)?;

        tx.execute(
            "DELETE FROM dead_letters WHERE epoch_id = ?1 AND job_id = ?2",
            params![epoch_id, job_id.0 as i64],
        )?;
        tx.commit()?;

        Ok(Some(letter))
    }

    fn count_dead_letters(&self, epoch_id: i64) -> StorageResult<u64> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM dead_letters WHERE epoch_id = ?1",
            params![epoch_id],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn max_dead_letter_id(&self, epoch_id: i64) -> StorageResult<Option<JobId>> {
        let max: Option<i64> = self.conn.query_row(
            "SELECT MAX(job_id) FROM dead_letters WHERE epoch_id = ?1",
            params![epoch_id],
            |row| row.get(0),
        )?;
        Ok(max.map(|id| JobId(id as u64)))
    }

    fn dead_letter_ids(&self, epoch_id: i64) -> StorageResult<Vec<JobId>> {
        let mut stmt = self
            .conn
            .prepare("SELECT job_id FROM dead_letters WHERE epoch_id = ?1 ORDER BY job_id")?;
        let rows = stmt.query_map(params![epoch_id], |row| row.get::<_, i64>(0))?;

        let mut ids = Vec::new();
        for row in rows {
            ids.push(JobId(row? as u64));
        }
        Ok(ids)
    }

    // ===== Checkpoint =====

    fn write_checkpoint(&mut self, payload: &str) -> StorageResult<()> {
        let tx = self.conn.transaction()?;
        tx.execute(
            "INSERT INTO checkpoint (id, payload, saved_at) VALUES (1, ?1, ?2)
             ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, saved_at = excluded.saved_at",
            params![payload, Utc::now().to_rfc3339()],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn read_checkpoint(&self) -> StorageResult<Option<String>> {
        let payload = self
            .conn
            .query_row("SELECT payload FROM checkpoint WHERE id = 1", [], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(payload)
    }

    fn clear_checkpoint(&mut self) -> StorageResult<()> {
        self.conn.execute("DELETE FROM checkpoint", [])?;
        Ok(())
    }
}

fn decode_letter(job_json: &str, final_error: String, at: &str) -> StorageResult<DeadLetter> {
    let job = serde_json::from_str(job_json)?;
    let dead_lettered_at = chrono::DateTime::parse_from_rfc3339(at)
        .map_err(|e| StorageError::Serialization(format!("bad timestamp '{}': {}", at, e)))?
        .with_timezone(&Utc);
    Ok(DeadLetter {
        job,
        final_error,
        dead_lettered_at,
    })
}

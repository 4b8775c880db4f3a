//! Output record repository — artifacts produced by processing.
//!
//! Output rows are append-only: created exactly once per successful run
//! and never mutated. The UNIQUE constraint on `file_record_id` is what
//! makes re-delivered work idempotent.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ts, Database, DatabaseError};

/// One artifact produced by a successful processing run.
#[derive(Debug, Clone)]
pub struct OutputRecord {
    pub id: String,
    pub file_record_id: String,
    pub storage_key: String,
    pub rows_read: u64,
    pub rows_kept: u64,
    /// JSON summary of the transformation (columns seen, timestamps, ...).
    pub summary: String,
    pub created_at: String,
}

impl OutputRecord {
    pub fn new(
        file_record_id: impl Into<String>,
        storage_key: impl Into<String>,
        rows_read: u64,
        rows_kept: u64,
        summary: impl Into<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            file_record_id: file_record_id.into(),
            storage_key: storage_key.into(),
            rows_read,
            rows_kept,
            summary: summary.into(),
            created_at: now_ts(),
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_record_id: row.get("file_record_id")?,
            storage_key: row.get("storage_key")?,
            rows_read: row.get("rows_read")?,
            rows_kept: row.get("rows_kept")?,
            summary: row.get("summary")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Inserts an output record unless one already exists for the owning file
/// record. Returns whether a row was written. De-duplication by the
/// natural key keeps at-least-once task delivery from fanning out
/// duplicate artifacts.
pub fn insert_once(db: &Database, record: &OutputRecord) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "INSERT INTO output_records (id, file_record_id, storage_key,
             rows_read, rows_kept, summary, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT (file_record_id) DO NOTHING",
            params![
                record.id,
                record.file_record_id,
                record.storage_key,
                record.rows_read,
                record.rows_kept,
                record.summary,
                record.created_at,
            ],
        )?;
        Ok(changed == 1)
    })
}

/// Fetches the output for a file record, if any.
pub fn find_by_file(db: &Database, file_record_id: &str) -> Result<Option<OutputRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let record = conn
            .query_row(
                "SELECT id, file_record_id, storage_key, rows_read, rows_kept,
                 summary, created_at
                 FROM output_records WHERE file_record_id = ?1",
                [file_record_id],
                OutputRecord::from_row,
            )
            .optional()?;
        Ok(record)
    })
}

/// Lists outputs for an owner and logical group, oldest first. This is
/// the read the web tier uses to render download links.
pub fn list_for_group(
    db: &Database,
    owner: &str,
    logical_group: &str,
) -> Result<Vec<OutputRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT o.id, o.file_record_id, o.storage_key, o.rows_read,
             o.rows_kept, o.summary, o.created_at
             FROM output_records o
             JOIN file_records f ON f.id = o.file_record_id
             WHERE f.owner = ?1 AND f.logical_group = ?2
             ORDER BY o.created_at ASC, o.id ASC",
        )?;
        let rows = stmt.query_map(params![owner, logical_group], OutputRecord::from_row)?;
        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    })
}

/// Deletes the output for a file record (repair tool destructive mode and
/// retention cleanup only). Returns whether a row existed.
pub fn delete_for_file(db: &Database, file_record_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "DELETE FROM output_records WHERE file_record_id = ?1",
            [file_record_id],
        )?;
        Ok(changed >= 1)
    })
}

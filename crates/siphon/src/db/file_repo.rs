//! File record repository — lifecycle metadata for uploaded files.
//!
//! Status changes go through [`transition`], a guarded compare-and-set.
//! It is the only mutator of the status column, so the legality of the
//! state machine is enforced in one place rather than scattered across
//! callers.

use std::fmt;
use std::str::FromStr;

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ts, Database, DatabaseError};

/// Processing lifecycle of a file record.
///
/// Transitions form a DAG: `Pending -> Processing -> {Completed, Failed}`.
/// Terminal states are never left; a re-upload creates a brand-new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FileStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Completed => "completed",
            FileStatus::Failed => "failed",
        }
    }

    /// Whether no further transition may leave this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FileStatus::Completed | FileStatus::Failed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileStatus {
    type Err = DatabaseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "processing" => Ok(FileStatus::Processing),
            "completed" => Ok(FileStatus::Completed),
            "failed" => Ok(FileStatus::Failed),
            other => Err(DatabaseError::UnknownStatus(other.to_string())),
        }
    }
}

/// Result of a guarded status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The record matched the expected set and was updated.
    Applied,
    /// The record's current status was outside the expected set.
    /// Not an error: another worker (or the repair tool) got there first.
    Conflict,
}

/// One uploaded file and its processing lifecycle.
#[derive(Debug, Clone)]
pub struct FileRecord {
    pub id: String,
    pub owner: String,
    pub logical_group: String,
    /// Location handle resolved through the storage gateway.
    /// Immutable once set; there is no update path for it.
    pub storage_key: String,
    pub original_filename: String,
    pub file_type: Option<String>,
    pub status: FileStatus,
    /// Human-readable reason, populated only on `Failed`.
    pub status_detail: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl FileRecord {
    /// Builds a new `Pending` record. Does not persist it; see [`insert`].
    pub fn new(
        owner: impl Into<String>,
        logical_group: impl Into<String>,
        storage_key: impl Into<String>,
        original_filename: impl Into<String>,
        file_type: Option<String>,
    ) -> Self {
        let now = now_ts();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            owner: owner.into(),
            logical_group: logical_group.into(),
            storage_key: storage_key.into(),
            original_filename: original_filename.into(),
            file_type,
            status: FileStatus::Pending,
            status_detail: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        let status: String = row.get("status")?;
        Ok(Self {
            id: row.get("id")?,
            owner: row.get("owner")?,
            logical_group: row.get("logical_group")?,
            storage_key: row.get("storage_key")?,
            original_filename: row.get("original_filename")?,
            file_type: row.get("file_type")?,
            status: status.parse().map_err(|_| {
                rusqlite::Error::FromSqlConversionFailure(
                    0,
                    rusqlite::types::Type::Text,
                    format!("unknown status '{}'", status).into(),
                )
            })?,
            status_detail: row.get("status_detail")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

const SELECT_COLUMNS: &str = "id, owner, logical_group, storage_key, original_filename, \
     file_type, status, status_detail, created_at, updated_at";

/// Inserts a new file record.
pub fn insert(db: &Database, record: &FileRecord) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO file_records (id, owner, logical_group, storage_key,
             original_filename, file_type, status, status_detail, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                record.id,
                record.owner,
                record.logical_group,
                record.storage_key,
                record.original_filename,
                record.file_type,
                record.status.as_str(),
                record.status_detail,
                record.created_at,
                record.updated_at,
            ],
        )?;
        Ok(())
    })
}

/// Fetches a record by id.
pub fn get(db: &Database, id: &str) -> Result<Option<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let record = conn
            .query_row(
                &format!("SELECT {} FROM file_records WHERE id = ?1", SELECT_COLUMNS),
                [id],
                FileRecord::from_row,
            )
            .optional()?;
        Ok(record)
    })
}

/// Lists records for an owner and logical group, optionally filtered by
/// status, oldest first.
pub fn list(
    db: &Database,
    owner: &str,
    logical_group: &str,
    status: Option<FileStatus>,
) -> Result<Vec<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut records = Vec::new();
        match status {
            Some(status) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM file_records
                     WHERE owner = ?1 AND logical_group = ?2 AND status = ?3
                     ORDER BY created_at ASC, id ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(
                    params![owner, logical_group, status.as_str()],
                    FileRecord::from_row,
                )?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM file_records
                     WHERE owner = ?1 AND logical_group = ?2
                     ORDER BY created_at ASC, id ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map(params![owner, logical_group], FileRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    })
}

/// Lists every record, optionally scoped to one owner. Used by the
/// diagnostic scan.
pub fn list_all(db: &Database, owner: Option<&str>) -> Result<Vec<FileRecord>, DatabaseError> {
    db.with_conn(|conn| {
        let mut records = Vec::new();
        match owner {
            Some(owner) => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM file_records WHERE owner = ?1
                     ORDER BY owner ASC, created_at ASC, id ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map([owner], FileRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
            None => {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM file_records
                     ORDER BY owner ASC, created_at ASC, id ASC",
                    SELECT_COLUMNS
                ))?;
                let rows = stmt.query_map([], FileRecord::from_row)?;
                for row in rows {
                    records.push(row?);
                }
            }
        }
        Ok(records)
    })
}

/// Guarded compare-and-set on the status column.
///
/// Applies `to` (and the detail) only if the current status is in `from`.
/// Returns [`TransitionOutcome::Conflict`] otherwise, which callers treat
/// as "someone else owns this record", not as an error. The single UPDATE
/// statement makes the check-and-set atomic under SQLite's write lock.
pub fn transition(
    db: &Database,
    id: &str,
    from: &[FileStatus],
    to: FileStatus,
    detail: Option<&str>,
) -> Result<TransitionOutcome, DatabaseError> {
    // `from` values come from the enum, so splicing them into the IN list
    // is injection-safe.
    let from_list = from
        .iter()
        .map(|s| format!("'{}'", s.as_str()))
        .collect::<Vec<_>>()
        .join(", ");

    db.with_conn(|conn| {
        let changed = conn.execute(
            &format!(
                "UPDATE file_records
                 SET status = ?1, status_detail = ?2, updated_at = ?3
                 WHERE id = ?4 AND status IN ({})",
                from_list
            ),
            params![to.as_str(), detail, now_ts(), id],
        )?;
        Ok(if changed == 1 {
            TransitionOutcome::Applied
        } else {
            TransitionOutcome::Conflict
        })
    })
}

/// Fails `processing` records whose last update is older than the cutoff.
///
/// This is the supervisory sweep for workers that crashed mid-task.
/// Returns the ids it demoted. Each demotion goes through [`transition`],
/// so a worker completing the record concurrently wins the race.
pub fn fail_stale_processing(db: &Database, cutoff: &str) -> Result<Vec<String>, DatabaseError> {
    let stale: Vec<String> = db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT id FROM file_records WHERE status = 'processing' AND updated_at < ?1",
        )?;
        let rows = stmt.query_map([cutoff], |r| r.get(0))?;
        let mut ids = Vec::new();
        for row in rows {
            ids.push(row?);
        }
        Ok(ids)
    })?;

    let mut demoted = Vec::new();
    for id in stale {
        let outcome = transition(
            db,
            &id,
            &[FileStatus::Processing],
            FileStatus::Failed,
            Some("processing timed out"),
        )?;
        if outcome == TransitionOutcome::Applied {
            log::warn!("Stale processing record {} marked failed", id);
            demoted.push(id);
        }
    }
    Ok(demoted)
}

/// Deletes a record by id. Only the repair tool's destructive mode and
/// the retention cleanup call this; the pipeline itself never deletes.
pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM file_records WHERE id = ?1", [id])?;
        Ok(changed == 1)
    })
}

//! Diagnostic and repair of records whose bytes are missing from storage.
//!
//! The scan is read-only; the fix and delete modes are explicit,
//! separately gated, and idempotent. Every fix goes through the guarded
//! transition, so running the tool alongside live workers can never
//! clobber a record that is being completed.

use std::sync::Arc;

use chrono::{Duration, SecondsFormat, Utc};

use crate::db::{self, Database, FileStatus, TransitionOutcome};
use crate::error::{Result, StorageError};
use crate::storage::StorageGateway;

/// Failure detail written by the fix mode. Instructs re-submission,
/// which is the only recovery for lost bytes.
pub const REPAIR_DETAIL: &str = "File missing from storage. Please re-upload your file.";

/// One record whose metadata and storage disagree.
#[derive(Debug, Clone)]
pub struct MissingFile {
    pub file_record_id: String,
    pub owner: String,
    pub original_filename: String,
    pub storage_key: String,
    pub status: FileStatus,
    pub reason: String,
}

/// Scans records (optionally scoped to one owner) and reports every one
/// whose bytes are absent. An empty record set yields an empty report,
/// not an error.
pub fn scan(
    db: &Database,
    storage: &Arc<dyn StorageGateway>,
    owner: Option<&str>,
) -> Result<Vec<MissingFile>> {
    let records = db::file_repo::list_all(db, owner)?;
    log::info!("Checking {} file record(s)", records.len());

    let mut missing = Vec::new();
    for record in records {
        let reason = match storage.exists(&record.storage_key) {
            Ok(true) => continue,
            Ok(false) => "file not in storage".to_string(),
            Err(StorageError::InvalidKey(_)) => "malformed storage key".to_string(),
            Err(e) => return Err(e.into()),
        };
        missing.push(MissingFile {
            file_record_id: record.id,
            owner: record.owner,
            original_filename: record.original_filename,
            storage_key: record.storage_key,
            status: record.status,
            reason,
        });
    }
    Ok(missing)
}

/// Transitions every non-terminal record in the report to `failed` with
/// the standard re-upload detail. Returns how many records were updated.
/// Records a worker finished in the meantime lose nothing: their guarded
/// transition simply conflicts and is left alone.
pub fn apply_fix(db: &Database, report: &[MissingFile]) -> Result<usize> {
    let mut fixed = 0;
    for item in report {
        if item.status.is_terminal() {
            continue;
        }
        let outcome = db::file_repo::transition(
            db,
            &item.file_record_id,
            &[FileStatus::Pending, FileStatus::Processing],
            FileStatus::Failed,
            Some(REPAIR_DETAIL),
        )?;
        if outcome == TransitionOutcome::Applied {
            log::info!(
                "Marked record {} ({}) as failed",
                item.file_record_id,
                item.original_filename
            );
            fixed += 1;
        }
    }
    Ok(fixed)
}

/// Deletes the reported records (and their output rows) from the
/// metadata store. Destructive; callers gate this behind explicit
/// confirmation. Bytes are never touched: they are already gone, which
/// is why the record is in the report.
pub fn apply_delete(db: &Database, report: &[MissingFile]) -> Result<usize> {
    let mut deleted = 0;
    for item in report {
        db::output_repo::delete_for_file(db, &item.file_record_id)?;
        if db::file_repo::delete(db, &item.file_record_id)? {
            log::warn!(
                "Deleted record {} ({})",
                item.file_record_id,
                item.original_filename
            );
            deleted += 1;
        }
    }
    Ok(deleted)
}

/// Fails `processing` records untouched for longer than the given window.
/// Recovery path for workers that crashed mid-task.
pub fn sweep_stale(db: &Database, older_than_minutes: u64) -> Result<Vec<String>> {
    let cutoff = (Utc::now() - Duration::minutes(older_than_minutes as i64))
        .to_rfc3339_opts(SecondsFormat::Micros, true);
    Ok(db::file_repo::fail_stale_processing(db, &cutoff)?)
}

/// Counters from a retention cleanup run.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct CleanupStats {
    pub deleted_records: usize,
    pub deleted_outputs: usize,
}

/// Retention policy: removes `completed` records older than the cutoff,
/// together with their stored bytes and outputs. Explicit operator
/// action; the pipeline itself never deletes anything.
pub fn cleanup_completed(
    db: &Database,
    storage: &Arc<dyn StorageGateway>,
    older_than_days: u64,
) -> Result<CleanupStats> {
    let cutoff = (Utc::now() - Duration::days(older_than_days as i64))
        .to_rfc3339_opts(SecondsFormat::Micros, true);

    let mut stats = CleanupStats::default();
    for record in db::file_repo::list_all(db, None)? {
        if record.status != FileStatus::Completed || record.created_at >= cutoff {
            continue;
        }

        if let Some(output) = db::output_repo::find_by_file(db, &record.id)? {
            storage.delete(&output.storage_key)?;
            db::output_repo::delete_for_file(db, &record.id)?;
            stats.deleted_outputs += 1;
        }
        storage.delete(&record.storage_key)?;
        db::file_repo::delete(db, &record.id)?;
        stats.deleted_records += 1;
        log::info!("Retention-deleted record {}", record.id);
    }
    Ok(stats)
}

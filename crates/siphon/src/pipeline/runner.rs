//! Batch processor — drives file records through their lifecycle.
//!
//! Every unit of work terminates in a status transition or a logged
//! operator-attention condition; nothing escapes past the task boundary.

use std::sync::Arc;

use tracing::info_span;

use crate::db::{self, Database, FileRecord, FileStatus, OutputRecord, TransitionOutcome};
use crate::error::{Result, StorageError, TransformError};
use crate::storage::{self, StorageGateway};

use super::error::PipelineError;
use super::outcome::{BatchOutcome, FileOutcome};
use super::transform::{LineCleanse, Transform};

/// Failure detail recorded when a file's bytes are absent at processing
/// time. Distinct from transformation failures so the user knows to
/// re-upload rather than fix the file.
pub const MISSING_DETAIL: &str = "source file missing from storage";

pub struct Processor {
    db: Database,
    storage: Arc<dyn StorageGateway>,
    transform: Arc<dyn Transform>,
}

impl Processor {
    /// Production constructor with the default cleansing transform.
    pub fn new(db: Database, storage: Arc<dyn StorageGateway>) -> Self {
        Self::with_transform(db, storage, Arc::new(LineCleanse))
    }

    /// Constructor with a custom transformation.
    pub fn with_transform(
        db: Database,
        storage: Arc<dyn StorageGateway>,
        transform: Arc<dyn Transform>,
    ) -> Self {
        Self {
            db,
            storage,
            transform,
        }
    }

    /// Runs one unit of work over a single file record.
    ///
    /// Safe under at-least-once delivery: terminal records are a no-op,
    /// the claim is a guarded compare-and-set, the output write is an
    /// atomic overwrite, and output record creation is de-duplicated.
    pub fn run_single(&self, file_record_id: &str) -> Result<FileOutcome> {
        let record = db::file_repo::get(&self.db, file_record_id)?
            .ok_or_else(|| db::DatabaseError::RecordNotFound(file_record_id.to_string()))?;
        self.process_record(&record)
    }

    /// Runs a whole batch: the set of records still `pending` for the
    /// owner and logical group, captured once at the start. Files
    /// arriving afterwards start a new run.
    pub fn run_batch(&self, owner: &str, logical_group: &str) -> Result<BatchOutcome> {
        let _span = info_span!("batch", owner = %owner, group = %logical_group).entered();

        let run = db::file_repo::list(&self.db, owner, logical_group, Some(FileStatus::Pending))?;
        let mut outcome = BatchOutcome {
            captured: run.len(),
            ..BatchOutcome::default()
        };

        if run.is_empty() {
            log::info!(
                "No pending files for owner={} group={}",
                owner,
                logical_group
            );
            return Ok(outcome);
        }

        // Check the whole run up front so "everything is gone" is
        // distinguishable from a partial loss.
        let mut survivors = Vec::new();
        for record in &run {
            if self.storage.exists(&record.storage_key)? {
                survivors.push(record);
            } else {
                log::warn!(
                    "File {} ({}) missing from storage, failing it",
                    record.id,
                    record.storage_key
                );
                let applied = db::file_repo::transition(
                    &self.db,
                    &record.id,
                    &[FileStatus::Pending],
                    FileStatus::Failed,
                    Some(MISSING_DETAIL),
                )?;
                match applied {
                    TransitionOutcome::Applied => outcome.failed_missing += 1,
                    TransitionOutcome::Conflict => outcome.skipped += 1,
                }
            }
        }

        if survivors.is_empty() {
            return Err(PipelineError::AllInputsMissing {
                owner: owner.to_string(),
                logical_group: logical_group.to_string(),
                count: run.len(),
            }
            .into());
        }

        // Survivors are processed independently; their relative
        // completion order carries no meaning.
        for record in survivors {
            match self.process_record(record)? {
                FileOutcome::Completed { .. } => outcome.completed += 1,
                FileOutcome::Failed { ref detail } if detail == MISSING_DETAIL => {
                    outcome.failed_missing += 1
                }
                FileOutcome::Failed { .. } => outcome.failed_transform += 1,
                FileOutcome::Skipped | FileOutcome::AlreadyDone => outcome.skipped += 1,
                FileOutcome::Stalled => outcome.stalled += 1,
            }
        }

        log::info!(
            "Batch for owner={} group={}: {}",
            owner,
            logical_group,
            outcome.summary()
        );
        Ok(outcome)
    }

    fn process_record(&self, record: &FileRecord) -> Result<FileOutcome> {
        let _span = info_span!("file", id = %record.id, key = %record.storage_key).entered();

        // Re-delivered work over a finished record is a safe no-op.
        if record.status.is_terminal() {
            log::debug!("Record {} already {}, nothing to do", record.id, record.status);
            return Ok(FileOutcome::AlreadyDone);
        }

        if !self.storage.exists(&record.storage_key)? {
            let applied = db::file_repo::transition(
                &self.db,
                &record.id,
                &[FileStatus::Pending, FileStatus::Processing],
                FileStatus::Failed,
                Some(MISSING_DETAIL),
            )?;
            return Ok(match applied {
                TransitionOutcome::Applied => FileOutcome::Failed {
                    detail: MISSING_DETAIL.to_string(),
                },
                TransitionOutcome::Conflict => FileOutcome::Skipped,
            });
        }

        // Claim the record. Exactly one worker wins this; the losers
        // treat the conflict as "already being handled".
        let claim = db::file_repo::transition(
            &self.db,
            &record.id,
            &[FileStatus::Pending],
            FileStatus::Processing,
            None,
        )?;
        if claim == TransitionOutcome::Conflict {
            log::debug!("Record {} claimed by another worker, skipping", record.id);
            return Ok(FileOutcome::Skipped);
        }

        // Working copy is dropped (and its temp file removed) on every
        // path out of this scope, including transformation errors.
        let copy = match self.storage.open_for_read(&record.storage_key) {
            Ok(copy) => copy,
            Err(StorageError::NotFound(_)) => {
                // Bytes vanished between the exists check and the read.
                let applied = db::file_repo::transition(
                    &self.db,
                    &record.id,
                    &[FileStatus::Processing],
                    FileStatus::Failed,
                    Some(MISSING_DETAIL),
                )?;
                return Ok(match applied {
                    TransitionOutcome::Applied => FileOutcome::Failed {
                        detail: MISSING_DETAIL.to_string(),
                    },
                    TransitionOutcome::Conflict => FileOutcome::Skipped,
                });
            }
            Err(e @ StorageError::AccessDenied { .. }) => {
                // Operator issue, not user-fixable. The record stays
                // `processing`; a retry may succeed once storage is
                // fixed, otherwise the timeout sweep demotes it.
                log::error!("Cannot read bytes for record {}: {}", record.id, e);
                return Ok(FileOutcome::Stalled);
            }
            Err(e) => return Err(e.into()),
        };

        let input = match copy.read() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::error!("Working copy read failed for record {}: {}", record.id, e);
                return Ok(FileOutcome::Stalled);
            }
        };

        let output = match self.transform.apply(&input) {
            Ok(output) => output,
            Err(e) => return self.fail_transform(record, &e),
        };

        // Order matters: bytes first, then the output record, then the
        // status flip. A crash in between leaves state a re-run can
        // safely overwrite or de-duplicate.
        let output_key = output_key(record);
        if let Err(e) = self.storage.write(&output_key, &output.bytes) {
            log::error!("Output write failed for record {}: {}", record.id, e);
            return Ok(FileOutcome::Stalled);
        }

        let summary = serde_json::json!({
            "original_filename": record.original_filename,
            "file_type": record.file_type,
            "rows_read": output.stats.rows_read,
            "rows_kept": output.stats.rows_kept,
            "processed_at": db::now_ts(),
        })
        .to_string();

        let output_record = OutputRecord::new(
            &record.id,
            &output_key,
            output.stats.rows_read,
            output.stats.rows_kept,
            summary,
        );
        let inserted = db::output_repo::insert_once(&self.db, &output_record)?;
        if !inserted {
            log::debug!("Output record for {} already exists", record.id);
        }

        let done = db::file_repo::transition(
            &self.db,
            &record.id,
            &[FileStatus::Processing],
            FileStatus::Completed,
            None,
        )?;
        if done == TransitionOutcome::Conflict {
            // The stale sweep (or repair tool) moved the record while we
            // were writing. The artifact exists; the record's terminal
            // state wins.
            log::warn!("Record {} left processing before completion", record.id);
            return Ok(FileOutcome::Skipped);
        }

        let output_record_id = db::output_repo::find_by_file(&self.db, &record.id)?
            .map(|o| o.id)
            .unwrap_or(output_record.id);

        log::info!(
            "Record {} completed ({} -> {} rows)",
            record.id,
            output.stats.rows_read,
            output.stats.rows_kept
        );
        Ok(FileOutcome::Completed { output_record_id })
    }

    fn fail_transform(
        &self,
        record: &FileRecord,
        error: &TransformError,
    ) -> Result<FileOutcome> {
        // TransformError messages are written for end users; raw internal
        // errors never reach the status detail.
        let detail = format!("File could not be processed: {}", error);
        let applied = db::file_repo::transition(
            &self.db,
            &record.id,
            &[FileStatus::Processing],
            FileStatus::Failed,
            Some(&detail),
        )?;
        Ok(match applied {
            TransitionOutcome::Applied => FileOutcome::Failed { detail },
            TransitionOutcome::Conflict => FileOutcome::Skipped,
        })
    }
}

/// Deterministic output location for a record, so re-runs overwrite
/// instead of accumulating orphans.
fn output_key(record: &FileRecord) -> String {
    format!(
        "outputs/{}/{}/{}_processed_{}",
        storage::safe_segment(&record.owner),
        storage::safe_segment(&record.logical_group),
        record.id,
        storage::safe_segment(&record.original_filename),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::file_repo;
    use crate::storage::MemStorage;

    fn setup() -> (Database, Arc<MemStorage>, Processor) {
        let db = Database::open_in_memory().unwrap();
        let storage = Arc::new(MemStorage::new());
        let processor = Processor::new(db.clone(), storage.clone());
        (db, storage, processor)
    }

    fn seed(db: &Database, storage: &MemStorage, owner: &str, group: &str, name: &str) -> FileRecord {
        let key = format!("uploads/{}/{}/{}", owner, group, name);
        storage.write(&key, b"a,b\n1,2\n1,2\n3,4\n").unwrap();
        let record = FileRecord::new(owner, group, key, name, Some("text/csv".into()));
        file_repo::insert(db, &record).unwrap();
        record
    }

    #[test]
    fn test_run_single_happy_path() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");

        let outcome = processor.run_single(&record.id).unwrap();
        let output_record_id = match outcome {
            FileOutcome::Completed { output_record_id } => output_record_id,
            other => panic!("expected Completed, got {:?}", other),
        };

        let loaded = file_repo::get(&db, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, FileStatus::Completed);
        assert!(loaded.status_detail.is_none());

        let output = db::output_repo::find_by_file(&db, &record.id).unwrap().unwrap();
        assert_eq!(output.id, output_record_id);
        assert_eq!(output.rows_read, 3);
        assert_eq!(output.rows_kept, 2);
        assert!(storage.exists(&output.storage_key).unwrap());
    }

    #[test]
    fn test_run_single_is_idempotent() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");

        processor.run_single(&record.id).unwrap();
        let first = db::output_repo::find_by_file(&db, &record.id).unwrap().unwrap();

        // Simulated at-least-once redelivery.
        let outcome = processor.run_single(&record.id).unwrap();
        assert_eq!(outcome, FileOutcome::AlreadyDone);

        let second = db::output_repo::find_by_file(&db, &record.id).unwrap().unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(
            file_repo::get(&db, &record.id).unwrap().unwrap().status,
            FileStatus::Completed
        );
    }

    #[test]
    fn test_missing_bytes_fail_without_output() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");
        storage.delete(&record.storage_key).unwrap();

        let outcome = processor.run_single(&record.id).unwrap();
        assert_eq!(
            outcome,
            FileOutcome::Failed {
                detail: MISSING_DETAIL.to_string()
            }
        );

        let loaded = file_repo::get(&db, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, FileStatus::Failed);
        assert_eq!(loaded.status_detail.as_deref(), Some(MISSING_DETAIL));
        assert!(db::output_repo::find_by_file(&db, &record.id).unwrap().is_none());
    }

    #[test]
    fn test_transform_failure_has_distinct_detail() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.bin");
        storage.write(&record.storage_key, &[0xff, 0xfe, 0x01]).unwrap();

        let outcome = processor.run_single(&record.id).unwrap();
        let detail = match outcome {
            FileOutcome::Failed { detail } => detail,
            other => panic!("expected Failed, got {:?}", other),
        };
        assert!(detail.contains("could not be processed"));
        assert!(!detail.contains("missing from storage"));

        let loaded = file_repo::get(&db, &record.id).unwrap().unwrap();
        assert_eq!(loaded.status, FileStatus::Failed);
        assert!(db::output_repo::find_by_file(&db, &record.id).unwrap().is_none());
    }

    #[test]
    fn test_unreadable_bytes_leave_record_processing() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");
        storage.deny(&record.storage_key);

        let outcome = processor.run_single(&record.id).unwrap();
        assert_eq!(outcome, FileOutcome::Stalled);

        // Left for the timeout sweep, not failed on the user.
        assert_eq!(
            file_repo::get(&db, &record.id).unwrap().unwrap().status,
            FileStatus::Processing
        );
    }

    #[test]
    fn test_failed_output_write_leaves_record_processing() {
        let (db, storage, processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");
        storage.fail_writes(true);

        let outcome = processor.run_single(&record.id).unwrap();
        assert_eq!(outcome, FileOutcome::Stalled);
        assert_eq!(
            file_repo::get(&db, &record.id).unwrap().unwrap().status,
            FileStatus::Processing
        );
        assert!(db::output_repo::find_by_file(&db, &record.id).unwrap().is_none());

        // Input bytes are untouched; a later retry succeeds. A stalled
        // record is still `processing`, so re-claim it the way a
        // redelivered task would after the sweep window.
        storage.fail_writes(false);
        db.with_conn(|conn| {
            conn.execute(
                "UPDATE file_records SET status='pending' WHERE id=?1",
                [&record.id],
            )?;
            Ok(())
        })
        .unwrap();
        let outcome = processor.run_single(&record.id).unwrap();
        assert!(matches!(outcome, FileOutcome::Completed { .. }));
    }

    #[test]
    fn test_run_batch_partial_missing() {
        let (db, storage, processor) = setup();
        let a = seed(&db, &storage, "u1", "g1", "a.csv");
        let b = seed(&db, &storage, "u1", "g1", "b.csv");
        let c = seed(&db, &storage, "u1", "g1", "c.csv");
        storage.delete(&b.storage_key).unwrap();

        let outcome = processor.run_batch("u1", "g1").unwrap();
        assert_eq!(outcome.captured, 3);
        assert_eq!(outcome.completed, 2);
        assert_eq!(outcome.failed_missing, 1);
        assert_eq!(outcome.failed_transform, 0);

        for id in [&a.id, &c.id] {
            assert_eq!(
                file_repo::get(&db, id).unwrap().unwrap().status,
                FileStatus::Completed
            );
            assert!(db::output_repo::find_by_file(&db, id).unwrap().is_some());
        }
        let failed = file_repo::get(&db, &b.id).unwrap().unwrap();
        assert_eq!(failed.status, FileStatus::Failed);
        assert!(failed.status_detail.unwrap().contains("missing from storage"));
        assert!(db::output_repo::find_by_file(&db, &b.id).unwrap().is_none());
    }

    #[test]
    fn test_run_batch_all_missing_fails_run() {
        let (db, storage, processor) = setup();
        let a = seed(&db, &storage, "u1", "g1", "a.csv");
        let b = seed(&db, &storage, "u1", "g1", "b.csv");
        storage.delete(&a.storage_key).unwrap();
        storage.delete(&b.storage_key).unwrap();

        let err = processor.run_batch("u1", "g1").unwrap_err();
        assert!(err.to_string().contains("missing from storage"));

        // Both records individually failed, zero outputs produced.
        for id in [&a.id, &b.id] {
            assert_eq!(
                file_repo::get(&db, id).unwrap().unwrap().status,
                FileStatus::Failed
            );
            assert!(db::output_repo::find_by_file(&db, id).unwrap().is_none());
        }
    }

    #[test]
    fn test_run_batch_empty_is_noop() {
        let (_db, _storage, processor) = setup();
        let outcome = processor.run_batch("u1", "g1").unwrap();
        assert_eq!(outcome, BatchOutcome::default());
    }

    #[test]
    fn test_batch_captures_pending_only() {
        let (db, storage, processor) = setup();
        let done = seed(&db, &storage, "u1", "g1", "done.csv");
        processor.run_single(&done.id).unwrap();
        let fresh = seed(&db, &storage, "u1", "g1", "fresh.csv");

        let outcome = processor.run_batch("u1", "g1").unwrap();
        assert_eq!(outcome.captured, 1);
        assert_eq!(outcome.completed, 1);

        // The completed record keeps its single output.
        assert!(db::output_repo::find_by_file(&db, &fresh.id).unwrap().is_some());
    }

    #[test]
    fn test_claim_race_single_winner() {
        let (db, storage, _processor) = setup();
        let record = seed(&db, &storage, "u1", "g1", "data.csv");

        let mut handles = Vec::new();
        for _ in 0..2 {
            let db = db.clone();
            let storage = storage.clone();
            let id = record.id.clone();
            handles.push(std::thread::spawn(move || {
                let processor = Processor::new(db, storage);
                processor.run_single(&id).unwrap()
            }));
        }
        let outcomes: Vec<FileOutcome> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let completed = outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Completed { .. }))
            .count();
        let skipped = outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Skipped | FileOutcome::AlreadyDone))
            .count();
        assert_eq!(completed, 1, "exactly one worker completes: {:?}", outcomes);
        assert_eq!(skipped, 1, "the loser skips silently: {:?}", outcomes);

        // One terminal status, one output record, no lost update.
        assert_eq!(
            file_repo::get(&db, &record.id).unwrap().unwrap().status,
            FileStatus::Completed
        );
        assert!(db::output_repo::find_by_file(&db, &record.id).unwrap().is_some());
    }

    #[test]
    fn test_output_key_is_deterministic_and_safe() {
        let record = FileRecord::new("u 1", "g/1", "uploads/x", "weird name!.csv", None);
        let key = output_key(&record);
        assert_eq!(key, output_key(&record));
        crate::storage::validate_key(&key).unwrap();
        assert!(key.contains(&record.id));
    }
}

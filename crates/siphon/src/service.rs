//! In-process surface consumed by the web tier.
//!
//! Upload-accept creates the bytes and the record; progress rendering
//! reads status; download links come from the output listing. Scheduling
//! is the orchestrator's job and stays there.

use std::sync::Arc;

use crate::db::{self, Database, FileRecord, FileStatus, OutputRecord};
use crate::error::Result;
use crate::storage::{self, StorageGateway};

pub struct Service {
    db: Database,
    storage: Arc<dyn StorageGateway>,
}

impl Service {
    pub fn new(db: Database, storage: Arc<dyn StorageGateway>) -> Self {
        Self { db, storage }
    }

    /// Accepts one uploaded file: persists the bytes, then creates the
    /// `pending` record. Bytes-first ordering means a record never
    /// exists without its object having been stored at least once.
    pub fn ingest(
        &self,
        owner: &str,
        logical_group: &str,
        filename: &str,
        bytes: &[u8],
    ) -> Result<FileRecord> {
        let storage_key = format!(
            "uploads/{}/{}/{}_{}",
            storage::safe_segment(owner),
            storage::safe_segment(logical_group),
            uuid::Uuid::new_v4(),
            storage::safe_segment(filename),
        );
        self.storage.write(&storage_key, bytes)?;

        let file_type = mime_guess::from_path(filename)
            .first()
            .map(|m| m.to_string());
        let record = FileRecord::new(owner, logical_group, storage_key, filename, file_type);
        db::file_repo::insert(&self.db, &record)?;

        log::info!(
            "Accepted upload {} for owner={} group={}",
            record.id,
            owner,
            logical_group
        );
        Ok(record)
    }

    /// Status and user-facing detail for one record. Used to render
    /// progress.
    pub fn get_status(&self, file_record_id: &str) -> Result<(FileStatus, Option<String>)> {
        let record = db::file_repo::get(&self.db, file_record_id)?
            .ok_or_else(|| db::DatabaseError::RecordNotFound(file_record_id.to_string()))?;
        Ok((record.status, record.status_detail))
    }

    /// Outputs produced for an owner and logical group. Used to render
    /// download links.
    pub fn list_outputs(&self, owner: &str, logical_group: &str) -> Result<Vec<OutputRecord>> {
        Ok(db::output_repo::list_for_group(
            &self.db,
            owner,
            logical_group,
        )?)
    }
}

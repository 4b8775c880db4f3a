//! Per-file and per-batch processing outcomes.

/// How one unit of work over a single file record ended.
///
/// Everything here is a normal termination: operator-attention storage
/// errors are folded into `Stalled` (record left `processing` for the
/// timeout sweep) rather than propagated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// Output written, output record created, status `completed`.
    Completed { output_record_id: String },
    /// The record was already terminal; re-delivered work is a no-op.
    AlreadyDone,
    /// Lost the claim race to another worker. Silent skip, not an error.
    Skipped,
    /// Recorded on the file record as `failed` with this user-facing detail.
    Failed { detail: String },
    /// Storage was unreachable mid-flight (unreadable bytes or failed
    /// output write). Logged; the record stays `processing` so a retry or
    /// the stale sweep can deal with it.
    Stalled,
}

/// Tally of one batch run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Records captured into the run while still `pending`.
    pub captured: usize,
    pub completed: usize,
    pub failed_missing: usize,
    pub failed_transform: usize,
    pub skipped: usize,
    pub stalled: usize,
}

impl BatchOutcome {
    /// Human-readable one-line summary for logs and task results.
    pub fn summary(&self) -> String {
        format!(
            "captured {} file(s): {} completed, {} missing, {} failed, {} skipped, {} stalled",
            self.captured,
            self.completed,
            self.failed_missing,
            self.failed_transform,
            self.skipped,
            self.stalled
        )
    }
}

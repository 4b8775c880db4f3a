use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    /// Every file captured by the batch run was missing from storage.
    /// The individual records have already been failed; this marks the
    /// run itself as failed instead of succeeding on zero inputs.
    #[error(
        "all {count} files in group '{logical_group}' for owner '{owner}' are missing from storage"
    )]
    AllInputsMissing {
        owner: String,
        logical_group: String,
        count: usize,
    },
}

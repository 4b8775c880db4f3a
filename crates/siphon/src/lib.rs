pub mod config;
pub mod db;
pub mod error;
pub mod pipeline;
pub mod repair;
pub mod service;
pub mod storage;
pub mod worker;

pub use config::{load_config, Config, StorageConfig};
pub use db::{Database, FileRecord, FileStatus, OutputRecord, TransitionOutcome};
pub use error::{
    ConfigError, Result, SiphonError, StorageError, TransformError, WorkerError,
};
pub use pipeline::{BatchOutcome, FileOutcome, Processor, Transform};
pub use service::Service;
pub use storage::{FsStorage, MemStorage, StorageGateway, WorkingCopy};
pub use worker::{Orchestrator, Task, TaskResult};

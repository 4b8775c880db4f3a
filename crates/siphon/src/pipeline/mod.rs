pub mod error;
pub mod outcome;
pub mod runner;
pub mod transform;

pub use error::PipelineError;
pub use outcome::{BatchOutcome, FileOutcome};
pub use runner::Processor;
pub use transform::{LineCleanse, Transform, TransformOutput, TransformStats};

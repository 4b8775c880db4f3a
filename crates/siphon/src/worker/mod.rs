pub mod pool;
pub mod task;

pub use pool::Orchestrator;
pub use task::{Task, TaskResult};

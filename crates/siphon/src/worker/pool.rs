//! Task orchestrator — a pool of worker threads pulling queued work.
//!
//! Decouples "a file was uploaded" from "a file was processed". Delivery
//! is at-least-once from the worker's point of view, which is safe
//! because the batch processor makes every unit of work idempotent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, Receiver, Sender};
use log::{debug, error, info};

use crate::error::WorkerError;
use crate::pipeline::Processor;
use crate::worker::task::{Task, TaskResult};

pub struct Orchestrator {
    task_sender: Sender<Task>,
    result_receiver: Receiver<TaskResult>,
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Starts `worker_count` threads sharing one processor.
    ///
    /// # Panics
    /// Panics if `worker_count` is 0.
    pub fn new(processor: Arc<Processor>, worker_count: usize) -> Self {
        assert!(worker_count > 0, "worker_count must be > 0");
        let (task_sender, task_receiver) = bounded::<Task>(worker_count * 2);
        let (result_sender, result_receiver) = bounded::<TaskResult>(worker_count * 2);
        let shutdown = Arc::new(AtomicBool::new(false));

        let mut workers = Vec::with_capacity(worker_count);

        for worker_id in 0..worker_count {
            let task_rx = task_receiver.clone();
            let result_tx = result_sender.clone();
            let shutdown_flag = Arc::clone(&shutdown);
            let worker_processor = Arc::clone(&processor);

            let handle = thread::spawn(move || {
                run_worker(worker_id, task_rx, result_tx, shutdown_flag, worker_processor);
            });

            workers.push(handle);
        }

        info!("Started {} workers", worker_count);

        Self {
            task_sender,
            result_receiver,
            workers,
            shutdown,
        }
    }

    /// Schedules one unit of work over a single file record.
    pub fn enqueue_single(&self, file_record_id: &str) -> Result<(), WorkerError> {
        self.submit(Task::Single {
            file_record_id: file_record_id.to_string(),
        })
    }

    /// Schedules a unit of work over a whole batch.
    pub fn enqueue_batch(&self, owner: &str, logical_group: &str) -> Result<(), WorkerError> {
        self.submit(Task::Batch {
            owner: owner.to_string(),
            logical_group: logical_group.to_string(),
        })
    }

    fn submit(&self, task: Task) -> Result<(), WorkerError> {
        if self.shutdown.load(Ordering::Relaxed) {
            return Err(WorkerError::ChannelClosed);
        }

        self.task_sender
            .send(task)
            .map_err(|_| WorkerError::ChannelClosed)
    }

    pub fn try_recv_result(&self) -> Option<TaskResult> {
        self.result_receiver.try_recv().ok()
    }

    pub fn recv_result(&self) -> Option<TaskResult> {
        self.result_receiver.recv().ok()
    }

    pub fn shutdown(&self) {
        info!("Shutting down orchestrator...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    pub fn wait(self) {
        // Drop sender to signal workers to exit
        drop(self.task_sender);

        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.join() {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }
}

fn run_worker(
    worker_id: usize,
    task_receiver: Receiver<Task>,
    result_sender: Sender<TaskResult>,
    shutdown: Arc<AtomicBool>,
    processor: Arc<Processor>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            debug!("Worker {} received shutdown signal", worker_id);
            break;
        }

        match task_receiver.recv_timeout(std::time::Duration::from_millis(100)) {
            Ok(task) => {
                debug!("Worker {} processing task {}", worker_id, task);

                let result = execute(&processor, task);

                if let Err(e) = result_sender.send(result) {
                    error!("Worker {} failed to send result: {}", worker_id, e);
                    break;
                }
            }
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {
                continue;
            }
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => {
                debug!("Worker {} task channel disconnected", worker_id);
                break;
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}

/// Runs one task to a terminal result. Infrastructure errors become a
/// logged failure result; they never unwind past this boundary.
fn execute(processor: &Processor, task: Task) -> TaskResult {
    match &task {
        Task::Single { file_record_id } => match processor.run_single(file_record_id) {
            Ok(outcome) => TaskResult::from_file_outcome(task.clone(), &outcome),
            Err(e) => {
                error!("Task {} failed: {}", task, e);
                TaskResult::failure(task.clone(), e.to_string())
            }
        },
        Task::Batch {
            owner,
            logical_group,
        } => match processor.run_batch(owner, logical_group) {
            Ok(outcome) => TaskResult::from_batch_outcome(task.clone(), &outcome),
            Err(e) => {
                error!("Task {} failed: {}", task, e);
                TaskResult::failure(task.clone(), e.to_string())
            }
        },
    }
}

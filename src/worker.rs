//! Background worker: the single-flight pipeline loop.
//!
//! One thread polls the queue for the earliest pending task, drives it
//! through the pipeline, and reports the outcome back. Absence of work means
//! bounded sleeping, not spinning, with a periodic idle log so operators can
//! tell "idle" from "wedged". Shutdown is cooperative: the current task
//! finishes (or honors its own stop flag), then the loop exits.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::pipeline::{PipelineError, PipelineRunner};
use crate::queue::{TaskQueue, TaskSnapshot};

/// Poll cadence while idle.
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Idle log cadence, in polls (once a minute at the 1 s cadence).
const IDLE_LOG_EVERY: u64 = 60;

/// Handle for the worker thread.
///
/// Supports graceful shutdown via `shutdown()` or automatic cleanup on
/// `Drop`. Keep it alive for the lifetime of the process.
pub struct WorkerHandle {
    shutdown: Arc<AtomicBool>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown. The in-flight task (if any) completes,
    /// but no new tasks are picked up.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(h) = self.handle.take() {
            let _ = h.join();
        }
    }
}

/// Start the pipeline worker on a separate thread.
pub fn spawn_worker(queue: Arc<TaskQueue>, runner: PipelineRunner) -> WorkerHandle {
    let shutdown = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&shutdown);

    let handle = std::thread::spawn(move || {
        tracing::info!("Pipeline worker started");
        worker_loop(&queue, &runner, &flag);
        tracing::info!("Pipeline worker shut down");
    });

    WorkerHandle {
        shutdown,
        handle: Some(handle),
    }
}

fn worker_loop(queue: &TaskQueue, runner: &PipelineRunner, shutdown: &AtomicBool) {
    let mut idle_polls: u64 = 0;
    while !shutdown.load(Ordering::Relaxed) {
        let next = match queue.next_pending() {
            Ok(next) => next,
            Err(e) => {
                tracing::error!(error = %e, "Queue read failed; worker backing off");
                std::thread::sleep(POLL_INTERVAL);
                continue;
            }
        };

        let Some(task) = next else {
            idle_polls += 1;
            if idle_polls % IDLE_LOG_EVERY == 0 {
                tracing::debug!(idle_polls, "Worker idle, no pending tasks");
            }
            std::thread::sleep(POLL_INTERVAL);
            continue;
        };

        idle_polls = 0;
        process_one(queue, runner, &task);
    }
}

fn process_one(queue: &TaskQueue, runner: &PipelineRunner, task: &TaskSnapshot) {
    if let Err(e) = queue.start(task.id) {
        // Lost a race with cancel/stop between poll and claim.
        tracing::warn!(task_id = %task.id, error = %e, "Could not claim task");
        return;
    }
    tracing::info!(
        task_id = %task.id,
        user_id = %task.user_id,
        filename = %task.filename,
        "Task processing started"
    );

    match runner.run_task(queue, task) {
        Ok(artifact) => {
            if let Err(e) = queue.complete(task.id, Some(artifact)) {
                tracing::error!(task_id = %task.id, error = %e, "Completion rejected");
            } else {
                tracing::info!(task_id = %task.id, "Task completed");
            }
        }
        Err(PipelineError::Stopped) => {
            if let Err(e) = queue.mark_stopped(task.id) {
                tracing::error!(task_id = %task.id, error = %e, "Stop transition rejected");
            } else {
                tracing::info!(task_id = %task.id, "Task stopped by user request");
            }
        }
        Err(e) => {
            tracing::warn!(task_id = %task.id, error = %e, "Task failed");
            if let Err(e) = queue.fail(task.id, &e.to_string()) {
                tracing::error!(task_id = %task.id, error = %e, "Failure transition rejected");
            }
        }
    }
}

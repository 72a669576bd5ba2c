//! Task queue and single-flight scheduler state.
//!
//! One mutex guards the whole queue: the task map, submission order, the
//! in-flight marker and the duration history. Every public operation locks,
//! mutates, releases; nothing ever blocks on the generation service while
//! holding the lock. The HTTP layer talks to this type and nothing else.

pub mod task;

pub use task::{Task, TaskSnapshot, TaskStatus};

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::time_estimation::{base_estimate, blend_with_history, HistorySample};

/// Completed-task samples retained for future estimates.
const MAX_HISTORY: usize = 100;

/// Errors from queue operations.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("task not found: {0}")]
    NotFound(Uuid),

    #[error("illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition {
        id: Uuid,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("task {0} is currently processing")]
    InFlight(Uuid),

    #[error("internal lock error")]
    LockPoisoned,
}

/// Outcome of a stop request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Task was pending and stopped immediately.
    Stopped,
    /// Task is processing; the worker will honor the flag at the next
    /// checkpoint between work units.
    StopRequested,
}

/// Aggregate view of the queue, from one user's perspective.
#[derive(Debug, Clone, Serialize)]
pub struct QueueSnapshot {
    pub total_tasks: usize,
    pub pending_tasks: usize,
    pub processing_tasks: usize,
    /// Estimated seconds to drain everything currently queued or in flight.
    pub total_estimated_time: f64,
    /// Estimated wait for the requesting user: durations of tasks ahead of
    /// their first pending task, in submission order. `None` without a user
    /// filter.
    pub user_wait_time: Option<f64>,
    /// All tasks, globally visible, ordered by creation time.
    pub tasks: Vec<TaskSnapshot>,
}

/// Counters recovered from completed work.
#[derive(Debug, Clone, Serialize)]
pub struct QueueStatistics {
    pub completed: usize,
    pub failed: usize,
    pub average_duration_secs: Option<f64>,
}

/// Liveness payload for a health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    pub queue_size: usize,
    pub processing: bool,
}

struct Inner {
    tasks: HashMap<Uuid, Task>,
    /// Task ids in submission order. Membership defines queue position;
    /// cancelled/stopped/removed tasks leave the sequence.
    order: Vec<Uuid>,
    /// The single in-flight task, if any.
    current: Option<Uuid>,
    history: Vec<HistorySample>,
}

/// Thread-safe task queue with single-flight dequeue.
pub struct TaskQueue {
    inner: Mutex<Inner>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                tasks: HashMap::new(),
                order: Vec::new(),
                current: None,
                history: Vec::new(),
            }),
        }
    }

    /// Add a task; returns its id. The duration estimate blends the size
    /// heuristic with the history of similarly sized completed tasks.
    pub fn enqueue(
        &self,
        user_id: &str,
        filename: &str,
        size_hint: u64,
    ) -> Result<Uuid, QueueError> {
        let mut inner = self.lock()?;
        let estimate = blend_with_history(base_estimate(size_hint), &inner.history);
        let task = Task::new(user_id, filename, estimate);
        let id = task.id;
        inner.order.push(id);
        inner.tasks.insert(id, task);
        tracing::info!(task_id = %id, user_id, filename, estimate_secs = estimate, "Task enqueued");
        Ok(id)
    }

    pub fn get(&self, id: Uuid) -> Result<TaskSnapshot, QueueError> {
        let inner = self.lock()?;
        let task = inner.tasks.get(&id).ok_or(QueueError::NotFound(id))?;
        Ok(task.snapshot(Self::position_of(&inner, id)))
    }

    /// Full queue state, optionally from one user's perspective.
    pub fn list(&self, user_id: Option<&str>) -> Result<QueueSnapshot, QueueError> {
        let inner = self.lock()?;
        let now = Utc::now();

        let pending = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        let processing = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Processing)
            .count();

        let mut total_estimated_time: f64 = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .map(|t| t.estimated_duration)
            .sum();
        if let Some(current) = inner.current.and_then(|id| inner.tasks.get(&id)) {
            total_estimated_time += current.remaining_estimate(now);
        }

        let user_wait_time = user_id.map(|user| Self::wait_time_for(&inner, user));

        let mut tasks: Vec<&Task> = inner.tasks.values().collect();
        tasks.sort_by_key(|t| t.created_at);
        let tasks = tasks
            .into_iter()
            .map(|t| t.snapshot(Self::position_of(&inner, t.id)))
            .collect();

        Ok(QueueSnapshot {
            total_tasks: inner.tasks.len(),
            pending_tasks: pending,
            processing_tasks: processing,
            total_estimated_time,
            user_wait_time,
            tasks,
        })
    }

    /// Earliest pending task, only when nothing is in flight (single-flight).
    /// Does not claim the task; the worker calls [`TaskQueue::start`].
    pub fn next_pending(&self) -> Result<Option<TaskSnapshot>, QueueError> {
        let inner = self.lock()?;
        if inner.current.is_some() {
            return Ok(None);
        }
        for id in &inner.order {
            if let Some(task) = inner.tasks.get(id) {
                if task.status == TaskStatus::Pending {
                    return Ok(Some(task.snapshot(Some(1))));
                }
            }
        }
        Ok(None)
    }

    /// Pending → Processing. Sets the start timestamp exactly once and marks
    /// the task as the single in-flight one.
    pub fn start(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        if let Some(current) = inner.current {
            if current != id {
                return Err(QueueError::InFlight(current));
            }
        }
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Pending, TaskStatus::Processing)?;
        task.status = TaskStatus::Processing;
        task.started_at = Some(Utc::now());
        inner.current = Some(id);
        Ok(())
    }

    /// Progress is clamped to 0–100 and never moves backwards.
    pub fn update_progress(&self, id: Uuid, progress: f64) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Processing)?;
        task.progress = task.progress.max(progress.clamp(0.0, 100.0));
        Ok(())
    }

    pub fn update_stage(&self, id: Uuid, stage: usize) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Processing)?;
        task.current_stage = stage.min(task.total_stages);
        Ok(())
    }

    /// Push the worker's live remaining-time projection; `None` clears it.
    pub fn update_eta(&self, id: Uuid, eta_secs: Option<f64>) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Processing)?;
        task.dynamic_eta = eta_secs.map(|e| e.max(0.0));
        Ok(())
    }

    /// Processing → Completed. Records the actual duration in history.
    pub fn complete(&self, id: Uuid, result_ref: Option<String>) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Completed)?;
        let now = Utc::now();
        task.status = TaskStatus::Completed;
        task.completed_at = Some(now);
        task.progress = 100.0;
        task.dynamic_eta = None;
        task.result_ref = result_ref;
        if let Some(started) = task.started_at {
            task.actual_duration = Some((now - started).num_milliseconds() as f64 / 1000.0);
        }
        let sample = task.actual_duration.map(|duration_secs| HistorySample {
            logical_size: task.estimated_duration,
            duration_secs,
        });
        if inner.current == Some(id) {
            inner.current = None;
        }
        if let Some(sample) = sample {
            inner.history.push(sample);
            if inner.history.len() > MAX_HISTORY {
                let excess = inner.history.len() - MAX_HISTORY;
                inner.history.drain(..excess);
            }
        }
        Ok(())
    }

    /// Processing → Failed with the captured message.
    pub fn fail(&self, id: Uuid, message: &str) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Failed)?;
        let now = Utc::now();
        task.status = TaskStatus::Failed;
        task.completed_at = Some(now);
        task.error_message = Some(message.to_string());
        task.dynamic_eta = None;
        if let Some(started) = task.started_at {
            task.actual_duration = Some((now - started).num_milliseconds() as f64 / 1000.0);
        }
        if inner.current == Some(id) {
            inner.current = None;
        }
        Ok(())
    }

    /// Pending → Cancelled. A processing task cannot be cancelled: the
    /// worker is single-flight and mid-stage artifacts would be corrupted.
    pub fn cancel(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Pending, TaskStatus::Cancelled)?;
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        inner.order.retain(|tid| *tid != id);
        Ok(())
    }

    /// Stop a task. Pending tasks stop immediately; processing tasks get the
    /// cooperative flag set and stop at the worker's next checkpoint.
    pub fn request_stop(&self, id: Uuid) -> Result<StopOutcome, QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        match task.status {
            TaskStatus::Pending => {
                task.status = TaskStatus::Stopped;
                inner.order.retain(|tid| *tid != id);
                Ok(StopOutcome::Stopped)
            }
            TaskStatus::Processing => {
                task.stop_requested = true;
                Ok(StopOutcome::StopRequested)
            }
            from => Err(QueueError::IllegalTransition {
                id,
                from,
                to: TaskStatus::Stopped,
            }),
        }
    }

    /// Whether a stop has been requested for the task. Polled by the worker
    /// between stages and between work units.
    pub fn stop_requested(&self, id: Uuid) -> bool {
        self.lock()
            .ok()
            .and_then(|inner| inner.tasks.get(&id).map(|t| t.stop_requested))
            .unwrap_or(false)
    }

    /// Processing → Stopped, called by the worker after honoring the flag.
    pub fn mark_stopped(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Processing, TaskStatus::Stopped)?;
        task.status = TaskStatus::Stopped;
        task.stop_requested = false;
        task.dynamic_eta = None;
        if inner.current == Some(id) {
            inner.current = None;
        }
        inner.order.retain(|tid| *tid != id);
        Ok(())
    }

    /// Stopped → Pending, re-entering at the tail of the queue. The task
    /// keeps its id; progress and timestamps reset.
    pub fn restart(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get_mut(&id).ok_or(QueueError::NotFound(id))?;
        expect_status(task, TaskStatus::Stopped, TaskStatus::Pending)?;
        task.status = TaskStatus::Pending;
        task.started_at = None;
        task.completed_at = None;
        task.actual_duration = None;
        task.progress = 0.0;
        task.current_stage = 0;
        task.dynamic_eta = None;
        task.error_message = None;
        task.stop_requested = false;
        inner.order.retain(|tid| *tid != id);
        inner.order.push(id);
        Ok(())
    }

    /// Delete a task entirely. Rejected while processing.
    pub fn remove(&self, id: Uuid) -> Result<(), QueueError> {
        let mut inner = self.lock()?;
        let task = inner.tasks.get(&id).ok_or(QueueError::NotFound(id))?;
        if task.status == TaskStatus::Processing {
            return Err(QueueError::InFlight(id));
        }
        inner.tasks.remove(&id);
        inner.order.retain(|tid| *tid != id);
        Ok(())
    }

    /// Retention sweep: drop terminal tasks whose completion is older than
    /// the cutoff. Returns how many were removed.
    pub fn cleanup_old_tasks(&self, max_age_hours: i64) -> Result<usize, QueueError> {
        let mut inner = self.lock()?;
        let cutoff = Utc::now() - chrono::Duration::hours(max_age_hours);
        let stale: Vec<Uuid> = inner
            .tasks
            .values()
            .filter(|t| {
                t.status.is_terminal() && t.completed_at.map(|c| c < cutoff).unwrap_or(false)
            })
            .map(|t| t.id)
            .collect();
        for id in &stale {
            inner.tasks.remove(id);
            inner.order.retain(|tid| tid != id);
        }
        if !stale.is_empty() {
            tracing::debug!(removed = stale.len(), "Retention sweep removed old tasks");
        }
        Ok(stale.len())
    }

    pub fn statistics(&self) -> Result<QueueStatistics, QueueError> {
        let inner = self.lock()?;
        let completed: Vec<f64> = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Completed)
            .filter_map(|t| t.actual_duration)
            .collect();
        let failed = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Failed)
            .count();
        let average = if completed.is_empty() {
            None
        } else {
            Some(completed.iter().sum::<f64>() / completed.len() as f64)
        };
        Ok(QueueStatistics {
            completed: completed.len(),
            failed,
            average_duration_secs: average,
        })
    }

    pub fn health(&self) -> Result<HealthSnapshot, QueueError> {
        let inner = self.lock()?;
        let pending = inner
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Pending)
            .count();
        Ok(HealthSnapshot {
            queue_size: pending,
            processing: inner.current.is_some(),
        })
    }

    // ── Internal ────────────────────────────────────────────

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, QueueError> {
        self.inner.lock().map_err(|_| QueueError::LockPoisoned)
    }

    /// 1-based rank among still-pending tasks in submission order.
    fn position_of(inner: &Inner, id: Uuid) -> Option<usize> {
        let mut rank = 0;
        for tid in &inner.order {
            let task = inner.tasks.get(tid)?;
            if task.status == TaskStatus::Pending {
                rank += 1;
                if *tid == id {
                    return Some(rank);
                }
            }
        }
        None
    }

    /// Walk submission order, summing time for everything ahead of the
    /// user's first pending task: remaining time for the in-flight task,
    /// full estimates for other pending tasks.
    fn wait_time_for(inner: &Inner, user_id: &str) -> f64 {
        let now = Utc::now();
        let mut wait = 0.0;
        for tid in &inner.order {
            let Some(task) = inner.tasks.get(tid) else {
                continue;
            };
            if task.user_id == user_id && task.status == TaskStatus::Pending {
                break;
            }
            match task.status {
                TaskStatus::Processing => wait += task.remaining_estimate(now),
                TaskStatus::Pending => wait += task.estimated_duration,
                _ => {}
            }
        }
        wait
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

fn expect_status(task: &Task, from: TaskStatus, to: TaskStatus) -> Result<(), QueueError> {
    if task.status != from {
        return Err(QueueError::IllegalTransition {
            id: task.id,
            from: task.status,
            to,
        });
    }
    Ok(())
}

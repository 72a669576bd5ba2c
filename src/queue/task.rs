//! Task model and lifecycle states.
//!
//! Legal transitions:
//! ```text
//! Pending → Processing → {Completed, Failed, Stopped}
//! Pending → {Cancelled, Stopped}
//! Stopped → Pending   (restart, re-enters at the queue tail)
//! ```
//! Completed/Failed/Cancelled are terminal. Stopped looks terminal but keeps
//! an outbound edge via restart.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Floor on reported time remaining for a queued task: the model may still
/// be loading, so "0 s" would be a lie.
const PENDING_FLOOR_SECS: f64 = 60.0;

/// Floor on reported time remaining while processing.
const PROCESSING_FLOOR_SECS: f64 = 10.0;

/// Number of pipeline stages every task passes through.
pub const TOTAL_STAGES: usize = 4;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
    Stopped,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Stopped => "stopped",
        }
    }

    /// True for states with no outbound edges. Stopped is deliberately not
    /// terminal; a stopped task can be restarted.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A unit of client-visible work. Mutated only by the queue under its lock.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: Uuid,
    pub user_id: String,
    pub filename: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Seconds, derived at enqueue time from the size hint and history.
    pub estimated_duration: f64,
    /// Seconds, set once at completion or failure.
    pub actual_duration: Option<f64>,
    /// 0.0–100.0, monotonically non-decreasing while processing.
    pub progress: f64,
    pub current_stage: usize,
    pub total_stages: usize,
    /// Live projection pushed by the worker; preferred over the static
    /// formula when present.
    pub dynamic_eta: Option<f64>,
    pub error_message: Option<String>,
    /// Reference to the finished artifact, as returned by the sink.
    pub result_ref: Option<String>,
    /// Cooperative stop flag, honored by the worker between work units.
    pub stop_requested: bool,
}

impl Task {
    pub fn new(user_id: &str, filename: &str, estimated_duration: f64) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            filename: filename.to_string(),
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            estimated_duration,
            actual_duration: None,
            progress: 0.0,
            current_stage: 0,
            total_stages: TOTAL_STAGES,
            dynamic_eta: None,
            error_message: None,
            result_ref: None,
            stop_requested: false,
        }
    }

    /// Estimated seconds until completion, or `None` when unknowable.
    ///
    /// Never reports zero while the task is still pending or processing:
    /// pending tasks floor at 60 s (model load), processing tasks at 10 s.
    pub fn estimated_time_remaining(&self, now: DateTime<Utc>) -> Option<f64> {
        if self.status.is_terminal() {
            return Some(0.0);
        }

        match self.status {
            TaskStatus::Pending => Some(self.estimated_duration.max(PENDING_FLOOR_SECS)),
            TaskStatus::Processing => {
                if let Some(eta) = self.dynamic_eta {
                    return Some(eta.max(PROCESSING_FLOOR_SECS));
                }
                let started = self.started_at?;
                let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
                let mut remaining = (self.estimated_duration - elapsed).max(0.0);
                if self.progress > 0.0 {
                    remaining *= 1.0 - self.progress / 100.0;
                }
                Some(remaining.max(PROCESSING_FLOOR_SECS))
            }
            _ => None,
        }
    }

    /// Remaining seconds of the static estimate, ignoring progress. Used by
    /// the queue for aggregate wait times.
    pub fn remaining_estimate(&self, now: DateTime<Utc>) -> f64 {
        match self.started_at {
            Some(started) => {
                let elapsed = (now - started).num_milliseconds() as f64 / 1000.0;
                (self.estimated_duration - elapsed).max(0.0)
            }
            None => self.estimated_duration,
        }
    }

    pub fn snapshot(&self, position_in_queue: Option<usize>) -> TaskSnapshot {
        TaskSnapshot {
            id: self.id,
            user_id: self.user_id.clone(),
            filename: self.filename.clone(),
            status: self.status,
            created_at: self.created_at,
            started_at: self.started_at,
            completed_at: self.completed_at,
            estimated_duration: self.estimated_duration,
            actual_duration: self.actual_duration,
            progress: self.progress,
            current_stage: self.current_stage,
            total_stages: self.total_stages,
            estimated_time_remaining: self.estimated_time_remaining(Utc::now()),
            error_message: self.error_message.clone(),
            result_ref: self.result_ref.clone(),
            position_in_queue,
        }
    }
}

/// Client-visible view of a task, safe to hand across the HTTP boundary.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub user_id: String,
    pub filename: String,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub estimated_duration: f64,
    pub actual_duration: Option<f64>,
    pub progress: f64,
    pub current_stage: usize,
    pub total_stages: usize,
    pub estimated_time_remaining: Option<f64>,
    pub error_message: Option<String>,
    pub result_ref: Option<String>,
    /// 1-based rank among still-pending tasks; `None` once off the queue.
    pub position_in_queue: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task() -> Task {
        Task::new("user-1", "manual.docx", 120.0)
    }

    #[test]
    fn pending_eta_floors_at_sixty_seconds() {
        let mut t = task();
        t.estimated_duration = 5.0;
        assert_eq!(t.estimated_time_remaining(Utc::now()), Some(60.0));
    }

    #[test]
    fn pending_eta_uses_estimate_above_floor() {
        let t = task();
        assert_eq!(t.estimated_time_remaining(Utc::now()), Some(120.0));
    }

    #[test]
    fn processing_eta_never_zero() {
        let mut t = task();
        t.status = TaskStatus::Processing;
        t.started_at = Some(Utc::now() - chrono::Duration::seconds(500));
        t.progress = 99.0;
        let eta = t.estimated_time_remaining(Utc::now()).unwrap();
        assert!(eta >= 10.0, "got {eta}");
    }

    #[test]
    fn processing_eta_scales_with_progress() {
        let mut t = task();
        t.status = TaskStatus::Processing;
        t.started_at = Some(Utc::now());
        t.progress = 50.0;
        let eta = t.estimated_time_remaining(Utc::now()).unwrap();
        // ~120 remaining × (1 − 0.5) = ~60
        assert!((55.0..=65.0).contains(&eta), "got {eta}");
    }

    #[test]
    fn dynamic_eta_preferred_when_present() {
        let mut t = task();
        t.status = TaskStatus::Processing;
        t.started_at = Some(Utc::now());
        t.dynamic_eta = Some(42.0);
        assert_eq!(t.estimated_time_remaining(Utc::now()), Some(42.0));
    }

    #[test]
    fn dynamic_eta_also_floored() {
        let mut t = task();
        t.status = TaskStatus::Processing;
        t.dynamic_eta = Some(0.5);
        assert_eq!(t.estimated_time_remaining(Utc::now()), Some(10.0));
    }

    #[test]
    fn terminal_states_report_zero() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
        ] {
            let mut t = task();
            t.status = status;
            assert_eq!(t.estimated_time_remaining(Utc::now()), Some(0.0));
        }
    }

    #[test]
    fn stopped_reports_unknown() {
        let mut t = task();
        t.status = TaskStatus::Stopped;
        assert_eq!(t.estimated_time_remaining(Utc::now()), None);
    }

    #[test]
    fn stopped_is_not_terminal() {
        assert!(!TaskStatus::Stopped.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(json, "\"processing\"");
    }

    #[test]
    fn snapshot_carries_position() {
        let t = task();
        let snap = t.snapshot(Some(3));
        assert_eq!(snap.position_in_queue, Some(3));
        let json = serde_json::to_string(&snap).unwrap();
        assert!(json.contains("\"position_in_queue\":3"));
        assert!(json.contains("\"status\":\"pending\""));
    }
}

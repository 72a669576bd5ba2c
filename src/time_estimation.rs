//! Up-front duration estimation for queued tasks.
//!
//! At enqueue time the only signal is the upload size, so the estimate is a
//! pages-from-bytes heuristic blended with the durations of similarly sized
//! tasks the queue has already completed.

// ═══════════════════════════════════════════════════════════
// Constants
// ═══════════════════════════════════════════════════════════

/// Approximate bytes per document page for office formats.
const BYTES_PER_PAGE: f64 = 50.0 * 1024.0;

/// Baseline processing cost per page (seconds).
const SECS_PER_PAGE: f64 = 30.0;

/// Floor for any estimate; covers model warm-up even for tiny files.
const MIN_ESTIMATE_SECS: f64 = 60.0;

/// Relative window within which a past task counts as "similar size".
const SIMILARITY_WINDOW: f64 = 0.5;

/// Weight of the historical average when similar samples exist.
const HISTORY_WEIGHT: f64 = 0.7;

// ═══════════════════════════════════════════════════════════
// Types
// ═══════════════════════════════════════════════════════════

/// One completed task, as retained for future estimates.
///
/// `logical_size` is the task's original estimate rather than its byte size,
/// which keeps matching stable across documents with very different
/// text-to-markup ratios.
#[derive(Debug, Clone, Copy)]
pub struct HistorySample {
    pub logical_size: f64,
    pub duration_secs: f64,
}

// ═══════════════════════════════════════════════════════════
// Estimation
// ═══════════════════════════════════════════════════════════

/// Heuristic estimate from the upload size alone.
///
/// `pages ≈ size / 50 KiB` (min 1), 30 s per page, floored at 60 s.
pub fn base_estimate(file_size: u64) -> f64 {
    let approx_pages = (file_size as f64 / BYTES_PER_PAGE).max(1.0);
    (approx_pages * SECS_PER_PAGE).max(MIN_ESTIMATE_SECS)
}

/// Blend the heuristic with the average duration of similarly sized past
/// tasks: 70 % history, 30 % heuristic. Falls back to the heuristic when no
/// sample lands within the similarity window.
pub fn blend_with_history(base: f64, history: &[HistorySample]) -> f64 {
    let similar: Vec<&HistorySample> = history
        .iter()
        .filter(|h| (h.logical_size - base).abs() / base.max(1.0) < SIMILARITY_WINDOW)
        .collect();

    if similar.is_empty() {
        return base;
    }

    let avg = similar.iter().map(|h| h.duration_secs).sum::<f64>() / similar.len() as f64;
    avg * HISTORY_WEIGHT + base * (1.0 - HISTORY_WEIGHT)
}

// ═══════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════

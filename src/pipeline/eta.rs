//! Dynamic remaining-time estimation from live throughput.
//!
//! The worker records the wall-clock duration of each processed unit tagged
//! with its stage. The projection is a heuristic: average unit duration in
//! the current stage times units left, plus an extrapolation for stages not
//! yet started. It is bounded, non-negative, and "unknown" rather than zero
//! when no data exists yet.

/// Retained throughput samples; older samples are discarded first.
const MAX_SAMPLES: usize = 100;

/// One `(stage, duration)` measurement.
#[derive(Debug, Clone, Copy)]
struct ThroughputSample {
    stage: usize,
    duration_secs: f64,
}

/// Rolling per-unit throughput measurements for one task.
#[derive(Debug, Default)]
pub struct EtaEstimator {
    samples: Vec<ThroughputSample>,
}

impl EtaEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a completed unit's duration for the given stage.
    pub fn record(&mut self, stage: usize, duration_secs: f64) {
        self.samples.push(ThroughputSample {
            stage,
            duration_secs: duration_secs.max(0.0),
        });
        if self.samples.len() > MAX_SAMPLES {
            let excess = self.samples.len() - MAX_SAMPLES;
            self.samples.drain(..excess);
        }
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    /// Projected seconds remaining, or `None` with no samples yet.
    ///
    /// `units_per_stage` is the unit count of the current stage, used as an
    /// analogy for stages that have not produced any units yet.
    pub fn estimate(
        &self,
        stage: usize,
        units_remaining: usize,
        units_per_stage: usize,
        stages_not_started: usize,
    ) -> Option<f64> {
        let overall = self.overall_average()?;
        let current = self.stage_average(stage).unwrap_or(overall);
        let eta = current * units_remaining as f64
            + overall * units_per_stage as f64 * stages_not_started as f64;
        Some(eta.max(0.0))
    }

    fn overall_average(&self) -> Option<f64> {
        if self.samples.is_empty() {
            return None;
        }
        Some(self.samples.iter().map(|s| s.duration_secs).sum::<f64>() / self.samples.len() as f64)
    }

    fn stage_average(&self, stage: usize) -> Option<f64> {
        let matching: Vec<f64> = self
            .samples
            .iter()
            .filter(|s| s.stage == stage)
            .map(|s| s.duration_secs)
            .collect();
        if matching.is_empty() {
            return None;
        }
        Some(matching.iter().sum::<f64>() / matching.len() as f64)
    }
}

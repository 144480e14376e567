// src/pipeline/metrics.rs
//
// Counters and timings for the running pipeline. Cheap to clone: the
// consumer task updates them while the binary reads a summary at shutdown.

use crate::types::CrossoverEvent;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub total_frames: Arc<AtomicU64>,
    pub frames_dropped: Arc<AtomicU64>,
    pub input_errors: Arc<AtomicU64>,
    pub observations: Arc<AtomicU64>,
    pub candidates: Arc<AtomicU64>,
    pub events_emitted: Arc<AtomicU64>,
    pub events_suppressed: Arc<AtomicU64>,
    pub sink_failures: Arc<AtomicU64>,
    pub processing_time_us: Arc<AtomicU64>,
    crossovers: Arc<Mutex<CrossoverStats>>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            total_frames: Arc::new(AtomicU64::new(0)),
            frames_dropped: Arc::new(AtomicU64::new(0)),
            input_errors: Arc::new(AtomicU64::new(0)),
            observations: Arc::new(AtomicU64::new(0)),
            candidates: Arc::new(AtomicU64::new(0)),
            events_emitted: Arc::new(AtomicU64::new(0)),
            events_suppressed: Arc::new(AtomicU64::new(0)),
            sink_failures: Arc::new(AtomicU64::new(0)),
            processing_time_us: Arc::new(AtomicU64::new(0)),
            crossovers: Arc::new(Mutex::new(CrossoverStats::default())),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_timing(&self, counter: &AtomicU64, duration_us: u64) {
        counter.store(duration_us, Ordering::Relaxed);
    }

    pub fn record_crossover(&self, event: &CrossoverEvent) {
        if let Ok(mut stats) = self.crossovers.lock() {
            stats.record(event);
        }
    }

    pub fn fps(&self) -> f64 {
        let frames = self.total_frames.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        let crossovers = self
            .crossovers
            .lock()
            .map(|s| s.summary())
            .unwrap_or_default();

        MetricsSummary {
            total_frames: self.total_frames.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            input_errors: self.input_errors.load(Ordering::Relaxed),
            observations: self.observations.load(Ordering::Relaxed),
            candidates: self.candidates.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_suppressed: self.events_suppressed.load(Ordering::Relaxed),
            sink_failures: self.sink_failures.load(Ordering::Relaxed),
            last_processing_us: self.processing_time_us.load(Ordering::Relaxed),
            fps: self.fps(),
            crossovers,
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, Default)]
struct CrossoverStats {
    total: u64,
    angle_sum: f64,
    combined_confidence_sum: f64,
    last_detection_ms: Option<f64>,
}

impl CrossoverStats {
    fn record(&mut self, event: &CrossoverEvent) {
        self.total += 1;
        self.angle_sum += event.angle_deg as f64;
        self.combined_confidence_sum += event.combined_confidence() as f64;
        self.last_detection_ms = Some(event.timestamp_ms);
    }

    fn summary(&self) -> CrossoverSummary {
        let n = self.total.max(1) as f64;
        CrossoverSummary {
            total: self.total,
            avg_angle_deg: if self.total > 0 { self.angle_sum / n } else { 0.0 },
            avg_combined_confidence: if self.total > 0 {
                self.combined_confidence_sum / n
            } else {
                0.0
            },
            last_detection_ms: self.last_detection_ms,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrossoverSummary {
    pub total: u64,
    pub avg_angle_deg: f64,
    pub avg_combined_confidence: f64,
    pub last_detection_ms: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MetricsSummary {
    pub total_frames: u64,
    pub frames_dropped: u64,
    pub input_errors: u64,
    pub observations: u64,
    pub candidates: u64,
    pub events_emitted: u64,
    pub events_suppressed: u64,
    pub sink_failures: u64,
    pub last_processing_us: u64,
    pub fps: f64,
    pub crossovers: CrossoverSummary,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;

    #[test]
    fn test_crossover_stats_average() {
        let metrics = PipelineMetrics::new();
        assert_eq!(metrics.summary().crossovers.total, 0);
        assert_eq!(metrics.summary().crossovers.avg_angle_deg, 0.0);

        for (angle, t) in [(30.0, 100.0), (50.0, 200.0)] {
            metrics.record_crossover(&CrossoverEvent {
                line_a: "a".into(),
                line_b: "b".into(),
                point: Point::default(),
                angle_deg: angle,
                confidence_a: 0.9,
                confidence_b: 0.9,
                timestamp_ms: t,
            });
        }

        let clone = metrics.clone();
        clone.inc(&clone.events_emitted);

        let summary = metrics.summary();
        assert_eq!(summary.events_emitted, 1);
        assert_eq!(summary.crossovers.total, 2);
        assert!((summary.crossovers.avg_angle_deg - 40.0).abs() < 1e-9);
        assert_eq!(summary.crossovers.last_detection_ms, Some(200.0));
    }
}

// src/pipeline/orchestrator.rs
//
// Single entry point: one frame in, at most one crossover out.
//
//   Frame → ColorLineExtractor → LineTracker → CrossoverAnalyzer → DebounceGate
//
// `process_frame` runs the whole chain to completion before returning, so
// tracker and gate state are never touched by two frames at once. A frame
// that fails validation is rejected before any stage runs.

use super::event_bus::EventSink;
use super::frame_context::FrameContext;
use super::metrics::PipelineMetrics;
use crate::crossover::{AnalyzerConfig, CrossoverAnalyzer};
use crate::debounce::{DebounceGate, DebounceState};
use crate::error::{DetectionError, DetectionResult};
use crate::line_extraction::{best_observation, ColorLineExtractor};
use crate::line_tracker::LineTracker;
use crate::types::{ColorProfile, Config, CrossoverEvent, Frame, LineObservation};
use std::time::Instant;
use tracing::{debug, info, warn};

pub struct CrossoverPipeline {
    profiles: Vec<ColorProfile>,
    pair: (String, String),
    extractor: ColorLineExtractor,
    tracker: LineTracker,
    analyzer: CrossoverAnalyzer,
    gate: DebounceGate,
    metrics: PipelineMetrics,
    last_frame_id: Option<u64>,
}

impl CrossoverPipeline {
    pub fn new(config: &Config) -> DetectionResult<Self> {
        Self::with_debounce_state(config, DebounceState::new())
    }

    /// Build a pipeline that continues from existing suppression history.
    pub fn with_debounce_state(config: &Config, state: DebounceState) -> DetectionResult<Self> {
        let problems = config.validate();
        if !problems.is_empty() {
            return Err(DetectionError::Config(problems.join("; ")));
        }

        let profiles = config.enabled_color_profiles();
        let pair = config.tracked_pair(&profiles)?;
        let thresholds = config.thresholds();

        let extractor =
            ColorLineExtractor::new(config.extraction.clone(), thresholds.min_line_length);
        let tracker = LineTracker::new(
            profiles.iter().map(|p| p.name.clone()),
            config.tracker.clone(),
            thresholds.confidence_min,
            thresholds.staleness_ms,
        );
        let analyzer = CrossoverAnalyzer::new(AnalyzerConfig::from_thresholds(
            &thresholds,
            config.frame_interval_ms(),
        ));
        let gate = DebounceGate::with_state(
            thresholds.debounce_cooldown_ms,
            thresholds.debounce_distance_px,
            state,
        );

        info!(
            "✓ Pipeline ready: {} profiles, tracking {} × {} (angle ≥ {:.1}°, tolerance {:.1}px, cooldown {:.0}ms)",
            profiles.len(),
            pair.0,
            pair.1,
            thresholds.angle_threshold_deg,
            thresholds.intersection_tolerance_px,
            thresholds.debounce_cooldown_ms
        );

        Ok(Self {
            profiles,
            pair,
            extractor,
            tracker,
            analyzer,
            gate,
            metrics: PipelineMetrics::new(),
            last_frame_id: None,
        })
    }

    /// Process one frame. Returns the crossover emitted for it, if any.
    pub fn process_frame(&mut self, frame: &Frame) -> DetectionResult<Option<CrossoverEvent>> {
        Ok(self.process_frame_detailed(frame)?.emitted)
    }

    /// Like `process_frame`, but returns every stage's output.
    pub fn process_frame_detailed(&mut self, frame: &Frame) -> DetectionResult<FrameContext> {
        if let Err(e) = frame.validate() {
            self.metrics.inc(&self.metrics.input_errors);
            warn!("⚠️  Frame rejected: {}", e);
            return Err(e);
        }

        let started = Instant::now();
        self.count_dropped_frames(frame.frame_id);

        let observations = self.extractor.extract(frame, &self.profiles);
        let mut ctx = self.run_stages(&observations, frame.frame_id, frame.timestamp_ms);

        ctx.processing_us = started.elapsed().as_micros() as u64;
        self.metrics
            .set_timing(&self.metrics.processing_time_us, ctx.processing_us);
        Ok(ctx)
    }

    /// Run tracker, analyzer and gate on observations extracted elsewhere.
    pub fn process_observations(
        &mut self,
        observations: &[LineObservation],
        frame_id: u64,
        timestamp_ms: f64,
    ) -> FrameContext {
        self.count_dropped_frames(frame_id);
        self.run_stages(observations, frame_id, timestamp_ms)
    }

    fn run_stages(
        &mut self,
        observations: &[LineObservation],
        frame_id: u64,
        timestamp_ms: f64,
    ) -> FrameContext {
        let mut ctx = FrameContext::new(frame_id, timestamp_ms);
        self.metrics.inc(&self.metrics.total_frames);
        self.metrics
            .add(&self.metrics.observations, observations.len() as u64);

        // ── Tracker: one merge per profile, best observation wins ──
        for profile in &self.profiles {
            let best = best_observation(observations, &profile.name);
            if let Some(obs) = best {
                ctx.observations.push(obs.clone());
            }
            self.tracker.update(&profile.name, best, timestamp_ms);
            if let Some(state) = self.tracker.state(&profile.name) {
                ctx.track_states.insert(profile.name.clone(), state);
            }
        }

        // ── Analyzer ──
        let (a, b) = (&self.pair.0, &self.pair.1);
        let line_a = self.tracker.reading(a, timestamp_ms);
        let line_b = self.tracker.reading(b, timestamp_ms);
        let candidate = match self.analyzer.evaluate(line_a, line_b, timestamp_ms) {
            Ok(event) => event,
            Err(reason) => {
                debug!("Frame {}: no candidate ({:?})", frame_id, reason);
                ctx.rejection = Some(reason);
                return ctx;
            }
        };
        self.metrics.inc(&self.metrics.candidates);
        ctx.candidate = Some(candidate.clone());

        // ── Gate ──
        ctx.decision = Some(self.gate.decide(&candidate));
        match self.gate.admit(candidate) {
            Some(event) => {
                self.metrics.inc(&self.metrics.events_emitted);
                self.metrics.record_crossover(&event);
                ctx.emitted = Some(event);
            }
            None => self.metrics.inc(&self.metrics.events_suppressed),
        }

        ctx
    }

    /// Hand `event` to every sink once. Failures are logged and counted;
    /// they never reach tracker or gate state.
    pub fn dispatch(&self, event: &CrossoverEvent, sinks: &mut [Box<dyn EventSink + Send>]) {
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.deliver(event) {
                self.metrics.inc(&self.metrics.sink_failures);
                warn!("⚠️  Sink '{}' failed to deliver crossover: {:#}", sink.name(), e);
            }
        }
    }

    fn count_dropped_frames(&mut self, frame_id: u64) {
        if let Some(last) = self.last_frame_id {
            if frame_id > last + 1 {
                let dropped = frame_id - last - 1;
                debug!("⏭  {} frame(s) dropped before frame {}", dropped, frame_id);
                self.metrics.add(&self.metrics.frames_dropped, dropped);
            }
        }
        self.last_frame_id = Some(frame_id);
    }

    pub fn profiles(&self) -> &[ColorProfile] {
        &self.profiles
    }

    pub fn pair(&self) -> (&str, &str) {
        (&self.pair.0, &self.pair.1)
    }

    pub fn tracker(&self) -> &LineTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &DebounceGate {
        &self.gate
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Clear tracked lines and suppression history, e.g. when the chart
    /// being watched changes.
    pub fn reset(&mut self) {
        self.tracker.reset();
        self.gate.reset();
        self.last_frame_id = None;
        info!("🔄 Pipeline state reset");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crossover::Rejection;
    use crate::line_tracker::TrackState;
    use crate::pipeline::event_bus::EventBus;
    use crate::types::Point;
    use anyhow::Result;

    const LINE_A: &str = "zigzag_line1";
    const LINE_B: &str = "zigzag_line2";

    fn config(angle_threshold_deg: f32, cooldown_ms: f64) -> Config {
        let mut config = Config::default();
        config.detection.angle_threshold_deg = angle_threshold_deg;
        config.detection.debounce_cooldown_ms = cooldown_ms;
        config
    }

    fn observation(profile: &str, points: Vec<Point>, t: f64) -> LineObservation {
        LineObservation {
            profile: profile.to_string(),
            raw_points: points.clone(),
            points,
            confidence: 0.9,
            timestamp_ms: t,
            pixel_count: 600,
        }
    }

    /// Horizontal line A and line B through (120, 340) at `angle_deg`.
    fn crossing_pair(angle_deg: f32, t: f64) -> Vec<LineObservation> {
        let (s, c) = angle_deg.to_radians().sin_cos();
        vec![
            observation(LINE_A, vec![Point::new(0.0, 340.0), Point::new(240.0, 340.0)], t),
            observation(
                LINE_B,
                vec![
                    Point::new(120.0 - 100.0 * c, 340.0 - 100.0 * s),
                    Point::new(120.0 + 100.0 * c, 340.0 + 100.0 * s),
                ],
                t,
            ),
        ]
    }

    #[test]
    fn test_repeated_crossing_emits_exactly_once() {
        let mut pipeline = CrossoverPipeline::new(&config(10.0, 2000.0)).unwrap();

        let mut emitted = Vec::new();
        for i in 0..5u64 {
            let t = i as f64 * 500.0;
            let ctx = pipeline.process_observations(&crossing_pair(40.0, t), i, t);
            assert!(ctx.candidate.is_some(), "frame {} produced no candidate", i);
            emitted.extend(ctx.emitted);
        }

        assert_eq!(emitted.len(), 1);
        let event = &emitted[0];
        assert!((event.point.x - 120.0).abs() < 1e-2);
        assert!((event.point.y - 340.0).abs() < 1e-2);
        assert!((event.angle_deg - 40.0).abs() < 1e-2);
        assert_eq!(event.line_a, LINE_A);
        assert_eq!(event.line_b, LINE_B);
        assert_eq!(event.confidence_a, 0.9);

        let summary = pipeline.metrics().summary();
        assert_eq!(summary.events_emitted, 1);
        assert_eq!(summary.events_suppressed, 4);
        assert_eq!(summary.crossovers.total, 1);
    }

    #[test]
    fn test_shallow_crossing_never_emitted() {
        let mut pipeline = CrossoverPipeline::new(&config(15.0, 2000.0)).unwrap();
        for i in 0..10u64 {
            let t = i as f64 * 500.0;
            let ctx = pipeline.process_observations(&crossing_pair(3.0, t), i, t);
            assert!(ctx.emitted.is_none());
            assert!(matches!(ctx.rejection, Some(Rejection::ShallowAngle { .. })));
        }
    }

    #[test]
    fn test_stale_line_blocks_crossing() {
        let config = config(10.0, 2000.0);
        let staleness = config.detection.staleness_ms;
        let mut pipeline = CrossoverPipeline::new(&config).unwrap();

        // both lines seen once, then only line B for ten staleness intervals
        pipeline.process_observations(&crossing_pair(40.0, 0.0)[..1], 0, 0.0);
        let now = 10.0 * staleness;
        let fresh_b = crossing_pair(40.0, now).split_off(1);
        let ctx = pipeline.process_observations(&fresh_b, 1, now);

        assert!(ctx.candidate.is_none());
        assert!(ctx.emitted.is_none());
        assert_eq!(ctx.track_state(LINE_A), TrackState::Expired);
        assert_eq!(ctx.track_state(LINE_B), TrackState::Fresh);
    }

    #[test]
    fn test_held_line_outside_frame_interval_is_not_paired() {
        let mut pipeline = CrossoverPipeline::new(&config(10.0, 2000.0)).unwrap();
        let pair = crossing_pair(40.0, 0.0);
        pipeline.process_observations(&pair, 0, 0.0);

        // line A still held (not stale), but observed two intervals earlier
        let b_only = crossing_pair(40.0, 1000.0).split_off(1);
        let ctx = pipeline.process_observations(&b_only, 2, 1000.0);
        assert_eq!(ctx.track_state(LINE_A), TrackState::Held);
        assert!(matches!(
            ctx.rejection,
            Some(Rejection::TimestampMismatch { .. })
        ));
        assert_eq!(pipeline.metrics().summary().frames_dropped, 1);
    }

    #[test]
    fn test_distinct_recross_reported_within_cooldown() {
        let mut pipeline = CrossoverPipeline::new(&config(10.0, 60_000.0)).unwrap();
        let first = pipeline.process_observations(&crossing_pair(40.0, 0.0), 0, 0.0);
        assert!(first.emitted.is_some());

        // same lines, crossing moved 60px to the right
        let mut moved = crossing_pair(40.0, 500.0);
        for obs in &mut moved {
            for p in obs.points.iter_mut().chain(obs.raw_points.iter_mut()) {
                p.x += 60.0;
            }
        }
        let second = pipeline.process_observations(&moved, 1, 500.0);
        let event = second.emitted.unwrap();
        assert!((event.point.x - 180.0).abs() < 1e-2);
    }

    #[test]
    fn test_invalid_frame_rejected_without_state_change() {
        let mut pipeline = CrossoverPipeline::new(&config(10.0, 2000.0)).unwrap();
        pipeline.process_observations(&crossing_pair(40.0, 0.0), 0, 0.0);

        let broken = Frame::new(vec![0u8; 7], 10, 10, 100.0, 1);
        assert!(matches!(
            pipeline.process_frame(&broken),
            Err(DetectionError::InvalidFrame(_))
        ));
        assert_eq!(pipeline.tracker().state(LINE_A), Some(TrackState::Fresh));
        assert_eq!(pipeline.metrics().summary().input_errors, 1);
        assert_eq!(pipeline.metrics().summary().total_frames, 1);

        // the next good frame runs normally
        let blank = Frame::filled(50, 50, [20, 20, 20], 200.0, 2);
        assert!(pipeline.process_frame(&blank).unwrap().is_none());
        assert_eq!(pipeline.tracker().state(LINE_A), Some(TrackState::Held));
    }

    #[test]
    fn test_unusable_config_is_an_error() {
        let mut config = Config::default();
        config.colors.truncate(1);
        assert!(matches!(
            CrossoverPipeline::new(&config),
            Err(DetectionError::Config(_))
        ));

        let mut config = Config::default();
        config.capture.fps = 0.0;
        assert!(CrossoverPipeline::new(&config).is_err());
    }

    /// 400x200 chart: a 5px yellow band at y=100 with a 1px purple 45°
    /// line drawn over it, crossing at (200, 100).
    fn chart_frame(t: f64, id: u64) -> Frame {
        let mut frame = Frame::filled(400, 200, [20, 20, 20], t, id);
        for x in 20..=380 {
            for y in 98..=102 {
                frame.set_pixel(x, y, [255, 255, 0]);
            }
        }
        for x in 100..300 {
            frame.set_pixel(x, x - 100, [200, 0, 255]);
        }
        frame
    }

    #[test]
    fn test_raster_crossing_end_to_end() {
        let mut config = config(10.0, 2000.0);
        // thin anti-aliasing-free strokes: keep 1px lines
        config.extraction.morphology = false;
        config.extraction.expected_thickness_px = 1.0;
        let mut pipeline = CrossoverPipeline::new(&config).unwrap();

        let ctx = pipeline.process_frame_detailed(&chart_frame(0.0, 0)).unwrap();
        assert!(ctx.observation(LINE_A).is_some());
        assert!(ctx.observation(LINE_B).is_some());

        let event = ctx.emitted.expect("crossing should be emitted");
        assert!((event.point.x - 200.0).abs() < 1.0, "x={}", event.point.x);
        assert!((event.point.y - 100.0).abs() < 1.0, "y={}", event.point.y);
        assert!((event.angle_deg - 45.0).abs() < 1.0, "angle={}", event.angle_deg);

        // same chart next frame: suppressed
        assert!(pipeline.process_frame(&chart_frame(500.0, 1)).unwrap().is_none());
    }

    const CHART_YELLOW: [u8; 3] = [255, 255, 0];
    const CHART_PURPLE: [u8; 3] = [200, 0, 255];

    /// 3px yellow band on rows 149..=151 of a 400x300 chart.
    fn draw_flat_line(frame: &mut Frame) {
        for x in 20..=380 {
            for y in 149..=151 {
                frame.set_pixel(x, y, CHART_YELLOW);
            }
        }
    }

    /// Purple stroke through (200, 150) at `angle_deg`, `thickness` px wide.
    fn draw_angled_line(frame: &mut Frame, angle_deg: f32, thickness: f32) {
        let (s, c) = angle_deg.to_radians().sin_cos();
        for y in 0..frame.height {
            for x in 0..frame.width {
                let dx = x as f32 - 200.0;
                let dy = y as f32 - 150.0;
                let along = dx * c + dy * s;
                let across = dy * c - dx * s;
                if across.abs() <= thickness / 2.0 && along.abs() <= 180.0 {
                    frame.set_pixel(x, y, CHART_PURPLE);
                }
            }
        }
    }

    fn assert_crossing_at_center(ctx: &FrameContext, angle_deg: f32) {
        assert!(ctx.observation(LINE_A).is_some(), "no {} observation", LINE_A);
        assert!(ctx.observation(LINE_B).is_some(), "no {} observation", LINE_B);
        let event = ctx
            .emitted
            .as_ref()
            .unwrap_or_else(|| panic!("no crossing emitted: {:?}", ctx.rejection));
        assert!((event.point.x - 200.0).abs() < 1.5, "x={}", event.point.x);
        assert!((event.point.y - 150.0).abs() < 1.5, "y={}", event.point.y);
        assert!(
            (event.angle_deg - angle_deg).abs() < 2.0,
            "angle={}",
            event.angle_deg
        );
    }

    #[test]
    fn test_overdrawn_line_still_crosses_with_defaults() {
        // whichever line is painted last cuts the other one in two
        for purple_on_top in [true, false] {
            let mut frame = Frame::filled(400, 300, [20, 20, 20], 0.0, 0);
            if purple_on_top {
                draw_flat_line(&mut frame);
                draw_angled_line(&mut frame, 40.0, 5.0);
            } else {
                draw_angled_line(&mut frame, 40.0, 5.0);
                draw_flat_line(&mut frame);
            }

            let mut pipeline = CrossoverPipeline::new(&Config::default()).unwrap();
            let ctx = pipeline.process_frame_detailed(&frame).unwrap();
            assert_crossing_at_center(&ctx, 40.0);
        }
    }

    #[test]
    fn test_thin_angled_line_detected_with_shipped_config() {
        let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("config.yaml");
        let config = Config::load(path).unwrap();
        assert!(config.extraction.morphology);

        let mut frame = Frame::filled(400, 300, [20, 20, 20], 0.0, 0);
        draw_flat_line(&mut frame);
        draw_angled_line(&mut frame, 40.0, 3.0);

        let mut pipeline = CrossoverPipeline::new(&config).unwrap();
        let ctx = pipeline.process_frame_detailed(&frame).unwrap();
        assert_crossing_at_center(&ctx, 40.0);
    }

    struct FailingSink;

    impl EventSink for FailingSink {
        fn name(&self) -> &str {
            "failing"
        }

        fn deliver(&mut self, _event: &CrossoverEvent) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_sink_failure_does_not_stop_other_sinks() {
        let mut pipeline = CrossoverPipeline::new(&config(10.0, 2000.0)).unwrap();
        let event = pipeline
            .process_observations(&crossing_pair(40.0, 0.0), 0, 0.0)
            .emitted
            .unwrap();

        let mut sinks: Vec<Box<dyn EventSink + Send>> =
            vec![Box::new(FailingSink), Box::new(EventBus::new(8))];
        pipeline.dispatch(&event, &mut sinks);

        assert_eq!(pipeline.metrics().summary().sink_failures, 1);
        // gate state is untouched by delivery
        assert_eq!(pipeline.gate().state().len(), 1);

        let next = pipeline.process_observations(&crossing_pair(40.0, 500.0), 1, 500.0);
        assert!(next.emitted.is_none());
    }
}

// src/lib.rs
//
// Detects crossovers between two colored indicator lines on a chart.
//
//   Frame → ColorLineExtractor → LineTracker → CrossoverAnalyzer → DebounceGate → EventSink
//
// `CrossoverPipeline::process_frame` is the entry point; everything else is
// exposed for embedding individual stages and for diagnostics.

pub mod calibration;
pub mod color_analysis;
pub mod config;
pub mod crossover;
pub mod debounce;
pub mod error;
pub mod frame_source;
pub mod line_extraction;
pub mod line_tracker;
pub mod pipeline;
pub mod types;

pub use crossover::{CrossoverAnalyzer, Rejection};
pub use debounce::{DebounceGate, DebounceState, GateDecision, LinePairKey};
pub use error::{DetectionError, DetectionResult};
pub use frame_source::{DirectoryFrameSource, FrameSource};
pub use line_extraction::ColorLineExtractor;
pub use line_tracker::{LineTracker, TrackState, TrackedLine};
pub use pipeline::{CrossoverPipeline, EventSink, FrameContext, MetricsSummary};
pub use types::{ColorProfile, Config, CrossoverEvent, Frame, HsvRange, LineObservation, Point, Thresholds};

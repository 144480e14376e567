// src/pipeline/mod.rs

pub mod event_bus;
pub mod frame_context;
pub mod metrics;
pub mod orchestrator;
pub mod sinks;

pub use event_bus::{EventBus, EventSink};
pub use frame_context::FrameContext;
pub use metrics::{MetricsSummary, PipelineMetrics};
pub use orchestrator::CrossoverPipeline;
pub use sinks::{JsonlSink, LogSink};

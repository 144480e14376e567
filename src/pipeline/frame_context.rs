// src/pipeline/frame_context.rs
//
// Everything one frame produced, stage by stage. Returned by
// `process_frame_detailed` for diagnostics and tests; the plain entry point
// only surfaces `emitted`.

use crate::crossover::Rejection;
use crate::debounce::GateDecision;
use crate::line_tracker::TrackState;
use crate::types::{CrossoverEvent, LineObservation};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_id: u64,
    pub timestamp_ms: f64,

    /// Best observation per profile this frame.
    pub observations: Vec<LineObservation>,
    pub track_states: HashMap<String, TrackState>,

    pub candidate: Option<CrossoverEvent>,
    pub rejection: Option<Rejection>,
    pub decision: Option<GateDecision>,
    pub emitted: Option<CrossoverEvent>,

    pub processing_us: u64,
}

impl FrameContext {
    pub fn new(frame_id: u64, timestamp_ms: f64) -> Self {
        Self {
            frame_id,
            timestamp_ms,
            observations: Vec::new(),
            track_states: HashMap::new(),
            candidate: None,
            rejection: None,
            decision: None,
            emitted: None,
            processing_us: 0,
        }
    }

    pub fn observation(&self, profile: &str) -> Option<&LineObservation> {
        self.observations.iter().find(|o| o.profile == profile)
    }

    pub fn track_state(&self, profile: &str) -> TrackState {
        self.track_states
            .get(profile)
            .copied()
            .unwrap_or(TrackState::Empty)
    }

    /// A candidate was produced but the gate held it back.
    pub fn was_suppressed(&self) -> bool {
        self.candidate.is_some() && self.emitted.is_none()
    }
}

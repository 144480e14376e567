// src/debounce.rs
//
// Collapses the burst of near-identical candidates a single crossing
// produces across consecutive frames into one emission.
//
// Per line pair, a candidate is emitted when:
//   - nothing was emitted for the pair yet, or
//   - more than `cooldown_ms` passed since the last emission, or
//   - the crossing is more than `distance_px` away from the last emitted one
//
// The last-emission records live in a `DebounceState` owned by the gate.
// It can be handed in (`with_state`) and taken back out (`into_state`), so
// independent pipelines never share suppression history.

use crate::types::{CrossoverEvent, Point};
use std::collections::HashMap;
use tracing::{debug, info};

/// Order-insensitive identity of a line pair: (a, b) and (b, a) share a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinePairKey {
    first: String,
    second: String,
}

impl LinePairKey {
    pub fn new(a: &str, b: &str) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        Self {
            first: first.to_string(),
            second: second.to_string(),
        }
    }

    pub fn of(event: &CrossoverEvent) -> Self {
        Self::new(&event.line_a, &event.line_b)
    }

    pub fn names(&self) -> (&str, &str) {
        (&self.first, &self.second)
    }
}

impl std::fmt::Display for LinePairKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}×{}", self.first, self.second)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebounceRecord {
    pub timestamp_ms: f64,
    pub point: Point,
}

/// Last emitted crossing per line pair.
#[derive(Debug, Clone, Default)]
pub struct DebounceState {
    records: HashMap<LinePairKey, DebounceRecord>,
}

impl DebounceState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &LinePairKey) -> Option<&DebounceRecord> {
        self.records.get(key)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn record(&mut self, key: LinePairKey, record: DebounceRecord) {
        self.records.insert(key, record);
    }

    fn clear(&mut self) {
        self.records.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GateDecision {
    /// First crossing ever seen for this pair.
    EmitFirst,
    /// Cooldown since the last emission has passed.
    EmitCooldownElapsed { elapsed_ms: f64 },
    /// Far enough from the last emitted crossing to be a different one.
    EmitNewLocation { distance_px: f32 },
    Suppress { elapsed_ms: f64, distance_px: f32 },
}

impl GateDecision {
    pub fn is_emit(&self) -> bool {
        !matches!(self, Self::Suppress { .. })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmitFirst => "FIRST",
            Self::EmitCooldownElapsed { .. } => "COOLDOWN_ELAPSED",
            Self::EmitNewLocation { .. } => "NEW_LOCATION",
            Self::Suppress { .. } => "SUPPRESSED",
        }
    }
}

pub struct DebounceGate {
    cooldown_ms: f64,
    distance_px: f32,
    state: DebounceState,

    pub total_emitted: u64,
    pub total_suppressed: u64,
}

impl DebounceGate {
    pub fn new(cooldown_ms: f64, distance_px: f32) -> Self {
        Self::with_state(cooldown_ms, distance_px, DebounceState::new())
    }

    pub fn with_state(cooldown_ms: f64, distance_px: f32, state: DebounceState) -> Self {
        Self {
            cooldown_ms,
            distance_px,
            state,
            total_emitted: 0,
            total_suppressed: 0,
        }
    }

    /// Emit-or-suppress verdict for `candidate`, without recording it.
    pub fn decide(&self, candidate: &CrossoverEvent) -> GateDecision {
        let Some(last) = self.state.get(&LinePairKey::of(candidate)) else {
            return GateDecision::EmitFirst;
        };

        let elapsed_ms = candidate.timestamp_ms - last.timestamp_ms;
        let distance_px = candidate.point.distance_to(&last.point);

        if elapsed_ms > self.cooldown_ms {
            GateDecision::EmitCooldownElapsed { elapsed_ms }
        } else if distance_px > self.distance_px {
            GateDecision::EmitNewLocation { distance_px }
        } else {
            GateDecision::Suppress {
                elapsed_ms,
                distance_px,
            }
        }
    }

    /// Decide and, on emission, record the candidate as the pair's last event.
    pub fn admit(&mut self, candidate: CrossoverEvent) -> Option<CrossoverEvent> {
        let decision = self.decide(&candidate);
        let key = LinePairKey::of(&candidate);

        if let GateDecision::Suppress {
            elapsed_ms,
            distance_px,
        } = decision
        {
            debug!(
                "🔇 {} suppressed: {:.0}ms / {:.1}px since last emission",
                key, elapsed_ms, distance_px
            );
            self.total_suppressed += 1;
            return None;
        }

        info!(
            "✅ {} crossover emitted ({}) at ({:.1}, {:.1}) angle={:.1}°",
            key,
            decision.as_str(),
            candidate.point.x,
            candidate.point.y,
            candidate.angle_deg
        );
        self.state.record(
            key,
            DebounceRecord {
                timestamp_ms: candidate.timestamp_ms,
                point: candidate.point,
            },
        );
        self.total_emitted += 1;
        Some(candidate)
    }

    pub fn state(&self) -> &DebounceState {
        &self.state
    }

    pub fn into_state(self) -> DebounceState {
        self.state
    }

    pub fn reset(&mut self) {
        self.state.clear();
    }
}

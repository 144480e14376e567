// src/line_tracker.rs
//
// Running estimate of each profile's polyline across frames.
//
// The extractor is authoritative per frame: a qualifying observation
// replaces the tracked points outright. Between observations the last
// good polyline is held so a single dropped frame (cursor over the line,
// chart redraw) does not lose the line, but:
//   - the held line's timestamp is NOT refreshed
//   - its rolling confidence decays every missed frame
//   - once `staleness_ms` passes without a qualifying observation the
//     line is invalidated until a new one arrives
//
// That keeps the analyzer from pairing a fresh line with a stale one.

use crate::types::{LineObservation, Point, TrackerConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct TrackedLine {
    pub name: String,
    pub points: Vec<Point>,
    pub raw_points: Vec<Point>,
    /// Rolling confidence: smoothed on hits, decayed on misses.
    pub confidence: f32,
    /// Timestamp of the last qualifying observation.
    pub last_observed_ms: f64,
}

impl TrackedLine {
    pub fn min_x(&self) -> f32 {
        self.points.first().map(|p| p.x).unwrap_or(0.0)
    }

    pub fn max_x(&self) -> f32 {
        self.points.last().map(|p| p.x).unwrap_or(0.0)
    }

    /// Raw points when available, otherwise the fitted polyline.
    pub fn reference_points(&self) -> &[Point] {
        if self.raw_points.len() >= 2 {
            &self.raw_points
        } else {
            &self.points
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackState {
    /// Updated from this frame's observation
    Fresh,
    /// Holding the last good polyline through missed frames
    Held,
    /// Invalidated after exceeding the staleness limit
    Expired,
    /// Never observed
    Empty,
}

impl TrackState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fresh => "FRESH",
            Self::Held => "HELD",
            Self::Expired => "EXPIRED",
            Self::Empty => "EMPTY",
        }
    }

    pub fn has_line(&self) -> bool {
        matches!(self, Self::Fresh | Self::Held)
    }
}

impl std::fmt::Display for TrackState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone)]
struct TrackSlot {
    line: Option<TrackedLine>,
    state: TrackState,
    missed_frames: u32,
}

impl TrackSlot {
    fn empty() -> Self {
        Self {
            line: None,
            state: TrackState::Empty,
            missed_frames: 0,
        }
    }
}

// ============================================================================
// TRACKER
// ============================================================================

pub struct LineTracker {
    config: TrackerConfig,
    confidence_min: f32,
    staleness_ms: f64,
    slots: HashMap<String, TrackSlot>,

    // ── Metrics ──
    pub total_updates: u64,
    pub total_holds: u64,
    pub total_expirations: u64,
}

impl LineTracker {
    /// One slot per profile name; observations for other names are ignored.
    pub fn new<I, S>(profile_names: I, config: TrackerConfig, confidence_min: f32, staleness_ms: f64) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let slots = profile_names
            .into_iter()
            .map(|n| (n.into(), TrackSlot::empty()))
            .collect();
        Self {
            config,
            confidence_min,
            staleness_ms,
            slots,
            total_updates: 0,
            total_holds: 0,
            total_expirations: 0,
        }
    }

    /// Feed this frame's best observation for `name` (or `None` on a miss).
    ///
    /// Returns the current reliable line, or `None` for "no reliable line".
    pub fn update(
        &mut self,
        name: &str,
        observation: Option<&LineObservation>,
        timestamp_ms: f64,
    ) -> Option<&TrackedLine> {
        let Some(slot) = self.slots.get_mut(name) else {
            warn!("Tracker has no slot for '{}', observation ignored", name);
            return None;
        };

        let qualifying = observation.filter(|o| {
            o.profile == name && o.confidence >= self.confidence_min && o.points.len() >= 2
        });

        match qualifying {
            Some(obs) => {
                let confidence = match (&slot.line, slot.state) {
                    (Some(prev), TrackState::Fresh | TrackState::Held) => {
                        let a = self.config.smoothing_alpha;
                        a * obs.confidence + (1.0 - a) * prev.confidence
                    }
                    _ => obs.confidence,
                };

                if slot.state == TrackState::Expired {
                    info!("📈 {}: line reacquired after expiry", name);
                }

                slot.line = Some(TrackedLine {
                    name: name.to_string(),
                    points: obs.points.clone(),
                    raw_points: obs.raw_points.clone(),
                    confidence,
                    last_observed_ms: obs.timestamp_ms,
                });
                slot.state = TrackState::Fresh;
                slot.missed_frames = 0;
                self.total_updates += 1;
            }
            None => {
                if let Some(line) = slot.line.as_mut() {
                    let age = timestamp_ms - line.last_observed_ms;
                    if age > self.staleness_ms {
                        debug!(
                            "📉 {}: EXPIRED after {:.0}ms without a qualifying observation ({} missed frames)",
                            name, age, slot.missed_frames + 1
                        );
                        slot.line = None;
                        slot.state = TrackState::Expired;
                        self.total_expirations += 1;
                    } else {
                        line.confidence *= self.config.confidence_decay_per_frame;
                        slot.state = TrackState::Held;
                        self.total_holds += 1;
                    }
                }
                slot.missed_frames = slot.missed_frames.saturating_add(1);
            }
        }

        self.reading(name, timestamp_ms)
    }

    /// The reliable line for `name` as of `now_ms`, if any.
    pub fn reading(&self, name: &str, now_ms: f64) -> Option<&TrackedLine> {
        let slot = self.slots.get(name)?;
        if !slot.state.has_line() {
            return None;
        }
        slot.line
            .as_ref()
            .filter(|line| now_ms - line.last_observed_ms <= self.staleness_ms)
    }

    pub fn state(&self, name: &str) -> Option<TrackState> {
        self.slots.get(name).map(|s| s.state)
    }

    pub fn missed_frames(&self, name: &str) -> Option<u32> {
        self.slots.get(name).map(|s| s.missed_frames)
    }

    /// Profile names with a slot, in no particular order.
    pub fn tracked_names(&self) -> impl Iterator<Item = &str> {
        self.slots.keys().map(String::as_str)
    }

    pub fn reset(&mut self) {
        for slot in self.slots.values_mut() {
            *slot = TrackSlot::empty();
        }
    }
}

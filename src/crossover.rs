// src/crossover.rs
//
// Crossover analyzer: two tracked polylines → at most one candidate event.
//
// Walks the horizontal span both lines cover, intersects every pair of
// adjacent segments (one from each line) and keeps the intersection with
// the largest x: on a scrolling chart that is the crossing that has just
// happened, not an older one already on screen.
//
// A candidate is rejected when:
//   - the two lines were last observed more than one frame interval apart
//   - the crossing angle is below `angle_threshold_deg` (inclusive accept)
//   - the intersection lies farther than `intersection_tolerance_px` from
//     either line's raw points (simplification artifacts)
//   - either line's rolling confidence is below `confidence_min`

use crate::line_tracker::TrackedLine;
use crate::types::{CrossoverEvent, Point, Thresholds};
use tracing::debug;

/// Slack for the inclusive angle threshold, so a crossing built at exactly
/// the threshold is not lost to float rounding in `acos`.
const ANGLE_EPSILON_DEG: f32 = 1e-3;

/// Slack on the frame-interval pairing check.
const TIME_EPSILON_MS: f64 = 1e-6;

// ============================================================================
// GEOMETRY
// ============================================================================

/// Intersection point of segments p1-p2 and p3-p4, endpoints included.
/// Parallel (and collinear) segments never intersect.
pub fn segment_intersection(p1: Point, p2: Point, p3: Point, p4: Point) -> Option<Point> {
    let (x1, y1) = (p1.x as f64, p1.y as f64);
    let (x3, y3) = (p3.x as f64, p3.y as f64);
    let (dx1, dy1) = (p2.x as f64 - x1, p2.y as f64 - y1);
    let (dx2, dy2) = (p4.x as f64 - x3, p4.y as f64 - y3);

    let denominator = dx1 * dy2 - dy1 * dx2;
    if denominator.abs() < 1e-10 {
        return None;
    }

    let (dx3, dy3) = (x1 - x3, y1 - y3);
    let t1 = (dx2 * dy3 - dy2 * dx3) / denominator;
    let t2 = (dx1 * dy3 - dy1 * dx3) / denominator;

    if (0.0..=1.0).contains(&t1) && (0.0..=1.0).contains(&t2) {
        Some(Point::new((x1 + t1 * dx1) as f32, (y1 + t1 * dy1) as f32))
    } else {
        None
    }
}

/// Acute angle in degrees between the directions of p1-p2 and p3-p4.
pub fn intersection_angle(p1: Point, p2: Point, p3: Point, p4: Point) -> f32 {
    let v1 = ((p2.x - p1.x) as f64, (p2.y - p1.y) as f64);
    let v2 = ((p4.x - p3.x) as f64, (p4.y - p3.y) as f64);
    let n1 = (v1.0 * v1.0 + v1.1 * v1.1).sqrt();
    let n2 = (v2.0 * v2.0 + v2.1 * v2.1).sqrt();
    if n1 < 1e-12 || n2 < 1e-12 {
        return 0.0;
    }
    let dot = ((v1.0 * v2.0 + v1.1 * v2.1) / (n1 * n2)).clamp(-1.0, 1.0);
    let angle = dot.acos().to_degrees();
    angle.min(180.0 - angle) as f32
}

/// Shortest distance from `p` to segment a-b.
pub fn distance_to_segment(p: Point, a: Point, b: Point) -> f32 {
    let (dx, dy) = (b.x - a.x, b.y - a.y);
    let len_sq = dx * dx + dy * dy;
    if len_sq < 1e-12 {
        return p.distance_to(&a);
    }
    let t = (((p.x - a.x) * dx + (p.y - a.y) * dy) / len_sq).clamp(0.0, 1.0);
    p.distance_to(&Point::new(a.x + t * dx, a.y + t * dy))
}

/// Shortest distance from `p` to a polyline.
pub fn distance_to_polyline(p: Point, polyline: &[Point]) -> f32 {
    match polyline {
        [] => f32::INFINITY,
        [only] => p.distance_to(only),
        _ => polyline
            .windows(2)
            .map(|w| distance_to_segment(p, w[0], w[1]))
            .fold(f32::INFINITY, f32::min),
    }
}

/// Segment indices of `points` whose x-extent touches [lo, hi].
fn segments_in_span(points: &[Point], lo: f32, hi: f32) -> impl Iterator<Item = usize> + '_ {
    (0..points.len().saturating_sub(1)).filter(move |&i| {
        let (a, b) = (points[i].x, points[i + 1].x);
        a.max(b) >= lo && a.min(b) <= hi
    })
}

// ============================================================================
// ANALYZER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyzerConfig {
    pub angle_threshold_deg: f32,
    pub intersection_tolerance_px: f32,
    pub confidence_min: f32,
    /// Maximum gap between the two lines' last observations.
    pub frame_interval_ms: f64,
}

impl AnalyzerConfig {
    pub fn from_thresholds(thresholds: &Thresholds, frame_interval_ms: f64) -> Self {
        Self {
            angle_threshold_deg: thresholds.angle_threshold_deg,
            intersection_tolerance_px: thresholds.intersection_tolerance_px,
            confidence_min: thresholds.confidence_min,
            frame_interval_ms,
        }
    }
}

/// Why a frame produced no candidate. Logged at debug level.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Rejection {
    MissingLine,
    TimestampMismatch { gap_ms: f64 },
    NoOverlap,
    NoIntersection,
    ShallowAngle { angle_deg: f32 },
    OutsideTolerance { distance_px: f32 },
    LowConfidence { confidence_a: f32, confidence_b: f32 },
}

#[derive(Debug, Clone, Copy)]
struct Crossing {
    point: Point,
    angle_deg: f32,
}

pub struct CrossoverAnalyzer {
    config: AnalyzerConfig,
}

impl CrossoverAnalyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Zero or one candidate for this frame.
    pub fn analyze(
        &self,
        line_a: Option<&TrackedLine>,
        line_b: Option<&TrackedLine>,
        timestamp_ms: f64,
    ) -> Option<CrossoverEvent> {
        match self.evaluate(line_a, line_b, timestamp_ms) {
            Ok(event) => Some(event),
            Err(reason) => {
                if reason != Rejection::MissingLine && reason != Rejection::NoIntersection {
                    debug!("✖ crossover candidate rejected: {:?}", reason);
                }
                None
            }
        }
    }

    /// Like `analyze`, but reports why no candidate was produced.
    pub fn evaluate(
        &self,
        line_a: Option<&TrackedLine>,
        line_b: Option<&TrackedLine>,
        timestamp_ms: f64,
    ) -> Result<CrossoverEvent, Rejection> {
        let (a, b) = match (line_a, line_b) {
            (Some(a), Some(b)) if a.points.len() >= 2 && b.points.len() >= 2 => (a, b),
            _ => return Err(Rejection::MissingLine),
        };

        let gap_ms = (a.last_observed_ms - b.last_observed_ms).abs();
        if gap_ms > self.config.frame_interval_ms + TIME_EPSILON_MS {
            return Err(Rejection::TimestampMismatch { gap_ms });
        }

        let crossing = self.latest_crossing(a, b)?;

        if crossing.angle_deg + ANGLE_EPSILON_DEG < self.config.angle_threshold_deg {
            return Err(Rejection::ShallowAngle {
                angle_deg: crossing.angle_deg,
            });
        }

        let distance_px = distance_to_polyline(crossing.point, a.reference_points())
            .max(distance_to_polyline(crossing.point, b.reference_points()));
        if distance_px > self.config.intersection_tolerance_px {
            return Err(Rejection::OutsideTolerance { distance_px });
        }

        if a.confidence < self.config.confidence_min || b.confidence < self.config.confidence_min {
            return Err(Rejection::LowConfidence {
                confidence_a: a.confidence,
                confidence_b: b.confidence,
            });
        }

        Ok(CrossoverEvent {
            line_a: a.name.clone(),
            line_b: b.name.clone(),
            point: crossing.point,
            angle_deg: crossing.angle_deg,
            confidence_a: a.confidence,
            confidence_b: b.confidence,
            timestamp_ms,
        })
    }

    /// The intersection with the largest x inside the shared span.
    fn latest_crossing(&self, a: &TrackedLine, b: &TrackedLine) -> Result<Crossing, Rejection> {
        let lo = a.min_x().max(b.min_x());
        let hi = a.max_x().min(b.max_x());
        if lo > hi {
            return Err(Rejection::NoOverlap);
        }

        let mut best: Option<Crossing> = None;
        for i in segments_in_span(&a.points, lo, hi) {
            let (p1, p2) = (a.points[i], a.points[i + 1]);
            for j in segments_in_span(&b.points, lo, hi) {
                let (p3, p4) = (b.points[j], b.points[j + 1]);
                let Some(point) = segment_intersection(p1, p2, p3, p4) else {
                    continue;
                };
                if best.map_or(true, |c| point.x > c.point.x) {
                    best = Some(Crossing {
                        point,
                        angle_deg: intersection_angle(p1, p2, p3, p4),
                    });
                }
            }
        }

        best.ok_or(Rejection::NoIntersection)
    }
}

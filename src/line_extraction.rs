// src/line_extraction.rs
//
// Color line extractor: Frame + enabled ColorProfiles → LineObservations.
//
// Per profile:
//   1. HSV mask (color_analysis), optionally cleaned (open + close, close
//      only for thin strokes)
//   2. 8-connected component labelling; pieces of a stroke cut by a line
//      drawn over it are rejoined across the gap
//   3. Components whose bounding diagonal is below the profile's minimum
//      length are treated as noise
//   4. Surviving components collapse to one centroid per column (the raw
//      points, ordered along x like a time-series chart), then are
//      simplified with Douglas-Peucker into the observation polyline
//   5. Confidence from stroke density and horizontal extent
//
// Every surviving component yields its own observation. Picking the best
// one per profile is the caller's job.

use crate::color_analysis::BinaryMask;
use crate::types::{path_length, ColorProfile, ExtractionConfig, Frame, LineObservation, Point};
use tracing::{debug, warn};

// ============================================================================
// COMPONENTS
// ============================================================================

/// A set of 8-connected mask pixels.
#[derive(Debug, Clone)]
pub struct Component {
    pub pixels: Vec<(usize, usize)>,
    pub min_x: usize,
    pub max_x: usize,
    pub min_y: usize,
    pub max_y: usize,
}

impl Component {
    /// Number of columns the component spans.
    pub fn span(&self) -> usize {
        self.max_x - self.min_x + 1
    }

    pub fn bounding_diagonal(&self) -> f32 {
        let w = (self.max_x - self.min_x) as f32;
        let h = (self.max_y - self.min_y) as f32;
        (w * w + h * h).sqrt()
    }

    /// Centroid of the leftmost column.
    pub fn head(&self) -> Point {
        self.column_centroid(self.min_x)
    }

    /// Centroid of the rightmost column.
    pub fn tail(&self) -> Point {
        self.column_centroid(self.max_x)
    }

    fn column_centroid(&self, column: usize) -> Point {
        let (sum, n) = self
            .pixels
            .iter()
            .filter(|(x, _)| *x == column)
            .fold((0usize, 0usize), |(sum, n), &(_, y)| (sum + y, n + 1));
        Point::new(column as f32, sum as f32 / n.max(1) as f32)
    }

    /// Take over `other`'s pixels.
    pub fn absorb(&mut self, other: Component) {
        self.min_x = self.min_x.min(other.min_x);
        self.max_x = self.max_x.max(other.max_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_y = self.max_y.max(other.max_y);
        self.pixels.extend(other.pixels);
    }

    /// One centroid per occupied column, ordered by x.
    pub fn column_centroids(&self) -> Vec<Point> {
        let mut sums = vec![(0usize, 0usize); self.span()];
        for &(x, y) in &self.pixels {
            let slot = &mut sums[x - self.min_x];
            slot.0 += y;
            slot.1 += 1;
        }
        sums.iter()
            .enumerate()
            .filter(|(_, (_, n))| *n > 0)
            .map(|(i, (sum, n))| {
                Point::new((self.min_x + i) as f32, *sum as f32 / *n as f32)
            })
            .collect()
    }
}

/// Label 8-connected components of `mask`.
pub fn connected_components(mask: &BinaryMask) -> Vec<Component> {
    let (w, h) = (mask.width(), mask.height());
    let mut visited = vec![false; w * h];
    let mut components = Vec::new();
    let mut stack = Vec::new();

    for start_y in 0..h {
        for start_x in 0..w {
            let start = start_y * w + start_x;
            if visited[start] || !mask.get(start_x, start_y) {
                continue;
            }

            visited[start] = true;
            stack.push((start_x, start_y));
            let mut comp = Component {
                pixels: Vec::new(),
                min_x: start_x,
                max_x: start_x,
                min_y: start_y,
                max_y: start_y,
            };

            while let Some((x, y)) = stack.pop() {
                comp.pixels.push((x, y));
                comp.min_x = comp.min_x.min(x);
                comp.max_x = comp.max_x.max(x);
                comp.min_y = comp.min_y.min(y);
                comp.max_y = comp.max_y.max(y);

                for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                        let idx = ny * w + nx;
                        if !visited[idx] && mask.get(nx, ny) {
                            visited[idx] = true;
                            stack.push((nx, ny));
                        }
                    }
                }
            }

            components.push(comp);
        }
    }

    components
}

/// Rejoin pieces of one stroke that another stroke was drawn over.
///
/// Where two lines cross, the one underneath is cut at the crossing. Walking
/// components left to right, a piece is appended to an earlier chain when
/// it continues further right, starts within `max_gap` px of the chain's
/// right edge (small overlaps included) and its head is within `max_gap` px
/// of the chain's tail in y. The nearest qualifying chain wins.
pub fn bridge_gaps(mut components: Vec<Component>, max_gap: f32) -> Vec<Component> {
    if max_gap <= 0.0 || components.len() < 2 {
        return components;
    }
    components.sort_by_key(|c| c.min_x);

    let mut chains: Vec<Component> = Vec::with_capacity(components.len());
    for comp in components {
        let head = comp.head();
        let target = chains
            .iter()
            .enumerate()
            .filter(|(_, chain)| comp.max_x > chain.max_x)
            .filter_map(|(i, chain)| {
                let gap = comp.min_x as f32 - chain.max_x as f32;
                let tail = chain.tail();
                let dy = (head.y - tail.y).abs();
                (gap.abs() <= max_gap && dy <= max_gap).then(|| (i, head.distance_to(&tail)))
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);

        match target {
            Some(i) => {
                debug!(
                    "Bridging gap: x={}..{} joins x={}..{}",
                    comp.min_x, comp.max_x, chains[i].min_x, chains[i].max_x
                );
                chains[i].absorb(comp);
            }
            None => chains.push(comp),
        }
    }
    chains
}

// ============================================================================
// POLYLINE FITTING
// ============================================================================

/// Ramer-Douglas-Peucker simplification. Endpoints are always kept.
pub fn simplify_polyline(points: &[Point], epsilon: f32) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let mut keep = vec![false; points.len()];
    keep[0] = true;
    keep[points.len() - 1] = true;

    let mut ranges = vec![(0usize, points.len() - 1)];
    while let Some((first, last)) = ranges.pop() {
        if last <= first + 1 {
            continue;
        }
        let mut max_dist = 0.0f32;
        let mut index = first;
        for i in first + 1..last {
            let d = distance_to_line(&points[i], &points[first], &points[last]);
            if d > max_dist {
                max_dist = d;
                index = i;
            }
        }
        if max_dist > epsilon {
            keep[index] = true;
            ranges.push((first, index));
            ranges.push((index, last));
        }
    }

    points
        .iter()
        .zip(keep)
        .filter(|(_, k)| *k)
        .map(|(p, _)| *p)
        .collect()
}

/// Drop points within `min_distance` of the previously kept point. The final
/// point always survives so the polyline still reaches the trailing edge.
pub fn dedupe_points(points: &[Point], min_distance: f32) -> Vec<Point> {
    let mut out: Vec<Point> = Vec::with_capacity(points.len());
    for p in points {
        match out.last() {
            Some(last) if last.distance_to(p) <= min_distance => {}
            _ => out.push(*p),
        }
    }

    if let (Some(&tail), Some(&kept)) = (points.last(), out.last()) {
        if kept != tail {
            if out.len() > 1 {
                out.pop();
            }
            out.push(tail);
        }
    }
    out
}

/// Perpendicular distance from `p` to the infinite line through `a` and `b`.
fn distance_to_line(p: &Point, a: &Point, b: &Point) -> f32 {
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-6 {
        return p.distance_to(a);
    }
    ((dy * p.x - dx * p.y + b.x * a.y - b.y * a.x) / len).abs()
}

// ============================================================================
// CONFIDENCE
// ============================================================================

/// Combine stroke density and horizontal extent into a confidence in [0, 1].
///
/// Non-decreasing in both inputs for non-negative weights.
pub fn score_confidence(density: f32, length_ratio: f32, config: &ExtractionConfig) -> f32 {
    let density = if density.is_finite() { density.clamp(0.0, 1.0) } else { 0.0 };
    let length = if length_ratio.is_finite() {
        (length_ratio.max(0.0) / config.length_saturation.max(f32::EPSILON)).min(1.0)
    } else {
        0.0
    };
    let dw = config.density_weight.max(0.0);
    let lw = config.length_weight.max(0.0);
    let total = dw + lw;
    if total <= 0.0 {
        return 0.0;
    }
    ((density * dw + length * lw) / total).clamp(0.0, 1.0)
}

/// Pixel density of a component inside its line-shaped bounding region
/// (`span x expected_thickness_px`), saturating at 1.
pub fn stroke_density(pixel_count: usize, span: usize, expected_thickness_px: f32) -> f32 {
    let region = span as f32 * expected_thickness_px.max(f32::EPSILON);
    if region <= 0.0 {
        return 0.0;
    }
    (pixel_count as f32 / region).min(1.0)
}

// ============================================================================
// EXTRACTOR
// ============================================================================

pub struct ColorLineExtractor {
    config: ExtractionConfig,
    default_min_length: f32,
}

impl ColorLineExtractor {
    pub fn new(config: ExtractionConfig, default_min_length: f32) -> Self {
        Self {
            config,
            default_min_length,
        }
    }

    pub fn config(&self) -> &ExtractionConfig {
        &self.config
    }

    /// Observations for every enabled profile. Disabled profiles cost nothing.
    /// A malformed frame yields no observations.
    pub fn extract(&self, frame: &Frame, profiles: &[ColorProfile]) -> Vec<LineObservation> {
        if let Err(e) = frame.validate() {
            warn!("Extraction skipped: {}", e);
            return Vec::new();
        }
        let enabled: Vec<&ColorProfile> = profiles.iter().filter(|p| p.enabled).collect();

        // Profiles share no mutable state; all finish before the caller merges.
        #[cfg(feature = "parallel")]
        let per_profile: Vec<Vec<LineObservation>> = {
            use rayon::prelude::*;
            enabled
                .par_iter()
                .map(|profile| self.extract_profile(frame, profile))
                .collect()
        };

        #[cfg(not(feature = "parallel"))]
        let per_profile: Vec<Vec<LineObservation>> = enabled
            .iter()
            .map(|profile| self.extract_profile(frame, profile))
            .collect();

        per_profile.into_iter().flatten().collect()
    }

    pub fn extract_profile(&self, frame: &Frame, profile: &ColorProfile) -> Vec<LineObservation> {
        if !profile.enabled {
            return Vec::new();
        }

        let mut mask = BinaryMask::from_frame(frame, &profile.range);
        if mask.is_empty() {
            return Vec::new();
        }
        if self.config.morphology {
            mask = mask.cleaned_for_stroke(self.config.expected_thickness_px);
        }

        let min_length = profile.min_length.unwrap_or(self.default_min_length);
        let mut observations = Vec::new();

        let components = bridge_gaps(connected_components(&mask), self.config.gap_bridge_px);
        for comp in components {
            let diagonal = comp.bounding_diagonal();
            if diagonal < min_length {
                continue;
            }

            let raw_points = comp.column_centroids();
            let epsilon = self.config.simplify_epsilon_ratio * path_length(&raw_points);
            let simplified = simplify_polyline(&raw_points, epsilon);
            let points = dedupe_points(&simplified, self.config.dedupe_distance_px);
            if points.len() < 2 {
                continue;
            }

            let density = stroke_density(
                comp.pixels.len(),
                comp.span(),
                self.config.expected_thickness_px,
            );
            let length_ratio = comp.span() as f32 / frame.width as f32;
            let confidence = score_confidence(density, length_ratio, &self.config);

            debug!(
                "🎨 {}: component {}px over x={}..{} → {} points, density={:.2}, length={:.2}, conf={:.2}",
                profile.name,
                comp.pixels.len(),
                comp.min_x,
                comp.max_x,
                points.len(),
                density,
                length_ratio,
                confidence
            );

            observations.push(LineObservation {
                profile: profile.name.clone(),
                points,
                raw_points,
                confidence,
                timestamp_ms: frame.timestamp_ms,
                pixel_count: comp.pixels.len(),
            });
        }

        observations
    }
}

/// Highest-confidence observation for `profile`, if any.
pub fn best_observation<'a>(
    observations: &'a [LineObservation],
    profile: &str,
) -> Option<&'a LineObservation> {
    observations
        .iter()
        .filter(|o| o.profile == profile)
        .max_by(|a, b| {
            a.confidence
                .partial_cmp(&b.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

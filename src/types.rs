// src/types.rs

use serde::{Deserialize, Serialize};

use crate::error::DetectionError;

// ============================================================================
// CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    /// Ordered: the first two enabled profiles form the tracked pair unless
    /// `crossover.pair` names one explicitly.
    pub colors: Vec<ColorProfile>,
    pub detection: DetectionConfig,
    pub tracker: TrackerConfig,
    pub extraction: ExtractionConfig,
    pub crossover: CrossoverConfig,
    pub output: OutputConfig,
    pub logging: LoggingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capture: CaptureConfig::default(),
            colors: vec![
                ColorProfile {
                    name: "zigzag_line1".to_string(),
                    label: Some("Yellow/Green Line".to_string()),
                    range: HsvRange {
                        hue_min: 20,
                        hue_max: 35,
                        sat_min: 100,
                        sat_max: 255,
                        val_min: 100,
                        val_max: 255,
                    },
                    min_length: None,
                    enabled: true,
                },
                ColorProfile {
                    name: "zigzag_line2".to_string(),
                    label: Some("Purple Line".to_string()),
                    range: HsvRange {
                        hue_min: 120,
                        hue_max: 150,
                        sat_min: 100,
                        sat_max: 255,
                        val_min: 100,
                        val_max: 255,
                    },
                    min_length: None,
                    enabled: true,
                },
            ],
            detection: DetectionConfig::default(),
            tracker: TrackerConfig::default(),
            extraction: ExtractionConfig::default(),
            crossover: CrossoverConfig::default(),
            output: OutputConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// Frames per second delivered by the frame source. Also defines the
    /// frame interval used to pair line observations.
    pub fps: f64,
    pub input_dir: String,
    /// Optional sub-region of each captured image to analyse.
    pub region: Option<CaptureRegion>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: 2.0,
            input_dir: "frames".to_string(),
            region: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureRegion {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    /// Minimum confidence for an observation to refresh a tracked line, and
    /// for a tracked line to take part in a crossover.
    pub confidence_min: f32,
    /// Fallback minimum component length (bounding diagonal, px) for
    /// profiles that do not set their own.
    pub min_line_length: f32,
    pub intersection_tolerance_px: f32,
    /// Inclusive: a crossing at exactly this angle is accepted.
    pub angle_threshold_deg: f32,
    pub debounce_cooldown_ms: f64,
    pub debounce_distance_px: f32,
    pub staleness_ms: f64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence_min: 0.7,
            min_line_length: 30.0,
            intersection_tolerance_px: 8.0,
            angle_threshold_deg: 10.0,
            debounce_cooldown_ms: 60_000.0,
            debounce_distance_px: 8.0,
            staleness_ms: 1_500.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Weight of the newest observation in the rolling confidence.
    pub smoothing_alpha: f32,
    /// Multiplier applied to the rolling confidence on every missed frame.
    pub confidence_decay_per_frame: f32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            smoothing_alpha: 0.6,
            confidence_decay_per_frame: 0.85,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// 3x3 cleanup on the color mask before component labelling. Strokes no
    /// thicker than 3px are only closed.
    pub morphology: bool,
    /// Douglas-Peucker epsilon as a fraction of the raw path length.
    pub simplify_epsilon_ratio: f32,
    pub dedupe_distance_px: f32,
    /// Nominal stroke thickness of an indicator line. A component filling
    /// `span x expected_thickness_px` pixels scores full density.
    pub expected_thickness_px: f32,
    pub density_weight: f32,
    pub length_weight: f32,
    /// Fraction of the frame width at which the length factor saturates.
    pub length_saturation: f32,
    /// Largest break (x and y, in px) rejoined within one line, e.g. where
    /// the other line was drawn over it. 0 disables bridging.
    pub gap_bridge_px: f32,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            morphology: true,
            simplify_epsilon_ratio: 0.01,
            dedupe_distance_px: 5.0,
            expected_thickness_px: 3.0,
            density_weight: 0.5,
            length_weight: 0.5,
            length_saturation: 0.5,
            gap_bridge_px: 12.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CrossoverConfig {
    pub pair: Option<[String; 2]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub dir: String,
    pub jsonl: bool,
    pub event_bus_capacity: usize,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: "output".to_string(),
            jsonl: true,
            event_bus_capacity: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// The tunable thresholds consumed by the detection core.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence_min: f32,
    pub min_line_length: f32,
    pub intersection_tolerance_px: f32,
    pub angle_threshold_deg: f32,
    pub debounce_cooldown_ms: f64,
    pub debounce_distance_px: f32,
    pub staleness_ms: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        DetectionConfig::default().into()
    }
}

impl From<DetectionConfig> for Thresholds {
    fn from(d: DetectionConfig) -> Self {
        Self {
            confidence_min: d.confidence_min,
            min_line_length: d.min_line_length,
            intersection_tolerance_px: d.intersection_tolerance_px,
            angle_threshold_deg: d.angle_threshold_deg,
            debounce_cooldown_ms: d.debounce_cooldown_ms,
            debounce_distance_px: d.debounce_distance_px,
            staleness_ms: d.staleness_ms,
        }
    }
}

// ============================================================================
// COLOR PROFILES
// ============================================================================

/// Inclusive HSV bounds on the OpenCV 8-bit scale (H 0-179, S/V 0-255).
///
/// Stored wider than `u8` so out-of-range values survive parsing and are
/// reported by validation instead of failing the whole file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvRange {
    pub hue_min: u16,
    pub hue_max: u16,
    pub sat_min: u16,
    pub sat_max: u16,
    pub val_min: u16,
    pub val_max: u16,
}

impl HsvRange {
    #[inline]
    pub fn contains(&self, h: u8, s: u8, v: u8) -> bool {
        let (h, s, v) = (h as u16, s as u16, v as u16);
        h >= self.hue_min
            && h <= self.hue_max
            && s >= self.sat_min
            && s <= self.sat_max
            && v >= self.val_min
            && v <= self.val_max
    }
}

/// One trackable line: a named color range plus its noise floor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorProfile {
    pub name: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(flatten)]
    pub range: HsvRange,
    /// Minimum component length in px. Falls back to
    /// `detection.min_line_length` when unset.
    #[serde(default)]
    pub min_length: Option<f32>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

// ============================================================================
// FRAMES AND GEOMETRY
// ============================================================================

/// Packed RGB raster plus capture metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: usize,
    pub height: usize,
    pub timestamp_ms: f64,
    pub frame_id: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: usize, height: usize, timestamp_ms: f64, frame_id: u64) -> Self {
        Self {
            data,
            width,
            height,
            timestamp_ms,
            frame_id,
        }
    }

    /// Solid-color frame, mostly useful as a canvas for synthetic input.
    pub fn filled(width: usize, height: usize, rgb: [u8; 3], timestamp_ms: f64, frame_id: u64) -> Self {
        let data = rgb.iter().copied().cycle().take(width * height * 3).collect();
        Self::new(data, width, height, timestamp_ms, frame_id)
    }

    #[inline]
    pub fn pixel(&self, x: usize, y: usize) -> [u8; 3] {
        let idx = (y * self.width + x) * 3;
        [self.data[idx], self.data[idx + 1], self.data[idx + 2]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, rgb: [u8; 3]) {
        if x < self.width && y < self.height {
            let idx = (y * self.width + x) * 3;
            self.data[idx..idx + 3].copy_from_slice(&rgb);
        }
    }

    pub fn validate(&self) -> Result<(), DetectionError> {
        if self.width == 0 || self.height == 0 {
            return Err(DetectionError::InvalidFrame(format!(
                "empty frame {}x{}",
                self.width, self.height
            )));
        }
        let expected = self.width * self.height * 3;
        if self.data.len() != expected {
            return Err(DetectionError::InvalidFrame(format!(
                "frame {} has {} bytes, expected {} for {}x{} RGB",
                self.frame_id,
                self.data.len(),
                expected,
                self.width,
                self.height
            )));
        }
        if !self.timestamp_ms.is_finite() {
            return Err(DetectionError::InvalidFrame(format!(
                "frame {} has non-finite timestamp",
                self.frame_id
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    #[inline]
    pub fn distance_to(&self, other: &Point) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// Total length of a polyline.
pub fn path_length(points: &[Point]) -> f32 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

// ============================================================================
// PIPELINE RECORDS
// ============================================================================

/// A candidate polyline for one profile, extracted from one frame.
#[derive(Debug, Clone, PartialEq)]
pub struct LineObservation {
    pub profile: String,
    /// Simplified polyline, ordered by x.
    pub points: Vec<Point>,
    /// Per-column centroids the polyline was fitted from, ordered by x.
    pub raw_points: Vec<Point>,
    pub confidence: f32,
    pub timestamp_ms: f64,
    pub pixel_count: usize,
}

impl LineObservation {
    pub fn length(&self) -> f32 {
        path_length(&self.points)
    }
}

/// A finalized crossing between two tracked lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrossoverEvent {
    pub line_a: String,
    pub line_b: String,
    pub point: Point,
    pub angle_deg: f32,
    pub confidence_a: f32,
    pub confidence_b: f32,
    pub timestamp_ms: f64,
}

impl CrossoverEvent {
    /// Blend of both line confidences and how decisive the crossing angle is.
    /// Angles of 45 degrees and up score fully; very shallow ones are halved.
    pub fn combined_confidence(&self) -> f32 {
        let mut angle_factor = (self.angle_deg / 45.0).min(1.0);
        if self.angle_deg < 10.0 {
            angle_factor *= 0.5;
        }
        (self.confidence_a + self.confidence_b + angle_factor) / 3.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_validate_rejects_empty_and_short() {
        let empty = Frame::new(Vec::new(), 0, 0, 0.0, 1);
        assert!(matches!(empty.validate(), Err(DetectionError::InvalidFrame(_))));

        let short = Frame::new(vec![0u8; 10], 4, 4, 0.0, 2);
        assert!(matches!(short.validate(), Err(DetectionError::InvalidFrame(_))));

        let ok = Frame::filled(4, 4, [0, 0, 0], 0.0, 3);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_hsv_range_is_inclusive() {
        let range = HsvRange {
            hue_min: 20,
            hue_max: 35,
            sat_min: 100,
            sat_max: 255,
            val_min: 100,
            val_max: 255,
        };
        assert!(range.contains(20, 100, 100));
        assert!(range.contains(35, 255, 255));
        assert!(!range.contains(19, 200, 200));
        assert!(!range.contains(36, 200, 200));
    }

    #[test]
    fn test_combined_confidence_penalises_shallow_angles() {
        let mut event = CrossoverEvent {
            line_a: "a".into(),
            line_b: "b".into(),
            point: Point::new(0.0, 0.0),
            angle_deg: 45.0,
            confidence_a: 0.9,
            confidence_b: 0.9,
            timestamp_ms: 0.0,
        };
        let steep = event.combined_confidence();
        assert!((steep - (0.9 + 0.9 + 1.0) / 3.0).abs() < 1e-6);

        event.angle_deg = 9.0;
        let shallow = event.combined_confidence();
        assert!((shallow - (0.9 + 0.9 + 0.1) / 3.0).abs() < 1e-6);
    }
}

// src/config.rs

use crate::error::{DetectionError, DetectionResult};
use crate::types::{ColorProfile, Config, HsvRange, Thresholds};
use anyhow::{Context, Result};
use std::fs;
use std::path::Path;
use tracing::warn;

/// Upper bound of the OpenCV 8-bit hue channel.
pub const HUE_MAX: u16 = 179;
/// Upper bound of the saturation and value channels.
pub const CHANNEL_MAX: u16 = 255;

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let config: Config = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing config {}", path.display()))?;
        Ok(config)
    }

    /// Enabled profiles in configured order. Profiles that fail validation
    /// are dropped with a warning; the rest are returned.
    pub fn enabled_color_profiles(&self) -> Vec<ColorProfile> {
        let mut seen: Vec<&str> = Vec::new();
        let mut profiles = Vec::new();

        for profile in self.colors.iter().filter(|p| p.enabled) {
            if seen.contains(&profile.name.as_str()) {
                warn!(
                    "⚠️  Duplicate color profile '{}' ignored (one tracked line per profile)",
                    profile.name
                );
                continue;
            }
            match validate_profile(profile) {
                Ok(()) => {
                    seen.push(profile.name.as_str());
                    profiles.push(profile.clone());
                }
                Err(e) => warn!("⚠️  {}. Continuing without it.", e),
            }
        }

        profiles
    }

    pub fn thresholds(&self) -> Thresholds {
        self.detection.clone().into()
    }

    /// Time between two frames of the configured source.
    pub fn frame_interval_ms(&self) -> f64 {
        1000.0 / self.capture.fps
    }

    /// The two profile names whose crossings are reported.
    pub fn tracked_pair(&self, profiles: &[ColorProfile]) -> DetectionResult<(String, String)> {
        let (a, b) = match &self.crossover.pair {
            Some([a, b]) => (a.clone(), b.clone()),
            None => match profiles {
                [first, second, ..] => (first.name.clone(), second.name.clone()),
                _ => {
                    return Err(DetectionError::Config(format!(
                        "need two usable color profiles, found {}",
                        profiles.len()
                    )))
                }
            },
        };

        if a == b {
            return Err(DetectionError::Config(format!(
                "crossover pair must name two different lines, got '{}' twice",
                a
            )));
        }
        for name in [&a, &b] {
            if !profiles.iter().any(|p| &p.name == name) {
                return Err(DetectionError::Config(format!(
                    "crossover line '{}' is not an enabled, valid color profile",
                    name
                )));
            }
        }
        Ok((a, b))
    }

    /// Global settings problems. Profile problems are handled per profile
    /// by `enabled_color_profiles`. Checks are written so NaN fails them.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let fps = self.capture.fps;
        if !(0.1..=10.0).contains(&fps) {
            errors.push(format!("Invalid FPS: {}", fps));
        }

        let d = &self.detection;
        if !(0.0..=1.0).contains(&d.confidence_min) {
            errors.push(format!("Invalid confidence threshold: {}", d.confidence_min));
        }
        if !(d.min_line_length >= 0.0) {
            errors.push(format!("Invalid min line length: {}", d.min_line_length));
        }
        if !(d.intersection_tolerance_px >= 0.0) {
            errors.push(format!(
                "Invalid intersection tolerance: {}",
                d.intersection_tolerance_px
            ));
        }
        if !(0.0..=90.0).contains(&d.angle_threshold_deg) {
            errors.push(format!("Invalid angle threshold: {}", d.angle_threshold_deg));
        }
        if !(d.debounce_cooldown_ms >= 0.0 && d.debounce_distance_px >= 0.0) {
            errors.push(format!(
                "Invalid debounce window: {}ms / {}px",
                d.debounce_cooldown_ms, d.debounce_distance_px
            ));
        }
        if !(d.staleness_ms > 0.0) {
            errors.push(format!("Invalid staleness: {}ms", d.staleness_ms));
        }

        let t = &self.tracker;
        if !(t.smoothing_alpha > 0.0 && t.smoothing_alpha <= 1.0) {
            errors.push(format!("Invalid smoothing alpha: {}", t.smoothing_alpha));
        }
        if !(0.0..=1.0).contains(&t.confidence_decay_per_frame) {
            errors.push(format!(
                "Invalid confidence decay: {}",
                t.confidence_decay_per_frame
            ));
        }

        let e = &self.extraction;
        if !(e.density_weight >= 0.0 && e.length_weight >= 0.0) {
            errors.push("Confidence weights must be non-negative".to_string());
        }
        if !(e.density_weight + e.length_weight > 0.0) {
            errors.push("At least one confidence weight must be positive".to_string());
        }
        if !(e.length_saturation > 0.0 && e.expected_thickness_px > 0.0) {
            errors.push("Length saturation and expected thickness must be positive".to_string());
        }
        if !(e.simplify_epsilon_ratio >= 0.0 && e.dedupe_distance_px >= 0.0) {
            errors.push("Simplification settings must be non-negative".to_string());
        }
        if !(e.gap_bridge_px >= 0.0) {
            errors.push(format!("Invalid gap bridge: {}px", e.gap_bridge_px));
        }

        errors
    }
}

pub fn validate_profile(profile: &ColorProfile) -> DetectionResult<()> {
    let invalid = |reason: String| DetectionError::InvalidProfile {
        name: profile.name.clone(),
        reason,
    };

    if profile.name.trim().is_empty() {
        return Err(invalid("empty name".to_string()));
    }

    let HsvRange {
        hue_min,
        hue_max,
        sat_min,
        sat_max,
        val_min,
        val_max,
    } = profile.range;

    for (channel, min, max, limit) in [
        ("hue", hue_min, hue_max, HUE_MAX),
        ("sat", sat_min, sat_max, CHANNEL_MAX),
        ("val", val_min, val_max, CHANNEL_MAX),
    ] {
        if max > limit {
            return Err(invalid(format!("{}_max {} exceeds {}", channel, max, limit)));
        }
        if min > max {
            return Err(invalid(format!(
                "{}_min {} is greater than {}_max {}",
                channel, min, channel, max
            )));
        }
    }

    if let Some(len) = profile.min_length {
        if !(len > 0.0) {
            return Err(invalid(format!("min_length must be positive, got {}", len)));
        }
    }

    Ok(())
}

// src/calibration.rs
//
// Derives a color profile's HSV range from sampled pixels of the line.
//
// Per channel: mean ± 2σ, clamped to the channel bounds, then widened
// symmetrically when narrower than a minimum span (hue 10, sat/val 50) so
// a handful of near-identical samples still yields a usable range.
//
// Hue is circular, so its mean and σ are taken on the hue circle. A range
// cannot wrap past 179 back to 0; a red line whose samples straddle the
// seam gets the side its mean falls on, with a warning.

use crate::color_analysis::rgb_to_hsv;
use crate::config::{CHANNEL_MAX, HUE_MAX};
use crate::types::{Frame, HsvRange};
use std::f64::consts::TAU;
use tracing::{info, warn};

const TOLERANCE_SIGMAS: f64 = 2.0;
const MIN_HUE_SPAN: u16 = 10;
const MIN_SAT_SPAN: u16 = 50;
const MIN_VAL_SPAN: u16 = 50;
/// Radians per hue step (180 steps around the circle).
const HUE_TO_RAD: f64 = TAU / 180.0;
/// Absorbs float noise so a uniform hue of 30 floors to 30, not 29.
const ROUNDING: f64 = 1e-3;

/// HSV range covering the given RGB samples, or `None` without samples.
pub fn calibrate_hsv_range(samples: &[[u8; 3]]) -> Option<HsvRange> {
    if samples.is_empty() {
        warn!("Calibration requested without samples");
        return None;
    }

    let hsv: Vec<(u8, u8, u8)> = samples
        .iter()
        .map(|px| rgb_to_hsv(px[0], px[1], px[2]))
        .collect();

    let hues: Vec<u8> = hsv.iter().map(|p| p.0).collect();
    let (hue_min, hue_max) = hue_range(&hues);
    let (sat_min, sat_max) = channel_range(hsv.iter().map(|p| p.1), CHANNEL_MAX, MIN_SAT_SPAN);
    let (val_min, val_max) = channel_range(hsv.iter().map(|p| p.2), CHANNEL_MAX, MIN_VAL_SPAN);

    let range = HsvRange {
        hue_min,
        hue_max,
        sat_min,
        sat_max,
        val_min,
        val_max,
    };
    info!(
        "🎨 Calibrated from {} samples: H {}-{} S {}-{} V {}-{}",
        samples.len(),
        hue_min,
        hue_max,
        sat_min,
        sat_max,
        val_min,
        val_max
    );
    Some(range)
}

/// Pixels of `frame` at the given coordinates. Out-of-bounds points are
/// skipped; a malformed frame yields nothing.
pub fn sample_frame(frame: &Frame, points: &[(usize, usize)]) -> Vec<[u8; 3]> {
    if let Err(e) = frame.validate() {
        warn!("Cannot sample frame: {}", e);
        return Vec::new();
    }
    points
        .iter()
        .filter(|&&(x, y)| x < frame.width && y < frame.height)
        .map(|&(x, y)| frame.pixel(x, y))
        .collect()
}

fn hue_range(hues: &[u8]) -> (u16, u16) {
    let n = hues.len() as f64;
    let (sin, cos) = hues.iter().fold((0.0f64, 0.0f64), |(s, c), &h| {
        let angle = f64::from(h) * HUE_TO_RAD;
        (s + angle.sin(), c + angle.cos())
    });
    let mean = sin.atan2(cos).rem_euclid(TAU) / HUE_TO_RAD;

    // circular σ from the mean resultant length
    let resultant = (sin.hypot(cos) / n).min(1.0);
    let sigma = if resultant > 0.0 {
        (-2.0 * resultant.ln()).sqrt() / HUE_TO_RAD
    } else {
        f64::INFINITY
    };
    let spread = TOLERANCE_SIGMAS * sigma;

    if mean - spread < 0.0 || mean + spread >= 180.0 {
        warn!(
            "Hue samples wrap around red (mean {:.1}, ±{:.1}); range kept on one side",
            mean, spread
        );
    }
    bounds(mean, spread, HUE_MAX, MIN_HUE_SPAN)
}

fn channel_range(values: impl Iterator<Item = u8> + Clone, limit: u16, min_span: u16) -> (u16, u16) {
    let n = values.clone().count() as f64;
    let mean = values.clone().map(f64::from).sum::<f64>() / n;
    let variance = values.map(|v| (f64::from(v) - mean).powi(2)).sum::<f64>() / n;
    bounds(mean, TOLERANCE_SIGMAS * variance.sqrt(), limit, min_span)
}

fn bounds(mean: f64, spread: f64, limit: u16, min_span: u16) -> (u16, u16) {
    let limit_f = f64::from(limit);
    let mut lo = (mean - spread + ROUNDING).floor().clamp(0.0, limit_f) as u16;
    let mut hi = (mean + spread + ROUNDING).floor().clamp(0.0, limit_f) as u16;

    if hi.saturating_sub(lo) < min_span {
        let half = min_span / 2;
        lo = lo.saturating_sub(half);
        hi = (hi + half).min(limit);
    }
    (lo, hi)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_samples_yield_none() {
        assert!(calibrate_hsv_range(&[]).is_none());
    }

    #[test]
    fn test_uniform_samples_widened_to_minimum_span() {
        // pure yellow: H 30, S 255, V 255
        let range = calibrate_hsv_range(&[[255, 255, 0]; 5]).unwrap();
        assert_eq!((range.hue_min, range.hue_max), (25, 35));
        assert_eq!((range.sat_min, range.sat_max), (230, 255));
        assert_eq!((range.val_min, range.val_max), (230, 255));
        assert!(range.contains(30, 255, 255));
    }

    #[test]
    fn test_spread_samples_cover_every_sample() {
        let samples = [[255, 255, 0], [230, 240, 20], [250, 220, 10], [200, 210, 0]];
        let range = calibrate_hsv_range(&samples).unwrap();
        for px in samples {
            let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
            assert!(range.contains(h, s, v), "({}, {}, {}) outside {:?}", h, s, v, range);
        }
        assert!(range.hue_max <= HUE_MAX);
    }

    #[test]
    fn test_sample_frame_skips_out_of_bounds() {
        let mut frame = Frame::filled(4, 4, [0, 0, 0], 0.0, 0);
        frame.set_pixel(1, 2, [200, 0, 255]);
        let samples = sample_frame(&frame, &[(1, 2), (9, 9)]);
        assert_eq!(samples, vec![[200, 0, 255]]);
    }

    #[test]
    fn test_red_samples_across_hue_seam_stay_narrow() {
        // hues 0, ~179, 1, ~178: one red cluster, not a full-band spread
        let samples = [[255, 0, 0], [255, 0, 10], [255, 10, 0], [255, 0, 20]];
        let range = calibrate_hsv_range(&samples).unwrap();
        assert!(
            range.hue_max - range.hue_min <= 20,
            "hue range too wide: {:?}",
            range
        );
        assert!(range.hue_min == 0 || range.hue_max == HUE_MAX);
    }

    #[test]
    fn test_sample_frame_rejects_malformed_frame() {
        let frame = Frame::new(vec![0u8; 10], 4, 4, 0.0, 0);
        assert!(sample_frame(&frame, &[(0, 0), (3, 3)]).is_empty());
    }
}

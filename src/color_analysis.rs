// src/color_analysis.rs
//
// HSV conversion and per-profile binary masks.
//
// Profiles are authored on the OpenCV 8-bit HSV scale:
//   H 0-179 (degrees / 2), S 0-255, V 0-255
// so ranges sampled with an OpenCV picker (or with the calibration helper)
// drop into config.yaml unchanged.
//
// Mask cleanup mirrors the classic open-then-close pass with a 3x3 kernel:
//   - open  removes isolated specks (anti-aliasing, cursor, candle wicks)
//   - close bridges 1px breaks inside a stroke
// Thin strokes are only closed; specks are left to the length filter.

use crate::types::{Frame, HsvRange};

/// Thickest stroke (px) that skips the opening pass.
pub const THIN_STROKE_PX: f32 = 3.0;

// ============================================================================
// HSV CONVERSION
// ============================================================================

/// Convert RGB to HSV.
/// Returns (H: 0-179, S: 0-255, V: 0-255).
#[inline]
pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> (u8, u8, u8) {
    let r_n = r as f32 / 255.0;
    let g_n = g as f32 / 255.0;
    let b_n = b as f32 / 255.0;

    let max = r_n.max(g_n).max(b_n);
    let min = r_n.min(g_n).min(b_n);
    let delta = max - min;

    // Hue in degrees
    let h = if delta < 1e-6 {
        0.0
    } else if (max - r_n).abs() < 1e-6 {
        60.0 * (((g_n - b_n) / delta) % 6.0)
    } else if (max - g_n).abs() < 1e-6 {
        60.0 * (((b_n - r_n) / delta) + 2.0)
    } else {
        60.0 * (((r_n - g_n) / delta) + 4.0)
    };
    let h = if h < 0.0 { h + 360.0 } else { h };

    // 360° wraps back to 0 on the half-degree scale
    let h = ((h / 2.0).round() as u16 % 180) as u8;

    let s = if max < 1e-6 {
        0
    } else {
        ((delta / max) * 255.0).round() as u8
    };

    let v = (max * 255.0).round() as u8;

    (h, s, v)
}

// ============================================================================
// BINARY MASK
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinaryMask {
    width: usize,
    height: usize,
    bits: Vec<bool>,
}

impl BinaryMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            bits: vec![false; width * height],
        }
    }

    /// Pixels of `frame` whose HSV falls inside `range`. Bytes beyond
    /// `width * height` pixels are ignored; missing pixels stay off.
    pub fn from_frame(frame: &Frame, range: &HsvRange) -> Self {
        let mut mask = Self::new(frame.width, frame.height);
        let pixels = frame.data.chunks_exact(3).take(mask.bits.len());
        for (bit, px) in mask.bits.iter_mut().zip(pixels) {
            let (h, s, v) = rgb_to_hsv(px[0], px[1], px[2]);
            *bit = range.contains(h, s, v);
        }
        mask
    }

    #[inline]
    pub fn width(&self) -> usize {
        self.width
    }

    #[inline]
    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> bool {
        x < self.width && y < self.height && self.bits[y * self.width + x]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, on: bool) {
        if x < self.width && y < self.height {
            self.bits[y * self.width + x] = on;
        }
    }

    pub fn count(&self) -> usize {
        self.bits.iter().filter(|b| **b).count()
    }

    pub fn is_empty(&self) -> bool {
        !self.bits.iter().any(|b| *b)
    }

    /// 3x3 erosion. Pixels outside the frame do not erode their neighbours.
    pub fn eroded(&self) -> Self {
        self.morph(true)
    }

    /// 3x3 dilation.
    pub fn dilated(&self) -> Self {
        self.morph(false)
    }

    pub fn opened(&self) -> Self {
        self.eroded().dilated()
    }

    pub fn closed(&self) -> Self {
        self.dilated().eroded()
    }

    /// Open then close.
    pub fn cleaned(&self) -> Self {
        self.opened().closed()
    }

    /// Cleanup applied before component labelling. A 3x3 opening erases
    /// any angled stroke whose cross-section does not fit the kernel, so
    /// strokes up to `THIN_STROKE_PX` thick are only closed.
    pub fn cleaned_for_stroke(&self, expected_thickness_px: f32) -> Self {
        if expected_thickness_px > THIN_STROKE_PX {
            self.cleaned()
        } else {
            self.closed()
        }
    }

    fn morph(&self, erode: bool) -> Self {
        let mut out = Self::new(self.width, self.height);
        for y in 0..self.height {
            for x in 0..self.width {
                let mut all = true;
                let mut any = false;
                for ny in y.saturating_sub(1)..=(y + 1).min(self.height - 1) {
                    for nx in x.saturating_sub(1)..=(x + 1).min(self.width - 1) {
                        let on = self.bits[ny * self.width + nx];
                        all &= on;
                        any |= on;
                    }
                }
                out.bits[y * self.width + x] = if erode { all } else { any };
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rgb_to_hsv_primaries() {
        assert_eq!(rgb_to_hsv(255, 0, 0), (0, 255, 255));
        assert_eq!(rgb_to_hsv(0, 255, 0), (60, 255, 255));
        assert_eq!(rgb_to_hsv(0, 0, 255), (120, 255, 255));
    }

    #[test]
    fn test_rgb_to_hsv_yellow_and_purple() {
        // yellow sits at 60° → 30 on the half-degree scale
        let (h, s, v) = rgb_to_hsv(255, 255, 0);
        assert_eq!(h, 30);
        assert_eq!(s, 255);
        assert_eq!(v, 255);

        // magenta-ish purple (R=200, G=0, B=255) → ~287° → ~143
        let (h, _, _) = rgb_to_hsv(200, 0, 255);
        assert!((140..=145).contains(&h), "h={}", h);
    }

    #[test]
    fn test_rgb_to_hsv_grey_has_no_saturation() {
        let (h, s, v) = rgb_to_hsv(128, 128, 128);
        assert_eq!(h, 0);
        assert_eq!(s, 0);
        assert_eq!(v, 128);
    }

    #[test]
    fn test_rgb_to_hsv_hue_wraps_below_180() {
        // deep pink just under 360°
        let (h, _, _) = rgb_to_hsv(255, 0, 2);
        assert!(h < 180);
    }

    #[test]
    fn test_mask_selects_only_in_range_pixels() {
        let mut frame = Frame::filled(8, 4, [10, 10, 10], 0.0, 0);
        frame.set_pixel(2, 1, [255, 255, 0]);
        frame.set_pixel(5, 2, [255, 255, 0]);
        let yellow = HsvRange {
            hue_min: 20,
            hue_max: 35,
            sat_min: 100,
            sat_max: 255,
            val_min: 100,
            val_max: 255,
        };
        let mask = BinaryMask::from_frame(&frame, &yellow);
        assert_eq!(mask.count(), 2);
        assert!(mask.get(2, 1));
        assert!(mask.get(5, 2));
        assert!(!mask.get(0, 0));
    }

    #[test]
    fn test_open_removes_speck_keeps_band() {
        let mut mask = BinaryMask::new(20, 10);
        // isolated speck
        mask.set(2, 2, true);
        // 4px thick horizontal band
        for y in 4..8 {
            for x in 5..18 {
                mask.set(x, y, true);
            }
        }
        let cleaned = mask.cleaned();
        assert!(!cleaned.get(2, 2));
        assert!(cleaned.get(10, 5));
        assert!(cleaned.get(10, 6));
    }

    /// 40° stroke about 3px across, the usual indicator line width.
    fn thin_diagonal() -> BinaryMask {
        let mut mask = BinaryMask::new(80, 80);
        let (s, c) = 40f32.to_radians().sin_cos();
        for y in 0..80 {
            for x in 0..80 {
                let (dx, dy) = (x as f32 - 40.0, y as f32 - 40.0);
                if (-dx * s + dy * c).abs() <= 1.5 && (dx * c + dy * s).abs() <= 30.0 {
                    mask.set(x, y, true);
                }
            }
        }
        mask
    }

    #[test]
    fn test_thin_angled_stroke_survives_stroke_cleanup() {
        let mask = thin_diagonal();
        let before = mask.count();
        assert!(mask.cleaned_for_stroke(3.0).count() >= before);
        assert!(mask.cleaned_for_stroke(3.0).get(40, 40));
        // thick strokes still get the full open + close
        assert_eq!(mask.cleaned_for_stroke(5.0), mask.cleaned());
    }

    #[test]
    fn test_mask_ignores_trailing_bytes_and_tolerates_short_data() {
        let mut data = vec![255u8; 10 * 10 * 3 + 30];
        data[0] = 0; // first pixel cyan, rest white
        let long = Frame::new(data, 10, 10, 0.0, 0);
        let white = HsvRange {
            hue_min: 0,
            hue_max: 179,
            sat_min: 0,
            sat_max: 0,
            val_min: 200,
            val_max: 255,
        };
        assert_eq!(BinaryMask::from_frame(&long, &white).count(), 99);

        let short = Frame::new(vec![255u8; 12], 10, 10, 0.0, 1);
        assert_eq!(BinaryMask::from_frame(&short, &white).count(), 4);
    }

    #[test]
    fn test_close_bridges_single_pixel_gap() {
        let mut mask = BinaryMask::new(20, 10);
        for y in 3..7 {
            for x in 2..18 {
                if x != 9 {
                    mask.set(x, y, true);
                }
            }
        }
        let closed = mask.closed();
        assert!(closed.get(9, 4));
        assert!(closed.get(9, 5));
    }
}

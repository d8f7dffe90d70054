// ============================================================================
// TEXTURE COMPOSITOR — perspective warp, feathered alpha, blend
// ============================================================================
//
// Strict order:
//   1. warp the material into image space (homography onto the estimated
//      quad, or the mask's bounding box when no quad is usable)
//   2. feather the hard mask into an alpha ramp
//   3. out = original * (1 - a) + warped * a,  a = feathered * opacity
//   4. return a fresh buffer; the source image is never touched
//
// `composite` is a pure function of its inputs.  Each stage polls the
// optional cancel flag so a superseded background job stops early.

use std::sync::atomic::{AtomicBool, Ordering};

use image::{GrayImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::canvas::binarize;
use crate::ops::ai::{normalize_mask, DEFAULT_MASK_THRESHOLD};
use crate::ops::filters::{feather, FEATHER_PASSES};
use crate::ops::perspective::{bounding_quad, estimate_quad, Quad, DEFAULT_EPSILON_RATIO};
use crate::ops::transform::{warp_into_quad, PlacementMode};

/// Default blend strength.
pub const DEFAULT_OPACITY: f32 = 0.85;

/// Default feather blur radius (px).
pub const DEFAULT_FEATHER_RADIUS: u32 = 20;

/// Errors that abort a composite.  The caller keeps whatever it was
/// displaying before.
#[derive(Debug, Clone, PartialEq)]
pub enum CompositeError {
    /// The material has no usable pixels.
    UnsupportedTextureFormat(String),
    /// A newer request superseded this one.
    Cancelled,
}

impl std::fmt::Display for CompositeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompositeError::UnsupportedTextureFormat(e) => write!(f, "Unsupported texture: {}", e),
            CompositeError::Cancelled => write!(f, "Composite cancelled"),
        }
    }
}

impl std::error::Error for CompositeError {}

/// Tunables for a single composite call.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CompositeOptions {
    /// Blend strength in 0..=1 (clamped).
    pub opacity: f32,
    /// Box radius of each feathering pass.
    pub feather_radius: u32,
    /// Estimate a perspective quad; when false the bounding box is used.
    pub perspective: bool,
    pub placement: PlacementMode,
    /// Douglas-Peucker tolerance as a fraction of the contour perimeter.
    pub epsilon_ratio: f32,
}

impl Default for CompositeOptions {
    fn default() -> Self {
        Self {
            opacity: DEFAULT_OPACITY,
            feather_radius: DEFAULT_FEATHER_RADIUS,
            perspective: true,
            placement: PlacementMode::Tile,
            epsilon_ratio: DEFAULT_EPSILON_RATIO,
        }
    }
}

impl CompositeOptions {
    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }
}

#[inline]
fn cancelled(cancel: Option<&AtomicBool>) -> bool {
    cancel.is_some_and(|c| c.load(Ordering::Relaxed))
}

/// Pick the destination quad for `mask`: perspective estimate when enabled
/// and usable, else the axis-aligned bounding box.  `None` for an empty mask.
pub fn destination_quad(mask: &GrayImage, opts: &CompositeOptions) -> Option<Quad> {
    if opts.perspective {
        if let Some(quad) = estimate_quad(mask, opts.epsilon_ratio) {
            return Some(quad);
        }
        crate::log_warn!("composite: no usable contour, using bounding box");
    }
    bounding_quad(mask)
}

/// Composite `texture` into the masked region of `image`.
///
/// The output always has the dimensions of `image`.  An empty mask yields an
/// unchanged copy.
pub fn composite(
    image: &RgbaImage,
    mask: &GrayImage,
    texture: &RgbaImage,
    opts: &CompositeOptions,
    cancel: Option<&AtomicBool>,
) -> Result<RgbaImage, CompositeError> {
    if texture.width() == 0 || texture.height() == 0 {
        return Err(CompositeError::UnsupportedTextureFormat("texture has no pixels".into()));
    }
    let (w, h) = image.dimensions();
    let hard = if mask.dimensions() == (w, h) {
        binarize(mask, DEFAULT_MASK_THRESHOLD)
    } else {
        normalize_mask(mask, w, h, DEFAULT_MASK_THRESHOLD)
    };

    // 1. Warp
    let Some(quad) = destination_quad(&hard, opts) else {
        return Ok(image.clone());
    };
    let reach = opts.feather_radius * FEATHER_PASSES as u32;
    let clip = crate::canvas::mask_bounds(&hard).map(|(x0, y0, x1, y1)| {
        (x0.saturating_sub(reach), y0.saturating_sub(reach), (x1 + reach).min(w - 1), (y1 + reach).min(h - 1))
    });
    let warped = match warp_into_quad(texture, &quad, w, h, opts.placement, clip, cancel) {
        Some(img) => img,
        None => {
            // Degenerate homography: retry on the bounding box
            let fallback = bounding_quad(&hard).unwrap_or(quad);
            warp_into_quad(texture, &fallback, w, h, PlacementMode::Tile, clip, cancel)
                .unwrap_or_else(|| RgbaImage::new(w, h))
        }
    };
    if cancelled(cancel) {
        return Err(CompositeError::Cancelled);
    }

    // 2. Feather
    let alpha = feather(&hard, opts.feather_radius);
    if cancelled(cancel) {
        return Err(CompositeError::Cancelled);
    }

    // 3. Blend
    let out = blend(image, &warped, &alpha, opts.opacity);
    if cancelled(cancel) {
        return Err(CompositeError::Cancelled);
    }

    // 4. Fresh buffer
    Ok(out)
}

/// Per-pixel `original * (1 - a) + warped * a` with
/// `a = alpha × opacity × warped.alpha`.  The original alpha is kept.
pub fn blend(image: &RgbaImage, warped: &RgbaImage, alpha: &GrayImage, opacity: f32) -> RgbaImage {
    let (w, h) = image.dimensions();
    let mut out = image.clone();
    if warped.dimensions() != (w, h) || alpha.dimensions() != (w, h) || w == 0 {
        return out;
    }
    let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { 0.0 };
    let row_bytes = w as usize * 4;
    let warped_raw = warped.as_raw();
    let alpha_raw = alpha.as_raw();

    out.as_mut().par_chunks_mut(row_bytes).enumerate().for_each(|(y, row)| {
        let base = y * w as usize;
        for x in 0..w as usize {
            let m = alpha_raw[base + x];
            if m == 0 {
                continue;
            }
            let src = &warped_raw[(base + x) * 4..(base + x) * 4 + 4];
            let a = (m as f32 / 255.0) * opacity * (src[3] as f32 / 255.0);
            if a <= 0.0 {
                continue;
            }
            let dst = &mut row[x * 4..x * 4 + 4];
            for c in 0..3 {
                let v = dst[c] as f32 * (1.0 - a) + src[c] as f32 * a;
                dst[c] = v.round().clamp(0.0, 255.0) as u8;
            }
        }
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::fill_rect;
    use image::Rgba;

    fn grey(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([90, 100, 110, 255]))
    }

    #[test]
    fn output_matches_image_dimensions_even_for_mismatched_mask() {
        let img = grey(64, 48);
        let mut mask = GrayImage::new(32, 24);
        fill_rect(&mut mask, 4, 4, 20, 20);
        let tex = RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255]));
        let out = composite(&img, &mask, &tex, &CompositeOptions::default(), None).unwrap();
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn empty_mask_returns_the_original() {
        let img = grey(32, 32);
        let tex = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let out = composite(&img, &GrayImage::new(32, 32), &tex, &CompositeOptions::default(), None).unwrap();
        assert_eq!(out.as_raw(), img.as_raw());
    }

    #[test]
    fn empty_texture_is_rejected() {
        let img = grey(8, 8);
        let mut mask = GrayImage::new(8, 8);
        fill_rect(&mut mask, 0, 0, 7, 7);
        let err = composite(&img, &mask, &RgbaImage::new(0, 0), &CompositeOptions::default(), None).unwrap_err();
        assert!(matches!(err, CompositeError::UnsupportedTextureFormat(_)));
    }

    #[test]
    fn opacity_scales_the_blend() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 0, 255]));
        let warped = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 50, 255]));
        let alpha = GrayImage::from_pixel(1, 1, image::Luma([255]));
        assert_eq!(blend(&img, &warped, &alpha, 0.5).get_pixel(0, 0).0, [100, 50, 25, 255]);
        assert_eq!(blend(&img, &warped, &alpha, 0.0).get_pixel(0, 0).0, [0, 0, 0, 255]);
    }

    #[test]
    fn same_inputs_give_identical_output() {
        let img = RgbaImage::from_fn(60, 40, |x, y| Rgba([x as u8 * 3, y as u8 * 5, 40, 255]));
        let mut mask = GrayImage::new(60, 40);
        fill_rect(&mut mask, 10, 5, 45, 30);
        let tex = RgbaImage::from_fn(7, 5, |x, y| Rgba([x as u8 * 30, y as u8 * 40, 200, 255]));
        let opts = CompositeOptions::default();
        let a = composite(&img, &mask, &tex, &opts, None).unwrap();
        let b = composite(&img, &mask, &tex, &opts, None).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
    }

    #[test]
    fn raised_flag_cancels() {
        let img = grey(32, 32);
        let mut mask = GrayImage::new(32, 32);
        fill_rect(&mut mask, 4, 4, 27, 27);
        let tex = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let flag = AtomicBool::new(true);
        let err = composite(&img, &mask, &tex, &CompositeOptions::default(), Some(&flag)).unwrap_err();
        assert_eq!(err, CompositeError::Cancelled);
    }
}

// ============================================================================
// TRANSFORM OPERATIONS — homography solve and perspective texture warp
// ============================================================================

use std::sync::atomic::{AtomicBool, Ordering};

use image::{Rgba, RgbaImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::ops::perspective::Quad;

const EPS: f64 = 1e-9;

/// How the material fills the destination quad.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum PlacementMode {
    /// One copy of the material is stretched over the whole quad.
    Stretch,
    /// The material repeats at its native pixel size across the quad.
    #[default]
    Tile,
}

impl PlacementMode {
    pub fn label(&self) -> &'static str {
        match self {
            PlacementMode::Stretch => "stretch",
            PlacementMode::Tile => "tile",
        }
    }

    pub fn from_label(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "stretch" => Some(PlacementMode::Stretch),
            "tile" => Some(PlacementMode::Tile),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
//  Homography
// ---------------------------------------------------------------------------

/// Solve the projective transform mapping each `src[i]` onto `dst[i]`.
///
/// Standard 8-unknown DLT with `h33 = 1`.  Returns `None` when the
/// correspondences are degenerate (three collinear points, repeated corners).
pub fn solve_homography(src: &[(f32, f32); 4], dst: &[(f32, f32); 4]) -> Option<Matrix3<f64>> {
    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for i in 0..4 {
        let (x, y) = (src[i].0 as f64, src[i].1 as f64);
        let (u, v) = (dst[i].0 as f64, dst[i].1 as f64);
        let r = 2 * i;
        a[(r, 0)] = x;
        a[(r, 1)] = y;
        a[(r, 2)] = 1.0;
        a[(r, 6)] = -u * x;
        a[(r, 7)] = -u * y;
        b[r] = u;
        a[(r + 1, 3)] = x;
        a[(r + 1, 4)] = y;
        a[(r + 1, 5)] = 1.0;
        a[(r + 1, 6)] = -v * x;
        a[(r + 1, 7)] = -v * y;
        b[r + 1] = v;
    }
    let h = a.lu().solve(&b)?;
    if h.iter().any(|v| !v.is_finite()) {
        return None;
    }
    let m = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0);
    (m.determinant().abs() > EPS).then_some(m)
}

/// Apply `h` to a point; `None` when it maps to infinity.
pub fn project_point(h: &Matrix3<f64>, p: (f32, f32)) -> Option<(f32, f32)> {
    let v = h * Vector3::new(p.0 as f64, p.1 as f64, 1.0);
    if !v[2].is_finite() || v[2].abs() <= EPS {
        return None;
    }
    Some(((v[0] / v[2]) as f32, (v[1] / v[2]) as f32))
}

fn edge_len(a: (f32, f32), b: (f32, f32)) -> f32 {
    ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
}

/// Source rectangle whose corners map onto the quad.
///
/// Stretch uses the whole texture; tile uses the quad's own mean edge
/// lengths so one texture pixel lands on roughly one image pixel.
fn source_rect(texture: &RgbaImage, quad: &Quad, mode: PlacementMode) -> [(f32, f32); 4] {
    let (w, h) = match mode {
        PlacementMode::Stretch => (texture.width() as f32, texture.height() as f32),
        PlacementMode::Tile => {
            let c = &quad.corners;
            let w = 0.5 * (edge_len(c[0], c[1]) + edge_len(c[3], c[2]));
            let h = 0.5 * (edge_len(c[0], c[3]) + edge_len(c[1], c[2]));
            (w.max(1.0), h.max(1.0))
        }
    };
    [(0.0, 0.0), (w, 0.0), (w, h), (0.0, h)]
}

// ---------------------------------------------------------------------------
//  Sampling
// ---------------------------------------------------------------------------

#[inline]
fn texel(img: &RgbaImage, x: i64, y: i64, wrap: bool) -> [f32; 4] {
    let (w, h) = (img.width() as i64, img.height() as i64);
    let (sx, sy) = if wrap {
        (x.rem_euclid(w), y.rem_euclid(h))
    } else {
        (x.clamp(0, w - 1), y.clamp(0, h - 1))
    };
    let p = img.get_pixel(sx as u32, sy as u32);
    [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
}

/// Bilinear sample at a continuous texel position.  `wrap` repeats the
/// texture in both directions; otherwise edges are clamped.
pub fn bilinear_sample(img: &RgbaImage, x: f32, y: f32, wrap: bool) -> Rgba<u8> {
    if img.width() == 0 || img.height() == 0 {
        return Rgba([0, 0, 0, 0]);
    }
    let x0 = x.floor() as i64;
    let y0 = y.floor() as i64;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tl = texel(img, x0, y0, wrap);
    let tr = texel(img, x0 + 1, y0, wrap);
    let bl = texel(img, x0, y0 + 1, wrap);
    let br = texel(img, x0 + 1, y0 + 1, wrap);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = lerp(tl[c], tr[c], fx);
        let bot = lerp(bl[c], br[c], fx);
        out[c] = lerp(top, bot, fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

// ---------------------------------------------------------------------------
//  Warp
// ---------------------------------------------------------------------------

/// Warp `texture` into a `width × height` canvas so that its source
/// rectangle lands on `quad`.
///
/// Inverse mapping: each destination pixel is projected back into texture
/// space and bilinearly sampled.  Only pixels inside the inclusive `clip` box
/// are written (all pixels when `clip` is `None`); the rest stay transparent.
/// Rows run in parallel and are skipped once `cancel` is raised.  Returns
/// `None` for a degenerate quad or an empty texture.
pub fn warp_into_quad(
    texture: &RgbaImage,
    quad: &Quad,
    width: u32,
    height: u32,
    mode: PlacementMode,
    clip: Option<(u32, u32, u32, u32)>,
    cancel: Option<&AtomicBool>,
) -> Option<RgbaImage> {
    if texture.width() == 0 || texture.height() == 0 {
        return None;
    }
    let src = source_rect(texture, quad, mode);
    let forward = solve_homography(&src, &quad.corners)?;
    let inverse = forward.try_inverse()?;

    let wrap = mode == PlacementMode::Tile;
    let mut dst = RgbaImage::new(width, height);
    if width == 0 || height == 0 {
        return Some(dst);
    }
    let (x0, y0, x1, y1) = clip.unwrap_or((0, 0, width - 1, height - 1));
    let (x_end, y_end) = (x1.min(width - 1) as usize, y1.min(height - 1) as usize);
    let row_bytes = width as usize * 4;
    let (h00, h01, h02) = (inverse[(0, 0)], inverse[(0, 1)], inverse[(0, 2)]);
    let (h10, h11, h12) = (inverse[(1, 0)], inverse[(1, 1)], inverse[(1, 2)]);
    let (h20, h21, h22) = (inverse[(2, 0)], inverse[(2, 1)], inverse[(2, 2)]);

    dst.as_mut().par_chunks_mut(row_bytes).enumerate().for_each(|(dy, row)| {
        if dy < y0 as usize || dy > y_end || cancel.is_some_and(|c| c.load(Ordering::Relaxed)) {
            return;
        }
        let v = dy as f64;
        let base_sx = h01 * v + h02;
        let base_sy = h11 * v + h12;
        let base_sw = h21 * v + h22;

        for dx in x0 as usize..=x_end {
            let u = dx as f64;
            let w = h20 * u + base_sw;
            if w.abs() < EPS {
                continue;
            }
            let sx = (h00 * u + base_sx) / w;
            let sy = (h10 * u + base_sy) / w;
            if !sx.is_finite() || !sy.is_finite() {
                continue;
            }
            let px = bilinear_sample(texture, sx as f32, sy as f32, wrap);
            let off = dx * 4;
            row[off..off + 4].copy_from_slice(&px.0);
        }
    });
    Some(dst)
}

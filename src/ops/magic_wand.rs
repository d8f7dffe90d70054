// ============================================================================
// MAGIC WAND — color-tolerance region growing from a seed pixel
// ============================================================================

use image::{GrayImage, RgbaImage};

use crate::canvas::{MASK_ON, SelectionMode};

/// Default tolerance on the 0–255 channel scale.
pub const DEFAULT_TOLERANCE: f32 = 30.0;

/// Result of a region-growing pass.
pub struct WandRegion {
    /// 0/255 membership raster, same size as the image.
    pub mask: GrayImage,
    /// Inclusive bounding box of the grown region.
    pub bounds: (u32, u32, u32, u32),
    /// Number of selected pixels.
    pub area: usize,
}

/// Per-channel match: every RGB channel within `tol` of the seed colour.
#[inline(always)]
fn matches(p: &[u8], seed: [u8; 3], tol: f32) -> bool {
    let r = (p[0] as f32 - seed[0] as f32).abs();
    let g = (p[1] as f32 - seed[1] as f32).abs();
    let b = (p[2] as f32 - seed[2] as f32).abs();
    r.max(g).max(b) <= tol
}

/// 4-connected flood fill from `seed` over `image`.
///
/// A neighbour joins the region iff each of its RGB channels differs from the
/// seed colour by at most `tolerance`.  The output mask doubles as the
/// visited set, so every pixel is pushed at most once.  A seed outside the
/// image (or a non-finite coordinate) returns `None`.
pub fn grow_region(image: &RgbaImage, seed: (f32, f32), tolerance: f32) -> Option<WandRegion> {
    let (w, h) = image.dimensions();
    if !(seed.0.is_finite() && seed.1.is_finite()) || seed.0 < 0.0 || seed.1 < 0.0 {
        return None;
    }
    let (sx, sy) = (seed.0.floor() as u32, seed.1.floor() as u32);
    if sx >= w || sy >= h {
        return None;
    }

    let wu = w as usize;
    let flat = image.as_raw();
    let tol = tolerance.max(0.0);
    let seed_idx = sy as usize * wu + sx as usize;
    let seed_color = [flat[seed_idx * 4], flat[seed_idx * 4 + 1], flat[seed_idx * 4 + 2]];

    let mut mask = GrayImage::new(w, h);
    let visited = mask.as_mut();

    let (mut min_x, mut min_y, mut max_x, mut max_y) = (sx, sy, sx, sy);
    let mut area = 0usize;

    // DFS stack of packed flat indices
    let mut stack: Vec<u32> = Vec::with_capacity(4096);
    visited[seed_idx] = MASK_ON;
    stack.push(seed_idx as u32);

    while let Some(idx) = stack.pop() {
        let idx = idx as usize;
        let x = (idx % wu) as u32;
        let y = (idx / wu) as u32;
        area += 1;
        min_x = min_x.min(x);
        max_x = max_x.max(x);
        min_y = min_y.min(y);
        max_y = max_y.max(y);

        let mut visit = |ni: usize, stack: &mut Vec<u32>| {
            if visited[ni] == 0 && matches(&flat[ni * 4..ni * 4 + 3], seed_color, tol) {
                visited[ni] = MASK_ON;
                stack.push(ni as u32);
            }
        };
        if x > 0 {
            visit(idx - 1, &mut stack);
        }
        if x + 1 < w {
            visit(idx + 1, &mut stack);
        }
        if y > 0 {
            visit(idx - wu, &mut stack);
        }
        if y + 1 < h {
            visit(idx + wu, &mut stack);
        }
    }

    Some(WandRegion { mask, bounds: (min_x, min_y, max_x, max_y), area })
}

/// Grow a region from `seed` and merge it into `target`.  Returns the grown
/// area, or `None` when the seed is out of bounds (the mask is untouched).
pub fn apply_magic_wand(
    target: &mut GrayImage,
    image: &RgbaImage,
    seed: (f32, f32),
    tolerance: f32,
    mode: SelectionMode,
) -> Option<usize> {
    let region = grow_region(image, seed, tolerance)?;
    mode.merge_into(target, &region.mask);
    Some(region.area)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn two_tone(w: u32, h: u32, split: u32) -> RgbaImage {
        RgbaImage::from_fn(w, h, |x, _| {
            if x < split { Rgba([200, 10, 10, 255]) } else { Rgba([10, 10, 200, 255]) }
        })
    }

    #[test]
    fn zero_tolerance_selects_connected_identical_pixels() {
        let mut img = two_tone(20, 10, 10);
        // Isolated pixel of the seed colour on the far side must not join
        img.put_pixel(15, 5, Rgba([200, 10, 10, 255]));
        let region = grow_region(&img, (2.0, 2.0), 0.0).unwrap();
        assert_eq!(region.area, 100);
        assert_eq!(region.bounds, (0, 0, 9, 9));
        assert_eq!(region.mask.get_pixel(15, 5).0[0], 0);
    }

    #[test]
    fn tolerance_admits_close_colours() {
        let img = RgbaImage::from_fn(10, 1, |x, _| Rgba([100 + x as u8 * 5, 100, 100, 255]));
        let region = grow_region(&img, (0.0, 0.0), 12.0).unwrap();
        // 100, 105, 110 are within 12 of the seed; 115 is not
        assert_eq!(region.area, 3);
    }

    #[test]
    fn diagonal_neighbours_are_not_connected() {
        let mut img = RgbaImage::from_pixel(3, 3, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 255, 255, 255]));
        img.put_pixel(1, 1, Rgba([255, 255, 255, 255]));
        let region = grow_region(&img, (0.0, 0.0), 0.0).unwrap();
        assert_eq!(region.area, 1);
    }

    #[test]
    fn seed_outside_image_is_a_no_op() {
        let img = two_tone(800, 600, 400);
        let mut mask = GrayImage::new(800, 600);
        assert!(apply_magic_wand(&mut mask, &img, (10000.0, 10000.0), 30.0, SelectionMode::Add).is_none());
        assert!(grow_region(&img, (-1.0, 3.0), 30.0).is_none());
        assert!(mask.as_raw().iter().all(|&v| v == 0));
    }
}

// ============================================================================
// BRUSH / ERASER — capsule stroke rasterizer for the working mask
// ============================================================================

use image::GrayImage;

use crate::canvas::{MASK_OFF, MASK_ON, SelectionMode};

/// Dirty rectangle touched by a stroke, inclusive `(min_x, min_y, max_x, max_y)`.
pub type DirtyRect = (u32, u32, u32, u32);

/// Stamp a stroke into `mask`.
///
/// Every consecutive pair of samples becomes a round-capped thick segment of
/// radius `radius` (image pixels).  `Add` unions the capsules into the mask,
/// `Subtract` clears them, `Replace` swaps the mask for the stroke shape once
/// the stroke lands on the raster.
/// A single sample stamps one disc.  Samples are image-space coordinates;
/// pixel `(x, y)` is covered when its centre `(x + 0.5, y + 0.5)` lies within
/// `radius` of the segment.
///
/// Returns the clamped dirty rectangle, or `None` when nothing on the raster
/// was touched.
pub fn apply_stroke(
    mask: &mut GrayImage,
    points: &[(f32, f32)],
    radius: f32,
    mode: SelectionMode,
) -> Option<DirtyRect> {
    if points.is_empty() || !(radius > 0.0) {
        return None;
    }
    match mode {
        SelectionMode::Add => stamp_path(mask, points, radius, MASK_ON),
        SelectionMode::Subtract => stamp_path(mask, points, radius, MASK_OFF),
        SelectionMode::Replace => {
            // Only replace once the stroke actually lands on the raster
            let (w, h) = mask.dimensions();
            let mut shape = GrayImage::new(w, h);
            stamp_path(&mut shape, points, radius, MASK_ON)?;
            *mask = shape;
            Some((0, 0, w - 1, h - 1))
        }
    }
}

fn stamp_path(mask: &mut GrayImage, points: &[(f32, f32)], radius: f32, value: u8) -> Option<DirtyRect> {
    if points.len() == 1 {
        return stamp_capsule(mask, points[0], points[0], radius, value);
    }
    let mut dirty: Option<DirtyRect> = None;
    for pair in points.windows(2) {
        if let Some(rect) = stamp_capsule(mask, pair[0], pair[1], radius, value) {
            dirty = Some(match dirty {
                Some(d) => union_rect(d, rect),
                None => rect,
            });
        }
    }
    dirty
}

/// Rasterize one capsule (segment `a`→`b` swept by a disc of `radius`).
fn stamp_capsule(
    mask: &mut GrayImage,
    a: (f32, f32),
    b: (f32, f32),
    radius: f32,
    value: u8,
) -> Option<DirtyRect> {
    let (w, h) = mask.dimensions();
    if w == 0 || h == 0 {
        return None;
    }

    // Pixel-space bounds of the capsule, clamped to the raster
    let min_x = (a.0.min(b.0) - radius - 0.5).floor().max(0.0);
    let min_y = (a.1.min(b.1) - radius - 0.5).floor().max(0.0);
    let max_x = (a.0.max(b.0) + radius).ceil().min(w as f32 - 1.0);
    let max_y = (a.1.max(b.1) + radius).ceil().min(h as f32 - 1.0);
    if min_x > max_x || min_y > max_y {
        return None;
    }
    let (x0, y0, x1, y1) = (min_x as u32, min_y as u32, max_x as u32, max_y as u32);

    let r2 = radius * radius;
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let len2 = dx * dx + dy * dy;
    let inv_len2 = if len2 > 1e-12 { 1.0 / len2 } else { 0.0 };

    let stride = w as usize;
    let raw = mask.as_mut();
    let mut touched = false;
    for y in y0..=y1 {
        let py = y as f32 + 0.5;
        let row = y as usize * stride;
        for x in x0..=x1 {
            let px = x as f32 + 0.5;
            // Project onto the segment and clamp to its endpoints
            let t = (((px - a.0) * dx + (py - a.1) * dy) * inv_len2).clamp(0.0, 1.0);
            let cx = a.0 + dx * t;
            let cy = a.1 + dy * t;
            let ex = px - cx;
            let ey = py - cy;
            if ex * ex + ey * ey <= r2 {
                raw[row + x as usize] = value;
                touched = true;
            }
        }
    }
    touched.then_some((x0, y0, x1, y1))
}

fn union_rect(a: DirtyRect, b: DirtyRect) -> DirtyRect {
    (a.0.min(b.0), a.1.min(b.1), a.2.max(b.2), a.3.max(b.3))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{mask_area, mask_is_empty};

    #[test]
    fn fast_motion_leaves_no_gaps() {
        let mut mask = GrayImage::new(200, 50);
        apply_stroke(&mut mask, &[(10.0, 25.0), (190.0, 25.0)], 5.0, SelectionMode::Add);
        // Every column between the two samples is covered on the centre row
        for x in 10..190 {
            assert_eq!(mask.get_pixel(x, 25).0[0], MASK_ON, "gap at x={}", x);
        }
    }

    #[test]
    fn single_sample_stamps_a_disc() {
        let mut mask = GrayImage::new(64, 64);
        apply_stroke(&mut mask, &[(32.0, 32.0)], 10.0, SelectionMode::Add);
        let area = mask_area(&mask) as f32;
        let expected = std::f32::consts::PI * 100.0;
        assert!((area - expected).abs() / expected < 0.1, "area {}", area);
        assert_eq!(mask.get_pixel(32, 32).0[0], MASK_ON);
        assert_eq!(mask.get_pixel(32, 45).0[0], MASK_OFF);
    }

    #[test]
    fn eraser_undoes_brush_on_same_path() {
        let mut mask = GrayImage::new(120, 120);
        let path = [(10.0, 10.0), (60.0, 80.0), (110.0, 20.0)];
        apply_stroke(&mut mask, &path, 12.0, SelectionMode::Add);
        assert!(!mask_is_empty(&mask));
        apply_stroke(&mut mask, &path, 12.0, SelectionMode::Subtract);
        assert!(mask_is_empty(&mask));
    }

    #[test]
    fn off_canvas_stroke_touches_nothing() {
        let mut mask = GrayImage::new(20, 20);
        let dirty = apply_stroke(&mut mask, &[(-100.0, -100.0), (-50.0, -80.0)], 5.0, SelectionMode::Add);
        assert!(dirty.is_none());
        assert!(mask_is_empty(&mask));
    }

    #[test]
    fn replace_keeps_the_mask_when_the_stroke_misses() {
        let mut mask = GrayImage::new(20, 20);
        apply_stroke(&mut mask, &[(10.0, 10.0)], 4.0, SelectionMode::Add);
        let before = mask.clone();
        let dirty = apply_stroke(&mut mask, &[(-100.0, -100.0)], 5.0, SelectionMode::Replace);
        assert!(dirty.is_none());
        assert_eq!(mask.as_raw(), before.as_raw());

        let dirty = apply_stroke(&mut mask, &[(3.0, 3.0)], 2.0, SelectionMode::Replace);
        assert_eq!(dirty, Some((0, 0, 19, 19)));
        assert_eq!(mask.get_pixel(10, 10).0[0], MASK_OFF);
        assert_eq!(mask.get_pixel(3, 3).0[0], MASK_ON);
    }
}

// ============================================================================
// LASSO — closed polygon scanline fill (nonzero winding)
// ============================================================================

use image::GrayImage;

use crate::canvas::{MASK_ON, SelectionMode};

/// Rasterize the closed polygon `points` into a fresh mask of the given size.
///
/// The path is implicitly closed (last → first).  A pixel is inside when its
/// centre has a nonzero winding number.  Returns `None` for fewer than three
/// points.
pub fn rasterize_polygon(points: &[(f32, f32)], width: u32, height: u32) -> Option<GrayImage> {
    if points.len() < 3 {
        return None;
    }
    let mut mask = GrayImage::new(width, height);
    if width == 0 || height == 0 {
        return Some(mask);
    }

    // Only scan rows the polygon can reach
    let (min_y, max_y) = points
        .iter()
        .fold((f32::MAX, f32::MIN), |(lo, hi), p| (lo.min(p.1), hi.max(p.1)));
    let row_start = (min_y - 0.5).floor().max(0.0) as u32;
    let row_end = ((max_y + 0.5).ceil().max(0.0) as u32).min(height);

    let n = points.len();
    let stride = width as usize;
    let raw = mask.as_mut();
    // (x-intercept, winding direction)
    let mut nodes: Vec<(f32, i32)> = Vec::with_capacity(16);

    for y in row_start..row_end {
        let yf = y as f32 + 0.5; // centre of pixel row
        nodes.clear();
        // Walk polygon edges (including closing edge n-1 → 0)
        for i in 0..n {
            let (xi, yi) = points[i];
            let (xj, yj) = points[(i + 1) % n];
            // Half-open rule so shared vertices are counted once
            let upward = yi <= yf && yj > yf;
            let downward = yj <= yf && yi > yf;
            if upward || downward {
                let t = (yf - yi) / (yj - yi);
                let x = xi + t * (xj - xi);
                nodes.push((x, if upward { 1 } else { -1 }));
            }
        }
        if nodes.len() < 2 {
            continue;
        }
        nodes.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

        // Fill spans where the running winding number is nonzero
        let mut winding = 0;
        for k in 0..nodes.len() - 1 {
            winding += nodes[k].1;
            if winding == 0 {
                continue;
            }
            let x_start = (nodes[k].0 - 0.5).ceil().max(0.0) as u32;
            let x_end = ((nodes[k + 1].0 - 0.5).ceil().max(0.0) as u32).min(width);
            let row = y as usize * stride;
            for x in x_start.min(width)..x_end {
                raw[row + x as usize] = MASK_ON;
            }
        }
    }
    Some(mask)
}

/// Fill a lasso path into `mask` using `mode`.  Returns `false` (and leaves
/// the mask untouched) when the path has fewer than three points.
pub fn apply_lasso(mask: &mut GrayImage, points: &[(f32, f32)], mode: SelectionMode) -> bool {
    let (w, h) = mask.dimensions();
    match rasterize_polygon(points, w, h) {
        Some(shape) => {
            mode.merge_into(mask, &shape);
            true
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{mask_area, mask_bounds, mask_is_empty};

    #[test]
    fn square_fills_exact_pixels() {
        let square = [(10.0, 10.0), (20.0, 10.0), (20.0, 20.0), (10.0, 20.0)];
        let mask = rasterize_polygon(&square, 32, 32).unwrap();
        assert_eq!(mask_area(&mask), 100);
        assert_eq!(mask_bounds(&mask), Some((10, 10, 19, 19)));
    }

    #[test]
    fn winding_direction_does_not_matter() {
        let cw = [(5.0, 5.0), (25.0, 5.0), (15.0, 25.0)];
        let ccw = [(15.0, 25.0), (25.0, 5.0), (5.0, 5.0)];
        let a = rasterize_polygon(&cw, 32, 32).unwrap();
        let b = rasterize_polygon(&ccw, 32, 32).unwrap();
        assert_eq!(a.as_raw(), b.as_raw());
        assert!(!mask_is_empty(&a));
    }

    #[test]
    fn fewer_than_three_points_is_a_no_op() {
        let mut mask = GrayImage::new(16, 16);
        assert!(!apply_lasso(&mut mask, &[(1.0, 1.0), (10.0, 10.0)], SelectionMode::Add));
        assert!(mask_is_empty(&mask));
    }

    #[test]
    fn polygon_is_clipped_to_raster() {
        let big = [(-50.0, -50.0), (100.0, -50.0), (100.0, 100.0), (-50.0, 100.0)];
        let mask = rasterize_polygon(&big, 8, 8).unwrap();
        assert_eq!(mask_area(&mask), 64);
    }

    #[test]
    fn subtract_cuts_a_hole() {
        let mut mask = rasterize_polygon(&[(0.0, 0.0), (16.0, 0.0), (16.0, 16.0), (0.0, 16.0)], 16, 16).unwrap();
        apply_lasso(&mut mask, &[(4.0, 4.0), (8.0, 4.0), (8.0, 8.0), (4.0, 8.0)], SelectionMode::Subtract);
        assert_eq!(mask_area(&mask), 256 - 16);
    }
}

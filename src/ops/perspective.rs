// ============================================================================
// PERSPECTIVE ESTIMATION — destination quadrilateral from a surface mask
// ============================================================================
//
// Pipeline:
//   1. binarize the mask and trace borders (Suzuki-Abe via imageproc)
//   2. keep the outer contour enclosing the largest area
//   3. Douglas-Peucker simplification at ε = ratio × perimeter
//   4. four convex vertices → use them; otherwise minimum-area rectangle
//   5. order corners clockwise from top-left (TL, TR, BR, BL)

use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use serde::{Deserialize, Serialize};

use crate::canvas::{binarize, mask_bounds};

/// Default simplification tolerance as a fraction of the contour perimeter.
pub const DEFAULT_EPSILON_RATIO: f32 = 0.02;

/// Quads smaller than this (in px²) are treated as degenerate.
const MIN_QUAD_AREA: f32 = 1.0;

/// Four corners ordered clockwise from top-left in image space (y down):
/// `[TL, TR, BR, BL]`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Quad {
    pub corners: [(f32, f32); 4],
}

impl Quad {
    /// Order four arbitrary points into `[TL, TR, BR, BL]`.
    pub fn from_unordered(points: [(f32, f32); 4]) -> Self {
        Self { corners: order_corners(points) }
    }

    /// Axis-aligned quad covering the inclusive pixel box.
    pub fn from_bounds(min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> Self {
        let (x0, y0, x1, y1) = (min_x as f32, min_y as f32, max_x as f32, max_y as f32);
        Self { corners: [(x0, y0), (x1, y0), (x1, y1), (x0, y1)] }
    }

    pub fn area(&self) -> f32 {
        polygon_area(&self.corners)
    }

    pub fn is_convex(&self) -> bool {
        let c = &self.corners;
        let mut sign = 0.0f32;
        for i in 0..4 {
            let a = c[i];
            let b = c[(i + 1) % 4];
            let d = c[(i + 2) % 4];
            let cross = (b.0 - a.0) * (d.1 - b.1) - (b.1 - a.1) * (d.0 - b.0);
            if cross.abs() < 1e-6 {
                return false;
            }
            if sign == 0.0 {
                sign = cross.signum();
            } else if cross.signum() != sign {
                return false;
            }
        }
        true
    }
}

/// Estimate the destination quadrilateral for `mask`.
///
/// Returns `None` when the mask has no usable contour (empty, a single pixel,
/// or a zero-area sliver); callers then fall back to [`bounding_quad`].
pub fn estimate_quad(mask: &GrayImage, epsilon_ratio: f32) -> Option<Quad> {
    let contour = largest_outer_contour(mask)?;
    if contour.len() < 3 {
        return None;
    }

    let eps = (epsilon_ratio.max(0.0) * perimeter(&contour)).max(1.0);
    let simplified = simplify_closed(&contour, eps);
    if simplified.len() == 4 {
        let quad = Quad::from_unordered([simplified[0], simplified[1], simplified[2], simplified[3]]);
        if quad.is_convex() && quad.area() >= MIN_QUAD_AREA {
            return Some(quad);
        }
    }

    let rect = min_area_rect(&contour)?;
    let quad = Quad::from_unordered(rect);
    (quad.area() >= MIN_QUAD_AREA).then_some(quad)
}

/// Axis-aligned bounding-box quad, the fallback when no contour is usable.
pub fn bounding_quad(mask: &GrayImage) -> Option<Quad> {
    mask_bounds(mask).map(|(x0, y0, x1, y1)| Quad::from_bounds(x0, y0, x1, y1))
}

/// Points of the outer contour with the largest enclosed area.
pub fn largest_outer_contour(mask: &GrayImage) -> Option<Vec<(f32, f32)>> {
    let hard = binarize(mask, 128);
    let contours = find_contours::<i32>(&hard);
    contours
        .into_iter()
        .filter(|c| matches!(c.border_type, BorderType::Outer) && !c.points.is_empty())
        .map(|c| c.points.iter().map(|p| (p.x as f32, p.y as f32)).collect::<Vec<_>>())
        .max_by(|a, b| {
            polygon_area(a)
                .partial_cmp(&polygon_area(b))
                .unwrap_or(std::cmp::Ordering::Equal)
        })
}

/// Absolute shoelace area of a closed polygon.
pub fn polygon_area(points: &[(f32, f32)]) -> f32 {
    let n = points.len();
    if n < 3 {
        return 0.0;
    }
    let mut acc = 0.0f64;
    for i in 0..n {
        let (x0, y0) = points[i];
        let (x1, y1) = points[(i + 1) % n];
        acc += x0 as f64 * y1 as f64 - x1 as f64 * y0 as f64;
    }
    (acc.abs() * 0.5) as f32
}

/// Length of the closed polyline.
pub fn perimeter(points: &[(f32, f32)]) -> f32 {
    let n = points.len();
    if n < 2 {
        return 0.0;
    }
    (0..n)
        .map(|i| {
            let a = points[i];
            let b = points[(i + 1) % n];
            ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt()
        })
        .sum()
}

// ---------------------------------------------------------------------------
//  Douglas-Peucker
// ---------------------------------------------------------------------------

/// Distance from `p` to the line through `a` and `b` (to `a` when a == b).
fn line_distance(p: (f32, f32), a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = b.0 - a.0;
    let dy = b.1 - a.1;
    let len = (dx * dx + dy * dy).sqrt();
    if len < 1e-6 {
        return ((p.0 - a.0).powi(2) + (p.1 - a.1).powi(2)).sqrt();
    }
    ((p.0 - a.0) * dy - (p.1 - a.1) * dx).abs() / len
}

/// Simplify an open polyline; endpoints are always kept.
pub fn simplify_open(points: &[(f32, f32)], eps: f32) -> Vec<(f32, f32)> {
    let n = points.len();
    if n < 3 {
        return points.to_vec();
    }
    let mut keep = vec![false; n];
    keep[0] = true;
    keep[n - 1] = true;

    // Explicit stack instead of recursion: contours can have thousands of points
    let mut stack = vec![(0usize, n - 1)];
    while let Some((start, end)) = stack.pop() {
        if end <= start + 1 {
            continue;
        }
        let (mut dmax, mut index) = (0.0f32, start);
        for i in start + 1..end {
            let d = line_distance(points[i], points[start], points[end]);
            if d > dmax {
                dmax = d;
                index = i;
            }
        }
        if dmax > eps {
            keep[index] = true;
            stack.push((start, index));
            stack.push((index, end));
        }
    }
    points.iter().zip(keep).filter(|(_, k)| *k).map(|(p, _)| *p).collect()
}

/// Simplify a closed contour.  The ring is split at its first point and the
/// point farthest from it; both halves are simplified as open chains.
pub fn simplify_closed(points: &[(f32, f32)], eps: f32) -> Vec<(f32, f32)> {
    let n = points.len();
    if n < 4 {
        return points.to_vec();
    }
    let origin = points[0];
    let far = (1..n)
        .max_by(|&i, &j| {
            let di = (points[i].0 - origin.0).powi(2) + (points[i].1 - origin.1).powi(2);
            let dj = (points[j].0 - origin.0).powi(2) + (points[j].1 - origin.1).powi(2);
            di.partial_cmp(&dj).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(n / 2);

    let first = simplify_open(&points[..=far], eps);
    let mut second_chain: Vec<(f32, f32)> = points[far..].to_vec();
    second_chain.push(origin);
    let second = simplify_open(&second_chain, eps);

    let mut out = first;
    out.pop(); // `far` starts the second chain
    out.extend_from_slice(&second[..second.len() - 1]); // drop the repeated origin
    out
}

// ---------------------------------------------------------------------------
//  Minimum-area rectangle (rotating calipers over the convex hull)
// ---------------------------------------------------------------------------

/// Convex hull, counter-clockwise in a y-up frame (Andrew's monotone chain).
pub fn convex_hull(points: &[(f32, f32)]) -> Vec<(f32, f32)> {
    let mut pts = points.to_vec();
    pts.sort_by(|a, b| {
        a.0.partial_cmp(&b.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
    });
    pts.dedup();
    if pts.len() < 3 {
        return pts;
    }
    let cross = |o: (f32, f32), a: (f32, f32), b: (f32, f32)| {
        (a.0 - o.0) * (b.1 - o.1) - (a.1 - o.1) * (b.0 - o.0)
    };
    let mut hull: Vec<(f32, f32)> = Vec::with_capacity(pts.len() * 2);
    for &p in &pts {
        while hull.len() >= 2 && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    let lower_len = hull.len() + 1;
    for &p in pts.iter().rev().skip(1) {
        while hull.len() >= lower_len && cross(hull[hull.len() - 2], hull[hull.len() - 1], p) <= 0.0 {
            hull.pop();
        }
        hull.push(p);
    }
    hull.pop();
    hull
}

/// Corners of the minimum-area enclosing rectangle (unordered).
pub fn min_area_rect(points: &[(f32, f32)]) -> Option<[(f32, f32); 4]> {
    let hull = convex_hull(points);
    if hull.len() < 3 {
        return None;
    }
    let mut best: Option<(f32, [(f32, f32); 4])> = None;
    for i in 0..hull.len() {
        let a = hull[i];
        let b = hull[(i + 1) % hull.len()];
        let len = ((b.0 - a.0).powi(2) + (b.1 - a.1).powi(2)).sqrt();
        if len < 1e-6 {
            continue;
        }
        let u = ((b.0 - a.0) / len, (b.1 - a.1) / len);
        let v = (-u.1, u.0);
        let (mut min_u, mut max_u, mut min_v, mut max_v) = (f32::MAX, f32::MIN, f32::MAX, f32::MIN);
        for p in &hull {
            let pu = p.0 * u.0 + p.1 * u.1;
            let pv = p.0 * v.0 + p.1 * v.1;
            min_u = min_u.min(pu);
            max_u = max_u.max(pu);
            min_v = min_v.min(pv);
            max_v = max_v.max(pv);
        }
        let area = (max_u - min_u) * (max_v - min_v);
        if best.as_ref().is_none_or(|(a, _)| area < *a) {
            let corner = |su: f32, sv: f32| (u.0 * su + v.0 * sv, u.1 * su + v.1 * sv);
            best = Some((
                area,
                [corner(min_u, min_v), corner(max_u, min_v), corner(max_u, max_v), corner(min_u, max_v)],
            ));
        }
    }
    best.map(|(_, corners)| corners)
}

/// Order four points clockwise (in y-down image space) starting from the
/// corner closest to the top-left (smallest x + y).
pub fn order_corners(points: [(f32, f32); 4]) -> [(f32, f32); 4] {
    let cx = points.iter().map(|p| p.0).sum::<f32>() / 4.0;
    let cy = points.iter().map(|p| p.1).sum::<f32>() / 4.0;
    let mut sorted = points;
    // Ascending angle in a y-down frame sweeps clockwise on screen
    sorted.sort_by(|a, b| {
        let ta = (a.1 - cy).atan2(a.0 - cx);
        let tb = (b.1 - cy).atan2(b.0 - cx);
        ta.partial_cmp(&tb).unwrap_or(std::cmp::Ordering::Equal)
    });
    let start = (0..4)
        .min_by(|&i, &j| {
            let si = sorted[i].0 + sorted[i].1;
            let sj = sorted[j].0 + sorted[j].1;
            si.partial_cmp(&sj).unwrap_or(std::cmp::Ordering::Equal)
        })
        .unwrap_or(0);
    sorted.rotate_left(start);
    sorted
}

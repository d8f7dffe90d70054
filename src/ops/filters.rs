// ============================================================================
// MASK FILTERS — feathering blur and morphology on single-channel rasters
// ============================================================================

use image::GrayImage;
use rayon::prelude::*;

/// Number of box passes used to approximate a Gaussian when feathering.
pub const FEATHER_PASSES: usize = 2;

/// Feather a hard mask into a soft alpha ramp.
///
/// Runs `FEATHER_PASSES` separable box blurs of `radius`, which approximates
/// a Gaussian whose support is `radius * FEATHER_PASSES`.  A window that is
/// entirely 255 (or entirely 0) stays exactly 255 (or 0), so the interior of a
/// large mask keeps full strength and pixels far from it stay untouched.
pub fn feather(mask: &GrayImage, radius: u32) -> GrayImage {
    if radius == 0 {
        return mask.clone();
    }
    let mut out = mask.clone();
    for _ in 0..FEATHER_PASSES {
        out = box_blur(&out, radius);
    }
    out
}

/// Separable box blur with clamp-to-edge sampling.  Rows are processed in
/// parallel; the vertical pass runs on the transposed layout so both passes
/// are row-parallel.
pub fn box_blur(img: &GrayImage, radius: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 || radius == 0 {
        return img.clone();
    }
    // Horizontal pass, written transposed (h rows of length w → w rows of length h)
    let horiz = blur_rows_transposed(img.as_raw(), w as usize, h as usize, radius as usize);
    // Vertical pass on the transposed buffer, transposing back
    let vert = blur_rows_transposed(&horiz, h as usize, w as usize, radius as usize);
    GrayImage::from_raw(w, h, vert).unwrap_or_else(|| img.clone())
}

/// Sliding-window mean along each row of a `w × h` buffer; the result is
/// stored transposed as an `h × w` buffer (i.e. `w` rows of `h` entries).
fn blur_rows_transposed(src: &[u8], w: usize, h: usize, r: usize) -> Vec<u8> {
    let win = (2 * r + 1) as u32;
    let rows: Vec<Vec<u8>> = (0..h)
        .into_par_iter()
        .map(|y| {
            let row = &src[y * w..(y + 1) * w];
            let at = |x: isize| -> u32 { row[x.clamp(0, w as isize - 1) as usize] as u32 };
            let mut out = vec![0u8; w];
            // Prime the window [-r, r] around x = 0
            let mut sum: u32 = (-(r as isize)..=r as isize).map(|dx| at(dx)).sum();
            for (x, slot) in out.iter_mut().enumerate() {
                *slot = ((sum + win / 2) / win) as u8;
                let xi = x as isize;
                sum = sum + at(xi + r as isize + 1) - at(xi - r as isize);
            }
            out
        })
        .collect();

    let mut transposed = vec![0u8; w * h];
    for (y, row) in rows.iter().enumerate() {
        for (x, &v) in row.iter().enumerate() {
            transposed[x * h + y] = v;
        }
    }
    transposed
}

// ---------------------------------------------------------------------------
//  Morphology (square structuring element, clamp-to-edge)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy)]
enum Extremum {
    Min,
    Max,
}

fn rank_filter(mask: &GrayImage, radius: u32, op: Extremum) -> GrayImage {
    let (w, h) = mask.dimensions();
    if radius == 0 || w == 0 || h == 0 {
        return mask.clone();
    }
    let pick = |a: u8, b: u8| match op {
        Extremum::Min => a.min(b),
        Extremum::Max => a.max(b),
    };
    let r = radius as i64;
    let (wi, hi) = (w as i64, h as i64);
    let src = mask.as_raw();

    // Horizontal pass
    let mut tmp = vec![0u8; src.len()];
    tmp.par_chunks_mut(w as usize).enumerate().for_each(|(y, row)| {
        let base = y * w as usize;
        for x in 0..wi {
            let mut v = src[base + x as usize];
            for dx in -r..=r {
                let nx = (x + dx).clamp(0, wi - 1) as usize;
                v = pick(v, src[base + nx]);
            }
            row[x as usize] = v;
        }
    });

    // Vertical pass
    let mut out = vec![0u8; src.len()];
    out.par_chunks_mut(w as usize).enumerate().for_each(|(y, row)| {
        for x in 0..w as usize {
            let mut v = tmp[y * w as usize + x];
            for dy in -r..=r {
                let ny = (y as i64 + dy).clamp(0, hi - 1) as usize;
                v = pick(v, tmp[ny * w as usize + x]);
            }
            row[x] = v;
        }
    });
    GrayImage::from_raw(w, h, out).unwrap_or_else(|| mask.clone())
}

/// Erode with a `(2r+1)²` square: a pixel stays on only if its whole
/// neighbourhood is on.
pub fn erode(mask: &GrayImage, radius: u32) -> GrayImage {
    rank_filter(mask, radius, Extremum::Min)
}

/// Dilate with a `(2r+1)²` square.
pub fn dilate(mask: &GrayImage, radius: u32) -> GrayImage {
    rank_filter(mask, radius, Extremum::Max)
}

/// Morphological open (erode then dilate): removes specks smaller than the
/// structuring element.
pub fn open(mask: &GrayImage, radius: u32) -> GrayImage {
    dilate(&erode(mask, radius), radius)
}

/// Morphological close (dilate then erode): fills pinholes and notches
/// without moving the outer boundary.
pub fn close(mask: &GrayImage, radius: u32) -> GrayImage {
    erode(&dilate(mask, radius), radius)
}

/// Open-then-close with a `kernel × kernel` square (kernel is rounded up to
/// the next odd size).
pub fn smooth(mask: &GrayImage, kernel: u32) -> GrayImage {
    let radius = kernel / 2;
    close(&open(mask, radius), radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{fill_rect, mask_area};
    use image::Luma;

    #[test]
    fn feather_keeps_core_and_far_field() {
        let mut mask = GrayImage::new(200, 200);
        fill_rect(&mut mask, 50, 50, 149, 149);
        let soft = feather(&mask, 10);
        assert_eq!(soft.get_pixel(100, 100).0[0], 255);
        assert_eq!(soft.get_pixel(5, 5).0[0], 0);
        let edge = soft.get_pixel(50, 100).0[0];
        assert!(edge > 60 && edge < 200, "edge alpha {}", edge);
    }

    #[test]
    fn open_removes_specks_and_keeps_rectangles() {
        let mut mask = GrayImage::new(60, 60);
        fill_rect(&mut mask, 10, 10, 39, 39);
        mask.put_pixel(55, 55, Luma([255]));
        let opened = open(&mask, 2);
        assert_eq!(opened.get_pixel(55, 55).0[0], 0);
        assert_eq!(mask_area(&opened), 30 * 30);
    }

    #[test]
    fn close_fills_pinholes() {
        let mut mask = GrayImage::new(40, 40);
        fill_rect(&mut mask, 5, 5, 34, 34);
        mask.put_pixel(20, 20, Luma([0]));
        let closed = close(&mask, 2);
        assert_eq!(closed.get_pixel(20, 20).0[0], 255);
        assert_eq!(mask_area(&closed), 30 * 30);
    }

    #[test]
    fn border_touching_masks_survive_smoothing() {
        let mut mask = GrayImage::new(30, 30);
        fill_rect(&mut mask, 0, 0, 29, 14);
        let smoothed = smooth(&mask, 5);
        assert_eq!(smoothed.as_raw(), mask.as_raw());
    }
}

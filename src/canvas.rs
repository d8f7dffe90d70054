use std::fmt;
use std::sync::Arc;

use image::{GrayImage, Luma};
use serde::{Deserialize, Serialize};

/// Mask value for a fully selected pixel.
pub const MASK_ON: u8 = 255;

/// Mask value for an unselected pixel.
pub const MASK_OFF: u8 = 0;

// ============================================================================
// SELECTION SYSTEM
// ============================================================================

/// How a new tool shape interacts with the working raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SelectionMode {
    /// Clear the working raster, then set the new shape.
    Replace,
    /// Union – add to the existing mask.
    #[default]
    Add,
    /// Difference – subtract from the existing mask.
    Subtract,
}

impl SelectionMode {
    pub fn label(&self) -> &'static str {
        match self {
            SelectionMode::Replace  => "replace",
            SelectionMode::Add      => "add",
            SelectionMode::Subtract => "subtract",
        }
    }

    /// Merge a freshly rasterized shape mask into `target`.
    ///
    /// Shape pixels are treated as coverage values: `Add` keeps the maximum,
    /// `Subtract` removes the covered amount, `Replace` overwrites.
    pub fn merge_into(&self, target: &mut GrayImage, shape: &GrayImage) {
        debug_assert_eq!(target.dimensions(), shape.dimensions());
        let dst = target.as_mut();
        let src = shape.as_raw();
        match self {
            SelectionMode::Replace => dst.copy_from_slice(src),
            SelectionMode::Add => {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = (*d).max(s);
                }
            }
            SelectionMode::Subtract => {
                for (d, &s) in dst.iter_mut().zip(src) {
                    *d = d.saturating_sub(s);
                }
            }
        }
    }
}

/// Errors raised by the region mask store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaskError {
    /// A catalog index outside `0..len`.
    InvalidIndex { index: usize, len: usize },
    /// A raster whose size differs from the session image.
    DimensionMismatch { expected: (u32, u32), actual: (u32, u32) },
}

impl fmt::Display for MaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaskError::InvalidIndex { index, len } => {
                write!(f, "mask index {} out of range (catalog has {} masks)", index, len)
            }
            MaskError::DimensionMismatch { expected, actual } => write!(
                f,
                "mask is {}x{} but the image is {}x{}",
                actual.0, actual.1, expected.0, expected.1
            ),
        }
    }
}

impl std::error::Error for MaskError {}

// ============================================================================
// VIEW MAPPING – display space → image pixel space
// ============================================================================

/// Maps pointer coordinates measured on the displayed image back to the
/// natural pixel grid.  Points are relative to the displayed image's
/// top-left corner, so zoom and pan only change `displayed`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct ViewMapping {
    pub natural: (u32, u32),
    pub displayed: (f32, f32),
}

impl ViewMapping {
    /// Identity mapping: the image is shown at its natural size.
    pub fn identity(width: u32, height: u32) -> Self {
        Self { natural: (width, height), displayed: (width as f32, height as f32) }
    }

    pub fn new(natural: (u32, u32), displayed: (f32, f32)) -> Self {
        Self { natural, displayed }
    }

    /// Per-axis scale factors `natural / displayed`.
    pub fn factors(&self) -> (f32, f32) {
        let (dw, dh) = self.displayed;
        if !(dw > 0.0 && dh > 0.0 && dw.is_finite() && dh.is_finite()) {
            return (1.0, 1.0);
        }
        (self.natural.0 as f32 / dw, self.natural.1 as f32 / dh)
    }

    /// `imagePoint = devicePoint * (naturalSize / displayedSize)`
    pub fn to_image(&self, p: (f32, f32)) -> (f32, f32) {
        let (sx, sy) = self.factors();
        (p.0 * sx, p.1 * sy)
    }

    /// Mean axis scale, used for lengths such as a brush radius.
    pub fn scale(&self) -> f32 {
        let (sx, sy) = self.factors();
        (sx + sy) * 0.5
    }
}

// ============================================================================
// MASK HELPERS
// ============================================================================

/// Number of pixels with a non-zero mask value.
pub fn mask_area(mask: &GrayImage) -> usize {
    mask.as_raw().iter().filter(|&&v| v > 0).count()
}

/// Returns `true` when no pixel is selected.
pub fn mask_is_empty(mask: &GrayImage) -> bool {
    mask.as_raw().iter().all(|&v| v == 0)
}

/// Inclusive bounding box `(min_x, min_y, max_x, max_y)` of selected pixels.
pub fn mask_bounds(mask: &GrayImage) -> Option<(u32, u32, u32, u32)> {
    let (w, h) = mask.dimensions();
    let raw = mask.as_raw();
    let mut min_x = w;
    let mut min_y = h;
    let mut max_x = 0u32;
    let mut max_y = 0u32;
    let mut any = false;
    for y in 0..h {
        let row = &raw[(y * w) as usize..((y + 1) * w) as usize];
        for (x, &v) in row.iter().enumerate() {
            if v > 0 {
                let x = x as u32;
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
                any = true;
            }
        }
    }
    any.then_some((min_x, min_y, max_x, max_y))
}

/// Union of several masks (pixelwise maximum).
pub fn union_masks<'a>(width: u32, height: u32, masks: impl IntoIterator<Item = &'a GrayImage>) -> GrayImage {
    let mut out = GrayImage::new(width, height);
    for m in masks {
        SelectionMode::Add.merge_into(&mut out, m);
    }
    out
}

/// Threshold a soft mask into a hard 0/255 raster.
pub fn binarize(mask: &GrayImage, threshold: u8) -> GrayImage {
    let (w, h) = mask.dimensions();
    let mut out = GrayImage::new(w, h);
    for (dst, &src) in out.as_mut().iter_mut().zip(mask.as_raw()) {
        *dst = if src >= threshold { MASK_ON } else { MASK_OFF };
    }
    out
}

// ============================================================================
// REGION MASK STORE
// ============================================================================

/// Per-session mask catalog plus the ad-hoc custom raster.
///
/// Catalog masks come from the segmentation collaborator and are read-only
/// for the lifetime of the session; they are shared behind an `Arc` so
/// snapshots taken for background compositing cost a reference bump.
#[derive(Clone, Debug)]
pub struct MaskStore {
    width: u32,
    height: u32,
    catalog: Arc<Vec<GrayImage>>,
    custom: Option<GrayImage>,
}

impl MaskStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height, catalog: Arc::new(Vec::new()), custom: None }
    }

    /// Install the catalog produced by the segmentation collaborator.
    /// Every mask must match the image size.
    pub fn load_catalog(&mut self, masks: Vec<GrayImage>) -> Result<(), MaskError> {
        for m in &masks {
            self.check_dims(m)?;
        }
        self.catalog = Arc::new(masks);
        Ok(())
    }

    pub fn width(&self) -> u32 { self.width }

    pub fn height(&self) -> u32 { self.height }

    pub fn len(&self) -> usize {
        self.catalog.len()
    }

    pub fn is_empty(&self) -> bool {
        self.catalog.is_empty()
    }

    pub fn get_mask(&self, index: usize) -> Result<&GrayImage, MaskError> {
        self.catalog
            .get(index)
            .ok_or(MaskError::InvalidIndex { index, len: self.catalog.len() })
    }

    /// Shared handle to the whole catalog.
    pub fn catalog(&self) -> Arc<Vec<GrayImage>> {
        Arc::clone(&self.catalog)
    }

    pub fn set_custom_mask(&mut self, mask: GrayImage) -> Result<(), MaskError> {
        self.check_dims(&mask)?;
        self.custom = Some(mask);
        Ok(())
    }

    pub fn clear_custom_mask(&mut self) {
        self.custom = None;
    }

    pub fn custom_mask(&self) -> Option<&GrayImage> {
        self.custom.as_ref()
    }

    /// Mutable working raster, created empty on first use.
    pub fn custom_mask_mut(&mut self) -> &mut GrayImage {
        let (w, h) = (self.width, self.height);
        self.custom.get_or_insert_with(|| GrayImage::new(w, h))
    }

    /// Union of the given catalog masks.
    pub fn union_of(&self, indices: &[usize]) -> Result<GrayImage, MaskError> {
        let mut out = GrayImage::new(self.width, self.height);
        for &i in indices {
            SelectionMode::Add.merge_into(&mut out, self.get_mask(i)?);
        }
        Ok(out)
    }

    fn check_dims(&self, mask: &GrayImage) -> Result<(), MaskError> {
        if mask.dimensions() != (self.width, self.height) {
            return Err(MaskError::DimensionMismatch {
                expected: (self.width, self.height),
                actual: mask.dimensions(),
            });
        }
        Ok(())
    }
}

/// Write a filled axis-aligned rectangle (inclusive bounds) into a mask.
pub fn fill_rect(mask: &mut GrayImage, min_x: u32, min_y: u32, max_x: u32, max_y: u32) {
    let max_x = max_x.min(mask.width().saturating_sub(1));
    let max_y = max_y.min(mask.height().saturating_sub(1));
    for y in min_y..=max_y {
        for x in min_x..=max_x {
            mask.put_pixel(x, y, Luma([MASK_ON]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_mapping_scales_each_axis() {
        let view = ViewMapping::new((800, 600), (400.0, 200.0));
        assert_eq!(view.to_image((100.0, 100.0)), (200.0, 300.0));
        assert!((view.scale() - 2.5).abs() < 1e-6);
    }

    #[test]
    fn degenerate_display_size_is_identity() {
        let view = ViewMapping::new((800, 600), (0.0, 600.0));
        assert_eq!(view.to_image((10.0, 20.0)), (10.0, 20.0));
    }

    #[test]
    fn store_rejects_unknown_index() {
        let mut store = MaskStore::new(4, 4);
        store.load_catalog(vec![GrayImage::new(4, 4)]).unwrap();
        assert!(store.get_mask(0).is_ok());
        assert_eq!(store.get_mask(3).unwrap_err(), MaskError::InvalidIndex { index: 3, len: 1 });
    }

    #[test]
    fn store_rejects_wrong_size_masks() {
        let mut store = MaskStore::new(4, 4);
        let err = store.load_catalog(vec![GrayImage::new(5, 4)]).unwrap_err();
        assert!(matches!(err, MaskError::DimensionMismatch { .. }));
        assert!(store.set_custom_mask(GrayImage::new(2, 2)).is_err());
    }

    #[test]
    fn subtract_is_saturating() {
        let mut a = GrayImage::from_pixel(2, 1, Luma([200]));
        let b = GrayImage::from_pixel(2, 1, Luma([255]));
        SelectionMode::Subtract.merge_into(&mut a, &b);
        assert!(mask_is_empty(&a));
    }

    #[test]
    fn bounds_cover_selected_pixels() {
        let mut m = GrayImage::new(10, 10);
        fill_rect(&mut m, 2, 3, 5, 7);
        assert_eq!(mask_bounds(&m), Some((2, 3, 5, 7)));
        assert_eq!(mask_area(&m), 4 * 5);
        assert_eq!(mask_bounds(&GrayImage::new(3, 3)), None);
    }
}

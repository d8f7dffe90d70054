// ============================================================================
// AI OPERATIONS — segmentation collaborator interface and mask decoding
// ============================================================================
//
// The segmentation model itself lives outside this crate.  A session receives
// an already-constructed `SharedSegmenter` handle (loaded once, shared
// read-only across sessions) and only ever calls `analyze`.  Masks arrive as
// length-prefixed encoded rasters; metadata is carried for display only.

use std::io::Cursor;
use std::path::Path;
use std::sync::Arc;

use image::codecs::png::PngEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageEncoder, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::binarize;

/// Default cut-off when turning soft model output into a binary mask.
pub const DEFAULT_MASK_THRESHOLD: u8 = 128;

/// Errors reported by a segmentation backend or while decoding its output.
#[derive(Debug)]
pub enum SegmentError {
    /// An embedded raster could not be decoded.
    Decode(String),
    /// The stream ended inside a length prefix or payload.
    Truncated,
    /// The backend itself failed.
    Backend(String),
}

impl std::fmt::Display for SegmentError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SegmentError::Decode(e) => write!(f, "Failed to decode mask: {}", e),
            SegmentError::Truncated => write!(f, "Mask stream is truncated"),
            SegmentError::Backend(e) => write!(f, "Segmentation backend failed: {}", e),
        }
    }
}

impl std::error::Error for SegmentError {}

impl From<image::ImageError> for SegmentError {
    fn from(e: image::ImageError) -> Self {
        SegmentError::Decode(e.to_string())
    }
}

/// Display-only information attached to each mask.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MaskMetadata {
    pub label: String,
    pub confidence: f32,
}

/// What `analyze` hands back: one raster per detected surface, in catalog
/// order, plus matching metadata.
#[derive(Clone, Debug, Default)]
pub struct SegmentationOutput {
    pub masks: Vec<GrayImage>,
    pub metadata: Vec<MaskMetadata>,
}

/// The external segmentation collaborator.
pub trait Segmenter: Send + Sync {
    fn analyze(&self, image: &RgbaImage) -> Result<SegmentationOutput, SegmentError>;
}

/// Handle injected into sessions.
pub type SharedSegmenter = Arc<dyn Segmenter>;

// ---------------------------------------------------------------------------
//  Mask stream codec
// ---------------------------------------------------------------------------

/// Extract a single-channel mask from a decoded raster: alpha when the
/// format carries one, luma otherwise.
pub fn mask_channel(img: DynamicImage) -> GrayImage {
    if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let (w, h) = rgba.dimensions();
        let alpha: Vec<u8> = rgba.pixels().map(|p| p.0[3]).collect();
        GrayImage::from_raw(w, h, alpha).unwrap_or_else(|| GrayImage::new(w, h))
    } else {
        img.to_luma8()
    }
}

/// Parse a stream of `u32` little-endian length prefixes, each followed by
/// that many bytes of an encoded raster (PNG in practice).
pub fn decode_mask_stream(bytes: &[u8]) -> Result<Vec<GrayImage>, SegmentError> {
    let mut masks = Vec::new();
    let mut pos = 0usize;
    while pos < bytes.len() {
        let prefix = bytes.get(pos..pos + 4).ok_or(SegmentError::Truncated)?;
        let len = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;
        pos += 4;
        let payload = bytes.get(pos..pos + len).ok_or(SegmentError::Truncated)?;
        pos += len;
        masks.push(mask_channel(image::load_from_memory(payload)?));
    }
    Ok(masks)
}

/// Inverse of [`decode_mask_stream`]: PNG-encode each mask behind its length.
pub fn encode_mask_stream(masks: &[GrayImage]) -> Result<Vec<u8>, SegmentError> {
    let mut out = Vec::new();
    for mask in masks {
        let mut png = Cursor::new(Vec::new());
        PngEncoder::new(&mut png)
            .write_image(mask.as_raw(), mask.width(), mask.height(), image::ColorType::L8)
            .map_err(|e| SegmentError::Decode(e.to_string()))?;
        let png = png.into_inner();
        out.extend_from_slice(&(png.len() as u32).to_le_bytes());
        out.extend_from_slice(&png);
    }
    Ok(out)
}

/// Bring a model mask to image resolution and make it strictly 0/255.
pub fn normalize_mask(mask: &GrayImage, width: u32, height: u32, threshold: u8) -> GrayImage {
    if mask.dimensions() == (width, height) {
        return binarize(mask, threshold);
    }
    let resized = image::imageops::resize(mask, width, height, FilterType::Triangle);
    binarize(&resized, threshold)
}

// ---------------------------------------------------------------------------
//  Precomputed backend
// ---------------------------------------------------------------------------

/// Serves masks produced ahead of time (mask files on disk or a captured
/// model response).  Used by the CLI and by tests.
#[derive(Clone, Debug)]
pub struct PrecomputedSegmenter {
    masks: Vec<GrayImage>,
    metadata: Vec<MaskMetadata>,
    threshold: u8,
}

impl PrecomputedSegmenter {
    pub fn new(masks: Vec<GrayImage>) -> Self {
        Self { masks, metadata: Vec::new(), threshold: DEFAULT_MASK_THRESHOLD }
    }

    pub fn with_metadata(mut self, metadata: Vec<MaskMetadata>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn from_stream(bytes: &[u8]) -> Result<Self, SegmentError> {
        Ok(Self::new(decode_mask_stream(bytes)?))
    }

    /// Load one mask per file, in the given order.
    pub fn from_files<P: AsRef<Path>>(paths: &[P]) -> Result<Self, SegmentError> {
        let mut masks = Vec::with_capacity(paths.len());
        let mut metadata = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let img = image::open(path)?;
            masks.push(mask_channel(img));
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("surface {}", masks.len() - 1));
            metadata.push(MaskMetadata { label, confidence: 1.0 });
        }
        Ok(Self { masks, metadata, threshold: DEFAULT_MASK_THRESHOLD })
    }

    pub fn len(&self) -> usize {
        self.masks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.masks.is_empty()
    }
}

impl Segmenter for PrecomputedSegmenter {
    fn analyze(&self, image: &RgbaImage) -> Result<SegmentationOutput, SegmentError> {
        let (w, h) = image.dimensions();
        let masks = self.masks.iter().map(|m| normalize_mask(m, w, h, self.threshold)).collect();
        let metadata = (0..self.masks.len())
            .map(|i| {
                self.metadata.get(i).cloned().unwrap_or_else(|| MaskMetadata {
                    label: format!("surface {}", i),
                    confidence: 1.0,
                })
            })
            .collect();
        Ok(SegmentationOutput { masks, metadata })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{fill_rect, mask_area};
    use image::{Luma, Rgba};

    fn rect(w: u32, h: u32, r: (u32, u32, u32, u32)) -> GrayImage {
        let mut m = GrayImage::new(w, h);
        fill_rect(&mut m, r.0, r.1, r.2, r.3);
        m
    }

    #[test]
    fn stream_decodes_every_mask_in_order() {
        let a = rect(16, 8, (0, 0, 3, 3));
        let b = rect(16, 8, (8, 0, 15, 7));
        let bytes = encode_mask_stream(&[a.clone(), b.clone()]).unwrap();
        let masks = decode_mask_stream(&bytes).unwrap();
        assert_eq!(masks.len(), 2);
        assert_eq!(masks[0].as_raw(), a.as_raw());
        assert_eq!(masks[1].as_raw(), b.as_raw());
    }

    #[test]
    fn truncated_stream_is_reported() {
        let bytes = encode_mask_stream(&[rect(4, 4, (0, 0, 1, 1))]).unwrap();
        assert!(matches!(decode_mask_stream(&bytes[..bytes.len() - 3]), Err(SegmentError::Truncated)));
        assert!(matches!(decode_mask_stream(&[1, 0]), Err(SegmentError::Truncated)));
    }

    #[test]
    fn garbage_payload_is_a_decode_error() {
        let mut bytes = 4u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"nope");
        assert!(matches!(decode_mask_stream(&bytes), Err(SegmentError::Decode(_))));
    }

    #[test]
    fn alpha_channel_wins_over_luma() {
        let rgba = RgbaImage::from_fn(4, 1, |x, _| Rgba([255, 255, 255, if x < 2 { 255 } else { 0 }]));
        let mask = mask_channel(DynamicImage::ImageRgba8(rgba));
        assert_eq!(mask.as_raw(), &vec![255, 255, 0, 0]);
    }

    #[test]
    fn low_resolution_masks_are_upscaled_and_binarized() {
        let mut small = GrayImage::new(10, 10);
        small.put_pixel(0, 0, Luma([40]));
        fill_rect(&mut small, 5, 0, 9, 9);
        let full = normalize_mask(&small, 100, 100, DEFAULT_MASK_THRESHOLD);
        assert_eq!(full.dimensions(), (100, 100));
        assert!(full.as_raw().iter().all(|&v| v == 0 || v == 255));
        assert_eq!(full.get_pixel(2, 2).0[0], 0);
        assert_eq!(full.get_pixel(80, 50).0[0], 255);
    }

    #[test]
    fn precomputed_backend_matches_image_size() {
        let seg = PrecomputedSegmenter::new(vec![rect(20, 20, (0, 0, 9, 19))]);
        let out = seg.analyze(&RgbaImage::new(40, 40)).unwrap();
        assert_eq!(out.masks[0].dimensions(), (40, 40));
        assert_eq!(out.metadata[0].label, "surface 0");
        let area = mask_area(&out.masks[0]);
        assert!((760..=840).contains(&area), "area {}", area);
    }
}

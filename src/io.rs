use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

use image::codecs::bmp::BmpEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::{DynamicImage, GrayImage, ImageEncoder, ImageError, RgbaImage};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::components::selector::Selection;
use crate::ops::ai::mask_channel;

/// Maximum supported image dimension in pixels (per axis).
/// Prevents memory exhaustion from crafted inputs.
const MAX_IMAGE_DIM: u32 = 32_768;

// ============================================================================
// ERRORS
// ============================================================================

/// Error type for image / texture decoding and result encoding.
#[derive(Debug)]
pub enum TextureError {
    /// The bytes are not a decodable raster (or decode to nothing).
    Unsupported(String),
    Io(std::io::Error),
    Encode(String),
}

impl std::fmt::Display for TextureError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TextureError::Unsupported(e) => write!(f, "Unsupported image format: {}", e),
            TextureError::Io(e) => write!(f, "I/O error: {}", e),
            TextureError::Encode(e) => write!(f, "Encode error: {}", e),
        }
    }
}

impl std::error::Error for TextureError {}

impl From<std::io::Error> for TextureError {
    fn from(e: std::io::Error) -> Self {
        TextureError::Io(e)
    }
}

impl From<ImageError> for TextureError {
    fn from(e: ImageError) -> Self {
        match e {
            ImageError::IoError(io) => TextureError::Io(io),
            ImageError::Encoding(enc) => TextureError::Encode(enc.to_string()),
            other => TextureError::Unsupported(other.to_string()),
        }
    }
}

// ============================================================================
// DECODING
// ============================================================================

fn checked(img: DynamicImage) -> Result<RgbaImage, TextureError> {
    let (w, h) = (img.width(), img.height());
    if w == 0 || h == 0 {
        return Err(TextureError::Unsupported("image has no pixels".into()));
    }
    if w > MAX_IMAGE_DIM || h > MAX_IMAGE_DIM {
        return Err(TextureError::Unsupported(format!(
            "{}x{} exceeds the {} px limit",
            w, h, MAX_IMAGE_DIM
        )));
    }
    Ok(img.to_rgba8())
}

/// Load the room photo.
pub fn load_image(path: &Path) -> Result<RgbaImage, TextureError> {
    let img = image::open(path)?;
    checked(img)
}

/// Decode a material texture from encoded bytes.
pub fn decode_texture(bytes: &[u8]) -> Result<RgbaImage, TextureError> {
    checked(image::load_from_memory(bytes)?)
}

/// Decode a material texture from a file.
pub fn decode_texture_file(path: &Path) -> Result<RgbaImage, TextureError> {
    let bytes = std::fs::read(path)?;
    decode_texture(&bytes)
}

/// Load a grayscale mask (alpha when present, luma otherwise).
pub fn load_mask(path: &Path) -> Result<GrayImage, TextureError> {
    Ok(mask_channel(image::open(path)?))
}

// ============================================================================
// ENCODING
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum SaveFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Bmp,
}

impl SaveFormat {
    /// Infer the format from a path's extension.
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "png" => Some(SaveFormat::Png),
            "jpg" | "jpeg" => Some(SaveFormat::Jpeg),
            "webp" => Some(SaveFormat::Webp),
            "bmp" => Some(SaveFormat::Bmp),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            SaveFormat::Png => "png",
            SaveFormat::Jpeg => "jpg",
            SaveFormat::Webp => "webp",
            SaveFormat::Bmp => "bmp",
        }
    }
}

/// Encode and write an image to a file.
/// Standalone so it can be called from background threads via `rayon::spawn`.
pub fn encode_and_write(image: &RgbaImage, path: &Path, format: SaveFormat, quality: u8) -> Result<(), TextureError> {
    if format == SaveFormat::Webp {
        DynamicImage::ImageRgba8(image.clone()).save(path)?;
        return Ok(());
    }

    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    match format {
        SaveFormat::Png => {
            PngEncoder::new(&mut writer).write_image(
                image.as_raw(),
                image.width(),
                image.height(),
                image::ColorType::Rgba8,
            )?;
        }
        SaveFormat::Jpeg => {
            let rgb_image = DynamicImage::ImageRgba8(image.clone()).to_rgb8();
            let mut encoder = JpegEncoder::new_with_quality(&mut writer, quality);
            encoder.encode(
                rgb_image.as_raw(),
                rgb_image.width(),
                rgb_image.height(),
                image::ColorType::Rgb8,
            )?;
        }
        SaveFormat::Bmp => {
            let mut encoder = BmpEncoder::new(&mut writer);
            encoder.encode(image.as_raw(), image.width(), image.height(), image::ColorType::Rgba8)?;
        }
        SaveFormat::Webp => {}
    }
    Ok(())
}

// ============================================================================
// SESSION SNAPSHOT
// ============================================================================

/// Magic header for the session snapshot format.
const SNAPSHOT_MAGIC: &str = "RVS1";

/// Session-scoped editing state.  The image and mask catalog are referenced,
/// not embedded: they belong to the surrounding catalog collaborator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    magic: String,
    pub session_id: Uuid,
    pub image_ref: String,
    pub selection: Selection,
    /// Raw `width × height` bytes of the custom raster, if any.
    pub custom_mask: Option<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub has_result: bool,
}

impl SessionSnapshot {
    pub fn new(
        session_id: Uuid,
        image_ref: String,
        selection: Selection,
        custom_mask: Option<&GrayImage>,
        has_result: bool,
        dims: (u32, u32),
    ) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC.to_string(),
            session_id,
            image_ref,
            selection,
            custom_mask: custom_mask.map(|m| m.as_raw().clone()),
            width: dims.0,
            height: dims.1,
            has_result,
        }
    }

    /// Rebuild the custom raster.
    pub fn custom_mask_image(&self) -> Option<GrayImage> {
        let raw = self.custom_mask.clone()?;
        GrayImage::from_raw(self.width, self.height, raw)
    }
}

/// Error type for snapshot files.
#[derive(Debug)]
pub enum SnapshotError {
    Io(std::io::Error),
    Serialize(String),
    InvalidFormat(String),
}

impl std::fmt::Display for SnapshotError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SnapshotError::Io(e) => write!(f, "I/O error: {}", e),
            SnapshotError::Serialize(e) => write!(f, "Serialization error: {}", e),
            SnapshotError::InvalidFormat(e) => write!(f, "Invalid format: {}", e),
        }
    }
}

impl std::error::Error for SnapshotError {}

impl From<std::io::Error> for SnapshotError {
    fn from(e: std::io::Error) -> Self {
        SnapshotError::Io(e)
    }
}

impl From<Box<bincode::ErrorKind>> for SnapshotError {
    fn from(e: Box<bincode::ErrorKind>) -> Self {
        SnapshotError::Serialize(e.to_string())
    }
}

pub fn snapshot_to_bytes(snapshot: &SessionSnapshot) -> Result<Vec<u8>, SnapshotError> {
    Ok(bincode::serialize(snapshot)?)
}

pub fn snapshot_from_bytes(raw: &[u8]) -> Result<SessionSnapshot, SnapshotError> {
    if raw.len() < 12 {
        return Err(SnapshotError::InvalidFormat("File too small".into()));
    }
    // bincode encodes a String as an 8-byte length prefix + UTF-8 data, so
    // bytes 8..12 hold the 4-char magic.
    let magic = std::str::from_utf8(&raw[8..12]).unwrap_or("");
    if magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::InvalidFormat(format!("Unknown magic '{}'", magic)));
    }
    let snapshot: SessionSnapshot = bincode::deserialize(raw)?;
    if snapshot.width > MAX_IMAGE_DIM || snapshot.height > MAX_IMAGE_DIM {
        return Err(SnapshotError::InvalidFormat("dimensions out of range".into()));
    }
    if let Some(raw_mask) = &snapshot.custom_mask {
        let expected = snapshot.width as usize * snapshot.height as usize;
        if raw_mask.len() != expected {
            return Err(SnapshotError::InvalidFormat(format!(
                "custom mask has {} bytes, expected {}",
                raw_mask.len(),
                expected
            )));
        }
    }
    Ok(snapshot)
}

/// Serialize + write a snapshot.  Safe to call on a background thread.
pub fn save_snapshot(snapshot: &SessionSnapshot, path: &Path) -> Result<(), SnapshotError> {
    let file = File::create(path)?;
    let writer = BufWriter::new(file);
    bincode::serialize_into(writer, snapshot)?;
    Ok(())
}

pub fn load_snapshot(path: &Path) -> Result<SessionSnapshot, SnapshotError> {
    let raw = std::fs::read(path)?;
    snapshot_from_bytes(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn garbage_texture_is_unsupported() {
        assert!(matches!(decode_texture(b"definitely not a png"), Err(TextureError::Unsupported(_))));
    }

    #[test]
    fn encoded_texture_decodes() {
        let img = RgbaImage::from_pixel(3, 2, image::Rgba([10, 20, 30, 255]));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgba8(img.clone())
            .write_to(&mut buf, image::ImageOutputFormat::Png)
            .unwrap();
        assert_eq!(decode_texture(buf.get_ref()).unwrap().as_raw(), img.as_raw());
    }

    #[test]
    fn save_format_from_extension() {
        assert_eq!(SaveFormat::from_path(Path::new("out.JPG")), Some(SaveFormat::Jpeg));
        assert_eq!(SaveFormat::from_path(Path::new("out.png")), Some(SaveFormat::Png));
        assert_eq!(SaveFormat::from_path(Path::new("out.tiff")), None);
    }

    #[test]
    fn snapshot_checks_magic_and_mask_size() {
        let mut mask = GrayImage::new(4, 3);
        mask.put_pixel(1, 1, image::Luma([255]));
        let snap = SessionSnapshot::new(
            Uuid::new_v4(),
            "room.jpg".into(),
            Selection::Custom,
            Some(&mask),
            false,
            (4, 3),
        );
        let bytes = snapshot_to_bytes(&snap).unwrap();
        let back = snapshot_from_bytes(&bytes).unwrap();
        assert_eq!(back, snap);
        assert_eq!(back.custom_mask_image().unwrap().as_raw(), mask.as_raw());

        let mut corrupt = bytes.clone();
        corrupt[8] = b'X';
        assert!(matches!(snapshot_from_bytes(&corrupt), Err(SnapshotError::InvalidFormat(_))));
        assert!(matches!(snapshot_from_bytes(&bytes[..6]), Err(SnapshotError::InvalidFormat(_))));
    }
}

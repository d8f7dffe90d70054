use image::{GrayImage, Rgba, RgbaImage};
use roomvis::canvas::fill_rect;

/// Flat single-colour room photo.
pub fn flat_room(width: u32, height: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba(color))
}

/// Two vertical colour bands split at `split`.
pub fn two_tone(width: u32, height: u32, split: u32, left: [u8; 4], right: [u8; 4]) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, _| if x < split { Rgba(left) } else { Rgba(right) })
}

/// Mask with one filled rectangle, inclusive bounds.
pub fn rect_mask(width: u32, height: u32, min_x: u32, min_y: u32, max_x: u32, max_y: u32) -> GrayImage {
    let mut m = GrayImage::new(width, height);
    fill_rect(&mut m, min_x, min_y, max_x, max_y);
    m
}

/// Solid colour texture.
pub fn solid_texture(size: u32, color: [u8; 4]) -> RgbaImage {
    RgbaImage::from_pixel(size, size, Rgba(color))
}

/// Unique scratch path under the system temp dir.
pub fn scratch_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("roomvis-{}-{}", uuid::Uuid::new_v4(), name))
}

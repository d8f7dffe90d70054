use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::RgbaImage;

use crate::components::tools::{ToolLimits, DEFAULT_BRUSH_RADIUS, MAX_BRUSH_RADIUS, MIN_BRUSH_RADIUS};
use crate::io::{decode_texture, decode_texture_file, TextureError};
use crate::ops::ai::DEFAULT_MASK_THRESHOLD;
use crate::ops::composite::{CompositeOptions, DEFAULT_FEATHER_RADIUS, DEFAULT_OPACITY};
use crate::ops::magic_wand::DEFAULT_TOLERANCE;
use crate::ops::perspective::DEFAULT_EPSILON_RATIO;
use crate::ops::refine::{LocalRefiner, DEFAULT_MORPH_KERNEL, DEFAULT_REFINE_RADIUS};
use crate::ops::transform::PlacementMode;

// ============================================================================
// ENGINE SETTINGS
// ============================================================================

/// Tunables for the editing and compositing engine, persisted as a plain
/// `key=value` file.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineSettings {
    pub brush_radius: f32,
    pub min_brush_radius: f32,
    pub max_brush_radius: f32,
    pub wand_tolerance: f32,
    pub refine_radius: f32,
    pub morph_kernel: u32,
    pub feather_radius: u32,
    pub opacity: f32,
    pub dp_epsilon_ratio: f32,
    pub mask_threshold: u8,
    pub perspective: bool,
    pub placement: PlacementMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            brush_radius: DEFAULT_BRUSH_RADIUS,
            min_brush_radius: MIN_BRUSH_RADIUS,
            max_brush_radius: MAX_BRUSH_RADIUS,
            wand_tolerance: DEFAULT_TOLERANCE,
            refine_radius: DEFAULT_REFINE_RADIUS,
            morph_kernel: DEFAULT_MORPH_KERNEL,
            feather_radius: DEFAULT_FEATHER_RADIUS,
            opacity: DEFAULT_OPACITY,
            dp_epsilon_ratio: DEFAULT_EPSILON_RATIO,
            mask_threshold: DEFAULT_MASK_THRESHOLD,
            perspective: true,
            placement: PlacementMode::Tile,
        }
    }
}

impl EngineSettings {
    /// Path to the settings file.
    /// On Linux:   ~/.config/roomvis/roomvis_settings.cfg  (XDG_CONFIG_HOME respected)
    /// On Windows: %APPDATA%\RoomVis\roomvis_settings.cfg
    /// On macOS:   ~/Library/Application Support/RoomVis/roomvis_settings.cfg
    /// Fallback:   same directory as the executable.
    pub fn settings_path() -> Option<PathBuf> {
        #[cfg(target_os = "linux")]
        {
            let config_dir = std::env::var("XDG_CONFIG_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|_| {
                    let home = std::env::var("HOME").unwrap_or_else(|_| "~".to_string());
                    PathBuf::from(home).join(".config")
                })
                .join("roomvis");
            return Some(config_dir.join("roomvis_settings.cfg"));
        }
        #[cfg(any(target_os = "windows", target_os = "macos"))]
        {
            return Some(crate::logger::data_dir().join(crate::logger::APP_DIR).join("roomvis_settings.cfg"));
        }
        #[cfg(not(any(target_os = "linux", target_os = "windows", target_os = "macos")))]
        {
            std::env::current_exe().ok().and_then(|p| p.parent().map(|d| d.join("roomvis_settings.cfg")))
        }
    }

    /// Serialize to the `key=value` format.
    pub fn to_config_string(&self) -> String {
        format!(
            "brush_radius={}\n\
             min_brush_radius={}\n\
             max_brush_radius={}\n\
             wand_tolerance={}\n\
             refine_radius={}\n\
             morph_kernel={}\n\
             feather_radius={}\n\
             opacity={}\n\
             dp_epsilon_ratio={}\n\
             mask_threshold={}\n\
             perspective={}\n\
             placement={}\n",
            self.brush_radius,
            self.min_brush_radius,
            self.max_brush_radius,
            self.wand_tolerance,
            self.refine_radius,
            self.morph_kernel,
            self.feather_radius,
            self.opacity,
            self.dp_epsilon_ratio,
            self.mask_threshold,
            self.perspective,
            self.placement.label(),
        )
    }

    /// Parse the `key=value` format.  Unknown keys are ignored and values that
    /// fail to parse keep their defaults.
    pub fn parse(content: &str) -> Self {
        let d = Self::default();
        let mut s = Self::default();
        for line in content.lines() {
            let line = line.trim();
            if line.starts_with('#') {
                continue;
            }
            let Some((key, val)) = line.split_once('=') else { continue };
            let key = key.trim();
            let val = val.trim();
            match key {
                "brush_radius" => s.brush_radius = val.parse().unwrap_or(d.brush_radius),
                "min_brush_radius" => s.min_brush_radius = val.parse().unwrap_or(d.min_brush_radius),
                "max_brush_radius" => s.max_brush_radius = val.parse().unwrap_or(d.max_brush_radius),
                "wand_tolerance" => s.wand_tolerance = val.parse().unwrap_or(d.wand_tolerance),
                "refine_radius" => s.refine_radius = val.parse().unwrap_or(d.refine_radius),
                "morph_kernel" => s.morph_kernel = val.parse().unwrap_or(d.morph_kernel),
                "feather_radius" => s.feather_radius = val.parse().unwrap_or(d.feather_radius),
                "opacity" => s.opacity = val.parse().unwrap_or(d.opacity),
                "dp_epsilon_ratio" => s.dp_epsilon_ratio = val.parse().unwrap_or(d.dp_epsilon_ratio),
                "mask_threshold" => s.mask_threshold = val.parse().unwrap_or(d.mask_threshold),
                "perspective" => s.perspective = val == "true",
                "placement" => s.placement = PlacementMode::from_label(val).unwrap_or(d.placement),
                _ => {}
            }
        }
        if s.min_brush_radius > s.max_brush_radius {
            s.min_brush_radius = d.min_brush_radius;
            s.max_brush_radius = d.max_brush_radius;
        }
        s.opacity = s.opacity.clamp(0.0, 1.0);
        s
    }

    /// Save settings to disk
    pub fn save(&self) {
        let Some(path) = Self::settings_path() else { return };
        if let Err(e) = self.save_to(&path) {
            crate::log_warn!("Settings: could not write {}: {}", path.display(), e);
        }
    }

    pub fn save_to(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_config_string())
    }

    /// Load settings from disk (returns default if file missing or corrupt)
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else { return Self::default() };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(content) => Self::parse(&content),
            Err(_) => Self::default(),
        }
    }

    pub fn composite_options(&self) -> CompositeOptions {
        CompositeOptions {
            opacity: self.opacity,
            feather_radius: self.feather_radius,
            perspective: self.perspective,
            placement: self.placement,
            epsilon_ratio: self.dp_epsilon_ratio,
        }
    }

    pub fn tool_limits(&self) -> ToolLimits {
        ToolLimits { min_radius: self.min_brush_radius, max_radius: self.max_brush_radius }
    }

    pub fn refiner(&self) -> LocalRefiner {
        LocalRefiner::new(self.refine_radius, self.morph_kernel)
    }
}

// ============================================================================
// MATERIAL LIBRARY
// ============================================================================

/// File extensions picked up by [`MaterialLibrary::load_dir`].
pub const MATERIAL_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp"];

/// A material: identifier plus decoded source pixels.
#[derive(Clone, Debug)]
pub struct TextureRef {
    pub id: String,
    pub pixels: Arc<RgbaImage>,
}

impl TextureRef {
    pub fn new(id: impl Into<String>, pixels: RgbaImage) -> Self {
        Self { id: id.into(), pixels: Arc::new(pixels) }
    }

    /// Decode an encoded material (PNG, JPEG, ...).
    pub fn decode(id: impl Into<String>, bytes: &[u8]) -> Result<Self, TextureError> {
        Ok(Self::new(id, decode_texture(bytes)?))
    }

    /// Decode a material file; the id is the file stem.
    pub fn from_file(path: &Path) -> Result<Self, TextureError> {
        let pixels = decode_texture_file(path)?;
        let id = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(id, pixels))
    }
}

/// Texture references keyed by product / material id.
#[derive(Clone, Default)]
pub struct MaterialLibrary {
    textures: HashMap<String, TextureRef>,
}

impl MaterialLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, id: impl Into<String>, texture: RgbaImage) {
        let texture = TextureRef::new(id, texture);
        self.textures.insert(texture.id.clone(), texture);
    }

    pub fn get(&self, id: &str) -> Option<TextureRef> {
        self.textures.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.textures.contains_key(id)
    }

    /// Sorted material ids.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.textures.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.textures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.textures.is_empty()
    }

    /// Decode one file and register it under its file stem.
    pub fn load_file(&mut self, path: &Path) -> Result<String, TextureError> {
        let texture = TextureRef::from_file(path)?;
        let id = texture.id.clone();
        self.textures.insert(id.clone(), texture);
        Ok(id)
    }

    /// Register every image in `dir`.  Files that fail to decode are logged
    /// and skipped.  Returns how many materials were added.
    pub fn load_dir(&mut self, dir: &Path) -> Result<usize, TextureError> {
        if !dir.is_dir() {
            return Err(TextureError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} is not a directory", dir.display()),
            )));
        }
        let mut added = 0;
        for ext in MATERIAL_EXTENSIONS {
            let pattern = dir.join(format!("*.{}", ext));
            let pattern = pattern.to_string_lossy();
            let Ok(paths) = glob::glob(&pattern) else { continue };
            for path in paths.flatten() {
                match self.load_file(&path) {
                    Ok(id) => {
                        crate::log_info!("Materials: loaded '{}'", id);
                        added += 1;
                    }
                    Err(e) => crate::log_warn!("Materials: skipping {}: {}", path.display(), e),
                }
            }
        }
        Ok(added)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn settings_survive_a_save_load_cycle() {
        let mut s = EngineSettings::default();
        s.opacity = 0.6;
        s.placement = PlacementMode::Stretch;
        s.perspective = false;
        assert_eq!(EngineSettings::parse(&s.to_config_string()), s);
    }

    #[test]
    fn unknown_keys_and_garbage_fall_back_to_defaults() {
        let s = EngineSettings::parse("# comment\nfoo=bar\nopacity=lots\nfeather_radius=12\nnot a line\n");
        assert_eq!(s.opacity, DEFAULT_OPACITY);
        assert_eq!(s.feather_radius, 12);
        assert_eq!(s.brush_radius, DEFAULT_BRUSH_RADIUS);
    }

    #[test]
    fn inverted_radius_bounds_are_reset() {
        let s = EngineSettings::parse("min_brush_radius=60\nmax_brush_radius=10\n");
        assert_eq!(s.tool_limits(), ToolLimits::default());
    }

    #[test]
    fn library_lookup() {
        let mut lib = MaterialLibrary::new();
        lib.insert("oak", RgbaImage::new(2, 2));
        lib.insert("brick", RgbaImage::new(4, 4));
        assert_eq!(lib.ids(), vec!["brick".to_string(), "oak".to_string()]);
        assert_eq!(lib.get("brick").map(|t| t.pixels.width()), Some(4));
        assert!(lib.get("marble").is_none());
    }

    #[test]
    fn undecodable_material_is_rejected() {
        assert!(matches!(TextureRef::decode("broken", b"\x00\x01garbage"), Err(TextureError::Unsupported(_))));
    }
}

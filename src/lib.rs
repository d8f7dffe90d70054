//! Mask editing and surface compositing for room visualization.
//!
//! A [`project::Session`] owns one uploaded image, the surface masks the
//! segmentation collaborator produced for it, and the user's edits.  Tools
//! edit a custom raster ([`components::tools`]), the selector tracks which
//! region is active ([`components::selector`]), and [`ops::composite`] warps
//! a material into that region with perspective, feathering and opacity.

pub mod logger;

pub mod assets;
pub mod canvas;
pub mod cli;
pub mod components;
pub mod io;
pub mod ops;
pub mod project;

pub use assets::{EngineSettings, MaterialLibrary, TextureRef};
pub use canvas::{MaskStore, SelectionMode, ViewMapping};
pub use components::selector::{Selection, SelectorState};
pub use components::tools::{Tool, ToolOutcome, ToolRequest};
pub use ops::ai::{PrecomputedSegmenter, Segmenter, SegmentationOutput};
pub use ops::composite::CompositeOptions;
pub use project::{Session, SessionError};

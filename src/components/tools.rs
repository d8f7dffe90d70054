use image::{GrayImage, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::canvas::{SelectionMode, ViewMapping};
use crate::ops::brush::{apply_stroke, DirtyRect};
use crate::ops::lasso::apply_lasso;
use crate::ops::magic_wand::apply_magic_wand;
use crate::ops::refine::{PointRefiner, PromptPoint};
use crate::project::SessionError;

/// Default brush radius (display pixels).
pub const DEFAULT_BRUSH_RADIUS: f32 = 20.0;
pub const MIN_BRUSH_RADIUS: f32 = 5.0;
pub const MAX_BRUSH_RADIUS: f32 = 50.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Tool {
    #[default]
    Select,
    Brush,
    Eraser,
    Lasso,
    MagicWand,
    PointRefine,
}

impl Tool {
    pub fn label(&self) -> &'static str {
        match self {
            Tool::Select => "Select",
            Tool::Brush => "Brush",
            Tool::Eraser => "Eraser",
            Tool::Lasso => "Lasso",
            Tool::MagicWand => "Magic Wand",
            Tool::PointRefine => "Point Refine",
        }
    }

    /// Every tool except Select edits the custom raster.
    pub fn is_drawing(&self) -> bool {
        !matches!(self, Tool::Select)
    }

    /// Mode a request from this tool uses when the caller does not pick one.
    pub fn default_mode(&self) -> SelectionMode {
        match self {
            Tool::Eraser => SelectionMode::Subtract,
            _ => SelectionMode::Add,
        }
    }

    pub fn all() -> &'static [Tool] {
        &[Tool::Select, Tool::Brush, Tool::Eraser, Tool::Lasso, Tool::MagicWand, Tool::PointRefine]
    }
}

/// Brush radius bounds enforced at the request boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ToolLimits {
    pub min_radius: f32,
    pub max_radius: f32,
}

impl Default for ToolLimits {
    fn default() -> Self {
        Self { min_radius: MIN_BRUSH_RADIUS, max_radius: MAX_BRUSH_RADIUS }
    }
}

/// One editing action, carrying only the fields it needs.
///
/// Coordinates arrive in display space; [`ToolRequest::to_image_space`] maps
/// them onto the image pixel grid before dispatch.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ToolRequest {
    Stroke { points: Vec<(f32, f32)>, radius: f32, mode: SelectionMode },
    Lasso { points: Vec<(f32, f32)>, mode: SelectionMode },
    MagicWand { seed: (f32, f32), tolerance: f32, mode: SelectionMode },
    PointRefine { points: Vec<PromptPoint> },
}

fn finite(p: &(f32, f32)) -> bool {
    p.0.is_finite() && p.1.is_finite()
}

impl ToolRequest {
    pub fn brush(points: Vec<(f32, f32)>, radius: f32) -> Self {
        ToolRequest::Stroke { points, radius, mode: SelectionMode::Add }
    }

    pub fn eraser(points: Vec<(f32, f32)>, radius: f32) -> Self {
        ToolRequest::Stroke { points, radius, mode: SelectionMode::Subtract }
    }

    pub fn lasso(points: Vec<(f32, f32)>) -> Self {
        ToolRequest::Lasso { points, mode: SelectionMode::Add }
    }

    pub fn magic_wand(seed: (f32, f32), tolerance: f32) -> Self {
        ToolRequest::MagicWand { seed, tolerance, mode: SelectionMode::Add }
    }

    pub fn point_refine(points: Vec<PromptPoint>) -> Self {
        ToolRequest::PointRefine { points }
    }

    /// The tool this request belongs to.
    pub fn tool(&self) -> Tool {
        match self {
            ToolRequest::Stroke { mode: SelectionMode::Subtract, .. } => Tool::Eraser,
            ToolRequest::Stroke { .. } => Tool::Brush,
            ToolRequest::Lasso { .. } => Tool::Lasso,
            ToolRequest::MagicWand { .. } => Tool::MagicWand,
            ToolRequest::PointRefine { .. } => Tool::PointRefine,
        }
    }

    /// Boundary validation.  Out-of-image coordinates are *not* rejected
    /// here: those are absorbed by the individual tools.
    pub fn validate(&self, limits: &ToolLimits) -> Result<(), SessionError> {
        let invalid = |msg: String| Err(SessionError::InvalidRequest(msg));
        match self {
            ToolRequest::Stroke { points, radius, .. } => {
                if points.is_empty() {
                    return invalid("stroke has no samples".into());
                }
                if !points.iter().all(finite) {
                    return invalid("stroke has a non-finite sample".into());
                }
                if !(radius.is_finite() && *radius >= limits.min_radius && *radius <= limits.max_radius) {
                    return invalid(format!(
                        "brush radius {} outside {}..={}",
                        radius, limits.min_radius, limits.max_radius
                    ));
                }
            }
            ToolRequest::Lasso { points, .. } => {
                if !points.iter().all(finite) {
                    return invalid("lasso has a non-finite vertex".into());
                }
            }
            ToolRequest::MagicWand { seed, tolerance, .. } => {
                if !finite(seed) {
                    return invalid("magic wand seed is not finite".into());
                }
                if !(tolerance.is_finite() && *tolerance >= 0.0) {
                    return invalid(format!("magic wand tolerance {} must be >= 0", tolerance));
                }
            }
            ToolRequest::PointRefine { points } => {
                if !points.iter().all(|p| p.x.is_finite() && p.y.is_finite()) {
                    return invalid("refine prompt is not finite".into());
                }
            }
        }
        Ok(())
    }

    /// Map every coordinate (and the brush radius) from display space into
    /// image pixel space.
    pub fn to_image_space(&self, view: &ViewMapping) -> ToolRequest {
        let map = |pts: &[(f32, f32)]| pts.iter().map(|&p| view.to_image(p)).collect::<Vec<_>>();
        match self {
            ToolRequest::Stroke { points, radius, mode } => ToolRequest::Stroke {
                points: map(points),
                radius: radius * view.scale(),
                mode: *mode,
            },
            ToolRequest::Lasso { points, mode } => ToolRequest::Lasso { points: map(points), mode: *mode },
            ToolRequest::MagicWand { seed, tolerance, mode } => ToolRequest::MagicWand {
                seed: view.to_image(*seed),
                tolerance: *tolerance,
                mode: *mode,
            },
            ToolRequest::PointRefine { points } => ToolRequest::PointRefine {
                points: points
                    .iter()
                    .map(|p| {
                        let (x, y) = view.to_image((p.x, p.y));
                        PromptPoint { x, y, label: p.label }
                    })
                    .collect(),
            },
        }
    }
}

/// What a dispatched request did to the working raster.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ToolOutcome {
    /// The raster changed (dirty box when known).
    Changed(Option<DirtyRect>),
    /// A geometric edge case was absorbed; the raster is untouched.
    NoOp,
}

/// Read-only inputs a tool may need besides the working raster.
pub struct ToolContext<'a> {
    pub image: &'a RgbaImage,
    pub refiner: &'a dyn PointRefiner,
}

/// Apply an image-space request to `raster`.  Synchronous, one bounded pass.
pub fn dispatch(raster: &mut GrayImage, request: &ToolRequest, ctx: &ToolContext<'_>) -> ToolOutcome {
    match request {
        ToolRequest::Stroke { points, radius, mode } => match apply_stroke(raster, points, *radius, *mode) {
            Some(rect) => ToolOutcome::Changed(Some(rect)),
            None => {
                crate::log_warn!("{}: stroke missed the image", request.tool().label());
                ToolOutcome::NoOp
            }
        },
        ToolRequest::Lasso { points, mode } => {
            if apply_lasso(raster, points, *mode) {
                ToolOutcome::Changed(None)
            } else {
                crate::log_warn!("Lasso: {} point(s) on release, ignored", points.len());
                ToolOutcome::NoOp
            }
        }
        ToolRequest::MagicWand { seed, tolerance, mode } => {
            match apply_magic_wand(raster, ctx.image, *seed, *tolerance, *mode) {
                Some(area) => {
                    crate::log_info!("Magic Wand: grew {} px from ({:.1}, {:.1})", area, seed.0, seed.1);
                    ToolOutcome::Changed(None)
                }
                None => {
                    crate::log_warn!("Magic Wand: seed ({:.1}, {:.1}) outside image, ignored", seed.0, seed.1);
                    ToolOutcome::NoOp
                }
            }
        }
        ToolRequest::PointRefine { points } => {
            let (w, h) = raster.dimensions();
            let usable = points
                .iter()
                .filter(|p| p.x >= 0.0 && p.y >= 0.0 && p.x < w as f32 && p.y < h as f32)
                .count();
            if usable < points.len() {
                crate::log_warn!("Point Refine: {} prompt(s) outside image, ignored", points.len() - usable);
            }
            if usable == 0 {
                return ToolOutcome::NoOp;
            }
            *raster = ctx.refiner.refine(raster, points);
            ToolOutcome::Changed(None)
        }
    }
}

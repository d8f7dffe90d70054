// ============================================================================
// POINT-PROMPT REFINER — positive/negative click edits on a mask
// ============================================================================

use image::GrayImage;
use serde::{Deserialize, Serialize};

use crate::canvas::SelectionMode;
use crate::ops::brush::apply_stroke;
use crate::ops::filters::smooth;

/// Default disc radius stamped per prompt point (image pixels).
pub const DEFAULT_REFINE_RADIUS: f32 = 10.0;

/// Default structuring-element size for the cleanup pass.
pub const DEFAULT_MORPH_KERNEL: u32 = 5;

/// Upper bound on stamp + cleanup rounds per refine call.
const MAX_REFINE_PASSES: usize = 8;

/// Whether a prompt point marks surface (grow) or background (shrink).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PromptLabel {
    Positive,
    Negative,
}

/// One click prompt.  Coordinates are in whatever space the caller works in;
/// the session maps display-space prompts to image space before refining.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PromptPoint {
    pub x: f32,
    pub y: f32,
    pub label: PromptLabel,
}

impl PromptPoint {
    pub fn positive(x: f32, y: f32) -> Self {
        Self { x, y, label: PromptLabel::Positive }
    }

    pub fn negative(x: f32, y: f32) -> Self {
        Self { x, y, label: PromptLabel::Negative }
    }
}

/// Refines a mask from click prompts.
///
/// The local implementation below is the reference behaviour; a refiner
/// backed by a live segmentation model can implement the same trait and be
/// injected into a session without changing callers.  Implementations must
/// be pure: identical `(mask, points)` input always yields the same raster,
/// with the same dimensions as `mask`.
pub trait PointRefiner: Send + Sync {
    fn refine(&self, mask: &GrayImage, points: &[PromptPoint]) -> GrayImage;
}

/// Deterministic disc-stamp refiner with an open-then-close cleanup pass.
#[derive(Clone, Debug)]
pub struct LocalRefiner {
    /// Disc radius per prompt point.
    pub radius: f32,
    /// Square structuring element size for open/close.
    pub kernel: u32,
}

impl Default for LocalRefiner {
    fn default() -> Self {
        Self { radius: DEFAULT_REFINE_RADIUS, kernel: DEFAULT_MORPH_KERNEL }
    }
}

impl LocalRefiner {
    pub fn new(radius: f32, kernel: u32) -> Self {
        Self { radius, kernel }
    }
}

impl PointRefiner for LocalRefiner {
    fn refine(&self, mask: &GrayImage, points: &[PromptPoint]) -> GrayImage {
        let (w, h) = mask.dimensions();
        let in_bounds = |p: &&PromptPoint| {
            p.x.is_finite() && p.y.is_finite()
                && p.x >= 0.0 && p.y >= 0.0
                && p.x < w as f32 && p.y < h as f32
        };
        let valid: Vec<&PromptPoint> = points.iter().filter(in_bounds).collect();
        if valid.is_empty() {
            return mask.clone();
        }

        // Stamp + cleanup until the raster settles, so refining a refined
        // mask with the same prompts is a no-op.
        let mut out = self.pass(mask, &valid);
        for _ in 1..MAX_REFINE_PASSES {
            let next = self.pass(&out, &valid);
            if next.as_raw() == out.as_raw() {
                break;
            }
            out = next;
        }
        out
    }
}

impl LocalRefiner {
    fn pass(&self, mask: &GrayImage, points: &[&PromptPoint]) -> GrayImage {
        let mut out = mask.clone();
        // Positives first, then negatives: a negative click always wins where
        // discs overlap, independent of click order.
        for p in points.iter().filter(|p| p.label == PromptLabel::Positive) {
            apply_stroke(&mut out, &[(p.x, p.y)], self.radius, SelectionMode::Add);
        }
        for p in points.iter().filter(|p| p.label == PromptLabel::Negative) {
            apply_stroke(&mut out, &[(p.x, p.y)], self.radius, SelectionMode::Subtract);
        }
        smooth(&out, self.kernel)
    }
}

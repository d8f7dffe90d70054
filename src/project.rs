// ============================================================================
// VISUALIZATION SESSION — analyze → edit → composite → reset
// ============================================================================
//
// One `Session` binds an uploaded image, its mask catalog and every edit made
// on top.  Tool requests run synchronously on the caller's thread.
// `visualize` offloads the composite to rayon and reports back over an mpsc
// channel; each request carries a token and a cancel flag, so a newer
// request supersedes (and cancels) any older one still in flight.

use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{GrayImage, RgbaImage};
use uuid::Uuid;

use crate::assets::{EngineSettings, TextureRef};
use crate::canvas::{mask_is_empty, MaskError, MaskStore, SelectionMode, ViewMapping};
use crate::components::selector::{Selection, Selector, SelectorState};
use crate::components::tools::{dispatch, Tool, ToolContext, ToolOutcome, ToolRequest};
use crate::io::{SessionSnapshot, SnapshotError, TextureError};
use crate::ops::ai::{normalize_mask, MaskMetadata, SegmentError, SegmentationOutput, SharedSegmenter};
use crate::ops::composite::{composite, CompositeError, CompositeOptions};
use crate::ops::refine::{PointRefiner, PromptPoint};
use crate::ops::transform::PlacementMode;

/// Completed composites kept per session.
pub const CACHE_CAPACITY: usize = 8;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum SessionError {
    /// Unknown mask / selection index.
    InvalidIndex { index: usize, len: usize },
    /// Composite attempted with nothing selected.
    EmptySelection,
    /// The material cannot be decoded.
    UnsupportedTextureFormat(String),
    /// A tool request failed boundary validation.
    InvalidRequest(String),
    /// The catalog has not been produced yet (`analyze` not run).
    NoMasks,
    /// The segmentation collaborator failed.
    Segmentation(String),
    /// The request was superseded before it finished.
    Cancelled,
    /// A snapshot could not be written or read.
    Snapshot(String),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidIndex { index, len } => {
                write!(f, "mask index {} out of range (catalog has {} masks)", index, len)
            }
            SessionError::EmptySelection => write!(f, "nothing is selected"),
            SessionError::UnsupportedTextureFormat(e) => write!(f, "unsupported texture: {}", e),
            SessionError::InvalidRequest(e) => write!(f, "invalid request: {}", e),
            SessionError::NoMasks => write!(f, "no mask catalog yet, run analyze first"),
            SessionError::Segmentation(e) => write!(f, "segmentation failed: {}", e),
            SessionError::Cancelled => write!(f, "superseded by a newer request"),
            SessionError::Snapshot(e) => write!(f, "snapshot error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<MaskError> for SessionError {
    fn from(e: MaskError) -> Self {
        match e {
            MaskError::InvalidIndex { index, len } => SessionError::InvalidIndex { index, len },
            other => SessionError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<TextureError> for SessionError {
    fn from(e: TextureError) -> Self {
        SessionError::UnsupportedTextureFormat(e.to_string())
    }
}

impl From<CompositeError> for SessionError {
    fn from(e: CompositeError) -> Self {
        match e {
            CompositeError::UnsupportedTextureFormat(msg) => SessionError::UnsupportedTextureFormat(msg),
            CompositeError::Cancelled => SessionError::Cancelled,
        }
    }
}

impl From<SegmentError> for SessionError {
    fn from(e: SegmentError) -> Self {
        SessionError::Segmentation(e.to_string())
    }
}

impl From<SnapshotError> for SessionError {
    fn from(e: SnapshotError) -> Self {
        SessionError::Snapshot(e.to_string())
    }
}

// ============================================================================
// COMPOSITE CACHE
// ============================================================================

/// Identity of the region being composited.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum MaskKey {
    /// Sorted catalog indices.
    Catalog(Vec<usize>),
    /// Hash of the custom raster bytes.
    Custom(u64),
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CompositeKey {
    pub image_id: Uuid,
    pub mask_key: MaskKey,
    pub texture_id: String,
    pub opacity_bits: u32,
    pub perspective: bool,
    pub feather_radius: u32,
    pub placement: PlacementMode,
    pub epsilon_bits: u32,
}

fn hash_raster(mask: &GrayImage) -> u64 {
    let mut h = DefaultHasher::new();
    mask.dimensions().hash(&mut h);
    mask.as_raw().hash(&mut h);
    h.finish()
}

/// Small most-recently-used list of finished composites.
#[derive(Default)]
struct CompositeCache {
    entries: VecDeque<(CompositeKey, Arc<RgbaImage>)>,
}

impl CompositeCache {
    fn get(&mut self, key: &CompositeKey) -> Option<Arc<RgbaImage>> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        let entry = self.entries.remove(pos)?;
        let hit = Arc::clone(&entry.1);
        self.entries.push_back(entry);
        Some(hit)
    }

    fn put(&mut self, key: CompositeKey, result: Arc<RgbaImage>) {
        self.entries.retain(|(k, _)| k != &key);
        if self.entries.len() >= CACHE_CAPACITY {
            self.entries.pop_front();
        }
        self.entries.push_back((key, result));
    }

    fn clear(&mut self) {
        self.entries.clear();
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

// ============================================================================
// BACKGROUND JOBS
// ============================================================================

/// Everything a composite needs, copied at invocation time so later edits
/// never leak into a running job.
struct CompositeJob {
    key: CompositeKey,
    image: Arc<RgbaImage>,
    mask: GrayImage,
    texture: Arc<RgbaImage>,
    options: CompositeOptions,
}

impl CompositeJob {
    fn run(&self, cancel: Option<&AtomicBool>) -> Result<RgbaImage, CompositeError> {
        composite(&self.image, &self.mask, &self.texture, &self.options, cancel)
    }
}

struct PendingJob {
    token: u64,
    cancel: Arc<AtomicBool>,
}

struct JobMessage {
    token: u64,
    key: CompositeKey,
    result: Result<Arc<RgbaImage>, CompositeError>,
}

// ============================================================================
// SESSION
// ============================================================================

pub struct Session {
    id: Uuid,
    image_id: Uuid,
    image_ref: String,
    image: Arc<RgbaImage>,
    masks: MaskStore,
    metadata: Vec<MaskMetadata>,
    selector: Selector,
    tool: Tool,
    view: ViewMapping,
    settings: EngineSettings,
    segmenter: SharedSegmenter,
    refiner: Arc<dyn PointRefiner>,
    result: Option<Arc<RgbaImage>>,
    cache: CompositeCache,
    pending: Option<PendingJob>,
    next_token: u64,
    tx: mpsc::Sender<JobMessage>,
    rx: mpsc::Receiver<JobMessage>,
}

impl Session {
    /// Start a session for an uploaded image.  The segmentation handle is
    /// shared; nothing is analyzed until [`Session::analyze`].
    pub fn new(image: RgbaImage, image_ref: impl Into<String>, segmenter: SharedSegmenter) -> Self {
        Self::with_settings(image, image_ref, segmenter, EngineSettings::default())
    }

    pub fn with_settings(
        image: RgbaImage,
        image_ref: impl Into<String>,
        segmenter: SharedSegmenter,
        settings: EngineSettings,
    ) -> Self {
        let (w, h) = image.dimensions();
        let (tx, rx) = mpsc::channel();
        let refiner: Arc<dyn PointRefiner> = Arc::new(settings.refiner());
        let session = Self {
            id: Uuid::new_v4(),
            image_id: Uuid::new_v4(),
            image_ref: image_ref.into(),
            image: Arc::new(image),
            masks: MaskStore::new(w, h),
            metadata: Vec::new(),
            selector: Selector::new(),
            tool: Tool::Select,
            view: ViewMapping::identity(w, h),
            settings,
            segmenter,
            refiner,
            result: None,
            cache: CompositeCache::default(),
            pending: None,
            next_token: 0,
            tx,
            rx,
        };
        crate::log_info!("Session {}: opened '{}' ({}x{})", session.id, session.image_ref, w, h);
        session
    }

    /// Swap in a different point refiner (e.g. one backed by a live model).
    pub fn with_refiner(mut self, refiner: Arc<dyn PointRefiner>) -> Self {
        self.refiner = refiner;
        self
    }

    // ---------------------------------------------------------------------
    //  Accessors
    // ---------------------------------------------------------------------

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image_id(&self) -> Uuid {
        self.image_id
    }

    pub fn image_ref(&self) -> &str {
        &self.image_ref
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn masks(&self) -> &MaskStore {
        &self.masks
    }

    pub fn metadata(&self) -> &[MaskMetadata] {
        &self.metadata
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Replace the engine settings.  Cached composites and any pending
    /// visualize request are dropped.
    pub fn set_settings(&mut self, settings: EngineSettings) {
        self.cancel_pending("cancelled by settings change");
        self.refiner = Arc::new(settings.refiner());
        self.settings = settings;
        self.cache.clear();
    }

    pub fn state(&self) -> SelectorState {
        self.selector.state()
    }

    pub fn selection(&self) -> Selection {
        self.selector.selection()
    }

    pub fn selected(&self) -> &[usize] {
        self.selector.selected()
    }

    pub fn custom_mask(&self) -> Option<&GrayImage> {
        self.masks.custom_mask()
    }

    pub fn tool(&self) -> Tool {
        self.tool
    }

    pub fn result(&self) -> Option<&Arc<RgbaImage>> {
        self.result.as_ref()
    }

    /// What the view should show: the last successful result, else the
    /// untouched original.  Never blank.
    pub fn displayed_image(&self) -> Arc<RgbaImage> {
        self.result.clone().unwrap_or_else(|| Arc::clone(&self.image))
    }

    pub fn cached_results(&self) -> usize {
        self.cache.len()
    }

    /// Size the image is currently drawn at, for pointer mapping.
    pub fn set_display_size(&mut self, width: f32, height: f32) {
        self.view = ViewMapping::new(self.image.dimensions(), (width, height));
    }

    pub fn view(&self) -> ViewMapping {
        self.view
    }

    // ---------------------------------------------------------------------
    //  Analyze
    // ---------------------------------------------------------------------

    /// Run the segmentation collaborator once.  The catalog is cached for the
    /// session lifetime: later calls return the existing mask count.
    pub fn analyze(&mut self) -> Result<usize, SessionError> {
        if self.selector.state() != SelectorState::Idle {
            crate::log_info!("Session {}: analyze skipped, catalog cached", self.id);
            return Ok(self.masks.len());
        }
        let output = match self.segmenter.analyze(&self.image) {
            Ok(out) => out,
            Err(e) => {
                crate::log_err!("Session {}: segmentation failed: {}", self.id, e);
                return Err(e.into());
            }
        };
        self.load_catalog(output)
    }

    /// Install a catalog produced elsewhere (masks are resized and
    /// binarized to the image).
    pub fn load_catalog(&mut self, output: SegmentationOutput) -> Result<usize, SessionError> {
        let (w, h) = self.image.dimensions();
        let threshold = self.settings.mask_threshold;
        let masks: Vec<GrayImage> = output.masks.iter().map(|m| normalize_mask(m, w, h, threshold)).collect();
        let count = masks.len();
        self.masks.load_catalog(masks)?;
        self.metadata = output.metadata;
        self.selector.load(count);
        self.masks.clear_custom_mask();
        self.tool = Tool::Select;
        crate::log_info!("Session {}: catalog loaded with {} mask(s)", self.id, count);
        Ok(count)
    }

    fn require_catalog(&self) -> Result<(), SessionError> {
        if self.selector.state() == SelectorState::Idle {
            return Err(SessionError::NoMasks);
        }
        Ok(())
    }

    // ---------------------------------------------------------------------
    //  Selection
    // ---------------------------------------------------------------------

    /// Switch tools.  A drawing tool moves the session into CustomDrawn with
    /// an empty working raster and no catalog selection; the select tool
    /// discards the custom raster.
    pub fn set_tool(&mut self, tool: Tool) -> Result<(), SessionError> {
        self.require_catalog()?;
        if tool.is_drawing() {
            self.enter_custom()?;
        } else if self.selector.is_custom() {
            self.selector.leave_custom();
            self.masks.clear_custom_mask();
            crate::log_info!("Session {}: custom raster discarded", self.id);
        }
        if self.tool != tool {
            crate::log_info!("Session {}: tool {} -> {}", self.id, self.tool.label(), tool.label());
        }
        self.tool = tool;
        Ok(())
    }

    fn enter_custom(&mut self) -> Result<(), SessionError> {
        if self.selector.is_custom() {
            return Ok(());
        }
        let dropped = self.selector.enter_custom();
        let (w, h) = self.image.dimensions();
        self.masks.set_custom_mask(GrayImage::new(w, h))?;
        crate::log_info!("Session {}: CustomDrawn, catalog selection {:?} cleared", self.id, dropped);
        Ok(())
    }

    fn leave_custom_for_select(&mut self) {
        if self.selector.is_custom() {
            self.selector.leave_custom();
            self.masks.clear_custom_mask();
        }
        self.tool = Tool::Select;
    }

    /// Add a catalog mask to the selection.
    pub fn select_mask(&mut self, index: usize) -> Result<(), SessionError> {
        self.require_catalog()?;
        self.masks.get_mask(index)?;
        self.leave_custom_for_select();
        if self.selector.select(index)? {
            crate::log_info!("Session {}: selected mask {}", self.id, index);
        }
        Ok(())
    }

    /// Remove a catalog mask from the selection.
    pub fn deselect_mask(&mut self, index: usize) -> Result<(), SessionError> {
        self.require_catalog()?;
        self.masks.get_mask(index)?;
        if self.selector.deselect(index)? {
            crate::log_info!("Session {}: deselected mask {}", self.id, index);
        }
        Ok(())
    }

    /// Click on a catalog mask: select it if unselected, otherwise deselect.
    pub fn toggle_mask(&mut self, index: usize) -> Result<bool, SessionError> {
        self.require_catalog()?;
        self.masks.get_mask(index)?;
        if self.selector.is_custom() {
            self.select_mask(index)?;
            return Ok(true);
        }
        let now = self.selector.toggle(index)?;
        crate::log_info!("Session {}: mask {} {}", self.id, index, if now { "selected" } else { "deselected" });
        Ok(now)
    }

    // ---------------------------------------------------------------------
    //  Tools
    // ---------------------------------------------------------------------

    /// Validate a display-space request, map it to image space and apply it
    /// to the working raster.  Geometric edge cases come back as
    /// [`ToolOutcome::NoOp`], not as errors.
    pub fn apply_tool(&mut self, request: &ToolRequest) -> Result<ToolOutcome, SessionError> {
        self.require_catalog()?;
        request.validate(&self.settings.tool_limits())?;
        let tool = request.tool();
        self.set_tool(tool)?;

        let image_request = request.to_image_space(&self.view);
        let ctx = ToolContext { image: &self.image, refiner: self.refiner.as_ref() };
        let outcome = dispatch(self.masks.custom_mask_mut(), &image_request, &ctx);
        if let ToolOutcome::Changed(rect) = outcome {
            crate::log_info!("Session {}: {} applied, dirty {:?}", self.id, tool.label(), rect);
        }
        Ok(outcome)
    }

    /// Brush (`Add`) or eraser (`Subtract`) stroke.
    pub fn apply_stroke(
        &mut self,
        points: Vec<(f32, f32)>,
        radius: f32,
        mode: SelectionMode,
    ) -> Result<ToolOutcome, SessionError> {
        self.apply_tool(&ToolRequest::Stroke { points, radius, mode })
    }

    pub fn apply_lasso(&mut self, points: Vec<(f32, f32)>) -> Result<ToolOutcome, SessionError> {
        self.apply_tool(&ToolRequest::lasso(points))
    }

    pub fn apply_magic_wand(&mut self, seed: (f32, f32), tolerance: f32) -> Result<ToolOutcome, SessionError> {
        self.apply_tool(&ToolRequest::magic_wand(seed, tolerance))
    }

    pub fn apply_point_refine(&mut self, points: Vec<PromptPoint>) -> Result<ToolOutcome, SessionError> {
        self.apply_tool(&ToolRequest::point_refine(points))
    }

    // ---------------------------------------------------------------------
    //  Composite
    // ---------------------------------------------------------------------

    /// Composite is enabled only when the active region is non-empty.
    pub fn can_composite(&self) -> bool {
        if self.selector.is_custom() {
            return self.masks.custom_mask().is_some_and(|m| !mask_is_empty(m));
        }
        self.selector.has_selection()
    }

    /// Resolve the active region and copy everything a composite needs.
    fn prepare_job(&self, texture: &TextureRef, opacity: f32) -> Result<CompositeJob, SessionError> {
        if texture.pixels.width() == 0 || texture.pixels.height() == 0 {
            return Err(SessionError::UnsupportedTextureFormat(format!("'{}' has no pixels", texture.id)));
        }
        let (mask, mask_key) = if self.selector.is_custom() {
            let custom = self.masks.custom_mask().filter(|m| !mask_is_empty(m)).ok_or(SessionError::EmptySelection)?;
            (custom.clone(), MaskKey::Custom(hash_raster(custom)))
        } else {
            let selected = self.selector.selected();
            if selected.is_empty() {
                return Err(SessionError::EmptySelection);
            }
            let mut sorted = selected.to_vec();
            sorted.sort_unstable();
            (self.masks.union_of(&sorted)?, MaskKey::Catalog(sorted))
        };
        let opacity = if opacity.is_finite() { opacity.clamp(0.0, 1.0) } else { self.settings.opacity };
        let options = self.settings.composite_options().with_opacity(opacity);
        let key = CompositeKey {
            image_id: self.image_id,
            mask_key,
            texture_id: texture.id.clone(),
            opacity_bits: opacity.to_bits(),
            perspective: options.perspective,
            feather_radius: options.feather_radius,
            placement: options.placement,
            epsilon_bits: options.epsilon_ratio.to_bits(),
        };
        Ok(CompositeJob { key, image: Arc::clone(&self.image), mask, texture: Arc::clone(&texture.pixels), options })
    }

    fn cancel_pending(&mut self, reason: &str) {
        if let Some(job) = self.pending.take() {
            job.cancel.store(true, Ordering::Relaxed);
            crate::log_info!("Session {}: visualize #{} {}", self.id, job.token, reason);
        }
    }

    /// Synchronous composite.  Supersedes any background request.  On error
    /// the previous result stays displayed.
    pub fn composite(&mut self, texture: &TextureRef, opacity: f32) -> Result<Arc<RgbaImage>, SessionError> {
        let job = self.prepare_job(texture, opacity)?;
        self.cancel_pending("superseded by synchronous composite");
        if let Some(hit) = self.cache.get(&job.key) {
            crate::log_info!("Session {}: composite '{}' served from cache", self.id, texture.id);
            self.result = Some(Arc::clone(&hit));
            return Ok(hit);
        }
        let started = Instant::now();
        match job.run(None) {
            Ok(out) => {
                let out = Arc::new(out);
                self.cache.put(job.key, Arc::clone(&out));
                self.result = Some(Arc::clone(&out));
                crate::log_info!(
                    "Session {}: composite '{}' done in {:.1} ms",
                    self.id,
                    texture.id,
                    started.elapsed().as_secs_f64() * 1000.0
                );
                Ok(out)
            }
            Err(e) => {
                crate::log_err!("Session {}: composite '{}' failed: {}", self.id, texture.id, e);
                Err(e.into())
            }
        }
    }

    /// Start a background composite and return its token.  Any older
    /// request still running is cancelled; only the newest result is ever
    /// applied.  The region is captured now, so edits made while the job
    /// runs do not affect it.
    pub fn visualize(&mut self, texture: &TextureRef, opacity: f32) -> Result<u64, SessionError> {
        let job = self.prepare_job(texture, opacity)?;
        self.cancel_pending("superseded");

        self.next_token += 1;
        let token = self.next_token;
        let cancel = Arc::new(AtomicBool::new(false));
        self.pending = Some(PendingJob { token, cancel: Arc::clone(&cancel) });
        crate::log_info!("Session {}: visualize #{} '{}' started", self.id, token, texture.id);

        if let Some(hit) = self.cache.get(&job.key) {
            let _ = self.tx.send(JobMessage { token, key: job.key, result: Ok(hit) });
            return Ok(token);
        }

        let tx = self.tx.clone();
        rayon::spawn(move || {
            let result = job.run(Some(cancel.as_ref())).map(Arc::new);
            let _ = tx.send(JobMessage { token, key: job.key, result });
        });
        Ok(token)
    }

    /// True while a background request has not reported back.
    pub fn is_visualizing(&self) -> bool {
        self.pending.is_some()
    }

    /// Apply a finished job message.  Returns `Some` only for the current
    /// request; stale ones are dropped.
    fn accept(&mut self, msg: JobMessage) -> Option<Result<Arc<RgbaImage>, SessionError>> {
        let current = self.pending.as_ref().is_some_and(|p| p.token == msg.token);
        if !current {
            crate::log_info!("Session {}: dropped stale visualize #{}", self.id, msg.token);
            return None;
        }
        self.pending = None;
        match msg.result {
            Ok(out) => {
                self.cache.put(msg.key, Arc::clone(&out));
                self.result = Some(Arc::clone(&out));
                crate::log_info!("Session {}: visualize #{} finished", self.id, msg.token);
                Some(Ok(out))
            }
            Err(e) => {
                crate::log_err!("Session {}: visualize #{} failed: {}", self.id, msg.token, e);
                Some(Err(e.into()))
            }
        }
    }

    /// Non-blocking: apply the current request's result if it has arrived.
    pub fn poll_visualize(&mut self) -> Option<Result<Arc<RgbaImage>, SessionError>> {
        while let Ok(msg) = self.rx.try_recv() {
            if let Some(done) = self.accept(msg) {
                return Some(done);
            }
        }
        None
    }

    /// Block until the current request finishes or `timeout` elapses.
    /// `None` when nothing is pending or the wait timed out.
    pub fn wait_visualize(&mut self, timeout: Duration) -> Option<Result<Arc<RgbaImage>, SessionError>> {
        let deadline = Instant::now() + timeout;
        while self.pending.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.rx.recv_timeout(remaining) {
                Ok(msg) => {
                    if let Some(done) = self.accept(msg) {
                        return Some(done);
                    }
                }
                Err(_) => return None,
            }
        }
        None
    }

    // ---------------------------------------------------------------------
    //  Reset / snapshot
    // ---------------------------------------------------------------------

    /// Drop the result and every selection / custom edit.  The image and the
    /// mask catalog stay cached.
    pub fn reset(&mut self) {
        self.cancel_pending("cancelled by reset");
        self.result = None;
        self.selector.clear();
        self.masks.clear_custom_mask();
        self.tool = Tool::Select;
        crate::log_info!("Session {}: reset", self.id);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot::new(
            self.id,
            self.image_ref.clone(),
            self.selector.selection(),
            self.masks.custom_mask(),
            self.result.is_some(),
            self.image.dimensions(),
        )
    }

    /// Restore selection and custom raster from a snapshot of this image.
    pub fn restore(&mut self, snapshot: &SessionSnapshot) -> Result<(), SessionError> {
        self.require_catalog()?;
        if (snapshot.width, snapshot.height) != self.image.dimensions() {
            return Err(SessionError::Snapshot(format!(
                "snapshot is {}x{}, image is {}x{}",
                snapshot.width,
                snapshot.height,
                self.image.width(),
                self.image.height()
            )));
        }
        self.cancel_pending("cancelled by restore");
        self.selector.restore(&snapshot.selection);
        self.masks.clear_custom_mask();
        if self.selector.is_custom() {
            let raster = snapshot
                .custom_mask_image()
                .unwrap_or_else(|| GrayImage::new(snapshot.width, snapshot.height));
            self.masks.set_custom_mask(raster)?;
            self.tool = Tool::Brush;
        } else {
            self.tool = Tool::Select;
        }
        crate::log_info!("Session {}: restored {:?}", self.id, snapshot.selection);
        Ok(())
    }

    pub fn save_snapshot(&self, path: &Path) -> Result<(), SessionError> {
        crate::io::save_snapshot(&self.snapshot(), path)?;
        crate::log_info!("Session {}: snapshot written to {}", self.id, path.display());
        Ok(())
    }

    pub fn load_snapshot(&mut self, path: &Path) -> Result<(), SessionError> {
        let snapshot = crate::io::load_snapshot(path)?;
        self.restore(&snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::canvas::{fill_rect, mask_area};
    use crate::ops::ai::PrecomputedSegmenter;
    use image::Rgba;

    fn rect_mask(w: u32, h: u32, r: (u32, u32, u32, u32)) -> GrayImage {
        let mut m = GrayImage::new(w, h);
        fill_rect(&mut m, r.0, r.1, r.2, r.3);
        m
    }

    fn session() -> Session {
        let image = RgbaImage::from_pixel(120, 80, Rgba([120, 120, 120, 255]));
        let seg = PrecomputedSegmenter::new(vec![
            rect_mask(120, 80, (10, 10, 49, 69)),
            rect_mask(120, 80, (60, 10, 109, 69)),
        ]);
        let mut s = Session::new(image, "room.png", Arc::new(seg));
        s.analyze().unwrap();
        s
    }

    fn red() -> TextureRef {
        TextureRef::new("red", RgbaImage::from_pixel(8, 8, Rgba([255, 0, 0, 255])))
    }

    #[test]
    fn tools_need_a_catalog() {
        let seg = PrecomputedSegmenter::new(vec![]);
        let mut s = Session::new(RgbaImage::new(10, 10), "x", Arc::new(seg));
        assert_eq!(s.select_mask(0), Err(SessionError::NoMasks));
        assert_eq!(s.apply_lasso(vec![(0.0, 0.0), (5.0, 0.0), (5.0, 5.0)]), Err(SessionError::NoMasks));
    }

    #[test]
    fn analyze_is_cached() {
        let mut s = session();
        assert_eq!(s.masks().len(), 2);
        assert_eq!(s.analyze().unwrap(), 2);
        assert_eq!(s.state(), SelectorState::MasksLoaded);
    }

    #[test]
    fn unknown_mask_is_invalid_index() {
        let mut s = session();
        assert_eq!(s.select_mask(9), Err(SessionError::InvalidIndex { index: 9, len: 2 }));
    }

    #[test]
    fn composite_requires_a_selection() {
        let mut s = session();
        assert!(!s.can_composite());
        assert_eq!(s.composite(&red(), 1.0), Err(SessionError::EmptySelection));
        // A drawing tool with nothing drawn is still an empty selection
        s.set_tool(Tool::Brush).unwrap();
        assert_eq!(s.composite(&red(), 1.0), Err(SessionError::EmptySelection));
        assert!(s.result().is_none());
    }

    #[test]
    fn drawing_starts_from_an_empty_raster() {
        let mut s = session();
        s.select_mask(0).unwrap();
        s.set_tool(Tool::Eraser).unwrap();
        assert_eq!(s.state(), SelectorState::CustomDrawn);
        assert!(s.selected().is_empty());
        assert_eq!(mask_area(s.custom_mask().unwrap()), 0);
        assert!(!s.can_composite());
        s.set_tool(Tool::Select).unwrap();
        assert!(s.custom_mask().is_none());
        assert_eq!(s.state(), SelectorState::MasksLoaded);
    }

    #[test]
    fn repeated_composite_hits_the_cache() {
        let mut s = session();
        s.select_mask(1).unwrap();
        let a = s.composite(&red(), 1.0).unwrap();
        let b = s.composite(&red(), 1.0).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(s.cached_results(), 1);
    }

    #[test]
    fn failed_composite_keeps_the_previous_result() {
        let mut s = session();
        s.select_mask(0).unwrap();
        let good = s.composite(&red(), 1.0).unwrap();
        let empty = TextureRef::new("empty", RgbaImage::new(0, 0));
        assert!(matches!(s.composite(&empty, 1.0), Err(SessionError::UnsupportedTextureFormat(_))));
        assert!(Arc::ptr_eq(&s.displayed_image(), &good));
    }

    #[test]
    fn reset_keeps_catalog_and_is_idempotent() {
        let mut s = session();
        s.select_mask(0).unwrap();
        s.composite(&red(), 0.5).unwrap();
        s.apply_lasso(vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0)]).unwrap();
        s.reset();
        s.reset();
        assert!(s.result().is_none());
        assert_eq!(s.selection(), Selection::Catalog(vec![]));
        assert!(s.custom_mask().is_none());
        assert_eq!(s.masks().len(), 2);
        assert!(Arc::ptr_eq(&s.displayed_image(), s.image()));
    }

    #[test]
    fn snapshot_restores_custom_raster() {
        let mut s = session();
        s.apply_lasso(vec![(0.0, 0.0), (30.0, 0.0), (30.0, 30.0), (0.0, 30.0)]).unwrap();
        let snap = s.snapshot();
        s.reset();
        s.restore(&snap).unwrap();
        assert_eq!(s.state(), SelectorState::CustomDrawn);
        assert_eq!(mask_area(s.custom_mask().unwrap()), 900);
    }
}

// ============================================================================
// LASSO — freehand point-sampled selection capture
// ============================================================================

use std::time::{Duration, Instant};

use crate::canvas::{LayerId, LayerStore};
use crate::error::{Error, Result};
use crate::events::{EventQueue, StatusEvent, ToolKind};
use crate::geometry::Point;
use crate::history::SnapshotStore;
use crate::mask::MaskBlend;
use crate::path::{Anchor, SelectionPath};
use crate::rasterizer;
use crate::tools::finalize_layer_mask;

/// How a committed lasso region folds into the layer's mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum LassoMode {
    /// Discard the accumulator and start from this region.
    #[default]
    New,
    Add,
    Subtract,
    /// Throw away the session's edits and reinstate the pre-edit snapshot.
    /// Selecting it acts immediately and the mode reverts to `New`.
    Restore,
}

impl LassoMode {
    pub fn label(&self) -> &'static str {
        match self {
            LassoMode::New => "New",
            LassoMode::Add => "Add",
            LassoMode::Subtract => "Subtract",
            LassoMode::Restore => "Restore original",
        }
    }

    pub fn all() -> &'static [LassoMode] {
        &[
            LassoMode::New,
            LassoMode::Add,
            LassoMode::Subtract,
            LassoMode::Restore,
        ]
    }
}

/// Sampling and validity parameters. The coarse profile trades outline
/// fidelity for shorter paths on large canvases.
#[derive(Clone, Copy, Debug)]
pub struct LassoConfig {
    /// Anchors closer than this to the previous sample are skipped.
    pub min_point_distance: f32,
    /// Samples arriving sooner than this after the previous one are skipped.
    pub min_point_interval: Duration,
    /// A stroke idle for this long auto-commits.
    pub idle_timeout: Duration,
    /// Strokes shorter than this are dropped silently.
    pub min_anchors: usize,
}

impl Default for LassoConfig {
    fn default() -> Self {
        Self {
            min_point_distance: 5.0,
            min_point_interval: Duration::from_millis(10),
            idle_timeout: Duration::from_millis(500),
            min_anchors: 5,
        }
    }
}

impl LassoConfig {
    /// Parameters tuned for the canvas size: past a megapixel the sampling
    /// gets coarser to bound path length during long drags.
    pub fn for_canvas(width: u32, height: u32) -> Self {
        let mut config = Self::default();
        if (width as u64) * (height as u64) > 1_000_000 {
            config.min_point_distance = 8.0;
            config.min_point_interval = Duration::from_millis(15);
        }
        config
    }
}

/// Freehand selection tool.
///
/// Active only between `activate` and `deactivate`; while active it holds
/// the store's layer lock so every captured region lands on one layer.
/// Deactivation is the session commit point: the accumulated mask is baked
/// into the image's alpha channel permanently.
pub struct LassoTool {
    config: LassoConfig,
    mode: LassoMode,
    target: Option<LayerId>,
    path: Option<SelectionPath>,
    last_sample: Option<(Point, Instant)>,
    last_move_at: Option<Instant>,
    snapshots: SnapshotStore,
}

impl LassoTool {
    pub fn new() -> Self {
        Self::with_config(LassoConfig::default())
    }

    pub fn with_config(config: LassoConfig) -> Self {
        Self {
            config,
            mode: LassoMode::New,
            target: None,
            path: None,
            last_sample: None,
            last_move_at: None,
            snapshots: SnapshotStore::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn is_drawing(&self) -> bool {
        self.path.is_some()
    }

    pub fn mode(&self) -> LassoMode {
        self.mode
    }

    pub fn target(&self) -> Option<LayerId> {
        self.target
    }

    /// Begin a capture session on the store's active layer, locking it and
    /// snapshotting its pre-edit state.
    pub fn activate(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let id = store.active().ok_or(Error::NoActiveLayer)?;
        store.lock(id)?;
        self.target = Some(id);
        self.path = None;
        if let Some(layer) = store.get(id) {
            self.snapshots.save_once(layer);
        }
        events.emit(StatusEvent::ToolActivated {
            tool: ToolKind::Lasso,
            layer: id,
        });
        events.emit(StatusEvent::LayerLocked(id));
        Ok(())
    }

    /// End the session: commit a viable in-progress stroke, bake the
    /// accumulated mask into the image permanently, unlock.
    pub fn deactivate(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<()> {
        let Some(id) = self.target else {
            return Ok(());
        };
        if self.path.as_ref().is_some_and(|p| p.len() >= self.config.min_anchors) {
            self.end_stroke(store, events)?;
        } else {
            self.path = None;
        }
        if let Some(layer) = store.get_mut(id) {
            finalize_layer_mask(layer, events)?;
        }
        store.unlock();
        self.target = None;
        self.last_sample = None;
        self.last_move_at = None;
        events.emit(StatusEvent::LayerUnlocked(id));
        events.emit(StatusEvent::ToolDeactivated {
            tool: ToolKind::Lasso,
        });
        Ok(())
    }

    /// Switch capture mode. `Restore` acts immediately — the session
    /// snapshot is reinstated and the mode falls back to `New`.
    pub fn set_mode(
        &mut self,
        mode: LassoMode,
        store: &mut LayerStore,
        events: &mut EventQueue,
    ) -> Result<()> {
        if mode != LassoMode::Restore {
            self.mode = mode;
            return Ok(());
        }
        self.mode = LassoMode::New;
        let Some(id) = self.target else {
            return Ok(());
        };
        if let Some(layer) = store.get_mut(id) {
            if self.snapshots.restore(layer) {
                crate::log_info!("lasso: layer restored to original state");
                events.emit(StatusEvent::MaskChanged(id));
                events.emit(StatusEvent::OutputChanged);
            } else {
                crate::log_warn!("lasso: no original state recorded for restore");
            }
        }
        Ok(())
    }

    /// Pointer-down: start sampling a stroke.
    pub fn begin_stroke(&mut self, p: Point, now: Instant) -> Result<()> {
        if !self.is_active() {
            return Err(Error::NoActiveLayer);
        }
        let mut path = SelectionPath::new(MaskBlend::New);
        path.push(Anchor::new(p));
        self.path = Some(path);
        self.last_sample = Some((p, now));
        self.last_move_at = Some(now);
        Ok(())
    }

    /// Pointer-move: append a sample if it clears both the spatial and
    /// temporal gates. Returns whether an anchor was recorded.
    pub fn extend_stroke(&mut self, p: Point, now: Instant) -> bool {
        let Some(path) = self.path.as_mut() else {
            return false;
        };
        self.last_move_at = Some(now);
        if let Some((last_p, last_t)) = self.last_sample {
            if now.saturating_duration_since(last_t) < self.config.min_point_interval
                || last_p.distance(p) < self.config.min_point_distance
            {
                return false;
            }
        }
        path.push(Anchor::new(p));
        self.last_sample = Some((p, now));
        true
    }

    /// Pointer-up: close and commit the stroke into the layer mask, or
    /// drop it silently when too short. Returns whether a region was
    /// applied.
    pub fn end_stroke(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<bool> {
        let Some(mut path) = self.path.take() else {
            return Ok(false);
        };
        self.last_sample = None;
        if path.len() < self.config.min_anchors {
            crate::log_info!(
                "lasso: stroke dropped ({} anchors, need {})",
                path.len(),
                self.config.min_anchors
            );
            return Ok(false);
        }
        path.closed = true;

        let id = self.target.ok_or(Error::NoActiveLayer)?;
        let (canvas_w, canvas_h) = (store.width, store.height);
        let layer = store.get_mut(id).ok_or(Error::NoActiveLayer)?;
        let overlay = rasterizer::rasterize_path(&path, canvas_w, canvas_h, &layer.placement);

        let folded = match self.mode {
            LassoMode::New => overlay,
            LassoMode::Add | LassoMode::Subtract => {
                let blend = if self.mode == LassoMode::Add {
                    MaskBlend::Add
                } else {
                    MaskBlend::Subtract
                };
                let base = match layer.mask() {
                    Some(existing) => existing.clone(),
                    None => crate::mask::RasterMask::new(overlay.width(), overlay.height()),
                };
                base.combine(&overlay, blend)?
            }
            LassoMode::Restore => overlay, // unreachable: restore never draws
        };
        layer.set_mask(Some(folded));
        events.emit(StatusEvent::MaskChanged(id));
        Ok(true)
    }

    /// Inactivity check, called from the host's frame loop: a stroke idle
    /// past the timeout auto-commits (matching pointer-up), provided it is
    /// long enough to be valid.
    pub fn check_idle(
        &mut self,
        store: &mut LayerStore,
        events: &mut EventQueue,
        now: Instant,
    ) -> Result<bool> {
        let Some(path) = self.path.as_ref() else {
            return Ok(false);
        };
        let Some(last_move) = self.last_move_at else {
            return Ok(false);
        };
        if now.saturating_duration_since(last_move) < self.config.idle_timeout {
            return Ok(false);
        }
        if path.len() < self.config.min_anchors {
            return Ok(false);
        }
        crate::log_info!("lasso: idle stroke auto-committed");
        self.end_stroke(store, events)
    }

    /// Abandon the in-progress stroke without committing.
    pub fn cancel_stroke(&mut self) {
        self.path = None;
        self.last_sample = None;
    }

    /// Clear the target layer's transparency state: drop a live mask if
    /// one exists, otherwise flatten the image's own alpha to opaque.
    pub fn clear_mask(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<bool> {
        let Some(id) = self.target.or_else(|| store.active()) else {
            return Ok(false);
        };
        let Some(layer) = store.get_mut(id) else {
            return Ok(false);
        };
        if layer.take_mask().is_some() {
            events.emit(StatusEvent::MaskChanged(id));
        } else {
            layer.flatten_transparency();
        }
        events.emit(StatusEvent::OutputChanged);
        Ok(true)
    }
}

impl Default for LassoTool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    fn test_config() -> LassoConfig {
        LassoConfig {
            min_point_distance: 0.0,
            min_point_interval: Duration::ZERO,
            idle_timeout: Duration::from_millis(500),
            min_anchors: 5,
        }
    }

    /// 100×100 canvas with a single opaque 100×100 layer at the origin.
    fn store_and_tool() -> (LayerStore, LassoTool, EventQueue) {
        let mut store = LayerStore::new(100, 100);
        store.add_matted_layer(
            RgbaImage::from_pixel(100, 100, Rgba([80, 80, 80, 255])),
            None,
        );
        (store, LassoTool::with_config(test_config()), EventQueue::new())
    }

    /// Trace the left half of the canvas with plenty of anchors.
    fn trace_left_half(tool: &mut LassoTool, now: Instant) {
        tool.begin_stroke(Point::new(0.0, 0.0), now).unwrap();
        for i in 1..=12 {
            tool.extend_stroke(Point::new(50.0 * i as f32 / 12.0, 0.0), now);
        }
        for i in 1..=12 {
            tool.extend_stroke(Point::new(50.0, 100.0 * i as f32 / 12.0), now);
        }
        for i in 1..=12 {
            tool.extend_stroke(Point::new(50.0 - 50.0 * i as f32 / 12.0, 100.0), now);
        }
    }

    #[test]
    fn activate_requires_an_active_layer() {
        let mut store = LayerStore::new(64, 64);
        let mut tool = LassoTool::new();
        let mut events = EventQueue::new();
        assert!(matches!(
            tool.activate(&mut store, &mut events),
            Err(Error::NoActiveLayer)
        ));
    }

    #[test]
    fn activation_locks_the_layer() {
        let mut store = LayerStore::new(100, 100);
        let first = store.add_matted_layer(
            RgbaImage::from_pixel(100, 100, Rgba([80, 80, 80, 255])),
            None,
        );
        let other = store.add_matted_layer(
            RgbaImage::from_pixel(10, 10, Rgba([1, 1, 1, 255])),
            None,
        );
        store.set_selected(Some(first)).unwrap();
        let mut tool = LassoTool::with_config(test_config());
        let mut events = EventQueue::new();

        tool.activate(&mut store, &mut events).unwrap();
        assert_eq!(store.locked(), Some(first));
        assert!(matches!(
            store.set_selected(Some(other)),
            Err(Error::LayerLocked)
        ));
        tool.deactivate(&mut store, &mut events).unwrap();
        assert_eq!(store.locked(), None);
        store.set_selected(Some(other)).unwrap();
    }

    #[test]
    fn add_mode_left_half_yields_half_mask() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        tool.set_mode(LassoMode::Add, &mut store, &mut events).unwrap();

        let now = Instant::now();
        trace_left_half(&mut tool, now);
        assert!(tool.end_stroke(&mut store, &mut events).unwrap());

        let id = tool.target().unwrap();
        let layer = store.get(id).unwrap();
        let mask = layer.mask().expect("mask applied");
        for y in (5..95).step_by(15) {
            for x in (0..100).step_by(5) {
                let v = mask.get(x, y);
                if x < 48 {
                    assert!(v > 0.9, "expected coverage at ({x},{y}), got {v}");
                } else if x > 52 {
                    assert!(v < 0.1, "expected none at ({x},{y}), got {v}");
                }
            }
        }
        assert!(events.contains(&StatusEvent::MaskChanged(id)));
    }

    #[test]
    fn short_strokes_drop_silently() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        let now = Instant::now();
        tool.begin_stroke(Point::new(10.0, 10.0), now).unwrap();
        tool.extend_stroke(Point::new(20.0, 10.0), now);
        tool.extend_stroke(Point::new(20.0, 20.0), now);
        assert!(!tool.end_stroke(&mut store, &mut events).unwrap());
        let layer = store.get(tool.target().unwrap()).unwrap();
        assert!(!layer.has_mask());
    }

    #[test]
    fn sampling_gates_bound_anchor_count() {
        let (mut store, _, mut events) = store_and_tool();
        let config = LassoConfig {
            min_point_distance: 5.0,
            min_point_interval: Duration::ZERO,
            ..test_config()
        };
        let mut tool = LassoTool::with_config(config);
        tool.activate(&mut store, &mut events).unwrap();
        let now = Instant::now();
        tool.begin_stroke(Point::new(0.0, 0.0), now).unwrap();
        // 1-unit steps: only every 5th sample survives the distance gate.
        let mut accepted = 0;
        for i in 1..=20 {
            if tool.extend_stroke(Point::new(i as f32, 0.0), now) {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 4);
    }

    #[test]
    fn subtract_carves_out_of_existing_mask() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        let now = Instant::now();

        // Full-canvas selection in New mode...
        tool.begin_stroke(Point::new(0.0, 0.0), now).unwrap();
        for p in [
            (100.0, 0.0),
            (100.0, 100.0),
            (0.0, 100.0),
            (0.0, 50.0),
            (0.0, 10.0),
        ] {
            tool.extend_stroke(Point::new(p.0, p.1), now);
        }
        tool.end_stroke(&mut store, &mut events).unwrap();

        // ...then subtract the left half.
        tool.set_mode(LassoMode::Subtract, &mut store, &mut events)
            .unwrap();
        trace_left_half(&mut tool, now);
        tool.end_stroke(&mut store, &mut events).unwrap();

        let layer = store.get(tool.target().unwrap()).unwrap();
        let mask = layer.mask().unwrap();
        assert!(mask.get(20, 50) < 0.1);
        assert!(mask.get(80, 50) > 0.9);
    }

    #[test]
    fn deactivate_merges_mask_permanently() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        tool.set_mode(LassoMode::New, &mut store, &mut events).unwrap();
        let id = tool.target().unwrap();

        let now = Instant::now();
        trace_left_half(&mut tool, now);
        tool.end_stroke(&mut store, &mut events).unwrap();
        tool.deactivate(&mut store, &mut events).unwrap();

        let layer = store.get(id).unwrap();
        assert!(!layer.has_mask(), "mask baked into pixels");
        assert_eq!(layer.image.get_pixel(20, 50)[3], 255);
        assert_eq!(layer.image.get_pixel(80, 50)[3], 0);
        assert!(events.contains(&StatusEvent::MaskMerged(id)));
        assert!(events.contains(&StatusEvent::OutputChanged));
    }

    #[test]
    fn restore_reinstates_pre_session_state_and_reverts_mode() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        let id = tool.target().unwrap();
        let now = Instant::now();
        trace_left_half(&mut tool, now);
        tool.end_stroke(&mut store, &mut events).unwrap();
        assert!(store.get(id).unwrap().has_mask());

        tool.set_mode(LassoMode::Restore, &mut store, &mut events)
            .unwrap();
        assert_eq!(tool.mode(), LassoMode::New);
        assert!(!store.get(id).unwrap().has_mask());
        assert!(events.contains(&StatusEvent::OutputChanged));
    }

    #[test]
    fn idle_stroke_auto_commits() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        let t0 = Instant::now();
        trace_left_half(&mut tool, t0);
        // Not yet idle.
        assert!(!tool.check_idle(&mut store, &mut events, t0).unwrap());
        // Well past the timeout.
        let later = t0 + Duration::from_millis(600);
        assert!(tool.check_idle(&mut store, &mut events, later).unwrap());
        assert!(!tool.is_drawing());
        assert!(store.get(tool.target().unwrap()).unwrap().has_mask());
    }

    #[test]
    fn clear_mask_drops_live_mask_then_flattens() {
        let (mut store, mut tool, mut events) = store_and_tool();
        tool.activate(&mut store, &mut events).unwrap();
        let id = tool.target().unwrap();
        let now = Instant::now();
        trace_left_half(&mut tool, now);
        tool.end_stroke(&mut store, &mut events).unwrap();

        // First clear drops the live mask.
        assert!(tool.clear_mask(&mut store, &mut events).unwrap());
        assert!(!store.get(id).unwrap().has_mask());

        // Second clear flattens image transparency.
        let layer = store.get_mut(id).unwrap();
        layer.image = std::sync::Arc::new(RgbaImage::from_pixel(
            100,
            100,
            Rgba([5, 5, 5, 30]),
        ));
        assert!(tool.clear_mask(&mut store, &mut events).unwrap());
        assert!(store.get(id).unwrap().image.pixels().all(|p| p[3] == 255));
    }
}

// ============================================================================
// PEN — bezier anchor/control-point selection capture
// ============================================================================
//
// A superset of the lasso's state machine: paths are placed anchor by
// anchor (click = corner, click-drag = smooth joint with symmetric
// handles), may be broken off and resumed later from an endpoint, edited
// in place, and are tagged individually with a mask blend mode. Completion
// rasterizes every path, folds the blend groups in fixed precedence, and
// bakes the result into the layer's alpha channel.

use crate::canvas::{LayerId, LayerStore};
use crate::error::{Error, Result};
use crate::events::{EventQueue, StatusEvent, ToolKind};
use crate::geometry::Point;
use crate::mask::{MaskBlend, RasterMask};
use crate::path::{Anchor, ControlSide, SelectionPath};
use crate::rasterizer;
use crate::tools::finalize_layer_mask;

/// Default distance of reset control handles from their anchor.
const RESET_HANDLE_DISTANCE: f32 = 50.0;

/// Pen path lifecycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum PathState {
    /// No path in progress.
    #[default]
    Ready,
    /// Anchors are being placed; the preview line follows the pointer.
    Drawing,
    /// Drawing suspended mid-path; a click resumes it.
    Paused,
    /// The live preview is disconnected; the path waits for a resume or
    /// for completion.
    Broken,
    /// Drawing suspended to drag existing anchors and handles.
    Editing,
}

#[derive(Clone, Copy, Debug)]
pub struct PenConfig {
    /// Pointer travel beyond which a press becomes a handle drag.
    pub drag_threshold: f32,
    /// Paths shorter than this never rasterize.
    pub min_anchors: usize,
}

impl Default for PenConfig {
    fn default() -> Self {
        Self {
            drag_threshold: 3.0,
            min_anchors: 2,
        }
    }
}

/// Which stored path an edit-mode grab landed on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum PathSlot {
    Current,
    Broken(usize),
}

#[derive(Clone, Copy, Debug)]
struct Grab {
    slot: PathSlot,
    anchor: usize,
    /// `None` grabs the anchor itself (handles ride along); `Some` grabs
    /// one handle independently, breaking its symmetry.
    control: Option<ControlSide>,
}

/// Bezier selection tool.
pub struct PenTool {
    config: PenConfig,
    state: PathState,
    blend: MaskBlend,
    target: Option<LayerId>,
    current: Option<SelectionPath>,
    broken: Vec<SelectionPath>,
    preview_active: bool,

    // click-vs-drag staging between pointer-down and pointer-up
    pending: Option<Anchor>,
    down_at: Option<Point>,
    drag_creating: bool,

    // edit-mode grab
    grab: Option<Grab>,
    grab_last: Option<Point>,
}

impl PenTool {
    pub fn new() -> Self {
        Self::with_config(PenConfig::default())
    }

    pub fn with_config(config: PenConfig) -> Self {
        Self {
            config,
            state: PathState::Ready,
            blend: MaskBlend::Add,
            target: None,
            current: None,
            broken: Vec::new(),
            preview_active: false,
            pending: None,
            down_at: None,
            drag_creating: false,
            grab: None,
            grab_last: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.target.is_some()
    }

    pub fn state(&self) -> PathState {
        self.state
    }

    pub fn blend(&self) -> MaskBlend {
        self.blend
    }

    pub fn target(&self) -> Option<LayerId> {
        self.target
    }

    pub fn current_path(&self) -> Option<&SelectionPath> {
        self.current.as_ref()
    }

    pub fn broken_paths(&self) -> &[SelectionPath] {
        &self.broken
    }

    /// Set the blend mode for the path being drawn (and for subsequent
    /// ones). Only add/subtract/intersect/replace are pen modes; anything
    /// else is ignored.
    pub fn set_blend(&mut self, blend: MaskBlend) -> bool {
        if !matches!(
            blend,
            MaskBlend::Add | MaskBlend::Subtract | MaskBlend::Intersect | MaskBlend::Replace
        ) {
            crate::log_warn!("pen: blend mode {:?} not valid for pen paths", blend);
            return false;
        }
        self.blend = blend;
        if let Some(path) = self.current.as_mut() {
            path.blend = blend;
        }
        true
    }

    /// Begin a capture session on the store's active layer, locking it.
    pub fn activate(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let id = store.active().ok_or(Error::NoActiveLayer)?;
        store.lock(id)?;
        self.target = Some(id);
        self.state = PathState::Ready;
        events.emit(StatusEvent::ToolActivated {
            tool: ToolKind::Pen,
            layer: id,
        });
        events.emit(StatusEvent::LayerLocked(id));
        Ok(())
    }

    /// End the session. Any live or broken paths are completed and the
    /// resulting mask merged permanently before the layer unlocks.
    pub fn deactivate(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<()> {
        let Some(id) = self.target else {
            return Ok(());
        };
        let has_paths = self.current.as_ref().is_some_and(|p| !p.is_empty())
            || !self.broken.is_empty();
        if has_paths {
            self.finish_path(store, events)?;
        }
        self.reset_path_state();
        store.unlock();
        self.target = None;
        events.emit(StatusEvent::LayerUnlocked(id));
        events.emit(StatusEvent::ToolDeactivated {
            tool: ToolKind::Pen,
        });
        Ok(())
    }

    // -- pointer input ------------------------------------------------------

    /// Pointer-down. In edit mode this grabs an anchor or handle; in the
    /// drawing states it stages an anchor whose kind (corner vs smooth) is
    /// decided by whether the pointer drags before release.
    pub fn pointer_down(&mut self, p: Point) {
        if !self.is_active() {
            return;
        }
        if self.state == PathState::Editing {
            self.grab = self.hit_test_grab(p);
            self.grab_last = self.grab.map(|_| p);
            return;
        }

        self.pending = Some(Anchor::new(p));
        self.down_at = Some(p);
        self.drag_creating = false;
        match self.state {
            PathState::Paused | PathState::Broken => {
                // Click resumes the suspended path.
                self.state = PathState::Drawing;
                self.preview_active = true;
            }
            _ => {}
        }
    }

    /// Pointer-move. Drives edit-mode drags and drag-creation of smooth
    /// anchors.
    pub fn pointer_move(&mut self, p: Point) {
        if self.state == PathState::Editing {
            self.drag_grabbed(p);
            return;
        }

        let Some(down) = self.down_at else {
            return;
        };
        if !self.drag_creating {
            if down.distance(p) <= self.config.drag_threshold {
                return;
            }
            // Crossed the threshold: this press creates a smooth anchor.
            // Commit it now and keep live-updating its handles.
            self.drag_creating = true;
            if let Some(mut anchor) = self.pending.take() {
                anchor.set_symmetric_handles(p);
                self.commit_anchor(anchor);
            }
        } else if let Some(path) = self.current.as_mut() {
            if let Some(last) = path.anchors.last_mut() {
                last.set_symmetric_handles(p);
            }
        }
    }

    /// Pointer-up. A press that never crossed the drag threshold commits
    /// as a plain corner anchor.
    pub fn pointer_up(&mut self, _p: Point) {
        if self.state == PathState::Editing {
            // Keep the grab (for delete-node) but stop dragging it.
            self.grab_last = None;
            return;
        }
        if !self.drag_creating {
            if let Some(anchor) = self.pending.take() {
                self.commit_anchor(anchor);
            }
        }
        self.pending = None;
        self.down_at = None;
        self.drag_creating = false;
    }

    /// Double-click dispatch:
    /// * edit mode — reset the clicked anchor's handles;
    /// * endpoint of a broken path — resume drawing it (restoring its
    ///   blend mode);
    /// * endpoint of the current path — toggle the live preview off
    ///   (into edit mode) or back on;
    /// * anywhere else — complete every path.
    pub fn double_click(
        &mut self,
        p: Point,
        store: &mut LayerStore,
        events: &mut EventQueue,
    ) -> Result<()> {
        if self.state == PathState::Editing {
            if let Some(grab) = self.hit_test_grab(p) {
                if grab.control.is_none() {
                    if let Some(anchor) = self.anchor_mut(grab.slot, grab.anchor) {
                        if anchor.is_smooth() {
                            let toward = anchor.pos.offset(RESET_HANDLE_DISTANCE, 0.0);
                            anchor.set_symmetric_handles(toward);
                        }
                    }
                }
            }
            return Ok(());
        }

        if self.resume_broken_at(p) {
            return Ok(());
        }

        if let Some(path) = self.current.as_ref() {
            if path.endpoint_at(p).is_some() {
                self.toggle_preview();
                return Ok(());
            }
        }

        self.finish_path(store, events)?;
        Ok(())
    }

    // -- path state management ---------------------------------------------

    /// Detach the current path from the live preview and shelve it with
    /// its blend mode. Multiple broken paths accumulate until completion.
    pub fn break_current(&mut self) {
        if let Some(path) = self.current.take() {
            if !path.is_empty() {
                crate::log_info!(
                    "pen: path broken ({} anchors, {} mode)",
                    path.len(),
                    path.blend.label()
                );
                self.broken.push(path);
            }
        }
        self.state = PathState::Ready;
        self.preview_active = false;
    }

    /// Resume a broken path whose endpoint lies under `p`. The path's own
    /// blend mode becomes current again.
    fn resume_broken_at(&mut self, p: Point) -> bool {
        let Some(index) = self
            .broken
            .iter()
            .position(|path| path.endpoint_at(p).is_some())
        else {
            return false;
        };
        // An in-progress path is shelved before the resumed one takes over.
        if self.current.as_ref().is_some_and(|c| !c.is_empty()) {
            self.break_current();
        }
        let path = self.broken.remove(index);
        self.blend = path.blend;
        self.current = Some(path);
        self.state = PathState::Drawing;
        self.preview_active = true;
        crate::log_info!("pen: resumed broken path ({} mode)", self.blend.label());
        true
    }

    /// Space-bar pause toggle: suspend the preview mid-path, resume later.
    pub fn toggle_pause(&mut self) {
        match self.state {
            PathState::Drawing if self.current.is_some() => {
                self.state = PathState::Paused;
                self.preview_active = false;
            }
            PathState::Paused => {
                self.state = PathState::Drawing;
                self.preview_active = true;
            }
            _ => {}
        }
    }

    /// Toggle the preview line: off shelves the state as `Broken` and
    /// drops into edit mode for adjustment; on resumes drawing.
    fn toggle_preview(&mut self) {
        if self.preview_active {
            self.preview_active = false;
            self.state = PathState::Editing;
        } else if self.current.is_some() {
            self.preview_active = true;
            self.state = PathState::Drawing;
        }
    }

    pub fn enter_edit_mode(&mut self) {
        if self.state != PathState::Editing {
            self.state = PathState::Editing;
            self.preview_active = false;
        }
    }

    /// Leave edit mode. A surviving current path parks as `Broken`
    /// (awaiting a resume click); otherwise the tool is ready for a new
    /// path.
    pub fn exit_edit_mode(&mut self) {
        if self.state != PathState::Editing {
            return;
        }
        self.grab = None;
        self.grab_last = None;
        self.state = if self.current.as_ref().is_some_and(|p| !p.is_empty()) {
            PathState::Broken
        } else {
            PathState::Ready
        };
    }

    pub fn toggle_edit_mode(&mut self) {
        if self.state == PathState::Editing {
            self.exit_edit_mode();
        } else {
            self.enter_edit_mode();
        }
    }

    /// `D` while drawing: drop the most recent anchor; an empty path is
    /// cancelled outright.
    pub fn undo_last_anchor(&mut self) {
        let Some(path) = self.current.as_mut() else {
            return;
        };
        if path.len() <= 1 {
            self.cancel_path();
        } else {
            path.anchors.pop();
        }
    }

    /// `D` in edit mode: delete the grabbed anchor. Paths keep a
    /// two-anchor minimum; a too-short current path is cancelled instead.
    pub fn delete_grabbed(&mut self) {
        let Some(grab) = self.grab.take() else {
            return;
        };
        let Some(path) = self.path_mut(grab.slot) else {
            return;
        };
        if path.len() > 2 {
            path.anchors.remove(grab.anchor);
        } else if grab.slot == PathSlot::Current {
            self.cancel_path();
        }
    }

    /// Escape: abandon the in-progress path (broken paths survive).
    pub fn cancel_path(&mut self) {
        self.current = None;
        self.state = PathState::Ready;
        self.preview_active = false;
        self.pending = None;
        self.down_at = None;
        self.drag_creating = false;
    }

    // -- completion ---------------------------------------------------------

    /// Complete the session's paths: the current path plus every broken
    /// one, grouped by blend mode, each group rasterized independently and
    /// folded into the layer mask in fixed precedence
    /// replace → add → intersect → subtract. The folded mask is then baked
    /// into the image alpha and all path state clears.
    ///
    /// With no usable paths this is a silent no-op (`Ok(false)`).
    pub fn finish_path(&mut self, store: &mut LayerStore, events: &mut EventQueue) -> Result<bool> {
        let mut paths: Vec<SelectionPath> = Vec::new();
        if let Some(mut path) = self.current.take() {
            if path.len() >= self.config.min_anchors {
                path.closed = true;
                paths.push(path);
            }
        }
        for mut path in self.broken.drain(..) {
            if path.len() >= self.config.min_anchors {
                path.closed = true;
                paths.push(path);
            }
        }
        if paths.is_empty() {
            self.reset_path_state();
            return Ok(false);
        }

        let id = self.target.ok_or(Error::NoActiveLayer)?;
        let (canvas_w, canvas_h) = (store.width, store.height);
        let layer = store.get_mut(id).ok_or(Error::NoActiveLayer)?;
        let (mask_w, mask_h) = layer.mask_dimensions();

        let group = |mode: MaskBlend| -> Vec<&SelectionPath> {
            paths.iter().filter(|p| p.blend == mode).collect()
        };
        let subtract_group = group(MaskBlend::Subtract);

        // With no existing mask, a subtract-only edit needs full coverage
        // to carve from; everything else builds up from empty.
        let mut folded = match layer.mask() {
            Some(existing) => existing.clone(),
            None => {
                let fill = if subtract_group.is_empty() { 0.0 } else { 1.0 };
                RasterMask::filled(mask_w, mask_h, fill)
            }
        };

        for mode in [
            MaskBlend::Replace,
            MaskBlend::Add,
            MaskBlend::Intersect,
            MaskBlend::Subtract,
        ] {
            let members = group(mode);
            if members.is_empty() {
                continue;
            }
            let overlay =
                rasterizer::rasterize_paths(&members, canvas_w, canvas_h, &layer.placement);
            folded = match mode {
                MaskBlend::Replace => overlay,
                _ => folded.combine(&overlay, mode)?,
            };
        }

        crate::log_info!("pen: {} paths folded into mask", paths.len());
        layer.set_mask(Some(folded));
        events.emit(StatusEvent::MaskChanged(id));
        finalize_layer_mask(layer, events)?;

        self.reset_path_state();
        Ok(true)
    }

    fn reset_path_state(&mut self) {
        self.current = None;
        self.broken.clear();
        self.state = PathState::Ready;
        self.preview_active = false;
        self.pending = None;
        self.down_at = None;
        self.drag_creating = false;
        self.grab = None;
        self.grab_last = None;
    }

    // -- internals ----------------------------------------------------------

    /// Append an anchor, opening a new path first when none is live.
    fn commit_anchor(&mut self, anchor: Anchor) {
        let path = self.current.get_or_insert_with(|| SelectionPath::new(self.blend));
        path.push(anchor);
        self.state = PathState::Drawing;
        self.preview_active = true;
    }

    /// Anchor hits win over control-point hits; the current path is
    /// checked before broken ones.
    fn hit_test_grab(&self, p: Point) -> Option<Grab> {
        let slots = std::iter::once((PathSlot::Current, self.current.as_ref()))
            .chain(
                self.broken
                    .iter()
                    .enumerate()
                    .map(|(i, path)| (PathSlot::Broken(i), Some(path))),
            );
        for (slot, path) in slots {
            let Some(path) = path else { continue };
            if let Some(anchor) = path.anchor_at(p) {
                return Some(Grab {
                    slot,
                    anchor,
                    control: None,
                });
            }
            if let Some((anchor, side)) = path.control_at(p) {
                return Some(Grab {
                    slot,
                    anchor,
                    control: Some(side),
                });
            }
        }
        None
    }

    fn path_mut(&mut self, slot: PathSlot) -> Option<&mut SelectionPath> {
        match slot {
            PathSlot::Current => self.current.as_mut(),
            PathSlot::Broken(i) => self.broken.get_mut(i),
        }
    }

    fn anchor_mut(&mut self, slot: PathSlot, index: usize) -> Option<&mut Anchor> {
        self.path_mut(slot)?.anchors.get_mut(index)
    }

    /// Apply an edit-mode drag delta: a grabbed anchor carries its handles
    /// with it; a grabbed handle moves alone.
    fn drag_grabbed(&mut self, p: Point) {
        let Some(grab) = self.grab else { return };
        let Some(last) = self.grab_last else { return };
        let dx = p.x - last.x;
        let dy = p.y - last.y;
        self.grab_last = Some(p);
        let Some(anchor) = self.anchor_mut(grab.slot, grab.anchor) else {
            return;
        };
        match grab.control {
            None => anchor.translate(dx, dy),
            Some(ControlSide::In) => {
                if let Some(cp) = anchor.cp1.as_mut() {
                    *cp = cp.offset(dx, dy);
                }
            }
            Some(ControlSide::Out) => {
                if let Some(cp) = anchor.cp2.as_mut() {
                    *cp = cp.offset(dx, dy);
                }
            }
        }
    }
}

impl Default for PenTool {
    fn default() -> Self {
        Self::new()
    }
}

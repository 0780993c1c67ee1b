// ============================================================================
// ORIGINAL-STATE SNAPSHOTS — one pre-edit capture per layer per session
// ============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;

use crate::canvas::{Layer, LayerId};
use crate::mask::RasterMask;

/// A layer's pixels and mask as they were before the first edit of the
/// current capture session. Not an undo stack — a single restore point for
/// the explicit "restore" action. The image is shared, not copied: layers
/// never mutate pixels in place, so the `Arc` stays valid.
pub struct OriginalState {
    pub image: Arc<RgbaImage>,
    pub mask: Option<RasterMask>,
}

/// Per-layer snapshot storage, keyed by stable layer identity.
#[derive(Default)]
pub struct SnapshotStore {
    states: HashMap<LayerId, OriginalState>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Capture a snapshot unless one already exists for this layer —
    /// only the state before the *first* edit of a session is kept.
    pub fn save_once(&mut self, layer: &Layer) {
        self.states.entry(layer.id).or_insert_with(|| OriginalState {
            image: Arc::clone(&layer.image),
            mask: layer.mask().cloned(),
        });
    }

    pub fn has(&self, id: LayerId) -> bool {
        self.states.contains_key(&id)
    }

    /// Reinstate a layer's snapshot. The snapshot stays stored so the
    /// action can be repeated after further edits. Returns `false` when no
    /// snapshot exists.
    pub fn restore(&self, layer: &mut Layer) -> bool {
        let Some(state) = self.states.get(&layer.id) else {
            return false;
        };
        layer.image = Arc::clone(&state.image);
        layer.set_mask(state.mask.clone());
        true
    }

    pub fn forget(&mut self, id: LayerId) {
        self.states.remove(&id);
    }

    pub fn clear(&mut self) {
        self.states.clear();
    }
}

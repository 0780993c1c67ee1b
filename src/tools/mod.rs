// ============================================================================
// SELECTION CAPTURE TOOLS — lasso (freehand) and pen (bezier)
// ============================================================================

pub mod lasso;
pub mod pen;

pub use lasso::{LassoConfig, LassoMode, LassoTool};
pub use pen::{PathState, PenConfig, PenTool};

use crate::canvas::Layer;
use crate::error::Result;
use crate::events::{EventQueue, StatusEvent};

/// Shared tail of both tools' deactivation: bake the accumulated mask into
/// the layer's alpha channel and announce the permanent edit. Runs once per
/// capture session, after every pending path has been resolved — never
/// per-path.
pub(crate) fn finalize_layer_mask(layer: &mut Layer, events: &mut EventQueue) -> Result<bool> {
    if layer.merge_mask_into_alpha()? {
        events.emit(StatusEvent::MaskMerged(layer.id));
        events.emit(StatusEvent::OutputChanged);
        Ok(true)
    } else {
        Ok(false)
    }
}

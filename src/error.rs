//! Error taxonomy for the engine.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Top-level engine error.
///
/// Capture-path errors are recoverable: tools reset to their ready state
/// instead of poisoning the session.
#[derive(Error, Debug)]
pub enum Error {
    /// A selection path ended with too few anchors to form a region.
    /// Callers treat this as a silent no-op rather than surfacing it.
    #[error("selection has {got} anchors, need at least {required}")]
    InvalidSelection { got: usize, required: usize },

    /// Two masks (or a mask and an image) with different dimensions were
    /// combined. Fatal to that operation; the caller must resize or
    /// recreate one side.
    #[error("dimension mismatch: expected {expected_w}x{expected_h}, got {got_w}x{got_h}")]
    DimensionMismatch {
        expected_w: u32,
        expected_h: u32,
        got_w: u32,
        got_h: u32,
    },

    /// A capture tool was activated with no valid image layer selected.
    #[error("no valid image layer is selected")]
    NoActiveLayer,

    /// A selection change was rejected because a capture tool holds the
    /// layer lock.
    #[error("layer is locked by an active capture tool")]
    LayerLocked,

    /// A layer transform with zero area. The 20-unit resize floor keeps
    /// this from occurring through the public API.
    #[error("layer transform is singular (zero width or height)")]
    TransformSingular,

    /// A tensor payload whose shape and data disagree.
    #[error("invalid tensor: {0}")]
    InvalidTensor(String),

    /// Encoding a composite or mask image failed.
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),

    /// The persistence sink rejected a save. In-memory state is kept;
    /// the caller may retry.
    #[error("persistence failed: {0}")]
    Persistence(String),
}

impl Error {
    /// Helper for the common (w, h) pair form of `DimensionMismatch`.
    pub fn dimensions(expected: (u32, u32), got: (u32, u32)) -> Self {
        Error::DimensionMismatch {
            expected_w: expected.0,
            expected_h: expected.1,
            got_w: got.0,
            got_h: got.1,
        }
    }
}

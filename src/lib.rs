//! layerforge — a layer transform & mask-compositing engine.
//!
//! Raster images are composited as independently movable, rotatable,
//! scalable layers; per-layer transparency is carved with freehand
//! ([`tools::LassoTool`]) or bezier ([`tools::PenTool`]) vector
//! selections. Selections are captured in canvas space, rasterized into
//! the target layer's local space, combined under boolean blend policies,
//! and finally baked permanently into the image's alpha channel.
//!
//! The crate is UI-agnostic: it renders into `image` pixel buffers,
//! reports through a [`events::StatusEvent`] queue, and hands encoded
//! composites to a host-supplied [`io::CompositeSink`]. The model is
//! single-threaded and event-driven — every operation runs to completion
//! on its event; `rayon` only parallelizes pixel loops inside an
//! operation.

#[macro_use]
pub mod logger;

pub mod canvas;
pub mod error;
pub mod events;
pub mod geometry;
pub mod history;
pub mod io;
pub mod mask;
pub mod path;
pub mod rasterizer;
pub mod render;
pub mod tensor;
pub mod tools;

pub use canvas::{BlendMode, Layer, LayerId, LayerStore};
pub use error::{Error, Result};
pub use events::{EventQueue, StatusEvent};
pub use geometry::{Handle, Placement, Point};
pub use mask::{MaskBlend, RasterMask};
pub use path::{Anchor, SelectionPath};
pub use render::FrameScheduler;
pub use tools::{LassoMode, LassoTool, PenTool};

// ============================================================================
// RENDER PIPELINE — z-ordered software compositor + frame scheduler
// ============================================================================

use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{Layer, LayerStore, blend_pixel};
use crate::geometry::{Point, ROTATE_HANDLE_OFFSET};

/// Default frame interval (~60 fps).
pub const FRAME_INTERVAL: Duration = Duration::from_micros(16_667);

const SELECTION_COLOR: Rgba<u8> = Rgba([0, 255, 0, 255]);
const CENTER_HANDLE_COLOR: Rgba<u8> = Rgba([255, 255, 0, 255]);
const ROTATE_HANDLE_COLOR: Rgba<u8> = Rgba([0, 255, 255, 255]);
const HANDLE_RADIUS: i32 = 4;
const DASH_ON: f32 = 5.0;
const DASH_PERIOD: f32 = 10.0;

// ---------------------------------------------------------------------------
//  Frame scheduler
// ---------------------------------------------------------------------------

/// Coalescing redraw scheduler.
///
/// Mutations call [`request_redraw`](Self::request_redraw) as often as they
/// like; the host's frame loop calls [`take_frame`](Self::take_frame) each
/// tick and renders only when it returns `true`. Bursts of requests
/// collapse into a single dirty flag, at most one frame runs per interval,
/// and dirtiness raised while a frame is in flight survives into the next
/// tick — the trailing redraw is guaranteed, never lost.
pub struct FrameScheduler {
    interval: Duration,
    dirty: bool,
    last_frame: Option<Instant>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::with_interval(FRAME_INTERVAL)
    }

    pub fn with_interval(interval: Duration) -> Self {
        Self {
            interval,
            dirty: false,
            last_frame: None,
        }
    }

    /// Mark the output stale. Cheap and idempotent.
    pub fn request_redraw(&mut self) {
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Returns `true` when a frame should render now, consuming the dirty
    /// flag. Returns `false` while clean or still inside the frame
    /// interval (the dirty flag is kept, so the redraw fires on a later
    /// tick).
    pub fn take_frame(&mut self, now: Instant) -> bool {
        if !self.dirty {
            return false;
        }
        if let Some(last) = self.last_frame {
            if now.saturating_duration_since(last) < self.interval {
                return false;
            }
        }
        self.dirty = false;
        self.last_frame = Some(now);
        true
    }
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
//  Compositor
// ---------------------------------------------------------------------------

/// Composite every layer in ascending z order over a transparent
/// background. This is the display image minus decorations.
pub fn composite(store: &LayerStore) -> RgbaImage {
    composite_over(store, Rgba([0, 0, 0, 0]))
}

/// Composite over opaque white — the export path (persistence consumes
/// this; selection decorations never appear here).
pub fn composite_over_white(store: &LayerStore) -> RgbaImage {
    composite_over(store, Rgba([255, 255, 255, 255]))
}

fn composite_over(store: &LayerStore, background: Rgba<u8>) -> RgbaImage {
    let mut target = RgbaImage::from_pixel(store.width, store.height, background);
    for layer in store.layers_by_z() {
        draw_layer(&mut target, layer);
    }
    target
}

/// Display-path composite: layers, then selection decorations for every
/// selected layer.
pub fn composite_with_decorations(store: &LayerStore) -> RgbaImage {
    let mut target = composite(store);
    for &id in store.selected_ids() {
        if let Some(layer) = store.get(id) {
            draw_selection_frame(&mut target, layer);
        }
    }
    target
}

/// Draw one layer under its center/rotation transform with mask, blend
/// mode and opacity applied. Gather style: each canvas pixel inside the
/// rotated bounding box is mapped back into the layer and the source is
/// bilinear-sampled there, so the exact inverse of this mapping is what
/// the rasterizer uses to bring selections into layer space.
fn draw_layer(target: &mut RgbaImage, layer: &Layer) {
    let pl = &layer.placement;
    if pl.width <= 0.0 || pl.height <= 0.0 || layer.opacity <= 0.0 {
        return;
    }

    // Canvas-space AABB of the rotated box, clipped to the target.
    let hw = pl.width / 2.0;
    let hh = pl.height / 2.0;
    let corners = [
        pl.to_canvas(Point::new(-hw, -hh)),
        pl.to_canvas(Point::new(hw, -hh)),
        pl.to_canvas(Point::new(hw, hh)),
        pl.to_canvas(Point::new(-hw, hh)),
    ];
    let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min);
    let max_x = corners.iter().map(|p| p.x).fold(f32::NEG_INFINITY, f32::max);
    let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min);
    let max_y = corners.iter().map(|p| p.y).fold(f32::NEG_INFINITY, f32::max);

    let x0 = (min_x.floor().max(0.0)) as u32;
    let y0 = (min_y.floor().max(0.0)) as u32;
    let x1 = (max_x.ceil().min(target.width() as f32)) as u32;
    let y1 = (max_y.ceil().min(target.height() as f32)) as u32;
    if x0 >= x1 || y0 >= y1 {
        return;
    }

    let width = target.width() as usize;
    let sx = layer.image.width() as f32 / pl.width;
    let sy = layer.image.height() as f32 / pl.height;
    let mode = layer.blend_mode;
    let opacity = layer.opacity;

    target
        .par_chunks_mut(width * 4)
        .enumerate()
        .filter(|(y, _)| *y >= y0 as usize && *y < y1 as usize)
        .for_each(|(y, row)| {
            for x in x0 as usize..x1 as usize {
                let canvas = Point::new(x as f32 + 0.5, y as f32 + 0.5);
                let local = pl.to_local(canvas);
                if !pl.contains_local(local) {
                    continue;
                }
                // Offset from the layer's top-left in displayed units.
                let dx = local.x + hw;
                let dy = local.y + hh;
                let mut px = sample_bilinear(&layer.image, dx * sx, dy * sy);
                if let Some(mask) = layer.mask() {
                    let m = mask.sample(dx, dy);
                    px[3] = (px[3] as f32 * m).round().clamp(0.0, 255.0) as u8;
                }
                let offset = x * 4;
                let base = Rgba([
                    row[offset],
                    row[offset + 1],
                    row[offset + 2],
                    row[offset + 3],
                ]);
                let out = blend_pixel(base, Rgba(px), mode, opacity);
                row[offset..offset + 4].copy_from_slice(&out.0);
            }
        });
}

/// Bilinear RGBA sample with clamp-to-edge addressing.
fn sample_bilinear(img: &RgbaImage, x: f32, y: f32) -> [u8; 4] {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return [0; 4];
    }
    let fx = (x - 0.5).clamp(0.0, (w - 1) as f32);
    let fy = (y - 0.5).clamp(0.0, (h - 1) as f32);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let wx = fx - x0 as f32;
    let wy = fy - y0 as f32;

    let p00 = img.get_pixel(x0, y0).0;
    let p10 = img.get_pixel(x1, y0).0;
    let p01 = img.get_pixel(x0, y1).0;
    let p11 = img.get_pixel(x1, y1).0;

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] as f32 * (1.0 - wx) + p10[c] as f32 * wx;
        let bottom = p01[c] as f32 * (1.0 - wx) + p11[c] as f32 * wx;
        out[c] = (top * (1.0 - wy) + bottom * wy).round().clamp(0.0, 255.0) as u8;
    }
    out
}

// ---------------------------------------------------------------------------
//  Selection decorations (display only, never exported)
// ---------------------------------------------------------------------------

/// Dashed outline, resize/center handles and the rotation stalk for one
/// selected layer.
pub fn draw_selection_frame(target: &mut RgbaImage, layer: &Layer) {
    let pl = &layer.placement;
    let hw = pl.width / 2.0;
    let hh = pl.height / 2.0;
    let corners = [
        Point::new(-hw, -hh),
        Point::new(hw, -hh),
        Point::new(hw, hh),
        Point::new(-hw, hh),
    ];

    // Outline
    for i in 0..4 {
        let a = pl.to_canvas(corners[i]);
        let b = pl.to_canvas(corners[(i + 1) % 4]);
        draw_dashed_line(target, a, b, SELECTION_COLOR);
    }

    // Rotation stalk from the top edge midpoint up to the handle
    let stalk_base = pl.to_canvas(Point::new(0.0, -hh));
    let stalk_tip = pl.to_canvas(Point::new(0.0, -hh - ROTATE_HANDLE_OFFSET));
    draw_dashed_line(target, stalk_base, stalk_tip, SELECTION_COLOR);

    // Handles
    for (handle, local) in pl.handle_positions() {
        let color = match handle {
            crate::geometry::Handle::Center => CENTER_HANDLE_COLOR,
            crate::geometry::Handle::Rotate => ROTATE_HANDLE_COLOR,
            _ => SELECTION_COLOR,
        };
        fill_circle(target, pl.to_canvas(local), HANDLE_RADIUS, color);
    }
}

fn draw_dashed_line(target: &mut RgbaImage, a: Point, b: Point, color: Rgba<u8>) {
    let length = a.distance(b);
    if length < 0.5 {
        return;
    }
    let steps = length.ceil() as usize;
    for i in 0..=steps {
        let t = i as f32 / steps as f32;
        // 5-on / 5-off dash pattern along the walked distance.
        if (t * length) % DASH_PERIOD >= DASH_ON {
            continue;
        }
        let x = a.x + (b.x - a.x) * t;
        let y = a.y + (b.y - a.y) * t;
        put_pixel_clipped(target, x as i32, y as i32, color);
    }
}

fn fill_circle(target: &mut RgbaImage, center: Point, radius: i32, color: Rgba<u8>) {
    let cx = center.x as i32;
    let cy = center.y as i32;
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy <= radius * radius {
                put_pixel_clipped(target, cx + dx, cy + dy, color);
            }
        }
    }
}

fn put_pixel_clipped(target: &mut RgbaImage, x: i32, y: i32, color: Rgba<u8>) {
    if x >= 0 && y >= 0 && (x as u32) < target.width() && (y as u32) < target.height() {
        target.put_pixel(x as u32, y as u32, color);
    }
}

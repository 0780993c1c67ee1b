// ============================================================================
// LAYER STORE — layers, pixel blend modes, selection, locking, hit testing
// ============================================================================

use std::sync::Arc;

use image::{GrayImage, Rgba, RgbaImage, imageops};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::geometry::{Handle, Placement, Point};
use crate::mask::{self, RasterMask};

/// Pixel alpha below which a click falls through to the next layer.
pub const ALPHA_HIT_THRESHOLD: u8 = 10;

/// Fraction of the canvas a newly added layer is fitted into.
const ADD_LAYER_FIT: f32 = 0.8;

/// Stable identity of a layer, used to key undo snapshots and the lock.
/// Survives every transform and pixel edit; dies with the layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LayerId(Uuid);

impl LayerId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

// ---------------------------------------------------------------------------
//  Pixel blend modes
// ---------------------------------------------------------------------------

/// Compositing operator used when a layer is drawn onto the canvas.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum BlendMode {
    #[default]
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
}

impl BlendMode {
    pub fn all() -> &'static [BlendMode] {
        &[
            BlendMode::Normal,
            BlendMode::Multiply,
            BlendMode::Screen,
            BlendMode::Overlay,
            BlendMode::Darken,
            BlendMode::Lighten,
            BlendMode::ColorDodge,
            BlendMode::ColorBurn,
            BlendMode::HardLight,
            BlendMode::SoftLight,
            BlendMode::Difference,
            BlendMode::Exclusion,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Normal => "Normal",
            BlendMode::Multiply => "Multiply",
            BlendMode::Screen => "Screen",
            BlendMode::Overlay => "Overlay",
            BlendMode::Darken => "Darken",
            BlendMode::Lighten => "Lighten",
            BlendMode::ColorDodge => "Color Dodge",
            BlendMode::ColorBurn => "Color Burn",
            BlendMode::HardLight => "Hard Light",
            BlendMode::SoftLight => "Soft Light",
            BlendMode::Difference => "Difference",
            BlendMode::Exclusion => "Exclusion",
        }
    }

    /// The host-facing token, matching CSS composite operation names.
    pub fn key(&self) -> &'static str {
        match self {
            BlendMode::Normal => "normal",
            BlendMode::Multiply => "multiply",
            BlendMode::Screen => "screen",
            BlendMode::Overlay => "overlay",
            BlendMode::Darken => "darken",
            BlendMode::Lighten => "lighten",
            BlendMode::ColorDodge => "color-dodge",
            BlendMode::ColorBurn => "color-burn",
            BlendMode::HardLight => "hard-light",
            BlendMode::SoftLight => "soft-light",
            BlendMode::Difference => "difference",
            BlendMode::Exclusion => "exclusion",
        }
    }

    pub fn from_key(key: &str) -> Self {
        Self::all()
            .iter()
            .copied()
            .find(|m| m.key() == key)
            .unwrap_or(BlendMode::Normal)
    }
}

/// Source-over composition of `top` onto `base` with the given blend mode
/// and layer opacity. Float-space, un-premultiplied.
pub fn blend_pixel(base: Rgba<u8>, top: Rgba<u8>, mode: BlendMode, opacity: f32) -> Rgba<u8> {
    // Fast path: fully transparent top pixel — nothing to blend
    if top[3] == 0 || opacity <= 0.0 {
        return base;
    }
    // Fast path: plain opaque copy
    if matches!(mode, BlendMode::Normal) && opacity >= 1.0 && top[3] == 255 {
        return top;
    }

    let opacity = opacity.clamp(0.0, 1.0);
    let base_r = base[0] as f32 / 255.0;
    let base_g = base[1] as f32 / 255.0;
    let base_b = base[2] as f32 / 255.0;
    let base_a = base[3] as f32 / 255.0;
    let top_r = top[0] as f32 / 255.0;
    let top_g = top[1] as f32 / 255.0;
    let top_b = top[2] as f32 / 255.0;
    let top_a = (top[3] as f32 / 255.0) * opacity;

    let (r, g, b) = match mode {
        BlendMode::Normal => (top_r, top_g, top_b),
        BlendMode::Multiply => (base_r * top_r, base_g * top_g, base_b * top_b),
        BlendMode::Screen => (
            1.0 - (1.0 - base_r) * (1.0 - top_r),
            1.0 - (1.0 - base_g) * (1.0 - top_g),
            1.0 - (1.0 - base_b) * (1.0 - top_b),
        ),
        BlendMode::Overlay => (
            overlay_channel(base_r, top_r),
            overlay_channel(base_g, top_g),
            overlay_channel(base_b, top_b),
        ),
        BlendMode::Darken => (base_r.min(top_r), base_g.min(top_g), base_b.min(top_b)),
        BlendMode::Lighten => (base_r.max(top_r), base_g.max(top_g), base_b.max(top_b)),
        BlendMode::ColorDodge => (
            color_dodge_channel(base_r, top_r),
            color_dodge_channel(base_g, top_g),
            color_dodge_channel(base_b, top_b),
        ),
        BlendMode::ColorBurn => (
            color_burn_channel(base_r, top_r),
            color_burn_channel(base_g, top_g),
            color_burn_channel(base_b, top_b),
        ),
        // Hard light is overlay with the operands swapped.
        BlendMode::HardLight => (
            overlay_channel(top_r, base_r),
            overlay_channel(top_g, base_g),
            overlay_channel(top_b, base_b),
        ),
        BlendMode::SoftLight => (
            soft_light_channel(base_r, top_r),
            soft_light_channel(base_g, top_g),
            soft_light_channel(base_b, top_b),
        ),
        BlendMode::Difference => (
            (base_r - top_r).abs(),
            (base_g - top_g).abs(),
            (base_b - top_b).abs(),
        ),
        BlendMode::Exclusion => (
            base_r + top_r - 2.0 * base_r * top_r,
            base_g + top_g - 2.0 * base_g * top_g,
            base_b + top_b - 2.0 * base_b * top_b,
        ),
    };

    let out_a = top_a + base_a * (1.0 - top_a);
    if out_a == 0.0 {
        return Rgba([0, 0, 0, 0]);
    }
    let out_r = (r * top_a + base_r * base_a * (1.0 - top_a)) / out_a;
    let out_g = (g * top_a + base_g * base_a * (1.0 - top_a)) / out_a;
    let out_b = (b * top_a + base_b * base_a * (1.0 - top_a)) / out_a;

    Rgba([
        (out_r * 255.0).clamp(0.0, 255.0) as u8,
        (out_g * 255.0).clamp(0.0, 255.0) as u8,
        (out_b * 255.0).clamp(0.0, 255.0) as u8,
        (out_a * 255.0).clamp(0.0, 255.0) as u8,
    ])
}

fn overlay_channel(base: f32, top: f32) -> f32 {
    if base < 0.5 {
        2.0 * base * top
    } else {
        1.0 - 2.0 * (1.0 - base) * (1.0 - top)
    }
}

fn color_dodge_channel(base: f32, top: f32) -> f32 {
    if top >= 1.0 { 1.0 } else { (base / (1.0 - top)).min(1.0) }
}

fn color_burn_channel(base: f32, top: f32) -> f32 {
    if top == 0.0 { 0.0 } else { (1.0 - (1.0 - base) / top).max(0.0) }
}

/// W3C Soft Light formula.
fn soft_light_channel(base: f32, top: f32) -> f32 {
    if top <= 0.5 {
        base - (1.0 - 2.0 * top) * base * (1.0 - base)
    } else {
        let d = if base <= 0.25 {
            ((16.0 * base - 12.0) * base + 4.0) * base
        } else {
            base.sqrt()
        };
        base + (2.0 * top - 1.0) * (d - base)
    }
}

// ---------------------------------------------------------------------------
//  Layer
// ---------------------------------------------------------------------------

/// One placed image in the composite.
///
/// The pixel source is immutable and shared (`Arc`): edits that change
/// pixels — merging a mask, clearing transparency, restoring a snapshot —
/// swap in a whole new image rather than mutating in place, which is what
/// lets undo snapshots share storage for free.
pub struct Layer {
    pub id: LayerId,
    pub image: Arc<RgbaImage>,
    pub placement: Placement,
    pub z_index: i32,
    pub opacity: f32,
    pub blend_mode: BlendMode,
    mask: Option<RasterMask>,
    /// Derived 8-bit rendering of `mask`; rebuilt lazily, dropped on any
    /// mask change.
    mask_cache: Option<GrayImage>,
}

impl Layer {
    pub fn new(image: RgbaImage, placement: Placement, z_index: i32) -> Self {
        Self {
            id: LayerId::new(),
            image: Arc::new(image),
            placement,
            z_index,
            opacity: 1.0,
            blend_mode: BlendMode::Normal,
            mask: None,
            mask_cache: None,
        }
    }

    /// Rounded displayed dimensions — the resolution masks live at.
    pub fn mask_dimensions(&self) -> (u32, u32) {
        (
            (self.placement.width.round().max(1.0)) as u32,
            (self.placement.height.round().max(1.0)) as u32,
        )
    }

    pub fn mask(&self) -> Option<&RasterMask> {
        self.mask.as_ref()
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    /// Install (or clear) the mask, invalidating the cached rendering.
    /// A mask at the wrong resolution is resampled to fit.
    pub fn set_mask(&mut self, mask: Option<RasterMask>) {
        let dims = self.mask_dimensions();
        self.mask = mask.map(|m| {
            if m.dimensions() == dims {
                m
            } else {
                m.resized(dims.0, dims.1)
            }
        });
        self.mask_cache = None;
    }

    pub fn take_mask(&mut self) -> Option<RasterMask> {
        self.mask_cache = None;
        self.mask.take()
    }

    /// Cached grayscale rendering of the mask, built on first use.
    pub fn mask_image(&mut self) -> Option<&GrayImage> {
        if self.mask_cache.is_none() {
            self.mask_cache = self.mask.as_ref().map(|m| m.to_gray_image());
        }
        self.mask_cache.as_ref()
    }

    /// Keep a live mask aligned with the displayed size after a transform
    /// edit (resize handles, wheel scaling).
    pub fn refit_mask(&mut self) {
        let dims = self.mask_dimensions();
        if let Some(m) = self.mask.take() {
            self.mask = Some(if m.dimensions() == dims {
                m
            } else {
                m.resized(dims.0, dims.1)
            });
            self.mask_cache = None;
        }
    }

    /// Source-image alpha at a displayed-space offset from the layer's
    /// top-left, scaled to the source resolution. Out of bounds → 0.
    pub fn source_alpha_at(&self, dx: f32, dy: f32) -> u8 {
        if self.placement.width <= 0.0 || self.placement.height <= 0.0 {
            return 0;
        }
        let sx = dx * (self.image.width() as f32 / self.placement.width);
        let sy = dy * (self.image.height() as f32 / self.placement.height);
        if sx < 0.0 || sy < 0.0 {
            return 0;
        }
        let (sx, sy) = (sx.floor() as u32, sy.floor() as u32);
        if sx >= self.image.width() || sy >= self.image.height() {
            return 0;
        }
        self.image.get_pixel(sx, sy)[3]
    }

    /// Bake the live mask into the pixel alpha channel: the image is
    /// resampled to the displayed resolution, its alpha multiplied by the
    /// mask, and the mask discarded. Returns `Ok(true)` if a merge
    /// happened, `Ok(false)` if there was no mask to merge.
    pub fn merge_mask_into_alpha(&mut self) -> Result<bool> {
        let Some(mask) = self.mask.take() else {
            return Ok(false);
        };
        self.mask_cache = None;
        let (w, h) = mask.dimensions();
        let scaled = if self.image.dimensions() == (w, h) {
            (*self.image).clone()
        } else {
            imageops::resize(&*self.image, w, h, imageops::FilterType::Triangle)
        };
        self.image = Arc::new(mask::merge_into_alpha(&scaled, &mask)?);
        Ok(true)
    }

    /// Replace the image with a fully opaque copy (the "clear mask" action
    /// when transparency already lives in the pixels).
    pub fn flatten_transparency(&mut self) {
        self.image = Arc::new(mask::clear_transparency(&self.image));
    }

    /// Replace the image with a horizontally mirrored copy. A live mask
    /// flips with it so carved transparency stays under the same content.
    pub fn mirror_horizontal(&mut self) {
        self.image = Arc::new(imageops::flip_horizontal(&*self.image));
        if let Some(mask) = self.mask.take() {
            self.mask = Some(mask.flipped_horizontal());
            self.mask_cache = None;
        }
    }

    /// Replace the image with a vertically mirrored copy; the live mask
    /// flips along.
    pub fn mirror_vertical(&mut self) {
        self.image = Arc::new(imageops::flip_vertical(&*self.image));
        if let Some(mask) = self.mask.take() {
            self.mask = Some(mask.flipped_vertical());
            self.mask_cache = None;
        }
    }
}

// ---------------------------------------------------------------------------
//  Layer store
// ---------------------------------------------------------------------------

/// Ordered collection of layers plus selection and lock bookkeeping.
///
/// The lock is the engine's only mutual-exclusion primitive: while a
/// capture tool holds it, selection changes to any other layer are
/// rejected with [`Error::LayerLocked`] instead of silently rerouted.
pub struct LayerStore {
    pub width: u32,
    pub height: u32,
    layers: Vec<Layer>,
    selected: Vec<LayerId>,
    lock: Option<LayerId>,
}

impl LayerStore {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            layers: Vec::new(),
            selected: Vec::new(),
            lock: None,
        }
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Layer> {
        self.layers.iter()
    }

    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.iter().find(|l| l.id == id)
    }

    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.iter_mut().find(|l| l.id == id)
    }

    /// Layers in draw order (ascending z).
    pub fn layers_by_z(&self) -> Vec<&Layer> {
        let mut ordered: Vec<&Layer> = self.layers.iter().collect();
        ordered.sort_by_key(|l| l.z_index);
        ordered
    }

    fn next_z(&self) -> i32 {
        self.layers.iter().map(|l| l.z_index).max().map_or(0, |z| z + 1)
    }

    /// Add an image as a new topmost layer, centered and fitted to 80% of
    /// the canvas, and select it.
    pub fn add_layer(&mut self, image: RgbaImage) -> LayerId {
        let scale = (self.width as f32 / image.width() as f32)
            .min(self.height as f32 / image.height() as f32)
            * ADD_LAYER_FIT;
        let w = image.width() as f32 * scale;
        let h = image.height() as f32 * scale;
        let placement = Placement::new(
            (self.width as f32 - w) / 2.0,
            (self.height as f32 - h) / 2.0,
            w,
            h,
        );
        let layer = Layer::new(image, placement, self.next_z());
        let id = layer.id;
        self.layers.push(layer);
        self.selected = vec![id];
        id
    }

    /// Add an image with an explicit mask at its natural size and origin
    /// (host-supplied matted input).
    pub fn add_matted_layer(&mut self, image: RgbaImage, mask: Option<RasterMask>) -> LayerId {
        let placement = Placement::new(
            0.0,
            0.0,
            image.width() as f32,
            image.height() as f32,
        );
        let mut layer = Layer::new(image, placement, self.next_z());
        if let Some(mask) = mask {
            layer.set_mask(Some(mask));
        }
        let id = layer.id;
        self.layers.push(layer);
        self.selected = vec![id];
        id
    }

    /// Remove a layer, dropping it and fixing up selection and z order.
    /// Z indices are renumbered contiguously, matching draw order.
    pub fn remove_layer(&mut self, id: LayerId) -> bool {
        let Some(index) = self.layers.iter().position(|l| l.id == id) else {
            return false;
        };
        self.layers.remove(index);
        self.selected.retain(|&s| s != id);
        if self.lock == Some(id) {
            self.lock = None;
        }
        let mut ordered: Vec<usize> = (0..self.layers.len()).collect();
        ordered.sort_by_key(|&i| self.layers[i].z_index);
        for (z, i) in ordered.into_iter().enumerate() {
            self.layers[i].z_index = z as i32;
        }
        true
    }

    /// Swap z with the next layer above, if any.
    pub fn move_layer_up(&mut self, id: LayerId) -> bool {
        let Some(z) = self.get(id).map(|l| l.z_index) else {
            return false;
        };
        let above = self
            .layers
            .iter()
            .filter(|l| l.z_index > z)
            .min_by_key(|l| l.z_index)
            .map(|l| l.id);
        match above {
            Some(other) => {
                let oz = self.get(other).unwrap().z_index;
                self.get_mut(other).unwrap().z_index = z;
                self.get_mut(id).unwrap().z_index = oz;
                true
            }
            None => false,
        }
    }

    /// Swap z with the next layer below, if any.
    pub fn move_layer_down(&mut self, id: LayerId) -> bool {
        let Some(z) = self.get(id).map(|l| l.z_index) else {
            return false;
        };
        let below = self
            .layers
            .iter()
            .filter(|l| l.z_index < z)
            .max_by_key(|l| l.z_index)
            .map(|l| l.id);
        match below {
            Some(other) => {
                let oz = self.get(other).unwrap().z_index;
                self.get_mut(other).unwrap().z_index = z;
                self.get_mut(id).unwrap().z_index = oz;
                true
            }
            None => false,
        }
    }

    // -- selection ---------------------------------------------------------

    pub fn selected_ids(&self) -> &[LayerId] {
        &self.selected
    }

    /// The layer tool operations target: the most recently selected one.
    pub fn active(&self) -> Option<LayerId> {
        self.selected.last().copied()
    }

    /// Replace the selection. While the lock is held, only the locked
    /// layer may be (re)selected; clearing the selection stays allowed.
    pub fn set_selected(&mut self, id: Option<LayerId>) -> Result<()> {
        if let Some(id) = id {
            if self.get(id).is_none() {
                return Err(Error::NoActiveLayer);
            }
            if let Some(locked) = self.lock {
                if id != locked {
                    return Err(Error::LayerLocked);
                }
            }
            self.selected = vec![id];
        } else {
            self.selected.clear();
        }
        Ok(())
    }

    /// Ctrl-click style multi-selection toggle, lock-checked like
    /// [`set_selected`](Self::set_selected).
    pub fn toggle_selected(&mut self, id: LayerId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::NoActiveLayer);
        }
        if let Some(locked) = self.lock {
            if id != locked {
                return Err(Error::LayerLocked);
            }
        }
        match self.selected.iter().position(|&s| s == id) {
            Some(i) => {
                self.selected.remove(i);
            }
            None => self.selected.push(id),
        }
        Ok(())
    }

    // -- locking -----------------------------------------------------------

    pub fn lock(&mut self, id: LayerId) -> Result<()> {
        if self.get(id).is_none() {
            return Err(Error::NoActiveLayer);
        }
        self.lock = Some(id);
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.lock = None;
    }

    pub fn locked(&self) -> Option<LayerId> {
        self.lock
    }

    // -- hit testing -------------------------------------------------------

    /// The topmost layer under a canvas point whose own pixels are visible
    /// there. Walks layers from the highest z down; for each, transforms
    /// the point into local space, bounding-box tests, and only then
    /// samples the source alpha so clicks fall through transparent
    /// regions. Returns the hit layer and the local offset from its
    /// top-left.
    pub fn layer_at_position(&self, x: f32, y: f32) -> Option<(LayerId, Point)> {
        let p = Point::new(x, y);
        let mut ordered = self.layers_by_z();
        ordered.reverse();
        for layer in ordered {
            let local = layer.placement.to_local(p);
            if !layer.placement.contains_local(local) {
                continue;
            }
            let dx = local.x + layer.placement.width / 2.0;
            let dy = local.y + layer.placement.height / 2.0;
            if layer.source_alpha_at(dx, dy) > ALPHA_HIT_THRESHOLD {
                return Some((layer.id, Point::new(dx, dy)));
            }
        }
        None
    }

    // -- interactive transforms (applied to every selected layer) ----------

    pub fn nudge_selected(&mut self, dx: f32, dy: f32) {
        let ids: Vec<LayerId> = self.selected.clone();
        for id in ids {
            if let Some(layer) = self.get_mut(id) {
                layer.placement.translate(dx, dy);
            }
        }
    }

    pub fn rotate_selected(&mut self, degrees: f32) {
        let ids: Vec<LayerId> = self.selected.clone();
        for id in ids {
            if let Some(layer) = self.get_mut(id) {
                layer.placement.rotation += degrees;
            }
        }
    }

    /// Wheel zoom: scale every selected layer about its own center.
    pub fn scale_selected(&mut self, factor: f32) {
        let ids: Vec<LayerId> = self.selected.clone();
        for id in ids {
            if let Some(layer) = self.get_mut(id) {
                let pivot = layer.placement.center();
                layer.placement.scale_around_pivot(factor, pivot);
                layer.refit_mask();
            }
        }
    }

    pub fn mirror_selected_horizontal(&mut self) {
        let ids: Vec<LayerId> = self.selected.clone();
        for id in ids {
            if let Some(layer) = self.get_mut(id) {
                layer.mirror_horizontal();
            }
        }
    }

    pub fn mirror_selected_vertical(&mut self) {
        let ids: Vec<LayerId> = self.selected.clone();
        for id in ids {
            if let Some(layer) = self.get_mut(id) {
                layer.mirror_vertical();
            }
        }
    }

    /// Handle-drag resize across the whole selection. Each layer resizes
    /// from its own recorded drag-start placement so anchors stay pinned
    /// per layer.
    pub fn resize_selected_from_handle(
        &mut self,
        handle: Handle,
        dx: f32,
        dy: f32,
        originals: &[(LayerId, Placement)],
    ) {
        for &(id, original) in originals {
            if let Some(layer) = self.get_mut(id) {
                layer.placement.resize_from_handle(handle, dx, dy, &original);
                layer.refit_mask();
            }
        }
    }

    /// Snapshot of the current placements of the selection, taken at drag
    /// start and fed back to [`resize_selected_from_handle`](Self::resize_selected_from_handle).
    pub fn selected_placements(&self) -> Vec<(LayerId, Placement)> {
        self.selected
            .iter()
            .filter_map(|&id| self.get(id).map(|l| (id, l.placement)))
            .collect()
    }

    /// Change the canvas size, re-fitting every layer centered at 80%.
    pub fn update_canvas_size(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
        for layer in &mut self.layers {
            let scale = (width as f32 / layer.image.width() as f32)
                .min(height as f32 / layer.image.height() as f32)
                * ADD_LAYER_FIT;
            layer.placement.width = layer.image.width() as f32 * scale;
            layer.placement.height = layer.image.height() as f32 * scale;
            layer.placement.x = (width as f32 - layer.placement.width) / 2.0;
            layer.placement.y = (height as f32 - layer.placement.height) / 2.0;
            layer.refit_mask();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn opaque_image(w: u32, h: u32) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([128, 128, 128, 255]))
    }

    fn store_with_layer() -> (LayerStore, LayerId) {
        let mut store = LayerStore::new(512, 512);
        let id = store.add_layer(opaque_image(100, 100));
        (store, id)
    }

    #[test]
    fn added_layer_is_centered_and_fitted() {
        let (store, id) = store_with_layer();
        let layer = store.get(id).unwrap();
        // 100×100 into 512×512 at 80% fit.
        assert!((layer.placement.width - 409.6).abs() < 1e-3);
        assert!((layer.placement.x - (512.0 - 409.6) / 2.0).abs() < 1e-3);
        assert_eq!(store.active(), Some(id));
    }

    #[test]
    fn hit_test_prefers_topmost_opaque_layer() {
        let (mut store, bottom) = store_with_layer();
        let top = store.add_layer(opaque_image(100, 100));
        let hit = store.layer_at_position(256.0, 256.0);
        assert_eq!(hit.map(|(id, _)| id), Some(top));
        store.remove_layer(top);
        let hit = store.layer_at_position(256.0, 256.0);
        assert_eq!(hit.map(|(id, _)| id), Some(bottom));
    }

    #[test]
    fn hit_test_falls_through_transparent_pixels() {
        let mut store = LayerStore::new(200, 200);
        let bottom = store.add_layer(opaque_image(50, 50));
        // Top layer is fully transparent — clicks must pass through it.
        let top = store.add_layer(RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0])));
        assert_ne!(store.active(), Some(bottom));
        let hit = store.layer_at_position(100.0, 100.0);
        assert_eq!(hit.map(|(id, _)| id), Some(bottom));
        assert_ne!(hit.map(|(id, _)| id), Some(top));
    }

    #[test]
    fn hit_test_respects_rotation() {
        let mut store = LayerStore::new(400, 400);
        let id = store.add_layer(opaque_image(100, 50));
        store.get_mut(id).unwrap().placement.rotation = 90.0;
        let layer = store.get(id).unwrap();
        let c = layer.placement.center();
        // A point past the unrotated half-width but inside the rotated
        // half-height-turned-width.
        let probe = Point::new(c.x, c.y + layer.placement.width / 2.0 - 5.0);
        assert!(store.layer_at_position(probe.x, probe.y).is_some());
        // Same offset along x now misses (the layer turned under it).
        let probe = Point::new(c.x + layer.placement.width / 2.0 - 5.0, c.y);
        assert!(store.layer_at_position(probe.x, probe.y).is_none());
    }

    #[test]
    fn lock_blocks_other_selection_until_unlocked() {
        let (mut store, locked) = store_with_layer();
        let other = store.add_layer(opaque_image(10, 10));
        store.lock(locked).unwrap();
        assert!(matches!(
            store.set_selected(Some(other)),
            Err(Error::LayerLocked)
        ));
        // Re-selecting the locked layer and clearing are allowed.
        store.set_selected(Some(locked)).unwrap();
        store.set_selected(None).unwrap();
        store.unlock();
        store.set_selected(Some(other)).unwrap();
        assert_eq!(store.active(), Some(other));
    }

    #[test]
    fn removing_a_layer_renumbers_z_and_drops_lock() {
        let (mut store, a) = store_with_layer();
        let b = store.add_layer(opaque_image(10, 10));
        let c = store.add_layer(opaque_image(10, 10));
        store.lock(b).unwrap();
        assert!(store.remove_layer(b));
        assert_eq!(store.locked(), None);
        let zs: Vec<i32> = store.layers_by_z().iter().map(|l| l.z_index).collect();
        assert_eq!(zs, vec![0, 1]);
        assert_eq!(store.layers_by_z().last().unwrap().id, c);
        assert_eq!(store.layers_by_z()[0].id, a);
    }

    #[test]
    fn z_reorder_swaps_neighbours() {
        let (mut store, a) = store_with_layer();
        let b = store.add_layer(opaque_image(10, 10));
        assert!(store.move_layer_up(a));
        assert!(store.get(a).unwrap().z_index > store.get(b).unwrap().z_index);
        assert!(!store.move_layer_up(a)); // already topmost
        assert!(store.move_layer_down(a));
        assert!(store.get(a).unwrap().z_index < store.get(b).unwrap().z_index);
    }

    #[test]
    fn merge_mask_into_alpha_discards_mask() {
        let (mut store, id) = store_with_layer();
        let layer = store.get_mut(id).unwrap();
        let (mw, mh) = layer.mask_dimensions();
        layer.set_mask(Some(RasterMask::filled(mw, mh, 0.5)));
        assert!(layer.merge_mask_into_alpha().unwrap());
        assert!(!layer.has_mask());
        assert_eq!(layer.image.dimensions(), (mw, mh));
        let alpha = layer.image.get_pixel(mw / 2, mh / 2)[3];
        assert!((alpha as i32 - 128).abs() <= 1);
        // No mask left: a second merge is a no-op.
        assert!(!layer.merge_mask_into_alpha().unwrap());
    }

    #[test]
    fn set_mask_resamples_wrong_resolution() {
        let (mut store, id) = store_with_layer();
        let layer = store.get_mut(id).unwrap();
        layer.set_mask(Some(RasterMask::filled(7, 9, 1.0)));
        assert_eq!(layer.mask().unwrap().dimensions(), layer.mask_dimensions());
    }

    #[test]
    fn mirror_flips_image_and_live_mask_together() {
        let mut store = LayerStore::new(100, 100);
        let mut img = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 0, 255]));
        img.put_pixel(0, 0, Rgba([255, 0, 0, 255]));
        let id = store.add_matted_layer(img, None);

        let layer = store.get_mut(id).unwrap();
        let mut mask = RasterMask::filled(4, 4, 1.0);
        mask.set(0, 0, 0.0);
        layer.set_mask(Some(mask));

        store.mirror_selected_horizontal();
        let layer = store.get(id).unwrap();
        assert_eq!(layer.image.get_pixel(3, 0), &Rgba([255, 0, 0, 255]));
        assert_eq!(layer.mask().unwrap().get(3, 0), 0.0);
        assert_eq!(layer.mask().unwrap().get(0, 0), 1.0);

        store.mirror_selected_vertical();
        let layer = store.get(id).unwrap();
        assert_eq!(layer.image.get_pixel(3, 3), &Rgba([255, 0, 0, 255]));
        assert_eq!(layer.mask().unwrap().get(3, 3), 0.0);
    }

    #[test]
    fn blend_normal_full_opacity_copies_top() {
        let base = Rgba([10, 10, 10, 255]);
        let top = Rgba([200, 100, 50, 255]);
        assert_eq!(blend_pixel(base, top, BlendMode::Normal, 1.0), top);
    }

    #[test]
    fn blend_multiply_darkens() {
        let base = Rgba([128, 128, 128, 255]);
        let top = Rgba([128, 128, 128, 255]);
        let out = blend_pixel(base, top, BlendMode::Multiply, 1.0);
        assert!((out[0] as i32 - 64).abs() <= 1);
    }

    #[test]
    fn blend_screen_lightens() {
        let base = Rgba([128, 128, 128, 255]);
        let top = Rgba([128, 128, 128, 255]);
        let out = blend_pixel(base, top, BlendMode::Screen, 1.0);
        assert!((out[0] as i32 - 192).abs() <= 1);
    }

    #[test]
    fn blend_opacity_halves_contribution() {
        let base = Rgba([0, 0, 0, 255]);
        let top = Rgba([255, 255, 255, 255]);
        let out = blend_pixel(base, top, BlendMode::Normal, 0.5);
        assert!((out[0] as i32 - 128).abs() <= 1);
        assert_eq!(out[3], 255);
    }

    #[test]
    fn blend_transparent_top_is_identity() {
        let base = Rgba([1, 2, 3, 200]);
        let top = Rgba([255, 255, 255, 0]);
        assert_eq!(blend_pixel(base, top, BlendMode::Screen, 1.0), base);
    }

    #[test]
    fn blend_mode_key_roundtrip() {
        for &mode in BlendMode::all() {
            assert_eq!(BlendMode::from_key(mode.key()), mode);
        }
        assert_eq!(BlendMode::from_key("sepia"), BlendMode::Normal);
    }
}

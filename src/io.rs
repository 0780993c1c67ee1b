// ============================================================================
// EXPORT & PERSISTENCE — composite/mask encoding and the sink boundary
// ============================================================================

use image::codecs::png::PngEncoder;
use image::{ColorType, GrayImage, ImageEncoder, RgbaImage};
use rayon::prelude::*;

use crate::canvas::{Layer, LayerStore};
use crate::error::Result;
use crate::events::{EventQueue, StatusEvent};
use crate::geometry::Point;
use crate::render;

/// The two encoded images a commit hands to the persistence sink: the
/// composite flattened over white, and a full-opacity grayscale mask whose
/// value is each pixel's accumulated layer coverage (source alpha × layer
/// mask, summed across layers).
pub struct ExportBundle {
    pub image_png: Vec<u8>,
    pub mask_png: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Capability interface to wherever composites are stored. Network and
/// storage mechanics live behind it; the engine only sees success or a
/// failure message.
pub trait CompositeSink {
    fn save_composite(&mut self, name: &str, bundle: &ExportBundle)
    -> std::result::Result<(), String>;
}

/// Render the export coverage mask: black base, each layer's coverage
/// (its own pixel alpha multiplied by its live mask, if any) projected
/// through the layer transform and accumulated additively, saturating at
/// white.
pub fn render_export_mask(store: &LayerStore) -> GrayImage {
    let mut plane = vec![0.0f32; (store.width as usize) * (store.height as usize)];
    for layer in store.layers_by_z() {
        accumulate_layer_coverage(&mut plane, store.width, layer);
    }
    let mut img = GrayImage::new(store.width, store.height);
    for (i, px) in img.pixels_mut().enumerate() {
        px.0[0] = (plane[i].clamp(0.0, 1.0) * 255.0).round() as u8;
    }
    img
}

fn accumulate_layer_coverage(plane: &mut [f32], canvas_width: u32, layer: &Layer) {
    let pl = &layer.placement;
    if pl.width <= 0.0 || pl.height <= 0.0 {
        return;
    }
    let hw = pl.width / 2.0;
    let hh = pl.height / 2.0;
    let sx = layer.image.width() as f32 / pl.width;
    let sy = layer.image.height() as f32 / pl.height;
    let width = canvas_width as usize;

    plane
        .par_chunks_mut(width)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, acc) in row.iter_mut().enumerate() {
                let local = pl.to_local(Point::new(x as f32 + 0.5, y as f32 + 0.5));
                if !pl.contains_local(local) {
                    continue;
                }
                let dx = local.x + hw;
                let dy = local.y + hh;
                let alpha = sample_alpha(&layer.image, dx * sx, dy * sy);
                let coverage = match layer.mask() {
                    Some(mask) => alpha * mask.sample(dx, dy),
                    None => alpha,
                };
                *acc = (*acc + coverage).min(1.0);
            }
        });
}

/// Bilinear alpha-channel sample with clamp-to-edge addressing, in [0, 1].
fn sample_alpha(img: &RgbaImage, x: f32, y: f32) -> f32 {
    let (w, h) = img.dimensions();
    if w == 0 || h == 0 {
        return 0.0;
    }
    let fx = (x - 0.5).clamp(0.0, (w - 1) as f32);
    let fy = (y - 0.5).clamp(0.0, (h - 1) as f32);
    let x0 = fx.floor() as u32;
    let y0 = fy.floor() as u32;
    let x1 = (x0 + 1).min(w - 1);
    let y1 = (y0 + 1).min(h - 1);
    let wx = fx - x0 as f32;
    let wy = fy - y0 as f32;

    let a = |px: u32, py: u32| img.get_pixel(px, py)[3] as f32 / 255.0;
    let top = a(x0, y0) * (1.0 - wx) + a(x1, y0) * wx;
    let bottom = a(x0, y1) * (1.0 - wx) + a(x1, y1) * wx;
    top * (1.0 - wy) + bottom * wy
}

pub fn encode_png_rgba(img: &RgbaImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::Rgba8,
    )?;
    Ok(out)
}

pub fn encode_png_gray(img: &GrayImage) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    PngEncoder::new(&mut out).write_image(
        img.as_raw(),
        img.width(),
        img.height(),
        ColorType::L8,
    )?;
    Ok(out)
}

/// Build the full export bundle for the current layer stack.
pub fn export_bundle(store: &LayerStore) -> Result<ExportBundle> {
    let composite = render::composite_over_white(store);
    let mask = render_export_mask(store);
    Ok(ExportBundle {
        image_png: encode_png_rgba(&composite)?,
        mask_png: encode_png_gray(&mask)?,
        width: store.width,
        height: store.height,
    })
}

/// Linear commit pipeline: render → encode → hand to the sink → notify.
///
/// Returns `Ok(true)` when the sink accepted the save (the host is told
/// the output changed), `Ok(false)` when it rejected it — the failure is
/// reported via [`StatusEvent::SaveFailed`] and in-memory state is left
/// untouched so the caller can retry. Only encoding failures are hard
/// errors.
pub fn commit_composite(
    store: &LayerStore,
    name: &str,
    sink: &mut dyn CompositeSink,
    events: &mut EventQueue,
) -> Result<bool> {
    let bundle = export_bundle(store)?;
    match sink.save_composite(name, &bundle) {
        Ok(()) => {
            crate::log_info!("composite '{}' saved ({}x{})", name, bundle.width, bundle.height);
            events.emit(StatusEvent::OutputChanged);
            Ok(true)
        }
        Err(msg) => {
            crate::log_err!("composite '{}' save failed: {}", name, msg);
            events.emit(StatusEvent::SaveFailed(msg));
            Ok(false)
        }
    }
}

/// Derive the companion mask filename the host convention expects
/// (`foo.png` → `foo_mask.png`).
pub fn mask_file_name(image_name: &str) -> String {
    match image_name.rsplit_once('.') {
        Some((stem, ext)) => format!("{}_mask.{}", stem, ext),
        None => format!("{}_mask.png", image_name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::RasterMask;
    use image::Rgba;

    struct MemorySink {
        saved: Vec<(String, usize, usize)>,
        fail_with: Option<String>,
    }

    impl MemorySink {
        fn new() -> Self {
            Self {
                saved: Vec::new(),
                fail_with: None,
            }
        }
    }

    impl CompositeSink for MemorySink {
        fn save_composite(
            &mut self,
            name: &str,
            bundle: &ExportBundle,
        ) -> std::result::Result<(), String> {
            if let Some(msg) = &self.fail_with {
                return Err(msg.clone());
            }
            self.saved
                .push((name.to_string(), bundle.image_png.len(), bundle.mask_png.len()));
            Ok(())
        }
    }

    fn store_with_opaque_layer() -> LayerStore {
        let mut store = LayerStore::new(64, 64);
        store.add_matted_layer(
            RgbaImage::from_pixel(64, 64, Rgba([40, 40, 40, 255])),
            None,
        );
        store
    }

    #[test]
    fn export_mask_is_white_under_opaque_layer() {
        let store = store_with_opaque_layer();
        let mask = render_export_mask(&store);
        assert_eq!(mask.get_pixel(32, 32).0[0], 255);
    }

    #[test]
    fn export_mask_is_black_outside_all_layers() {
        let mut store = LayerStore::new(64, 64);
        store.add_matted_layer(
            RgbaImage::from_pixel(16, 16, Rgba([1, 1, 1, 255])),
            None,
        );
        let mask = render_export_mask(&store);
        assert_eq!(mask.get_pixel(8, 8).0[0], 255);
        assert_eq!(mask.get_pixel(40, 40).0[0], 0);
    }

    #[test]
    fn export_mask_multiplies_layer_mask_with_alpha() {
        let mut store = LayerStore::new(32, 32);
        let id = store.add_matted_layer(
            RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 255])),
            Some(RasterMask::filled(32, 32, 0.5)),
        );
        let _ = id;
        let mask = render_export_mask(&store);
        let v = mask.get_pixel(16, 16).0[0] as i32;
        assert!((v - 128).abs() <= 1, "got {v}");
    }

    #[test]
    fn export_mask_accumulates_across_layers() {
        let mut store = LayerStore::new(32, 32);
        store.add_matted_layer(
            RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 160])),
            None,
        );
        store.add_matted_layer(
            RgbaImage::from_pixel(32, 32, Rgba([0, 0, 0, 160])),
            None,
        );
        let mask = render_export_mask(&store);
        // 160 + 160 saturates at 255 (additive accumulation).
        assert_eq!(mask.get_pixel(16, 16).0[0], 255);
    }

    #[test]
    fn encoded_outputs_are_png() {
        let store = store_with_opaque_layer();
        let bundle = export_bundle(&store).unwrap();
        const PNG_MAGIC: &[u8] = &[0x89, b'P', b'N', b'G'];
        assert_eq!(&bundle.image_png[..4], PNG_MAGIC);
        assert_eq!(&bundle.mask_png[..4], PNG_MAGIC);
    }

    #[test]
    fn commit_success_notifies_output_changed() {
        let store = store_with_opaque_layer();
        let mut sink = MemorySink::new();
        let mut events = EventQueue::new();
        assert!(commit_composite(&store, "canvas.png", &mut sink, &mut events).unwrap());
        assert!(events.contains(&StatusEvent::OutputChanged));
        assert_eq!(sink.saved.len(), 1);
        assert_eq!(sink.saved[0].0, "canvas.png");
    }

    #[test]
    fn commit_failure_reports_without_rolling_back() {
        let store = store_with_opaque_layer();
        let mut sink = MemorySink::new();
        sink.fail_with = Some("server unreachable".to_string());
        let mut events = EventQueue::new();
        let saved = commit_composite(&store, "canvas.png", &mut sink, &mut events).unwrap();
        assert!(!saved);
        assert!(events.contains(&StatusEvent::SaveFailed("server unreachable".to_string())));
        // The layer stack is untouched and a retry can proceed.
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn mask_file_name_follows_host_convention() {
        assert_eq!(mask_file_name("canvas_image.png"), "canvas_image_mask.png");
        assert_eq!(mask_file_name("plain"), "plain_mask.png");
    }
}

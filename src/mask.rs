// ============================================================================
// RASTER MASK — per-pixel alpha buffer in [0, 1] with combination operators
// ============================================================================

use image::{GrayImage, Luma, Rgba, RgbaImage};
use rayon::prelude::*;

use crate::error::{Error, Result};

/// How a freshly rasterized selection merges with the mask accumulator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum MaskBlend {
    /// Discard the accumulator, start from the new selection alone.
    #[default]
    New,
    /// Union — `min(1, base + overlay)`.
    Add,
    /// Difference — `max(0, base - overlay)`.
    Subtract,
    /// Keep only what both cover — `base * overlay`.
    Intersect,
    /// Overwrite the accumulator with the overlay.
    Replace,
}

impl MaskBlend {
    pub fn label(&self) -> &'static str {
        match self {
            MaskBlend::New => "New",
            MaskBlend::Add => "Add",
            MaskBlend::Subtract => "Subtract",
            MaskBlend::Intersect => "Intersect",
            MaskBlend::Replace => "Replace",
        }
    }

    pub fn all() -> &'static [MaskBlend] {
        &[
            MaskBlend::New,
            MaskBlend::Add,
            MaskBlend::Subtract,
            MaskBlend::Intersect,
            MaskBlend::Replace,
        ]
    }
}

/// Dense row-major buffer of per-pixel alpha in [0, 1], addressed in a
/// layer's local pixel coordinates.
#[derive(Clone, Debug, PartialEq)]
pub struct RasterMask {
    width: u32,
    height: u32,
    data: Vec<f32>,
}

impl RasterMask {
    /// All-zero (fully hidden) mask.
    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, 0.0)
    }

    /// Mask with every pixel at `value` (clamped to [0, 1]).
    pub fn filled(width: u32, height: u32, value: f32) -> Self {
        let value = value.clamp(0.0, 1.0);
        Self {
            width,
            height,
            data: vec![value; (width as usize) * (height as usize)],
        }
    }

    /// Wrap an existing buffer; its length must equal `width * height`.
    pub fn from_vec(width: u32, height: u32, data: Vec<f32>) -> Result<Self> {
        if data.len() != (width as usize) * (height as usize) {
            return Err(Error::dimensions(
                (width, height),
                (data.len() as u32, 1),
            ));
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn get(&self, x: u32, y: u32) -> f32 {
        if x >= self.width || y >= self.height {
            return 0.0;
        }
        self.data[(y * self.width + x) as usize]
    }

    pub fn set(&mut self, x: u32, y: u32, value: f32) {
        if x < self.width && y < self.height {
            self.data[(y * self.width + x) as usize] = value.clamp(0.0, 1.0);
        }
    }

    /// Bilinear sample at fractional pixel coordinates; outside → 0.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        if self.width == 0 || self.height == 0 {
            return 0.0;
        }
        let fx = x - 0.5;
        let fy = y - 0.5;
        let x0 = fx.floor();
        let y0 = fy.floor();
        let wx = fx - x0;
        let wy = fy - y0;

        let tap = |ix: i64, iy: i64| -> f32 {
            if ix < 0 || iy < 0 || ix >= self.width as i64 || iy >= self.height as i64 {
                0.0
            } else {
                self.data[(iy as usize) * (self.width as usize) + ix as usize]
            }
        };

        let x0 = x0 as i64;
        let y0 = y0 as i64;
        let top = tap(x0, y0) * (1.0 - wx) + tap(x0 + 1, y0) * wx;
        let bottom = tap(x0, y0 + 1) * (1.0 - wx) + tap(x0 + 1, y0 + 1) * wx;
        top * (1.0 - wy) + bottom * wy
    }

    /// True when no pixel has any coverage.
    pub fn is_all_zero(&self) -> bool {
        self.data.iter().all(|&v| v == 0.0)
    }

    /// Combine with an `overlay` of identical dimensions under `mode`.
    /// `New` and `Replace` both yield the overlay; the distinction only
    /// matters to callers deciding what to use as the base.
    pub fn combine(&self, overlay: &RasterMask, mode: MaskBlend) -> Result<RasterMask> {
        if self.dimensions() != overlay.dimensions() {
            return Err(Error::dimensions(self.dimensions(), overlay.dimensions()));
        }

        let mut out = vec![0.0f32; self.data.len()];
        let width = self.width as usize;
        out.par_chunks_mut(width)
            .zip(self.data.par_chunks(width))
            .zip(overlay.data.par_chunks(width))
            .for_each(|((dst, base), over)| {
                for i in 0..dst.len() {
                    dst[i] = match mode {
                        MaskBlend::Add => (base[i] + over[i]).min(1.0),
                        MaskBlend::Subtract => (base[i] - over[i]).max(0.0),
                        MaskBlend::Intersect => base[i] * over[i],
                        MaskBlend::New | MaskBlend::Replace => over[i],
                    };
                }
            });

        Ok(RasterMask {
            width: self.width,
            height: self.height,
            data: out,
        })
    }

    /// Bilinear resample to new dimensions. Used when a layer's displayed
    /// size changes while it still carries a live mask.
    pub fn resized(&self, new_width: u32, new_height: u32) -> RasterMask {
        if (new_width, new_height) == self.dimensions() {
            return self.clone();
        }
        let mut out = RasterMask::new(new_width.max(1), new_height.max(1));
        let sx = self.width as f32 / out.width as f32;
        let sy = self.height as f32 / out.height as f32;
        let ow = out.width as usize;
        out.data
            .par_chunks_mut(ow)
            .enumerate()
            .for_each(|(y, row)| {
                let src_y = (y as f32 + 0.5) * sy;
                for (x, v) in row.iter_mut().enumerate() {
                    let src_x = (x as f32 + 0.5) * sx;
                    *v = self.sample(src_x, src_y);
                }
            });
        out
    }

    /// Mirror across the vertical axis.
    pub fn flipped_horizontal(&self) -> RasterMask {
        let mut out = self.clone();
        for y in 0..self.height as usize {
            out.data[y * self.width as usize..(y + 1) * self.width as usize].reverse();
        }
        out
    }

    /// Mirror across the horizontal axis.
    pub fn flipped_vertical(&self) -> RasterMask {
        let w = self.width as usize;
        let mut out = self.clone();
        for y in 0..self.height as usize {
            let src = (self.height as usize - 1 - y) * w;
            out.data[y * w..(y + 1) * w].copy_from_slice(&self.data[src..src + w]);
        }
        out
    }

    /// 8-bit grayscale rendering (255 = fully covered), used for cached
    /// previews and the export mask.
    pub fn to_gray_image(&self) -> GrayImage {
        let mut img = GrayImage::new(self.width, self.height);
        for (i, px) in img.pixels_mut().enumerate() {
            *px = Luma([(self.data[i].clamp(0.0, 1.0) * 255.0).round() as u8]);
        }
        img
    }

    /// Rebuild a mask from an 8-bit grayscale plane.
    pub fn from_gray_image(img: &GrayImage) -> RasterMask {
        RasterMask {
            width: img.width(),
            height: img.height(),
            data: img.pixels().map(|p| p.0[0] as f32 / 255.0).collect(),
        }
    }
}

// ---------------------------------------------------------------------------
//  Permanent merge — the single point where a mask edit becomes baked-in
// ---------------------------------------------------------------------------

/// Produce a new image whose alpha channel is `original_alpha * mask`.
///
/// Pre-existing transparency is preserved (the mask multiplies, it does not
/// replace). Dimensions must match; the caller is expected to have scaled
/// the image to the mask's resolution first.
pub fn merge_into_alpha(image: &RgbaImage, mask: &RasterMask) -> Result<RgbaImage> {
    if image.dimensions() != mask.dimensions() {
        return Err(Error::dimensions(image.dimensions(), mask.dimensions()));
    }

    let width = image.width() as usize;
    let mut out = image.clone();
    out.par_chunks_mut(width * 4)
        .zip(mask.data.par_chunks(width))
        .for_each(|(row, mask_row)| {
            for (px, &m) in row.chunks_mut(4).zip(mask_row.iter()) {
                let m = m.clamp(0.0, 1.0);
                px[3] = (px[3] as f32 * m).round() as u8;
            }
        });
    Ok(out)
}

/// Flatten all transparency: every pixel becomes fully opaque. This is the
/// "clear mask" action when a layer has no live mask buffer left — the
/// remaining transparency lives in the image itself.
pub fn clear_transparency(image: &RgbaImage) -> RgbaImage {
    let mut out = image.clone();
    for px in out.pixels_mut() {
        *px = Rgba([px[0], px[1], px[2], 255]);
    }
    out
}

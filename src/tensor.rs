// ============================================================================
// TENSOR INTERCHANGE — host array format ↔ pixel buffers and masks
// ============================================================================
//
// The host hands images and masks across the boundary as flat float arrays
// with an explicit shape and value range; the engine converts them to and
// from its own pixel types. Pure data-format adapters — no geometry or
// masking logic lives here.

use image::{Rgba, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::mask::RasterMask;

/// A host image tensor: `shape = [batch, height, width, channels]` with
/// channel values in `[min_val, max_val]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorImage {
    pub shape: [usize; 4],
    pub min_val: f32,
    pub max_val: f32,
    pub data: Vec<f32>,
}

impl TensorImage {
    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    pub fn channels(&self) -> usize {
        self.shape[3]
    }

    fn validate(&self) -> Result<()> {
        let expected = self.shape.iter().product::<usize>();
        if self.shape[0] != 1 {
            return Err(Error::InvalidTensor(format!(
                "batch size {} unsupported, expected 1",
                self.shape[0]
            )));
        }
        if !matches!(self.channels(), 1 | 3 | 4) {
            return Err(Error::InvalidTensor(format!(
                "{} channels unsupported, expected 1, 3 or 4",
                self.channels()
            )));
        }
        if self.data.len() != expected {
            return Err(Error::InvalidTensor(format!(
                "data length {} does not match shape {:?}",
                self.data.len(),
                self.shape
            )));
        }
        if self.width() == 0 || self.height() == 0 {
            return Err(Error::InvalidTensor("zero-sized tensor".to_string()));
        }
        Ok(())
    }

    /// Convert to an 8-bit RGBA image, mapping `[min_val, max_val]` onto
    /// 0..255. Single-channel data broadcasts to gray; missing alpha
    /// becomes fully opaque.
    pub fn to_rgba(&self) -> Result<RgbaImage> {
        self.validate()?;
        let range = self.max_val - self.min_val;
        let scale = if range > 0.0 { 1.0 / range } else { 1.0 };
        let channels = self.channels();
        let mut img = RgbaImage::new(self.width() as u32, self.height() as u32);

        for (i, px) in img.pixels_mut().enumerate() {
            let base = i * channels;
            let quant = |v: f32| -> u8 {
                (((v - self.min_val) * scale).clamp(0.0, 1.0) * 255.0).round() as u8
            };
            *px = match channels {
                1 => {
                    let g = quant(self.data[base]);
                    Rgba([g, g, g, 255])
                }
                3 => Rgba([
                    quant(self.data[base]),
                    quant(self.data[base + 1]),
                    quant(self.data[base + 2]),
                    255,
                ]),
                _ => Rgba([
                    quant(self.data[base]),
                    quant(self.data[base + 1]),
                    quant(self.data[base + 2]),
                    quant(self.data[base + 3]),
                ]),
            };
        }
        Ok(img)
    }

    /// Build a normalized (0..1) RGBA tensor from an image.
    pub fn from_rgba(img: &RgbaImage) -> TensorImage {
        let (w, h) = img.dimensions();
        let mut data = Vec::with_capacity((w as usize) * (h as usize) * 4);
        for px in img.pixels() {
            data.extend(px.0.iter().map(|&c| c as f32 / 255.0));
        }
        TensorImage {
            shape: [1, h as usize, w as usize, 4],
            min_val: 0.0,
            max_val: 1.0,
            data,
        }
    }
}

/// A host mask tensor: `shape = [batch, height, width]`, values already
/// in [0, 1].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TensorMask {
    pub shape: [usize; 3],
    pub data: Vec<f32>,
}

impl TensorMask {
    pub fn height(&self) -> usize {
        self.shape[1]
    }

    pub fn width(&self) -> usize {
        self.shape[2]
    }

    /// Convert to a [`RasterMask`], clamping stray values into [0, 1].
    pub fn to_mask(&self) -> Result<RasterMask> {
        if self.shape[0] != 1 {
            return Err(Error::InvalidTensor(format!(
                "batch size {} unsupported, expected 1",
                self.shape[0]
            )));
        }
        let expected = self.width() * self.height();
        if self.data.len() != expected {
            return Err(Error::InvalidTensor(format!(
                "data length {} does not match shape {:?}",
                self.data.len(),
                self.shape
            )));
        }
        let data = self.data.iter().map(|v| v.clamp(0.0, 1.0)).collect();
        RasterMask::from_vec(self.width() as u32, self.height() as u32, data)
    }

    pub fn from_mask(mask: &RasterMask) -> TensorMask {
        TensorMask {
            shape: [1, mask.height() as usize, mask.width() as usize],
            data: mask.data().to_vec(),
        }
    }
}

//! Image preprocessing: decode, resize, normalize, lay out as CHW.

use crate::error::{PhytoscanError, Result};
use crate::tensor::from_chw;
use candle_core::{Device, Tensor};
use image::imageops::{self, FilterType};
use image::RgbImage;
use serde::{Deserialize, Serialize};

/// ImageNet normalization mean values (RGB)
const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet normalization std values (RGB)
const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-channel `(p / 255 - mean) / std` applied to RGB pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Normalization {
    /// Channel means on the [0, 1] scale.
    pub mean: [f32; 3],
    /// Channel standard deviations on the [0, 1] scale.
    pub std: [f32; 3],
}

impl Normalization {
    /// Plain scaling to [0, 1], as the PlantVillage network was trained.
    pub fn unit_range() -> Self {
        Self {
            mean: [0.0; 3],
            std: [1.0; 3],
        }
    }

    /// ImageNet statistics.
    pub fn imagenet() -> Self {
        Self {
            mean: IMAGENET_MEAN,
            std: IMAGENET_STD,
        }
    }

    /// Check that every std is positive and every value finite.
    pub fn validate(&self) -> Result<()> {
        let ok = self.mean.iter().all(|m| m.is_finite())
            && self.std.iter().all(|s| s.is_finite() && *s > 0.0);
        if !ok {
            return Err(PhytoscanError::InvalidConfig(format!(
                "invalid normalization {:?}",
                self
            )));
        }
        Ok(())
    }
}

impl Default for Normalization {
    fn default() -> Self {
        Self::unit_range()
    }
}

/// Turns caller images into model-ready `(3, size, size)` tensors.
#[derive(Debug, Clone)]
pub struct Preprocessor {
    size: usize,
    normalization: Normalization,
    device: Device,
}

impl Preprocessor {
    /// Create a preprocessor producing `size × size` tensors on `device`.
    pub fn new(size: usize, normalization: Normalization, device: Device) -> Result<Self> {
        normalization.validate()?;
        if size == 0 || u32::try_from(size).is_err() {
            return Err(PhytoscanError::InvalidConfig(format!(
                "invalid image size {}",
                size
            )));
        }
        Ok(Self {
            size,
            normalization,
            device,
        })
    }

    /// Target side length.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Normalization in use.
    pub fn normalization(&self) -> &Normalization {
        &self.normalization
    }

    /// Preprocess an interleaved row-major pixel buffer (`HWC`, u8).
    pub fn from_raw(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Tensor> {
        if channels != 3 {
            return Err(PhytoscanError::InvalidInput(format!(
                "expected 3 channels (RGB), got {}",
                channels
            )));
        }
        if width == 0 || height == 0 {
            return Err(PhytoscanError::InvalidInput(format!(
                "empty image {}x{}",
                width, height
            )));
        }
        let expected = width
            .checked_mul(height)
            .and_then(|n| n.checked_mul(channels));
        if expected != Some(pixels.len()) {
            return Err(PhytoscanError::InvalidInput(format!(
                "buffer of {} bytes does not match {}x{}x{}",
                pixels.len(),
                width,
                height,
                channels
            )));
        }

        let (w, h) = (to_u32(width)?, to_u32(height)?);
        let image = RgbImage::from_raw(w, h, pixels.to_vec()).ok_or_else(|| {
            PhytoscanError::InvalidInput(format!("cannot build {}x{} RGB image", width, height))
        })?;
        self.from_rgb(&image)
    }

    /// Decode a PNG or JPEG file image held in memory and preprocess it.
    ///
    /// Only three-channel images are accepted; grayscale and alpha images
    /// fail with `InvalidInput`.
    pub fn from_encoded(&self, bytes: &[u8]) -> Result<Tensor> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| PhytoscanError::InvalidInput(format!("cannot decode image: {}", e)))?;
        let channels = decoded.color().channel_count();
        if channels != 3 {
            return Err(PhytoscanError::InvalidInput(format!(
                "expected 3 channels (RGB), decoded {:?} with {}",
                decoded.color(),
                channels
            )));
        }
        self.from_rgb(&decoded.to_rgb8())
    }

    /// Resize (if needed), normalize and convert an RGB image.
    pub fn from_rgb(&self, image: &RgbImage) -> Result<Tensor> {
        let side = to_u32(self.size)?;
        let resized;
        let image = if image.dimensions() == (side, side) {
            image
        } else {
            resized = imageops::resize(image, side, side, FilterType::Triangle);
            &resized
        };

        let plane = self.size * self.size;
        let mut data = vec![0.0f32; 3 * plane];
        let Normalization { mean, std } = self.normalization;

        // CHW layout: all R values, then all G values, then all B values
        for (i, pixel) in image.pixels().enumerate() {
            for c in 0..3 {
                data[c * plane + i] = (pixel[c] as f32 / 255.0 - mean[c]) / std[c];
            }
        }

        from_chw(data, (3, self.size, self.size), &self.device)
    }
}

fn to_u32(n: usize) -> Result<u32> {
    u32::try_from(n)
        .map_err(|_| PhytoscanError::InvalidInput(format!("dimension {} too large", n)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, GrayImage, ImageFormat};
    use std::io::Cursor;

    fn pre(size: usize) -> Preprocessor {
        Preprocessor::new(size, Normalization::unit_range(), Device::Cpu).unwrap()
    }

    fn encode_png(image: DynamicImage) -> Vec<u8> {
        let mut bytes = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn raw_buffer_becomes_chw() {
        let t = pre(1).from_raw(&[10, 20, 30], 1, 1, 3).unwrap();
        assert_eq!(t.dims(), &[3, 1, 1]);
        let v: Vec<f32> = t.flatten_all().unwrap().to_vec1().unwrap();
        assert!((v[0] - 10.0 / 255.0).abs() < 1e-6);
        assert!((v[2] - 30.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn planes_are_channel_major() {
        // Columns alternate red and blue.
        let image = RgbImage::from_fn(2, 2, |x, _| {
            if x == 0 {
                image::Rgb([255, 0, 0])
            } else {
                image::Rgb([0, 0, 255])
            }
        });
        let v: Vec<f32> = pre(2).from_rgb(&image).unwrap().flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v, vec![1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 1.0]);
    }

    #[test]
    fn imagenet_normalization_applied() {
        let p = Preprocessor::new(1, Normalization::imagenet(), Device::Cpu).unwrap();
        let v: Vec<f32> = p
            .from_raw(&[255, 255, 255], 1, 1, 3)
            .unwrap()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert!((v[0] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((v[2] - (1.0 - 0.406) / 0.225).abs() < 1e-5);
    }

    #[test]
    fn non_square_input_is_resized() {
        let pixels = vec![128u8; 40 * 30 * 3];
        let t = pre(16).from_raw(&pixels, 40, 30, 3).unwrap();
        assert_eq!(t.dims(), &[3, 16, 16]);
        let v: Vec<f32> = t.flatten_all().unwrap().to_vec1().unwrap();
        assert!(v.iter().all(|x| (x - 128.0 / 255.0).abs() < 1e-2));
    }

    #[test]
    fn single_channel_is_invalid_input() {
        let pixels = vec![0u8; 256 * 256];
        assert!(matches!(
            pre(256).from_raw(&pixels, 256, 256, 1),
            Err(PhytoscanError::InvalidInput(_))
        ));
    }

    #[test]
    fn short_buffer_is_invalid_input() {
        assert!(matches!(
            pre(4).from_raw(&[0u8; 10], 2, 2, 3),
            Err(PhytoscanError::InvalidInput(_))
        ));
        assert!(matches!(
            pre(4).from_raw(&[], 0, 2, 3),
            Err(PhytoscanError::InvalidInput(_))
        ));
    }

    #[test]
    fn encoded_png_decodes() {
        let image = RgbImage::from_pixel(8, 8, image::Rgb([0, 255, 0]));
        let bytes = encode_png(DynamicImage::ImageRgb8(image));
        let t = pre(8).from_encoded(&bytes).unwrap();
        let v: Vec<f32> = t.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(v[0], 0.0);
        assert_eq!(v[64], 1.0);
    }

    #[test]
    fn encoded_grayscale_is_invalid_input() {
        let bytes = encode_png(DynamicImage::ImageLuma8(GrayImage::new(8, 8)));
        assert!(matches!(
            pre(8).from_encoded(&bytes),
            Err(PhytoscanError::InvalidInput(_))
        ));
    }

    #[test]
    fn garbage_bytes_are_invalid_input() {
        assert!(matches!(
            pre(8).from_encoded(b"not an image"),
            Err(PhytoscanError::InvalidInput(_))
        ));
    }

    #[test]
    fn bad_normalization_rejected() {
        let n = Normalization {
            mean: [0.0; 3],
            std: [1.0, 0.0, 1.0],
        };
        assert!(matches!(
            Preprocessor::new(8, n, Device::Cpu),
            Err(PhytoscanError::InvalidConfig(_))
        ));
    }
}

//! Tensor layout helpers shared by the layer primitives.
//!
//! Feature maps are candle [`Tensor`]s of dtype F32, laid out row-major as
//! `(C, H, W)` or `(N, C, H, W)`. The helpers here check those layouts up
//! front so that callers see [`PhytoscanError::ShapeMismatch`] rather than a
//! backend error from deep inside a kernel.

use crate::error::{PhytoscanError, Result};
use candle_core::{DType, Device, Tensor};

/// Decoded dimensions of a spatial feature map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureDims {
    /// Batch size, `None` for an unbatched `(C, H, W)` tensor.
    pub batch: Option<usize>,
    /// Channel count.
    pub channels: usize,
    /// Height in pixels.
    pub height: usize,
    /// Width in pixels.
    pub width: usize,
}

impl FeatureDims {
    /// Unbatched dimensions.
    pub fn chw(channels: usize, height: usize, width: usize) -> Self {
        Self {
            batch: None,
            channels,
            height,
            width,
        }
    }

    /// Decode a rank-3 or rank-4 shape. Zero-sized axes are rejected.
    pub fn from_shape(shape: &[usize]) -> Result<Self> {
        let dims = match *shape {
            [c, h, w] => Self::chw(c, h, w),
            [n, c, h, w] => Self {
                batch: Some(n),
                channels: c,
                height: h,
                width: w,
            },
            _ => {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "expected (C, H, W) or (N, C, H, W), got {:?}",
                    shape
                )))
            }
        };
        if shape.iter().any(|&d| d == 0) {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "zero-sized axis in {:?}",
                shape
            )));
        }
        Ok(dims)
    }

    /// Same layout with a different channel count.
    pub fn with_channels(self, channels: usize) -> Self {
        Self { channels, ..self }
    }

    /// Same layout with different spatial dims.
    pub fn with_spatial(self, height: usize, width: usize) -> Self {
        Self {
            height,
            width,
            ..self
        }
    }

    /// Encode back into a shape vector.
    pub fn to_shape(&self) -> Vec<usize> {
        match self.batch {
            Some(n) => vec![n, self.channels, self.height, self.width],
            None => vec![self.channels, self.height, self.width],
        }
    }
}

/// Lift a `(C, H, W)` tensor to `(1, C, H, W)`.
///
/// Returns the rank-4 tensor and whether the batch axis was added, so the
/// caller can undo it with [`restore_batch`].
pub fn as_batched(x: &Tensor) -> Result<(Tensor, bool)> {
    match x.rank() {
        3 => Ok((x.unsqueeze(0)?, true)),
        4 => Ok((x.clone(), false)),
        r => Err(PhytoscanError::ShapeMismatch(format!(
            "expected rank 3 or 4, got rank {} {:?}",
            r,
            x.dims()
        ))),
    }
}

/// Undo [`as_batched`].
pub fn restore_batch(x: Tensor, added: bool) -> Result<Tensor> {
    if added {
        Ok(x.squeeze(0)?)
    } else {
        Ok(x)
    }
}

/// Build an unbatched `(C, H, W)` tensor from row-major data.
pub fn from_chw(data: Vec<f32>, dims: (usize, usize, usize), device: &Device) -> Result<Tensor> {
    let (c, h, w) = dims;
    let expected = c * h * w;
    if data.len() != expected {
        return Err(PhytoscanError::ShapeMismatch(format!(
            "buffer of {} values cannot fill ({}, {}, {})",
            data.len(),
            c,
            h,
            w
        )));
    }
    Ok(Tensor::from_vec(data, (c, h, w), device)?)
}

/// Fail unless both tensors have identical shapes.
pub fn ensure_same_shape(lhs: &Tensor, rhs: &Tensor, context: &str) -> Result<()> {
    if lhs.dims() != rhs.dims() {
        return Err(PhytoscanError::ShapeMismatch(format!(
            "{}: {:?} vs {:?}",
            context,
            lhs.dims(),
            rhs.dims()
        )));
    }
    Ok(())
}

/// Number of NaN or infinite entries in `x`.
pub fn count_non_finite(x: &Tensor) -> Result<usize> {
    let values = x.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    Ok(values.iter().filter(|v| !v.is_finite()).count())
}

/// Fail with [`PhytoscanError::NumericFault`] if any entry is NaN or infinite.
pub fn ensure_finite(x: &Tensor, stage: &str) -> Result<()> {
    let count = count_non_finite(x)?;
    if count > 0 {
        return Err(PhytoscanError::NumericFault {
            stage: stage.to_string(),
            count,
        });
    }
    Ok(())
}

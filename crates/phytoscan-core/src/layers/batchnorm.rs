//! Inference-mode batch normalization over the channel axis.
//!
//! # Formula
//!
//! `y = (x - running_mean) / sqrt(running_var + eps) * gamma + beta`
//!
//! Only stored running statistics are used; no batch statistics are
//! computed at call time. The affine is folded into a per-channel
//! `scale`/`shift` pair once, at construction.

use crate::error::{PhytoscanError, Result};
use crate::tensor::{as_batched, ensure_finite, restore_batch, FeatureDims};
use candle_core::{DType, Device, Tensor};

/// Default epsilon, matching PyTorch's `BatchNorm2d`.
pub const DEFAULT_EPS: f64 = 1e-5;

/// Batch normalization with frozen running statistics.
#[derive(Debug, Clone)]
pub struct BatchNorm2d {
    /// Folded `gamma / sqrt(var + eps)`, shaped [1, C, 1, 1].
    scale: Tensor,
    /// Folded `beta - mean * scale`, shaped [1, C, 1, 1].
    shift: Tensor,
    channels: usize,
    eps: f64,
}

impl BatchNorm2d {
    /// Create a batch-norm layer from trained parameters.
    ///
    /// All four tensors must be shaped `[C]`.
    pub fn new(
        gamma: &Tensor,
        beta: &Tensor,
        running_mean: &Tensor,
        running_var: &Tensor,
        eps: f64,
    ) -> Result<Self> {
        let channels = gamma.dims().first().copied().unwrap_or(0);
        for (name, t) in [
            ("weight", gamma),
            ("bias", beta),
            ("running_mean", running_mean),
            ("running_var", running_var),
        ] {
            if t.dims() != [channels] || channels == 0 {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "batchnorm {}: expected [{}], got {:?}",
                    name,
                    channels,
                    t.dims()
                )));
            }
        }

        let scale = gamma.div(&(running_var + eps)?.sqrt()?)?;
        ensure_finite(&scale, "batchnorm scale")?;
        let shift = beta.sub(&running_mean.mul(&scale)?)?;

        Ok(Self {
            scale: scale.reshape((1, channels, 1, 1))?,
            shift: shift.reshape((1, channels, 1, 1))?,
            channels,
            eps,
        })
    }

    /// Identity normalization (gamma=1, beta=0, mean=0, var=1) for testing.
    pub fn identity(channels: usize, eps: f64, device: &Device) -> Result<Self> {
        let ones = Tensor::ones(channels, DType::F32, device)?;
        let zeros = Tensor::zeros(channels, DType::F32, device)?;
        Self::new(&ones, &zeros, &zeros, &ones, eps)
    }

    /// Output dims (unchanged), or `ShapeMismatch` on a channel mismatch.
    pub fn output_dims(&self, input: FeatureDims) -> Result<FeatureDims> {
        if input.channels != self.channels {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "batchnorm expects {} channels, got {}",
                self.channels, input.channels
            )));
        }
        Ok(input)
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [C, H, W] or [N, C, H, W]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.output_dims(FeatureDims::from_shape(x.dims())?)?;

        let (x, added) = as_batched(x)?;
        let y = x.broadcast_mul(&self.scale)?.broadcast_add(&self.shift)?;
        restore_batch(y, added)
    }

    /// Number of channels.
    pub fn channels(&self) -> usize {
        self.channels
    }

    /// Get epsilon value.
    pub fn eps(&self) -> f64 {
        self.eps
    }

    /// Number of scalar parameters in the trained artifact.
    pub fn parameter_count(&self) -> usize {
        4 * self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batchnorm_identity_is_near_noop() {
        let bn = BatchNorm2d::identity(4, DEFAULT_EPS, &Device::Cpu).unwrap();
        let x = Tensor::randn(0.0f32, 1.0, &[4, 3, 3], &Device::Cpu).unwrap();
        let y = bn.forward(&x).unwrap();
        assert_eq!(y.dims(), x.dims());

        let diff: f32 = (y - &x)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-4, "max diff {}", diff);
    }

    #[test]
    fn batchnorm_matches_formula() {
        let dev = Device::Cpu;
        let gamma = Tensor::new(&[2.0f32, 0.5], &dev).unwrap();
        let beta = Tensor::new(&[1.0f32, -1.0], &dev).unwrap();
        let mean = Tensor::new(&[3.0f32, -2.0], &dev).unwrap();
        let var = Tensor::new(&[4.0f32, 0.25], &dev).unwrap();
        let bn = BatchNorm2d::new(&gamma, &beta, &mean, &var, 0.0).unwrap();

        // One pixel per channel.
        let x = Tensor::new(&[5.0f32, 0.0], &dev)
            .unwrap()
            .reshape((2, 1, 1))
            .unwrap();
        let y: Vec<f32> = bn.forward(&x).unwrap().flatten_all().unwrap().to_vec1().unwrap();

        // (5 - 3) / 2 * 2 + 1 = 3 ; (0 + 2) / 0.5 * 0.5 - 1 = 1
        assert!((y[0] - 3.0).abs() < 1e-5);
        assert!((y[1] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn batchnorm_rejects_channel_mismatch() {
        let bn = BatchNorm2d::identity(8, DEFAULT_EPS, &Device::Cpu).unwrap();
        let x = Tensor::zeros((4, 2, 2), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(
            bn.forward(&x),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn batchnorm_rejects_inconsistent_parameters() {
        let dev = Device::Cpu;
        let four = Tensor::ones(4, DType::F32, &dev).unwrap();
        let three = Tensor::ones(3, DType::F32, &dev).unwrap();
        let result = BatchNorm2d::new(&four, &four, &four, &three, DEFAULT_EPS);
        assert!(matches!(result, Err(PhytoscanError::ShapeMismatch(_))));
    }

    #[test]
    fn batchnorm_negative_variance_is_numeric_fault() {
        let dev = Device::Cpu;
        let ones = Tensor::ones(2, DType::F32, &dev).unwrap();
        let zeros = Tensor::zeros(2, DType::F32, &dev).unwrap();
        let var = Tensor::new(&[1.0f32, -1.0], &dev).unwrap();
        let result = BatchNorm2d::new(&ones, &zeros, &zeros, &var, DEFAULT_EPS);
        assert!(matches!(result, Err(PhytoscanError::NumericFault { .. })));
    }
}

//! 3×3 same-padded 2D convolution.
//!
//! # Formula
//!
//! `y[o, i, j] = b[o] + Σ_c Σ_u Σ_v w[o, c, u, v] · x_pad[c, i + u, j + v]`
//!
//! where `x_pad` is the input zero-padded by one pixel on every border, so
//! the output keeps the input's spatial size.

use crate::error::{PhytoscanError, Result};
use crate::tensor::{as_batched, restore_batch, FeatureDims};
use candle_core::{DType, Device, Tensor};

/// Side length of the square kernel.
pub const KERNEL_SIZE: usize = 3;
/// Zero padding added on every border.
pub const PADDING: usize = 1;
/// Step between kernel applications.
pub const STRIDE: usize = 1;

/// 2D convolution with a 3×3 kernel, stride 1 and padding 1.
#[derive(Debug, Clone)]
pub struct Conv2d {
    /// Kernel: [out_channels, in_channels, 3, 3]
    weight: Tensor,
    /// Bias: [out_channels]
    bias: Option<Tensor>,
    in_channels: usize,
    out_channels: usize,
}

impl Conv2d {
    /// Create a convolution from a kernel and optional bias.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (out_channels, in_channels) = match *weight.dims() {
            [o, i, kh, kw] if kh == KERNEL_SIZE && kw == KERNEL_SIZE => (o, i),
            _ => {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "conv kernel: expected [out, in, {k}, {k}], got {:?}",
                    weight.dims(),
                    k = KERNEL_SIZE
                )))
            }
        };
        if let Some(b) = &bias {
            if b.dims() != [out_channels] {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "conv bias: expected [{}], got {:?}",
                    out_channels,
                    b.dims()
                )));
            }
        }
        Ok(Self {
            weight,
            bias,
            in_channels,
            out_channels,
        })
    }

    /// Create a convolution with random weights (for testing).
    pub fn random(in_channels: usize, out_channels: usize, device: &Device) -> Result<Self> {
        let std = (2.0 / (in_channels * KERNEL_SIZE * KERNEL_SIZE) as f64).sqrt();
        let weight = Tensor::randn(
            0.0f32,
            std as f32,
            &[out_channels, in_channels, KERNEL_SIZE, KERNEL_SIZE],
            device,
        )?;
        let bias = Tensor::zeros(out_channels, DType::F32, device)?;
        Self::new(weight, Some(bias))
    }

    /// Output dims for a given input, or `ShapeMismatch` if the channel
    /// count disagrees with the kernel.
    pub fn output_dims(&self, input: FeatureDims) -> Result<FeatureDims> {
        if input.channels != self.in_channels {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "conv expects {} input channels, got {}",
                self.in_channels, input.channels
            )));
        }
        let height = (input.height + 2 * PADDING - KERNEL_SIZE) / STRIDE + 1;
        let width = (input.width + 2 * PADDING - KERNEL_SIZE) / STRIDE + 1;
        Ok(input
            .with_channels(self.out_channels)
            .with_spatial(height, width))
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [C, H, W] or [N, C, H, W]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.output_dims(FeatureDims::from_shape(x.dims())?)?;

        let (x, added) = as_batched(x)?;
        let y = x.conv2d(&self.weight, PADDING, STRIDE, 1, 1)?;
        let y = match &self.bias {
            Some(b) => y.broadcast_add(&b.reshape((1, self.out_channels, 1, 1))?)?,
            None => y,
        };
        restore_batch(y, added)
    }

    /// Number of input channels.
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Number of output channels.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Kernel tensor.
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    /// Bias tensor, if any.
    pub fn bias(&self) -> Option<&Tensor> {
        self.bias.as_ref()
    }

    /// Number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.weight.elem_count() + self.bias.as_ref().map_or(0, |b| b.elem_count())
    }
}

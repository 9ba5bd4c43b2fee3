//! Non-overlapping 2D max pooling.

use crate::error::{PhytoscanError, Result};
use crate::tensor::{as_batched, restore_batch, FeatureDims};
use candle_core::Tensor;

/// Pooling window used throughout the ResNet9 graph.
pub const DEFAULT_POOL: usize = 4;

/// Max pooling with a square `kernel × kernel` window and stride equal to
/// the kernel.
///
/// Spatial dims must divide evenly by the kernel; a remainder is a
/// `ShapeMismatch`, never a silent floor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaxPool2d {
    kernel: usize,
}

impl MaxPool2d {
    /// Create a pooling layer.
    pub fn new(kernel: usize) -> Result<Self> {
        if kernel == 0 {
            return Err(PhytoscanError::InvalidConfig(
                "pool kernel must be positive".to_string(),
            ));
        }
        Ok(Self { kernel })
    }

    /// Window side length.
    pub fn kernel(&self) -> usize {
        self.kernel
    }

    /// Output dims for a given input.
    pub fn output_dims(&self, input: FeatureDims) -> Result<FeatureDims> {
        if input.height % self.kernel != 0 || input.width % self.kernel != 0 {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "maxpool({}) needs spatial dims divisible by {}, got {}x{}",
                self.kernel, self.kernel, input.height, input.width
            )));
        }
        Ok(input.with_spatial(input.height / self.kernel, input.width / self.kernel))
    }

    /// Forward pass.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.output_dims(FeatureDims::from_shape(x.dims())?)?;

        let (x, added) = as_batched(x)?;
        let y = x.max_pool2d(self.kernel)?;
        restore_batch(y, added)
    }
}

impl Default for MaxPool2d {
    fn default() -> Self {
        Self {
            kernel: DEFAULT_POOL,
        }
    }
}

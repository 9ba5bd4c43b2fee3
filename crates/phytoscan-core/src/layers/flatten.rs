//! Flatten a feature map into a feature vector.

use crate::error::{PhytoscanError, Result};
use candle_core::Tensor;

/// Collapse `(C, H, W)` into `(C·H·W)` and `(N, C, H, W)` into
/// `(N, C·H·W)`, keeping row-major order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flatten;

impl Flatten {
    /// Create a flatten layer.
    pub fn new() -> Self {
        Self
    }

    /// Output shape for a given input shape.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match *input {
            [c, h, w] => Ok(vec![c * h * w]),
            [n, c, h, w] => Ok(vec![n, c * h * w]),
            _ => Err(PhytoscanError::ShapeMismatch(format!(
                "flatten expects rank 3 or 4, got {:?}",
                input
            ))),
        }
    }

    /// Forward pass.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let shape = self.output_shape(x.dims())?;
        Ok(x.reshape(shape)?)
    }
}

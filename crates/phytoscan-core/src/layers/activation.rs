//! Elementwise activations.

use crate::error::Result;
use candle_core::Tensor;

/// Rectified linear unit: `max(0, x)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Relu;

impl Relu {
    /// Create a ReLU.
    pub fn new() -> Self {
        Self
    }

    /// Forward pass. Shape-preserving for any rank.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        Ok(x.relu()?)
    }
}

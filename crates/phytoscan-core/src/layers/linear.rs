//! Dense affine layer.
//!
//! # Formula
//!
//! `y = W · x + b`, with `W` stored as `[out_features, in_features]`.

use crate::error::{PhytoscanError, Result};
use candle_core::{DType, Device, Tensor};

/// Fully connected layer.
#[derive(Debug, Clone)]
pub struct Linear {
    /// Weight: [out_features, in_features]
    weight: Tensor,
    /// Bias: [out_features]
    bias: Option<Tensor>,
    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a linear layer with given weights.
    pub fn new(weight: Tensor, bias: Option<Tensor>) -> Result<Self> {
        let (out_features, in_features) = match *weight.dims() {
            [o, i] => (o, i),
            _ => {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "linear weight: expected [out, in], got {:?}",
                    weight.dims()
                )))
            }
        };
        if let Some(b) = &bias {
            if b.dims() != [out_features] {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "linear bias: expected [{}], got {:?}",
                    out_features,
                    b.dims()
                )));
            }
        }
        Ok(Self {
            weight,
            bias,
            in_features,
            out_features,
        })
    }

    /// Create a linear layer with random weights (for testing).
    pub fn random(in_features: usize, out_features: usize, device: &Device) -> Result<Self> {
        let std = (1.0 / in_features as f64).sqrt() as f32;
        let weight = Tensor::randn(0.0f32, std, &[out_features, in_features], device)?;
        let bias = Tensor::zeros(out_features, DType::F32, device)?;
        Self::new(weight, Some(bias))
    }

    /// Output shape for `[in]` or `[N, in]` inputs.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let (batch, features) = match *input {
            [f] => (None, f),
            [n, f] => (Some(n), f),
            _ => {
                return Err(PhytoscanError::ShapeMismatch(format!(
                    "linear expects [in] or [N, in], got {:?}",
                    input
                )))
            }
        };
        if features != self.in_features {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "linear expects {} input features, got {}",
                self.in_features, features
            )));
        }
        Ok(match batch {
            Some(n) => vec![n, self.out_features],
            None => vec![self.out_features],
        })
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Input tensor [in_features] or [batch, in_features]
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.output_shape(x.dims())?;

        let unbatched = x.rank() == 1;
        let x_2d = if unbatched { x.unsqueeze(0)? } else { x.clone() };

        // x @ W^T -> [batch, out_features]
        let y = x_2d.matmul(&self.weight.t()?)?;
        let y = match &self.bias {
            Some(b) => y.broadcast_add(b)?,
            None => y,
        };

        if unbatched {
            Ok(y.squeeze(0)?)
        } else {
            Ok(y)
        }
    }

    /// Number of input features.
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Number of output features.
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Number of scalar parameters.
    pub fn parameter_count(&self) -> usize {
        self.weight.elem_count() + self.bias.as_ref().map_or(0, |b| b.elem_count())
    }
}

//! Layer primitives.
//!
//! The network is assembled from a closed set of tagged variants:
//! - [`Conv2d`] - 3×3 same-padded convolution
//! - [`BatchNorm2d`] - inference-mode batch normalization
//! - [`Relu`] - elementwise rectifier
//! - [`MaxPool2d`] - non-overlapping max pooling
//! - [`Flatten`] - feature map to feature vector
//! - [`Linear`] - dense affine map
//!
//! Each primitive validates its input shape before touching the tensor
//! backend, so a mismatch surfaces as
//! [`PhytoscanError::ShapeMismatch`](crate::PhytoscanError::ShapeMismatch).

mod activation;
mod batchnorm;
mod conv;
mod flatten;
mod linear;
mod pool;

pub use activation::Relu;
pub use batchnorm::{BatchNorm2d, DEFAULT_EPS};
pub use conv::{Conv2d, KERNEL_SIZE, PADDING, STRIDE};
pub use flatten::Flatten;
pub use linear::Linear;
pub use pool::{MaxPool2d, DEFAULT_POOL};

use crate::error::Result;
use crate::tensor::FeatureDims;
use candle_core::Tensor;

/// One step of a compiled layer sequence.
#[derive(Debug, Clone)]
pub enum Layer {
    /// 2D convolution.
    Conv2d(Conv2d),
    /// Batch normalization.
    BatchNorm2d(BatchNorm2d),
    /// ReLU activation.
    Relu(Relu),
    /// Max pooling.
    MaxPool2d(MaxPool2d),
    /// Flatten.
    Flatten(Flatten),
    /// Dense layer.
    Linear(Linear),
}

impl Layer {
    /// Short name of the variant.
    pub fn name(&self) -> &'static str {
        match self {
            Layer::Conv2d(_) => "Conv2d",
            Layer::BatchNorm2d(_) => "BatchNorm2d",
            Layer::Relu(_) => "ReLU",
            Layer::MaxPool2d(_) => "MaxPool2d",
            Layer::Flatten(_) => "Flatten",
            Layer::Linear(_) => "Linear",
        }
    }

    /// Static shape inference: the output shape this layer produces for
    /// `input`, or `ShapeMismatch`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Layer::Conv2d(l) => Ok(l.output_dims(FeatureDims::from_shape(input)?)?.to_shape()),
            Layer::BatchNorm2d(l) => {
                Ok(l.output_dims(FeatureDims::from_shape(input)?)?.to_shape())
            }
            Layer::Relu(_) => Ok(input.to_vec()),
            Layer::MaxPool2d(l) => {
                Ok(l.output_dims(FeatureDims::from_shape(input)?)?.to_shape())
            }
            Layer::Flatten(l) => l.output_shape(input),
            Layer::Linear(l) => l.output_shape(input),
        }
    }

    /// Apply the layer.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Layer::Conv2d(l) => l.forward(x),
            Layer::BatchNorm2d(l) => l.forward(x),
            Layer::Relu(l) => l.forward(x),
            Layer::MaxPool2d(l) => l.forward(x),
            Layer::Flatten(l) => l.forward(x),
            Layer::Linear(l) => l.forward(x),
        }
    }

    /// Number of trained scalars carried by the layer.
    pub fn parameter_count(&self) -> usize {
        match self {
            Layer::Conv2d(l) => l.parameter_count(),
            Layer::BatchNorm2d(l) => l.parameter_count(),
            Layer::Linear(l) => l.parameter_count(),
            Layer::Relu(_) | Layer::MaxPool2d(_) | Layer::Flatten(_) => 0,
        }
    }
}

impl From<Conv2d> for Layer {
    fn from(l: Conv2d) -> Self {
        Layer::Conv2d(l)
    }
}

impl From<BatchNorm2d> for Layer {
    fn from(l: BatchNorm2d) -> Self {
        Layer::BatchNorm2d(l)
    }
}

impl From<MaxPool2d> for Layer {
    fn from(l: MaxPool2d) -> Self {
        Layer::MaxPool2d(l)
    }
}

impl From<Linear> for Layer {
    fn from(l: Linear) -> Self {
        Layer::Linear(l)
    }
}

/// Run `layers` in order, threading the output of each into the next.
pub fn run_sequence(layers: &[Layer], x: &Tensor) -> Result<Tensor> {
    let mut out = x.clone();
    for layer in layers {
        out = layer.forward(&out)?;
    }
    Ok(out)
}

/// Propagate a shape through `layers` without computing anything.
pub fn infer_sequence(layers: &[Layer], input: &[usize]) -> Result<Vec<usize>> {
    layers
        .iter()
        .try_fold(input.to_vec(), |shape, layer| layer.output_shape(&shape))
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::PhytoscanError;
    use candle_core::Device;
    use proptest::prelude::*;

    prop_compose! {
        /// `(C, H, W)` with both spatial dims divisible by the pool window.
        fn arb_poolable_shape()(
            channels in 1usize..5,
            h in 1usize..5,
            w in 1usize..5,
        ) -> Vec<usize> {
            vec![channels, h * DEFAULT_POOL, w * DEFAULT_POOL]
        }
    }

    prop_compose! {
        /// `(C, H, W)` whose height leaves a remainder under the pool window.
        fn arb_ragged_shape()(
            channels in 1usize..5,
            h in 1usize..5,
            rem in 1usize..DEFAULT_POOL,
            w in 1usize..5,
        ) -> Vec<usize> {
            vec![channels, h * DEFAULT_POOL + rem, w * DEFAULT_POOL]
        }
    }

    fn block_for(in_channels: usize, out_channels: usize) -> Vec<Layer> {
        let dev = Device::Cpu;
        vec![
            Conv2d::random(in_channels, out_channels, &dev).unwrap().into(),
            BatchNorm2d::identity(out_channels, DEFAULT_EPS, &dev)
                .unwrap()
                .into(),
            Layer::Relu(Relu),
            MaxPool2d::default().into(),
            Layer::Flatten(Flatten),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        /// Invariant: static inference predicts the computed shape
        #[test]
        fn inferred_shape_equals_computed(shape in arb_poolable_shape(), out in 1usize..6) {
            let layers = block_for(shape[0], out);
            let inferred = infer_sequence(&layers, &shape).unwrap();
            prop_assert_eq!(
                inferred.clone(),
                vec![out * (shape[1] / DEFAULT_POOL) * (shape[2] / DEFAULT_POOL)]
            );

            let x = Tensor::randn(0.0f32, 1.0, shape.as_slice(), &Device::Cpu).unwrap();
            let y = run_sequence(&layers, &x).unwrap();
            prop_assert_eq!(y.dims(), inferred.as_slice());
        }

        /// Invariant: an indivisible spatial dim fails both statically and at run time
        #[test]
        fn ragged_shape_is_rejected(shape in arb_ragged_shape()) {
            let layers = block_for(shape[0], 2);
            prop_assert!(matches!(
                infer_sequence(&layers, &shape),
                Err(PhytoscanError::ShapeMismatch(_))
            ));

            let x = Tensor::zeros(shape.as_slice(), candle_core::DType::F32, &Device::Cpu).unwrap();
            prop_assert!(matches!(
                run_sequence(&layers, &x),
                Err(PhytoscanError::ShapeMismatch(_))
            ));
        }
    }
}

//! Graph building blocks: conv blocks, residual pairs and the classifier head.

use super::topology::BlockSpec;
use super::ResNet9Config;
use crate::error::{PhytoscanError, Result};
use crate::layers::{
    infer_sequence, run_sequence, BatchNorm2d, Conv2d, Flatten, Layer, Linear, MaxPool2d, Relu,
};
use crate::tensor::{ensure_finite, ensure_same_shape};
use crate::weights::{ParamRole, WeightStore};
use candle_core::{Device, Tensor};

/// Conv and batch norm lead every block's layer list.
const AFFINE_LAYERS: usize = 2;

/// `Conv2d → BatchNorm2d → ReLU → [MaxPool2d]`.
#[derive(Debug, Clone)]
pub struct ConvBlock {
    name: String,
    in_channels: usize,
    out_channels: usize,
    pooled: bool,
    layers: Vec<Layer>,
}

impl ConvBlock {
    /// Assemble a block from its layers.
    pub fn new(
        name: impl Into<String>,
        conv: Conv2d,
        bn: BatchNorm2d,
        pool: Option<MaxPool2d>,
    ) -> Result<Self> {
        let name = name.into();
        if conv.out_channels() != bn.channels() {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "{}: conv produces {} channels, batchnorm expects {}",
                name,
                conv.out_channels(),
                bn.channels()
            )));
        }

        let in_channels = conv.in_channels();
        let out_channels = conv.out_channels();
        let pooled = pool.is_some();
        let mut layers = vec![Layer::Conv2d(conv), Layer::BatchNorm2d(bn), Layer::Relu(Relu)];
        if let Some(pool) = pool {
            layers.push(Layer::MaxPool2d(pool));
        }

        Ok(Self {
            name,
            in_channels,
            out_channels,
            pooled,
            layers,
        })
    }

    /// Build the block described by `spec` from trained weights.
    pub fn from_weights(
        spec: &BlockSpec,
        store: &WeightStore,
        config: &ResNet9Config,
    ) -> Result<Self> {
        let conv_id = spec.conv_id();
        let bn_id = spec.bn_id();

        let conv = Conv2d::new(
            store.param(&conv_id, ParamRole::Weight)?.clone(),
            Some(store.param(&conv_id, ParamRole::Bias)?.clone()),
        )?;
        let bn = BatchNorm2d::new(
            store.param(&bn_id, ParamRole::Weight)?,
            store.param(&bn_id, ParamRole::Bias)?,
            store.param(&bn_id, ParamRole::RunningMean)?,
            store.param(&bn_id, ParamRole::RunningVar)?,
            config.bn_eps,
        )?;
        let pool = if spec.pool {
            Some(MaxPool2d::new(config.pool_size)?)
        } else {
            None
        };

        Self::new(spec.name.clone(), conv, bn, pool)
    }

    /// Create a block with random conv weights and identity batch norm
    /// (for testing).
    pub fn random(
        name: &str,
        in_channels: usize,
        out_channels: usize,
        pool: Option<usize>,
        device: &Device,
    ) -> Result<Self> {
        let conv = Conv2d::random(in_channels, out_channels, device)?;
        let bn = BatchNorm2d::identity(out_channels, crate::layers::DEFAULT_EPS, device)?;
        let pool = pool.map(MaxPool2d::new).transpose()?;
        Self::new(name, conv, bn, pool)
    }

    /// Block name, e.g. `conv2` or `res1.0`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Input channels.
    pub fn in_channels(&self) -> usize {
        self.in_channels
    }

    /// Output channels.
    pub fn out_channels(&self) -> usize {
        self.out_channels
    }

    /// Whether the block downsamples.
    pub fn pooled(&self) -> bool {
        self.pooled
    }

    /// Compiled layer sequence.
    pub fn layers(&self) -> &[Layer] {
        &self.layers
    }

    /// Static output shape for `input`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        infer_sequence(&self.layers, input)
    }

    /// Forward pass.
    ///
    /// The conv/batch-norm output is checked for NaN and infinities before
    /// the ReLU, which would otherwise clamp them to finite values.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let (affine, rest) = self.layers.split_at(AFFINE_LAYERS);
        let pre_activation = run_sequence(affine, x)?;
        ensure_finite(&pre_activation, &self.name)?;
        run_sequence(rest, &pre_activation)
    }

    /// Trained scalars in the block.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }
}

/// Identity-skip residual: `x + second(first(x))`.
#[derive(Debug, Clone)]
pub struct ResidualPair {
    name: String,
    first: ConvBlock,
    second: ConvBlock,
}

impl ResidualPair {
    /// Pair two blocks. The branch must preserve shape: no pooling, and the
    /// second block must return to the first block's input width.
    pub fn new(name: impl Into<String>, first: ConvBlock, second: ConvBlock) -> Result<Self> {
        let name = name.into();
        if first.out_channels() != second.in_channels() {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "{}: {} emits {} channels, {} expects {}",
                name,
                first.name(),
                first.out_channels(),
                second.name(),
                second.in_channels()
            )));
        }
        if second.out_channels() != first.in_channels() || first.pooled() || second.pooled() {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "{}: residual branch must preserve shape ({} -> {} channels, pooled: {}/{})",
                name,
                first.in_channels(),
                second.out_channels(),
                first.pooled(),
                second.pooled()
            )));
        }
        Ok(Self {
            name,
            first,
            second,
        })
    }

    /// Stage name, e.g. `res1`.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The two inner blocks.
    pub fn blocks(&self) -> [&ConvBlock; 2] {
        [&self.first, &self.second]
    }

    /// Static output shape; fails if the branch does not preserve `input`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        let mid = self.first.output_shape(input)?;
        let out = self.second.output_shape(&mid)?;
        if out != input {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "{}: skip {:?} vs branch {:?}",
                self.name, input, out
            )));
        }
        Ok(out)
    }

    /// Forward pass.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let branch = self.second.forward(&self.first.forward(x)?)?;
        ensure_same_shape(x, &branch, &self.name)?;
        Ok((x + branch)?)
    }

    /// Trained scalars in both blocks.
    pub fn parameter_count(&self) -> usize {
        self.first.parameter_count() + self.second.parameter_count()
    }
}

/// `MaxPool2d → Flatten → Linear`.
#[derive(Debug, Clone)]
pub struct ClassifierHead {
    layers: Vec<Layer>,
    num_classes: usize,
}

impl ClassifierHead {
    /// Assemble the head.
    pub fn new(pool: MaxPool2d, linear: Linear) -> Self {
        let num_classes = linear.out_features();
        Self {
            layers: vec![
                Layer::MaxPool2d(pool),
                Layer::Flatten(Flatten),
                Layer::Linear(linear),
            ],
            num_classes,
        }
    }

    /// Build the head from trained weights.
    pub fn from_weights(
        linear_id: &str,
        store: &WeightStore,
        config: &ResNet9Config,
    ) -> Result<Self> {
        let linear = Linear::new(
            store.param(linear_id, ParamRole::Weight)?.clone(),
            Some(store.param(linear_id, ParamRole::Bias)?.clone()),
        )?;
        Ok(Self::new(MaxPool2d::new(config.pool_size)?, linear))
    }

    /// Output classes.
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Static output shape for `input`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        infer_sequence(&self.layers, input)
    }

    /// Forward pass producing logits.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        run_sequence(&self.layers, x)
    }

    /// Trained scalars in the head.
    pub fn parameter_count(&self) -> usize {
        self.layers.iter().map(Layer::parameter_count).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn conv_block_pools_and_widens() {
        let block = ConvBlock::random("conv2", 3, 6, Some(4), &Device::Cpu).unwrap();
        assert_eq!(block.output_shape(&[3, 16, 16]).unwrap(), vec![6, 4, 4]);

        let x = Tensor::randn(0.0f32, 1.0, &[3, 16, 16], &Device::Cpu).unwrap();
        let y = block.forward(&x).unwrap();
        assert_eq!(y.dims(), &[6, 4, 4]);

        // ReLU comes before the pool, so nothing is negative.
        let min: f32 = y.flatten_all().unwrap().min(0).unwrap().to_scalar().unwrap();
        assert!(min >= 0.0);
    }

    #[test]
    fn nan_bias_is_reported_before_relu() {
        let dev = Device::Cpu;
        let weight = Tensor::randn(0.0f32, 0.1, &[2, 3, 3, 3], &dev).unwrap();
        let bias = Tensor::new(&[f32::NAN, 0.0], &dev).unwrap();
        let conv = Conv2d::new(weight, Some(bias)).unwrap();
        let bn = BatchNorm2d::identity(2, 1e-5, &dev).unwrap();
        let block = ConvBlock::new("conv1", conv, bn, None).unwrap();

        let x = Tensor::zeros((3, 4, 4), candle_core::DType::F32, &dev).unwrap();
        match block.forward(&x) {
            Err(PhytoscanError::NumericFault { stage, count }) => {
                assert_eq!(stage, "conv1");
                assert_eq!(count, 16);
            }
            other => panic!("expected NumericFault, got {:?}", other),
        }
    }

    #[test]
    fn negative_overflow_is_not_clamped_to_zero() {
        // Finite weights whose sum overflows to -inf; ReLU alone would
        // turn the result into zeros.
        let dev = Device::Cpu;
        let weight = Tensor::full(-f32::MAX, (2, 3, 3, 3), &dev).unwrap();
        let conv = Conv2d::new(weight, None).unwrap();
        let bn = BatchNorm2d::identity(2, 1e-5, &dev).unwrap();
        let block = ConvBlock::new("conv1", conv, bn, Some(MaxPool2d::new(4).unwrap())).unwrap();

        let x = Tensor::ones((3, 4, 4), candle_core::DType::F32, &dev).unwrap();
        assert!(matches!(
            block.forward(&x),
            Err(PhytoscanError::NumericFault { count: 32, .. })
        ));
    }

    #[test]
    fn conv_block_rejects_inconsistent_batchnorm() {
        let conv = Conv2d::random(3, 6, &Device::Cpu).unwrap();
        let bn = BatchNorm2d::identity(5, 1e-5, &Device::Cpu).unwrap();
        assert!(matches!(
            ConvBlock::new("bad", conv, bn, None),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn residual_adds_skip() {
        let dev = Device::Cpu;
        let a = ConvBlock::random("res.0", 4, 4, None, &dev).unwrap();
        let b = ConvBlock::random("res.1", 4, 4, None, &dev).unwrap();
        let pair = ResidualPair::new("res", a.clone(), b.clone()).unwrap();

        let x = Tensor::randn(0.0f32, 1.0, &[4, 8, 8], &dev).unwrap();
        let y = pair.forward(&x).unwrap();
        let branch = b.forward(&a.forward(&x).unwrap()).unwrap();
        let expected = (&x + &branch).unwrap();

        let diff: f32 = (y - expected)
            .unwrap()
            .abs()
            .unwrap()
            .flatten_all()
            .unwrap()
            .max(0)
            .unwrap()
            .to_scalar()
            .unwrap();
        assert!(diff < 1e-6);
        assert_eq!(pair.output_shape(&[4, 8, 8]).unwrap(), vec![4, 8, 8]);
    }

    #[test]
    fn residual_with_pooling_branch_is_rejected() {
        let dev = Device::Cpu;
        let a = ConvBlock::random("res.0", 4, 4, Some(2), &dev).unwrap();
        let b = ConvBlock::random("res.1", 4, 4, None, &dev).unwrap();
        assert!(matches!(
            ResidualPair::new("res", a, b),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn residual_with_width_change_is_rejected() {
        let dev = Device::Cpu;
        let a = ConvBlock::random("res.0", 4, 8, None, &dev).unwrap();
        let b = ConvBlock::random("res.1", 8, 8, None, &dev).unwrap();
        assert!(matches!(
            ResidualPair::new("res", a, b),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn head_rejects_wrong_feature_count() {
        let dev = Device::Cpu;
        let head = ClassifierHead::new(
            MaxPool2d::new(4).unwrap(),
            Linear::random(8, 38, &dev).unwrap(),
        );
        assert_eq!(head.output_shape(&[8, 4, 4]).unwrap(), vec![38]);

        // 8 channels at 8x8 pool to 2x2, flattening to 32 features.
        let x = Tensor::randn(0.0f32, 1.0, &[8, 8, 8], &dev).unwrap();
        assert!(matches!(
            head.forward(&x),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
        assert!(matches!(
            head.output_shape(&[8, 8, 8]),
            Err(PhytoscanError::ShapeMismatch(_))
        ));
    }
}

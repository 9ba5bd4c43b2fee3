//! Compiled ResNet9 classifier.

use super::block::{ClassifierHead, ConvBlock, ResidualPair};
use super::topology::{schema, stages, StageSpec};
use super::ResNet9Config;
use crate::error::{PhytoscanError, Result};
use crate::tensor::{ensure_finite, FeatureDims};
use crate::weights::WeightStore;
use candle_core::{Device, Tensor};
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{debug, info};

/// One executable stage of the graph.
#[derive(Debug, Clone)]
pub enum Stage {
    /// Plain conv block.
    Block(ConvBlock),
    /// Residual pair.
    Residual(ResidualPair),
    /// Classifier head.
    Head(ClassifierHead),
}

impl Stage {
    /// Stage name.
    pub fn name(&self) -> &str {
        match self {
            Stage::Block(b) => b.name(),
            Stage::Residual(r) => r.name(),
            Stage::Head(_) => "classifier",
        }
    }

    /// Static output shape for `input`.
    pub fn output_shape(&self, input: &[usize]) -> Result<Vec<usize>> {
        match self {
            Stage::Block(b) => b.output_shape(input),
            Stage::Residual(r) => r.output_shape(input),
            Stage::Head(h) => h.output_shape(input),
        }
    }

    /// Apply the stage.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        match self {
            Stage::Block(b) => b.forward(x),
            Stage::Residual(r) => r.forward(x),
            Stage::Head(h) => h.forward(x),
        }
    }

    /// Trained scalars in the stage.
    pub fn parameter_count(&self) -> usize {
        match self {
            Stage::Block(b) => b.parameter_count(),
            Stage::Residual(r) => r.parameter_count(),
            Stage::Head(h) => h.parameter_count(),
        }
    }
}

/// The ResNet9 plant-disease classifier.
///
/// Immutable after construction: the execution order and every stage's
/// output shape are fixed by [`ResNet9::from_weights`], which rejects any
/// weight set that cannot produce `num_classes` logits from the configured
/// input shape.
#[derive(Debug, Clone)]
pub struct ResNet9 {
    config: ResNet9Config,
    stages: Vec<Stage>,
    /// Output shape of each stage for an unbatched input.
    stage_shapes: Vec<Vec<usize>>,
    strict_numerics: bool,
}

impl ResNet9 {
    /// Compile the graph from a validated weight store.
    pub fn from_weights(store: &WeightStore, config: &ResNet9Config) -> Result<Self> {
        config.validate()?;
        let start = Instant::now();

        let compiled = stages(config)
            .iter()
            .map(|spec| Self::compile_stage(spec, store, config))
            .collect::<Result<Vec<_>>>()?;
        Self::from_stages(config.clone(), compiled, start)
    }

    /// Compile a graph with deterministic random weights (for testing and
    /// benchmarking).
    pub fn random(config: &ResNet9Config, seed: u64, device: &Device) -> Result<Self> {
        config.validate()?;
        let store = WeightStore::random(&schema(config), seed, device)?;
        Self::from_weights(&store, config)
    }

    fn compile_stage(
        spec: &StageSpec,
        store: &WeightStore,
        config: &ResNet9Config,
    ) -> Result<Stage> {
        Ok(match spec {
            StageSpec::Block(block) => Stage::Block(ConvBlock::from_weights(block, store, config)?),
            StageSpec::Residual { name, blocks } => {
                let [first, second] = blocks;
                Stage::Residual(ResidualPair::new(
                    name.clone(),
                    ConvBlock::from_weights(first, store, config)?,
                    ConvBlock::from_weights(second, store, config)?,
                )?)
            }
            StageSpec::Head { linear_id, .. } => {
                Stage::Head(ClassifierHead::from_weights(linear_id, store, config)?)
            }
        })
    }

    fn from_stages(config: ResNet9Config, stages: Vec<Stage>, start: Instant) -> Result<Self> {
        let mut shape = config.input_shape().to_vec();
        let mut stage_shapes = Vec::with_capacity(stages.len());
        for stage in &stages {
            shape = stage.output_shape(&shape)?;
            stage_shapes.push(shape.clone());
        }

        if shape != [config.num_classes] {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "graph produces {:?}, expected [{}] logits",
                shape, config.num_classes
            )));
        }

        let model = Self {
            config,
            stages,
            stage_shapes,
            strict_numerics: false,
        };
        info!(
            stages = model.stages.len(),
            parameters = model.parameter_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "compiled ResNet9"
        );
        Ok(model)
    }

    /// Finite-check the output of every stage instead of only the logits.
    pub fn with_strict_numerics(mut self, strict: bool) -> Self {
        self.strict_numerics = strict;
        self
    }

    /// Whether every stage is finite-checked.
    pub fn strict_numerics(&self) -> bool {
        self.strict_numerics
    }

    /// Model configuration.
    pub fn config(&self) -> &ResNet9Config {
        &self.config
    }

    /// Compiled stages in execution order.
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Per-stage output shapes for an unbatched input, paired with stage names.
    pub fn stage_shapes(&self) -> Vec<(&str, &[usize])> {
        self.stages
            .iter()
            .zip(&self.stage_shapes)
            .map(|(stage, shape)| (stage.name(), shape.as_slice()))
            .collect()
    }

    /// Total trained scalars.
    pub fn parameter_count(&self) -> usize {
        self.stages.iter().map(Stage::parameter_count).sum()
    }

    /// Number of output classes.
    pub fn num_classes(&self) -> usize {
        self.config.num_classes
    }

    fn check_input(&self, x: &Tensor) -> Result<()> {
        let dims = FeatureDims::from_shape(x.dims())?;
        let [c, h, w] = self.config.input_shape();
        if (dims.channels, dims.height, dims.width) != (c, h, w) {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "model expects ({}, {}, {}) input, got {:?}",
                c,
                h,
                w,
                x.dims()
            )));
        }
        Ok(())
    }

    /// Forward pass.
    ///
    /// # Arguments
    ///
    /// * `x` - Preprocessed image [C, H, W] or batch [N, C, H, W]
    ///
    /// # Returns
    ///
    /// Logits [num_classes] or [N, num_classes].
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        self.check_input(x)?;

        let mut out = x.clone();
        for stage in &self.stages {
            out = stage.forward(&out)?;
            debug!(stage = stage.name(), shape = ?out.dims(), "stage done");
            if self.strict_numerics {
                ensure_finite(&out, stage.name())?;
            }
        }
        if !self.strict_numerics {
            ensure_finite(&out, "logits")?;
        }
        Ok(out)
    }

    /// Forward pass returning every stage's output, for inspection.
    pub fn forward_traced(&self, x: &Tensor) -> Result<Vec<(String, Tensor)>> {
        self.check_input(x)?;

        let mut trace = Vec::with_capacity(self.stages.len());
        let mut out = x.clone();
        for stage in &self.stages {
            out = stage.forward(&out)?;
            trace.push((stage.name().to_string(), out.clone()));
        }
        Ok(trace)
    }

    /// Human-readable stage table.
    pub fn describe(&self) -> String {
        let mut s = String::new();
        let _ = writeln!(s, "ResNet9 input {:?}", self.config.input_shape());
        for ((name, shape), stage) in self.stage_shapes().into_iter().zip(&self.stages) {
            let _ = writeln!(
                s,
                "  {:<12} -> {:<16} params {}",
                name,
                format!("{:?}", shape),
                stage.parameter_count()
            );
        }
        let _ = write!(s, "  total parameters {}", self.parameter_count());
        s
    }
}

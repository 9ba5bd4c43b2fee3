//! High-level inference engine.

use candle_core::{Device, Tensor};
use phytoscan_core::{
    inference::{ClassificationResult, Normalization, Preprocessor},
    labels::DiseaseClass,
    model::{schema, ResNet9, ResNet9Config},
    weights::WeightStore,
    PhytoscanError, Result,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug_span, info, info_span};

/// Configuration for the inference engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Path to the safetensors weight archive.
    pub weights_path: PathBuf,
    /// Network configuration.
    pub model: ResNet9Config,
    /// Input normalization.
    pub normalization: Normalization,
    /// Finite-check every stage, not only the logits.
    pub strict_numerics: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            weights_path: PathBuf::new(),
            model: ResNet9Config::default(),
            normalization: Normalization::default(),
            strict_numerics: false,
        }
    }
}

impl EngineConfig {
    /// Load from JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// Where the builder gets its weights.
#[derive(Debug)]
enum WeightSource {
    /// Read `EngineConfig::weights_path`.
    Archive,
    /// Use an already loaded store.
    Store(WeightStore),
    /// Synthesize deterministic weights.
    Random(u64),
}

/// Builder for creating an Engine.
#[derive(Debug)]
pub struct EngineBuilder {
    config: EngineConfig,
    weights: WeightSource,
}

impl EngineBuilder {
    /// Create a new engine builder.
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            weights: WeightSource::Archive,
        }
    }

    /// Start from a full configuration.
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set weight archive path.
    pub fn weights_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.weights_path = path.into();
        self.weights = WeightSource::Archive;
        self
    }

    /// Use an already loaded weight store.
    pub fn weight_store(mut self, store: WeightStore) -> Self {
        self.weights = WeightSource::Store(store);
        self
    }

    /// Use deterministic synthetic weights (demos, tests, benchmarks).
    pub fn random_weights(mut self, seed: u64) -> Self {
        self.weights = WeightSource::Random(seed);
        self
    }

    /// Set model configuration.
    pub fn model_config(mut self, config: ResNet9Config) -> Self {
        self.config.model = config;
        self
    }

    /// Set input normalization.
    pub fn normalization(mut self, normalization: Normalization) -> Self {
        self.config.normalization = normalization;
        self
    }

    /// Finite-check every stage.
    pub fn strict_numerics(mut self, strict: bool) -> Self {
        self.config.strict_numerics = strict;
        self
    }

    /// Load weights, compile the graph and build the engine.
    ///
    /// Every failure here is fatal: no engine exists afterwards.
    pub fn build(self) -> Result<Engine> {
        let start = Instant::now();
        let config = self.config;
        config.model.validate()?;
        if !config.model.matches_label_set() {
            return Err(PhytoscanError::InvalidConfig(format!(
                "num_classes {} does not match the {} disease labels",
                config.model.num_classes,
                DiseaseClass::COUNT
            )));
        }

        let device = Device::Cpu;
        let preprocessor =
            Preprocessor::new(config.model.input_size, config.normalization, device.clone())?;

        let specs = schema(&config.model);
        let store = match self.weights {
            WeightSource::Archive => {
                if config.weights_path.as_os_str().is_empty() {
                    return Err(PhytoscanError::InvalidConfig(
                        "no weights path configured".to_string(),
                    ));
                }
                WeightStore::from_file(&config.weights_path, &specs, &device)?
            }
            WeightSource::Store(store) => store,
            WeightSource::Random(seed) => WeightStore::random(&specs, seed, &device)?,
        };

        let model = ResNet9::from_weights(&store, &config.model)?
            .with_strict_numerics(config.strict_numerics);

        info!(
            parameters = model.parameter_count(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "engine ready"
        );

        Ok(Engine {
            config,
            model,
            preprocessor,
        })
    }
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A raw interleaved pixel buffer with its dimensions.
#[derive(Debug, Clone, Copy)]
pub struct RawImage<'a> {
    /// Row-major `HWC` bytes.
    pub pixels: &'a [u8],
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Channels per pixel; must be 3.
    pub channels: usize,
}

impl<'a> RawImage<'a> {
    /// Describe an RGB buffer.
    pub fn rgb(pixels: &'a [u8], width: usize, height: usize) -> Self {
        Self {
            pixels,
            width,
            height,
            channels: 3,
        }
    }
}

/// High-level inference engine.
///
/// Immutable after [`EngineBuilder::build`]; share it across threads with
/// an `Arc` and call [`Engine::classify`] concurrently.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    model: ResNet9,
    preprocessor: Preprocessor,
}

impl Engine {
    /// Create a new engine builder.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Get engine configuration.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Get model reference.
    pub fn model(&self) -> &ResNet9 {
        &self.model
    }

    /// Get preprocessor reference.
    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    /// Classify a raw pixel buffer.
    ///
    /// # Errors
    ///
    /// `InvalidInput` for anything but a well-formed 3-channel buffer,
    /// `NumericFault` if the forward pass produces non-finite values.
    pub fn classify(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<ClassificationResult> {
        let _span = info_span!("classify", width, height, channels).entered();
        let input = self.preprocessor.from_raw(pixels, width, height, channels)?;
        self.classify_tensor(&input)
    }

    /// Decode a PNG or JPEG image and classify it.
    pub fn classify_encoded(&self, bytes: &[u8]) -> Result<ClassificationResult> {
        let _span = info_span!("classify_encoded", bytes = bytes.len()).entered();
        let input = self.preprocessor.from_encoded(bytes)?;
        self.classify_tensor(&input)
    }

    /// Classify an already preprocessed `(3, H, W)` tensor.
    pub fn classify_tensor(&self, input: &Tensor) -> Result<ClassificationResult> {
        if input.rank() != 3 {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "expected one (C, H, W) image, got {:?}",
                input.dims()
            )));
        }
        let logits = self.model.forward(input)?;
        let result = ClassificationResult::from_logits(&logits)?;
        info!(label = %result.label, confidence = result.confidence, "classified");
        Ok(result)
    }

    /// Classify several images in one batched forward pass.
    ///
    /// Results are in input order and equal per-image [`Engine::classify`].
    /// The first invalid image fails the whole batch.
    pub fn classify_batch(&self, images: &[RawImage<'_>]) -> Result<Vec<ClassificationResult>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }
        let _span = info_span!("classify_batch", size = images.len()).entered();

        let inputs = images
            .iter()
            .map(|img| {
                self.preprocessor
                    .from_raw(img.pixels, img.width, img.height, img.channels)
            })
            .collect::<Result<Vec<_>>>()?;
        let batch = Tensor::stack(&inputs, 0)?;
        let logits = self.model.forward(&batch)?;
        ClassificationResult::from_batch_logits(&logits)
    }

    /// Raw logits for a pixel buffer.
    pub fn logits(
        &self,
        pixels: &[u8],
        width: usize,
        height: usize,
        channels: usize,
    ) -> Result<Vec<f32>> {
        let _span = debug_span!("logits", width, height).entered();
        let input = self.preprocessor.from_raw(pixels, width, height, channels)?;
        Ok(self.model.forward(&input)?.to_vec1()?)
    }

    /// Raw logits for an encoded image.
    pub fn logits_encoded(&self, bytes: &[u8]) -> Result<Vec<f32>> {
        let _span = debug_span!("logits_encoded", bytes = bytes.len()).entered();
        let input = self.preprocessor.from_encoded(bytes)?;
        Ok(self.model.forward(&input)?.to_vec1()?)
    }

    /// Per-stage output shapes and parameter counts of the compiled graph.
    pub fn describe(&self) -> String {
        self.model.describe()
    }
}

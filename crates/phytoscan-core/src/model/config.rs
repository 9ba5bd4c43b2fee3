//! Model configuration.

use crate::error::{PhytoscanError, Result};
use crate::labels::DiseaseClass;
use crate::layers::{DEFAULT_EPS, DEFAULT_POOL};
use serde::{Deserialize, Serialize};

/// Fixed input resolution of the trained network.
pub const IMAGE_SIZE: usize = 256;

/// Configuration for the ResNet9 classifier.
///
/// The topology is fixed; only stage widths and numeric constants vary.
/// Defaults describe the trained PlantVillage artifact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResNet9Config {
    /// Input channels (3 for RGB).
    pub in_channels: usize,
    /// Number of output classes.
    pub num_classes: usize,
    /// Width of the first stage; later stages use 2×, 4× and 8× this.
    pub base_channels: usize,
    /// Square input side length in pixels.
    pub input_size: usize,
    /// Max-pool window (and stride).
    pub pool_size: usize,
    /// Batch-norm epsilon.
    pub bn_eps: f64,
}

impl ResNet9Config {
    /// Narrow variant with the same topology, for fast tests and benches.
    pub fn tiny() -> Self {
        Self {
            base_channels: 4,
            ..Self::default()
        }
    }

    /// Channel widths of the four stages: `[b, 2b, 4b, 8b]`.
    pub fn stage_channels(&self) -> [usize; 4] {
        let b = self.base_channels;
        [b, 2 * b, 4 * b, 8 * b]
    }

    /// Spatial side length entering the classifier's pool.
    pub fn head_input_size(&self) -> usize {
        self.input_size / self.pool_size.pow(3)
    }

    /// Feature count after the classifier's pool and flatten.
    pub fn head_features(&self) -> usize {
        let side = self.head_input_size() / self.pool_size;
        self.stage_channels()[3] * side * side
    }

    /// Input shape `(C, H, W)` the graph is compiled for.
    pub fn input_shape(&self) -> [usize; 3] {
        [self.in_channels, self.input_size, self.input_size]
    }

    /// Whether the class count matches the built-in disease label set.
    pub fn matches_label_set(&self) -> bool {
        self.num_classes == DiseaseClass::COUNT
    }

    /// Check that the configuration describes a constructible graph.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("in_channels", self.in_channels),
            ("num_classes", self.num_classes),
            ("base_channels", self.base_channels),
            ("input_size", self.input_size),
        ] {
            if value == 0 {
                return Err(PhytoscanError::InvalidConfig(format!(
                    "{} must be positive",
                    name
                )));
            }
        }
        if self.pool_size < 2 {
            return Err(PhytoscanError::InvalidConfig(format!(
                "pool_size must be at least 2, got {}",
                self.pool_size
            )));
        }
        let total_reduction = self.pool_size.pow(4);
        if self.input_size % total_reduction != 0 {
            return Err(PhytoscanError::InvalidConfig(format!(
                "input_size {} must be a multiple of pool_size^4 = {}",
                self.input_size, total_reduction
            )));
        }
        if !(self.bn_eps.is_finite() && self.bn_eps > 0.0) {
            return Err(PhytoscanError::InvalidConfig(format!(
                "bn_eps must be positive, got {}",
                self.bn_eps
            )));
        }
        Ok(())
    }

    /// Load from JSON file.
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }
}

impl Default for ResNet9Config {
    fn default() -> Self {
        Self {
            in_channels: 3,
            num_classes: DiseaseClass::COUNT,
            base_channels: 64,
            input_size: IMAGE_SIZE,
            pool_size: DEFAULT_POOL,
            bn_eps: DEFAULT_EPS,
        }
    }
}

//! SafeTensors weight store.
//!
//! The trained network ships as a safetensors archive keyed by the
//! PyTorch `state_dict` names of the original model, e.g.
//! `conv1.0.weight` or `res2.1.1.running_var`. Loading checks the archive
//! against an explicit schema ([`LayerSpec`] list) eagerly: every expected
//! tensor must be present with the exact shape the compiled graph needs.
//! Entries outside the schema (such as `num_batches_tracked`) are ignored.
//!
//! # Example
//!
//! ```ignore
//! use phytoscan_core::model::{schema, ResNet9Config};
//! use phytoscan_core::weights::WeightStore;
//!
//! let config = ResNet9Config::default();
//! let store = WeightStore::from_file("resnet9.safetensors".as_ref(), &schema(&config), &Device::Cpu)?;
//! let kernel = store.param("conv1.0", ParamRole::Weight)?;
//! ```

use crate::error::{PhytoscanError, Result};
use crate::tensor::count_non_finite;
use candle_core::{DType, Device, Tensor};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::SafeTensors;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::fs;
use std::path::Path;
use tracing::{debug, info, warn};

/// Role of a tensor within one layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ParamRole {
    /// Kernel, matrix, or batch-norm gamma.
    Weight,
    /// Additive bias, or batch-norm beta.
    Bias,
    /// Batch-norm running mean.
    RunningMean,
    /// Batch-norm running variance.
    RunningVar,
}

impl ParamRole {
    /// Suffix used in archive keys.
    pub fn as_str(&self) -> &'static str {
        match self {
            ParamRole::Weight => "weight",
            ParamRole::Bias => "bias",
            ParamRole::RunningMean => "running_mean",
            ParamRole::RunningVar => "running_var",
        }
    }
}

impl fmt::Display for ParamRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind and sizes of a parametrized layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// 3×3 convolution with bias.
    Conv2d {
        /// Input channels.
        in_channels: usize,
        /// Output channels.
        out_channels: usize,
    },
    /// Batch normalization.
    BatchNorm2d {
        /// Normalized channels.
        channels: usize,
    },
    /// Dense layer with bias.
    Linear {
        /// Input features.
        in_features: usize,
        /// Output features.
        out_features: usize,
    },
}

/// A layer the archive must provide parameters for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerSpec {
    /// Layer identifier, e.g. `conv2.0`.
    pub id: String,
    /// Expected kind and sizes.
    pub kind: LayerKind,
}

impl LayerSpec {
    /// Create a layer spec.
    pub fn new(id: impl Into<String>, kind: LayerKind) -> Self {
        Self {
            id: id.into(),
            kind,
        }
    }

    /// Parameters this layer needs, with their exact shapes.
    pub fn expected_params(&self) -> Vec<(ParamRole, Vec<usize>)> {
        match self.kind {
            LayerKind::Conv2d {
                in_channels,
                out_channels,
            } => vec![
                (ParamRole::Weight, vec![out_channels, in_channels, 3, 3]),
                (ParamRole::Bias, vec![out_channels]),
            ],
            LayerKind::BatchNorm2d { channels } => vec![
                (ParamRole::Weight, vec![channels]),
                (ParamRole::Bias, vec![channels]),
                (ParamRole::RunningMean, vec![channels]),
                (ParamRole::RunningVar, vec![channels]),
            ],
            LayerKind::Linear {
                in_features,
                out_features,
            } => vec![
                (ParamRole::Weight, vec![out_features, in_features]),
                (ParamRole::Bias, vec![out_features]),
            ],
        }
    }

    /// Archive key for one of this layer's parameters.
    pub fn key(&self, role: ParamRole) -> String {
        format!("{}.{}", self.id, role)
    }
}

/// Trained tensors of a single layer, keyed by role.
#[derive(Debug, Clone)]
pub struct LayerParams {
    layer: String,
    tensors: HashMap<ParamRole, Tensor>,
}

impl LayerParams {
    fn new(layer: &str) -> Self {
        Self {
            layer: layer.to_string(),
            tensors: HashMap::new(),
        }
    }

    /// Get a tensor by role, returning `MissingParameter` if absent.
    pub fn get(&self, role: ParamRole) -> Result<&Tensor> {
        self.tensors
            .get(&role)
            .ok_or_else(|| PhytoscanError::missing(&self.layer, role.as_str()))
    }

    /// Layer identifier.
    pub fn layer(&self) -> &str {
        &self.layer
    }

    /// Number of tensors held.
    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    /// Check if no tensors are held.
    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    /// Number of scalars across all tensors.
    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.elem_count()).sum()
    }
}

/// Immutable, load-once store of trained parameters.
#[derive(Debug, Clone)]
pub struct WeightStore {
    layers: BTreeMap<String, LayerParams>,
}

impl WeightStore {
    /// Load and validate a safetensors archive from disk.
    pub fn from_file(path: &Path, schema: &[LayerSpec], device: &Device) -> Result<Self> {
        let data = fs::read(path)?;
        info!(path = %path.display(), bytes = data.len(), "loading weights");
        Self::from_bytes(&data, schema, device)
    }

    /// Load and validate a safetensors archive held in memory.
    pub fn from_bytes(data: &[u8], schema: &[LayerSpec], device: &Device) -> Result<Self> {
        let archive = SafeTensors::deserialize(data)
            .map_err(|e| PhytoscanError::CorruptArtifact(format!("{}", e)))?;

        let mut tensors = HashMap::new();
        let mut converted = 0usize;
        for spec in schema {
            for (role, _) in spec.expected_params() {
                let key = spec.key(role);
                let view = match archive.tensor(&key) {
                    Ok(view) => view,
                    Err(safetensors::SafeTensorError::TensorNotFound(_)) => continue,
                    Err(e) => {
                        return Err(PhytoscanError::CorruptArtifact(format!("{}: {}", key, e)))
                    }
                };
                if view.dtype() != safetensors::Dtype::F32 {
                    converted += 1;
                }
                let tensor = Self::view_to_tensor(&key, &view, device)?;
                tensors.insert(key, tensor);
            }
        }

        if converted > 0 {
            warn!(converted, "converted reduced-precision weights to f32");
        }
        for name in archive.names() {
            if !tensors.contains_key(name.as_str()) {
                debug!(name = %name, "ignoring archive entry outside schema");
            }
        }

        Self::from_tensors(tensors, schema)
    }

    /// Build a store from named tensors, validated against `schema`.
    ///
    /// Missing tensors fail with `MissingParameter`, wrongly shaped ones with
    /// `ShapeMismatch`. Tensors are converted to F32; any NaN or infinite
    /// entry fails the load with `CorruptArtifact`.
    pub fn from_tensors(mut tensors: HashMap<String, Tensor>, schema: &[LayerSpec]) -> Result<Self> {
        let mut layers = BTreeMap::new();

        for spec in schema {
            let mut params = LayerParams::new(&spec.id);
            for (role, shape) in spec.expected_params() {
                let key = spec.key(role);
                let tensor = tensors
                    .remove(&key)
                    .ok_or_else(|| PhytoscanError::missing(&spec.id, role.as_str()))?;
                if tensor.dims() != shape.as_slice() {
                    return Err(PhytoscanError::ShapeMismatch(format!(
                        "{}: expected {:?}, got {:?}",
                        key,
                        shape,
                        tensor.dims()
                    )));
                }
                let tensor = tensor.to_dtype(DType::F32)?;
                let bad = count_non_finite(&tensor)?;
                if bad > 0 {
                    return Err(PhytoscanError::CorruptArtifact(format!(
                        "{}: {} non-finite values",
                        key, bad
                    )));
                }
                params.tensors.insert(role, tensor);
            }
            layers.insert(spec.id.clone(), params);
        }

        let store = Self { layers };
        info!(
            layers = store.len(),
            parameters = store.parameter_count(),
            "weight store ready"
        );
        Ok(store)
    }

    /// Deterministic synthetic weights matching `schema` (for testing and
    /// benchmarking).
    pub fn random(schema: &[LayerSpec], seed: u64, device: &Device) -> Result<Self> {
        Self::from_tensors(random_state_dict(schema, seed, device)?, schema)
    }

    /// Convert a SafeTensors view to a Candle tensor.
    fn view_to_tensor(
        name: &str,
        view: &safetensors::tensor::TensorView,
        device: &Device,
    ) -> Result<Tensor> {
        let shape: Vec<usize> = view.shape().to_vec();
        let data = view.data();

        // pod_collect_to_vec copies, so unaligned archive offsets are fine.
        let tensor = match view.dtype() {
            safetensors::Dtype::F32 => {
                let values: Vec<f32> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?
            }
            safetensors::Dtype::F64 => {
                let values: Vec<f64> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?
            }
            safetensors::Dtype::F16 => {
                let values: Vec<half::f16> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?
            }
            safetensors::Dtype::BF16 => {
                let values: Vec<half::bf16> = bytemuck::pod_collect_to_vec(data);
                Tensor::from_vec(values, shape.as_slice(), device)?
            }
            other => {
                return Err(PhytoscanError::CorruptArtifact(format!(
                    "{}: unsupported dtype {:?}",
                    name, other
                )));
            }
        };

        Ok(tensor.to_dtype(DType::F32)?)
    }

    /// Get a layer's parameters.
    pub fn layer(&self, id: &str) -> Result<&LayerParams> {
        self.layers
            .get(id)
            .ok_or_else(|| PhytoscanError::missing(id, "*"))
    }

    /// Get one parameter tensor.
    pub fn param(&self, id: &str, role: ParamRole) -> Result<&Tensor> {
        self.layer(id)?.get(role)
    }

    /// Check if a layer exists.
    pub fn contains(&self, id: &str) -> bool {
        self.layers.contains_key(id)
    }

    /// Layer identifiers, sorted.
    pub fn layer_ids(&self) -> Vec<&str> {
        self.layers.keys().map(|s| s.as_str()).collect()
    }

    /// Get the number of layers.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Check if no layers are loaded.
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Number of scalars across all layers.
    pub fn parameter_count(&self) -> usize {
        self.layers.values().map(LayerParams::parameter_count).sum()
    }

    /// Flatten back into archive-keyed tensors.
    pub fn to_tensors(&self) -> HashMap<String, Tensor> {
        self.layers
            .values()
            .flat_map(|params| {
                params
                    .tensors
                    .iter()
                    .map(move |(role, t)| (format!("{}.{}", params.layer, role), t.clone()))
            })
            .collect()
    }

    /// Serialize to safetensors bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        serialize_state_dict(&self.to_tensors())
    }

    /// Write the store to a safetensors file.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, self.to_bytes()?)?;
        Ok(())
    }
}

/// Serialize archive-keyed tensors into safetensors bytes.
pub fn serialize_state_dict(tensors: &HashMap<String, Tensor>) -> Result<Vec<u8>> {
    safetensors::serialize(tensors.iter().map(|(k, v)| (k.as_str(), v)), &None)
        .map_err(|e| PhytoscanError::CorruptArtifact(format!("serialize: {}", e)))
}

/// Deterministic archive-keyed tensors for `schema`.
///
/// Convolution and linear weights are He-uniform; batch-norm statistics
/// are drawn near identity with strictly positive variance.
pub fn random_state_dict(
    schema: &[LayerSpec],
    seed: u64,
    device: &Device,
) -> Result<HashMap<String, Tensor>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut uniform = |shape: &[usize], lo: f32, hi: f32| -> Result<Tensor> {
        let n: usize = shape.iter().product();
        let values: Vec<f32> = (0..n).map(|_| rng.gen_range(lo..hi)).collect();
        Ok(Tensor::from_vec(values, shape, device)?)
    };

    let mut tensors = HashMap::new();
    for spec in schema {
        let fan_in = match spec.kind {
            LayerKind::Conv2d { in_channels, .. } => in_channels * 9,
            LayerKind::Linear { in_features, .. } => in_features,
            LayerKind::BatchNorm2d { .. } => 1,
        };
        let bound = (6.0 / fan_in as f32).sqrt();

        for (role, shape) in spec.expected_params() {
            let tensor = match (spec.kind, role) {
                (LayerKind::BatchNorm2d { .. }, ParamRole::Weight) => uniform(&shape, 0.8, 1.2)?,
                (LayerKind::BatchNorm2d { .. }, ParamRole::RunningVar) => {
                    uniform(&shape, 0.5, 1.5)?
                }
                (LayerKind::BatchNorm2d { .. }, _) => uniform(&shape, -0.1, 0.1)?,
                (_, ParamRole::Weight) => uniform(&shape, -bound, bound)?,
                (_, _) => uniform(&shape, -0.01, 0.01)?,
            };
            tensors.insert(spec.key(role), tensor);
        }
    }
    Ok(tensors)
}

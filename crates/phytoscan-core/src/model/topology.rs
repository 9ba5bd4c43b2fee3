//! Fixed ResNet9 topology.
//!
//! The graph is described once, as data, and both the weight schema and
//! the compiled model are derived from it:
//!
//! ```text
//! conv1 ─ conv2(pool) ─ [res1.0 ─ res1.1] + ─ conv3(pool) ─ conv4(pool) ─ [res2.0 ─ res2.1] + ─ classifier
//! ```
//!
//! Layer identifiers follow the trained model's `state_dict` keys: inside a
//! block, index `0` is the convolution and index `1` the batch norm; the
//! classifier's linear layer sits at index `2`.

use super::ResNet9Config;
use crate::weights::{LayerKind, LayerSpec};

/// One `Conv → BatchNorm → ReLU → [MaxPool]` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSpec {
    /// Identifier prefix, e.g. `res1.0`.
    pub name: String,
    /// Input channels.
    pub in_channels: usize,
    /// Output channels.
    pub out_channels: usize,
    /// Whether the block ends with a max pool.
    pub pool: bool,
}

impl BlockSpec {
    fn new(name: &str, in_channels: usize, out_channels: usize, pool: bool) -> Self {
        Self {
            name: name.to_string(),
            in_channels,
            out_channels,
            pool,
        }
    }

    /// Identifier of the block's convolution.
    pub fn conv_id(&self) -> String {
        format!("{}.0", self.name)
    }

    /// Identifier of the block's batch norm.
    pub fn bn_id(&self) -> String {
        format!("{}.1", self.name)
    }
}

/// One stage of the compiled graph, in execution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageSpec {
    /// Plain block.
    Block(BlockSpec),
    /// `x + second(first(x))`.
    Residual {
        /// Stage name, e.g. `res1`.
        name: String,
        /// Inner blocks.
        blocks: [BlockSpec; 2],
    },
    /// `MaxPool → Flatten → Linear`.
    Head {
        /// Identifier of the linear layer.
        linear_id: String,
        /// Flattened feature count.
        in_features: usize,
        /// Class count.
        out_features: usize,
    },
}

impl StageSpec {
    /// Stage name used in logs and shape reports.
    pub fn name(&self) -> &str {
        match self {
            StageSpec::Block(b) => &b.name,
            StageSpec::Residual { name, .. } => name,
            StageSpec::Head { .. } => "classifier",
        }
    }
}

/// The stages of the ResNet9 graph for `config`, in execution order.
pub fn stages(config: &ResNet9Config) -> Vec<StageSpec> {
    let [c1, c2, c3, c4] = config.stage_channels();
    vec![
        StageSpec::Block(BlockSpec::new("conv1", config.in_channels, c1, false)),
        StageSpec::Block(BlockSpec::new("conv2", c1, c2, true)),
        StageSpec::Residual {
            name: "res1".to_string(),
            blocks: [
                BlockSpec::new("res1.0", c2, c2, false),
                BlockSpec::new("res1.1", c2, c2, false),
            ],
        },
        StageSpec::Block(BlockSpec::new("conv3", c2, c3, true)),
        StageSpec::Block(BlockSpec::new("conv4", c3, c4, true)),
        StageSpec::Residual {
            name: "res2".to_string(),
            blocks: [
                BlockSpec::new("res2.0", c4, c4, false),
                BlockSpec::new("res2.1", c4, c4, false),
            ],
        },
        StageSpec::Head {
            linear_id: "classifier.2".to_string(),
            in_features: config.head_features(),
            out_features: config.num_classes,
        },
    ]
}

/// Every parametrized layer the graph expects, with its kind and sizes.
pub fn schema(config: &ResNet9Config) -> Vec<LayerSpec> {
    fn block_layers(block: &BlockSpec, out: &mut Vec<LayerSpec>) {
        out.push(LayerSpec::new(
            block.conv_id(),
            LayerKind::Conv2d {
                in_channels: block.in_channels,
                out_channels: block.out_channels,
            },
        ));
        out.push(LayerSpec::new(
            block.bn_id(),
            LayerKind::BatchNorm2d {
                channels: block.out_channels,
            },
        ));
    }

    let mut layers = Vec::new();
    for stage in stages(config) {
        match stage {
            StageSpec::Block(block) => block_layers(&block, &mut layers),
            StageSpec::Residual { blocks, .. } => {
                for block in &blocks {
                    block_layers(block, &mut layers);
                }
            }
            StageSpec::Head {
                linear_id,
                in_features,
                out_features,
            } => layers.push(LayerSpec::new(
                linear_id,
                LayerKind::Linear {
                    in_features,
                    out_features,
                },
            )),
        }
    }
    layers
}

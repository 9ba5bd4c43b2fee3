//! ResNet9 model graph.
//!
//! - Model configuration
//! - Topology and weight schema
//! - Compiled blocks and forward pass
//! - Golden logit validation

mod block;
mod config;
mod golden;
mod resnet;
mod topology;

pub use block::{ClassifierHead, ConvBlock, ResidualPair};
pub use config::{ResNet9Config, IMAGE_SIZE};
pub use golden::{GoldenCase, GoldenResult, GoldenSummary, GoldenTestHarness, WorstDrift};
pub use resnet::{ResNet9, Stage};
pub use topology::{schema, stages, BlockSpec, StageSpec};

//! # Phytoscan Core
//!
//! CPU inference core for plant-disease diagnosis from leaf photographs.
//!
//! This crate provides:
//! - **Layer primitives** (convolution, batch norm, pooling, dense) with
//!   static shape checking
//! - **Weight store** validating a safetensors archive against an explicit schema
//! - **ResNet9 graph** compiled once and immutable thereafter
//! - **Pre/postprocessing** from image buffers to a ranked disease prediction
//! - **Golden harness** for validating logits against a reference export

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod inference;
pub mod labels;
pub mod layers;
pub mod model;
pub mod tensor;
pub mod weights;

pub use error::{PhytoscanError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{PhytoscanError, Result};
    pub use crate::inference::{ClassificationResult, Normalization, Preprocessor};
    pub use crate::labels::DiseaseClass;
    pub use crate::model::{ResNet9, ResNet9Config};
    pub use crate::weights::WeightStore;
}

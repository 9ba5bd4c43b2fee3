//! # Phytoscan
//!
//! Plant-disease diagnosis from a photographed leaf.
//!
//! A pre-trained ResNet9 classifies a 256×256 RGB image into one of the 38
//! PlantVillage crop/condition categories:
//! - **Fail-closed loading**: every weight is checked against the compiled
//!   topology before an engine exists
//! - **Shared engine**: immutable after build, `Send + Sync`, no locks
//! - **Raw or encoded input**: pixel buffers, PNG or JPEG bytes
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use phytoscan::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let engine = Engine::builder()
//!         .weights_path("plant-disease-model.safetensors")
//!         .build()?;
//!
//!     let bytes = std::fs::read("leaf.jpg")?;
//!     let result = engine.classify_encoded(&bytes)?;
//!     println!("{} ({:.1}%)", result.label, result.confidence * 100.0);
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

// Re-export core crate
pub use phytoscan_core::*;

mod engine;

pub use engine::{Engine, EngineBuilder, EngineConfig, RawImage};

/// Commonly used types.
pub mod prelude {
    pub use crate::engine::{Engine, EngineBuilder, EngineConfig, RawImage};
    pub use crate::{
        error::{PhytoscanError, Result},
        inference::{ClassificationResult, Normalization},
        labels::DiseaseClass,
        model::{GoldenCase, GoldenTestHarness, ResNet9, ResNet9Config},
        weights::WeightStore,
    };

    // Re-export useful external types
    pub use anyhow;
    pub use tracing;
}

//! Input and output stages around the forward pass.
//!
//! - [`Preprocessor`] turns raw or encoded images into `(3, 256, 256)` tensors
//! - [`ClassificationResult`] turns logits into a ranked prediction

mod postprocess;
mod preprocess;

pub use postprocess::{argmax, softmax, ClassificationResult};
pub use preprocess::{Normalization, Preprocessor};

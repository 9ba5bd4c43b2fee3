//! Logits to prediction: softmax, arg-max, ranking.

use crate::error::{PhytoscanError, Result};
use crate::labels::DiseaseClass;
use crate::tensor::ensure_finite;
use candle_core::{Tensor, D};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numerically stable softmax over the last axis.
pub fn softmax(logits: &Tensor) -> Result<Tensor> {
    Ok(candle_nn::ops::softmax(logits, D::Minus1)?)
}

/// Index of the largest value; ties go to the lowest index. NaN entries are
/// skipped, so an all-NaN slice yields `None`.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, bv)) if v <= bv => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}

/// Prediction for one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    /// Top-1 disease class.
    pub label: DiseaseClass,
    /// Softmax probability of `label`, in [0, 1].
    pub confidence: f32,
    /// Full probability vector in class-index order.
    pub probabilities: Vec<f32>,
}

impl ClassificationResult {
    /// Build a result from a `[num_classes]` logit tensor.
    pub fn from_logits(logits: &Tensor) -> Result<Self> {
        if logits.dims() != [DiseaseClass::COUNT] {
            return Err(PhytoscanError::ShapeMismatch(format!(
                "expected [{}] logits, got {:?}",
                DiseaseClass::COUNT,
                logits.dims()
            )));
        }
        ensure_finite(logits, "logits")?;
        let raw: Vec<f32> = logits.to_vec1()?;
        let probabilities: Vec<f32> = softmax(logits)?.to_vec1()?;

        // Rank on logits; distinct logits can round to equal probabilities.
        let index = argmax(&raw).ok_or_else(|| {
            PhytoscanError::NumericFault {
                stage: "argmax".to_string(),
                count: raw.len(),
            }
        })?;
        Ok(Self {
            label: DiseaseClass::from_index(index)?,
            confidence: probabilities[index],
            probabilities,
        })
    }

    /// Build one result per row of a `[N, num_classes]` logit tensor.
    pub fn from_batch_logits(logits: &Tensor) -> Result<Vec<Self>> {
        match *logits.dims() {
            [n, c] if c == DiseaseClass::COUNT => (0..n)
                .map(|i| Self::from_logits(&logits.get(i)?))
                .collect(),
            _ => Err(PhytoscanError::ShapeMismatch(format!(
                "expected [N, {}] logits, got {:?}",
                DiseaseClass::COUNT,
                logits.dims()
            ))),
        }
    }

    /// The `k` most probable classes, most probable first. Equal
    /// probabilities keep class-index order.
    pub fn top_k(&self, k: usize) -> Vec<(DiseaseClass, f32)> {
        let mut ranked: Vec<(usize, f32)> = self.probabilities.iter().copied().enumerate().collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        ranked
            .into_iter()
            .take(k)
            .filter_map(|(i, p)| DiseaseClass::from_index(i).ok().map(|c| (c, p)))
            .collect()
    }

    /// Shannon entropy of the distribution, in nats.
    pub fn entropy(&self) -> f32 {
        self.probabilities
            .iter()
            .filter(|&&p| p > 0.0)
            .map(|&p| -p * p.ln())
            .sum()
    }

    /// Gap between the two highest probabilities.
    pub fn margin(&self) -> f32 {
        match self.top_k(2).as_slice() {
            [(_, a), (_, b)] => a - b,
            _ => self.confidence,
        }
    }

    /// Whether the confidence reaches `threshold`.
    pub fn is_confident(&self, threshold: f32) -> bool {
        self.confidence >= threshold
    }
}

impl fmt::Display for ClassificationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:.1}%)", self.label, self.confidence * 100.0)
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use candle_core::Device;
    use proptest::prelude::*;

    fn vector(values: Vec<f32>) -> Tensor {
        let n = values.len();
        Tensor::from_vec(values, n, &Device::Cpu).unwrap()
    }

    prop_compose! {
        fn arb_logits()(values in prop::collection::vec(-50.0f32..50.0, DiseaseClass::COUNT)) -> Vec<f32> {
            values
        }
    }

    proptest! {
        /// Invariant: probabilities sum to 1 and lie in [0, 1]
        #[test]
        fn softmax_is_a_distribution(values in arb_logits()) {
            let t = vector(values);
            let r = ClassificationResult::from_logits(&t).unwrap();
            let sum: f32 = r.probabilities.iter().sum();
            prop_assert!((sum - 1.0).abs() < 1e-4, "sum {}", sum);
            prop_assert!(r.probabilities.iter().all(|p| (0.0..=1.0).contains(p)));
            prop_assert!((0.0..=1.0).contains(&r.confidence));
        }

        /// Invariant: the label is the arg-max of the logits
        #[test]
        fn label_is_argmax(values in arb_logits()) {
            let expected = argmax(&values).unwrap();
            let t = vector(values.clone());
            let r = ClassificationResult::from_logits(&t).unwrap();
            prop_assert_eq!(r.label.index(), expected);
            prop_assert!(values.iter().all(|&v| v <= values[expected]));
        }

        /// Invariant: shifting every logit leaves probabilities unchanged
        #[test]
        fn softmax_shift_invariant(values in arb_logits(), shift in -100.0f32..100.0) {
            let base = softmax(&vector(values.clone())).unwrap();
            let shifted: Vec<f32> = values.iter().map(|v| v + shift).collect();
            let moved = softmax(&vector(shifted)).unwrap();
            let a: Vec<f32> = base.to_vec1().unwrap();
            let b: Vec<f32> = moved.to_vec1().unwrap();
            for (x, y) in a.iter().zip(&b) {
                prop_assert!((x - y).abs() < 1e-4);
            }
        }
    }
}

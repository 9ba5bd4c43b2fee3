//! Golden logit harness for model validation.
//!
//! Validates the forward pass against reference logits exported from the
//! training framework. Each [`GoldenCase`] names an input image, the logits
//! the reference implementation produced for it and, optionally, the label
//! it predicted.
//!
//! # Example
//!
//! ```rust,ignore
//! use phytoscan_core::model::{GoldenCase, GoldenTestHarness};
//!
//! let harness = GoldenTestHarness::from_file("golden/plantvillage.json".as_ref())?;
//! let summary = harness.run_with(|_case, image| {
//!     let bytes = std::fs::read(image).map_err(|e| e.to_string())?;
//!     engine.logits_encoded(&bytes).map_err(|e| e.to_string())
//! });
//! assert!(summary.all_passed());
//! ```
//!
//! # Determinism
//!
//! The forward pass is pure F32 on the CPU, so reference logits should match
//! to roughly 1e-4 absolute. Looser tolerances hide real regressions.

use crate::inference::argmax;
use crate::labels::DiseaseClass;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

fn default_tolerance() -> f32 {
    1e-4
}

/// A single golden test case.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoldenCase {
    /// Test case name for identification.
    pub name: String,
    /// Input image path, relative to the case file.
    pub image: PathBuf,
    /// Reference logits.
    pub expected_logits: Vec<f32>,
    /// Reference top-1 label, if recorded.
    #[serde(default)]
    pub expected_label: Option<DiseaseClass>,
    /// Maximum allowed absolute difference per logit.
    #[serde(default = "default_tolerance")]
    pub tolerance: f32,
    /// Tags for filtering tests.
    #[serde(default)]
    pub tags: Vec<String>,
}

impl GoldenCase {
    /// Create a case with the default tolerance.
    pub fn new(name: impl Into<String>, image: impl Into<PathBuf>, expected_logits: Vec<f32>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            expected_logits,
            expected_label: None,
            tolerance: default_tolerance(),
            tags: Vec::new(),
        }
    }

    /// Set the expected label.
    pub fn with_label(mut self, label: DiseaseClass) -> Self {
        self.expected_label = Some(label);
        self
    }

    /// Set the tolerance.
    pub fn with_tolerance(mut self, tolerance: f32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Add a tag to the test case.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }
}

/// Result of a single golden test.
#[derive(Debug, Clone)]
pub struct GoldenResult {
    /// Test case name.
    pub name: String,
    /// Whether the test passed.
    pub passed: bool,
    /// Largest absolute logit difference.
    pub max_abs_diff: f32,
    /// Index of the largest difference.
    pub worst_index: Option<usize>,
    /// Predicted label, from the actual logits.
    pub actual_label: Option<DiseaseClass>,
    /// Whether the predicted label matched the expected one; `None` when
    /// the case has no expected label or produced no logits.
    pub label_agrees: Option<bool>,
    /// Error message (if failed).
    pub error: Option<String>,
    /// Execution time in milliseconds.
    pub time_ms: f64,
}

impl GoldenResult {
    /// Compare actual logits against a case.
    pub fn compare(case: &GoldenCase, actual: &[f32], time_ms: f64) -> Self {
        if actual.len() != case.expected_logits.len() {
            return Self {
                time_ms,
                ..Self::error(
                    case.name.clone(),
                    format!(
                        "Expected {} logits, got {}",
                        case.expected_logits.len(),
                        actual.len()
                    ),
                )
            };
        }

        let (worst_index, max_abs_diff) = case
            .expected_logits
            .iter()
            .zip(actual)
            .map(|(e, a)| (e - a).abs())
            .enumerate()
            .fold((None, 0.0f32), |(wi, wd), (i, d)| {
                // NaN never compares greater, so force it to win.
                if d > wd || d.is_nan() {
                    (Some(i), d)
                } else {
                    (wi, wd)
                }
            });

        let actual_label = argmax(actual).and_then(|i| DiseaseClass::from_index(i).ok());
        let label_agrees = case.expected_label.map(|e| actual_label == Some(e));

        let mut error = None;
        if max_abs_diff.is_nan() || max_abs_diff > case.tolerance {
            error = Some(format!(
                "Logit {} differs by {:.3e} (tolerance {:.1e})",
                worst_index.unwrap_or(0),
                max_abs_diff,
                case.tolerance
            ));
        } else if let Some(expected) = case.expected_label {
            if actual_label != Some(expected) {
                error = Some(format!(
                    "Expected label {}, got {}",
                    expected,
                    actual_label.map_or_else(|| "none".to_string(), |l| l.to_string())
                ));
            }
        }

        Self {
            name: case.name.clone(),
            passed: error.is_none(),
            max_abs_diff,
            worst_index,
            actual_label,
            label_agrees,
            error,
            time_ms,
        }
    }

    /// Create an error result.
    pub fn error(name: String, error: String) -> Self {
        Self {
            name,
            passed: false,
            max_abs_diff: f32::NAN,
            worst_index: None,
            actual_label: None,
            label_agrees: None,
            error: Some(error),
            time_ms: 0.0,
        }
    }
}

impl fmt::Display for GoldenResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = if self.passed { "PASS" } else { "FAIL" };
        write!(f, "[{}] {} ({:.1}ms)", status, self.name, self.time_ms)?;
        if self.max_abs_diff.is_finite() {
            write!(f, " max diff {:.2e}", self.max_abs_diff)?;
        }
        if let Some(ref err) = self.error {
            write!(f, "\n  Error: {}", err)?;
        }
        Ok(())
    }
}

/// Largest logit drift seen in a run.
#[derive(Debug, Clone, PartialEq)]
pub struct WorstDrift {
    /// Case that produced it.
    pub case: String,
    /// Logit index.
    pub index: usize,
    /// Absolute difference from the reference.
    pub diff: f32,
}

/// Aggregate of a golden run: tolerance passes, top-1 agreement with the
/// reference labels, and the single worst logit.
#[derive(Debug, Clone, Default)]
pub struct GoldenSummary {
    /// Cases run.
    pub total: usize,
    /// Cases within tolerance and, where labelled, predicting the label.
    pub passed: usize,
    /// Cases carrying an expected label that produced logits.
    pub labelled: usize,
    /// Labelled cases whose top-1 prediction matched.
    pub label_matches: usize,
    /// Worst finite drift across all cases, if any produced logits.
    pub worst: Option<WorstDrift>,
    /// Wall time summed over cases, in milliseconds.
    pub total_time_ms: f64,
    /// Results by case name.
    pub results: HashMap<String, GoldenResult>,
}

impl GoldenSummary {
    /// Aggregate per-case results.
    pub fn from_results(results: Vec<GoldenResult>) -> Self {
        let mut summary = Self {
            total: results.len(),
            ..Self::default()
        };
        for r in &results {
            summary.total_time_ms += r.time_ms;
            if r.passed {
                summary.passed += 1;
            }
            if let Some(agrees) = r.label_agrees {
                summary.labelled += 1;
                if agrees {
                    summary.label_matches += 1;
                }
            }
            // NaN drift is already a failure; the worst entry tracks magnitude.
            if let (Some(index), true) = (r.worst_index, r.max_abs_diff.is_finite()) {
                if summary.worst.as_ref().map_or(true, |w| r.max_abs_diff > w.diff) {
                    summary.worst = Some(WorstDrift {
                        case: r.name.clone(),
                        index,
                        diff: r.max_abs_diff,
                    });
                }
            }
        }
        summary.results = results.into_iter().map(|r| (r.name.clone(), r)).collect();
        summary
    }

    /// Cases that did not pass.
    pub fn failed(&self) -> usize {
        self.total - self.passed
    }

    /// Check if all tests passed.
    pub fn all_passed(&self) -> bool {
        self.failed() == 0
    }

    /// Fraction of labelled cases whose top-1 prediction matched, or `None`
    /// when no case was labelled.
    pub fn label_agreement(&self) -> Option<f32> {
        (self.labelled > 0).then(|| self.label_matches as f32 / self.labelled as f32)
    }
}

impl fmt::Display for GoldenSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{}/{} cases match the reference ({} failed, {:.1}ms)",
            self.passed,
            self.total,
            self.failed(),
            self.total_time_ms
        )?;
        match self.label_agreement() {
            Some(rate) => writeln!(
                f,
                "top-1 agreement: {}/{} labelled ({:.1}%)",
                self.label_matches,
                self.labelled,
                rate * 100.0
            )?,
            None => writeln!(f, "top-1 agreement: no labelled cases")?,
        }
        if let Some(w) = &self.worst {
            let class = DiseaseClass::from_index(w.index)
                .map_or_else(|_| format!("#{}", w.index), |c| c.name().to_string());
            writeln!(f, "worst drift: {:.2e} on {} in {}", w.diff, class, w.case)?;
        }

        let mut failed: Vec<_> = self.results.values().filter(|r| !r.passed).collect();
        if !failed.is_empty() {
            failed.sort_by(|a, b| a.name.cmp(&b.name));
            writeln!(f, "failing cases:")?;
            for result in failed {
                writeln!(f, "  {}", result)?;
            }
        }
        Ok(())
    }
}

/// Golden test harness for model validation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GoldenTestHarness {
    cases: Vec<GoldenCase>,
    /// Directory image paths are resolved against.
    #[serde(skip)]
    root: PathBuf,
}

impl GoldenTestHarness {
    /// Create an empty harness.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load cases from a JSON file holding `{"cases": [...]}`.
    ///
    /// Image paths are resolved relative to the file's directory.
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut harness: Self = serde_json::from_str(&contents)?;
        harness.root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Ok(harness)
    }

    /// Add a test case.
    pub fn add_case(&mut self, case: GoldenCase) {
        self.cases.push(case);
    }

    /// Add multiple test cases.
    pub fn add_cases(&mut self, cases: impl IntoIterator<Item = GoldenCase>) {
        self.cases.extend(cases);
    }

    /// Get all test cases.
    pub fn cases(&self) -> &[GoldenCase] {
        &self.cases
    }

    /// Image path of `case`, resolved against the harness root.
    pub fn image_path(&self, case: &GoldenCase) -> PathBuf {
        self.root.join(&case.image)
    }

    /// Filter cases by tag.
    pub fn filter_by_tag(&self, tag: &str) -> Vec<&GoldenCase> {
        self.cases
            .iter()
            .filter(|c| c.tags.iter().any(|t| t == tag))
            .collect()
    }

    /// Keep only cases carrying `tag`.
    pub fn retain_tag(&mut self, tag: &str) {
        self.cases.retain(|c| c.tags.iter().any(|t| t == tag));
    }

    /// Run all cases with a custom logit producer.
    ///
    /// The closure receives the case and its resolved image path and
    /// returns the logits the model produced.
    pub fn run_with<F>(&self, mut produce: F) -> GoldenSummary
    where
        F: FnMut(&GoldenCase, &Path) -> Result<Vec<f32>, String>,
    {
        let results = self
            .cases
            .iter()
            .map(|case| {
                let start = std::time::Instant::now();
                match produce(case, &self.image_path(case)) {
                    Ok(actual) => {
                        let elapsed = start.elapsed().as_secs_f64() * 1000.0;
                        GoldenResult::compare(case, &actual, elapsed)
                    }
                    Err(err) => GoldenResult::error(case.name.clone(), err),
                }
            })
            .collect();

        GoldenSummary::from_results(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logits_favoring(index: usize) -> Vec<f32> {
        let mut v = vec![0.0f32; DiseaseClass::COUNT];
        v[index] = 5.0;
        v
    }

    #[test]
    fn compare_within_tolerance_passes() {
        let case = GoldenCase::new("leaf", "leaf.png", logits_favoring(3))
            .with_label(DiseaseClass::AppleHealthy);
        let mut actual = logits_favoring(3);
        actual[0] += 5e-5;

        let result = GoldenResult::compare(&case, &actual, 1.0);
        assert!(result.passed, "{}", result);
        assert_eq!(result.worst_index, Some(0));
        assert_eq!(result.actual_label, Some(DiseaseClass::AppleHealthy));
    }

    #[test]
    fn compare_beyond_tolerance_fails() {
        let case = GoldenCase::new("leaf", "leaf.png", logits_favoring(3));
        let mut actual = logits_favoring(3);
        actual[7] = 0.01;

        let result = GoldenResult::compare(&case, &actual, 1.0);
        assert!(!result.passed);
        assert_eq!(result.worst_index, Some(7));
        assert!(result.error.unwrap().contains("Logit 7"));
    }

    #[test]
    fn compare_wrong_label_fails() {
        let case = GoldenCase::new("leaf", "leaf.png", vec![1.0; DiseaseClass::COUNT])
            .with_label(DiseaseClass::TomatoHealthy)
            .with_tolerance(10.0);
        let result = GoldenResult::compare(&case, &logits_favoring(0), 1.0);
        assert!(!result.passed);
        assert_eq!(result.actual_label, Some(DiseaseClass::AppleScab));
    }

    #[test]
    fn compare_length_mismatch_fails() {
        let case = GoldenCase::new("leaf", "leaf.png", vec![0.0; 38]);
        let result = GoldenResult::compare(&case, &[0.0; 10], 1.0);
        assert!(!result.passed);
        assert!(result.error.unwrap().contains("38"));
    }

    #[test]
    fn nan_logits_fail() {
        let case = GoldenCase::new("leaf", "leaf.png", vec![0.0; 38]);
        let mut actual = vec![0.0; 38];
        actual[5] = f32::NAN;
        let result = GoldenResult::compare(&case, &actual, 1.0);
        assert!(!result.passed);
        assert_eq!(result.worst_index, Some(5));
    }

    #[test]
    fn label_ties_pick_lowest_index() {
        let mut tied = vec![0.0; DiseaseClass::COUNT];
        tied[4] = 2.0;
        tied[9] = 2.0;
        let case = GoldenCase::new("tie", "t.png", tied.clone());
        let result = GoldenResult::compare(&case, &tied, 1.0);
        assert!(result.passed);
        assert_eq!(result.actual_label, Some(DiseaseClass::BlueberryHealthy));
    }

    #[test]
    fn harness_run_with() {
        let mut harness = GoldenTestHarness::new();
        harness.add_case(GoldenCase::new("pass", "a.png", logits_favoring(1)).with_tag("smoke"));
        harness.add_case(GoldenCase::new("fail", "b.png", logits_favoring(2)));
        harness.add_case(GoldenCase::new("error", "c.png", logits_favoring(2)).with_tag("smoke"));

        let summary = harness.run_with(|case, _path| match case.name.as_str() {
            "error" => Err("decode failed".to_string()),
            _ => Ok(logits_favoring(1)),
        });

        assert_eq!(summary.total, 3);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.failed(), 2);
        assert!(summary.results["pass"].passed);
        assert!(!summary.all_passed());
        assert_eq!(harness.filter_by_tag("smoke").len(), 2);

        let mut smoke = harness.clone();
        smoke.retain_tag("smoke");
        assert_eq!(smoke.cases().len(), 2);

        let text = summary.to_string();
        assert!(text.contains("decode failed"));
    }

    #[test]
    fn summary_tracks_label_agreement_and_worst_drift() {
        let labelled = GoldenCase::new("scab", "a.png", logits_favoring(0))
            .with_label(DiseaseClass::AppleScab)
            .with_tolerance(10.0);
        let mislabelled = GoldenCase::new("rot", "b.png", logits_favoring(1))
            .with_label(DiseaseClass::AppleBlackRot)
            .with_tolerance(10.0);
        let unlabelled = GoldenCase::new("plain", "c.png", vec![0.0; DiseaseClass::COUNT]);

        let mut drifted = vec![0.0; DiseaseClass::COUNT];
        drifted[37] = 8.0;
        let summary = GoldenSummary::from_results(vec![
            GoldenResult::compare(&labelled, &logits_favoring(0), 1.0),
            GoldenResult::compare(&mislabelled, &logits_favoring(0), 1.0),
            GoldenResult::compare(&unlabelled, &drifted, 1.0),
            GoldenResult::error("broken".to_string(), "decode failed".to_string()),
        ]);

        assert_eq!(summary.total, 4);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.labelled, 2);
        assert_eq!(summary.label_matches, 1);
        assert_eq!(summary.label_agreement(), Some(0.5));

        let worst = summary.worst.clone().unwrap();
        assert_eq!(worst.case, "plain");
        assert_eq!(worst.index, 37);

        let text = summary.to_string();
        assert!(text.contains("1/2 labelled"), "{}", text);
        assert!(text.contains("Tomato___healthy"), "{}", text);
    }

    #[test]
    fn summary_without_labels_has_no_agreement() {
        let case = GoldenCase::new("plain", "c.png", vec![0.0; 4]);
        let summary = GoldenSummary::from_results(vec![GoldenResult::compare(&case, &[0.0; 4], 1.0)]);
        assert_eq!(summary.label_agreement(), None);
        assert!(summary.all_passed());
        assert!(summary.to_string().contains("no labelled cases"));
    }

    #[test]
    fn harness_loads_json_and_resolves_paths() {
        let dir = std::env::temp_dir().join(format!("phytoscan_golden_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("cases.json");
        std::fs::write(
            &path,
            r#"{"cases": [{
                "name": "scab",
                "image": "scab.jpg",
                "expected_logits": [0.5, 1.5],
                "expected_label": "Apple___Apple_scab",
                "tags": ["regression"]
            }]}"#,
        )
        .unwrap();

        let harness = GoldenTestHarness::from_file(&path).unwrap();
        let case = &harness.cases()[0];
        assert_eq!(case.expected_label, Some(DiseaseClass::AppleScab));
        assert!((case.tolerance - 1e-4).abs() < 1e-9);
        assert_eq!(harness.image_path(case), dir.join("scab.jpg"));

        let _ = std::fs::remove_dir_all(&dir);
    }
}

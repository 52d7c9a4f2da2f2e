//! Classifier seam and the adapter that feeds it.
//!
//! The trained model is opaque to the rest of the crate: anything that
//! implements [`Classifier`] can sit behind a [`ModelAdapter`]. The crate ships
//! [`DenseModel`], a single linear layer with an output activation loaded from
//! a JSON asset.

use crate::core::error::PipelineError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// A trained classifier.
pub trait Classifier: Send {
    /// Number of features `predict` accepts.
    fn expected_input_len(&self) -> usize;

    /// Raw per-class output for one feature vector.
    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, ClassifierError>;
}

impl<C: Classifier + ?Sized> Classifier for Box<C> {
    fn expected_input_len(&self) -> usize {
        (**self).expected_input_len()
    }

    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, ClassifierError> {
        (**self).predict(features)
    }
}

#[derive(Error, Debug)]
pub enum ClassifierError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Invalid feature size: expected {expected}, got {actual}")]
    InvalidFeatureSize { expected: usize, actual: usize },

    #[error("Model produced non-finite output")]
    NonFinite,
}

/// Output activation of a [`DenseModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Activation {
    Softmax,
    Sigmoid,
    Identity,
}

/// `activation(W·x + b)` with `W` of shape `outputs × inputs`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseModel {
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
    activation: Activation,
    /// Epsilon used for log compression of the training features
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_epsilon: Option<f64>,
}

impl DenseModel {
    pub fn new(
        weights: Vec<Vec<f64>>,
        bias: Vec<f64>,
        activation: Activation,
    ) -> Result<Self, ClassifierError> {
        let model = Self {
            weights,
            bias,
            activation,
            log_epsilon: None,
        };
        model.check()?;
        Ok(model)
    }

    /// Load a model asset from JSON.
    pub fn load(path: &Path) -> Result<Self, ClassifierError> {
        let content = std::fs::read_to_string(path)?;
        let model: DenseModel = serde_json::from_str(&content)?;
        model.check()?;
        Ok(model)
    }

    /// Write the model asset as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ClassifierError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn with_log_epsilon(mut self, eps: f64) -> Self {
        self.log_epsilon = Some(eps);
        self
    }

    pub fn log_epsilon(&self) -> Option<f64> {
        self.log_epsilon
    }

    /// Number of outputs.
    pub fn output_len(&self) -> usize {
        self.bias.len()
    }

    fn check(&self) -> Result<(), ClassifierError> {
        if self.weights.is_empty() {
            return Err(ClassifierError::InvalidModel("no output rows".to_string()));
        }
        if self.weights.len() != self.bias.len() {
            return Err(ClassifierError::InvalidModel(format!(
                "{} weight rows but {} bias terms",
                self.weights.len(),
                self.bias.len()
            )));
        }
        let inputs = self.weights[0].len();
        if inputs == 0 || self.weights.iter().any(|row| row.len() != inputs) {
            return Err(ClassifierError::InvalidModel(
                "weight rows must be non-empty and equal length".to_string(),
            ));
        }
        Ok(())
    }
}

impl Classifier for DenseModel {
    fn expected_input_len(&self) -> usize {
        self.weights.first().map(Vec::len).unwrap_or(0)
    }

    fn predict(&self, features: &[f64]) -> Result<Vec<f64>, ClassifierError> {
        if features.len() != self.expected_input_len() {
            return Err(ClassifierError::InvalidFeatureSize {
                expected: self.expected_input_len(),
                actual: features.len(),
            });
        }

        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| row.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + b)
            .collect();

        let output = match self.activation {
            Activation::Identity => logits,
            Activation::Sigmoid => logits.iter().map(|z| 1.0 / (1.0 + (-z).exp())).collect(),
            Activation::Softmax => softmax(&logits),
        };

        if output.iter().any(|v| !v.is_finite()) {
            return Err(ClassifierError::NonFinite);
        }
        Ok(output)
    }
}

fn softmax(logits: &[f64]) -> Vec<f64> {
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = logits.iter().map(|z| (z - max).exp()).collect();
    let sum: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / sum).collect()
}

/// Per-label scores for one window.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassProbabilities {
    /// `(label, score)` for the overlapping prefix of labels and outputs
    pub scores: Vec<(String, f64)>,
    /// Everything the model returned
    pub raw: Vec<f64>,
}

impl ClassProbabilities {
    /// Index of the largest raw output. The first one wins on ties.
    pub fn argmax(&self) -> Option<usize> {
        let mut best: Option<(usize, f64)> = None;
        for (idx, &v) in self.raw.iter().enumerate() {
            match best {
                Some((_, b)) if v <= b => {}
                _ => best = Some((idx, v)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// Score of the target class, or the largest raw output when the model
    /// returned fewer values than that.
    pub fn target_probability(&self, target: usize) -> f64 {
        match self.scores.get(target) {
            Some(&(_, p)) => p,
            None => self.raw.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        }
    }

    pub fn get(&self, label: &str) -> Option<f64> {
        self.scores
            .iter()
            .find(|(name, _)| name == label)
            .map(|&(_, p)| p)
    }
}

/// Validates features and maps raw model output onto the label list.
pub struct ModelAdapter<C> {
    model: C,
    labels: Vec<String>,
}

impl<C: Classifier> ModelAdapter<C> {
    pub fn new(model: C, labels: Vec<String>) -> Self {
        Self { model, labels }
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn expected_input_len(&self) -> usize {
        self.model.expected_input_len()
    }

    /// Classify one feature vector. The model is not called when the length
    /// does not match.
    pub fn classify(&self, features: &[f64]) -> Result<ClassProbabilities, PipelineError> {
        let expected = self.model.expected_input_len();
        if features.len() != expected {
            return Err(PipelineError::FeatureLengthMismatch {
                expected,
                actual: features.len(),
            });
        }

        let raw = self
            .model
            .predict(features)
            .map_err(|e| PipelineError::Classifier(e.to_string()))?;
        if raw.is_empty() {
            return Err(PipelineError::Classifier("model returned no outputs".into()));
        }
        if let Some(idx) = raw.iter().position(|v| !v.is_finite()) {
            return Err(PipelineError::Classifier(format!(
                "model output {idx} is not finite ({})",
                raw[idx]
            )));
        }

        let scores = self
            .labels
            .iter()
            .zip(&raw)
            .map(|(label, &p)| (label.clone(), p))
            .collect();

        Ok(ClassProbabilities { scores, raw })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    struct Fixed {
        len: usize,
        out: Vec<f64>,
        calls: Cell<usize>,
    }

    impl Classifier for Fixed {
        fn expected_input_len(&self) -> usize {
            self.len
        }

        fn predict(&self, _features: &[f64]) -> Result<Vec<f64>, ClassifierError> {
            self.calls.set(self.calls.get() + 1);
            Ok(self.out.clone())
        }
    }

    fn labels() -> Vec<String> {
        vec!["calm".into(), "non_calm".into(), "sleep".into()]
    }

    #[test]
    fn test_length_mismatch_skips_model() {
        let adapter = ModelAdapter::new(
            Fixed {
                len: 4,
                out: vec![0.2, 0.5, 0.3],
                calls: Cell::new(0),
            },
            labels(),
        );
        let err = adapter.classify(&[0.0; 3]).unwrap_err();
        assert_eq!(
            err,
            PipelineError::FeatureLengthMismatch {
                expected: 4,
                actual: 3
            }
        );
        assert_eq!(adapter.model.calls.get(), 0);
    }

    #[test]
    fn test_labels_zipped_in_order() {
        let adapter = ModelAdapter::new(
            Fixed {
                len: 2,
                out: vec![0.2, 0.5, 0.3],
                calls: Cell::new(0),
            },
            labels(),
        );
        let probs = adapter.classify(&[1.0, 2.0]).unwrap();
        assert_eq!(probs.get("non_calm"), Some(0.5));
        assert_eq!(probs.argmax(), Some(1));
        assert_eq!(probs.target_probability(2), 0.3);
    }

    #[test]
    fn test_short_output_falls_back_to_max() {
        let adapter = ModelAdapter::new(
            Fixed {
                len: 1,
                out: vec![0.8],
                calls: Cell::new(0),
            },
            labels(),
        );
        let probs = adapter.classify(&[1.0]).unwrap();
        assert_eq!(probs.scores.len(), 1);
        assert_eq!(probs.target_probability(1), 0.8);
    }

    #[test]
    fn test_empty_output_is_rejected() {
        let adapter = ModelAdapter::new(
            Fixed {
                len: 1,
                out: vec![],
                calls: Cell::new(0),
            },
            labels(),
        );
        let err = adapter.classify(&[1.0]).unwrap_err();
        assert!(matches!(err, PipelineError::Classifier(_)));
    }

    #[test]
    fn test_non_finite_output_is_rejected() {
        for out in [vec![0.1, f64::NAN, 0.1], vec![f64::INFINITY, 0.0, 0.0]] {
            let adapter = ModelAdapter::new(
                Fixed {
                    len: 1,
                    out,
                    calls: Cell::new(0),
                },
                labels(),
            );
            let err = adapter.classify(&[1.0]).unwrap_err();
            assert!(matches!(err, PipelineError::Classifier(_)));
            assert_eq!(adapter.model.calls.get(), 1);
        }
    }

    #[test]
    fn test_argmax_first_wins_on_tie() {
        let probs = ClassProbabilities {
            scores: vec![],
            raw: vec![0.4, 0.4, 0.2],
        };
        assert_eq!(probs.argmax(), Some(0));
    }

    #[test]
    fn test_dense_softmax() {
        let model = DenseModel::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![0.0, 0.0]],
            vec![0.0, 0.0, 0.0],
            Activation::Softmax,
        )
        .unwrap();
        let out = model.predict(&[2.0, 0.0]).unwrap();
        assert!((out.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(out[0] > out[1]);
        assert!((out[1] - out[2]).abs() < 1e-12);
    }

    #[test]
    fn test_dense_sigmoid_and_identity() {
        let sigmoid = DenseModel::new(vec![vec![1.0]], vec![0.0], Activation::Sigmoid).unwrap();
        assert_eq!(sigmoid.predict(&[0.0]).unwrap(), vec![0.5]);

        let identity = DenseModel::new(vec![vec![2.0, 1.0]], vec![1.0], Activation::Identity)
            .unwrap();
        assert_eq!(identity.predict(&[1.0, 3.0]).unwrap(), vec![6.0]);
    }

    #[test]
    fn test_dense_rejects_bad_shapes() {
        assert!(DenseModel::new(vec![vec![1.0], vec![1.0, 2.0]], vec![0.0, 0.0], Activation::Identity).is_err());
        assert!(DenseModel::new(vec![vec![1.0]], vec![0.0, 0.0], Activation::Identity).is_err());
    }

    #[test]
    fn test_dense_load_from_json() {
        let path = std::env::temp_dir().join("eeg-blower-model-test.json");
        std::fs::write(
            &path,
            r#"{ "weights": [[0.5, 0.5]], "bias": [0.0], "activation": "identity", "log_epsilon": 1e-12 }"#,
        )
        .unwrap();
        let model = DenseModel::load(&path).unwrap();
        assert_eq!(model.expected_input_len(), 2);
        assert_eq!(model.log_epsilon(), Some(1e-12));
        let _ = std::fs::remove_file(&path);
    }
}

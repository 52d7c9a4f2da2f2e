//! Static per-feature standardization asset.
//!
//! The asset is a JSON object `{ "mean": [..], "std": [..], "log_epsilon": .. }`
//! written by `eeg-blower fit-scaler` and loaded once at startup.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use std::path::Path;
use thiserror::Error;

/// Errors loading or fitting a [`Standardizer`].
#[derive(Debug, Error)]
pub enum ScalerError {
    #[error("failed to read scaler asset: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse scaler asset: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("scaler mean has {mean} entries but std has {std}")]
    Mismatched { mean: usize, std: usize },

    #[error("scaler has {actual} features, extractor produces {expected}")]
    WrongLength { expected: usize, actual: usize },

    #[error("no training rows to fit")]
    Empty,

    #[error("training row {row} has {actual} values, expected {expected}")]
    Ragged {
        row: usize,
        expected: usize,
        actual: usize,
    },
}

/// Per-feature `(x - mean) / std` transform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Standardizer {
    mean: Vec<f64>,
    std: Vec<f64>,
    /// Epsilon used for log compression when the asset was fitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    log_epsilon: Option<f64>,
}

impl Standardizer {
    /// Build from explicit vectors. Zero std entries are stored as 1.
    pub fn new(mean: Vec<f64>, std: Vec<f64>) -> Result<Self, ScalerError> {
        if mean.len() != std.len() {
            return Err(ScalerError::Mismatched {
                mean: mean.len(),
                std: std.len(),
            });
        }
        let std = std
            .into_iter()
            .map(|s| if s == 0.0 { 1.0 } else { s })
            .collect();
        Ok(Self {
            mean,
            std,
            log_epsilon: None,
        })
    }

    /// Record the log epsilon the features were compressed with.
    pub fn with_log_epsilon(mut self, eps: f64) -> Self {
        self.log_epsilon = Some(eps);
        self
    }

    /// Load an asset from disk.
    pub fn load(path: &Path) -> Result<Self, ScalerError> {
        let content = std::fs::read_to_string(path)?;
        let raw: Standardizer = serde_json::from_str(&content)?;
        let log_epsilon = raw.log_epsilon;
        let mut scaler = Standardizer::new(raw.mean, raw.std)?;
        scaler.log_epsilon = log_epsilon;
        Ok(scaler)
    }

    /// Write the asset as pretty JSON.
    pub fn save(&self, path: &Path) -> Result<(), ScalerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Fit population mean/std per column over the given rows.
    pub fn fit(rows: &[Vec<f64>]) -> Result<Self, ScalerError> {
        let first = rows.first().ok_or(ScalerError::Empty)?;
        let width = first.len();
        if let Some((row, r)) = rows.iter().enumerate().find(|(_, r)| r.len() != width) {
            return Err(ScalerError::Ragged {
                row,
                expected: width,
                actual: r.len(),
            });
        }

        let mut mean = Vec::with_capacity(width);
        let mut std = Vec::with_capacity(width);
        for col in 0..width {
            let column: Vec<f64> = rows.iter().map(|r| r[col]).collect();
            mean.push(column.iter().mean());
            std.push(column.iter().population_std_dev());
        }

        Standardizer::new(mean, std)
    }

    /// Number of features this asset covers.
    pub fn len(&self) -> usize {
        self.mean.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mean.is_empty()
    }

    pub fn log_epsilon(&self) -> Option<f64> {
        self.log_epsilon
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn std(&self) -> &[f64] {
        &self.std
    }

    /// Standardize features in place. Lengths are checked at extractor construction.
    pub fn apply(&self, features: &mut [f64]) {
        for ((x, m), s) in features.iter_mut().zip(&self.mean).zip(&self.std) {
            *x = (*x - m) / s;
        }
    }
}

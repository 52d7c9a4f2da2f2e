//! Errors raised inside a single pipeline tick.

use thiserror::Error;

/// Failure of one stage of the window → command pipeline.
///
/// None of these end the acquisition loop; the tick is skipped.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PipelineError {
    /// The window does not have the configured layout or holds non-finite samples.
    #[error("invalid window shape: {0}")]
    Shape(String),

    /// A channel holds fewer samples than one window needs.
    #[error("insufficient data: got {got} samples, need {need}")]
    InsufficientData { got: usize, need: usize },

    /// The extractor produced a different number of features than configured.
    #[error("feature length {actual} does not match configured length {expected}")]
    Length { expected: usize, actual: usize },

    /// The feature vector does not fit the classifier's input.
    #[error("classifier expects {expected} features, got {actual}")]
    FeatureLengthMismatch { expected: usize, actual: usize },

    /// The classifier failed to produce an output.
    #[error("classifier error: {0}")]
    Classifier(String),
}

impl PipelineError {
    /// Whether this is the routine "not enough samples yet" case.
    pub fn is_insufficient_data(&self) -> bool {
        matches!(self, PipelineError::InsufficientData { .. })
    }
}

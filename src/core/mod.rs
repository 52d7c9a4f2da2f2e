//! Core pipeline for the EEG blower agent.
//!
//! This module contains:
//! - Spectral feature extraction from raw windows
//! - The classifier seam and label mapping
//! - Decision stabilization over recent classifications
//! - Decision to actuator command mapping

pub mod actuator;
pub mod classify;
pub mod error;
pub mod scaler;
pub mod spectral;
pub mod stabilizer;

// Re-export commonly used types
pub use actuator::{ActuatorCommand, ActuatorMap, ActuatorMapError};
pub use classify::{
    Activation, ClassProbabilities, Classifier, ClassifierError, DenseModel, ModelAdapter,
};
pub use error::PipelineError;
pub use scaler::{ScalerError, Standardizer};
pub use spectral::FeatureExtractor;
pub use stabilizer::{History, StabilizedDecision, Stabilizer};

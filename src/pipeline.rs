//! Window → command pipeline.
//!
//! [`Pipeline`] chains the feature extractor, the model adapter, the decision
//! stabilizer and the actuator map. It owns the stabilizer history, so one
//! pipeline serves one stream of windows.

use crate::acquisition::types::RawWindow;
use crate::config::{check_log_epsilon, Config, ConfigError};
use crate::core::actuator::{ActuatorCommand, ActuatorMap, ActuatorMapError};
use crate::core::classify::{
    ClassProbabilities, Classifier, ClassifierError, DenseModel, ModelAdapter,
};
use crate::core::error::PipelineError;
use crate::core::scaler::{ScalerError, Standardizer};
use crate::core::spectral::FeatureExtractor;
use crate::core::stabilizer::{StabilizedDecision, Stabilizer};
use std::fmt;
use thiserror::Error;
use tracing::{info, warn};

/// Startup failures while building a pipeline.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("scaler asset: {0}")]
    Scaler(#[from] ScalerError),

    #[error("model asset: {0}")]
    Model(#[from] ClassifierError),

    #[error("actuator table: {0}")]
    Actuator(#[from] ActuatorMapError),

    #[error("classifier expects {expected} features but the extractor produces {actual}")]
    InputLength { expected: usize, actual: usize },
}

/// Result of one processed window.
#[derive(Debug, Clone, PartialEq)]
pub struct TickReport {
    pub probabilities: ClassProbabilities,
    pub decision: StabilizedDecision,
    pub command: ActuatorCommand,
    /// Compact stabilizer history, oldest first
    pub history: String,
}

impl fmt::Display for TickReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let probs: Vec<String> = self
            .probabilities
            .scores
            .iter()
            .map(|(label, p)| format!("{label}={p:.2}"))
            .collect();
        let decision = match self.decision {
            StabilizedDecision::Class(c) => match self.probabilities.scores.get(c) {
                Some((label, _)) => format!("{c} ({label})"),
                None => format!("{c}"),
            },
            other => other.to_string(),
        };
        write!(
            f,
            "{} | last {}: {} | stable: {} | blower {} ({:.0}%)",
            probs.join(" "),
            self.history.chars().count(),
            self.history,
            decision,
            self.command.value(),
            self.command.percent()
        )
    }
}

pub struct Pipeline<C> {
    extractor: FeatureExtractor,
    adapter: ModelAdapter<C>,
    stabilizer: Stabilizer,
    actuator: ActuatorMap,
    channel_names: Vec<String>,
    target_class: usize,
    threshold: f64,
}

impl<C: Classifier> Pipeline<C> {
    /// Build a pipeline around an already loaded classifier.
    ///
    /// A classifier whose input length differs from the extractor output is
    /// accepted with a warning; every window will then be dropped.
    pub fn new(
        config: &Config,
        classifier: C,
        standardizer: Option<Standardizer>,
    ) -> Result<Self, SetupError> {
        let pipeline = Self::build(config, classifier, standardizer)?;
        if let Some((expected, actual)) = pipeline.input_mismatch() {
            warn!(
                expected,
                actual,
                "Classifier input length does not match extractor output; every window will be dropped"
            );
        }
        Ok(pipeline)
    }

    fn build(
        config: &Config,
        classifier: C,
        standardizer: Option<Standardizer>,
    ) -> Result<Self, SetupError> {
        let mut extractor = FeatureExtractor::new(&config.dsp);
        if let Some(scaler) = standardizer {
            extractor = extractor.with_standardizer(scaler)?;
        }

        Ok(Self {
            extractor,
            adapter: ModelAdapter::new(classifier, config.model.labels.clone()),
            stabilizer: Stabilizer::new(&config.stabilizer, config.model.target_class),
            actuator: ActuatorMap::new(&config.actuator)?,
            channel_names: config.dsp.channel_names(),
            target_class: config.model.target_class,
            threshold: config.stabilizer.threshold,
        })
    }

    /// `(classifier input, extractor output)` when they differ.
    fn input_mismatch(&self) -> Option<(usize, usize)> {
        let expected = self.adapter.expected_input_len();
        let actual = self.extractor.feature_len();
        (expected != actual).then_some((expected, actual))
    }

    pub fn extractor(&self) -> &FeatureExtractor {
        &self.extractor
    }

    pub fn labels(&self) -> &[String] {
        self.adapter.labels()
    }

    /// Channel names in window order.
    pub fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    pub fn target_class(&self) -> usize {
        self.target_class
    }

    /// Threshold applied to the target probability by the threshold policy.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    pub fn window_samples(&self) -> usize {
        self.extractor.window_samples()
    }

    /// Extract, classify, stabilize and map one window.
    pub fn process_window(&mut self, window: &RawWindow) -> Result<TickReport, PipelineError> {
        let features = self.extractor.extract(window)?;
        self.process_features(&features)
    }

    /// Classify, stabilize and map a ready-made feature vector.
    pub fn process_features(&mut self, features: &[f64]) -> Result<TickReport, PipelineError> {
        let probabilities = self.adapter.classify(features)?;
        let decision = self.stabilizer.update(&probabilities);
        let command = self.actuator.map(decision);
        Ok(TickReport {
            probabilities,
            decision,
            command,
            history: self.stabilizer.history_string(),
        })
    }

    /// Command for the current history, without new input.
    pub fn current_command(&self) -> ActuatorCommand {
        self.actuator.map(self.stabilizer.decision())
    }
}

impl Pipeline<DenseModel> {
    /// Load the model and optional scaler named in the configuration, check
    /// their log epsilon against the runtime value and build the pipeline.
    pub fn from_config(config: &Config) -> Result<Self, SetupError> {
        let eps = config.dsp.log_epsilon;

        let model = DenseModel::load(&config.model.model_path)?;
        check_log_epsilon("model", eps, model.log_epsilon())?;

        let scaler = match config.dsp.scaler_path {
            Some(ref path) => {
                let scaler = Standardizer::load(path)?;
                check_log_epsilon("scaler", eps, scaler.log_epsilon())?;
                Some(scaler)
            }
            None => None,
        };

        info!(
            model = %config.model.model_path.display(),
            inputs = model.expected_input_len(),
            outputs = model.output_len(),
            standardized = scaler.is_some(),
            "Classifier loaded"
        );

        let pipeline = Pipeline::build(config, model, scaler)?;
        if let Some((expected, actual)) = pipeline.input_mismatch() {
            return Err(SetupError::InputLength { expected, actual });
        }
        Ok(pipeline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeatureStrategy, PolicyKind};
    use crate::core::classify::Activation;

    fn mean_config() -> Config {
        let mut config = Config::default();
        config.dsp.strategy = FeatureStrategy::ChannelMean;
        config.dsp.channels = 3;
        config.dsp.window_samples = 4;
        config.stabilizer.class_history_depth = 3;
        config
    }

    /// Picks the class whose channel mean is largest.
    fn identity_model() -> DenseModel {
        DenseModel::new(
            vec![vec![1.0, 0.0, 0.0], vec![0.0, 1.0, 0.0], vec![0.0, 0.0, 1.0]],
            vec![0.0; 3],
            Activation::Softmax,
        )
        .unwrap()
    }

    fn window(means: [f64; 3]) -> RawWindow {
        RawWindow::from_channels(means.iter().map(|&m| vec![m; 4]).collect()).unwrap()
    }

    #[test]
    fn test_majority_pipeline() {
        let mut pipeline = Pipeline::new(&mean_config(), identity_model(), None).unwrap();

        let r = pipeline.process_window(&window([0.0, 5.0, 0.0])).unwrap();
        assert_eq!(r.decision, StabilizedDecision::Class(1));
        assert_eq!(r.command.value(), 255);

        pipeline.process_window(&window([0.0, 0.0, 5.0])).unwrap();
        let r = pipeline.process_window(&window([0.0, 0.0, 5.0])).unwrap();
        assert_eq!(r.decision, StabilizedDecision::Class(2));
        assert_eq!(r.command.value(), 0);
        assert_eq!(r.history, "122");
        assert_eq!(pipeline.current_command(), r.command);
    }

    #[test]
    fn test_threshold_pipeline() {
        let mut config = mean_config();
        config.stabilizer.policy = PolicyKind::Threshold;
        config.stabilizer.smoothing_depth = 1;
        config.stabilizer.stability_depth = 2;
        let mut pipeline = Pipeline::new(&config, identity_model(), None).unwrap();

        let r = pipeline.process_window(&window([0.0, 9.0, 0.0])).unwrap();
        assert_eq!(r.decision, StabilizedDecision::Binary(true));
        let r = pipeline.process_window(&window([9.0, 0.0, 0.0])).unwrap();
        assert_eq!(r.decision, StabilizedDecision::Binary(false));
        assert_eq!(r.command.value(), 0);
        assert_eq!(r.history, "TN");
    }

    #[test]
    fn test_feature_length_mismatch_reported() {
        let model = DenseModel::new(vec![vec![1.0; 5]], vec![0.0], Activation::Identity).unwrap();
        let mut pipeline = Pipeline::new(&mean_config(), model, None).unwrap();
        assert_eq!(
            pipeline.process_window(&window([1.0, 1.0, 1.0])),
            Err(PipelineError::FeatureLengthMismatch {
                expected: 5,
                actual: 3
            })
        );
    }

    #[test]
    fn test_status_line() {
        let mut pipeline = Pipeline::new(&mean_config(), identity_model(), None).unwrap();
        let r = pipeline.process_window(&window([0.0, 5.0, 0.0])).unwrap();
        let line = r.to_string();
        assert!(line.contains("non_calm="));
        assert!(line.contains("last 1: 1"));
        assert!(line.contains("stable: 1 (non_calm)"));
        assert!(line.contains("blower 255 (100%)"));
    }

    #[test]
    fn test_from_config_rejects_epsilon_mismatch() {
        let dir = std::env::temp_dir().join("eeg-blower-pipeline-eps");
        std::fs::create_dir_all(&dir).unwrap();
        let model_path = dir.join("model.json");
        identity_model()
            .with_log_epsilon(1e-9)
            .save(&model_path)
            .unwrap();

        let mut config = mean_config();
        config.model.model_path = model_path.clone();
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(SetupError::Config(ConfigError::EpsilonMismatch { .. }))
        ));

        identity_model()
            .with_log_epsilon(config.dsp.log_epsilon)
            .save(&model_path)
            .unwrap();
        assert!(Pipeline::from_config(&config).is_ok());
        let _ = std::fs::remove_file(&model_path);
    }

    #[test]
    fn test_from_config_rejects_input_length() {
        let dir = std::env::temp_dir().join("eeg-blower-pipeline-inputs");
        std::fs::create_dir_all(&dir).unwrap();
        let model_path = dir.join("model.json");
        DenseModel::new(vec![vec![1.0; 5]], vec![0.0], Activation::Identity)
            .unwrap()
            .save(&model_path)
            .unwrap();

        let mut config = mean_config();
        config.model.model_path = model_path.clone();
        assert!(matches!(
            Pipeline::from_config(&config),
            Err(SetupError::InputLength {
                expected: 5,
                actual: 3
            })
        ));
        let _ = std::fs::remove_file(&model_path);
    }

    #[test]
    fn test_channel_names_follow_config() {
        let mut config = mean_config();
        config.dsp.axes = vec!["TP9".into(), "AF7".into(), "AF8".into()];
        let pipeline = Pipeline::new(&config, identity_model(), None).unwrap();
        assert_eq!(pipeline.channel_names(), ["TP9", "AF7", "AF8"]);
        assert_eq!(pipeline.target_class(), 1);
        assert_eq!(pipeline.labels().len(), 3);
    }
}

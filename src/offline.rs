//! Offline modes: pasted text rows in, one decision out.
//!
//! These never touch a headset or an actuator link. `test-features` feeds a
//! ready-made feature row to the classifier; `test-raw` feeds an interleaved
//! raw row through the full extractor. `fit-scaler` builds the
//! standardization asset from a CSV of training feature rows.

use crate::acquisition::types::RawWindow;
use crate::core::classify::Classifier;
use crate::core::error::PipelineError;
use crate::core::scaler::{ScalerError, Standardizer};
use crate::pipeline::{Pipeline, TickReport};
use csv::ReaderBuilder;
use std::fmt;
use std::path::Path;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum OfflineError {
    #[error("no numbers found in input")]
    Empty,

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Scaler(#[from] ScalerError),

    #[error("failed to read training CSV: {0}")]
    Csv(#[from] csv::Error),

    #[error("training row {row}: {value:?} is not a number")]
    BadValue { row: usize, value: String },
}

/// Pull every number out of a pasted row.
///
/// Values may be separated by whitespace, commas or semicolons and wrapped in
/// brackets or parentheses. Tokens that do not parse are ignored.
pub fn parse_numbers(text: &str) -> Vec<f64> {
    text.split(|c: char| c.is_whitespace() || matches!(c, ',' | ';' | '[' | ']' | '(' | ')'))
        .filter(|token| !token.is_empty())
        .filter_map(|token| token.parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .collect()
}

/// Outcome of a one-shot offline run.
#[derive(Debug, Clone)]
pub struct OfflineReport {
    /// Numbers parsed from the input
    pub values: usize,
    /// Length of the vector handed to the classifier
    pub features: usize,
    /// One name per raw output; outputs past the label list are `class_<i>`
    pub output_names: Vec<String>,
    pub target_class: usize,
    /// Target-class probability, or the largest output when the model
    /// returned fewer values
    pub p_target: f64,
    pub threshold: f64,
    /// `p_target >= threshold`, independent of the live policy
    pub target: bool,
    pub result: TickReport,
}

impl OfflineReport {
    fn new<C: Classifier>(
        pipeline: &Pipeline<C>,
        values: usize,
        features: usize,
        result: TickReport,
    ) -> Self {
        let labels = pipeline.labels();
        let output_names = (0..result.probabilities.raw.len())
            .map(|i| label_or_index(labels, i))
            .collect();
        let target_class = pipeline.target_class();
        let p_target = result.probabilities.target_probability(target_class);
        let threshold = pipeline.threshold();

        Self {
            values,
            features,
            output_names,
            target_class,
            p_target,
            threshold,
            target: p_target >= threshold,
            result,
        }
    }

    fn target_label(&self) -> String {
        match self.output_names.get(self.target_class) {
            Some(name) => name.clone(),
            None => format!("class_{}", self.target_class),
        }
    }
}

fn label_or_index(labels: &[String], i: usize) -> String {
    labels
        .get(i)
        .cloned()
        .unwrap_or_else(|| format!("class_{i}"))
}

impl fmt::Display for OfflineReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Parsed values:   {}", self.values)?;
        writeln!(f, "Feature length:  {}", self.features)?;
        writeln!(f, "Raw output:")?;
        for (i, (name, p)) in self
            .output_names
            .iter()
            .zip(&self.result.probabilities.raw)
            .enumerate()
        {
            writeln!(f, "  [{i}] {name:<12} {p:.4}")?;
        }
        writeln!(
            f,
            "Target:          {} ({})",
            self.target_class,
            self.target_label()
        )?;
        writeln!(f, "p_target:        {:.4}", self.p_target)?;
        writeln!(
            f,
            "Decision at threshold {:.2}: {}",
            self.threshold,
            if self.target { "TARGET" } else { "NON-TARGET" }
        )?;
        writeln!(f, "Stable decision: {}", self.result.decision)?;
        write!(
            f,
            "Command:         {} ({:.0}%)",
            self.result.command.value(),
            self.result.command.percent()
        )
    }
}

/// Classify a pasted feature row.
pub fn test_features<C: Classifier>(
    pipeline: &mut Pipeline<C>,
    text: &str,
) -> Result<OfflineReport, OfflineError> {
    let values = parse_numbers(text);
    if values.is_empty() {
        return Err(OfflineError::Empty);
    }
    let result = pipeline.process_features(&values)?;
    Ok(OfflineReport::new(pipeline, values.len(), values.len(), result))
}

/// Extract features from a pasted interleaved raw row and classify them.
///
/// Frames are interleaved in the pipeline's channel order.
pub fn test_raw<C: Classifier>(
    pipeline: &mut Pipeline<C>,
    text: &str,
) -> Result<OfflineReport, OfflineError> {
    let values = parse_numbers(text);
    if values.is_empty() {
        return Err(OfflineError::Empty);
    }
    let channels = pipeline.channel_names().len();
    if channels > 0 && values.len() % channels != 0 {
        let dropped = values.len() % channels;
        warn!(
            values = values.len(),
            channels,
            dropped,
            missing = %pipeline.channel_names()[dropped..].join(","),
            "Raw row is not a whole number of frames; trailing values ignored"
        );
    }

    let window = RawWindow::from_interleaved(&values, channels)?;
    let features = pipeline.extractor().feature_len();
    let result = pipeline.process_window(&window)?;
    Ok(OfflineReport::new(pipeline, values.len(), features, result))
}

/// Fit a standardization asset from training feature rows.
///
/// The CSV has no header, or a header row that is skipped because it does not
/// parse. With `log_epsilon` set, each value becomes `log10(max(x, eps))`
/// before fitting and the epsilon is recorded in the asset.
pub fn fit_scaler(
    input: &Path,
    output: &Path,
    log_epsilon: Option<f64>,
) -> Result<Standardizer, OfflineError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(false)
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(input)?;

    let mut rows = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result?;
        let parsed: Result<Vec<f64>, String> = record
            .iter()
            .map(|field| field.parse::<f64>().map_err(|_| field.to_string()))
            .collect();
        let row = match parsed {
            Ok(row) => row,
            Err(_) if row_idx == 0 => continue,
            Err(value) => {
                return Err(OfflineError::BadValue {
                    row: row_idx + 1,
                    value,
                })
            }
        };
        rows.push(match log_epsilon {
            Some(eps) => row.into_iter().map(|x| x.max(eps).log10()).collect(),
            None => row,
        });
    }

    let mut scaler = Standardizer::fit(&rows)?;
    if let Some(eps) = log_epsilon {
        scaler = scaler.with_log_epsilon(eps);
    }
    scaler.save(output)?;

    info!(
        rows = rows.len(),
        features = scaler.len(),
        output = %output.display(),
        "Scaler written"
    );
    Ok(scaler)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FeatureStrategy};
    use crate::core::classify::{Activation, DenseModel};
    use crate::core::stabilizer::StabilizedDecision;

    fn mean_pipeline() -> Pipeline<DenseModel> {
        let mut config = Config::default();
        config.dsp.strategy = FeatureStrategy::ChannelMean;
        config.dsp.channels = 2;
        config.dsp.window_samples = 2;
        let model = DenseModel::new(
            vec![vec![1.0, 0.0], vec![0.0, 1.0], vec![-1.0, -1.0]],
            vec![0.0; 3],
            Activation::Softmax,
        )
        .unwrap();
        Pipeline::new(&config, model, None).unwrap()
    }

    #[test]
    fn test_parse_numbers() {
        assert_eq!(
            parse_numbers("[1, -2.5; 3e-2]\n(4)  x 5."),
            vec![1.0, -2.5, 0.03, 4.0, 5.0]
        );
        assert!(parse_numbers("no numbers here").is_empty());
        assert_eq!(parse_numbers("1 NaN 2"), vec![1.0, 2.0]);
    }

    #[test]
    fn test_features_mode() {
        let mut pipeline = mean_pipeline();
        let report = test_features(&mut pipeline, "0.0, 4.0").unwrap();
        assert_eq!(report.features, 2);
        assert_eq!(report.result.decision, StabilizedDecision::Class(1));
        assert_eq!(report.result.command.value(), 255);
        assert_eq!(report.output_names, vec!["calm", "non_calm", "sleep"]);
        assert_eq!(report.target_class, 1);
        assert!(report.p_target > 0.9);
        assert!(report.target);

        let text = report.to_string();
        assert!(text.contains("[1] non_calm"));
        assert!(text.contains("Target:          1 (non_calm)"));
        assert!(text.contains("Decision at threshold 0.70: TARGET"));
        assert!(text.contains("Command:         255 (100%)"));
    }

    #[test]
    fn test_features_mode_reports_unlabelled_outputs() {
        let mut config = Config::default();
        config.dsp.strategy = FeatureStrategy::ChannelMean;
        config.dsp.channels = 2;
        config.dsp.window_samples = 2;
        let model = DenseModel::new(
            vec![vec![0.0, 0.0]; 4],
            vec![0.0; 4],
            Activation::Softmax,
        )
        .unwrap();
        let mut pipeline = Pipeline::new(&config, model, None).unwrap();

        let report = test_features(&mut pipeline, "1 1").unwrap();
        assert_eq!(report.output_names[3], "class_3");
        assert_eq!(report.result.probabilities.raw.len(), 4);
        assert!((report.p_target - 0.25).abs() < 1e-12);
        assert!(!report.target);

        let text = report.to_string();
        assert!(text.contains("[3] class_3"));
        assert!(text.contains("Decision at threshold 0.70: NON-TARGET"));
    }

    #[test]
    fn test_features_mode_wrong_length() {
        let mut pipeline = mean_pipeline();
        assert!(matches!(
            test_features(&mut pipeline, "1 2 3"),
            Err(OfflineError::Pipeline(PipelineError::FeatureLengthMismatch {
                expected: 2,
                actual: 3
            }))
        ));
        assert!(matches!(
            test_features(&mut pipeline, ""),
            Err(OfflineError::Empty)
        ));
    }

    #[test]
    fn test_raw_mode_interleaved() {
        let mut pipeline = mean_pipeline();
        // ch0 = [3, 5], ch1 = [0, 0], one trailing value ignored
        let report = test_raw(&mut pipeline, "3 0 5 0 9").unwrap();
        assert_eq!(report.values, 5);
        assert_eq!(report.result.decision, StabilizedDecision::Class(0));
        assert_eq!(report.result.command.value(), 128);
    }

    #[test]
    fn test_raw_mode_too_short() {
        let mut pipeline = mean_pipeline();
        assert!(matches!(
            test_raw(&mut pipeline, "1 2"),
            Err(OfflineError::Pipeline(PipelineError::InsufficientData {
                got: 1,
                need: 2
            }))
        ));
    }

    #[test]
    fn test_fit_scaler_with_log() {
        let dir = std::env::temp_dir().join("eeg-blower-fit-scaler");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("training.csv");
        let output = dir.join("scaler.json");
        std::fs::write(&input, "f0,f1\n10,0\n1000,0\n").unwrap();

        let scaler = fit_scaler(&input, &output, Some(1e-12)).unwrap();
        assert_eq!(scaler.len(), 2);
        assert!((scaler.mean()[0] - 2.0).abs() < 1e-12);
        assert!((scaler.std()[0] - 1.0).abs() < 1e-12);
        assert!((scaler.mean()[1] + 12.0).abs() < 1e-12);
        assert_eq!(scaler.std()[1], 1.0);

        let loaded = Standardizer::load(&output).unwrap();
        assert_eq!(loaded.log_epsilon(), Some(1e-12));
        let _ = std::fs::remove_file(&input);
        let _ = std::fs::remove_file(&output);
    }

    #[test]
    fn test_fit_scaler_rejects_bad_value() {
        let dir = std::env::temp_dir().join("eeg-blower-fit-scaler-bad");
        std::fs::create_dir_all(&dir).unwrap();
        let input = dir.join("training.csv");
        std::fs::write(&input, "1,2\n3,oops\n").unwrap();
        assert!(matches!(
            fit_scaler(&input, &dir.join("scaler.json"), None),
            Err(OfflineError::BadValue { row: 2, .. })
        ));
        let _ = std::fs::remove_file(&input);
    }
}

//! Configuration for the EEG blower agent.
//!
//! A single [`Config`] is built once at startup and handed to each component
//! constructor. Nothing here is mutated while the loop runs.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Floor applied before `log10` of band power.
///
/// The scaling asset and the model asset record the epsilon they were fitted
/// with; both are checked against this value at startup.
pub const DEFAULT_LOG_EPSILON: f64 = 1e-12;

/// Main configuration for the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Windowing and spectral feature settings
    pub dsp: DspConfig,

    /// Classifier asset and label order
    pub model: ModelConfig,

    /// Decision smoothing policy
    pub stabilizer: StabilizerConfig,

    /// Class to command table
    pub actuator: ActuatorConfig,

    /// Actuator link selection
    pub transport: TransportConfig,

    /// Tick timing and debug output
    pub runner: RunnerConfig,

    /// Path for storing session statistics
    pub data_path: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eeg-blower-agent");

        Self {
            dsp: DspConfig::default(),
            model: ModelConfig::default(),
            stabilizer: StabilizerConfig::default(),
            actuator: ActuatorConfig::default(),
            transport: TransportConfig::default(),
            runner: RunnerConfig::default(),
            data_path: data_dir,
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path, falling back to defaults if
    /// the file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content =
                std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
            let config: Config = serde_json::from_str(&content)
                .map_err(|e| ConfigError::ParseError(e.to_string()))?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    /// Save configuration to an explicit path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::IoError(e.to_string()))?;
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path, content).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("eeg-blower-agent")
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Check cross-field consistency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let dsp = &self.dsp;
        if dsp.channels == 0 {
            return Err(invalid("dsp.channels must be at least 1"));
        }
        if dsp.window_samples < 2 {
            return Err(invalid("dsp.window_samples must be at least 2"));
        }
        if !(dsp.sample_rate_hz.is_finite() && dsp.sample_rate_hz > 0.0) {
            return Err(invalid("dsp.sample_rate_hz must be positive"));
        }
        if !(dsp.cutoff_hz.is_finite() && dsp.cutoff_hz >= 0.0) {
            return Err(invalid("dsp.cutoff_hz must be non-negative"));
        }
        if !(dsp.log_epsilon.is_finite() && dsp.log_epsilon > 0.0) {
            return Err(invalid("dsp.log_epsilon must be positive"));
        }
        if !dsp.axes.is_empty() && dsp.axes.len() != dsp.channels {
            return Err(ConfigError::Invalid(format!(
                "dsp.axes names {} channels but dsp.channels is {}",
                dsp.axes.len(),
                dsp.channels
            )));
        }

        let model = &self.model;
        if model.labels.is_empty() {
            return Err(invalid("model.labels must not be empty"));
        }
        if model.target_class >= model.labels.len() {
            return Err(ConfigError::Invalid(format!(
                "model.target_class {} is out of range for {} labels",
                model.target_class,
                model.labels.len()
            )));
        }

        let stab = &self.stabilizer;
        if stab.smoothing_depth == 0 || stab.stability_depth == 0 || stab.class_history_depth == 0
        {
            return Err(invalid("stabilizer depths must be at least 1"));
        }
        if !stab.threshold.is_finite() {
            return Err(invalid("stabilizer.threshold must be finite"));
        }

        let act = &self.actuator;
        if act.class_commands.len() != model.labels.len() {
            return Err(ConfigError::Invalid(format!(
                "actuator.class_commands has {} entries but there are {} labels",
                act.class_commands.len(),
                model.labels.len()
            )));
        }

        if self.runner.stride.is_zero() {
            return Err(invalid("runner.stride must be non-zero"));
        }
        if self.runner.buffer_hint < dsp.window_samples {
            return Err(ConfigError::Invalid(format!(
                "runner.buffer_hint {} cannot hold a window of {} samples",
                self.runner.buffer_hint, dsp.window_samples
            )));
        }

        Ok(())
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}

/// How a raw window is turned into features.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureStrategy {
    /// Log band power per channel up to the cutoff frequency
    Spectral,
    /// One mean value per channel
    ChannelMean,
}

/// Spectral feature extraction settings. These must match the settings the
/// classifier was trained with.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DspConfig {
    /// Headset sampling rate in Hz
    pub sample_rate_hz: f64,
    /// Number of EEG channels fed to the extractor
    pub channels: usize,
    /// Channel names, in feature order. Empty means `eeg_1..eeg_C`.
    pub axes: Vec<String>,
    /// Samples per channel in one window
    pub window_samples: usize,
    /// Highest frequency bin kept (inclusive)
    pub cutoff_hz: f64,
    /// Feature strategy
    pub strategy: FeatureStrategy,
    /// Whether band power is log10-compressed
    pub log_power: bool,
    /// Floor applied before log10
    pub log_epsilon: f64,
    /// Channels whose std is at or below this are not rescaled
    pub normalize_epsilon: f64,
    /// Optional per-feature mean/std asset
    pub scaler_path: Option<PathBuf>,
    /// Feature count the classifier was trained on, checked on every window
    pub expected_features: Option<usize>,
}

impl Default for DspConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 256.0,
            channels: 4,
            axes: vec![
                "eeg_1".to_string(),
                "eeg_2".to_string(),
                "eeg_3".to_string(),
                "eeg_4".to_string(),
            ],
            window_samples: 512,
            cutoff_hz: 66.0,
            strategy: FeatureStrategy::Spectral,
            log_power: true,
            log_epsilon: DEFAULT_LOG_EPSILON,
            normalize_epsilon: 1e-8,
            scaler_path: None,
            expected_features: None,
        }
    }
}

impl DspConfig {
    /// Wall-clock length of one window.
    pub fn window_duration(&self) -> Duration {
        Duration::from_secs_f64(self.window_samples as f64 / self.sample_rate_hz)
    }

    /// One display name per channel, falling back to `eeg_<n>` where
    /// `axes` has no entry.
    pub fn channel_names(&self) -> Vec<String> {
        (0..self.channels)
            .map(|i| {
                self.axes
                    .get(i)
                    .cloned()
                    .unwrap_or_else(|| format!("eeg_{}", i + 1))
            })
            .collect()
    }
}

/// Classifier asset and label order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Path to the dense model JSON asset
    pub model_path: PathBuf,
    /// Output labels in model order
    pub labels: Vec<String>,
    /// Index of the label treated as TARGET by the threshold policy
    pub target_class: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("eeg_model.json"),
            labels: vec![
                "calm".to_string(),
                "non_calm".to_string(),
                "sleep".to_string(),
            ],
            target_class: 1,
        }
    }
}

/// Which stabilizer policy drives the actuator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    /// Smoothed target probability, thresholded, all-of-K run requirement
    Threshold,
    /// Majority vote over recent argmax classes
    Majority,
}

/// Smoothing applied over the probability history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Smoothing {
    Median,
    Mean,
}

/// Decision stabilizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StabilizerConfig {
    pub policy: PolicyKind,
    /// Probabilities kept for smoothing (S)
    pub smoothing_depth: usize,
    /// Booleans that must all be TARGET (K, threshold policy)
    pub stability_depth: usize,
    pub smoothing: Smoothing,
    /// Smoothed probability at or above this is TARGET
    pub threshold: f64,
    /// Class indices kept for the majority vote (K, majority policy)
    pub class_history_depth: usize,
}

impl Default for StabilizerConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::Majority,
            smoothing_depth: 5,
            stability_depth: 10,
            smoothing: Smoothing::Median,
            threshold: 0.7,
            class_history_depth: 8,
        }
    }
}

/// Class to command table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ActuatorConfig {
    /// Upper bound of the command range
    pub max_command: u16,
    /// Command for each class index, in label order
    pub class_commands: Vec<u16>,
    /// Command for a stable TARGET decision
    pub target_command: u16,
    /// Command for a NON-TARGET decision
    pub non_target_command: u16,
}

impl Default for ActuatorConfig {
    fn default() -> Self {
        Self {
            max_command: 255,
            // calm -> half, non_calm -> full, sleep -> off
            class_commands: vec![128, 255, 0],
            target_command: 255,
            non_target_command: 0,
        }
    }
}

/// Actuator link selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// When false, commands only go to the log
    pub enabled: bool,
    pub serial_port: Option<String>,
    pub serial_baud: u32,
    /// When set, the network link is used instead of serial
    pub wifi_host: Option<String>,
    pub wifi_port: u16,
    #[serde(with = "duration_serde")]
    pub connect_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            serial_port: Some(default_serial_port().to_string()),
            serial_baud: 115_200,
            wifi_host: None,
            wifi_port: 9000,
            connect_timeout: Duration::from_secs(2),
        }
    }
}

#[cfg(target_os = "windows")]
fn default_serial_port() -> &'static str {
    "COM3"
}

#[cfg(not(target_os = "windows"))]
fn default_serial_port() -> &'static str {
    "/dev/ttyACM0"
}

/// Tick timing and debug output.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Interval between decisions
    #[serde(with = "duration_serde")]
    pub stride: Duration,
    /// Sample capacity requested from the acquisition session
    pub buffer_hint: usize,
    /// Pause after the session starts streaming
    #[serde(with = "duration_serde")]
    pub warmup: Duration,
    /// Per-channel statistics are logged for windows below this index
    pub debug_max_windows: u64,
    /// ...every this many windows
    pub debug_every_n: u64,
    /// Stop after this many ticks
    pub max_ticks: Option<u64>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            stride: Duration::from_millis(250),
            buffer_hint: 45_000,
            warmup: Duration::from_secs(1),
            debug_max_windows: 40,
            debug_every_n: 10,
            max_ticks: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    IoError(String),
    ParseError(String),
    SerializeError(String),
    Invalid(String),
    EpsilonMismatch {
        asset: String,
        configured: f64,
        recorded: f64,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(e) => write!(f, "IO error: {e}"),
            ConfigError::ParseError(e) => write!(f, "Parse error: {e}"),
            ConfigError::SerializeError(e) => write!(f, "Serialize error: {e}"),
            ConfigError::Invalid(e) => write!(f, "Invalid configuration: {e}"),
            ConfigError::EpsilonMismatch {
                asset,
                configured,
                recorded,
            } => write!(
                f,
                "Log epsilon mismatch: {asset} was fitted with {recorded:e}, runtime uses {configured:e}"
            ),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Check that an asset was produced with the runtime log epsilon.
///
/// Assets that do not record an epsilon are accepted.
pub fn check_log_epsilon(
    asset: &str,
    configured: f64,
    recorded: Option<f64>,
) -> Result<(), ConfigError> {
    match recorded {
        Some(recorded) if recorded != configured => Err(ConfigError::EpsilonMismatch {
            asset: asset.to_string(),
            configured,
            recorded,
        }),
        _ => Ok(()),
    }
}

/// Serde support for Duration, in milliseconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

//! Windowed spectral feature extraction.
//!
//! Turns a [`RawWindow`] into the flat feature vector the classifier was
//! trained on. The layout is channel-then-bin: all kept bins of channel 0,
//! then all kept bins of channel 1, and so on.
//!
//! Per channel:
//! 1. keep the most recent `window_samples` samples
//! 2. subtract the mean, divide by the std unless the channel is flat
//! 3. apply a periodic Hann window
//! 4. forward FFT, keep the non-negative half
//! 5. power = |X[k]|², keep bins with `k·fs/N <= cutoff`
//! 6. optionally `log10(max(power, eps))`
//!
//! The concatenated vector is then optionally standardized with a static
//! [`Standardizer`].

use crate::acquisition::types::RawWindow;
use crate::config::{DspConfig, FeatureStrategy};
use crate::core::error::PipelineError;
use crate::core::scaler::{ScalerError, Standardizer};
use rustfft::{num_complex::Complex, Fft, FftPlanner};
use std::sync::Arc;

/// Stateless extractor. Everything derived from the configuration is
/// computed once in [`FeatureExtractor::new`].
pub struct FeatureExtractor {
    channels: usize,
    window_samples: usize,
    strategy: FeatureStrategy,
    log_power: bool,
    log_epsilon: f64,
    normalize_epsilon: f64,
    bins_per_channel: usize,
    expected_len: Option<usize>,
    hann: Vec<f64>,
    fft: Arc<dyn Fft<f64>>,
    standardizer: Option<Standardizer>,
}

impl FeatureExtractor {
    /// Create an extractor for the given settings.
    pub fn new(dsp: &DspConfig) -> Self {
        let mut planner = FftPlanner::new();
        let fft = planner.plan_fft_forward(dsp.window_samples);

        Self {
            channels: dsp.channels,
            window_samples: dsp.window_samples,
            strategy: dsp.strategy,
            log_power: dsp.log_power,
            log_epsilon: dsp.log_epsilon,
            normalize_epsilon: dsp.normalize_epsilon,
            bins_per_channel: bins_up_to(dsp.sample_rate_hz, dsp.window_samples, dsp.cutoff_hz),
            expected_len: dsp.expected_features,
            hann: periodic_hann(dsp.window_samples),
            fft,
            standardizer: None,
        }
    }

    /// Attach a standardization asset. Its length must equal [`feature_len`](Self::feature_len).
    pub fn with_standardizer(mut self, standardizer: Standardizer) -> Result<Self, ScalerError> {
        if standardizer.len() != self.feature_len() {
            return Err(ScalerError::WrongLength {
                expected: self.feature_len(),
                actual: standardizer.len(),
            });
        }
        self.standardizer = Some(standardizer);
        Ok(self)
    }

    /// Kept FFT bins per channel.
    pub fn bins_per_channel(&self) -> usize {
        self.bins_per_channel
    }

    /// Length of every feature vector this extractor produces.
    pub fn feature_len(&self) -> usize {
        match self.strategy {
            FeatureStrategy::Spectral => self.channels * self.bins_per_channel,
            FeatureStrategy::ChannelMean => self.channels,
        }
    }

    /// Samples per channel one window needs.
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Compute the feature vector for a window.
    pub fn extract(&self, window: &RawWindow) -> Result<Vec<f64>, PipelineError> {
        if window.channel_count() != self.channels {
            return Err(PipelineError::Shape(format!(
                "expected {} channels, got {}",
                self.channels,
                window.channel_count()
            )));
        }
        if window.len() < self.window_samples {
            return Err(PipelineError::InsufficientData {
                got: window.len(),
                need: self.window_samples,
            });
        }

        let start = window.len() - self.window_samples;
        let mut features = Vec::with_capacity(self.feature_len());
        for channel in window.channels() {
            let samples = &channel[start..];
            match self.strategy {
                FeatureStrategy::Spectral => self.channel_spectrum(samples, &mut features),
                FeatureStrategy::ChannelMean => features.push(mean(samples)),
            }
        }

        if let Some(expected) = self.expected_len {
            if features.len() != expected {
                return Err(PipelineError::Length {
                    expected,
                    actual: features.len(),
                });
            }
        }

        if let Some(ref scaler) = self.standardizer {
            scaler.apply(&mut features);
        }

        Ok(features)
    }

    fn channel_spectrum(&self, samples: &[f64], out: &mut Vec<f64>) {
        let mu = mean(samples);
        let sigma = std_dev(samples, mu);
        let scale = if sigma > self.normalize_epsilon {
            1.0 / sigma
        } else {
            1.0
        };

        let mut buffer: Vec<Complex<f64>> = samples
            .iter()
            .zip(&self.hann)
            .map(|(&s, &w)| Complex::new((s - mu) * scale * w, 0.0))
            .collect();
        self.fft.process(&mut buffer);

        out.extend(buffer[..self.bins_per_channel].iter().map(|c| {
            let power = c.norm_sqr();
            if self.log_power {
                power.max(self.log_epsilon).log10()
            } else {
                power
            }
        }));
    }
}

/// Number of bins `k` in `0..=n/2` with `k·fs/n <= cutoff`.
pub fn bins_up_to(sample_rate_hz: f64, n: usize, cutoff_hz: f64) -> usize {
    if n == 0 {
        return 0;
    }
    let resolution = sample_rate_hz / n as f64;
    (0..=n / 2)
        .take_while(|&k| k as f64 * resolution <= cutoff_hz)
        .count()
}

/// Periodic Hann window: `w[n] = 0.5 - 0.5·cos(2πn/N)`.
pub fn periodic_hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation around a known mean.
fn std_dev(values: &[f64], mean: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sine_window(channels: usize, n: usize, freq_hz: f64, fs: f64) -> RawWindow {
        let data = (0..channels)
            .map(|c| {
                (0..n)
                    .map(|i| {
                        let t = i as f64 / fs;
                        (c as f64 + 1.0) * (2.0 * std::f64::consts::PI * freq_hz * t).sin()
                    })
                    .collect()
            })
            .collect();
        RawWindow::from_channels(data).unwrap()
    }

    #[test]
    fn test_bin_count_default_settings() {
        assert_eq!(bins_up_to(256.0, 512, 66.0), 133);
        let extractor = FeatureExtractor::new(&DspConfig::default());
        assert_eq!(extractor.bins_per_channel(), 133);
        assert_eq!(extractor.feature_len(), 532);
    }

    #[test]
    fn test_bin_count_caps_at_nyquist() {
        assert_eq!(bins_up_to(256.0, 512, 1000.0), 257);
        assert_eq!(bins_up_to(256.0, 512, 0.0), 1);
    }

    #[test]
    fn test_periodic_hann() {
        let w = periodic_hann(4);
        assert!((w[0] - 0.0).abs() < 1e-12);
        assert!((w[1] - 0.5).abs() < 1e-12);
        assert!((w[2] - 1.0).abs() < 1e-12);
        assert!((w[3] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_extract_length_and_determinism() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = sine_window(4, 512, 10.0, 256.0);

        let a = extractor.extract(&window).unwrap();
        let b = extractor.extract(&window).unwrap();
        assert_eq!(a.len(), 532);
        assert_eq!(
            a.iter().map(|v| v.to_bits()).collect::<Vec<_>>(),
            b.iter().map(|v| v.to_bits()).collect::<Vec<_>>()
        );
    }

    #[test]
    fn test_peak_at_signal_frequency() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = sine_window(4, 512, 10.0, 256.0);
        let features = extractor.extract(&window).unwrap();

        // 10 Hz at 0.5 Hz resolution is bin 20
        let ch0 = &features[..133];
        let peak = ch0
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, &v)| if v > acc.1 { (i, v) } else { acc })
            .0;
        assert_eq!(peak, 20);
    }

    #[test]
    fn test_all_zero_window_is_log_epsilon() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = RawWindow::from_channels(vec![vec![0.0; 512]; 4]).unwrap();
        let features = extractor.extract(&window).unwrap();
        assert!(features.iter().all(|&v| v == 1e-12f64.log10()));
    }

    #[test]
    fn test_constant_channel_is_finite() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = RawWindow::from_channels(vec![vec![812.5; 512]; 4]).unwrap();
        let features = extractor.extract(&window).unwrap();
        assert!(features.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_scale_invariance_after_normalization() {
        let window = sine_window(1, 512, 7.0, 256.0);
        let scaled = RawWindow::from_channels(vec![window
            .channel(0)
            .unwrap()
            .iter()
            .map(|v| v * 40.0 + 3.0)
            .collect()])
        .unwrap();

        let dsp = DspConfig {
            channels: 1,
            ..DspConfig::default()
        };
        let extractor = FeatureExtractor::new(&dsp);
        let a = extractor.extract(&window).unwrap();
        let b = extractor.extract(&scaled).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-6);
        }
    }

    #[test]
    fn test_uses_most_recent_samples() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let recent = sine_window(4, 512, 12.0, 256.0);
        let longer = RawWindow::from_channels(
            recent
                .channels()
                .map(|ch| {
                    let mut v = vec![5000.0; 100];
                    v.extend_from_slice(ch);
                    v
                })
                .collect(),
        )
        .unwrap();

        assert_eq!(
            extractor.extract(&recent).unwrap(),
            extractor.extract(&longer).unwrap()
        );
    }

    #[test]
    fn test_wrong_channel_count_is_shape_error() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = RawWindow::from_channels(vec![vec![0.0; 512]; 3]).unwrap();
        assert!(matches!(
            extractor.extract(&window),
            Err(PipelineError::Shape(_))
        ));
    }

    #[test]
    fn test_short_window_is_insufficient() {
        let extractor = FeatureExtractor::new(&DspConfig::default());
        let window = RawWindow::from_channels(vec![vec![0.0; 400]; 4]).unwrap();
        assert_eq!(
            extractor.extract(&window),
            Err(PipelineError::InsufficientData { got: 400, need: 512 })
        );
    }

    #[test]
    fn test_expected_feature_count_enforced() {
        let dsp = DspConfig {
            strategy: FeatureStrategy::ChannelMean,
            channels: 2,
            window_samples: 2,
            expected_features: Some(5),
            ..DspConfig::default()
        };
        let window = RawWindow::from_channels(vec![vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap();
        assert_eq!(
            FeatureExtractor::new(&dsp).extract(&window),
            Err(PipelineError::Length {
                expected: 5,
                actual: 2
            })
        );

        let dsp = DspConfig {
            expected_features: Some(2),
            ..dsp
        };
        assert_eq!(
            FeatureExtractor::new(&dsp).extract(&window).unwrap(),
            vec![1.0, 2.0]
        );
    }

    #[test]
    fn test_channel_mean_strategy() {
        let dsp = DspConfig {
            strategy: FeatureStrategy::ChannelMean,
            channels: 2,
            window_samples: 4,
            ..DspConfig::default()
        };
        let extractor = FeatureExtractor::new(&dsp);
        let window =
            RawWindow::from_channels(vec![vec![1.0, 2.0, 3.0, 4.0], vec![0.0, 0.0, 2.0, 2.0]])
                .unwrap();
        assert_eq!(extractor.feature_len(), 2);
        assert_eq!(extractor.extract(&window).unwrap(), vec![2.5, 1.0]);
    }

    #[test]
    fn test_standardizer_applied_and_length_checked() {
        let dsp = DspConfig {
            strategy: FeatureStrategy::ChannelMean,
            channels: 2,
            window_samples: 2,
            ..DspConfig::default()
        };
        let scaler = Standardizer::new(vec![1.0, 1.0], vec![2.0, 0.0]).unwrap();
        let extractor = FeatureExtractor::new(&dsp)
            .with_standardizer(scaler)
            .unwrap();
        let window = RawWindow::from_channels(vec![vec![3.0, 5.0], vec![2.0, 2.0]]).unwrap();
        assert_eq!(extractor.extract(&window).unwrap(), vec![1.5, 1.0]);

        let wrong = Standardizer::new(vec![0.0; 3], vec![1.0; 3]).unwrap();
        assert!(FeatureExtractor::new(&dsp).with_standardizer(wrong).is_err());
    }
}

//! Data types shared between acquisition sessions and the pipeline.

use crate::core::error::PipelineError;
use thiserror::Error;

/// A snapshot of the most recent samples, channel-major.
///
/// Every channel has the same length and every sample is finite. The last
/// sample of each channel is the most recent one.
#[derive(Debug, Clone, PartialEq)]
pub struct RawWindow {
    channels: Vec<Vec<f64>>,
}

impl RawWindow {
    /// Build a window from per-channel sample vectors.
    pub fn from_channels(channels: Vec<Vec<f64>>) -> Result<Self, PipelineError> {
        let len = channels.first().map(Vec::len).unwrap_or(0);
        for (idx, ch) in channels.iter().enumerate() {
            if ch.len() != len {
                return Err(PipelineError::Shape(format!(
                    "channel {idx} has {} samples, channel 0 has {len}",
                    ch.len()
                )));
            }
            if let Some(pos) = ch.iter().position(|v| !v.is_finite()) {
                return Err(PipelineError::Shape(format!(
                    "channel {idx} sample {pos} is not finite"
                )));
            }
        }
        Ok(Self { channels })
    }

    /// Build a window from a time-major interleaved vector
    /// `[ch0[0], ch1[0], .., chC[0], ch0[1], ..]`.
    ///
    /// Trailing values that do not fill a whole frame are dropped.
    pub fn from_interleaved(values: &[f64], channel_count: usize) -> Result<Self, PipelineError> {
        if channel_count == 0 {
            return Err(PipelineError::Shape("channel count is zero".to_string()));
        }
        let frames = values.len() / channel_count;
        let mut channels = vec![Vec::with_capacity(frames); channel_count];
        for frame in values.chunks_exact(channel_count) {
            for (ch, &v) in channels.iter_mut().zip(frame) {
                ch.push(v);
            }
        }
        Self::from_channels(channels)
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// Samples per channel.
    pub fn len(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn channel(&self, idx: usize) -> Option<&[f64]> {
        self.channels.get(idx).map(Vec::as_slice)
    }

    pub fn channels(&self) -> impl Iterator<Item = &[f64]> {
        self.channels.iter().map(Vec::as_slice)
    }
}

/// Summary statistics of one channel, used for debug dumps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std: f64,
}

impl ChannelStats {
    pub fn of(samples: &[f64]) -> Self {
        if samples.is_empty() {
            return Self {
                min: 0.0,
                max: 0.0,
                mean: 0.0,
                std: 0.0,
            };
        }
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let mean = samples.iter().sum::<f64>() / samples.len() as f64;
        let variance =
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / samples.len() as f64;
        Self {
            min,
            max,
            mean,
            std: variance.sqrt(),
        }
    }
}

/// Failure of the acquisition session. Ends the loop.
#[derive(Debug, Error)]
pub enum AcquisitionError {
    #[error("session is not prepared")]
    NotPrepared,

    #[error("session is already streaming")]
    AlreadyStreaming,

    #[error("session is not streaming")]
    NotStreaming,

    #[error("replay data exhausted after {0} samples")]
    Exhausted(usize),

    #[error("failed to read capture: {0}")]
    Capture(String),

    #[error("acquisition I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A headset session.
///
/// The loop only ever reads materialized snapshots through
/// [`latest_window`](AcquisitionSession::latest_window); implementations may
/// buffer on their own threads.
pub trait AcquisitionSession {
    /// Acquire the device.
    fn prepare(&mut self) -> Result<(), AcquisitionError>;

    /// Begin streaming into an internal buffer of roughly `buffer_hint` samples.
    fn start(&mut self, buffer_hint: usize) -> Result<(), AcquisitionError>;

    /// The most recent `samples` samples of every channel, or `None` if fewer
    /// have been collected so far.
    fn latest_window(&mut self, samples: usize) -> Result<Option<RawWindow>, AcquisitionError>;

    /// Stop streaming. Safe to call more than once.
    fn stop(&mut self) -> Result<(), AcquisitionError>;

    /// Release the device. Safe to call more than once.
    fn release(&mut self) -> Result<(), AcquisitionError>;

    fn sample_rate(&self) -> f64;

    fn channel_count(&self) -> usize;
}

impl<S: AcquisitionSession + ?Sized> AcquisitionSession for Box<S> {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        (**self).prepare()
    }

    fn start(&mut self, buffer_hint: usize) -> Result<(), AcquisitionError> {
        (**self).start(buffer_hint)
    }

    fn latest_window(&mut self, samples: usize) -> Result<Option<RawWindow>, AcquisitionError> {
        (**self).latest_window(samples)
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        (**self).stop()
    }

    fn release(&mut self) -> Result<(), AcquisitionError> {
        (**self).release()
    }

    fn sample_rate(&self) -> f64 {
        (**self).sample_rate()
    }

    fn channel_count(&self) -> usize {
        (**self).channel_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ragged_channels_rejected() {
        let err = RawWindow::from_channels(vec![vec![0.0; 4], vec![0.0; 3]]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }

    #[test]
    fn test_non_finite_rejected() {
        let err = RawWindow::from_channels(vec![vec![0.0, f64::NAN]]).unwrap_err();
        assert!(matches!(err, PipelineError::Shape(_)));
    }

    #[test]
    fn test_from_interleaved() {
        let values = [1.0, 10.0, 2.0, 20.0, 3.0, 30.0, 4.0];
        let window = RawWindow::from_interleaved(&values, 2).unwrap();
        assert_eq!(window.channel_count(), 2);
        assert_eq!(window.len(), 3);
        assert_eq!(window.channel(0).unwrap(), &[1.0, 2.0, 3.0]);
        assert_eq!(window.channel(1).unwrap(), &[10.0, 20.0, 30.0]);
    }

    #[test]
    fn test_channel_stats() {
        let stats = ChannelStats::of(&[1.0, 3.0]);
        assert_eq!(stats.min, 1.0);
        assert_eq!(stats.max, 3.0);
        assert_eq!(stats.mean, 2.0);
        assert_eq!(stats.std, 1.0);
    }
}

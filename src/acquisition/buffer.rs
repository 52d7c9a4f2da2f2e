//! Bounded per-channel sample ring used by the sessions.

use crate::acquisition::types::RawWindow;
use std::collections::VecDeque;

/// Keeps at most `capacity` of the most recent samples per channel.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    channels: Vec<VecDeque<f64>>,
    capacity: usize,
}

impl SampleBuffer {
    pub fn new(channel_count: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            channels: (0..channel_count)
                .map(|_| VecDeque::with_capacity(capacity))
                .collect(),
            capacity,
        }
    }

    /// Append one frame (one sample per channel). Extra values are ignored
    /// and missing channels are left untouched.
    pub fn push_frame(&mut self, frame: &[f64]) {
        for (ch, &v) in self.channels.iter_mut().zip(frame) {
            if ch.len() == self.capacity {
                ch.pop_front();
            }
            ch.push_back(v);
        }
    }

    /// Append a channel-major block.
    pub fn push_block(&mut self, block: &[Vec<f64>]) {
        let frames = block.iter().map(Vec::len).min().unwrap_or(0);
        for i in 0..frames {
            for (ch, samples) in self.channels.iter_mut().zip(block) {
                if ch.len() == self.capacity {
                    ch.pop_front();
                }
                ch.push_back(samples[i]);
            }
        }
    }

    /// Samples available in the shortest channel.
    pub fn available(&self) -> usize {
        self.channels.iter().map(VecDeque::len).min().unwrap_or(0)
    }

    /// Copy of the last `samples` samples of every channel, or `None` if
    /// fewer are buffered.
    pub fn latest(&self, samples: usize) -> Option<RawWindow> {
        if self.channels.is_empty() || self.available() < samples {
            return None;
        }
        let data = self
            .channels
            .iter()
            .map(|ch| ch.iter().skip(ch.len() - samples).copied().collect())
            .collect();
        RawWindow::from_channels(data).ok()
    }

    pub fn clear(&mut self) {
        for ch in &mut self.channels {
            ch.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latest_needs_enough_samples() {
        let mut buf = SampleBuffer::new(2, 10);
        buf.push_frame(&[1.0, 2.0]);
        assert!(buf.latest(2).is_none());
        buf.push_frame(&[3.0, 4.0]);
        let w = buf.latest(2).unwrap();
        assert_eq!(w.channel(0).unwrap(), &[1.0, 3.0]);
        assert_eq!(w.channel(1).unwrap(), &[2.0, 4.0]);
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let mut buf = SampleBuffer::new(1, 3);
        buf.push_block(&[vec![1.0, 2.0, 3.0, 4.0, 5.0]]);
        assert_eq!(buf.available(), 3);
        assert_eq!(buf.latest(3).unwrap().channel(0).unwrap(), &[3.0, 4.0, 5.0]);
        assert_eq!(buf.latest(1).unwrap().channel(0).unwrap(), &[5.0]);
    }
}

//! Replays a recorded capture in real time.
//!
//! The capture is a CSV with a header row `timestamp_s,eeg_1,..,eeg_C`. The
//! timestamp column is ignored; samples are released at the configured rate
//! from the moment the session starts. Running past the end of the recording
//! is an [`AcquisitionError::Exhausted`], which ends the loop.

use crate::acquisition::types::{AcquisitionError, AcquisitionSession, RawWindow};
use csv::ReaderBuilder;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info};

pub struct ReplaySession {
    path: PathBuf,
    sample_rate: f64,
    channels: usize,
    frames: Vec<Vec<f64>>,
    started: Option<Instant>,
    prepared: bool,
}

impl ReplaySession {
    pub fn new(path: impl Into<PathBuf>, sample_rate: f64, channels: usize) -> Self {
        Self {
            path: path.into(),
            sample_rate,
            channels,
            frames: Vec::new(),
            started: None,
            prepared: false,
        }
    }

    /// Number of frames loaded from the capture.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Window ending at frame `position` (exclusive).
    fn window_at(
        &self,
        position: usize,
        samples: usize,
    ) -> Result<Option<RawWindow>, AcquisitionError> {
        if position > self.frames.len() {
            return Err(AcquisitionError::Exhausted(self.frames.len()));
        }
        if position < samples {
            return Ok(None);
        }
        let mut data = vec![Vec::with_capacity(samples); self.channels];
        for frame in &self.frames[position - samples..position] {
            for (ch, &v) in data.iter_mut().zip(frame) {
                ch.push(v);
            }
        }
        RawWindow::from_channels(data)
            .map(Some)
            .map_err(|e| AcquisitionError::Capture(e.to_string()))
    }
}

/// Load `timestamp_s, eeg_1..eeg_C` rows, keeping the EEG columns.
pub fn load_capture(path: &Path, channels: usize) -> Result<Vec<Vec<f64>>, AcquisitionError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| AcquisitionError::Capture(format!("{}: {e}", path.display())))?;

    let mut frames = Vec::new();
    for (row_idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| AcquisitionError::Capture(e.to_string()))?;
        if record.len() < channels + 1 {
            return Err(AcquisitionError::Capture(format!(
                "row {} has {} columns, expected {}",
                row_idx + 1,
                record.len(),
                channels + 1
            )));
        }
        let frame = record
            .iter()
            .skip(1)
            .take(channels)
            .map(|field| {
                field.parse::<f64>().map_err(|e| {
                    AcquisitionError::Capture(format!("row {}: {field:?}: {e}", row_idx + 1))
                })
            })
            .collect::<Result<Vec<f64>, _>>()?;
        frames.push(frame);
    }
    Ok(frames)
}

impl AcquisitionSession for ReplaySession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        self.frames = load_capture(&self.path, self.channels)?;
        self.prepared = true;
        info!(
            path = %self.path.display(),
            frames = self.frames.len(),
            seconds = self.frames.len() as f64 / self.sample_rate,
            "Replay capture loaded"
        );
        Ok(())
    }

    fn start(&mut self, _buffer_hint: usize) -> Result<(), AcquisitionError> {
        if !self.prepared {
            return Err(AcquisitionError::NotPrepared);
        }
        if self.started.is_some() {
            return Err(AcquisitionError::AlreadyStreaming);
        }
        self.started = Some(Instant::now());
        Ok(())
    }

    fn latest_window(&mut self, samples: usize) -> Result<Option<RawWindow>, AcquisitionError> {
        let started = self.started.ok_or(AcquisitionError::NotStreaming)?;
        let position = (started.elapsed().as_secs_f64() * self.sample_rate) as usize;
        self.window_at(position, samples)
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        if self.started.take().is_some() {
            debug!("Replay stopped");
        }
        Ok(())
    }

    fn release(&mut self) -> Result<(), AcquisitionError> {
        self.stop()?;
        self.prepared = false;
        self.frames = Vec::new();
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_capture(name: &str, rows: usize) -> PathBuf {
        let path = std::env::temp_dir().join(name);
        let mut content = String::from("timestamp_s,eeg_1,eeg_2\n");
        for i in 0..rows {
            content.push_str(&format!("{:.4},{}.0,{}.5\n", i as f64 / 256.0, i, i));
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_load_capture() {
        let path = write_capture("eeg-blower-replay-load.csv", 3);
        let frames = load_capture(&path, 2).unwrap();
        assert_eq!(frames, vec![vec![0.0, 0.5], vec![1.0, 1.5], vec![2.0, 2.5]]);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_load_capture_rejects_short_rows() {
        let path = write_capture("eeg-blower-replay-short.csv", 2);
        assert!(load_capture(&path, 3).is_err());
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_window_positions() {
        let path = write_capture("eeg-blower-replay-window.csv", 10);
        let mut session = ReplaySession::new(&path, 256.0, 2);
        session.prepare().unwrap();
        assert_eq!(session.len(), 10);

        assert!(session.window_at(3, 4).unwrap().is_none());
        let w = session.window_at(6, 4).unwrap().unwrap();
        assert_eq!(w.channel(0).unwrap(), &[2.0, 3.0, 4.0, 5.0]);
        assert!(session.window_at(10, 4).unwrap().is_some());
        assert!(matches!(
            session.window_at(11, 4),
            Err(AcquisitionError::Exhausted(10))
        ));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn test_latest_window_requires_start() {
        let path = write_capture("eeg-blower-replay-start.csv", 2560);
        let mut session = ReplaySession::new(&path, 256.0, 2);
        session.prepare().unwrap();
        assert!(matches!(
            session.latest_window(2),
            Err(AcquisitionError::NotStreaming)
        ));
        session.start(0).unwrap();
        assert!(session.latest_window(2).is_ok());
        session.release().unwrap();
        session.release().unwrap();
        let _ = std::fs::remove_file(&path);
    }
}

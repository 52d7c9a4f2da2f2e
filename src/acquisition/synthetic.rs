//! Software headset.
//!
//! Generates multi-channel EEG-like signals on a background thread in real
//! time, so the whole loop can run without hardware. The mental state drifts
//! slowly between alpha-dominant, beta-dominant and delta-dominant phases.

use crate::acquisition::buffer::SampleBuffer;
use crate::acquisition::types::{AcquisitionError, AcquisitionSession, RawWindow};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::f64::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Seconds spent in each synthetic state before moving to the next.
const STATE_PERIOD_SECS: f64 = 20.0;

/// Deterministic signal source.
#[derive(Debug, Clone)]
pub struct SignalGenerator {
    sample_rate: f64,
    channels: usize,
    index: u64,
}

impl SignalGenerator {
    pub fn new(sample_rate: f64, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            index: 0,
        }
    }

    /// Next `samples` samples, channel-major.
    pub fn next_block(&mut self, samples: usize) -> Vec<Vec<f64>> {
        let mut block = vec![Vec::with_capacity(samples); self.channels];
        for _ in 0..samples {
            let t = self.index as f64 / self.sample_rate;
            let (alpha, beta, delta) = state_amplitudes(t);
            for (c, ch) in block.iter_mut().enumerate() {
                let phase = c as f64 * 0.7;
                let v = 800.0
                    + alpha * (2.0 * PI * 10.0 * t + phase).sin()
                    + beta * (2.0 * PI * 21.0 * t + 2.0 * phase).sin()
                    + delta * (2.0 * PI * 2.0 * t + phase).sin()
                    + 4.0 * (2.0 * PI * 50.0 * t).sin();
                ch.push(v);
            }
            self.index += 1;
        }
        block
    }
}

/// Smooth cross-fade between three states over time.
fn state_amplitudes(t: f64) -> (f64, f64, f64) {
    let cycle = (t / STATE_PERIOD_SECS) % 3.0;
    let weight = |centre: f64| {
        let d = (cycle - centre).abs().min(3.0 - (cycle - centre).abs());
        (1.0 - d).max(0.0)
    };
    (
        5.0 + 30.0 * weight(0.5),
        5.0 + 25.0 * weight(1.5),
        5.0 + 40.0 * weight(2.5),
    )
}

/// An [`AcquisitionSession`] backed by [`SignalGenerator`].
pub struct SyntheticSession {
    sample_rate: f64,
    channels: usize,
    chunk_samples: usize,
    prepared: bool,
    buffer: SampleBuffer,
    receiver: Option<Receiver<Vec<Vec<f64>>>>,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
}

impl SyntheticSession {
    pub fn new(sample_rate: f64, channels: usize) -> Self {
        Self {
            sample_rate,
            channels,
            chunk_samples: ((sample_rate / 16.0).round() as usize).max(1),
            prepared: false,
            buffer: SampleBuffer::new(channels, 1),
            receiver: None,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn drain(&mut self) {
        if let Some(ref rx) = self.receiver {
            for block in rx.try_iter() {
                self.buffer.push_block(&block);
            }
        }
    }
}

impl AcquisitionSession for SyntheticSession {
    fn prepare(&mut self) -> Result<(), AcquisitionError> {
        self.prepared = true;
        info!(
            sample_rate = self.sample_rate,
            channels = self.channels,
            "Synthetic headset prepared"
        );
        Ok(())
    }

    fn start(&mut self, buffer_hint: usize) -> Result<(), AcquisitionError> {
        if !self.prepared {
            return Err(AcquisitionError::NotPrepared);
        }
        if self.running.load(Ordering::SeqCst) {
            return Err(AcquisitionError::AlreadyStreaming);
        }

        self.buffer = SampleBuffer::new(self.channels, buffer_hint);
        let (sender, receiver) = bounded(64);
        self.receiver = Some(receiver);
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let generator = SignalGenerator::new(self.sample_rate, self.channels);
        let chunk = self.chunk_samples;
        let period = Duration::from_secs_f64(chunk as f64 / self.sample_rate);

        let handle = thread::spawn(move || {
            stream_loop(generator, sender, running.clone(), chunk, period);
            running.store(false, Ordering::SeqCst);
        });
        self.thread_handle = Some(handle);

        debug!(buffer_hint, chunk_samples = chunk, "Synthetic stream started");
        Ok(())
    }

    fn latest_window(&mut self, samples: usize) -> Result<Option<RawWindow>, AcquisitionError> {
        if self.receiver.is_none() {
            return Err(AcquisitionError::NotStreaming);
        }
        self.drain();
        Ok(self.buffer.latest(samples))
    }

    fn stop(&mut self) -> Result<(), AcquisitionError> {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread_handle.take() {
            let _ = handle.join();
            debug!("Synthetic stream stopped");
        }
        self.receiver = None;
        Ok(())
    }

    fn release(&mut self) -> Result<(), AcquisitionError> {
        self.stop()?;
        if self.prepared {
            self.prepared = false;
            self.buffer.clear();
            info!("Synthetic headset released");
        }
        Ok(())
    }

    fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    fn channel_count(&self) -> usize {
        self.channels
    }
}

impl Drop for SyntheticSession {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn stream_loop(
    mut generator: SignalGenerator,
    sender: Sender<Vec<Vec<f64>>>,
    running: Arc<AtomicBool>,
    chunk: usize,
    period: Duration,
) {
    let mut next = Instant::now();
    while running.load(Ordering::SeqCst) {
        let block = generator.next_block(chunk);
        match sender.try_send(block) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => warn!("Synthetic stream buffer full, dropping chunk"),
            Err(TrySendError::Disconnected(_)) => break,
        }

        next += period;
        let now = Instant::now();
        if next > now {
            thread::sleep(next - now);
        } else {
            next = now;
        }
    }
}

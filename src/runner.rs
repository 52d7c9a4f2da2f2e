//! The acquisition loop.
//!
//! One cooperative loop at a fixed stride. Each tick asks the session for the
//! latest window, runs it through the [`Pipeline`] and writes the resulting
//! command to the actuator link. A tick that has no window yet is skipped;
//! a tick whose pipeline fails is dropped; only acquisition failures end the
//! loop. However the loop ends, the session and the link are released.

use crate::acquisition::types::{AcquisitionError, AcquisitionSession, ChannelStats, RawWindow};
use crate::config::RunnerConfig;
use crate::core::classify::Classifier;
use crate::core::error::PipelineError;
use crate::pipeline::{Pipeline, TickReport};
use crate::stats::SharedSessionLog;
use crate::transport::Transport;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, trace, warn};

/// Longest single sleep while waiting, so shutdown is noticed promptly.
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// What happened on one tick.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    /// No complete window available yet
    Skipped,
    /// The pipeline failed; nothing was sent
    Dropped(PipelineError),
    /// A command was produced. `sent` is false when the link rejected it.
    Dispatched { report: TickReport, sent: bool },
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    Interrupted,
    MaxTicks,
}

pub struct Runner<S: AcquisitionSession, C: Classifier> {
    config: RunnerConfig,
    session: S,
    pipeline: Pipeline<C>,
    transport: Box<dyn Transport>,
    stats: SharedSessionLog,
    ticks: u64,
    windows_seen: u64,
    mismatch_reported: bool,
    released: bool,
}

impl<S: AcquisitionSession, C: Classifier> Runner<S, C> {
    pub fn new(
        config: RunnerConfig,
        session: S,
        pipeline: Pipeline<C>,
        transport: Box<dyn Transport>,
        stats: SharedSessionLog,
    ) -> Self {
        Self {
            config,
            session,
            pipeline,
            transport,
            stats,
            ticks: 0,
            windows_seen: 0,
            mismatch_reported: false,
            released: false,
        }
    }

    /// Ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Prepare the session, stream, and tick until interrupted, `max_ticks`
    /// is reached or acquisition fails. Always releases before returning.
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<StopReason, AcquisitionError> {
        let result = self.run_loop(shutdown);
        if let Err(ref e) = result {
            error!(error = %e, tick = self.ticks, "Acquisition failed, shutting down");
        }
        self.release();
        result
    }

    fn run_loop(&mut self, shutdown: &AtomicBool) -> Result<StopReason, AcquisitionError> {
        self.session.prepare()?;
        self.session.start(self.config.buffer_hint)?;
        info!(
            sample_rate = self.session.sample_rate(),
            channels = self.session.channel_count(),
            window_samples = self.pipeline.window_samples(),
            stride_ms = self.config.stride.as_millis() as u64,
            "Streaming started"
        );

        if !sleep_until(Instant::now() + self.config.warmup, shutdown) {
            return Ok(StopReason::Interrupted);
        }

        let mut next = Instant::now();
        loop {
            if shutdown.load(Ordering::SeqCst) {
                return Ok(StopReason::Interrupted);
            }
            if let Some(max) = self.config.max_ticks {
                if self.ticks >= max {
                    return Ok(StopReason::MaxTicks);
                }
            }

            self.tick_once()?;

            // Fixed rate; a late tick does not cause a burst of catch-up ticks
            next += self.config.stride;
            let now = Instant::now();
            if next <= now {
                next = now;
            } else if !sleep_until(next, shutdown) {
                return Ok(StopReason::Interrupted);
            }
        }
    }

    /// Run a single tick against a streaming session.
    pub fn tick_once(&mut self) -> Result<TickOutcome, AcquisitionError> {
        self.ticks += 1;
        self.stats.record_tick();
        let tick = self.ticks;

        let window = match self.session.latest_window(self.pipeline.window_samples())? {
            Some(window) => window,
            None => {
                trace!(tick, "Waiting for enough samples");
                self.stats.record_insufficient_data();
                return Ok(TickOutcome::Skipped);
            }
        };

        self.dump_window_stats(&window);

        let report = match self.pipeline.process_window(&window) {
            Ok(report) => report,
            Err(e) => return Ok(self.drop_tick(tick, e)),
        };
        self.stats.record_classified();

        let sent = match self.transport.send(report.command.value()) {
            Ok(()) => {
                self.stats.record_command_sent();
                true
            }
            Err(e) => {
                warn!(tick, command = report.command.value(), error = %e, "Actuator write failed, command dropped");
                self.stats.record_command_dropped();
                false
            }
        };

        info!(tick, command = report.command.value(), "{report}");
        Ok(TickOutcome::Dispatched { report, sent })
    }

    fn drop_tick(&mut self, tick: u64, e: PipelineError) -> TickOutcome {
        match e {
            PipelineError::InsufficientData { got, need } => {
                trace!(tick, got, need, "Window too short");
                self.stats.record_insufficient_data();
                return TickOutcome::Skipped;
            }
            PipelineError::FeatureLengthMismatch { expected, actual } => {
                if self.mismatch_reported {
                    debug!(tick, expected, actual, "Feature length mismatch");
                } else {
                    error!(
                        tick,
                        expected,
                        actual,
                        "Feature length does not match the classifier input; check the DSP settings against the trained model"
                    );
                    self.mismatch_reported = true;
                }
            }
            PipelineError::Shape(_) | PipelineError::Length { .. } => {
                warn!(tick, error = %e, "Invalid window, tick dropped");
            }
            PipelineError::Classifier(_) => {
                warn!(tick, error = %e, "Classifier failed, tick dropped");
            }
        }
        self.stats.record_tick_error();
        TickOutcome::Dropped(e)
    }

    fn dump_window_stats(&mut self, window: &RawWindow) {
        let idx = self.windows_seen;
        self.windows_seen += 1;
        if !dump_due(idx, &self.config) {
            return;
        }
        let names = self.pipeline.channel_names();
        for (ch, samples) in window.channels().enumerate() {
            let s = ChannelStats::of(samples);
            let name = names.get(ch).map(String::as_str).unwrap_or("?");
            debug!(
                window = idx,
                channel = name,
                min = s.min,
                max = s.max,
                mean = s.mean,
                std = s.std,
                "Raw window stats"
            );
        }
    }

    /// Close the link and release the session. Runs at most once.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;

        if let Err(e) = self.transport.close() {
            warn!(error = %e, "Failed to close actuator link");
        }
        if let Err(e) = self.session.stop() {
            warn!(error = %e, "Failed to stop stream");
        }
        if let Err(e) = self.session.release() {
            warn!(error = %e, "Failed to release session");
        }
        info!(ticks = self.ticks, "Session released");
    }
}

impl<S: AcquisitionSession, C: Classifier> Drop for Runner<S, C> {
    fn drop(&mut self) {
        self.release();
    }
}

/// Whether the window with this index gets a stats dump: every
/// `debug_every_n`-th window, among the first `debug_max_windows`.
fn dump_due(index: u64, config: &RunnerConfig) -> bool {
    index < config.debug_max_windows && index % config.debug_every_n.max(1) == 0
}

/// Sleep until `deadline` in short slices. Returns false if shutdown was
/// requested first.
fn sleep_until(deadline: Instant, shutdown: &AtomicBool) -> bool {
    loop {
        if shutdown.load(Ordering::SeqCst) {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        thread::sleep((deadline - now).min(SHUTDOWN_POLL));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dump_cadence() {
        let config = RunnerConfig {
            debug_max_windows: 40,
            debug_every_n: 10,
            ..RunnerConfig::default()
        };
        let dumped: Vec<u64> = (0..100).filter(|&i| dump_due(i, &config)).collect();
        assert_eq!(dumped, vec![0, 10, 20, 30]);
    }

    #[test]
    fn test_dump_cadence_edge_settings() {
        let every_window = RunnerConfig {
            debug_max_windows: 3,
            debug_every_n: 0,
            ..RunnerConfig::default()
        };
        let dumped: Vec<u64> = (0..10).filter(|&i| dump_due(i, &every_window)).collect();
        assert_eq!(dumped, vec![0, 1, 2]);

        let disabled = RunnerConfig {
            debug_max_windows: 0,
            ..RunnerConfig::default()
        };
        assert!(!(0..10).any(|i| dump_due(i, &disabled)));
    }

    #[test]
    fn test_sleep_until_past_deadline() {
        let flag = AtomicBool::new(false);
        assert!(sleep_until(Instant::now(), &flag));
    }

    #[test]
    fn test_sleep_until_interrupted() {
        let flag = AtomicBool::new(true);
        let start = Instant::now();
        assert!(!sleep_until(start + Duration::from_secs(5), &flag));
        assert!(start.elapsed() < Duration::from_secs(1));
    }
}

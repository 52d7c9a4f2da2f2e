//! Session statistics.
//!
//! Counts what happened to every tick so dropped ticks and fallback paths are
//! visible after a run. Counters are lock-free and can be persisted as JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// Counters for the current run.
#[derive(Debug)]
pub struct SessionLog {
    run_id: Uuid,
    /// Ticks started
    ticks: AtomicU64,
    /// Windows that produced a classification
    windows_classified: AtomicU64,
    /// Ticks skipped because the buffer was still filling
    insufficient_data: AtomicU64,
    /// Ticks dropped on shape, length or classifier errors
    tick_errors: AtomicU64,
    /// Commands written to the actuator link
    commands_sent: AtomicU64,
    /// Commands the actuator link rejected
    commands_dropped: AtomicU64,
    session_start: DateTime<Utc>,
    persist_path: Option<PathBuf>,
}

impl SessionLog {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            ticks: AtomicU64::new(0),
            windows_classified: AtomicU64::new(0),
            insufficient_data: AtomicU64::new(0),
            tick_errors: AtomicU64::new(0),
            commands_sent: AtomicU64::new(0),
            commands_dropped: AtomicU64::new(0),
            session_start: Utc::now(),
            persist_path: None,
        }
    }

    /// Create a log that accumulates into `path` across runs.
    pub fn with_persistence(path: PathBuf) -> Self {
        let mut log = Self::new();
        log.persist_path = Some(path);

        if let Err(e) = log.load() {
            tracing::warn!(error = %e, "Could not load previous session stats");
        }

        log
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_classified(&self) {
        self.windows_classified.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_insufficient_data(&self) {
        self.insufficient_data.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick_error(&self) {
        self.tick_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_sent(&self) {
        self.commands_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_command_dropped(&self) {
        self.commands_dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            run_id: self.run_id,
            ticks: self.ticks.load(Ordering::Relaxed),
            windows_classified: self.windows_classified.load(Ordering::Relaxed),
            insufficient_data: self.insufficient_data.load(Ordering::Relaxed),
            tick_errors: self.tick_errors.load(Ordering::Relaxed),
            commands_sent: self.commands_sent.load(Ordering::Relaxed),
            commands_dropped: self.commands_dropped.load(Ordering::Relaxed),
            session_start: self.session_start,
            session_duration_secs: (Utc::now() - self.session_start).num_seconds().max(0) as u64,
        }
    }

    /// Summary for the shutdown report.
    pub fn summary(&self) -> String {
        let stats = self.stats();
        format!(
            "Session Statistics ({}):\n\
             - Ticks: {}\n\
             - Windows classified: {}\n\
             - Skipped (buffer filling): {}\n\
             - Dropped (errors): {}\n\
             - Commands sent: {}\n\
             - Commands dropped: {}\n\
             - Session duration: {} seconds",
            stats.run_id,
            stats.ticks,
            stats.windows_classified,
            stats.insufficient_data,
            stats.tick_errors,
            stats.commands_sent,
            stats.commands_dropped,
            stats.session_duration_secs
        )
    }

    /// Write counters to the persistence path, if any.
    pub fn save(&self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            let stats = self.stats();
            let persisted = PersistedStats {
                last_run_id: stats.run_id,
                ticks: stats.ticks,
                windows_classified: stats.windows_classified,
                insufficient_data: stats.insufficient_data,
                tick_errors: stats.tick_errors,
                commands_sent: stats.commands_sent,
                commands_dropped: stats.commands_dropped,
                last_updated: Utc::now(),
            };

            let json = serde_json::to_string_pretty(&persisted).map_err(std::io::Error::other)?;
            std::fs::write(path, json)?;
        }
        Ok(())
    }

    fn load(&mut self) -> Result<(), std::io::Error> {
        if let Some(ref path) = self.persist_path {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let persisted: PersistedStats =
                    serde_json::from_str(&content).map_err(std::io::Error::other)?;

                self.ticks.store(persisted.ticks, Ordering::Relaxed);
                self.windows_classified
                    .store(persisted.windows_classified, Ordering::Relaxed);
                self.insufficient_data
                    .store(persisted.insufficient_data, Ordering::Relaxed);
                self.tick_errors
                    .store(persisted.tick_errors, Ordering::Relaxed);
                self.commands_sent
                    .store(persisted.commands_sent, Ordering::Relaxed);
                self.commands_dropped
                    .store(persisted.commands_dropped, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}

impl Default for SessionLog {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of session statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub run_id: Uuid,
    pub ticks: u64,
    pub windows_classified: u64,
    pub insufficient_data: u64,
    pub tick_errors: u64,
    pub commands_sent: u64,
    pub commands_dropped: u64,
    pub session_start: DateTime<Utc>,
    pub session_duration_secs: u64,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedStats {
    last_run_id: Uuid,
    ticks: u64,
    windows_classified: u64,
    insufficient_data: u64,
    tick_errors: u64,
    commands_sent: u64,
    commands_dropped: u64,
    last_updated: DateTime<Utc>,
}

/// Thread-safe handle to a session log.
pub type SharedSessionLog = Arc<SessionLog>;

pub fn create_shared_log() -> SharedSessionLog {
    Arc::new(SessionLog::new())
}

pub fn create_shared_log_with_persistence(path: PathBuf) -> SharedSessionLog {
    Arc::new(SessionLog::with_persistence(path))
}

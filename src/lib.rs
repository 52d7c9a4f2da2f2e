//! EEG Blower Agent - closed-loop EEG classification driving a blower.
//!
//! This library streams multi-channel EEG from a headset session, turns each
//! window of raw samples into log band-power features, classifies the window,
//! smooths the classification over time and drives an actuator with a bounded
//! integer command.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                        EEG Blower Agent                          │
//! ├──────────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │ Acquisition │──▶│  Spectral   │──▶│   Model     │            │
//! │  │  (session)  │   │  features   │   │  adapter    │            │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! │         ▲                                    │                   │
//! │         │                                    ▼                   │
//! │  ┌─────────────┐   ┌─────────────┐   ┌─────────────┐            │
//! │  │   Runner    │──▶│  Transport  │◀──│ Stabilizer  │            │
//! │  │ (fixed tick)│   │ (TCP/serial)│   │  + mapper   │            │
//! │  └─────────────┘   └─────────────┘   └─────────────┘            │
//! │         │                                                        │
//! │         ▼                                                        │
//! │  ┌─────────────┐                                                 │
//! │  │  Session    │                                                 │
//! │  │  stats      │                                                 │
//! │  └─────────────┘                                                 │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use eeg_blower_agent::{acquisition, config::Config, pipeline::Pipeline, runner, stats, transport};
//! use std::sync::atomic::AtomicBool;
//!
//! let config = Config::default();
//! let pipeline = Pipeline::from_config(&config).expect("model asset");
//! let session = acquisition::SyntheticSession::new(config.dsp.sample_rate_hz, config.dsp.channels);
//! let link = transport::open_transport(&config.transport);
//!
//! let mut runner = runner::Runner::new(
//!     config.runner.clone(),
//!     session,
//!     pipeline,
//!     link,
//!     stats::create_shared_log(),
//! );
//! let shutdown = AtomicBool::new(false);
//! runner.run(&shutdown).expect("acquisition failed");
//! ```

pub mod acquisition;
pub mod config;
pub mod core;
pub mod offline;
pub mod pipeline;
pub mod runner;
pub mod stats;
pub mod transport;

// Re-export key types at crate root for convenience
pub use acquisition::{AcquisitionError, AcquisitionSession, RawWindow};
pub use config::{Config, ConfigError, DEFAULT_LOG_EPSILON};
pub use core::{
    ActuatorCommand, ActuatorMap, ClassProbabilities, Classifier, FeatureExtractor,
    PipelineError, StabilizedDecision, Stabilizer,
};
pub use pipeline::{Pipeline, SetupError, TickReport};
pub use runner::{Runner, StopReason, TickOutcome};
pub use stats::{SessionLog, SessionStats, SharedSessionLog};
pub use transport::{Transport, TransportError};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Headset acquisition for the EEG blower agent.
//!
//! A session owns the device lifecycle and hands out snapshots of the most
//! recent samples. Two sessions are provided: a synthetic software headset
//! and a real-time replay of a recorded capture.

pub mod buffer;
pub mod replay;
pub mod synthetic;
pub mod types;

// Re-export commonly used types
pub use buffer::SampleBuffer;
pub use replay::ReplaySession;
pub use synthetic::{SignalGenerator, SyntheticSession};
pub use types::{AcquisitionError, AcquisitionSession, ChannelStats, RawWindow};

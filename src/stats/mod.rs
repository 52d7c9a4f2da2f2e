//! Session statistics for the EEG blower agent.

pub mod log;

// Re-export commonly used types
pub use log::{
    create_shared_log, create_shared_log_with_persistence, SessionLog, SessionStats,
    SharedSessionLog,
};

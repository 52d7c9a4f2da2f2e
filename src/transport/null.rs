//! Log-only sink used when no link is available.

use crate::transport::{Transport, TransportError};
use tracing::debug;

#[derive(Debug, Default)]
pub struct NullTransport {
    sent: u64,
}

impl NullTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands accepted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }
}

impl Transport for NullTransport {
    fn describe(&self) -> String {
        "log only".to_string()
    }

    fn send(&mut self, command: u16) -> Result<(), TransportError> {
        self.sent += 1;
        debug!(command, "Actuator command (no active link)");
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

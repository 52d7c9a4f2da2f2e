//! Actuator links.
//!
//! Every link speaks the same line protocol: the command as ASCII decimal
//! followed by `\n`. A network host takes precedence over a serial port. When
//! output is disabled or the link cannot be opened, commands go to a
//! log-only sink and the loop keeps running.

pub mod null;
pub mod serial;
pub mod tcp;

pub use null::NullTransport;
pub use serial::SerialTransport;
pub use tcp::TcpTransport;

use crate::config::TransportConfig;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("failed to resolve {0}")]
    Resolve(String),

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("link is closed")]
    Closed,
}

/// A destination for actuator commands.
pub trait Transport: Send {
    /// Short description for logs, e.g. `tcp 10.0.0.7:9000`.
    fn describe(&self) -> String;

    /// Send one command.
    fn send(&mut self, command: u16) -> Result<(), TransportError>;

    /// Close the link. Safe to call more than once.
    fn close(&mut self) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn send(&mut self, command: u16) -> Result<(), TransportError> {
        (**self).send(command)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// Wire form of a command.
pub fn frame_command(command: u16) -> String {
    format!("{command}\n")
}

/// Open the configured link, degrading to [`NullTransport`] on failure.
pub fn open_transport(config: &TransportConfig) -> Box<dyn Transport> {
    if !config.enabled {
        info!("Actuator output disabled");
        return Box::new(NullTransport::new());
    }

    if let Some(ref host) = config.wifi_host {
        match TcpTransport::connect(host, config.wifi_port, config.connect_timeout) {
            Ok(link) => {
                info!(link = %link.describe(), "Actuator link open");
                return Box::new(link);
            }
            Err(e) => {
                warn!(host = %host, port = config.wifi_port, error = %e, "Could not open network link, continuing without output");
                return Box::new(NullTransport::new());
            }
        }
    }

    if let Some(ref port) = config.serial_port {
        match SerialTransport::open(port, config.serial_baud) {
            Ok(link) => {
                info!(link = %link.describe(), "Actuator link open");
                return Box::new(link);
            }
            Err(e) => {
                warn!(port = %port, error = %e, "Could not open serial port, continuing without output");
                return Box::new(NullTransport::new());
            }
        }
    }

    info!("No actuator link configured");
    Box::new(NullTransport::new())
}

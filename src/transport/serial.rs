//! Serial link to the actuator controller.

use crate::transport::{frame_command, Transport, TransportError};
use std::io::Write;
use std::time::Duration;
use tracing::debug;

pub struct SerialTransport {
    port_name: String,
    baud_rate: u32,
    port: Option<Box<dyn serialport::SerialPort>>,
}

impl SerialTransport {
    /// Open `port_name` at a fixed baud rate.
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self, TransportError> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_secs(1))
            .open()?;

        Ok(Self {
            port_name: port_name.to_string(),
            baud_rate,
            port: Some(port),
        })
    }

    /// List available serial ports.
    pub fn list_ports() -> Vec<String> {
        serialport::available_ports()
            .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
            .unwrap_or_default()
    }
}

impl Transport for SerialTransport {
    fn describe(&self) -> String {
        format!("serial {} @ {} baud", self.port_name, self.baud_rate)
    }

    fn send(&mut self, command: u16) -> Result<(), TransportError> {
        let port = self.port.as_mut().ok_or(TransportError::Closed)?;
        port.write_all(frame_command(command).as_bytes())?;
        port.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if self.port.take().is_some() {
            debug!(port = %self.port_name, "Serial link closed");
        }
        Ok(())
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

//! Network link to the actuator controller.

use crate::transport::{frame_command, Transport, TransportError};
use std::io::Write;
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::debug;

pub struct TcpTransport {
    addr: String,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    /// Connect to `host:port`, trying each resolved address in turn.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TransportError> {
        let addr = format!("{host}:{port}");
        let candidates = (host, port)
            .to_socket_addrs()
            .map_err(|_| TransportError::Resolve(addr.clone()))?;

        let mut last_err = None;
        for candidate in candidates {
            match TcpStream::connect_timeout(&candidate, timeout) {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(timeout))?;
                    return Ok(Self {
                        addr,
                        stream: Some(stream),
                    });
                }
                Err(e) => last_err = Some(e),
            }
        }

        match last_err {
            Some(source) => Err(TransportError::Connect { addr, source }),
            None => Err(TransportError::Resolve(addr)),
        }
    }
}

impl Transport for TcpTransport {
    fn describe(&self) -> String {
        format!("tcp {}", self.addr)
    }

    fn send(&mut self, command: u16) -> Result<(), TransportError> {
        let stream = self.stream.as_mut().ok_or(TransportError::Closed)?;
        stream.write_all(frame_command(command).as_bytes())?;
        stream.flush()?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            debug!(addr = %self.addr, "Network link closed");
        }
        Ok(())
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        let _ = self.close();
    }
}

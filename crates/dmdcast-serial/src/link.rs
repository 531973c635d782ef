use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::SerialPort;

use crate::protocol::HANDSHAKE_LEN;
use crate::PanelError;

/// Handshake read timeout.
const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Per-frame write timeout.
const WRITE_TIMEOUT: Duration = Duration::from_millis(100);

/// The I/O seam between the transmit worker and the raw serial port.
///
/// `write_frame` reports how many bytes went out within the write timeout;
/// zero means the panel did not accept data in time and counts as a
/// transient failure, a hard error tears the worker down.
pub trait SerialLink: Send {
    /// Write one encoded frame, returning the bytes accepted. `Ok(0)`
    /// means the write timed out.
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize>;

    /// Blocking handshake read, returning the bytes received within the
    /// read timeout.
    fn read_handshake(&mut self, buf: &mut [u8; HANDSHAKE_LEN]) -> io::Result<usize>;

    fn set_dtr(&mut self, level: bool) -> io::Result<()>;

    fn set_rts(&mut self, level: bool) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;
}

/// [`SerialLink`] over a real port.
pub struct PortLink {
    port: Box<dyn SerialPort>,
}

/// Open a device at the panel's fixed line settings (115200 8N1, no flow
/// control).
pub fn open_port(device: &str) -> Result<PortLink, PanelError> {
    let port = serialport::new(device, 115_200)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_TIMEOUT)
        .open()?;
    Ok(PortLink { port })
}

/// Names of all serial devices present, for the scan path.
pub fn available_devices() -> Vec<String> {
    match serialport::available_ports() {
        Ok(ports) => ports.into_iter().map(|p| p.port_name).collect(),
        Err(e) => {
            tracing::warn!("serial port enumeration failed: {e}");
            Vec::new()
        }
    }
}

impl SerialLink for PortLink {
    fn write_frame(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.port.set_timeout(WRITE_TIMEOUT).ok();
        match self.port.write(frame) {
            Ok(n) => {
                // Push the rest through under the same timeout; a stall
                // mid-frame reads as no response.
                let mut written = n;
                while written < frame.len() {
                    match self.port.write(&frame[written..]) {
                        Ok(0) => return Ok(0),
                        Ok(n) => written += n,
                        Err(e) if e.kind() == io::ErrorKind::TimedOut => return Ok(0),
                        Err(e) => return Err(e),
                    }
                }
                Ok(written)
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(e),
        }
    }

    fn read_handshake(&mut self, buf: &mut [u8; HANDSHAKE_LEN]) -> io::Result<usize> {
        self.port.set_timeout(READ_TIMEOUT).ok();
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
                Err(e) => return Err(e),
            }
        }
        Ok(filled)
    }

    fn set_dtr(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_data_terminal_ready(level)
            .map_err(io::Error::other)
    }

    fn set_rts(&mut self, level: bool) -> io::Result<()> {
        self.port
            .write_request_to_send(level)
            .map_err(io::Error::other)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }
}

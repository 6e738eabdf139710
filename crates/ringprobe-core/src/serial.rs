//! Serial-port adapters for the control and data lines.

use std::io::{ErrorKind, Read, Write};
use std::time::{Duration, Instant};

use ringprobe_link::{DataChannel, LineChannel, LinkError};
use serialport::{ClearBuffer, FlowControl, SerialPort};
use tracing::{debug, trace};

/// Upper bound on one blocking read so deadlines stay responsive.
const POLL: Duration = Duration::from_millis(50);

fn open(path: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, LinkError> {
    let port = serialport::new(path, baud_rate)
        .timeout(POLL)
        .flow_control(FlowControl::None)
        .open()
        .map_err(|err| LinkError::TransportOpen {
            port: path.to_string(),
            reason: err.to_string(),
        })?;
    // Stale boot output would otherwise be read as a reply.
    port.clear(ClearBuffer::All).map_err(|err| LinkError::TransportOpen {
        port: path.to_string(),
        reason: err.to_string(),
    })?;
    debug!(port = path, baud_rate, "serial port opened");
    Ok(port)
}

/// Newline-delimited command console.
pub struct SerialLine {
    port: Box<dyn SerialPort>,
    pending: Vec<u8>,
}

impl SerialLine {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        Ok(Self {
            port: open(path, baud_rate)?,
            pending: Vec::new(),
        })
    }

    fn take_line(&mut self) -> Option<String> {
        let end = self.pending.iter().position(|&b| b == b'\n')?;
        let raw: Vec<u8> = self.pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        Some(line.trim_end_matches('\r').to_string())
    }
}

impl LineChannel for SerialLine {
    fn write_line(&mut self, line: &str) -> Result<(), LinkError> {
        self.port.write_all(line.as_bytes())?;
        self.port.write_all(b"\n")?;
        self.port.flush()?;
        Ok(())
    }

    fn read_line(&mut self, timeout: Duration) -> Result<Option<String>, LinkError> {
        let deadline = Instant::now() + timeout;
        let mut buf = [0u8; 512];
        loop {
            if let Some(line) = self.take_line() {
                trace!(line = %line, "control rx");
                return Ok(Some(line));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            self.port
                .set_timeout((deadline - now).min(POLL))
                .map_err(|err| LinkError::Io(err.into()))?;
            match self.port.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => self.pending.extend_from_slice(&buf[..n]),
                Err(err) if err.kind() == ErrorKind::TimedOut => {}
                Err(err) => return Err(err.into()),
            }
        }
    }
}

/// Raw byte line into the device's capture UART.
pub struct SerialData {
    path: String,
    port: Option<Box<dyn SerialPort>>,
    baud_rate: u32,
    opened: Instant,
}

impl SerialData {
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, LinkError> {
        Ok(Self {
            path: path.to_string(),
            port: Some(open(path, baud_rate)?),
            baud_rate,
            opened: Instant::now(),
        })
    }

    fn port(&mut self) -> Result<&mut Box<dyn SerialPort>, LinkError> {
        self.port.as_mut().ok_or(LinkError::Closed("data"))
    }
}

impl DataChannel for SerialData {
    fn inject(&mut self, bytes: &[u8]) -> Result<(), LinkError> {
        // Writes block for the whole transmission; allow for it plus slack.
        let line_time = Duration::from_secs_f64(bytes.len() as f64 * 10.0 / f64::from(self.baud_rate));
        let port = self.port()?;
        port.set_timeout(line_time + Duration::from_secs(1))
            .map_err(|err| LinkError::Io(err.into()))?;
        port.write_all(bytes)?;
        Ok(())
    }

    fn flush(&mut self) -> Result<(), LinkError> {
        self.port()?.flush()?;
        Ok(())
    }

    fn reopen(&mut self, baud_rate: u32) -> Result<(), LinkError> {
        // The OS handle must be released before the device node can be reopened.
        self.port = None;
        self.port = Some(open(&self.path, baud_rate)?);
        self.baud_rate = baud_rate;
        Ok(())
    }

    fn baud_rate(&self) -> u32 {
        self.baud_rate
    }

    fn line_clock(&self) -> Duration {
        self.opened.elapsed()
    }
}

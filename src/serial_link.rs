//! Blocking byte I/O on the peripherals' character device.

use std::fs;
use std::io::{Read, Write};
use std::os::unix::fs::FileTypeExt;
use std::time::{Duration, Instant};

use serialport::{DataBits, FlowControl, Parity, StopBits, TTYPort};

use crate::error::{Error, Result};
use crate::protocol::framer::ByteSource;

/// 8 data bits, no parity, two stop bits, no flow control — the framing
/// the vendor's SSP transport is specified over.
pub const BAUD_RATE: u32 = 9_600;

pub struct SerialLink {
    port: TTYPort,
}

impl SerialLink {
    /// Opens `path` as the SSP transport. Fails with `NotADevice` before
    /// ever touching the serial layer if `path` isn't a character-special
    /// file.
    pub fn open(path: &str) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        if !metadata.file_type().is_char_device() {
            return Err(Error::NotADevice(path.to_string()));
        }

        let port = serialport::new(path, BAUD_RATE)
            .flow_control(FlowControl::None)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::Two)
            .timeout(Duration::from_millis(50))
            .open_native()?;

        Ok(Self { port })
    }

    /// Writes `bytes` in full.
    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        self.port.write_all(bytes)?;
        Ok(())
    }

    /// Reads exactly `n` bytes, or fails with `Timeout` once `deadline`
    /// passes without enough data having arrived. Returns fewer bytes than
    /// requested only in the timeout case, by way of the error.
    pub fn read(&mut self, n: usize, deadline: Instant) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; n];
        let mut filled = 0;
        while filled < n {
            if Instant::now() >= deadline {
                return Err(Error::Timeout);
            }
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(Error::Timeout),
                Ok(read) => filled += read,
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(buf)
    }

    fn read_one(&mut self, deadline: Instant) -> Result<u8> {
        Ok(self.read(1, deadline)?[0])
    }
}

impl ByteSource for SerialLink {
    fn read_byte(&mut self, deadline: Instant) -> Result<u8> {
        self.read_one(deadline)
    }
}

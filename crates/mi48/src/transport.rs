//! Byte transport and USB port discovery.
//!
//! The driver only needs a blocking byte stream; [`SerialTransport`] provides
//! one over a USB-CDC serial port, [`MemoryTransport`] over in-memory buffers.

use crate::catalog;
use crate::error::DeviceError;
use serialport::{SerialPort, SerialPortType};
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Blocking, byte-oriented connection to the sensor.
pub trait ByteStream: Send {
    /// Write all bytes.
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Fill `buf` completely, blocking until enough bytes arrive.
    /// A closed stream is reported as [`io::ErrorKind::UnexpectedEof`].
    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()>;
}

impl<T: ByteStream + ?Sized> ByteStream for Box<T> {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        (**self).write_all(data)
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        (**self).read_exact(buf)
    }
}

/// Serial transport for the sensor's USB-CDC interface.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    path: String,
}

impl SerialTransport {
    /// Open a serial port (e.g., "/dev/ttyACM0").
    ///
    /// The line settings are irrelevant for USB-CDC; `read_timeout` only sets
    /// how often a blocked read wakes up, expiry is retried.
    pub fn open(path: &str, read_timeout: Duration) -> Result<Self, DeviceError> {
        let port = serialport::new(path, 115_200)
            .timeout(read_timeout)
            .open()?;

        tracing::info!(port = path, "opened serial port");

        Ok(Self {
            port,
            path: path.to_string(),
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl ByteStream for SerialTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, data)?;
        self.port.flush()
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.port.read(&mut buf[filled..]) {
                Ok(0) => return Err(io::ErrorKind::UnexpectedEof.into()),
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::TimedOut => continue,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }
}

/// In-memory transport: reads drain an injected buffer, writes are recorded.
///
/// Clones share the same buffers. A read that cannot be satisfied from the
/// buffer fails with `UnexpectedEof`, which is how end of stream looks to the
/// driver.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Default)]
struct MemoryInner {
    read_buffer: VecDeque<u8>,
    write_buffer: Vec<u8>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the driver to read.
    pub fn inject_read(&self, data: &[u8]) {
        self.lock().read_buffer.extend(data);
    }

    /// Everything the driver has written so far.
    pub fn written(&self) -> Vec<u8> {
        self.lock().write_buffer.clone()
    }

    /// Bytes still waiting to be read.
    pub fn pending(&self) -> usize {
        self.lock().read_buffer.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        // A panic while holding this lock can only come from a test thread.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ByteStream for MemoryTransport {
    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.lock().write_buffer.extend_from_slice(data);
        Ok(())
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        let n = buf.len();
        let mut inner = self.lock();
        if inner.read_buffer.len() < n {
            inner.read_buffer.clear();
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        for (dst, src) in buf.iter_mut().zip(inner.read_buffer.drain(..n)) {
            *dst = src;
        }
        Ok(())
    }
}

/// A serial port that might be an MI48.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortCandidate {
    pub vendor_id: u16,
    pub product_id: u16,
    pub port_name: String,
}

/// Source of candidate ports.
pub trait DeviceDiscovery {
    fn list_candidates(&self) -> Result<Vec<PortCandidate>, DeviceError>;
}

/// Enumerates the host's USB serial ports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemDiscovery;

impl DeviceDiscovery for SystemDiscovery {
    fn list_candidates(&self) -> Result<Vec<PortCandidate>, DeviceError> {
        let ports = serialport::available_ports()?;
        Ok(ports
            .into_iter()
            .filter_map(|p| match p.port_type {
                SerialPortType::UsbPort(usb) => Some(PortCandidate {
                    vendor_id: usb.vid,
                    product_id: usb.pid,
                    port_name: p.port_name,
                }),
                _ => None,
            })
            .collect())
    }
}

/// First candidate whose USB IDs belong to an MI48 module.
pub fn find_port(discovery: &dyn DeviceDiscovery) -> Result<String, DeviceError> {
    let candidates = discovery.list_candidates()?;
    tracing::debug!(count = candidates.len(), "enumerated USB serial ports");

    candidates
        .into_iter()
        .find(|c| catalog::is_known_usb_id(c.vendor_id, c.product_id))
        .map(|c| c.port_name)
        .ok_or(DeviceError::DeviceNotFound)
}

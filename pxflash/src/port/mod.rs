//! Byte channel abstraction for talking to the bootloader.
//!
//! The protocol layer never touches a serial port directly. It works on any
//! type implementing [`Port`], and the port locator obtains ports through a
//! [`PortOpener`]. This keeps the protocol driver testable against in-memory
//! fakes:
//!
//! ```text
//! +--------------------+
//! |  upload / locate   |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+
//! |  protocol (sync,   |
//! |  identify, chunk)  |
//! +---------+----------+
//!           |
//!           v
//! +---------+----------+     +------------------+
//! |     Port trait     +---->+ NativePort       |
//! +--------------------+     | (serialport)     |
//!                            +------------------+
//! ```

#[cfg(feature = "native")]
pub mod native;

#[cfg(test)]
pub(crate) mod mock;

use std::io::{Read, Write};
use std::time::Duration;

use crate::error::Result;

/// Default baud rate of the PX4 bootloader on a UART.
///
/// USB CDC links ignore the rate entirely.
pub const DEFAULT_BAUD: u32 = 115_200;

/// Default per-call read timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Serial port configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Port name/path (e.g., "/dev/ttyACM0", "COM3").
    pub port_name: String,
    /// Baud rate.
    pub baud_rate: u32,
    /// Read timeout applied to every read call.
    pub timeout: Duration,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port_name: String::new(),
            baud_rate: DEFAULT_BAUD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl SerialConfig {
    /// Create a new configuration with port name and baud rate.
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            ..Default::default()
        }
    }

    /// Set the timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A blocking, timeout-bounded duplex byte stream.
///
/// Reads must return `ErrorKind::TimedOut` when nothing arrives within
/// [`Port::timeout`].
pub trait Port: Read + Write + Send {
    /// Set the read timeout.
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;

    /// Get the current read timeout.
    fn timeout(&self) -> Duration;

    /// Discard any received but unread bytes.
    fn clear_input(&mut self) -> Result<()>;

    /// Get the port name/path.
    fn name(&self) -> &str;

    /// Close the port and release the underlying device handle.
    ///
    /// Calling this more than once is harmless.
    fn close(&mut self) -> Result<()>;

    /// Write all bytes, blocking until complete.
    fn write_all_bytes(&mut self, buf: &[u8]) -> Result<()> {
        std::io::Write::write_all(self, buf)?;
        std::io::Write::flush(self)?;
        Ok(())
    }
}

/// Opens ports by name.
///
/// The port locator goes through this trait so discovery can be exercised
/// without hardware.
pub trait PortOpener {
    /// Port type produced by this opener.
    type Port: Port;

    /// Open the named port.
    fn open(&mut self, config: &SerialConfig) -> Result<Self::Port>;
}

#[cfg(feature = "native")]
pub use native::{NativeOpener, NativePort};

//! Native serial port implementation using the `serialport` crate.

use {
    crate::{
        error::Result,
        port::{Port, PortOpener, SerialConfig},
    },
    log::trace,
    serialport::{ClearBuffer, DataBits, FlowControl, Parity, StopBits},
    std::{
        io::{Read, Write},
        time::Duration,
    },
};

/// Native serial port.
///
/// The bootloader link is always 8N1 without flow control.
pub struct NativePort {
    port: Option<Box<dyn serialport::SerialPort>>,
    name: String,
    timeout: Duration,
}

impl NativePort {
    /// Open a serial port with the given configuration.
    pub fn open(config: &SerialConfig) -> Result<Self> {
        let port = serialport::new(&config.port_name, config.baud_rate)
            .timeout(config.timeout)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .open()?;

        trace!(
            "Opened {} at {} baud (timeout {:?})",
            config.port_name, config.baud_rate, config.timeout
        );

        Ok(Self {
            port: Some(port),
            name: config
                .port_name
                .clone(),
            timeout: config.timeout,
        })
    }

    fn closed() -> std::io::Error {
        std::io::Error::new(std::io::ErrorKind::NotConnected, "port closed")
    }
}

impl Port for NativePort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.set_timeout(timeout)?;
        }
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        if let Some(ref mut p) = self.port {
            p.clear(ClearBuffer::Input)?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        if self
            .port
            .take()
            .is_some()
        {
            trace!("Closed {}", self.name);
        }
        Ok(())
    }
}

impl Read for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.read(buf))
    }
}

impl Write for NativePort {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(|p| p.write(buf))
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.port
            .as_mut()
            .ok_or_else(Self::closed)
            .and_then(std::io::Write::flush)
    }
}

/// Opens [`NativePort`]s for the port locator.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl PortOpener for NativeOpener {
    type Port = NativePort;

    fn open(&mut self, config: &SerialConfig) -> Result<NativePort> {
        NativePort::open(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_missing_port_fails() {
        let config = SerialConfig::new("/dev/pxflash-does-not-exist", 115_200);
        assert!(NativeOpener.open(&config).is_err());
    }
}

//! Request/acknowledge primitives every bootloader command is built on.

use std::io::{ErrorKind, Read};

use log::{debug, trace};

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, CommandFrame, INSYNC, NOP, OK, PROG_MULTI_MAX};

/// How [`resynchronize`] clears a possibly half-finished conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncStrategy {
    /// Discard unread input, then ask for sync.
    #[default]
    Flush,
    /// Push a burst of NOPs longer than the longest command first, so a
    /// partially sent PROG_MULTI is completed and rejected by the board,
    /// then flush and ask for sync.
    NopBurst,
}

/// Write one command frame.
pub fn send<P: Port + ?Sized>(port: &mut P, frame: &CommandFrame) -> Result<()> {
    let data = frame.build();
    trace!(
        "Sending {} ({} bytes): {:02X?}",
        frame
            .command()
            .name(),
        data.len(),
        data
    );
    port.write_all_bytes(&data)
}

/// Read exactly `count` bytes.
///
/// Fewer bytes than requested within the port timeout is a timeout error;
/// partial replies are never returned.
pub fn recv<P: Port + ?Sized>(port: &mut P, count: usize) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; count];
    let mut filled = 0;

    // A zero-length read means the port timeout passed with nothing received.
    while filled < count {
        match port.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {},
            Err(e) if e.kind() == ErrorKind::TimedOut => break,
            Err(e) => return Err(Error::Io(e)),
        }
    }

    if filled < count {
        return Err(Error::Timeout(format!(
            "expected {count} bytes, got {filled} within {:?}",
            port.timeout()
        )));
    }

    trace!("Received {count} bytes: {buf:02X?}");
    Ok(buf)
}

/// Wait for the `INSYNC, OK` acknowledgement.
///
/// Any other byte, FAILED included, is a protocol error carrying that byte.
pub fn await_sync<P: Port + ?Sized>(port: &mut P) -> Result<()> {
    let c = recv(port, 1)?[0];
    if c != INSYNC {
        return Err(Error::Protocol {
            expected: "INSYNC",
            got: c,
        });
    }

    let c = recv(port, 1)?[0];
    if c != OK {
        return Err(Error::Protocol {
            expected: "OK",
            got: c,
        });
    }

    Ok(())
}

/// Get back into sync with the bootloader.
///
/// Used for the first contact and to recover from a suspected
/// desynchronization.
pub fn resynchronize<P: Port + ?Sized>(port: &mut P, strategy: SyncStrategy) -> Result<()> {
    if strategy == SyncStrategy::NopBurst {
        port.write_all_bytes(&[NOP; PROG_MULTI_MAX + 2])?;
    }
    port.clear_input()?;
    send(port, &CommandFrame::new(Command::GetSync))?;
    await_sync(port)?;
    debug!("In sync with bootloader on {}", port.name());
    Ok(())
}

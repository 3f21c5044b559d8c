//! PX4 bootloader serial protocol.
//!
//! ## Command Format
//!
//! ```text
//! +--------+-----------------+------------------+-----+
//! | opcode | count (opt, 1B) | data (opt, count)| EOC |
//! +--------+-----------------+------------------+-----+
//! ```
//!
//! ## Reply Format
//!
//! ```text
//! +-------------------+--------+--------+
//! | reply data (opt)  | INSYNC | status |
//! +-------------------+--------+--------+
//! ```
//!
//! Reply data (the board info block, read-back bytes) arrives *before* the
//! INSYNC/status pair. A healthy exchange always ends in `INSYNC, OK`.
//!
//! Expected workflow:
//!
//! ```text
//! GET_SYNC      verify that the board is present
//! GET_DEVICE    determine which board (select firmware to upload)
//! CHIP_ERASE    erase the program area and reset the address counter
//! PROG_MULTI    program bytes (repeated)
//! CHIP_VERIFY   finalise programming and reset the address counter
//! READ_MULTI    read back bytes (repeated)
//! REBOOT        leave the bootloader and start the application
//! ```

pub mod chunk;
pub mod identify;
pub mod sync;

pub use chunk::{PROG_MULTI_MAX, READ_MULTI_MAX, split};
pub use identify::{BOARD_INFO_LEN, BOARD_INFO_MAGIC, BoardIdentity, identify};
pub use sync::{SyncStrategy, await_sync, recv, resynchronize, send};

/// No-op filler byte.
pub const NOP: u8 = 0x00;

/// Status byte: command succeeded.
pub const OK: u8 = 0x10;

/// Status byte: command failed.
pub const FAILED: u8 = 0x11;

/// Sync marker preceding every status byte.
pub const INSYNC: u8 = 0x12;

/// End-of-command marker.
pub const EOC: u8 = 0x20;

/// Bootloader command opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    /// Re-establish sync (0x21).
    GetSync = 0x21,
    /// Request the 32-byte board info block (0x22).
    GetDevice = 0x22,
    /// Erase the program area (0x23).
    ChipErase = 0x23,
    /// Enter verify mode and rewind the address counter (0x24).
    ChipVerify = 0x24,
    /// Program up to 255 bytes at the current address (0x27).
    ProgMulti = 0x27,
    /// Read back up to 255 bytes at the current address (0x28).
    ReadMulti = 0x28,
    /// Start the application (0x30).
    Reboot = 0x30,
}

impl Command {
    /// Human-readable command name, as used in logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::GetSync => "GET_SYNC",
            Self::GetDevice => "GET_DEVICE",
            Self::ChipErase => "CHIP_ERASE",
            Self::ChipVerify => "CHIP_VERIFY",
            Self::ProgMulti => "PROG_MULTI",
            Self::ReadMulti => "READ_MULTI",
            Self::Reboot => "REBOOT",
        }
    }

    /// Whether the frame for this command ends with EOC.
    ///
    /// REBOOT is fire-and-forget: the board is gone before it could answer.
    pub fn needs_eoc(self) -> bool {
        !matches!(self, Self::Reboot)
    }
}

/// Command frame builder.
#[derive(Debug, Clone)]
pub struct CommandFrame {
    cmd: Command,
    count: Option<u8>,
    data: Vec<u8>,
}

impl CommandFrame {
    /// Create a frame with no arguments.
    pub fn new(cmd: Command) -> Self {
        Self {
            cmd,
            count: None,
            data: Vec::new(),
        }
    }

    /// Create a PROG_MULTI frame carrying `data`.
    ///
    /// `data` must not exceed 255 bytes; callers split with [`split`].
    #[allow(clippy::cast_possible_truncation)]
    pub fn prog_multi(data: &[u8]) -> Self {
        debug_assert!(data.len() <= usize::from(u8::MAX));
        Self {
            cmd: Command::ProgMulti,
            count: Some(data.len() as u8),
            data: data.to_vec(),
        }
    }

    /// Create a READ_MULTI frame requesting `count` bytes.
    pub fn read_multi(count: u8) -> Self {
        Self {
            cmd: Command::ReadMulti,
            count: Some(count),
            data: Vec::new(),
        }
    }

    /// Build the complete frame data.
    pub fn build(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(
            3 + self
                .data
                .len(),
        );
        buf.push(self.cmd as u8);
        if let Some(count) = self.count {
            buf.push(count);
        }
        buf.extend_from_slice(&self.data);
        if self
            .cmd
            .needs_eoc()
        {
            buf.push(EOC);
        }
        buf
    }

    /// Get the command type.
    pub fn command(&self) -> Command {
        self.cmd
    }
}

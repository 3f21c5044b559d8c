//! Error types for pxflash.

use std::io;
use thiserror::Error;

/// Result type for pxflash operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for pxflash operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (serial port, file operations).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serial port error.
    #[cfg(feature = "native")]
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    /// No candidate port produced a responding bootloader in time.
    #[error("No bootloader found on {} after {waited_secs:.1}s", .ports.join(", "))]
    PortNotFound {
        /// Candidate ports that were probed.
        ports: Vec<String>,
        /// Total time spent waiting.
        waited_secs: f32,
    },

    /// Legacy firmware file is not larger than its trailer.
    #[error("Firmware file too small: {len} bytes (need more than {min})")]
    TooSmall {
        /// Actual file length.
        len: usize,
        /// Trailer length that must be exceeded.
        min: usize,
    },

    /// Container magic does not match.
    #[error("Bad firmware magic: expected {expected:?}, got {found:?}")]
    BadMagic {
        /// Expected magic.
        expected: String,
        /// Magic found in the file.
        found: String,
    },

    /// Descriptor could not be decoded (JSON, base64 or zlib).
    #[error("Firmware decode error: {0}")]
    Decode(String),

    /// Decompressed image length differs from the declared `image_size`.
    #[error("Image size mismatch: descriptor declares {declared} bytes, image has {actual}")]
    ImageSizeMismatch {
        /// Size declared by the descriptor.
        declared: usize,
        /// Size of the decoded image.
        actual: usize,
    },

    /// Unexpected byte where INSYNC or OK was expected.
    #[error("Protocol error: unexpected {got:#04x} instead of {expected}")]
    Protocol {
        /// Name of the expected byte.
        expected: &'static str,
        /// Offending byte.
        got: u8,
    },

    /// Communication timeout.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Board info structure did not carry the bootloader magic.
    #[error("Board info magic mismatch: got {found:#010x}, not a PX4 bootloader")]
    MagicMismatch {
        /// Magic read from the device.
        found: u32,
    },

    /// Firmware was built for a different board.
    #[error("Firmware is for board {firmware:#x}, but the attached board is {board:#x}")]
    BoardMismatch {
        /// Board id the firmware requires.
        firmware: u32,
        /// Board type reported by the device.
        board: u8,
    },

    /// Read-back data differs from what was programmed.
    #[error("Verification failed at offset {offset:#x}: expected {}, got {}", hex(.expected), hex(.actual))]
    Verification {
        /// Byte offset of the mismatched chunk.
        offset: usize,
        /// Bytes that were programmed.
        expected: Vec<u8>,
        /// Bytes read back from flash.
        actual: Vec<u8>,
    },

    /// Operation cancelled by the embedding application.
    #[error("Interrupted")]
    Interrupted,
}

impl Error {
    /// Whether this error comes from parsing a firmware container.
    ///
    /// Container errors are raised before any device contact.
    pub fn is_container_error(&self) -> bool {
        matches!(
            self,
            Self::TooSmall { .. }
                | Self::BadMagic { .. }
                | Self::Decode(_)
                | Self::ImageSizeMismatch { .. }
        )
    }

    /// Whether the device stopped answering.
    pub fn is_timeout(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Io(e) => e.kind() == io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Decode(format!("invalid descriptor JSON: {err}"))
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

//! Firmware container parsing.
//!
//! Two container formats describe a firmware image:
//!
//! - [`descriptor`]: a JSON document carrying metadata plus the payload,
//!   zlib-compressed and base64-encoded.
//! - [`trailer`]: a raw binary with a fixed 100-byte metadata block appended.
//!
//! Both decode into the same [`FirmwareImage`]. Parsing is pure over bytes;
//! [`load`] only adds the file read.

pub mod descriptor;
pub mod trailer;

use std::fmt;
use std::path::Path;

use log::{debug, warn};
use serde::Serialize;

use crate::error::Result;

pub use descriptor::{DESCRIPTOR_MAGIC, Descriptor, git_identity};
pub use trailer::{TRAILER_LEN, TRAILER_MAGIC, Trailer};

/// Which container a firmware image was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContainerFormat {
    /// JSON descriptor with an embedded compressed image.
    Descriptor,
    /// Raw binary followed by a 100-byte trailer.
    LegacyTrailer,
}

impl fmt::Display for ContainerFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Descriptor => write!(f, "descriptor"),
            Self::LegacyTrailer => write!(f, "legacy trailer"),
        }
    }
}

impl ContainerFormat {
    /// Guess the format from the leading bytes.
    ///
    /// A descriptor is a JSON object, so its first non-whitespace byte is
    /// `{`. Everything else is treated as a trailer container. A binary that
    /// happens to start with `{` is detected as a descriptor here;
    /// [`FirmwareImage::from_bytes`] falls back to the trailer when the bytes
    /// are not JSON.
    pub fn detect(data: &[u8]) -> Self {
        let first = data
            .iter()
            .find(|b| !b.is_ascii_whitespace());
        match first {
            Some(b'{') => Self::Descriptor,
            _ => Self::LegacyTrailer,
        }
    }
}

fn is_json(data: &[u8]) -> bool {
    serde_json::from_slice::<serde::de::IgnoredAny>(data).is_ok()
}

/// A firmware image and the board it is built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirmwareImage {
    /// Container the image came from.
    pub format: ContainerFormat,
    /// Board type the firmware requires.
    pub board_id: u32,
    /// Board revision the firmware was built for.
    pub board_revision: u32,
    /// Version string.
    pub version: String,
    /// One-line summary.
    pub summary: String,
    /// Longer description.
    pub description: String,
    /// Build identity, such as a `git describe` string.
    pub build_identity: String,
    /// Build time as a unix timestamp.
    pub build_time: u64,
    payload: Vec<u8>,
}

impl FirmwareImage {
    /// Parse a container held in memory.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let image = match ContainerFormat::detect(data) {
            ContainerFormat::Descriptor if is_json(data) => {
                Descriptor::from_json(data)?.into_image()?
            },
            // A raw binary can start with `{` too.
            ContainerFormat::Descriptor => match Trailer::split(data) {
                Ok((payload, trailer)) => {
                    debug!("Leading '{{' is not JSON, reading as legacy trailer");
                    trailer.into_image(payload)
                },
                Err(_) => Descriptor::from_json(data)?.into_image()?,
            },
            ContainerFormat::LegacyTrailer => {
                let (payload, trailer) = Trailer::split(data)?;
                trailer.into_image(payload)
            },
        };

        debug!(
            "Loaded {} firmware: board {} rev {}, {} bytes",
            image.format,
            image.board_id,
            image.board_revision,
            image
                .payload
                .len()
        );
        if image
            .payload
            .len()
            % 4
            != 0
        {
            warn!(
                "Image length {} is not a multiple of 4; the bootloader may reject the last chunk",
                image
                    .payload
                    .len()
            );
        }

        Ok(image)
    }

    /// Raw, uncompressed firmware bytes.
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload
            .len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload
            .is_empty()
    }
}

/// Read and parse a firmware file.
pub fn load(path: impl AsRef<Path>) -> Result<FirmwareImage> {
    let path = path.as_ref();
    debug!("Reading firmware from {}", path.display());
    let data = std::fs::read(path)?;
    FirmwareImage::from_bytes(&data)
}

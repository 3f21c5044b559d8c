//! JSON firmware descriptor.
//!
//! ```json
//! {
//!     "magic": "PX4FWv1",
//!     "board_id": 9,
//!     "board_revision": 0,
//!     "version": "",
//!     "summary": "PX4FMUv2",
//!     "description": "",
//!     "git_identity": "v1.0-12-gabcdef0",
//!     "build_time": 1366420000,
//!     "image": "<base64 of zlib-compressed payload>",
//!     "image_size": 1032192
//! }
//! ```
//!
//! Unknown keys (board prototypes often carry extra ones) survive a decode
//! and re-encode unchanged.

use std::io::{Read, Write};
use std::path::Path;
use std::process::Command;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use flate2::Compression;
use flate2::read::ZlibDecoder;
use flate2::write::ZlibEncoder;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::image::{ContainerFormat, FirmwareImage};

/// Magic string every descriptor carries.
pub const DESCRIPTOR_MAGIC: &str = "PX4FWv1";

/// zlib level used when embedding an image.
const COMPRESSION_LEVEL: u32 = 9;

/// On-disk descriptor document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Format magic, always [`DESCRIPTOR_MAGIC`].
    pub magic: String,
    /// Board type the firmware requires.
    pub board_id: u32,
    /// Board revision the firmware was built for.
    #[serde(default)]
    pub board_revision: u32,
    /// Version string.
    #[serde(default)]
    pub version: String,
    /// One-line summary.
    #[serde(default)]
    pub summary: String,
    /// Longer description.
    #[serde(default)]
    pub description: String,
    /// `git describe` output of the source tree.
    #[serde(default)]
    pub git_identity: String,
    /// Build time as a unix timestamp.
    #[serde(default)]
    pub build_time: u64,
    /// Payload, zlib-compressed then base64-encoded.
    pub image: String,
    /// Payload length before compression.
    pub image_size: usize,
    /// Keys this crate does not interpret.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Descriptor {
    fn default() -> Self {
        Self::new()
    }
}

impl Descriptor {
    /// An empty descriptor: board 0, no metadata, zero-length image.
    pub fn new() -> Self {
        Self {
            magic: DESCRIPTOR_MAGIC.to_string(),
            board_id: 0,
            board_revision: 0,
            version: String::new(),
            summary: String::new(),
            description: String::new(),
            git_identity: String::new(),
            build_time: 0,
            image: STANDARD.encode(compress(&[]).unwrap_or_default()),
            image_size: 0,
            extra: Map::new(),
        }
    }

    /// Parse a descriptor document and check its magic.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let desc: Self = serde_json::from_slice(data)?;
        if desc.magic != DESCRIPTOR_MAGIC {
            return Err(Error::BadMagic {
                expected: DESCRIPTOR_MAGIC.to_string(),
                found: desc.magic,
            });
        }
        Ok(desc)
    }

    /// Read a descriptor from a file, typically a board prototype.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }

    /// Serialize with four-space indentation.
    pub fn to_json_pretty(&self) -> Result<String> {
        let mut out = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut out, formatter);
        self.serialize(&mut ser)?;
        String::from_utf8(out).map_err(|e| Error::Decode(e.to_string()))
    }

    /// Embed `payload`, replacing any image already present.
    pub fn set_image(&mut self, payload: &[u8]) -> Result<()> {
        let compressed = compress(payload)?;
        debug!(
            "Compressed image {} -> {} bytes",
            payload.len(),
            compressed.len()
        );
        self.image = STANDARD.encode(compressed);
        self.image_size = payload.len();
        Ok(())
    }

    /// Recover the payload and check it against `image_size`.
    pub fn decode_image(&self) -> Result<Vec<u8>> {
        let compressed = STANDARD
            .decode(
                self.image
                    .trim(),
            )
            .map_err(|e| Error::Decode(format!("invalid base64 image: {e}")))?;

        // Inflate at most one byte past the declared size; the length check
        // below rejects anything longer.
        let limit = u64::try_from(self.image_size)
            .unwrap_or(u64::MAX)
            .saturating_add(1);
        let mut payload = Vec::new();
        ZlibDecoder::new(compressed.as_slice())
            .take(limit)
            .read_to_end(&mut payload)
            .map_err(|e| Error::Decode(format!("zlib inflate failed: {e}")))?;

        if payload.len() != self.image_size {
            return Err(Error::ImageSizeMismatch {
                declared: self.image_size,
                actual: payload.len(),
            });
        }
        Ok(payload)
    }

    /// Decode into a [`FirmwareImage`].
    pub fn into_image(self) -> Result<FirmwareImage> {
        let payload = self.decode_image()?;
        Ok(FirmwareImage {
            format: ContainerFormat::Descriptor,
            board_id: self.board_id,
            board_revision: self.board_revision,
            version: self.version,
            summary: self.summary,
            description: self.description,
            build_identity: self.git_identity,
            build_time: self.build_time,
            payload,
        })
    }
}

fn compress(payload: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::new(COMPRESSION_LEVEL));
    encoder.write_all(payload)?;
    Ok(encoder.finish()?)
}

/// Describe the git checkout at `dir` with `git describe --always --dirty`.
pub fn git_identity(dir: impl AsRef<Path>) -> Result<String> {
    let git_dir = dir
        .as_ref()
        .join(".git");
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(&git_dir)
        .args(["describe", "--always", "--dirty"])
        .output()?;

    if !output
        .status
        .success()
    {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::Io(std::io::Error::other(format!(
            "git describe in {} failed: {}",
            git_dir.display(),
            stderr.trim()
        ))));
    }

    Ok(String::from_utf8_lossy(&output.stdout)
        .trim()
        .to_string())
}

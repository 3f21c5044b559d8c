//! Legacy firmware files with a fixed metadata trailer.
//!
//! ```text
//! +---------------------------+
//! |      raw payload ...      |
//! +---------------------------+  <- len - 100
//! | "OpFw"          (4)       |
//! | commit tag      (4, LE)   |
//! | build time      (4, LE)   |
//! | board id        (1)       |
//! | board revision  (1)       |
//! | identity        (26, NUL) |
//! | sha1            (20)      |
//! | reserved        (40)      |
//! +---------------------------+
//! ```

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::image::{ContainerFormat, FirmwareImage};

/// Size of the trailer block.
pub const TRAILER_LEN: usize = 100;

/// Magic at the start of the trailer.
pub const TRAILER_MAGIC: &[u8; 4] = b"OpFw";

const IDENTITY_RANGE: std::ops::Range<usize> = 14..40;
const SHA1_RANGE: std::ops::Range<usize> = 40..60;

/// Decoded trailer fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Trailer {
    /// Short VCS commit tag.
    pub commit_tag: u32,
    /// Build time as a unix timestamp.
    pub build_time: u32,
    /// Board type the firmware requires.
    pub board_id: u8,
    /// Board revision the firmware was built for.
    pub board_revision: u8,
    /// Tag or branch name, with any zero padding removed.
    pub identity: String,
    /// SHA-1 of the firmware. Not checked by the uploader.
    pub sha1: [u8; 20],
}

impl Trailer {
    /// Decode a trailer block.
    pub fn parse(block: &[u8; TRAILER_LEN]) -> Result<Self> {
        if &block[..4] != TRAILER_MAGIC {
            return Err(Error::BadMagic {
                expected: String::from_utf8_lossy(TRAILER_MAGIC).into_owned(),
                found: String::from_utf8_lossy(&block[..4]).into_owned(),
            });
        }

        let identity = &block[IDENTITY_RANGE];
        let end = identity
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(identity.len());

        let mut sha1 = [0u8; 20];
        sha1.copy_from_slice(&block[SHA1_RANGE]);

        Ok(Self {
            commit_tag: LittleEndian::read_u32(&block[4..8]),
            build_time: LittleEndian::read_u32(&block[8..12]),
            board_id: block[12],
            board_revision: block[13],
            identity: String::from_utf8_lossy(&identity[..end]).into_owned(),
            sha1,
        })
    }

    /// Separate a legacy file into payload and trailer.
    ///
    /// The file must be strictly longer than the trailer.
    pub fn split(data: &[u8]) -> Result<(&[u8], Self)> {
        if data.len() <= TRAILER_LEN {
            return Err(Error::TooSmall {
                len: data.len(),
                min: TRAILER_LEN,
            });
        }

        let (payload, tail) = data.split_at(data.len() - TRAILER_LEN);
        let mut block = [0u8; TRAILER_LEN];
        block.copy_from_slice(tail);
        Ok((payload, Self::parse(&block)?))
    }

    /// Pair this trailer with its payload.
    pub fn into_image(self, payload: &[u8]) -> FirmwareImage {
        let build_identity = if self
            .identity
            .is_empty()
        {
            format!("{:08x}", self.commit_tag)
        } else {
            self.identity
        };

        FirmwareImage {
            format: ContainerFormat::LegacyTrailer,
            board_id: u32::from(self.board_id),
            board_revision: u32::from(self.board_revision),
            version: String::new(),
            summary: String::new(),
            description: String::new(),
            build_identity,
            build_time: u64::from(self.build_time),
            payload: payload.to_vec(),
        }
    }
}

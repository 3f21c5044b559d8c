//! Board identification through GET_DEVICE.

use byteorder::{ByteOrder, LittleEndian};
use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::port::Port;
use crate::protocol::{Command, CommandFrame, await_sync, recv, send};

/// Size of the board info block returned by GET_DEVICE.
pub const BOARD_INFO_LEN: usize = 32;

/// Leading word of every valid board info block.
pub const BOARD_INFO_MAGIC: u32 = 0xBDBD_BDBD;

/// Identity of the board behind a bootloader, decoded from the info block.
///
/// Layout (little-endian):
///
/// ```text
/// offset  size  field
///      0     4  magic (0xBDBDBDBD)
///      4     1  board type
///      5     1  board revision
///      6     1  bootloader revision
///      7     1  hardware type
///      8     4  firmware base address
///     12     4  firmware area size
///     16     4  descriptor base address
///     20     4  descriptor area size
///     24     4  EEPROM base address
///     28     4  EEPROM size
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BoardIdentity {
    /// Board type, compared against the firmware's board id.
    pub board_type: u8,
    /// Board hardware revision.
    pub board_revision: u8,
    /// Bootloader protocol revision.
    pub bootloader_revision: u8,
    /// Hardware type.
    pub hardware_type: u8,
    /// Start of the program area.
    pub fw_base: u32,
    /// Size of the program area.
    pub fw_size: u32,
    /// Start of the firmware descriptor area.
    pub desc_base: u32,
    /// Size of the firmware descriptor area.
    pub desc_size: u32,
    /// Start of the emulated EEPROM.
    pub ee_base: u32,
    /// Size of the emulated EEPROM.
    pub ee_size: u32,
}

impl BoardIdentity {
    /// Decode a board info block.
    ///
    /// The magic word is checked before anything else is trusted.
    pub fn parse(info: &[u8; BOARD_INFO_LEN]) -> Result<Self> {
        let magic = LittleEndian::read_u32(&info[0..4]);
        if magic != BOARD_INFO_MAGIC {
            return Err(Error::MagicMismatch { found: magic });
        }

        Ok(Self {
            board_type: info[4],
            board_revision: info[5],
            bootloader_revision: info[6],
            hardware_type: info[7],
            fw_base: LittleEndian::read_u32(&info[8..12]),
            fw_size: LittleEndian::read_u32(&info[12..16]),
            desc_base: LittleEndian::read_u32(&info[16..20]),
            desc_size: LittleEndian::read_u32(&info[20..24]),
            ee_base: LittleEndian::read_u32(&info[24..28]),
            ee_size: LittleEndian::read_u32(&info[28..32]),
        })
    }
}

/// Ask the board who it is.
///
/// Sends GET_DEVICE, reads the info block and the trailing sync pair, then
/// decodes the block.
pub fn identify<P: Port + ?Sized>(port: &mut P) -> Result<BoardIdentity> {
    send(port, &CommandFrame::new(Command::GetDevice))?;
    let raw = recv(port, BOARD_INFO_LEN)?;
    await_sync(port)?;

    let mut info = [0u8; BOARD_INFO_LEN];
    info.copy_from_slice(&raw);
    let identity = BoardIdentity::parse(&info)?;

    debug!(
        "Board type {} rev {} (bootloader rev {}) on {}",
        identity.board_type,
        identity.board_revision,
        identity.bootloader_revision,
        port.name()
    );
    Ok(identity)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::port::mock::{ScriptedPort, SimBootloader};
    use crate::protocol::{EOC, FAILED, INSYNC, OK};

    fn info_block(magic: u32, board_type: u8) -> [u8; BOARD_INFO_LEN] {
        let mut info = [0u8; BOARD_INFO_LEN];
        info[0..4].copy_from_slice(&magic.to_le_bytes());
        info[4] = board_type;
        info[5] = 2;
        info[6] = 4;
        info[7] = 1;
        info[8..12].copy_from_slice(&0x0800_4000u32.to_le_bytes());
        info[12..16].copy_from_slice(&0x000F_C000u32.to_le_bytes());
        info[28..32].copy_from_slice(&0x4000u32.to_le_bytes());
        info
    }

    #[test]
    fn test_parse_fields() {
        let identity = BoardIdentity::parse(&info_block(BOARD_INFO_MAGIC, 9)).unwrap();
        assert_eq!(identity.board_type, 9);
        assert_eq!(identity.board_revision, 2);
        assert_eq!(identity.bootloader_revision, 4);
        assert_eq!(identity.hardware_type, 1);
        assert_eq!(identity.fw_base, 0x0800_4000);
        assert_eq!(identity.fw_size, 0x000F_C000);
        assert_eq!(identity.desc_base, 0);
        assert_eq!(identity.ee_size, 0x4000);
    }

    #[test]
    fn test_parse_rejects_bad_magic_regardless_of_fields() {
        for board_type in [0, 5, 9, 255] {
            match BoardIdentity::parse(&info_block(0xDEAD_BEEF, board_type)) {
                Err(Error::MagicMismatch { found }) => assert_eq!(found, 0xDEAD_BEEF),
                other => panic!("expected magic mismatch, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_identify_scripted_reply() {
        let mut reply = info_block(BOARD_INFO_MAGIC, 5).to_vec();
        reply.extend([INSYNC, OK]);
        let mut port = ScriptedPort::new(&reply);

        let identity = identify(&mut port).unwrap();

        assert_eq!(identity.board_type, 5);
        assert_eq!(port.write_buf, vec![0x22, EOC]);
    }

    #[test]
    fn test_identify_requires_trailing_sync() {
        let mut reply = info_block(BOARD_INFO_MAGIC, 5).to_vec();
        reply.extend([INSYNC, FAILED]);
        let mut port = ScriptedPort::new(&reply);

        assert!(matches!(
            identify(&mut port),
            Err(Error::Protocol { expected: "OK", .. })
        ));
    }

    #[test]
    fn test_identify_short_block_times_out() {
        let mut port = ScriptedPort::new(&[0xBD; 20]);
        assert!(
            identify(&mut port)
                .unwrap_err()
                .is_timeout()
        );
    }

    #[test]
    fn test_identify_simulated_board() {
        let mut sim = SimBootloader::new(9);
        sim.board_rev = 3;

        let identity = identify(&mut sim).unwrap();

        assert_eq!(identity.board_type, 9);
        assert_eq!(identity.board_revision, 3);
        assert_eq!(identity.fw_base, 0x0800_4000);
        assert!(sim.saw(Command::GetDevice));
    }

    #[test]
    fn test_identify_simulated_bad_magic() {
        let mut sim = SimBootloader::new(9);
        sim.magic = 0x1234_5678;

        assert!(matches!(
            identify(&mut sim),
            Err(Error::MagicMismatch { found: 0x1234_5678 })
        ));
    }
}

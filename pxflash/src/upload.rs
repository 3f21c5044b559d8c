//! Upload orchestration.
//!
//! One [`UploadSession`] drives one attempt through the state machine:
//!
//! ```text
//! Idle -> Synced -> Erased -> Programmed -> Verified -> Rebooted
//!   \        \         \           \            \
//!    +--------+---------+-----------+------------+--> Failed
//! ```
//!
//! The board is re-synchronized and re-identified at the start of every
//! session, and the firmware's board id is checked before the first command
//! that touches flash.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::port::Port;
use crate::protocol::{
    BoardIdentity, Command, CommandFrame, PROG_MULTI_MAX, READ_MULTI_MAX, SyncStrategy,
    await_sync, identify, recv, resynchronize, send, split,
};

/// Read timeout while the board erases its flash.
pub const ERASE_TIMEOUT: Duration = Duration::from_secs(20);

/// Where an upload attempt currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadState {
    /// Nothing sent yet.
    Idle,
    /// In sync and identified.
    Synced,
    /// Program area erased.
    Erased,
    /// Every chunk programmed.
    Programmed,
    /// Every chunk read back and matched.
    Verified,
    /// REBOOT sent; the application is starting.
    Rebooted,
    /// The attempt was abandoned.
    Failed,
}

impl UploadState {
    /// Whether no further transitions are possible.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rebooted | Self::Failed)
    }
}

impl fmt::Display for UploadState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Synced => "synced",
            Self::Erased => "erased",
            Self::Programmed => "programmed",
            Self::Verified => "verified",
            Self::Rebooted => "rebooted",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Progress notifications emitted during an upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadEvent {
    /// The session entered a new state.
    State(UploadState),
    /// The board identified itself after synchronization.
    Identified(BoardIdentity),
    /// `written` of `total` bytes programmed.
    Programming {
        /// Bytes programmed so far.
        written: usize,
        /// Payload length.
        total: usize,
    },
    /// `verified` of `total` bytes read back and matched.
    Verifying {
        /// Bytes verified so far.
        verified: usize,
        /// Payload length.
        total: usize,
    },
}

/// One upload attempt over an exclusively owned port.
pub struct UploadSession<P: Port> {
    port: P,
    identity: BoardIdentity,
    state: UploadState,
    strategy: SyncStrategy,
    erase_timeout: Duration,
    interrupted: fn() -> bool,
}

impl<P: Port> UploadSession<P> {
    /// Start a session on a port the locator found.
    ///
    /// `identity` is what the board reported while probing. It is replaced
    /// by a fresh identification when the upload starts.
    pub fn new(port: P, identity: BoardIdentity) -> Self {
        Self {
            port,
            identity,
            state: UploadState::Idle,
            strategy: SyncStrategy::default(),
            erase_timeout: ERASE_TIMEOUT,
            interrupted: crate::is_interrupted_requested,
        }
    }

    /// Choose how the initial resynchronization clears the line.
    #[must_use]
    pub fn with_sync_strategy(mut self, strategy: SyncStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Override the read timeout used while erasing.
    #[must_use]
    pub fn with_erase_timeout(mut self, timeout: Duration) -> Self {
        self.erase_timeout = timeout;
        self
    }

    /// Most recent identity reported by the board.
    pub fn identity(&self) -> &BoardIdentity {
        &self.identity
    }

    /// Current state.
    pub fn state(&self) -> UploadState {
        self.state
    }

    /// Erase, program, verify and reboot.
    ///
    /// The port is closed on return whatever the outcome.
    pub fn upload<F>(mut self, image: &FirmwareImage, mut progress: F) -> Result<BoardIdentity>
    where
        F: FnMut(UploadEvent),
    {
        let result = self.run(image, &mut progress);

        if let Err(e) = &result {
            warn!("Upload failed in state {}: {e}", self.state);
            self.enter(UploadState::Failed, &mut progress);
        }

        let closed = self
            .port
            .close();
        result?;
        closed?;
        Ok(self.identity)
    }

    fn run<F>(&mut self, image: &FirmwareImage, progress: &mut F) -> Result<()>
    where
        F: FnMut(UploadEvent),
    {
        self.check_interrupted()?;
        resynchronize(&mut self.port, self.strategy)?;
        self.identity = identify(&mut self.port)?;
        progress(UploadEvent::Identified(self.identity));
        self.enter(UploadState::Synced, progress);

        self.check_board(image)?;

        self.erase()?;
        self.enter(UploadState::Erased, progress);

        self.program(image.payload(), progress)?;
        self.enter(UploadState::Programmed, progress);

        self.verify(image.payload(), progress)?;
        self.enter(UploadState::Verified, progress);

        self.check_interrupted()?;
        send(&mut self.port, &CommandFrame::new(Command::Reboot))?;
        self.enter(UploadState::Rebooted, progress);
        Ok(())
    }

    fn check_board(&self, image: &FirmwareImage) -> Result<()> {
        if u32::from(
            self.identity
                .board_type,
        ) != image.board_id
        {
            return Err(Error::BoardMismatch {
                firmware: image.board_id,
                board: self
                    .identity
                    .board_type,
            });
        }
        if u32::from(
            self.identity
                .board_revision,
        ) != image.board_revision
        {
            debug!(
                "Board revision {} differs from firmware revision {}",
                self.identity
                    .board_revision,
                image.board_revision
            );
        }
        Ok(())
    }

    fn erase(&mut self) -> Result<()> {
        self.check_interrupted()?;
        let normal = self
            .port
            .timeout();
        self.port
            .set_timeout(self.erase_timeout)?;

        let erased = send(&mut self.port, &CommandFrame::new(Command::ChipErase))
            .and_then(|()| await_sync(&mut self.port));

        self.port
            .set_timeout(normal)?;
        erased
    }

    fn program<F>(&mut self, payload: &[u8], progress: &mut F) -> Result<()>
    where
        F: FnMut(UploadEvent),
    {
        let total = payload.len();
        let mut written = 0;

        for chunk in split(payload, PROG_MULTI_MAX) {
            self.check_interrupted()?;
            send(&mut self.port, &CommandFrame::prog_multi(chunk))?;
            await_sync(&mut self.port)?;

            written += chunk.len();
            progress(UploadEvent::Programming { written, total });
        }
        Ok(())
    }

    #[allow(clippy::cast_possible_truncation)]
    fn verify<F>(&mut self, payload: &[u8], progress: &mut F) -> Result<()>
    where
        F: FnMut(UploadEvent),
    {
        self.check_interrupted()?;
        send(&mut self.port, &CommandFrame::new(Command::ChipVerify))?;
        await_sync(&mut self.port)?;

        let total = payload.len();
        let mut offset = 0;

        for expected in split(payload, READ_MULTI_MAX) {
            self.check_interrupted()?;
            send(
                &mut self.port,
                &CommandFrame::read_multi(expected.len() as u8),
            )?;
            let actual = recv(&mut self.port, expected.len())?;
            if actual != expected {
                return Err(Error::Verification {
                    offset,
                    expected: expected.to_vec(),
                    actual,
                });
            }
            await_sync(&mut self.port)?;

            offset += expected.len();
            progress(UploadEvent::Verifying {
                verified: offset,
                total,
            });
        }
        Ok(())
    }

    fn enter<F>(&mut self, next: UploadState, progress: &mut F)
    where
        F: FnMut(UploadEvent),
    {
        info!("Upload {} -> {} on {}", self.state, next, self.port.name());
        self.state = next;
        progress(UploadEvent::State(next));
    }

    fn check_interrupted(&self) -> Result<()> {
        if (self.interrupted)() {
            return Err(Error::Interrupted);
        }
        Ok(())
    }
}

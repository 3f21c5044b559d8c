//! In-memory ports for unit tests.

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::Result;
use crate::port::Port;
use crate::protocol::{BOARD_INFO_MAGIC, Command, EOC, FAILED, INSYNC, OK};

/// Port that replays a fixed byte script and records everything written.
///
/// Reads return `TimedOut` once the script is drained.
#[derive(Debug)]
pub(crate) struct ScriptedPort {
    pub(crate) read_buf: VecDeque<u8>,
    pub(crate) write_buf: Vec<u8>,
    /// Return `Ok(0)` instead of `TimedOut` once drained.
    pub(crate) zero_reads: bool,
    timeout: Duration,
}

impl ScriptedPort {
    pub(crate) fn new(response: &[u8]) -> Self {
        Self {
            read_buf: response
                .iter()
                .copied()
                .collect(),
            write_buf: Vec::new(),
            zero_reads: false,
            timeout: Duration::from_millis(10),
        }
    }
}

impl Read for ScriptedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .read_buf
            .is_empty()
        {
            if self.zero_reads {
                return Ok(0);
            }
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.read_buf
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.read_buf
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for ScriptedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_buf
            .extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for ScriptedPort {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        Ok(())
    }

    fn name(&self) -> &str {
        "scripted"
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Simulated bootloader speaking the real command set.
///
/// Flash writes and read-backs go through an in-memory buffer so a full
/// upload can be driven end to end. Faults are injected through the public
/// fields.
#[derive(Debug)]
pub(crate) struct SimBootloader {
    pub(crate) name: String,
    pub(crate) board_type: u8,
    pub(crate) board_rev: u8,
    pub(crate) magic: u32,
    /// Opcode answered with INSYNC, FAILED instead of INSYNC, OK.
    pub(crate) fail_opcode: Option<u8>,
    /// Flash offset whose read-back byte is flipped.
    pub(crate) corrupt_at: Option<usize>,
    /// Drop every command without answering.
    pub(crate) silent: bool,
    pub(crate) flash: Vec<u8>,
    /// Every byte written by the host, in order.
    pub(crate) wire: Vec<u8>,
    /// Opcodes of every complete command processed.
    pub(crate) commands: Vec<u8>,
    pub(crate) rebooted: bool,
    pub(crate) closed: bool,
    pub(crate) timeouts: Vec<Duration>,
    /// Shared record of closed port names, for callers that give up ownership.
    pub(crate) close_log: Option<Arc<Mutex<Vec<String>>>>,
    pending: Vec<u8>,
    outbound: VecDeque<u8>,
    read_addr: usize,
    timeout: Duration,
}

impl SimBootloader {
    pub(crate) fn new(board_type: u8) -> Self {
        Self {
            name: "sim".to_string(),
            board_type,
            board_rev: 0,
            magic: BOARD_INFO_MAGIC,
            fail_opcode: None,
            corrupt_at: None,
            silent: false,
            flash: Vec::new(),
            wire: Vec::new(),
            commands: Vec::new(),
            rebooted: false,
            closed: false,
            timeouts: Vec::new(),
            close_log: None,
            pending: Vec::new(),
            outbound: VecDeque::new(),
            read_addr: 0,
            timeout: Duration::from_millis(10),
        }
    }

    pub(crate) fn named(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// Queue stray bytes as if left over from an earlier conversation.
    pub(crate) fn inject_noise(&mut self, bytes: &[u8]) {
        self.outbound
            .extend(bytes);
    }

    pub(crate) fn saw(&self, cmd: Command) -> bool {
        self.commands
            .contains(&(cmd as u8))
    }

    fn board_info(&self) -> [u8; 32] {
        let mut info = [0u8; 32];
        info[..4].copy_from_slice(
            &self
                .magic
                .to_le_bytes(),
        );
        info[4] = self.board_type;
        info[5] = self.board_rev;
        info[6] = 3;
        info[7] = 0;
        info[8..12].copy_from_slice(&0x0800_4000u32.to_le_bytes());
        info
    }

    fn reply(&mut self, opcode: u8) {
        if self.fail_opcode == Some(opcode) {
            self.outbound
                .extend([INSYNC, FAILED]);
        } else {
            self.outbound
                .extend([INSYNC, OK]);
        }
    }

    /// Consume one complete command from `pending`, if there is one.
    fn process_one(&mut self) -> bool {
        let Some(&opcode) = self
            .pending
            .first()
        else {
            return false;
        };

        let consumed = match opcode {
            0x00 => 1,
            0x30 => {
                self.commands
                    .push(opcode);
                self.rebooted = true;
                1
            },
            0x21..=0x24 => {
                if self
                    .pending
                    .len()
                    < 2
                {
                    return false;
                }
                if self.pending[1] == EOC {
                    self.run_simple(opcode);
                }
                2
            },
            0x27 => {
                let Some(&count) = self
                    .pending
                    .get(1)
                else {
                    return false;
                };
                let total = 3 + count as usize;
                if self
                    .pending
                    .len()
                    < total
                {
                    return false;
                }
                if self.pending[total - 1] == EOC {
                    let data = self.pending[2..total - 1].to_vec();
                    self.commands
                        .push(opcode);
                    if !self.silent {
                        self.flash
                            .extend_from_slice(&data);
                        self.reply(opcode);
                    }
                }
                total
            },
            0x28 => {
                if self
                    .pending
                    .len()
                    < 3
                {
                    return false;
                }
                let count = self.pending[1] as usize;
                if self.pending[2] == EOC {
                    self.commands
                        .push(opcode);
                    if !self.silent {
                        let start = self.read_addr;
                        let end = (start + count).min(
                            self.flash
                                .len(),
                        );
                        let mut data = self.flash[start..end].to_vec();
                        data.resize(count, 0xFF);
                        if let Some(at) = self.corrupt_at {
                            if (start..start + count).contains(&at) {
                                data[at - start] ^= 0xFF;
                            }
                        }
                        self.read_addr += count;
                        self.outbound
                            .extend(data);
                        self.reply(opcode);
                    }
                }
                3
            },
            _ => 1,
        };

        self.pending
            .drain(..consumed);
        true
    }

    fn run_simple(&mut self, opcode: u8) {
        self.commands
            .push(opcode);
        if self.silent {
            return;
        }
        match opcode {
            0x22 => {
                let info = self.board_info();
                self.outbound
                    .extend(info);
            },
            0x23 => {
                self.flash
                    .clear();
            },
            0x24 => {
                self.read_addr = 0;
            },
            _ => {},
        }
        self.reply(opcode);
    }
}

impl Read for SimBootloader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self
            .outbound
            .is_empty()
        {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "no data"));
        }
        let n = buf
            .len()
            .min(
                self.outbound
                    .len(),
            );
        for (slot, byte) in buf
            .iter_mut()
            .zip(
                self.outbound
                    .drain(..n),
            )
        {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for SimBootloader {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.wire
            .extend_from_slice(buf);
        self.pending
            .extend_from_slice(buf);
        while self.process_one() {}
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Port for SimBootloader {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeouts
            .push(timeout);
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear_input(&mut self) -> Result<()> {
        self.outbound
            .clear();
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn close(&mut self) -> Result<()> {
        self.closed = true;
        if let Some(log) = &self.close_log {
            if let Ok(mut names) = log.lock() {
                names.push(self.name.clone());
            }
        }
        Ok(())
    }
}

/// Lets a session borrow the simulator so tests can inspect it afterwards.
impl Port for &mut SimBootloader {
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear_input(&mut self) -> Result<()> {
        (**self).clear_input()
    }

    fn name(&self) -> &str {
        (**self).name()
    }

    fn close(&mut self) -> Result<()> {
        (**self).close()
    }
}

use log::{debug, warn};

use crate::err::{SdError, TransferErrorKind};

use super::{constant::*, RegisterTransport, SdHost};

/// What the card sends back for a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    None,
    Short,
    Long,
    /// Short response, then the card holds DAT0 low while busy.
    ShortBusy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataDirection {
    Read,
    Write,
}

#[derive(Debug, Clone, Copy)]
pub struct SdCommand {
    pub opcode: u8,
    pub arg: u32,
    pub resp_type: ResponseKind,
    pub data: Option<DataDirection>,
}

impl SdCommand {
    pub fn new(opcode: u8, arg: u32, resp_type: ResponseKind) -> Self {
        Self {
            opcode,
            arg,
            resp_type,
            data: None,
        }
    }

    pub fn with_data(mut self, dir: DataDirection) -> Self {
        self.data = Some(dir);
        self
    }

    pub fn has_busy(&self) -> bool {
        self.resp_type == ResponseKind::ShortBusy
    }

    /// SDCMD value for this command, without NEW.
    pub fn command_word(&self) -> u32 {
        let mut flags = match self.resp_type {
            ResponseKind::None => CmdFlags::NO_RESPONSE,
            ResponseKind::Short => CmdFlags::empty(),
            ResponseKind::Long => CmdFlags::LONG_RESPONSE,
            ResponseKind::ShortBusy => CmdFlags::BUSYWAIT,
        };
        match self.data {
            Some(DataDirection::Read) => flags |= CmdFlags::READ,
            Some(DataDirection::Write) => flags |= CmdFlags::WRITE,
            None => {}
        }
        (self.opcode as u32 & SDCMD_CMD_MASK) | flags.bits()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SdResponse {
    pub raw: [u32; 4],
}

impl SdResponse {
    pub fn new() -> Self {
        Self { raw: [0; 4] }
    }

    pub fn as_r1(&self) -> u32 {
        self.raw[0]
    }

    pub fn as_r2(&self) -> [u32; 4] {
        self.raw
    }

    pub fn as_r3(&self) -> u32 {
        self.raw[0]
    }

    pub fn as_r6(&self) -> u32 {
        self.raw[0]
    }

    pub fn as_r7(&self) -> u32 {
        self.raw[0]
    }
}

/// Map the error bits of SDHSTS to a driver error. `None` if no error bit is set.
pub fn classify_hsts(hsts: u32) -> Option<SdError> {
    let hsts = Hsts::from_bits_truncate(hsts);
    if hsts.contains(Hsts::CMD_TIME_OUT) {
        Some(SdError::CommandTimeout)
    } else if hsts.contains(Hsts::CRC7_ERROR) {
        Some(SdError::Transfer(TransferErrorKind::Crc7))
    } else if hsts.contains(Hsts::CRC16_ERROR) {
        Some(SdError::Transfer(TransferErrorKind::Crc16))
    } else if hsts.contains(Hsts::FIFO_ERROR) {
        Some(SdError::Transfer(TransferErrorKind::Fifo))
    } else if hsts.contains(Hsts::REW_TIME_OUT) {
        Some(SdError::Transfer(TransferErrorKind::ReadWriteTimeout))
    } else {
        None
    }
}

impl<T: RegisterTransport> SdHost<T> {
    /// Issue one command and wait for it to complete.
    pub fn issue(&mut self, cmd: &SdCommand) -> Result<SdResponse, SdError> {
        self.wait_cmd_idle()?;
        self.start_command(cmd);
        self.finish_command(cmd)
    }

    /// Wait for the command in flight to complete and collect its response.
    pub(crate) fn finish_command(&mut self, cmd: &SdCommand) -> Result<SdResponse, SdError> {
        let sdcmd = self.wait_cmd_idle()?;

        let resp = self.read_response(cmd.resp_type);

        if sdcmd & CmdFlags::FAIL.bits() != 0 {
            let hsts = self.read_reg(SDHSTS);
            let err = classify_hsts(hsts).unwrap_or(SdError::UnknownCommandError);
            debug!("CMD{} failed: {}, hsts {:#x}", cmd.opcode, err, hsts);
            return Err(err);
        }

        Ok(resp)
    }

    /// Write ARG and CMD for `cmd` without waiting for completion.
    /// The caller must have seen NEW clear.
    pub(crate) fn start_command(&mut self, cmd: &SdCommand) {
        self.clear_errors(cmd.has_busy());
        self.write_reg(SDARG, cmd.arg);
        self.write_reg(SDCMD, cmd.command_word() | CmdFlags::NEW.bits());
        self.current_cmd = cmd.opcode;
        self.transport.fence();
    }

    /// Busy-wait for SDCMD NEW to clear. Returns the final SDCMD value.
    pub(crate) fn wait_cmd_idle(&mut self) -> Result<u32, SdError> {
        let mut countdown = self.config.cmd_budget.countdown();
        loop {
            let sdcmd = self.read_reg(SDCMD);
            if sdcmd & CmdFlags::NEW.bits() == 0 {
                return Ok(sdcmd);
            }
            if !countdown.tick(&mut self.transport) {
                warn!(
                    "timeout waiting for CMD{} to complete, sdcmd {:#x}",
                    self.current_cmd, sdcmd
                );
                return Err(SdError::CommandTimeout);
            }
        }
    }

    /// Write back any error bits left in SDHSTS, and a stale busy
    /// interrupt if the next command waits on one.
    fn clear_errors(&mut self, busy: bool) {
        let hsts = self.read_reg(SDHSTS);
        let mut stale = Hsts::ERROR_MASK;
        if busy {
            stale |= Hsts::BUSY_IRPT;
        }
        let stale = hsts & stale.bits();
        if stale != 0 {
            self.write_reg(SDHSTS, stale);
        }
    }

    fn read_response(&mut self, kind: ResponseKind) -> SdResponse {
        match kind {
            ResponseKind::None => {}
            ResponseKind::Short | ResponseKind::ShortBusy => {
                self.r[0] = self.read_reg(SDRSP0);
            }
            ResponseKind::Long => {
                for (i, reg) in SDRSP.iter().enumerate() {
                    self.r[i] = self.read_reg(*reg);
                }
            }
        }
        SdResponse { raw: self.r }
    }

    /// Send a command that has no response.
    pub(crate) fn send_no_resp(&mut self, opcode: u8, arg: u32) -> Result<(), SdError> {
        self.issue(&SdCommand::new(opcode, arg, ResponseKind::None)).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_words() {
        let cmd = SdCommand::new(0, 0, ResponseKind::None);
        assert_eq!(cmd.command_word(), 0x400);

        let cmd = SdCommand::new(2, 0, ResponseKind::Long);
        assert_eq!(cmd.command_word(), 0x202);

        let cmd = SdCommand::new(17, 0, ResponseKind::ShortBusy).with_data(DataDirection::Read);
        assert_eq!(cmd.command_word(), 17 | 0x800 | 0x40);

        let cmd = SdCommand::new(24, 0, ResponseKind::Short).with_data(DataDirection::Write);
        assert_eq!(cmd.command_word(), 24 | 0x80);
        assert!(!cmd.has_busy());
    }

    #[test]
    fn hsts_classification_order() {
        assert_eq!(classify_hsts(0x40 | 0x20), Some(SdError::CommandTimeout));
        assert_eq!(
            classify_hsts(0x10),
            Some(SdError::Transfer(TransferErrorKind::Crc7))
        );
        assert_eq!(
            classify_hsts(0x20 | 0x08),
            Some(SdError::Transfer(TransferErrorKind::Crc16))
        );
        assert_eq!(
            classify_hsts(0x08),
            Some(SdError::Transfer(TransferErrorKind::Fifo))
        );
        assert_eq!(
            classify_hsts(0x80),
            Some(SdError::Transfer(TransferErrorKind::ReadWriteTimeout))
        );
        assert_eq!(classify_hsts(0x01 | 0x400), None);
    }
}

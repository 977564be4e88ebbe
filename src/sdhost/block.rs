// ===== Data Transfer Engine =====

use log::{debug, warn};

use crate::constant::*;
use crate::err::{SdError, TransferErrorKind};
use crate::timer::Deadline;

use super::{
    cmd::{classify_hsts, DataDirection},
    constant::*,
    RegisterTransport, SdCommand, SdHost, SdResponse,
};

pub enum DataBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// A data phase in progress: the buffer, a byte cursor and the blocks left.
pub struct DataTransfer<'a> {
    buf: DataBuffer<'a>,
    cursor: usize,
    blocks: u32,
    block_size: u32,
}

impl<'a> DataTransfer<'a> {
    pub fn new(buf: DataBuffer<'a>, blocks: u32, block_size: u32) -> Result<Self, SdError> {
        let len = match &buf {
            DataBuffer::Read(b) => b.len(),
            DataBuffer::Write(b) => b.len(),
        };
        if blocks == 0 || block_size % 4 != 0 || len < blocks as usize * block_size as usize {
            return Err(SdError::InvalidArgument);
        }
        Ok(Self {
            buf,
            cursor: 0,
            blocks,
            block_size,
        })
    }

    pub fn direction(&self) -> DataDirection {
        match self.buf {
            DataBuffer::Read(_) => DataDirection::Read,
            DataBuffer::Write(_) => DataDirection::Write,
        }
    }

    pub fn blocks_remaining(&self) -> u32 {
        self.blocks
    }

    pub fn bytes_transferred(&self) -> usize {
        self.cursor
    }

    pub fn is_done(&self) -> bool {
        self.blocks == 0
    }

    fn next_word(&mut self) -> u32 {
        let word = match &self.buf {
            DataBuffer::Write(b) => {
                u32::from_le_bytes([b[self.cursor], b[self.cursor + 1], b[self.cursor + 2], b[self.cursor + 3]])
            }
            DataBuffer::Read(_) => 0,
        };
        self.cursor += 4;
        word
    }

    fn put_word(&mut self, word: u32) {
        if let DataBuffer::Read(b) = &mut self.buf {
            b[self.cursor..self.cursor + 4].copy_from_slice(&word.to_le_bytes());
        }
        self.cursor += 4;
    }
}

fn fsm_in_transfer(fsm: u32, is_read: bool) -> bool {
    if is_read {
        matches!(fsm, SDEDM_FSM_READDATA | SDEDM_FSM_READWAIT | SDEDM_FSM_READCRC)
    } else {
        matches!(
            fsm,
            SDEDM_FSM_WRITEDATA
                | SDEDM_FSM_WRITEWAIT1
                | SDEDM_FSM_WRITEWAIT2
                | SDEDM_FSM_WRITECRC
                | SDEDM_FSM_WRITESTART1
                | SDEDM_FSM_WRITESTART2
        )
    }
}

fn edm_fifo_fill(edm: u32) -> u32 {
    (edm >> SDEDM_FIFO_FILL_SHIFT) & SDEDM_FIFO_FILL_MASK
}

impl<T: RegisterTransport> SdHost<T> {
    /// LBA to the address the card expects: bytes for standard capacity.
    pub fn card_address(&self, sector: u32) -> Result<u32, SdError> {
        if self.high_capacity {
            Ok(sector)
        } else {
            sector.checked_mul(SD_BLOCK_SIZE).ok_or(SdError::InvalidArgument)
        }
    }

    /// Read `count` blocks starting at `sector`, word by word from the FIFO.
    /// With no destination the data is drained and discarded.
    pub fn read_sectors(
        &mut self,
        sector: u32,
        buf: Option<&mut [u8]>,
        count: u32,
    ) -> Result<(), SdError> {
        let words = SD_BLOCK_WORDS * count as usize;
        if count == 0 || buf.as_ref().is_some_and(|b| b.len() < words * 4) {
            return Err(SdError::InvalidArgument);
        }

        self.sampler.reset();
        self.write_reg(SDHBCT, self.block_size);
        self.write_reg(SDHBLC, count);
        self.sample(0, false);

        self.ensure_ready()?;
        let addr = self.card_address(sector)?;

        debug!("reading {} block(s) from sector {} (arg {:#x})", count, sector, addr);

        self.sample(1, false);
        let result = self.read_data_phase(addr, buf, words, count);

        self.sample(4, false);
        let stop = self.issue(&SdCommand::new(MMC_STOP_TRANSMISSION, 0, MMC_RSP_R1B));
        self.sample(5, false);

        if let Err(err) = result {
            warn!("read of sector {} failed: {}", sector, err);
            return Err(err);
        }
        // Data phase complete: a failed STOP does not fail the read.
        if let Err(err) = stop {
            warn!("STOP after reading sector {} failed: {}", sector, err);
        }
        Ok(())
    }

    fn read_data_phase(
        &mut self,
        addr: u32,
        buf: Option<&mut [u8]>,
        words: usize,
        count: u32,
    ) -> Result<(), SdError> {
        self.drain_fifo()?;

        let opcode = if count == 1 {
            MMC_READ_SINGLE_BLOCK
        } else {
            MMC_READ_MULTIPLE_BLOCK
        };
        self.issue(&SdCommand::new(opcode, addr, MMC_RSP_R1B).with_data(DataDirection::Read))?;
        self.sample(2, true);

        let mut out = buf.map(|b| b.chunks_exact_mut(4));
        for i in 0..words {
            self.sample(3, false);
            self.wait_fifo_data()?;

            let hsts = self.read_reg(SDHSTS);
            if hsts & Hsts::ERROR_MASK.bits() != 0 {
                let edm = self.read_reg(SDEDM);
                warn!("transfer error on FIFO word {}: hsts {:#x} edm {:#x}", i, hsts, edm);
                return Err(classify_hsts(hsts).unwrap_or(SdError::UnknownCommandError));
            }

            let word = self.read_reg(SDDATA);
            if let Some(chunk) = out.as_mut().and_then(|chunks| chunks.next()) {
                chunk.copy_from_slice(&word.to_le_bytes());
            }
        }

        Ok(())
    }

    fn wait_fifo_data(&mut self) -> Result<(), SdError> {
        let mut countdown = self.config.fifo_budget.countdown();
        loop {
            let hsts = self.read_reg(SDHSTS);
            if hsts & Hsts::DATA_FLAG.bits() != 0 {
                return Ok(());
            }
            if let Some(err) = classify_hsts(hsts) {
                return Err(err);
            }
            self.sample(3, false);
            if !countdown.tick(&mut self.transport) {
                warn!("no FIFO data after {}us", self.config.fifo_budget.max_wait_us());
                return Err(SdError::Transfer(TransferErrorKind::ReadWriteTimeout));
            }
        }
    }

    /// Discard whatever is left in the FIFO before a new read.
    fn drain_fifo(&mut self) -> Result<(), SdError> {
        self.wait_cmd_idle()?;

        let mut countdown = self.config.drain_budget.countdown();
        while self.read_reg(SDHSTS) & Hsts::DATA_FLAG.bits() != 0 {
            if !countdown.tick(&mut self.transport) {
                warn!("FIFO still has data after draining");
                return Err(SdError::Transfer(TransferErrorKind::Fifo));
            }
            self.read_reg(SDDATA);
            self.transport.fence();
        }
        Ok(())
    }

    pub(crate) fn drain_fifo_nowait(&mut self) {
        let mut countdown = self.config.drain_budget.countdown();
        loop {
            self.read_reg(SDDATA);
            if self.read_reg(SDHSTS) != Hsts::DATA_FLAG.bits() {
                break;
            }
            if !countdown.tick(&mut self.transport) {
                break;
            }
        }
    }

    /// Write `count` blocks from `buf` starting at `sector`, then wait for the
    /// card to leave the programming state.
    pub fn write_sectors(&mut self, sector: u32, buf: &[u8], count: u32) -> Result<(), SdError> {
        self.ensure_ready()?;
        let addr = self.card_address(sector)?;
        let mut data = DataTransfer::new(DataBuffer::Write(buf), count, self.block_size)?;

        debug!("writing {} block(s) to sector {} (arg {:#x})", count, sector, addr);

        let opcode = if count == 1 {
            MMC_WRITE_BLOCK
        } else {
            MMC_WRITE_MULTIPLE_BLOCK
        };
        let cmd = SdCommand::new(opcode, addr, MMC_RSP_R1).with_data(DataDirection::Write);
        self.send_cmd(&cmd, Some(&mut data))?;

        if count > 1 {
            let stop = SdCommand::new(MMC_STOP_TRANSMISSION, 0, MMC_RSP_R1B);
            self.send_cmd(&stop, None).inspect_err(|err| {
                warn!("failed to send stop after multi-block write: {}", err);
            })?;
        }

        self.poll_card_status()
    }

    /// Issue a command and pump its busy phase and data phase to completion.
    pub fn send_cmd(
        &mut self,
        cmd: &SdCommand,
        mut data: Option<&mut DataTransfer<'_>>,
    ) -> Result<SdResponse, SdError> {
        let edm = self.read_reg(SDEDM);
        let fsm = edm & SDEDM_FSM_MASK;
        if fsm != SDEDM_FSM_IDENTMODE
            && fsm != SDEDM_FSM_DATAMODE
            && cmd.opcode != MMC_STOP_TRANSMISSION
        {
            warn!(
                "previous command (CMD{}) not complete (EDM {:#x})",
                self.current_cmd, edm
            );
            return Err(SdError::Busy);
        }

        self.wait_cmd_idle()?;
        if let Some(d) = data.as_deref() {
            self.prepare_data(d);
        }
        self.start_command(cmd);

        let mut use_busy = cmd.has_busy();
        let mut resp = SdResponse::new();
        if !use_busy {
            resp = self.finish_command(cmd)?;
        }

        let deadline = Deadline::after(&self.transport, self.config.pump_timeout_us);
        while use_busy || data.as_deref().is_some_and(|d| !d.is_done()) {
            if deadline.expired(&self.transport) {
                warn!(
                    "CMD{} still pending after {}us",
                    cmd.opcode, self.config.pump_timeout_us
                );
                return Err(SdError::CommandTimeout);
            }

            let hsts = self.read_reg(SDHSTS);
            if data.is_some() {
                check_data_error(hsts)?;
            }
            if use_busy {
                if let Some(err) = classify_hsts(hsts) {
                    debug!("CMD{} busy phase failed: hsts {:#x}", cmd.opcode, hsts);
                    return Err(err);
                }
                if hsts & Hsts::BUSY_IRPT.bits() != 0 {
                    self.write_reg(SDHSTS, Hsts::BUSY_IRPT.bits());
                    use_busy = false;
                    resp = self.finish_command(cmd)?;
                }
            }

            if let Some(d) = data.as_deref_mut() {
                if !d.is_done() {
                    self.transfer_pio(d)?;
                    if d.is_done() {
                        self.wait_transfer_complete()?;
                    }
                }
            }

            if use_busy {
                self.transport.delay_us(PUMP_POLL_US);
            }
        }

        Ok(resp)
    }

    fn prepare_data(&mut self, data: &DataTransfer<'_>) {
        self.write_reg(SDHBCT, data.block_size);
        self.write_reg(SDHBLC, data.blocks);
    }

    fn transfer_pio(&mut self, data: &mut DataTransfer<'_>) -> Result<(), SdError> {
        let is_read = data.direction() == DataDirection::Read;
        self.transfer_block_pio(data, is_read)?;
        data.blocks -= 1;

        let hsts = Hsts::from_bits_truncate(self.read_reg(SDHSTS));
        if hsts.intersects(Hsts::CRC16_ERROR | Hsts::CRC7_ERROR | Hsts::FIFO_ERROR) {
            warn!("{} transfer error - HSTS {:#x}", if is_read { "read" } else { "write" }, hsts.bits());
        } else if hsts.intersects(Hsts::CMD_TIME_OUT | Hsts::REW_TIME_OUT) {
            warn!("{} timeout error - HSTS {:#x}", if is_read { "read" } else { "write" }, hsts.bits());
        }
        match classify_hsts(hsts.bits()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn transfer_block_pio(&mut self, data: &mut DataTransfer<'_>, is_read: bool) -> Result<(), SdError> {
        let mut copy_words = data.block_size / 4;
        let mut countdown = self.config.pio_budget.countdown();

        while copy_words > 0 {
            let burst_words = copy_words.min(FIFO_BURST_WORDS);
            let edm = self.read_reg(SDEDM);
            let mut words = if is_read {
                edm_fifo_fill(edm)
            } else {
                FIFO_WORDS.saturating_sub(edm_fifo_fill(edm))
            };

            if words < burst_words {
                let fsm = edm & SDEDM_FSM_MASK;
                if !fsm_in_transfer(fsm, is_read) {
                    let hsts = self.read_reg(SDHSTS);
                    debug!("fsm {:#x}, hsts {:#010x}", fsm, hsts);
                    if hsts & Hsts::ERROR_MASK.bits() != 0 {
                        break;
                    }
                }
                if !countdown.tick(&mut self.transport) {
                    warn!("FIFO stalled with {} words left in block", copy_words);
                    return Err(SdError::Transfer(TransferErrorKind::ReadWriteTimeout));
                }
                continue;
            } else if words > copy_words {
                words = copy_words;
            }
            copy_words -= words;

            for _ in 0..words {
                if is_read {
                    let word = self.read_reg(SDDATA);
                    data.put_word(word);
                } else {
                    let word = data.next_word();
                    self.write_reg(SDDATA, word);
                }
            }
        }

        Ok(())
    }

    fn wait_transfer_complete(&mut self) -> Result<(), SdError> {
        let deadline = Deadline::after(&self.transport, self.config.complete_timeout_us);
        loop {
            let edm = self.read_reg(SDEDM);
            let fsm = edm & SDEDM_FSM_MASK;

            if fsm == SDEDM_FSM_IDENTMODE || fsm == SDEDM_FSM_DATAMODE {
                return Ok(());
            }
            if matches!(fsm, SDEDM_FSM_READWAIT | SDEDM_FSM_WRITESTART1 | SDEDM_FSM_READDATA) {
                self.write_reg(SDEDM, edm | SDEDM_FORCE_DATA_MODE);
                return Ok(());
            }
            if deadline.expired(&self.transport) {
                warn!("wait_transfer_complete: FSM stuck in {:#x}", fsm);
                return Err(SdError::Transfer(TransferErrorKind::ReadWriteTimeout));
            }
            self.transport.delay_us(1);
        }
    }

    /// Poll SEND_STATUS until the card is ready for data and out of the
    /// programming state.
    pub fn poll_card_status(&mut self) -> Result<(), SdError> {
        let cmd = SdCommand::new(MMC_SEND_STATUS, self.rca << 16, MMC_RSP_R1);
        let mut failures = 0;

        for _ in 0..self.config.status_polls {
            match self.send_cmd(&cmd, None) {
                Ok(resp) => {
                    let status = resp.as_r1();
                    if status & MMC_STATUS_RDY_FOR_DATA != 0
                        && status & MMC_STATUS_CURR_STATE != MMC_STATE_PRG
                    {
                        return Ok(());
                    }
                    if status & MMC_STATUS_MASK != 0 {
                        warn!("Status Error: {:#010X}", status);
                        return Err(SdError::CardStatus(status));
                    }
                }
                Err(err) => {
                    failures += 1;
                    if failures > self.config.status_retries {
                        return Err(err);
                    }
                    debug!("SEND_STATUS failed ({}), retry {}", err, failures);
                }
            }
            self.transport.delay_us(self.config.status_poll_interval_us);
        }

        warn!("Timeout waiting card ready");
        Err(SdError::CommandTimeout)
    }
}

fn check_data_error(hsts: u32) -> Result<(), SdError> {
    let hsts = Hsts::from_bits_truncate(hsts);
    if hsts.contains(Hsts::CRC16_ERROR) {
        Err(SdError::Transfer(TransferErrorKind::Crc16))
    } else if hsts.contains(Hsts::FIFO_ERROR) {
        Err(SdError::Transfer(TransferErrorKind::Fifo))
    } else if hsts.contains(Hsts::REW_TIME_OUT) {
        Err(SdError::Transfer(TransferErrorKind::ReadWriteTimeout))
    } else {
        Ok(())
    }
}

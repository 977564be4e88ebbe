#![allow(dead_code)]

//! Register-level model of the BCM2835 SDHOST block with one SD card attached.

use std::collections::{HashMap, VecDeque};

use sdhost::sdhost::constant::*;
use sdhost::{Budget, HostConfig, RegisterTransport, SdHost};

pub const BLOCK: usize = 512;
const BLOCK_WORDS: usize = BLOCK / 4;

pub const RCA: u32 = 0xB368;
pub const STATUS_TRAN_READY: u32 = (1 << 8) | (4 << 9);
pub const STATUS_PRG: u32 = 7 << 9;

/// Set `value` at bits [start + size - 1 : start] of a 128-bit register held
/// least-significant word first.
pub fn stuff(reg: &mut [u32; 4], start: u32, size: u32, value: u32) {
    for i in 0..size {
        let bit = start + i;
        if value >> i & 1 != 0 {
            reg[(bit / 32) as usize] |= 1 << (bit % 32);
        }
    }
}

#[derive(Debug, Clone)]
pub struct CardModel {
    /// Answers CMD8.
    pub sd_v2: bool,
    pub high_capacity: bool,
    pub cid: [u32; 4],
    pub csd: [u32; 4],
    /// ACMD41 reports ready on this poll (1-based).
    pub ready_on_poll: u32,
}

impl CardModel {
    fn cid() -> [u32; 4] {
        let mut cid = [0u32; 4];
        stuff(&mut cid, 120, 8, 0x1B);
        stuff(&mut cid, 104, 16, u16::from_be_bytes(*b"SM") as u32);
        for (i, c) in b"EB1QT".iter().enumerate() {
            stuff(&mut cid, 96 - 8 * i as u32, 8, *c as u32);
        }
        stuff(&mut cid, 56, 8, 0x30);
        stuff(&mut cid, 24, 32, 0x1234_5678);
        stuff(&mut cid, 8, 12, (21 << 4) | 3);
        cid
    }

    /// SDHC card with a CSD 2.0 register.
    pub fn sdhc(c_size: u32) -> Self {
        let mut csd = [0u32; 4];
        stuff(&mut csd, 126, 2, 1);
        stuff(&mut csd, 48, 22, c_size);
        Self {
            sd_v2: true,
            high_capacity: true,
            cid: Self::cid(),
            csd,
            ready_on_poll: 1,
        }
    }

    /// Standard-capacity card with a CSD 1.0 register. `sd_v2` selects
    /// whether it answers CMD8.
    pub fn sdsc(sd_v2: bool) -> Self {
        // 1 GB: C_SIZE 3839, C_SIZE_MULT 7, READ_BL_LEN 9
        let mut csd = [0u32; 4];
        stuff(&mut csd, 62, 12, 3839);
        stuff(&mut csd, 47, 3, 7);
        stuff(&mut csd, 80, 4, 9);
        Self {
            sd_v2,
            high_capacity: false,
            cid: Self::cid(),
            csd,
            ready_on_poll: 1,
        }
    }

    pub fn ready_on_poll(mut self, poll: u32) -> Self {
        self.ready_on_poll = poll;
        self
    }
}

#[derive(Debug, Default)]
struct WriteStream {
    block: u32,
    words: Vec<u32>,
    expected: usize,
}

#[derive(Debug)]
pub struct SimSdHost {
    pub card: CardModel,
    pub storage: HashMap<u32, [u8; BLOCK]>,

    cmd: u32,
    arg: u32,
    hsts: u32,
    edm: u32,
    fsm: u32,
    rsp: [u32; 4],
    regs: HashMap<u32, u32>,
    fifo: VecDeque<u32>,
    write: Option<WriteStream>,

    app_cmd: bool,
    op_cond_polls: u32,

    now: u64,
    /// Every register write, in order.
    pub writes: Vec<(u32, u32)>,
    /// Every command started, as (opcode, argument).
    pub commands: Vec<(u8, u32)>,
    pub data_reads: usize,
    pub pinmux_calls: u32,

    /// SDCMD reads left that still report NEW. `u32::MAX` never clears.
    pub hold_new: u32,
    /// SDCMD was written while NEW was still reported.
    pub wrote_while_pending: bool,
    /// Raise CRC16 once this many data words have been read.
    pub crc16_after_words: Option<usize>,
    /// SEND_STATUS replies in the programming state before the card is ready.
    pub status_prg_polls: u32,
    /// SEND_STATUS commands that time out before one succeeds.
    pub status_timeouts: u32,
    /// Fixed SEND_STATUS reply, overriding the ready state.
    pub status_override: Option<u32>,
    /// STOP_TRANSMISSION commands that time out before one succeeds.
    pub stop_timeouts: u32,
    /// Delay between a busy-wait command and its BUSY_IRPT.
    pub busy_delay_us: u64,
    /// EDM reads during a write that report a full FIFO.
    pub write_stall_reads: u32,
    /// Raise these HSTS bits once this many words of a write stream have
    /// been accepted (0: as soon as the write command starts).
    pub write_error: Option<(usize, Hsts)>,
    /// FSM state left behind when a data phase completes, instead of DATA.
    pub end_fsm: Option<u32>,

    busy_at: Option<u64>,
    write_failed: bool,
}

impl SimSdHost {
    pub fn new(card: CardModel) -> Self {
        Self {
            card,
            storage: HashMap::new(),
            cmd: 0,
            arg: 0,
            hsts: 0,
            edm: 0,
            fsm: SDEDM_FSM_IDENTMODE,
            rsp: [0; 4],
            regs: HashMap::new(),
            fifo: VecDeque::new(),
            write: None,
            app_cmd: false,
            op_cond_polls: 0,
            now: 0,
            writes: Vec::new(),
            commands: Vec::new(),
            data_reads: 0,
            pinmux_calls: 0,
            hold_new: 0,
            wrote_while_pending: false,
            crc16_after_words: None,
            status_prg_polls: 0,
            status_timeouts: 0,
            status_override: None,
            stop_timeouts: 0,
            busy_delay_us: 0,
            write_stall_reads: 0,
            write_error: None,
            end_fsm: None,
            busy_at: None,
            write_failed: false,
        }
    }

    pub fn reg(&self, offset: u32) -> u32 {
        self.regs.get(&offset).copied().unwrap_or(0)
    }

    pub fn powered(&self) -> bool {
        self.reg(SDVDD) & 1 != 0
    }

    pub fn count_cmd(&self, opcode: u8) -> usize {
        self.commands.iter().filter(|(op, _)| *op == opcode).count()
    }

    pub fn args_of(&self, opcode: u8) -> Vec<u32> {
        self.commands
            .iter()
            .filter(|(op, _)| *op == opcode)
            .map(|(_, arg)| *arg)
            .collect()
    }

    pub fn clear_logs(&mut self) {
        self.writes.clear();
        self.commands.clear();
        self.data_reads = 0;
    }

    pub fn fill_block(&mut self, block: u32, byte: u8) {
        self.storage.insert(block, [byte; BLOCK]);
    }

    fn block_word(&self, block: u32, word: usize) -> u32 {
        match self.storage.get(&block) {
            Some(data) => u32::from_le_bytes([
                data[word * 4],
                data[word * 4 + 1],
                data[word * 4 + 2],
                data[word * 4 + 3],
            ]),
            None => 0,
        }
    }

    fn fail(&mut self, bits: Hsts) {
        self.cmd |= CmdFlags::FAIL.bits();
        self.hsts |= bits.bits();
    }

    /// Abort the write stream: the card stops taking data and the FIFO stays
    /// full.
    fn fail_write(&mut self, bits: Hsts) {
        self.hsts |= bits.bits();
        self.write = None;
        self.write_error = None;
        self.write_failed = true;
        self.fsm = SDEDM_FSM_DATAMODE;
    }

    fn data_phase_done(&mut self) {
        self.fsm = self.end_fsm.unwrap_or(SDEDM_FSM_DATAMODE);
    }

    fn edm_fifo_fill(&mut self) -> u32 {
        if self.write_failed {
            return FIFO_WORDS;
        }
        if self.write.is_some() && self.write_stall_reads > 0 {
            self.write_stall_reads -= 1;
            return FIFO_WORDS;
        }
        self.fifo.len().min(FIFO_WORDS as usize) as u32
    }

    /// Address argument to a block index, rejecting misaligned byte addresses.
    fn block_of(&self, arg: u32) -> Option<u32> {
        if self.card.high_capacity {
            Some(arg)
        } else if arg % BLOCK as u32 == 0 {
            Some(arg / BLOCK as u32)
        } else {
            None
        }
    }

    fn execute(&mut self, word: u32) {
        let opcode = (word & SDCMD_CMD_MASK) as u8;
        let flags = CmdFlags::from_bits_truncate(word);
        let arg = self.arg;
        self.cmd = word & !CmdFlags::NEW.bits();
        self.commands.push((opcode, arg));
        self.write_failed = false;

        if !self.powered() && opcode != 0 {
            self.fail(Hsts::CMD_TIME_OUT);
            return;
        }

        let app_cmd = std::mem::take(&mut self.app_cmd);
        match opcode {
            0 => {
                self.op_cond_polls = 0;
            }
            8 => {
                if self.card.sd_v2 {
                    self.rsp[0] = arg & 0xFFF;
                } else {
                    self.fail(Hsts::CMD_TIME_OUT);
                }
            }
            55 => {
                self.app_cmd = true;
                self.rsp[0] = 0x120;
            }
            41 if app_cmd => {
                self.op_cond_polls += 1;
                let mut ocr = 0x00FF_8000;
                if self.op_cond_polls >= self.card.ready_on_poll {
                    ocr |= 1 << 31;
                    if self.card.high_capacity && arg & (1 << 30) != 0 {
                        ocr |= 1 << 30;
                    }
                }
                self.rsp[0] = ocr;
            }
            2 => self.rsp = self.card.cid,
            3 => self.rsp[0] = (RCA << 16) | 0x0500,
            10 if arg == RCA << 16 => self.rsp = self.card.cid,
            9 if arg == RCA << 16 => self.rsp = self.card.csd,
            7 if arg == RCA << 16 => {
                self.rsp[0] = 0x0700;
                self.fsm = SDEDM_FSM_DATAMODE;
            }
            16 => self.rsp[0] = 0x0900,
            17 | 18 if flags.contains(CmdFlags::READ) => {
                let Some(block) = self.block_of(arg) else {
                    self.fail(Hsts::CMD_TIME_OUT);
                    return;
                };
                let count = if opcode == 17 { 1 } else { self.reg(SDHBLC) };
                for b in 0..count {
                    for w in 0..BLOCK_WORDS {
                        let word = self.block_word(block + b, w);
                        self.fifo.push_back(word);
                    }
                }
                self.fsm = SDEDM_FSM_READDATA;
                self.rsp[0] = 0x0900;
            }
            24 | 25 if flags.contains(CmdFlags::WRITE) => {
                let Some(block) = self.block_of(arg) else {
                    self.fail(Hsts::CMD_TIME_OUT);
                    return;
                };
                let count = if opcode == 24 { 1 } else { self.reg(SDHBLC) };
                self.write = Some(WriteStream {
                    block,
                    words: Vec::new(),
                    expected: count as usize * BLOCK_WORDS,
                });
                self.fsm = SDEDM_FSM_WRITEDATA;
                self.rsp[0] = 0x0900;
                if let Some((0, bits)) = self.write_error {
                    self.fail_write(bits);
                }
            }
            12 => {
                if self.stop_timeouts > 0 {
                    self.stop_timeouts -= 1;
                    self.fail(Hsts::CMD_TIME_OUT);
                    return;
                }
                self.fifo.clear();
                self.write = None;
                self.fsm = SDEDM_FSM_DATAMODE;
                self.rsp[0] = 0x0B00;
            }
            13 => {
                if self.status_timeouts > 0 {
                    self.status_timeouts -= 1;
                    self.fail(Hsts::CMD_TIME_OUT);
                    return;
                }
                self.rsp[0] = if let Some(status) = self.status_override {
                    status
                } else if self.status_prg_polls > 0 {
                    self.status_prg_polls -= 1;
                    STATUS_PRG
                } else {
                    STATUS_TRAN_READY
                };
            }
            _ => {
                self.fail(Hsts::CMD_TIME_OUT);
                return;
            }
        }

        if flags.contains(CmdFlags::BUSYWAIT) {
            if self.busy_delay_us == 0 {
                self.hsts |= Hsts::BUSY_IRPT.bits();
            } else {
                self.busy_at = Some(self.now + self.busy_delay_us);
            }
        }
    }

    fn pop_data(&mut self) -> u32 {
        if self.crc16_after_words == Some(self.data_reads) {
            self.hsts |= Hsts::CRC16_ERROR.bits();
            self.fifo.clear();
        }
        let word = self.fifo.pop_front().unwrap_or(0);
        self.data_reads += 1;
        if self.fifo.is_empty() && self.fsm == SDEDM_FSM_READDATA {
            self.data_phase_done();
        }
        word
    }

    fn push_data(&mut self, word: u32) {
        if self.write_failed {
            return;
        }
        let Some(stream) = self.write.as_mut() else {
            self.hsts |= Hsts::FIFO_ERROR.bits();
            return;
        };
        stream.words.push(word);
        let pushed = stream.words.len();
        let expected = stream.expected;
        if let Some((after, bits)) = self.write_error {
            if pushed == after {
                self.fail_write(bits);
                return;
            }
        }
        if pushed < expected {
            return;
        }
        let stream = self.write.take().unwrap_or_default();
        for (i, chunk) in stream.words.chunks(BLOCK_WORDS).enumerate() {
            let mut data = [0u8; BLOCK];
            for (j, w) in chunk.iter().enumerate() {
                data[j * 4..j * 4 + 4].copy_from_slice(&w.to_le_bytes());
            }
            self.storage.insert(stream.block + i as u32, data);
        }
        self.data_phase_done();
    }
}

impl RegisterTransport for SimSdHost {
    fn read32(&mut self, offset: u32) -> u32 {
        match offset {
            SDCMD => {
                if self.hold_new > 0 {
                    if self.hold_new != u32::MAX {
                        self.hold_new -= 1;
                    }
                    self.cmd | CmdFlags::NEW.bits()
                } else {
                    self.cmd
                }
            }
            SDARG => self.arg,
            SDHSTS => {
                if self.busy_at.is_some_and(|at| self.now >= at) {
                    self.busy_at = None;
                    self.hsts |= Hsts::BUSY_IRPT.bits();
                }
                let mut hsts = self.hsts;
                if !self.fifo.is_empty() {
                    hsts |= Hsts::DATA_FLAG.bits();
                }
                hsts
            }
            SDEDM => {
                let fill = self.edm_fifo_fill();
                (self.edm & !(SDEDM_FSM_MASK | SDEDM_FIFO_FILL_MASK << SDEDM_FIFO_FILL_SHIFT))
                    | self.fsm
                    | fill << SDEDM_FIFO_FILL_SHIFT
            }
            SDDATA => self.pop_data(),
            SDRSP0 => self.rsp[0],
            SDRSP1 => self.rsp[1],
            SDRSP2 => self.rsp[2],
            SDRSP3 => self.rsp[3],
            _ => self.reg(offset),
        }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        self.writes.push((offset, value));
        match offset {
            SDCMD => {
                if value & CmdFlags::NEW.bits() != 0 {
                    if self.hold_new > 0 {
                        self.wrote_while_pending = true;
                    }
                    self.execute(value);
                } else {
                    self.cmd = value;
                }
            }
            SDARG => self.arg = value,
            SDHSTS => self.hsts &= !value,
            SDEDM => {
                if value & SDEDM_FORCE_DATA_MODE != 0 {
                    self.fsm = SDEDM_FSM_DATAMODE;
                }
                self.edm = value & !SDEDM_FORCE_DATA_MODE;
            }
            SDDATA => self.push_data(value),
            _ => {
                self.regs.insert(offset, value);
            }
        }
    }

    fn delay_us(&mut self, us: u32) {
        self.now += us as u64;
    }

    fn fence(&mut self) {}

    fn now_us(&self) -> u64 {
        self.now
    }

    fn configure_pinmux(&mut self) {
        self.pinmux_calls += 1;
    }
}

/// Budgets sized so a wedged simulation fails fast.
pub fn test_config() -> HostConfig {
    HostConfig::default().with_cmd_budget(Budget::new(1_000, 1))
}

pub fn start_host(card: CardModel) -> SdHost<SimSdHost> {
    SdHost::start(SimSdHost::new(card), test_config())
}

pub fn pattern(blocks: usize, seed: u8) -> Vec<u8> {
    (0..blocks * BLOCK)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

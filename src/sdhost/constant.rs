#![allow(unused)]

use bitflags::bitflags;

// SDHOST register offsets
pub const SDCMD: u32 = 0x00;
pub const SDARG: u32 = 0x04;
pub const SDTOUT: u32 = 0x08;
pub const SDCDIV: u32 = 0x0C;
pub const SDRSP0: u32 = 0x10;
pub const SDRSP1: u32 = 0x14;
pub const SDRSP2: u32 = 0x18;
pub const SDRSP3: u32 = 0x1C;
pub const SDHSTS: u32 = 0x20;
pub const SDVDD: u32 = 0x30;
pub const SDEDM: u32 = 0x34;
pub const SDHCFG: u32 = 0x38;
pub const SDHBCT: u32 = 0x3C;
pub const SDDATA: u32 = 0x40;
pub const SDHBLC: u32 = 0x50;

pub const SDRSP: [u32; 4] = [SDRSP0, SDRSP1, SDRSP2, SDRSP3];

bitflags! {
    /// SDCMD flag bits above the opcode field.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CmdFlags: u32 {
        const READ = 0x40;
        const WRITE = 0x80;
        const LONG_RESPONSE = 0x200;
        const NO_RESPONSE = 0x400;
        const BUSYWAIT = 0x800;
        const FAIL = 0x4000;
        const NEW = 0x8000;
    }
}

pub const SDCMD_CMD_MASK: u32 = 0x3F;

bitflags! {
    /// SDHSTS status bits. Error bits are cleared by writing them back.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hsts: u32 {
        const DATA_FLAG = 0x01;
        const FIFO_ERROR = 0x08;
        const CRC7_ERROR = 0x10;
        const CRC16_ERROR = 0x20;
        const CMD_TIME_OUT = 0x40;
        const REW_TIME_OUT = 0x80;
        const SDIO_IRPT = 0x100;
        const BLOCK_IRPT = 0x200;
        const BUSY_IRPT = 0x400;

        const TRANSFER_ERROR_MASK = Self::CRC7_ERROR.bits()
            | Self::CRC16_ERROR.bits()
            | Self::REW_TIME_OUT.bits()
            | Self::FIFO_ERROR.bits();
        const ERROR_MASK = Self::CMD_TIME_OUT.bits() | Self::TRANSFER_ERROR_MASK.bits();
    }
}

pub const SDHSTS_CLEAR_ALL: u32 = 0x7F8;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Hcfg: u32 {
        const REL_CMD_LINE = 1 << 0;
        const WIDE_INT_BUS = 1 << 1;
        const WIDE_EXT_BUS = 1 << 2;
        const SLOW_CARD = 1 << 3;
        const DATA_IRPT_EN = 1 << 4;
        const SDIO_IRPT_EN = 1 << 5;
        const BLOCK_IRPT_EN = 1 << 8;
        const BUSY_IRPT_EN = 1 << 10;
    }
}

pub const SDVDD_POWER_OFF: u32 = 0;
pub const SDVDD_POWER_ON: u32 = 1;

// SDEDM fields
pub const SDEDM_FSM_MASK: u32 = 0xF;
pub const SDEDM_FSM_IDENTMODE: u32 = 0x0;
pub const SDEDM_FSM_DATAMODE: u32 = 0x1;
pub const SDEDM_FSM_READDATA: u32 = 0x2;
pub const SDEDM_FSM_WRITEDATA: u32 = 0x3;
pub const SDEDM_FSM_READWAIT: u32 = 0x4;
pub const SDEDM_FSM_READCRC: u32 = 0x5;
pub const SDEDM_FSM_WRITECRC: u32 = 0x6;
pub const SDEDM_FSM_WRITEWAIT1: u32 = 0x7;
pub const SDEDM_FSM_POWERDOWN: u32 = 0x8;
pub const SDEDM_FSM_POWERUP: u32 = 0x9;
pub const SDEDM_FSM_WRITESTART1: u32 = 0xA;
pub const SDEDM_FSM_WRITESTART2: u32 = 0xB;
pub const SDEDM_FSM_GENPULSES: u32 = 0xC;
pub const SDEDM_FSM_WRITEWAIT2: u32 = 0xD;
pub const SDEDM_FSM_STARTPOWDOWN: u32 = 0xF;

pub const SDEDM_FIFO_FILL_SHIFT: u32 = 4;
pub const SDEDM_FIFO_FILL_MASK: u32 = 0x1F;
pub const SDEDM_WRITE_THRESHOLD_SHIFT: u32 = 9;
pub const SDEDM_READ_THRESHOLD_SHIFT: u32 = 14;
pub const SDEDM_THRESHOLD_MASK: u32 = 0x1F;
pub const SDEDM_FORCE_DATA_MODE: u32 = 1 << 19;

pub const SDTOUT_RESET: u32 = 0x00F0_0000;
pub const SDTOUT_STOP: u32 = 0x00A0_0000;
pub const SDHBCT_STOP: u32 = 0x400;

pub const FIFO_WORDS: u32 = 16;
pub const FIFO_BURST_WORDS: u32 = 8;

/// Microseconds to let the controller settle after reset and power changes.
pub const RESET_SETTLE_US: u32 = 300;
pub const STOP_CLOCK_SETTLE_US: u32 = 150;
pub const STOP_IDLE_SETTLE_US: u32 = 500;
/// Pacing of the pump while the card holds the busy line.
pub const PUMP_POLL_US: u32 = 1;

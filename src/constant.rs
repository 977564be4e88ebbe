use crate::sdhost::ResponseKind;

// MMC/SD commands
pub const MMC_GO_IDLE_STATE: u8 = 0;
pub const MMC_ALL_SEND_CID: u8 = 2;
pub const SD_SEND_RELATIVE_ADDR: u8 = 3;
pub const MMC_SELECT_CARD: u8 = 7;
pub const SD_SEND_IF_COND: u8 = 8;
pub const MMC_SEND_CSD: u8 = 9;
pub const MMC_SEND_CID: u8 = 10;
pub const MMC_STOP_TRANSMISSION: u8 = 12;
pub const MMC_SEND_STATUS: u8 = 13;
pub const MMC_SET_BLOCKLEN: u8 = 16;
pub const MMC_READ_SINGLE_BLOCK: u8 = 17;
pub const MMC_READ_MULTIPLE_BLOCK: u8 = 18;
pub const MMC_WRITE_BLOCK: u8 = 24;
pub const MMC_WRITE_MULTIPLE_BLOCK: u8 = 25;
pub const SD_APP_OP_COND: u8 = 41;
pub const MMC_APP_CMD: u8 = 55;

// Response types
pub const MMC_RSP_NONE: ResponseKind = ResponseKind::None;
pub const MMC_RSP_R1: ResponseKind = ResponseKind::Short;
pub const MMC_RSP_R1B: ResponseKind = ResponseKind::ShortBusy;
pub const MMC_RSP_R2: ResponseKind = ResponseKind::Long;
pub const MMC_RSP_R3: ResponseKind = ResponseKind::Short;
pub const MMC_RSP_R6: ResponseKind = ResponseKind::Short;
pub const MMC_RSP_R7: ResponseKind = ResponseKind::Short;

// CMD8 check pattern and supply voltage (2.7-3.6V)
pub const SD_IF_COND_PATTERN: u32 = 0x1AA;

// OCR bits
pub const OCR_BUSY: u32 = 1 << 31;
pub const OCR_HCS: u32 = 1 << 30;
pub const MMC_VDD_33_34: u32 = 1 << 21;
pub const SD_OCR_VOLTAGE_WINDOW: u32 = MMC_VDD_33_34;

// Card status (R1)
pub const MMC_STATUS_RDY_FOR_DATA: u32 = 1 << 8;
pub const MMC_STATUS_CURR_STATE: u32 = 0xF << 9;
pub const MMC_STATE_PRG: u32 = 7 << 9;
pub const MMC_STATUS_MASK: u32 = !0x0206_BF7F;

pub const SD_BLOCK_SIZE: u32 = 512;
pub const SD_BLOCK_WORDS: usize = SD_BLOCK_SIZE as usize / 4;

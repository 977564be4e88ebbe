//! Card identification: from reset to a selected card in data mode.

use log::{debug, error, info, warn};

use crate::constant::*;
use crate::err::{IdentStage, SdError};

use super::{constant::SDCDIV, RegisterTransport, SdCommand, SdHost};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CsdVersion {
    V1,
    V2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsdInfo {
    pub version: CsdVersion,
    pub c_size: u32,
    pub capacity_bytes: u64,
    pub block_length: u32,
    pub clock_div: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CidInfo {
    pub manufacturer_id: u8,
    pub oem_id: u16,
    pub product_name: [u8; 5],
    pub revision: u8,
    pub serial_number: u32,
    pub manufacturing_month: u8,
    pub manufacturing_year: u16,
}

/// Extract `size` bits starting at bit `start` of a 128-bit register held
/// least-significant word first.
fn unstuff_bits(resp: &[u32; 4], start: u32, size: u32) -> u32 {
    let mask = if size < 32 { (1 << size) - 1 } else { !0 };
    let off = (start / 32) as usize;
    let shift = start % 32;
    let mut res = resp[off] >> shift;
    if size + shift > 32 {
        res |= resp[off + 1] << (32 - shift);
    }
    res & mask
}

pub fn parse_csd(csd: &[u32; 4]) -> Result<CsdInfo, SdError> {
    match unstuff_bits(csd, 126, 2) {
        1 => {
            let c_size = unstuff_bits(csd, 48, 22);
            Ok(CsdInfo {
                version: CsdVersion::V2,
                c_size,
                capacity_bytes: (c_size as u64 + 1) * 512 * 1024,
                block_length: 512,
                clock_div: 5,
            })
        }
        0 => {
            let c_size = unstuff_bits(csd, 62, 12);
            let c_size_mult = unstuff_bits(csd, 47, 3);
            let read_bl_len = unstuff_bits(csd, 80, 4);
            let block_length = 1u32 << read_bl_len;
            let blocks = (c_size as u64 + 1) << (c_size_mult + 2);
            Ok(CsdInfo {
                version: CsdVersion::V1,
                c_size,
                capacity_bytes: blocks * block_length as u64,
                block_length,
                clock_div: 5,
            })
        }
        ver => {
            error!("unknown CSD version {:#x}", ver);
            Err(SdError::IdentificationFailure(IdentStage::ParseCsd))
        }
    }
}

pub fn parse_cid(cid: &[u32; 4]) -> CidInfo {
    let mut product_name = [0u8; 5];
    for (i, c) in product_name.iter_mut().enumerate() {
        *c = unstuff_bits(cid, 96 - 8 * i as u32, 8) as u8;
    }
    let date = unstuff_bits(cid, 8, 12);
    CidInfo {
        manufacturer_id: unstuff_bits(cid, 120, 8) as u8,
        oem_id: unstuff_bits(cid, 104, 16) as u16,
        product_name,
        revision: unstuff_bits(cid, 56, 8) as u8,
        serial_number: unstuff_bits(cid, 24, 32),
        manufacturing_month: (date & 0xF) as u8,
        manufacturing_year: 2000 + (date >> 4) as u16,
    }
}

fn failed(stage: IdentStage) -> impl FnOnce(SdError) -> SdError {
    move |err| {
        error!("card identification failed at {}: {}", stage, err);
        SdError::IdentificationFailure(stage)
    }
}

impl<T: RegisterTransport> SdHost<T> {
    pub(crate) fn enter_stage(&mut self, stage: IdentStage) {
        debug!("identification stage: {}", stage);
        self.stage = stage;
    }

    pub(crate) fn init_card(&mut self) -> Result<(), SdError> {
        self.enter_stage(IdentStage::VoltageQuery);
        self.send_no_resp(MMC_GO_IDLE_STATE, 0)
            .map_err(failed(IdentStage::VoltageQuery))?;

        self.query_voltage_and_type()?;
        self.identify_card()?;

        let cid = parse_cid(&self.cid);
        info!(
            "Detected SD card: MID {:#x} OID {:#x} PNM {:?} PRV {:#x} PSN {:#x} date {}/{}",
            cid.manufacturer_id,
            cid.oem_id,
            core::str::from_utf8(&cid.product_name).unwrap_or("?"),
            cid.revision,
            cid.serial_number,
            cid.manufacturing_year,
            cid.manufacturing_month
        );

        self.enter_stage(IdentStage::ParseCsd);
        let csd = parse_csd(&self.csd)?;
        info!(
            "CSD {:?}: C_SIZE {:#x}, block length {}, capacity {} bytes",
            csd.version, csd.c_size, csd.block_length, csd.capacity_bytes
        );
        self.capacity_bytes = csd.capacity_bytes;

        self.enter_stage(IdentStage::SelectCard);
        self.issue(&SdCommand::new(MMC_SELECT_CARD, self.rca << 16, MMC_RSP_R1))
            .map_err(failed(IdentStage::SelectCard))?;

        // CSD 2.0 cards have the block length fixed at 512.
        if csd.version == CsdVersion::V1 {
            self.enter_stage(IdentStage::FixBlockLength);
            info!("setting block length to {}", SD_BLOCK_SIZE);
            self.issue(&SdCommand::new(MMC_SET_BLOCKLEN, SD_BLOCK_SIZE, MMC_RSP_R1))
                .map_err(failed(IdentStage::FixBlockLength))?;
        }

        self.block_size = SD_BLOCK_SIZE;

        info!(
            "card initialization complete: {} MiB SD{} card",
            self.capacity_bytes >> 20,
            if self.high_capacity { "HC" } else { "" }
        );

        if csd.clock_div >= 2 {
            debug!("switching to data-mode clock divider {}", csd.clock_div);
            self.write_reg(SDCDIV, csd.clock_div - 2);
        }

        Ok(())
    }

    fn query_voltage_and_type(&mut self) -> Result<(), SdError> {
        let mut arg = SD_OCR_VOLTAGE_WINDOW;

        match self.issue(&SdCommand::new(SD_SEND_IF_COND, SD_IF_COND_PATTERN, MMC_RSP_R7)) {
            Ok(resp) if resp.as_r7() == SD_IF_COND_PATTERN => {
                arg |= OCR_HCS;
                self.sd_v2 = true;
            }
            Ok(resp) => {
                warn!("IF_COND echo mismatch ({:#x}), treating card as SD v1", resp.as_r7());
            }
            Err(err) => {
                debug!("no IF_COND response ({}), SD v1 card", err);
            }
        }

        self.enter_stage(IdentStage::CardArrival);
        let mut polls = 0;
        let ocr = loop {
            self.issue(&SdCommand::new(MMC_APP_CMD, 0, MMC_RSP_R1))
                .map_err(failed(IdentStage::CardArrival))?;
            let resp = self
                .issue(&SdCommand::new(SD_APP_OP_COND, arg, MMC_RSP_R3))
                .map_err(failed(IdentStage::CardArrival))?;
            let ocr = resp.as_r3();
            if ocr & OCR_BUSY != 0 {
                break ocr;
            }

            polls += 1;
            if polls >= self.config.arrival_polls {
                error!("card did not power up after {} polls", polls);
                return Err(SdError::IdentificationFailure(IdentStage::CardArrival));
            }
            debug!("waiting for SD ({:#x})", ocr);
            self.transport.delay_us(self.config.arrival_interval_us);
        };

        info!("SD card has arrived");
        self.ocr = ocr;
        self.high_capacity = ocr & OCR_HCS != 0;
        if self.high_capacity {
            info!("This is an SDHC card");
        }

        Ok(())
    }

    fn identify_card(&mut self) -> Result<(), SdError> {
        self.enter_stage(IdentStage::Identify);
        info!("identifying card");

        self.issue(&SdCommand::new(MMC_ALL_SEND_CID, 0, MMC_RSP_R2))
            .map_err(failed(IdentStage::Identify))?;

        let resp = self
            .issue(&SdCommand::new(SD_SEND_RELATIVE_ADDR, 0, MMC_RSP_R6))
            .map_err(failed(IdentStage::Identify))?;
        self.rca = resp.as_r6() >> 16;
        info!("RCA = {:#x}", self.rca);

        self.enter_stage(IdentStage::ReadCid);
        let resp = self
            .issue(&SdCommand::new(MMC_SEND_CID, self.rca << 16, MMC_RSP_R2))
            .map_err(failed(IdentStage::ReadCid))?;
        self.cid = resp.as_r2();

        self.enter_stage(IdentStage::ReadCsd);
        let resp = self
            .issue(&SdCommand::new(MMC_SEND_CSD, self.rca << 16, MMC_RSP_R2))
            .map_err(failed(IdentStage::ReadCsd))?;
        self.csd = resp.as_r2();

        Ok(())
    }
}

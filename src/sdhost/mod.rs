mod block;
mod cmd;
pub mod constant;
mod init;
mod regs;
mod sample;

use core::fmt::Display;

use log::{error, info, warn};

use crate::config::HostConfig;
use crate::constant::MMC_GO_IDLE_STATE;
use crate::err::*;
use constant::*;

pub use block::{DataBuffer, DataTransfer};
pub use cmd::{classify_hsts, DataDirection, ResponseKind, SdCommand, SdResponse};
pub use init::{parse_cid, parse_csd, CidInfo, CsdInfo, CsdVersion};
pub use regs::{Bcm2835Mmio, RegisterTransport, PERIPHERAL_BASE_PI2};
pub use sample::{DiagnosticSample, Sampler, SAMPLE_CAPACITY};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PowerState {
    Off,
    On,
}

/// BCM2835 SDHOST controller with a single SD card behind it.
#[derive(Debug)]
pub struct SdHost<T: RegisterTransport> {
    transport: T,
    config: HostConfig,
    power: PowerState,
    card_ready: bool,
    sd_v2: bool,
    high_capacity: bool,
    ocr: u32,
    rca: u32,
    cid: [u32; 4],
    csd: [u32; 4],
    capacity_bytes: u64,
    block_size: u32,
    current_cmd: u8,
    r: [u32; 4],
    sampler: Sampler,
    stage: IdentStage,
}

impl<T: RegisterTransport> Display for SdHost<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "SDHOST {{ power: {:?}, card_ready: {}, sd_v2: {}, high_capacity: {}, rca: {:#x}, capacity: {} MiB, block_size: {} }}",
            self.power,
            self.card_ready,
            self.sd_v2,
            self.high_capacity,
            self.rca,
            self.capacity_bytes >> 20,
            self.block_size
        )
    }
}

impl<T: RegisterTransport> SdHost<T> {
    /// Wrap a transport. No register is touched until [`SdHost::init`].
    pub fn new(transport: T, config: HostConfig) -> Self {
        Self {
            transport,
            config,
            power: PowerState::Off,
            card_ready: false,
            sd_v2: false,
            high_capacity: false,
            ocr: 0,
            rca: 0,
            cid: [0; 4],
            csd: [0; 4],
            capacity_bytes: 0,
            block_size: 0,
            current_cmd: 0,
            r: [0; 4],
            sampler: Sampler::new(),
            stage: IdentStage::Reset,
        }
    }

    /// Bring up the controller and identify the card. Any failure is fatal.
    pub fn start(transport: T, config: HostConfig) -> Self {
        match Self::try_start(transport, config) {
            Ok(host) => host,
            Err(err) => {
                error!("failed to start the SDHOST controller: {}", err);
                panic!("SDHOST initialization failed: {}", err);
            }
        }
    }

    pub fn try_start(transport: T, config: HostConfig) -> Result<Self, SdError> {
        let mut host = Self::new(transport, config);
        host.init()?;
        Ok(host)
    }

    /// Reset the controller, identify the card and flush the FIFO.
    pub fn init(&mut self) -> Result<(), SdError> {
        info!("Init SDHOST controller");
        self.restart_controller()?;
        info!("SDHOST driver started: {}", self);
        Ok(())
    }

    pub(crate) fn read_reg(&mut self, offset: u32) -> u32 {
        self.transport.read32(offset)
    }

    pub(crate) fn write_reg(&mut self, offset: u32, value: u32) {
        self.transport.write32(offset, value)
    }

    fn set_power(&mut self, on: bool) {
        self.write_reg(SDVDD, if on { SDVDD_POWER_ON } else { SDVDD_POWER_OFF });
        self.power = if on { PowerState::On } else { PowerState::Off };
    }

    // Reset the controller to its power-on state
    fn reset(&mut self) {
        info!("resetting controller");
        self.set_power(false);

        self.write_reg(SDCMD, 0);
        self.write_reg(SDARG, 0);
        self.write_reg(SDTOUT, SDTOUT_RESET);
        self.write_reg(SDCDIV, 0);
        self.write_reg(SDHSTS, SDHSTS_CLEAR_ALL);
        self.write_reg(SDHCFG, 0);
        self.write_reg(SDHBCT, 0);
        self.write_reg(SDHBLC, 0);

        let mut edm = self.read_reg(SDEDM);
        edm &= !((SDEDM_THRESHOLD_MASK << SDEDM_READ_THRESHOLD_SHIFT)
            | (SDEDM_THRESHOLD_MASK << SDEDM_WRITE_THRESHOLD_SHIFT));
        edm |= (self.config.read_threshold << SDEDM_READ_THRESHOLD_SHIFT)
            | (self.config.write_threshold << SDEDM_WRITE_THRESHOLD_SHIFT);
        self.write_reg(SDEDM, edm);
        self.transport.delay_us(RESET_SETTLE_US);

        self.set_power(true);

        self.transport.delay_us(RESET_SETTLE_US);
        self.transport.fence();
    }

    fn restart_controller(&mut self) -> Result<(), SdError> {
        self.sd_v2 = false;

        self.enter_stage(IdentStage::Reset);
        self.transport.configure_pinmux();
        self.reset();

        self.write_reg(SDHCFG, (Hcfg::SLOW_CARD | Hcfg::WIDE_INT_BUS).bits());
        self.write_reg(SDCDIV, self.config.ident_cdiv);

        self.transport.delay_us(RESET_SETTLE_US);
        self.transport.fence();

        self.init_card()?;
        self.card_ready = true;

        // The first reads after identification return stale FIFO data.
        self.enter_stage(IdentStage::Flush);
        for i in 0..self.config.flush_reads {
            if let Err(err) = self.read_sectors(0, None, 1) {
                error!("FIFO flush cycle {} failed: {}", i, err);
                return Err(SdError::IdentificationFailure(IdentStage::Flush));
            }
        }

        self.enter_stage(IdentStage::Ready);
        Ok(())
    }

    /// Quiesce the card and power down the controller.
    ///
    /// Safe to call more than once; later block I/O fails as not ready.
    pub fn stop(&mut self) {
        if self.card_ready {
            info!("flushing fifo");
            self.drain_fifo_nowait();

            info!("asking card to enter idle state");
            self.write_reg(SDCDIV, self.config.ident_cdiv);
            self.transport.delay_us(STOP_CLOCK_SETTLE_US);

            if let Err(err) = self.send_no_resp(MMC_GO_IDLE_STATE, 0) {
                warn!("GO_IDLE_STATE during stop failed: {}", err);
            }
            self.transport.delay_us(STOP_IDLE_SETTLE_US);
        }

        info!("stopping sdhost controller driver");
        self.write_reg(SDCMD, 0);
        self.write_reg(SDARG, 0);
        self.write_reg(SDTOUT, SDTOUT_STOP);
        self.write_reg(SDCDIV, self.config.stop_cdiv);

        info!("powering down controller");
        self.set_power(false);
        self.write_reg(SDHCFG, 0);
        self.write_reg(SDHBCT, SDHBCT_STOP);
        self.write_reg(SDHBLC, 0);
        self.write_reg(SDHSTS, SDHSTS_CLEAR_ALL);

        self.write_reg(SDCMD, 0);
        self.write_reg(SDARG, 0);
    }

    pub(crate) fn ensure_ready(&self) -> Result<(), SdError> {
        if !self.card_ready || self.power == PowerState::Off {
            return Err(SdError::CardNotReady);
        }
        Ok(())
    }

    pub fn is_card_ready(&self) -> bool {
        self.card_ready
    }

    pub fn power(&self) -> PowerState {
        self.power
    }

    pub fn is_high_capacity(&self) -> bool {
        self.high_capacity
    }

    pub fn is_sd_v2(&self) -> bool {
        self.sd_v2
    }

    pub fn rca(&self) -> u32 {
        self.rca
    }

    pub fn ocr(&self) -> u32 {
        self.ocr
    }

    pub fn block_size(&self) -> u32 {
        self.block_size
    }

    pub fn capacity_bytes(&self) -> u64 {
        self.capacity_bytes
    }

    /// Identification stage reached; the failing one after an error.
    pub fn ident_stage(&self) -> IdentStage {
        self.stage
    }

    pub fn current_cmd(&self) -> u8 {
        self.current_cmd
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    // Get card info
    pub fn card_info(&self) -> Result<CardInfo, SdError> {
        self.ensure_ready()?;

        let cid = parse_cid(&self.cid);
        Ok(CardInfo {
            manufacturer_id: cid.manufacturer_id,
            oem_id: cid.oem_id,
            product_name: cid.product_name,
            revision: cid.revision,
            serial_number: cid.serial_number,
            manufacturing_month: cid.manufacturing_month,
            manufacturing_year: cid.manufacturing_year,
            high_capacity: self.high_capacity,
            capacity_bytes: self.capacity_bytes,
            block_size: self.block_size,
        })
    }
}

// Card information structure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CardInfo {
    pub manufacturer_id: u8,
    pub oem_id: u16,
    pub product_name: [u8; 5],
    pub revision: u8,
    pub serial_number: u32,
    pub manufacturing_month: u8,
    pub manufacturing_year: u16,
    pub high_capacity: bool,
    pub capacity_bytes: u64,
    pub block_size: u32,
}

impl CardInfo {
    pub fn product_name(&self) -> &str {
        core::str::from_utf8(&self.product_name).unwrap_or("?????")
    }
}

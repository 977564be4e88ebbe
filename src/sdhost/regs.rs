//! Register access for the SDHOST block.
//!
//! All controller I/O goes through [`RegisterTransport`], so the protocol code
//! can be driven against real MMIO or a simulated controller.

use core::ptr::{read_volatile, write_volatile};

use log::debug;

/// Raw access to the SDHOST register window plus the few platform services the
/// driver needs. Offsets are relative to the SDHOST base.
pub trait RegisterTransport {
    fn read32(&mut self, offset: u32) -> u32;
    fn write32(&mut self, offset: u32, value: u32);
    fn delay_us(&mut self, us: u32);
    /// Order all prior register accesses before any later ones.
    fn fence(&mut self);
    /// Free-running microsecond counter.
    fn now_us(&self) -> u64;
    /// Route the SD pins to the controller. Called once before reset.
    fn configure_pinmux(&mut self) {}
}

/// BCM2836/7 (Pi 2/3) peripheral window.
pub const PERIPHERAL_BASE_PI2: usize = 0x3F00_0000;

pub const SDHOST_OFFSET: usize = 0x20_2000;
pub const GPIO_OFFSET: usize = 0x20_0000;
pub const SYSTEM_TIMER_OFFSET: usize = 0x3000;

// GPIO registers
const GPFSEL4: usize = 0x10;
const GPFSEL5: usize = 0x14;
const GPPUD: usize = 0x94;
const GPPUDCLK1: usize = 0x9C;
const GPIO_FSEL_ALT0: u32 = 0b100;
const GPIO_PULL_UP: u32 = 2;
const SD_PINS: core::ops::Range<u32> = 48..54;

// System timer
const ST_CLO: usize = 0x04;
const ST_CHI: usize = 0x08;

/// Memory-mapped transport for the BCM2835 family.
#[derive(Debug)]
pub struct Bcm2835Mmio {
    sdhost_base: usize,
    gpio_base: usize,
    timer_base: usize,
}

impl Bcm2835Mmio {
    /// # Safety
    ///
    /// `peripheral_base` must map the BCM283x peripheral window, and nothing
    /// else may drive the SDHOST block, the SD pins or their pull registers.
    pub const unsafe fn new(peripheral_base: usize) -> Self {
        Self {
            sdhost_base: peripheral_base + SDHOST_OFFSET,
            gpio_base: peripheral_base + GPIO_OFFSET,
            timer_base: peripheral_base + SYSTEM_TIMER_OFFSET,
        }
    }

    /// Same as [`Bcm2835Mmio::new`], for a controller located individually
    /// (e.g. from the device tree).
    ///
    /// # Safety
    ///
    /// See [`Bcm2835Mmio::new`].
    pub const unsafe fn with_bases(sdhost_base: usize, gpio_base: usize, timer_base: usize) -> Self {
        Self {
            sdhost_base,
            gpio_base,
            timer_base,
        }
    }

    pub fn sdhost_base(&self) -> usize {
        self.sdhost_base
    }

    fn gpio_read(&self, offset: usize) -> u32 {
        unsafe { read_volatile((self.gpio_base + offset) as *const u32) }
    }

    fn gpio_write(&self, offset: usize, value: u32) {
        unsafe { write_volatile((self.gpio_base + offset) as *mut u32, value) }
    }

    fn timer_read(&self, offset: usize) -> u32 {
        unsafe { read_volatile((self.timer_base + offset) as *const u32) }
    }

    fn set_function(&self, pin: u32, function: u32) {
        let reg = if pin < 50 { GPFSEL4 } else { GPFSEL5 };
        let shift = (pin % 10) * 3;
        let mut val = self.gpio_read(reg);
        val &= !(0b111 << shift);
        val |= function << shift;
        self.gpio_write(reg, val);
    }
}

impl RegisterTransport for Bcm2835Mmio {
    fn read32(&mut self, offset: u32) -> u32 {
        unsafe { read_volatile((self.sdhost_base + offset as usize) as *const u32) }
    }

    fn write32(&mut self, offset: u32, value: u32) {
        unsafe { write_volatile((self.sdhost_base + offset as usize) as *mut u32, value) }
    }

    fn delay_us(&mut self, us: u32) {
        let start = self.now_us();
        while self.now_us().wrapping_sub(start) < us as u64 {
            core::hint::spin_loop();
        }
    }

    fn fence(&mut self) {
        cfg_if::cfg_if! {
            if #[cfg(target_arch = "aarch64")] {
                use aarch64_cpu::asm::barrier;
                barrier::dsb(barrier::SY);
            } else {
                core::sync::atomic::fence(core::sync::atomic::Ordering::SeqCst);
            }
        }
    }

    fn now_us(&self) -> u64 {
        // CHI can tick between the two reads; retry until it is stable.
        loop {
            let hi = self.timer_read(ST_CHI);
            let lo = self.timer_read(ST_CLO);
            if self.timer_read(ST_CHI) == hi {
                return ((hi as u64) << 32) | lo as u64;
            }
        }
    }

    fn configure_pinmux(&mut self) {
        for pin in SD_PINS {
            self.set_function(pin, GPIO_FSEL_ALT0);
        }

        debug!("waiting for pinmux pull update");
        self.gpio_write(GPPUD, GPIO_PULL_UP);
        self.fence();
        self.delay_us(500);

        let mask = SD_PINS.fold(0u32, |m, pin| m | 1 << (pin - 32));
        self.gpio_write(GPPUDCLK1, mask);
        self.delay_us(500);

        self.gpio_write(GPPUD, 0);
        self.gpio_write(GPPUDCLK1, 0);
        debug!("pinmux configured for SDHOST");
    }
}

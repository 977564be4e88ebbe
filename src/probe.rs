//! Locate the SDHOST controller in a flattened device tree.

use fdt_parser::Fdt;
use log::{debug, info};

pub const SDHOST_COMPATIBLE: &[&str] = &["brcm,bcm2835-sdhost"];

/// Register window of the controller as listed in its node. On BCM283x this
/// is a VideoCore bus address; see [`SdhostRegion::to_cpu`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SdhostRegion {
    pub address: usize,
    pub size: usize,
}

impl SdhostRegion {
    /// Translate a bus address through a `bus_base -> cpu_base` window.
    pub fn to_cpu(&self, bus_base: usize, cpu_base: usize) -> usize {
        if self.address >= bus_base {
            self.address - bus_base + cpu_base
        } else {
            self.address
        }
    }
}

pub fn find_sdhost(fdt: &Fdt<'_>) -> Option<SdhostRegion> {
    let node = fdt.find_compatible(SDHOST_COMPATIBLE).next()?;
    info!("SDHOST: {}", node.name);

    let reg = node.reg()?.next()?;
    let region = SdhostRegion {
        address: reg.address as usize,
        size: reg.size.unwrap_or(0x100),
    };
    debug!("SDHOST reg {:#x}, {:#x}", region.address, region.size);

    Some(region)
}

#![cfg_attr(not(test), no_std)]

pub mod block_dev;
pub mod config;
pub mod constant;
mod err;
pub mod probe;
pub mod sdhost;
pub mod timer;
pub mod uart;

pub use block_dev::{BlockDevice, BlockDeviceExt, BlockElement, SharedBlockDevice};
pub use config::HostConfig;
pub use err::*;
pub use sdhost::{Bcm2835Mmio, CardInfo, PowerState, RegisterTransport, SdHost};
pub use timer::{Budget, Deadline};

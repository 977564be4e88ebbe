// ===== Block Device Interface =====

use core::mem::size_of_val;

use log::warn;
use spin::Mutex;

use crate::err::SdError;
use crate::sdhost::{RegisterTransport, SdHost};

/// Raw block device used by the boot loader's filesystem layer.
///
/// `sector` is an LBA in units of [`BlockDevice::block_size`]. Reads with no
/// destination consume the data and discard it.
pub trait BlockDevice {
    fn read_block(&mut self, sector: u32, buf: Option<&mut [u8]>, count: u32) -> bool;
    fn write_block(&mut self, sector: u32, buf: &[u8], count: u32) -> bool;
    fn stop(&mut self);
    fn block_size(&self) -> u32;
}

impl<T: RegisterTransport> BlockDevice for SdHost<T> {
    fn read_block(&mut self, sector: u32, buf: Option<&mut [u8]>, count: u32) -> bool {
        match self.read_sectors(sector, buf, count) {
            Ok(()) => true,
            Err(SdError::CardNotReady) => panic!("card not ready"),
            Err(err) => {
                warn!("read_block({}, {}) failed: {}", sector, count, err);
                self.dump_samples();
                false
            }
        }
    }

    fn write_block(&mut self, sector: u32, buf: &[u8], count: u32) -> bool {
        match self.write_sectors(sector, buf, count) {
            Ok(()) => true,
            Err(SdError::CardNotReady) => panic!("card not ready"),
            Err(err) => {
                warn!("write_block({}, {}) failed: {}", sector, count, err);
                false
            }
        }
    }

    fn stop(&mut self) {
        SdHost::stop(self)
    }

    fn block_size(&self) -> u32 {
        SdHost::block_size(self)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for u8 {}
    impl Sealed for u16 {}
    impl Sealed for u32 {}
    impl Sealed for u64 {}
}

/// Plain integer types that can be viewed as raw block bytes.
pub trait BlockElement: private::Sealed + Copy {}

impl BlockElement for u8 {}
impl BlockElement for u16 {}
impl BlockElement for u32 {}
impl BlockElement for u64 {}

fn as_bytes<E: BlockElement>(buf: &[E]) -> &[u8] {
    // SAFETY: `E` is a primitive integer, so every byte is initialized and
    // `u8` has no alignment requirement.
    unsafe { core::slice::from_raw_parts(buf.as_ptr().cast::<u8>(), size_of_val(buf)) }
}

fn as_bytes_mut<E: BlockElement>(buf: &mut [E]) -> &mut [u8] {
    // SAFETY: as above, and any byte pattern is a valid `E`.
    unsafe { core::slice::from_raw_parts_mut(buf.as_mut_ptr().cast::<u8>(), size_of_val(buf)) }
}

/// Typed views over [`BlockDevice`] for buffers of wider integers.
pub trait BlockDeviceExt: BlockDevice {
    fn read_into<E: BlockElement>(&mut self, sector: u32, buf: &mut [E], count: u32) -> bool {
        self.read_block(sector, Some(as_bytes_mut(buf)), count)
    }

    fn write_from<E: BlockElement>(&mut self, sector: u32, buf: &[E], count: u32) -> bool {
        self.write_block(sector, as_bytes(buf), count)
    }
}

impl<D: BlockDevice + ?Sized> BlockDeviceExt for D {}

/// A block device shared between contexts. Every operation holds the lock for
/// its whole command sequence.
pub struct SharedBlockDevice<D> {
    inner: Mutex<D>,
}

impl<D: BlockDevice> SharedBlockDevice<D> {
    pub const fn new(dev: D) -> Self {
        Self {
            inner: Mutex::new(dev),
        }
    }

    pub fn lock(&self) -> spin::MutexGuard<'_, D> {
        self.inner.lock()
    }

    pub fn into_inner(self) -> D {
        self.inner.into_inner()
    }
}

impl<D: BlockDevice> BlockDevice for &SharedBlockDevice<D> {
    fn read_block(&mut self, sector: u32, buf: Option<&mut [u8]>, count: u32) -> bool {
        self.inner.lock().read_block(sector, buf, count)
    }

    fn write_block(&mut self, sector: u32, buf: &[u8], count: u32) -> bool {
        self.inner.lock().write_block(sector, buf, count)
    }

    fn stop(&mut self) {
        self.inner.lock().stop()
    }

    fn block_size(&self) -> u32 {
        self.inner.lock().block_size()
    }
}

//! Memory-mapped configuration space (ECAM).

use super::config::{all_ones, check_access, ConfigAccess};
use crate::PciResult;
use alloc::sync::Arc;
use pci_hal::io::{Io, Mmio};
use pci_hal::{CachePolicy, MMUFlags, MemoryMapper, PhysAddr, VirtAddr};

/// ECAM Region.
#[derive(Debug, Clone, Copy)]
pub struct PciEcamRegion {
    /// Physical address of the memory mapped config region.
    pub phys_base: PhysAddr,
    /// Size (in bytes) of the memory mapped config region.
    pub size: usize,
    /// Inclusive ID of the first bus controlled by this region.
    pub bus_start: u8,
    /// Inclusive ID of the last bus controlled by this region.
    pub bus_end: u8,
}

/// Root-bus configuration access through a mapped ECAM region.
pub struct EcamConfig {
    region: PciEcamRegion,
    vaddr: VirtAddr,
    mapper: Arc<dyn MemoryMapper>,
}

impl EcamConfig {
    /// Map `region` and build an accessor over it.
    pub fn new(region: PciEcamRegion, mapper: Arc<dyn MemoryMapper>) -> PciResult<Self> {
        let vaddr = mapper.map_physical(
            region.phys_base,
            region.size,
            CachePolicy::UncachedDevice,
            MMUFlags::READ | MMUFlags::WRITE,
        )?;
        info!(
            "ECAM buses {:#x}..={:#x} at {:#x} mapped to {:#x}",
            region.bus_start, region.bus_end, region.phys_base, vaddr
        );
        Ok(EcamConfig {
            region,
            vaddr,
            mapper,
        })
    }

    /// Virtual address of the register, or `None` outside the region.
    fn locate(&self, bus: u8, dev: u8, func: u8, offset: u32) -> Option<VirtAddr> {
        if bus < self.region.bus_start || bus > self.region.bus_end {
            return None;
        }
        let rel = ((bus - self.region.bus_start) as usize) << 20
            | ((dev as usize & 0x1f) << 15)
            | ((func as usize & 0x7) << 12)
            | offset as usize;
        if rel >= self.region.size {
            return None;
        }
        Some(self.vaddr + rel)
    }

    /// # Safety
    ///
    /// `vaddr` must come from [`EcamConfig::locate`] and be aligned to `size`.
    unsafe fn read_at(vaddr: VirtAddr, size: usize) -> u32 {
        match size {
            1 => Mmio::<u8>::from_base(vaddr).read() as u32,
            2 => Mmio::<u16>::from_base(vaddr).read() as u32,
            _ => Mmio::<u32>::from_base(vaddr).read(),
        }
    }

    /// # Safety
    ///
    /// `vaddr` must come from [`EcamConfig::locate`] and be aligned to `size`.
    unsafe fn write_at(vaddr: VirtAddr, size: usize, value: u32) {
        match size {
            1 => Mmio::<u8>::from_base(vaddr).write(value as u8),
            2 => Mmio::<u16>::from_base(vaddr).write(value as u16),
            _ => Mmio::<u32>::from_base(vaddr).write(value),
        }
    }
}

impl ConfigAccess for EcamConfig {
    fn read(&self, bus: u8, dev: u8, func: u8, offset: u32, size: usize) -> PciResult<u64> {
        check_access(offset, size)?;
        let vaddr = match self.locate(bus, dev, func, offset) {
            Some(vaddr) => vaddr,
            None => return Ok(all_ones(size)),
        };
        let value = unsafe {
            if size == 8 {
                Self::read_at(vaddr, 4) as u64 | (Self::read_at(vaddr + 4, 4) as u64) << 32
            } else {
                Self::read_at(vaddr, size) as u64
            }
        };
        trace!(
            "ecam read {:02x}:{:02x}.{} @ {:#x} ({}) = {:#x}",
            bus,
            dev,
            func,
            offset,
            size,
            value
        );
        Ok(value)
    }

    fn write(
        &self,
        bus: u8,
        dev: u8,
        func: u8,
        offset: u32,
        size: usize,
        value: u64,
    ) -> PciResult {
        check_access(offset, size)?;
        let vaddr = match self.locate(bus, dev, func, offset) {
            Some(vaddr) => vaddr,
            None => {
                warn!(
                    "ecam write to {:02x}:{:02x}.{} outside buses {:#x}..={:#x} dropped",
                    bus, dev, func, self.region.bus_start, self.region.bus_end
                );
                return Ok(());
            }
        };
        trace!(
            "ecam write {:02x}:{:02x}.{} @ {:#x} ({}) <- {:#x}",
            bus,
            dev,
            func,
            offset,
            size,
            value
        );
        unsafe {
            if size == 8 {
                Self::write_at(vaddr, 4, value as u32);
                Self::write_at(vaddr + 4, 4, (value >> 32) as u32);
            } else {
                Self::write_at(vaddr, size, value as u32);
            }
        }
        Ok(())
    }
}

impl Drop for EcamConfig {
    fn drop(&mut self) {
        self.mapper.unmap(self.vaddr, self.region.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pci_hal::libos::HostMemory;

    const ECAM_BASE: PhysAddr = 0xe000_0000;

    fn setup() -> (Arc<HostMemory>, EcamConfig) {
        let mem = Arc::new(HostMemory::new());
        // buses 1 and 2
        mem.add_region(ECAM_BASE, 2 << 20);
        let region = PciEcamRegion {
            phys_base: ECAM_BASE,
            size: 2 << 20,
            bus_start: 1,
            bus_end: 2,
        };
        let ecam = EcamConfig::new(region, mem.clone()).unwrap();
        (mem, ecam)
    }

    #[test]
    fn function_address_layout() {
        let (mem, ecam) = setup();
        mem.write32(ECAM_BASE + (1 << 20) + (3 << 15) + (1 << 12), 0x0740_15ad);
        assert_eq!(ecam.read(2, 3, 1, 0x00, 4), Ok(0x0740_15ad));
        assert_eq!(ecam.read(2, 3, 1, 0x02, 2), Ok(0x0740));
        ecam.write(1, 0, 0, 0x10, 8, 0x1_2345_6780).unwrap();
        assert_eq!(mem.read32(ECAM_BASE + 0x10), 0x2345_6780);
        assert_eq!(mem.read32(ECAM_BASE + 0x14), 0x1);
    }

    #[test]
    fn bus_outside_region() {
        let (mem, ecam) = setup();
        assert_eq!(ecam.read(0, 0, 0, 0x00, 4), Ok(0xffff_ffff));
        assert_eq!(ecam.read(3, 0, 0, 0x00, 1), Ok(0xff));
        assert_eq!(ecam.write(5, 0, 0, 0x04, 2, 0x7), Ok(()));
        assert_eq!(mem.map_count(), 1);
    }

    #[test]
    fn unmapped_on_drop() {
        let (mem, ecam) = setup();
        drop(ecam);
        assert_eq!(mem.unmap_count(), 1);
    }
}

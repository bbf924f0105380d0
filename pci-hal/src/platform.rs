//! Services the PCI core consumes from the rest of the kernel.

use alloc::vec::Vec;
use core::sync::atomic::{fence, Ordering};

use crate::{CachePolicy, HalResult, MMUFlags, MsiInfo, PhysAddr, ProcessorSet, VirtAddr};

/// Raw x86-style I/O port access.
pub trait PortIo: Send + Sync {
    fn in8(&self, port: u16) -> u8;
    fn in16(&self, port: u16) -> u16;
    fn in32(&self, port: u16) -> u32;
    fn out8(&self, port: u16, value: u8);
    fn out16(&self, port: u16, value: u16);
    fn out32(&self, port: u16, value: u32);
}

/// Mapping of device memory into the kernel address space.
pub trait MemoryMapper: Send + Sync {
    /// Map `[paddr, paddr + size)` and return the virtual address of `paddr`.
    fn map_physical(
        &self,
        paddr: PhysAddr,
        size: usize,
        policy: CachePolicy,
        flags: MMUFlags,
    ) -> HalResult<VirtAddr>;

    /// Release a mapping returned by [`MemoryMapper::map_physical`].
    fn unmap(&self, vaddr: VirtAddr, size: usize);
}

/// The platform interrupt controller.
pub trait InterruptController: Send + Sync {
    /// Returns the address/data pair for each of the `count` vectors starting
    /// at `vector`, targeting `processors`.
    fn get_msi_info(
        &self,
        vector: u64,
        count: u64,
        processors: &ProcessorSet,
    ) -> HalResult<Vec<MsiInfo>>;
}

/// Firmware-reported platform capabilities.
pub trait PlatformCaps: Send + Sync {
    /// False when firmware (the FADT boot flags on ACPI systems) says message
    /// signaled interrupts must not be used.
    fn msi_supported(&self) -> bool;
}

/// Full memory barrier, ordering device register writes.
#[inline]
pub fn memory_barrier() {
    fence(Ordering::SeqCst);
}

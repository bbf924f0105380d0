use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use spin::Mutex;

use crate::{CachePolicy, HalError, HalResult, MMUFlags, MemoryMapper, PhysAddr, VirtAddr};

struct Region {
    paddr: PhysAddr,
    words: usize,
    ptr: *mut u64,
}

// The backing buffer is only touched with volatile accesses.
unsafe impl Send for Region {}

impl Region {
    fn size(&self) -> usize {
        self.words * 8
    }

    fn contains(&self, paddr: PhysAddr, size: usize) -> bool {
        paddr >= self.paddr && paddr + size <= self.paddr + self.size()
    }

    fn vaddr(&self, paddr: PhysAddr) -> VirtAddr {
        self.ptr as usize + (paddr - self.paddr)
    }
}

/// Heap buffers standing in for device memory behind BARs.
///
/// Mapping returns a pointer straight into the buffer, so every mapping
/// of the same physical range aliases the same bytes.
pub struct HostMemory {
    regions: Mutex<Vec<Region>>,
    maps: AtomicUsize,
    unmaps: AtomicUsize,
}

impl Default for HostMemory {
    fn default() -> Self {
        Self::new()
    }
}

impl HostMemory {
    pub fn new() -> Self {
        HostMemory {
            regions: Mutex::new(Vec::new()),
            maps: AtomicUsize::new(0),
            unmaps: AtomicUsize::new(0),
        }
    }

    /// Back `[paddr, paddr + size)` with zeroed memory.
    pub fn add_region(&self, paddr: PhysAddr, size: usize) {
        let words = (size + 7) / 8;
        let buffer: Box<[u64]> = vec![0u64; words].into_boxed_slice();
        let ptr = Box::into_raw(buffer) as *mut u64;
        self.regions.lock().push(Region { paddr, words, ptr });
    }

    fn locate(&self, paddr: PhysAddr, size: usize) -> HalResult<VirtAddr> {
        self.regions
            .lock()
            .iter()
            .find(|r| r.contains(paddr, size))
            .map(|r| r.vaddr(paddr))
            .ok_or(HalError::InvalidAddress)
    }

    pub fn read32(&self, paddr: PhysAddr) -> u32 {
        match self.locate(paddr, 4) {
            Ok(vaddr) => unsafe { core::ptr::read_volatile(vaddr as *const u32) },
            Err(_) => u32::MAX,
        }
    }

    pub fn write32(&self, paddr: PhysAddr, value: u32) {
        if let Ok(vaddr) = self.locate(paddr, 4) {
            unsafe { core::ptr::write_volatile(vaddr as *mut u32, value) }
        }
    }

    pub fn write64(&self, paddr: PhysAddr, value: u64) {
        if let Ok(vaddr) = self.locate(paddr, 8) {
            unsafe { core::ptr::write_volatile(vaddr as *mut u64, value) }
        }
    }

    /// Mappings handed out so far.
    pub fn map_count(&self) -> usize {
        self.maps.load(Ordering::SeqCst)
    }

    /// Mappings released so far.
    pub fn unmap_count(&self) -> usize {
        self.unmaps.load(Ordering::SeqCst)
    }
}

impl MemoryMapper for HostMemory {
    fn map_physical(
        &self,
        paddr: PhysAddr,
        size: usize,
        policy: CachePolicy,
        flags: MMUFlags,
    ) -> HalResult<VirtAddr> {
        trace!(
            "map_physical: paddr={:#x}, size={:#x}, policy={:?}, flags={:?}",
            paddr,
            size,
            policy,
            flags
        );
        let vaddr = self.locate(paddr, size)?;
        self.maps.fetch_add(1, Ordering::SeqCst);
        Ok(vaddr)
    }

    fn unmap(&self, vaddr: VirtAddr, size: usize) {
        trace!("unmap: vaddr={:#x}, size={:#x}", vaddr, size);
        self.unmaps.fetch_add(1, Ordering::SeqCst);
    }
}

impl Drop for HostMemory {
    fn drop(&mut self) {
        for region in self.regions.lock().drain(..) {
            let slice = core::ptr::slice_from_raw_parts_mut(region.ptr, region.words);
            drop(unsafe { Box::from_raw(slice) });
        }
    }
}

//! Message signaled interrupts.
//!
//! A function may carry an MSI capability, an MSI-X capability, or both.
//! Every operation names the flavour it targets and fails with
//! `NOT_SUPPORTED` if the function lacks it.
//!
//! The MSI-X vector table and pending-bit array live in device memory
//! behind a BAR. They are mapped on first use, which can only happen after
//! StartDevice has programmed that BAR.

use super::caps::CapabilityWalk;
use super::config::{PciConfig, PciReg16};
use super::constants::*;
use super::driver::PciPlatform;
use crate::{PciError, PciResult};
use alloc::sync::Arc;
use bitflags::bitflags;
use core::ptr::null_mut;
use core::sync::atomic::{AtomicPtr, AtomicU64, Ordering};
use pci_hal::io::{Io, Mmio};
use pci_hal::{
    memory_barrier, CachePolicy, InterruptController, MMUFlags, MemoryMapper, PhysAddr,
    ProcessorSet,
};
use spin::Mutex;

// MSI capability, relative to the capability offset.
const MSI_CONTROL: u32 = 0x2;
const MSI_ADDRESS_LOW: u32 = 0x4;
const MSI_ADDRESS_HIGH: u32 = 0x8;
const MSI_DATA_32: u32 = 0x8;
const MSI_DATA_64: u32 = 0xC;
const MSI_MASK_32: u32 = 0xC;
const MSI_MASK_64: u32 = 0x10;
const MSI_PENDING_32: u32 = 0x10;
const MSI_PENDING_64: u32 = 0x14;

const MSI_CONTROL_ENABLE: u16 = 0x0001;
const MSI_CONTROL_MULTI_CAPABLE_MASK: u16 = 0x000E;
const MSI_CONTROL_MULTI_CAPABLE_SHIFT: u16 = 1;
const MSI_CONTROL_MULTI_ENABLE_MASK: u16 = 0x0070;
const MSI_CONTROL_MULTI_ENABLE_SHIFT: u16 = 4;
const MSI_CONTROL_64BIT: u16 = 0x0080;
const MSI_CONTROL_VECTOR_MASKING: u16 = 0x0100;
const MSI_CONTROL_WRITABLE: u16 = MSI_CONTROL_ENABLE | MSI_CONTROL_MULTI_ENABLE_MASK;
const MSI_MAXIMUM_VECTOR_ENCODING: u32 = 5;

// MSI-X capability, relative to the capability offset.
const MSIX_CONTROL: u32 = 0x2;
const MSIX_TABLE: u32 = 0x4;
const MSIX_PENDING_ARRAY: u32 = 0x8;

const MSIX_CONTROL_TABLE_SIZE_MASK: u16 = 0x07FF;
const MSIX_CONTROL_GLOBAL_MASK: u16 = 0x4000;
const MSIX_CONTROL_ENABLE: u16 = 0x8000;
const MSIX_CONTROL_WRITABLE: u16 = MSIX_CONTROL_GLOBAL_MASK | MSIX_CONTROL_ENABLE;
const MSIX_BAR_INDEX_MASK: u32 = 0x7;
const MSIX_ENTRY_MASKED: u32 = 0x1;

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum MsiType {
    /// The MSI capability.
    Basic,
    /// The MSI-X capability.
    Extended,
}

bitflags! {
    /// Capability bits cached at discovery.
    pub struct MsiFlags: u32 {
        #[allow(clippy::identity_op)]
        const CAP_64BIT = 1 << 0;
        const MASKABLE  = 1 << 1;
    }
}

bitflags! {
    /// State reported by and applied through [`MsiContext::get_info`] and
    /// [`MsiContext::set_info`].
    pub struct MsiInfoFlags: u32 {
        #[allow(clippy::identity_op)]
        const ENABLED     = 1 << 0;
        const CAP_64BIT   = 1 << 1;
        const MASKABLE    = 1 << 2;
        const GLOBAL_MASK = 1 << 3;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MsiInformation {
    pub msi_type: MsiType,
    pub flags: MsiInfoFlags,
    pub max_vector_count: u64,
    pub vector_count: u64,
}

/// Where the MSI-X structures sit inside the function's BARs.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct MsixBarInfo {
    pub table_bar: usize,
    pub table_offset: u32,
    pub pending_bar: usize,
    pub pending_offset: u32,
}

/// One entry of the MSI-X vector table.
#[repr(C)]
pub struct MsixTableEntry {
    address_low: Mmio<u32>,
    address_high: Mmio<u32>,
    data: Mmio<u32>,
    control: Mmio<u32>,
}

const MSIX_TABLE_ENTRY_SIZE: usize = core::mem::size_of::<MsixTableEntry>();

impl MsixTableEntry {
    fn is_masked(&self) -> bool {
        self.control.read() & MSIX_ENTRY_MASKED != 0
    }

    fn set_masked(&self, masked: bool) {
        self.control.writef(MSIX_ENTRY_MASKED, masked);
    }

    fn set_message(&self, address: u64, data: u32) {
        self.address_low.write(address as u32);
        self.address_high.write((address >> 32) as u32);
        self.data.write(data);
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct MsixLocation {
    table: Option<PhysAddr>,
    pending: Option<PhysAddr>,
}

/// MSI/MSI-X state of one function.
pub struct MsiContext {
    config: PciConfig,
    msi_offset: u8,
    msix_offset: u8,
    flags: MsiFlags,
    msi_max_vectors: u64,
    msix_max_vectors: u64,
    msi_vector_count: AtomicU64,
    msix_vector_count: AtomicU64,
    msix_table: AtomicPtr<MsixTableEntry>,
    msix_pending_array: AtomicPtr<Mmio<u64>>,
    // written once by StartDevice
    msix_location: Mutex<MsixLocation>,
    mapper: Arc<dyn MemoryMapper>,
    interrupts: Arc<dyn InterruptController>,
}

impl core::fmt::Debug for MsiContext {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MsiContext")
            .field("config", &self.config)
            .field("msi_offset", &self.msi_offset)
            .field("msix_offset", &self.msix_offset)
            .field("flags", &self.flags)
            .finish()
    }
}

impl MsiContext {
    /// Look for MSI and MSI-X capabilities on `config`'s function.
    ///
    /// Returns `None` if neither exists or the platform cannot deliver
    /// message signaled interrupts.
    pub(super) fn discover(
        config: PciConfig,
        platform: &PciPlatform,
    ) -> PciResult<Option<Arc<Self>>> {
        let mut msi_offset = 0;
        let mut msix_offset = 0;
        for cap in CapabilityWalk::new(&config)? {
            let cap = cap?;
            match cap.id {
                PCI_CAPABILITY_MSI if msi_offset == 0 => msi_offset = cap.offset,
                PCI_CAPABILITY_MSIX if msix_offset == 0 => msix_offset = cap.offset,
                _ => {}
            }
            if msi_offset != 0 && msix_offset != 0 {
                break;
            }
        }
        if msi_offset == 0 && msix_offset == 0 {
            return Ok(None);
        }
        if !platform.caps.msi_supported() {
            warn!("{:?}: platform does not support MSI, ignoring capability", config);
            return Ok(None);
        }

        let mut flags = MsiFlags::empty();
        let mut msi_max_vectors = 0;
        if msi_offset != 0 {
            let control = config.read16_(msi_offset as u32 + MSI_CONTROL)?;
            flags.set(MsiFlags::CAP_64BIT, control & MSI_CONTROL_64BIT != 0);
            flags.set(MsiFlags::MASKABLE, control & MSI_CONTROL_VECTOR_MASKING != 0);
            msi_max_vectors = 1u64
                << ((control & MSI_CONTROL_MULTI_CAPABLE_MASK) >> MSI_CONTROL_MULTI_CAPABLE_SHIFT);
        }
        let mut msix_max_vectors = 0;
        if msix_offset != 0 {
            let control = config.read16_(msix_offset as u32 + MSIX_CONTROL)?;
            msix_max_vectors = (control & MSIX_CONTROL_TABLE_SIZE_MASK) as u64 + 1;
        }
        info!(
            "{:?}: MSI at {:#x} ({} vectors), MSI-X at {:#x} ({} vectors)",
            config, msi_offset, msi_max_vectors, msix_offset, msix_max_vectors
        );
        Ok(Some(Arc::new(MsiContext {
            config,
            msi_offset,
            msix_offset,
            flags,
            msi_max_vectors,
            msix_max_vectors,
            msi_vector_count: AtomicU64::new(0),
            msix_vector_count: AtomicU64::new(0),
            msix_table: AtomicPtr::new(null_mut()),
            msix_pending_array: AtomicPtr::new(null_mut()),
            msix_location: Mutex::new(MsixLocation::default()),
            mapper: platform.mapper.clone(),
            interrupts: platform.interrupts.clone(),
        })))
    }

    pub fn msi_offset(&self) -> u8 {
        self.msi_offset
    }

    pub fn msix_offset(&self) -> u8 {
        self.msix_offset
    }

    pub fn flags(&self) -> MsiFlags {
        self.flags
    }

    pub fn max_vectors(&self, msi_type: MsiType) -> u64 {
        match msi_type {
            MsiType::Basic => self.msi_max_vectors,
            MsiType::Extended => self.msix_max_vectors,
        }
    }

    /// Unmasked MSI-X vectors.
    pub fn msix_vector_count(&self) -> u64 {
        self.msix_vector_count.load(Ordering::SeqCst)
    }

    pub fn msix_table_phys(&self) -> Option<PhysAddr> {
        self.msix_location.lock().table
    }

    pub fn msix_pending_phys(&self) -> Option<PhysAddr> {
        self.msix_location.lock().pending
    }

    pub fn is_msix_table_mapped(&self) -> bool {
        !self.msix_table.load(Ordering::Acquire).is_null()
    }

    /// BAR index and offset of the MSI-X table and pending-bit array.
    pub fn msix_bar_info(&self) -> PciResult<Option<MsixBarInfo>> {
        if self.msix_offset == 0 {
            return Ok(None);
        }
        let table = self.config.read32_(self.msix_offset as u32 + MSIX_TABLE)?;
        let pending = self
            .config
            .read32_(self.msix_offset as u32 + MSIX_PENDING_ARRAY)?;
        Ok(Some(MsixBarInfo {
            table_bar: (table & MSIX_BAR_INDEX_MASK) as usize,
            table_offset: table & !MSIX_BAR_INDEX_MASK,
            pending_bar: (pending & MSIX_BAR_INDEX_MASK) as usize,
            pending_offset: pending & !MSIX_BAR_INDEX_MASK,
        }))
    }

    /// Record where StartDevice placed the MSI-X structures.
    pub(super) fn set_msix_location(&self, table: Option<PhysAddr>, pending: Option<PhysAddr>) {
        let mut location = self.msix_location.lock();
        // once mapped, the table stays where it is
        if !self.is_msix_table_mapped() {
            location.table = table.or(location.table);
        }
        if self.msix_pending_array.load(Ordering::Acquire).is_null() {
            location.pending = pending.or(location.pending);
        }
    }

    fn check_type(&self, msi_type: MsiType) -> PciResult {
        let offset = match msi_type {
            MsiType::Basic => self.msi_offset,
            MsiType::Extended => self.msix_offset,
        };
        if offset == 0 {
            return Err(PciError::NOT_SUPPORTED);
        }
        Ok(())
    }

    fn check_maskable(&self) -> PciResult {
        if !self.flags.contains(MsiFlags::MASKABLE) {
            return Err(PciError::NOT_SUPPORTED);
        }
        Ok(())
    }

    fn check_range(&self, msi_type: MsiType, index: u64, count: u64) -> PciResult {
        match index.checked_add(count) {
            Some(end) if end <= self.max_vectors(msi_type) => Ok(()),
            _ => Err(PciError::OUT_OF_BOUNDS),
        }
    }

    fn msi_reg(&self, offset_32: u32, offset_64: u32) -> u32 {
        let offset = if self.flags.contains(MsiFlags::CAP_64BIT) {
            offset_64
        } else {
            offset_32
        };
        self.msi_offset as u32 + offset
    }

    /// Map `size` bytes at `paddr` into `slot` unless somebody beat us to it.
    fn map_lazily<T>(&self, slot: &AtomicPtr<T>, paddr: PhysAddr, size: usize) -> PciResult<*mut T> {
        let current = slot.load(Ordering::Acquire);
        if !current.is_null() {
            return Ok(current);
        }
        let vaddr = self.mapper.map_physical(
            paddr,
            size,
            CachePolicy::UncachedDevice,
            MMUFlags::READ | MMUFlags::WRITE,
        )?;
        let mapped = vaddr as *mut T;
        match slot.compare_exchange(null_mut(), mapped, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => Ok(mapped),
            Err(winner) => {
                self.mapper.unmap(vaddr, size);
                Ok(winner)
            }
        }
    }

    fn table_size(&self) -> usize {
        self.msix_max_vectors as usize * MSIX_TABLE_ENTRY_SIZE
    }

    fn pending_array_size(&self) -> usize {
        ((self.msix_max_vectors as usize + 63) / 64) * 8
    }

    /// The MSI-X vector table, mapped on first use.
    fn msix_table(&self) -> PciResult<&[MsixTableEntry]> {
        let paddr = self.msix_table_phys().ok_or(PciError::TOO_EARLY)?;
        let table = self.map_lazily(&self.msix_table, paddr, self.table_size())?;
        Ok(unsafe { core::slice::from_raw_parts(table, self.msix_max_vectors as usize) })
    }

    /// The MSI-X pending-bit array, mapped on first use.
    fn msix_pending_array(&self) -> PciResult<&[Mmio<u64>]> {
        let paddr = self.msix_pending_phys().ok_or(PciError::TOO_EARLY)?;
        let array = self.map_lazily(&self.msix_pending_array, paddr, self.pending_array_size())?;
        Ok(unsafe { core::slice::from_raw_parts(array, self.pending_array_size() / 8) })
    }

    pub fn get_info(&self, msi_type: MsiType) -> PciResult<MsiInformation> {
        self.check_type(msi_type)?;
        match msi_type {
            MsiType::Basic => {
                let control = self.config.read16_(self.msi_offset as u32 + MSI_CONTROL)?;
                let mut flags = MsiInfoFlags::empty();
                flags.set(MsiInfoFlags::ENABLED, control & MSI_CONTROL_ENABLE != 0);
                flags.set(MsiInfoFlags::CAP_64BIT, control & MSI_CONTROL_64BIT != 0);
                flags.set(MsiInfoFlags::MASKABLE, control & MSI_CONTROL_VECTOR_MASKING != 0);
                let enabled = (control & MSI_CONTROL_MULTI_ENABLE_MASK) >> MSI_CONTROL_MULTI_ENABLE_SHIFT;
                Ok(MsiInformation {
                    msi_type,
                    flags,
                    max_vector_count: self.msi_max_vectors,
                    vector_count: 1 << enabled,
                })
            }
            MsiType::Extended => {
                let control = self.config.read16_(self.msix_offset as u32 + MSIX_CONTROL)?;
                let mut flags = MsiInfoFlags::CAP_64BIT | MsiInfoFlags::MASKABLE;
                flags.set(MsiInfoFlags::ENABLED, control & MSIX_CONTROL_ENABLE != 0);
                flags.set(MsiInfoFlags::GLOBAL_MASK, control & MSIX_CONTROL_GLOBAL_MASK != 0);
                Ok(MsiInformation {
                    msi_type,
                    flags,
                    max_vector_count: self.msix_max_vectors,
                    vector_count: self.msix_vector_count(),
                })
            }
        }
    }

    /// Enable or disable a flavour. For MSI this also sets the number of
    /// enabled vectors; for MSI-X the global mask.
    ///
    /// Enabling disables legacy INTx on the function.
    pub fn set_info(&self, info: &MsiInformation) -> PciResult {
        self.check_type(info.msi_type)?;
        let enable = info.flags.contains(MsiInfoFlags::ENABLED);
        match info.msi_type {
            MsiType::Basic => {
                let count = info.vector_count;
                if count == 0 || count > self.msi_max_vectors || !count.is_power_of_two() {
                    return Err(PciError::INVALID_PARAMETER);
                }
                let encoded = count.trailing_zeros();
                if encoded > MSI_MAXIMUM_VECTOR_ENCODING {
                    return Err(PciError::INVALID_PARAMETER);
                }
                let offset = self.msi_offset as u32 + MSI_CONTROL;
                let control = self.config.read16_(offset)?;
                let mut value = (encoded as u16) << MSI_CONTROL_MULTI_ENABLE_SHIFT;
                if enable {
                    value |= MSI_CONTROL_ENABLE;
                }
                let control = (control & !MSI_CONTROL_WRITABLE) | (value & MSI_CONTROL_WRITABLE);
                self.config.write16_(offset, control)?;
                self.msi_vector_count.store(count, Ordering::SeqCst);
            }
            MsiType::Extended => {
                let offset = self.msix_offset as u32 + MSIX_CONTROL;
                let control = self.config.read16_(offset)?;
                let mut value = 0;
                if enable {
                    value |= MSIX_CONTROL_ENABLE;
                }
                if info.flags.contains(MsiInfoFlags::GLOBAL_MASK) {
                    value |= MSIX_CONTROL_GLOBAL_MASK;
                }
                let control = (control & !MSIX_CONTROL_WRITABLE) | value;
                self.config.write16_(offset, control)?;
            }
        }
        if enable {
            let command = self.config.read16(PciReg16::Command)?;
            self.config
                .write16(PciReg16::Command, command | PCI_COMMAND_INTX_DISABLE)?;
        }
        Ok(())
    }

    /// Program `count` vectors starting at table entry `index` to raise
    /// `vector` onwards on `processors`.
    ///
    /// MSI has a single address/data pair, so `count` collapses to one.
    pub fn set_vectors(
        &self,
        msi_type: MsiType,
        vector: u64,
        index: u64,
        count: u64,
        processors: &ProcessorSet,
    ) -> PciResult {
        self.check_type(msi_type)?;
        if count == 0 {
            return Err(PciError::INVALID_PARAMETER);
        }
        self.check_range(msi_type, index, count)?;
        match msi_type {
            MsiType::Basic => {
                let info = self.interrupts.get_msi_info(vector, 1, processors)?;
                let message = info.first().ok_or(PciError::UNKNOWN)?;
                let offset = self.msi_offset as u32;
                self.config
                    .write32_(offset + MSI_ADDRESS_LOW, message.address as u32)?;
                if self.flags.contains(MsiFlags::CAP_64BIT) {
                    self.config
                        .write32_(offset + MSI_ADDRESS_HIGH, (message.address >> 32) as u32)?;
                }
                self.config
                    .write16_(self.msi_reg(MSI_DATA_32, MSI_DATA_64), message.data as u16)?;
            }
            MsiType::Extended => {
                let table = self.msix_table()?;
                let info = self.interrupts.get_msi_info(vector, count, processors)?;
                if (info.len() as u64) < count {
                    return Err(PciError::UNKNOWN);
                }
                let entries = &table[index as usize..(index + count) as usize];
                for (entry, message) in entries.iter().zip(info.iter()) {
                    if !entry.is_masked() {
                        entry.set_masked(true);
                        memory_barrier();
                    } else {
                        self.msix_vector_count.fetch_add(1, Ordering::SeqCst);
                    }
                    entry.set_message(message.address, message.data as u32);
                    memory_barrier();
                    entry.set_masked(false);
                }
            }
        }
        debug!(
            "{:?}: {:?} vectors {}..{} -> {:#x}",
            self.config,
            msi_type,
            index,
            index + count,
            vector
        );
        Ok(())
    }

    pub fn mask_vectors(&self, msi_type: MsiType, index: u64, count: u64, mask: bool) -> PciResult {
        self.check_type(msi_type)?;
        if count == 0 {
            return Ok(());
        }
        self.check_range(msi_type, index, count)?;
        match msi_type {
            MsiType::Basic => {
                self.check_maskable()?;
                let bits = (index..index + count).fold(0u32, |bits, i| bits | 1 << i);
                let offset = self.msi_reg(MSI_MASK_32, MSI_MASK_64);
                let current = self.config.read32_(offset)?;
                let value = if mask { current | bits } else { current & !bits };
                self.config.write32_(offset, value)?;
            }
            MsiType::Extended => {
                let table = self.msix_table()?;
                for entry in &table[index as usize..(index + count) as usize] {
                    if entry.is_masked() == mask {
                        continue;
                    }
                    entry.set_masked(mask);
                    if mask {
                        self.msix_vector_count.fetch_sub(1, Ordering::SeqCst);
                    } else {
                        self.msix_vector_count.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }
        }
        Ok(())
    }

    pub fn is_vector_masked(&self, msi_type: MsiType, index: u64) -> PciResult<bool> {
        self.check_type(msi_type)?;
        self.check_range(msi_type, index, 1)?;
        match msi_type {
            MsiType::Basic => {
                self.check_maskable()?;
                let bits = self.config.read32_(self.msi_reg(MSI_MASK_32, MSI_MASK_64))?;
                Ok(bits & (1 << index) != 0)
            }
            MsiType::Extended => Ok(self.msix_table()?[index as usize].is_masked()),
        }
    }

    pub fn is_vector_pending(&self, msi_type: MsiType, index: u64) -> PciResult<bool> {
        self.check_type(msi_type)?;
        self.check_range(msi_type, index, 1)?;
        match msi_type {
            MsiType::Basic => {
                self.check_maskable()?;
                let bits = self
                    .config
                    .read32_(self.msi_reg(MSI_PENDING_32, MSI_PENDING_64))?;
                Ok(bits & (1 << index) != 0)
            }
            MsiType::Extended => {
                let word = self.msix_pending_array()?[index as usize / 64].read();
                Ok(word & (1 << (index % 64)) != 0)
            }
        }
    }
}

impl Drop for MsiContext {
    fn drop(&mut self) {
        let table = *self.msix_table.get_mut();
        if !table.is_null() {
            self.mapper.unmap(table as usize, self.table_size());
        }
        let pending = *self.msix_pending_array.get_mut();
        if !pending.is_null() {
            self.mapper.unmap(pending as usize, self.pending_array_size());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::pio::Mechanism1;
    use super::*;
    use alloc::vec::Vec;
    use pci_hal::libos::{
        FakeConfigSpace, FakeFunction, FakeInterruptController, FakePlatform, HostMemory,
    };

    const TABLE_PHYS: PhysAddr = 0xfebf_0000;
    const PBA_PHYS: PhysAddr = 0xfebf_0800;

    struct Fixture {
        space: Arc<FakeConfigSpace>,
        mem: Arc<HostMemory>,
        irq: Arc<FakeInterruptController>,
        platform: PciPlatform,
        config: PciConfig,
    }

    fn fixture(function: FakeFunction) -> Fixture {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 3, 0, function);
        let mem = Arc::new(HostMemory::new());
        mem.add_region(TABLE_PHYS, 0x1000);
        let irq = Arc::new(FakeInterruptController::new());
        let access = Arc::new(Mechanism1::new(space.clone()));
        let platform = PciPlatform {
            root_config: access.clone(),
            mapper: mem.clone(),
            interrupts: irq.clone(),
            caps: Arc::new(FakePlatform::new(true)),
        };
        let config = PciConfig::new(access, 0, 3, 0);
        Fixture {
            space,
            mem,
            irq,
            platform,
            config,
        }
    }

    /// MSI-X with eight vectors, table in BAR 0 at 0x0, pending array at 0x800.
    fn msix_function() -> FakeFunction {
        FakeFunction::new(0x15ad, 0x07b0, 0x0200_0000)
            .bar(0, TABLE_PHYS as u32, 0xffff_f000)
            .capability(0x40, 0x01, &[0; 6])
            .capability(0x48, 0x11, &[0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x08, 0x00, 0x00])
    }

    /// 64-bit maskable MSI with four vectors.
    fn msi_function() -> FakeFunction {
        FakeFunction::new(0x8086, 0x10d3, 0x0200_0000).capability(0x50, 0x05, &[0x84, 0x01])
    }

    fn discover(f: &Fixture) -> Arc<MsiContext> {
        MsiContext::discover(f.config.clone(), &f.platform)
            .unwrap()
            .unwrap()
    }

    fn started_msix() -> (Fixture, Arc<MsiContext>) {
        let f = fixture(msix_function());
        let ctx = discover(&f);
        ctx.set_msix_location(Some(TABLE_PHYS), Some(PBA_PHYS));
        (f, ctx)
    }

    #[test]
    fn discovery_records_offsets_and_limits() {
        let f = fixture(msix_function());
        let ctx = discover(&f);
        assert_eq!(ctx.msi_offset(), 0);
        assert_eq!(ctx.msix_offset(), 0x48);
        assert_eq!(ctx.max_vectors(MsiType::Extended), 8);
        assert_eq!(
            ctx.msix_bar_info().unwrap(),
            Some(MsixBarInfo {
                table_bar: 0,
                table_offset: 0,
                pending_bar: 0,
                pending_offset: 0x800,
            })
        );

        let f = fixture(msi_function());
        let ctx = discover(&f);
        assert_eq!(ctx.msi_offset(), 0x50);
        assert_eq!(ctx.max_vectors(MsiType::Basic), 4);
        assert_eq!(ctx.flags(), MsiFlags::CAP_64BIT | MsiFlags::MASKABLE);
        assert_eq!(ctx.msix_bar_info().unwrap(), None);
    }

    #[test]
    fn nothing_without_capabilities_or_platform_support() {
        let f = fixture(FakeFunction::new(0x8086, 0x100e, 0x0200_0000));
        assert!(MsiContext::discover(f.config.clone(), &f.platform)
            .unwrap()
            .is_none());

        let mut f = fixture(msi_function());
        f.platform.caps = Arc::new(FakePlatform::new(false));
        assert!(MsiContext::discover(f.config.clone(), &f.platform)
            .unwrap()
            .is_none());
    }

    #[test]
    fn missing_flavour_is_not_supported() {
        let f = fixture(msi_function());
        let ctx = discover(&f);
        assert_eq!(
            ctx.get_info(MsiType::Extended).err(),
            Some(PciError::NOT_SUPPORTED)
        );
        assert_eq!(
            ctx.set_vectors(MsiType::Extended, 0x40, 0, 1, &ProcessorSet::All),
            Err(PciError::NOT_SUPPORTED)
        );
        assert_eq!(
            ctx.mask_vectors(MsiType::Extended, 0, 1, true),
            Err(PciError::NOT_SUPPORTED)
        );
    }

    #[test]
    fn msi_set_info_validates_count() {
        let f = fixture(msi_function());
        let ctx = discover(&f);
        for bad in [0, 3, 8] {
            let info = MsiInformation {
                msi_type: MsiType::Basic,
                flags: MsiInfoFlags::ENABLED,
                max_vector_count: 4,
                vector_count: bad,
            };
            assert_eq!(ctx.set_info(&info), Err(PciError::INVALID_PARAMETER));
        }
    }

    #[test]
    fn msi_enable_round_trip_preserves_control() {
        let f = fixture(msi_function());
        let ctx = discover(&f);
        let mut info = MsiInformation {
            msi_type: MsiType::Basic,
            flags: MsiInfoFlags::ENABLED,
            max_vector_count: 4,
            vector_count: 4,
        };
        ctx.set_info(&info).unwrap();
        let enabled = f.space.read16(0, 3, 0, 0x52);
        assert_eq!(enabled, 0x01a5);
        assert_ne!(f.space.read16(0, 3, 0, 0x04) & PCI_COMMAND_INTX_DISABLE, 0);
        let got = ctx.get_info(MsiType::Basic).unwrap();
        assert_eq!(got.vector_count, 4);
        assert_eq!(
            got.flags,
            MsiInfoFlags::ENABLED | MsiInfoFlags::CAP_64BIT | MsiInfoFlags::MASKABLE
        );

        info.flags = MsiInfoFlags::empty();
        ctx.set_info(&info).unwrap();
        assert_eq!(f.space.read16(0, 3, 0, 0x52), enabled & !MSI_CONTROL_ENABLE);
        info.flags = MsiInfoFlags::ENABLED;
        ctx.set_info(&info).unwrap();
        assert_eq!(f.space.read16(0, 3, 0, 0x52), enabled);
        // capability ID and next pointer untouched
        assert_eq!(f.space.read16(0, 3, 0, 0x50), 0x0005);
    }

    #[test]
    fn msi_vectors_and_masks() {
        let f = fixture(msi_function());
        let ctx = discover(&f);
        ctx.set_vectors(MsiType::Basic, 0x41, 0, 4, &ProcessorSet::Single(1))
            .unwrap();
        assert_eq!(f.irq.requests(), [(0x41, 1, ProcessorSet::Single(1))]);
        assert_eq!(f.space.read32(0, 3, 0, 0x54), 0xfee0_1000);
        assert_eq!(f.space.read32(0, 3, 0, 0x58), 0);
        assert_eq!(f.space.read16(0, 3, 0, 0x5c), 0x41);
        assert_eq!(
            ctx.set_vectors(MsiType::Basic, 0x41, 2, 4, &ProcessorSet::All),
            Err(PciError::OUT_OF_BOUNDS)
        );

        ctx.mask_vectors(MsiType::Basic, 1, 2, true).unwrap();
        assert_eq!(f.space.read32(0, 3, 0, 0x60), 0b0110);
        assert!(ctx.is_vector_masked(MsiType::Basic, 2).unwrap());
        assert!(!ctx.is_vector_masked(MsiType::Basic, 3).unwrap());
        ctx.mask_vectors(MsiType::Basic, 2, 1, false).unwrap();
        assert_eq!(f.space.read32(0, 3, 0, 0x60), 0b0010);

        f.space.with_function(0, 3, 0, |func| func.set32(0x64, 0b1000));
        assert!(ctx.is_vector_pending(MsiType::Basic, 3).unwrap());
        assert!(!ctx.is_vector_pending(MsiType::Basic, 0).unwrap());
        assert_eq!(
            ctx.is_vector_pending(MsiType::Basic, 4),
            Err(PciError::OUT_OF_BOUNDS)
        );
    }

    #[test]
    fn unmaskable_msi_refuses_masking() {
        // 32-bit, two vectors, no per-vector masking
        let f = fixture(FakeFunction::new(0x8086, 0x2922, 0).capability(0x80, 0x05, &[0x02, 0x00]));
        let ctx = discover(&f);
        assert_eq!(
            ctx.mask_vectors(MsiType::Basic, 0, 1, true),
            Err(PciError::NOT_SUPPORTED)
        );
        assert_eq!(
            ctx.is_vector_pending(MsiType::Basic, 0),
            Err(PciError::NOT_SUPPORTED)
        );
        ctx.set_vectors(MsiType::Basic, 0x30, 0, 1, &ProcessorSet::All)
            .unwrap();
        // 32-bit layout puts the data right after the address
        assert_eq!(f.space.read16(0, 3, 0, 0x88), 0x30);
    }

    #[test]
    fn msix_too_early_before_start() {
        let f = fixture(msix_function());
        let ctx = discover(&f);
        assert_eq!(
            ctx.set_vectors(MsiType::Extended, 0x40, 0, 1, &ProcessorSet::All),
            Err(PciError::TOO_EARLY)
        );
        assert_eq!(
            ctx.is_vector_pending(MsiType::Extended, 0),
            Err(PciError::TOO_EARLY)
        );
        assert!(!ctx.is_msix_table_mapped());
        assert_eq!(f.mem.map_count(), 0);
    }

    #[test]
    fn msix_vectors_are_programmed_and_unmasked() {
        let (f, ctx) = started_msix();
        // entries come out of reset masked
        for i in 0..8 {
            f.mem.write32(TABLE_PHYS + i * 16 + 12, MSIX_ENTRY_MASKED);
        }
        ctx.set_vectors(MsiType::Extended, 0x50, 2, 3, &ProcessorSet::Single(3))
            .unwrap();
        let messages = f
            .platform
            .interrupts
            .get_msi_info(0x50, 3, &ProcessorSet::Single(3))
            .unwrap();
        for (k, message) in messages.iter().enumerate() {
            let entry = TABLE_PHYS + (2 + k) * 16;
            assert_eq!(f.mem.read32(entry), message.address as u32);
            assert_eq!(f.mem.read32(entry + 4), (message.address >> 32) as u32);
            assert_eq!(f.mem.read32(entry + 8), message.data as u32);
            assert_eq!(f.mem.read32(entry + 12) & MSIX_ENTRY_MASKED, 0);
        }
        assert_eq!(ctx.msix_vector_count(), 3);
        // reprogramming an unmasked vector does not count it twice
        ctx.set_vectors(MsiType::Extended, 0x50, 2, 1, &ProcessorSet::Single(3))
            .unwrap();
        assert_eq!(ctx.msix_vector_count(), 3);
        assert_eq!(
            ctx.set_vectors(MsiType::Extended, 0x50, 6, 3, &ProcessorSet::All),
            Err(PciError::OUT_OF_BOUNDS)
        );
        assert_eq!(
            ctx.set_vectors(MsiType::Extended, 0x50, 0, 0, &ProcessorSet::All),
            Err(PciError::INVALID_PARAMETER)
        );
        assert_eq!(f.mem.map_count(), 1);
    }

    #[test]
    fn msix_masking() {
        let (f, ctx) = started_msix();
        for i in 0..8 {
            f.mem.write32(TABLE_PHYS + i * 16 + 12, MSIX_ENTRY_MASKED);
        }
        ctx.set_vectors(MsiType::Extended, 0x60, 0, 8, &ProcessorSet::All)
            .unwrap();
        assert_eq!(ctx.msix_vector_count(), 8);

        ctx.mask_vectors(MsiType::Extended, 2, 4, true).unwrap();
        for k in 2..6 {
            assert!(ctx.is_vector_masked(MsiType::Extended, k).unwrap());
        }
        assert!(ctx.is_vector_masked(MsiType::Extended, 3).unwrap());
        assert!(!ctx.is_vector_masked(MsiType::Extended, 6).unwrap());
        assert_eq!(ctx.msix_vector_count(), 4);
        // masking again changes nothing
        ctx.mask_vectors(MsiType::Extended, 2, 4, true).unwrap();
        assert_eq!(ctx.msix_vector_count(), 4);

        ctx.mask_vectors(MsiType::Extended, 2, 4, false).unwrap();
        for k in 2..6 {
            assert!(!ctx.is_vector_masked(MsiType::Extended, k).unwrap());
        }
        assert_eq!(ctx.msix_vector_count(), 8);
        assert_eq!(ctx.mask_vectors(MsiType::Extended, 0, 0, true), Ok(()));
    }

    #[test]
    fn msix_pending_bits() {
        let (f, ctx) = started_msix();
        f.mem.write64(PBA_PHYS, 0b1010_0000);
        assert!(ctx.is_vector_pending(MsiType::Extended, 5).unwrap());
        assert!(ctx.is_vector_pending(MsiType::Extended, 7).unwrap());
        assert!(!ctx.is_vector_pending(MsiType::Extended, 6).unwrap());
        assert_eq!(
            ctx.is_vector_pending(MsiType::Extended, 8),
            Err(PciError::OUT_OF_BOUNDS)
        );
    }

    #[test]
    fn msix_info_and_global_mask() {
        let (f, ctx) = started_msix();
        let info = MsiInformation {
            msi_type: MsiType::Extended,
            flags: MsiInfoFlags::ENABLED | MsiInfoFlags::GLOBAL_MASK,
            max_vector_count: 8,
            vector_count: 0,
        };
        ctx.set_info(&info).unwrap();
        assert_eq!(f.space.read16(0, 3, 0, 0x4a), 0xc007);
        let got = ctx.get_info(MsiType::Extended).unwrap();
        assert!(got.flags.contains(
            MsiInfoFlags::ENABLED
                | MsiInfoFlags::GLOBAL_MASK
                | MsiInfoFlags::CAP_64BIT
                | MsiInfoFlags::MASKABLE
        ));
        assert_eq!(got.max_vector_count, 8);
    }

    #[test]
    fn table_location_is_fixed_once_mapped() {
        let (f, ctx) = started_msix();
        ctx.is_vector_masked(MsiType::Extended, 0).unwrap();
        ctx.set_msix_location(Some(0xdead_0000), None);
        assert_eq!(ctx.msix_table_phys(), Some(TABLE_PHYS));
        drop(ctx);
        assert_eq!(f.mem.unmap_count(), f.mem.map_count());
    }

    #[async_std::test]
    async fn concurrent_first_use_maps_once() {
        let (f, ctx) = started_msix();
        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let ctx = ctx.clone();
                async_std::task::spawn(async move {
                    ctx.is_vector_masked(MsiType::Extended, i % 8).unwrap()
                })
            })
            .collect();
        for task in tasks {
            task.await;
        }
        assert!(ctx.is_msix_table_mapped());
        assert_eq!(f.mem.map_count() - f.mem.unmap_count(), 1);
    }
}

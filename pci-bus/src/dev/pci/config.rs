use super::constants::*;
use crate::{PciError, PciResult};
use alloc::sync::Arc;
use numeric_enum_macro::numeric_enum;

/// Primitive access to configuration space.
///
/// `size` is 1, 2, 4 or 8. Sub-dword accesses must not cross a dword and
/// 8-byte accesses must be dword aligned. Absent functions read all ones.
pub trait ConfigAccess: Send + Sync {
    fn read(&self, bus: u8, dev: u8, func: u8, offset: u32, size: usize) -> PciResult<u64>;
    fn write(&self, bus: u8, dev: u8, func: u8, offset: u32, size: usize, value: u64)
        -> PciResult;
}

/// Validate an access against the rules of [`ConfigAccess`].
pub(super) fn check_access(offset: u32, size: usize) -> PciResult {
    let shift = (offset & 0x3) as usize;
    let ok = match size {
        1 | 2 | 4 => shift + size <= 4,
        8 => shift == 0,
        _ => false,
    };
    if !ok || offset as usize + size > PCI_CONFIG_SPACE_SIZE as usize {
        return Err(PciError::INVALID_PARAMETER);
    }
    Ok(())
}

/// All ones in the low `size` bytes.
pub(super) fn all_ones(size: usize) -> u64 {
    u64::MAX >> (64 - size * 8)
}

/// The configuration space of one function.
#[derive(Clone)]
pub struct PciConfig {
    access: Arc<dyn ConfigAccess>,
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
}

impl core::fmt::Debug for PciConfig {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PciConfig({:02x}:{:02x}.{})", self.bus, self.dev, self.func)
    }
}

impl PciConfig {
    pub fn new(access: Arc<dyn ConfigAccess>, bus: u8, dev: u8, func: u8) -> Self {
        PciConfig {
            access,
            bus,
            dev,
            func,
        }
    }

    pub fn access(&self) -> &Arc<dyn ConfigAccess> {
        &self.access
    }

    pub fn read(&self, offset: u32, size: usize) -> PciResult<u64> {
        self.access
            .read(self.bus, self.dev, self.func, offset, size)
    }
    pub fn write(&self, offset: u32, size: usize, value: u64) -> PciResult {
        self.access
            .write(self.bus, self.dev, self.func, offset, size, value)
    }

    pub fn read8(&self, reg: PciReg8) -> PciResult<u8> {
        self.read8_(reg as u32)
    }
    pub fn read8_(&self, offset: u32) -> PciResult<u8> {
        Ok(self.read(offset, 1)? as u8)
    }
    pub fn read16(&self, reg: PciReg16) -> PciResult<u16> {
        self.read16_(reg as u32)
    }
    pub fn read16_(&self, offset: u32) -> PciResult<u16> {
        Ok(self.read(offset, 2)? as u16)
    }
    pub fn read32(&self, reg: PciReg32) -> PciResult<u32> {
        self.read32_(reg as u32)
    }
    pub fn read32_(&self, offset: u32) -> PciResult<u32> {
        Ok(self.read(offset, 4)? as u32)
    }
    pub fn read64_(&self, offset: u32) -> PciResult<u64> {
        self.read(offset, 8)
    }
    pub fn read_bar(&self, bar: usize) -> PciResult<u32> {
        self.read32_(PciReg32::BARBase as u32 + bar as u32 * 4)
    }

    pub fn write8(&self, reg: PciReg8, value: u8) -> PciResult {
        self.write8_(reg as u32, value)
    }
    pub fn write8_(&self, offset: u32, value: u8) -> PciResult {
        self.write(offset, 1, value as u64)
    }
    pub fn write16(&self, reg: PciReg16, value: u16) -> PciResult {
        self.write16_(reg as u32, value)
    }
    pub fn write16_(&self, offset: u32, value: u16) -> PciResult {
        self.write(offset, 2, value as u64)
    }
    pub fn write32(&self, reg: PciReg32, value: u32) -> PciResult {
        self.write32_(reg as u32, value)
    }
    pub fn write32_(&self, offset: u32, value: u32) -> PciResult {
        self.write(offset, 4, value as u64)
    }
    pub fn write64_(&self, offset: u32, value: u64) -> PciResult {
        self.write(offset, 8, value)
    }
    pub fn write_bar(&self, bar: usize, value: u32) -> PciResult {
        self.write32_(PciReg32::BARBase as u32 + bar as u32 * 4, value)
    }
    /// Program a 64-bit BAR occupying `bar` and `bar + 1`.
    pub fn write_bar64(&self, bar: usize, value: u64) -> PciResult {
        self.write64_(PciReg32::BARBase as u32 + bar as u32 * 4, value)
    }
}

numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum PciReg8 {
        // standard
        RevisionId = 0x8,
        ProgramInterface = 0x9,
        SubClass = 0xA,
        BaseClass = 0xB,
        HeaderType = 0xE,
        CapabilitiesPtr = 0x34,
        InterruptLine = 0x3C,
        InterruptPin = 0x3D,

        // bridge
        PrimaryBusId = 0x18,
        SecondaryBusId = 0x19,
        SubordinateBusId = 0x1A,

        // cardbus bridge
        CardbusCapabilitiesPtr = 0x14,
    }
}
numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum PciReg16 {
        // standard
        VendorId = 0x0,
        DeviceId = 0x2,
        Command = 0x4,
        Status = 0x6,
        // line in the low byte, pin in the high byte
        Interrupt = 0x3C,

        // bridge
        IoWindow = 0x1C,
    }
}
numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum PciReg32 {
        // standard
        Id = 0x0,
        ControlStatus = 0x4,
        ClassCode = 0x8,
        Header = 0xC,
        BARBase = 0x10,

        // bridge
        BusNumbers = 0x18,
        MemoryWindow = 0x20,
        PrefetchableMemoryWindow = 0x24,
        PrefetchableMemoryBaseUpper = 0x28,
        PrefetchableMemoryLimitUpper = 0x2C,
        IoWindowUpper = 0x30,
    }
}

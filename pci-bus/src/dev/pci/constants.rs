#![allow(missing_docs)]

pub(super) const PCI_MAX_DEVICES_PER_BUS: u8 = 32;
pub(super) const PCI_MAX_FUNCTIONS_PER_DEVICE: u8 = 8;
pub(super) const PCI_MAX_LEGACY_IRQ_PINS: u8 = 4;
pub(super) const PCI_BAR_COUNT: usize = 6;

/// Size of the standard configuration header, the only part reachable here.
pub const PCI_CONFIG_SPACE_SIZE: u32 = 0x100;
pub const PCI_INVALID_VENDOR_ID: u16 = 0xFFFF;

pub(super) const PCI_HEADER_TYPE_MULTI_FN: u32 = 0x80;
pub(super) const PCI_HEADER_TYPE_MASK: u32 = 0x7F;
pub(super) const PCI_HEADER_TYPE_CARDBUS: u32 = 0x2;

// Class-code dword values with the revision masked off.
pub(super) const PCI_CLASS_CODE_MASK: u32 = 0xFFFF_FF00;
pub(super) const PCI_CLASS_BRIDGE_PCI: u32 = 0x0604_0000;
pub(super) const PCI_CLASS_BRIDGE_PCI_SUBTRACTIVE: u32 = 0x0604_0100;

// Command register.
pub const PCI_COMMAND_IO_DECODE: u16 = 1 << 0;
pub const PCI_COMMAND_MEMORY_DECODE: u16 = 1 << 1;
pub const PCI_COMMAND_BUS_MASTER: u16 = 1 << 2;
pub const PCI_COMMAND_SPECIAL_CYCLES: u16 = 1 << 3;
pub const PCI_COMMAND_WRITE_INVALIDATE: u16 = 1 << 4;
pub const PCI_COMMAND_SERR: u16 = 1 << 8;
pub const PCI_COMMAND_INTX_DISABLE: u16 = 1 << 10;
pub(super) const PCI_COMMAND_ENABLE_FLAGS: u16 = PCI_COMMAND_IO_DECODE
    | PCI_COMMAND_MEMORY_DECODE
    | PCI_COMMAND_BUS_MASTER
    | PCI_COMMAND_WRITE_INVALIDATE;
pub(super) const PCI_BRIDGE_COMMAND_FLAGS: u16 = PCI_COMMAND_BUS_MASTER
    | PCI_COMMAND_SPECIAL_CYCLES
    | PCI_COMMAND_WRITE_INVALIDATE
    | PCI_COMMAND_SERR;

// Status register.
pub(super) const PCI_STATUS_CAPABILITIES_LIST: u16 = 1 << 4;

// BAR flag bits.
pub(super) const PCI_BAR_IO_SPACE: u32 = 1 << 0;
pub(super) const PCI_BAR_IO_FLAGS_MASK: u32 = 0x3;
pub(super) const PCI_BAR_MEMORY_SIZE_MASK: u32 = 0x6;
pub(super) const PCI_BAR_MEMORY_SIZE_32: u32 = 0x0;
pub(super) const PCI_BAR_MEMORY_SIZE_1MB: u32 = 0x2;
pub(super) const PCI_BAR_MEMORY_SIZE_64: u32 = 0x4;
pub(super) const PCI_BAR_MEMORY_PREFETCHABLE: u32 = 1 << 3;
pub(super) const PCI_BAR_MEMORY_FLAGS_MASK: u32 = 0xF;

// Bridge windows.
pub(super) const PCI_BRIDGE_IO_GRANULARITY: u64 = 0x1000;
pub(super) const PCI_BRIDGE_MEMORY_GRANULARITY: u64 = 0x10_0000;
pub(super) const PCI_BRIDGE_IO_BASE_MASK: u32 = 0x00F0;
pub(super) const PCI_BRIDGE_IO_LIMIT_MASK: u32 = 0xF000;
pub(super) const PCI_BRIDGE_IO_DECODE_MASK: u32 = 0x000F;
pub(super) const PCI_BRIDGE_IO_LIMIT_DECODE_MASK: u32 = 0x0F00;
pub(super) const PCI_BRIDGE_IO_DECODE_32: u32 = 0x0001;
pub(super) const PCI_BRIDGE_IO_LIMIT_DECODE_32: u32 = 0x0100;
pub(super) const PCI_BRIDGE_IO_BASE_HIGH_MASK: u32 = 0x0000_FFFF;
pub(super) const PCI_BRIDGE_IO_LIMIT_HIGH_MASK: u32 = 0xFFFF_0000;
pub(super) const PCI_BRIDGE_MEMORY_BASE_MASK: u32 = 0x0000_FFF0;
pub(super) const PCI_BRIDGE_MEMORY_LIMIT_MASK: u32 = 0xFFF0_0000;
pub(super) const PCI_BRIDGE_PREFETCH_DECODE_MASK: u32 = 0x0000_000F;
pub(super) const PCI_BRIDGE_PREFETCH_LIMIT_DECODE_MASK: u32 = 0x000F_0000;
pub(super) const PCI_BRIDGE_PREFETCH_DECODE_64: u32 = 0x0000_0001;
pub(super) const PCI_BRIDGE_PREFETCH_LIMIT_DECODE_64: u32 = 0x0001_0000;
pub(super) const PCI_BRIDGE_SECONDARY_BUS_MASK: u32 = 0x0000_FF00;
pub(super) const PCI_BRIDGE_SECONDARY_BUS_SHIFT: u32 = 8;
pub(super) const PCI_BRIDGE_SUBORDINATE_BUS_MASK: u32 = 0x00FF_0000;
pub(super) const PCI_BRIDGE_SUBORDINATE_BUS_SHIFT: u32 = 16;
pub(super) const PCI_BRIDGE_LATENCY_TIMER_MASK: u32 = 0xFF00_0000;
pub(super) const PCI_BRIDGE_NO_SECONDARY_BUS: u8 = 0xFF;

// Capabilities.
pub(super) const PCI_CAPABILITY_POINTER_MASK: u8 = 0xFC;
pub(super) const PCI_STANDARD_HEADER_SIZE: u32 = 0x40;
// Capabilities are dword aligned and live after the standard header.
pub(super) const PCI_CAPABILITY_WALK_LIMIT: usize =
    ((PCI_CONFIG_SPACE_SIZE - PCI_STANDARD_HEADER_SIZE) / 4) as usize;
pub const PCI_CAPABILITY_MSI: u8 = 0x05;
pub const PCI_CAPABILITY_MSIX: u8 = 0x11;

//! Resource reporting.
//!
//! Functions are sized by writing all ones to every BAR and reading back
//! which address bits stick. Bridges report forwarding windows instead.

use super::config::{PciConfig, PciReg16, PciReg32};
use super::constants::*;
use super::nodes::{BarSet, BridgeWindows, PciNode, PciNodeInner};
use crate::dev::{
    ResourceAllocation, ResourceAllocationList, ResourceCharacteristics,
    ResourceConfigurationList, ResourceFlags, ResourceRequirement, ResourceRequirementList,
    ResourceType,
};
use crate::PciResult;

/// What a function asks for, and what firmware gave it.
pub type ResourceReport = (ResourceConfigurationList, ResourceAllocationList);

/// Length and maximum address of an I/O BAR from its decode bits.
fn io_bar_size(decode: u32) -> (u64, u64) {
    if decode & !PCI_BAR_IO_FLAGS_MASK == 0 {
        return (0, 0);
    }
    let bit = 31 - decode.leading_zeros();
    let maximum = 1u64 << (bit + 1);
    let length = !((decode as u64 | !(maximum - 1)) & !(PCI_BAR_IO_FLAGS_MASK as u64)) + 1;
    (length, maximum)
}

/// Length and maximum address of a memory BAR whose address bits, flags
/// already masked off, are `decode`. Only bits up to `top_bit` count.
fn memory_bar_size(decode: u64, top_bit: u32) -> (u64, u64) {
    let visible = decode & (u64::MAX >> (63 - top_bit));
    if visible == 0 {
        return (0, 0);
    }
    let bit = 63 - visible.leading_zeros();
    if bit == 63 {
        return (decode.wrapping_neg(), u64::MAX);
    }
    let maximum = 1u64 << (bit + 1);
    let length = (!(decode | !(maximum - 1))).wrapping_add(1);
    (length, maximum)
}

/// Memory BAR address bits of slot `index`, both halves for a 64-bit BAR.
fn memory_address(bars: &BarSet, decode_bits: &BarSet, index: usize) -> u64 {
    let low = bars.bar32[index] as u64;
    let value = if decode_bits.bar_pair(index).is_some() {
        low | (bars.bar32[index + 1] as u64) << 32
    } else {
        low
    };
    value & !(PCI_BAR_MEMORY_FLAGS_MASK as u64)
}

fn read_interrupt_pin(config: &PciConfig) -> PciResult<u8> {
    let pin = (config.read16(PciReg16::Interrupt)? >> 8) as u8;
    if pin > PCI_MAX_LEGACY_IRQ_PINS {
        warn!("{:?}: bogus interrupt pin {}, ignoring", config, pin);
        return Ok(0);
    }
    Ok(pin)
}

impl PciNodeInner {
    /// Snapshot the firmware state and size the decode bits, once.
    ///
    /// Decoding is off while the BARs hold all ones; both the BARs and
    /// the command register are restored afterwards.
    pub(super) fn size_bars(&mut self, config: &PciConfig) -> PciResult {
        if self.bars_read {
            return Ok(());
        }
        let control = config.read16(PciReg16::Command)?;
        self.boot_control = control;
        if control & (PCI_COMMAND_IO_DECODE | PCI_COMMAND_MEMORY_DECODE) != 0 {
            for i in 0..PCI_BAR_COUNT {
                self.boot_configuration.bar32[i] = config.read_bar(i)?;
            }
        }
        self.interrupt_pin = read_interrupt_pin(config)?;

        config.write16(PciReg16::Command, 0)?;
        for i in 0..PCI_BAR_COUNT {
            config.write_bar(i, u32::MAX)?;
        }
        self.bar_count = 0;
        for i in 0..PCI_BAR_COUNT {
            let decode = config.read_bar(i)?;
            self.decode_bits.bar32[i] = decode;
            if decode != 0 {
                self.bar_count = i as u8 + 1;
            }
        }
        for i in 0..PCI_BAR_COUNT {
            config.write_bar(i, self.boot_configuration.bar32[i])?;
        }
        config.write16(PciReg16::Command, control)?;
        self.bars_read = true;
        debug!(
            "{:?}: {} BARs decode {:x?}, firmware {:x?}, command {:#x}",
            config, self.bar_count, self.decode_bits.bar32, self.boot_configuration.bar32, control
        );
        Ok(())
    }

    /// Read the bridge's bus numbers and windows as firmware left them, once.
    fn read_bridge_windows(&mut self, config: &PciConfig) -> PciResult {
        if self.bars_read {
            return Ok(());
        }
        let mut windows = BridgeWindows::default();
        let bus = config.read32(PciReg32::BusNumbers)?;
        windows.secondary_bus =
            ((bus & PCI_BRIDGE_SECONDARY_BUS_MASK) >> PCI_BRIDGE_SECONDARY_BUS_SHIFT) as u8;

        let io = config.read16(PciReg16::IoWindow)? as u32;
        windows.io_base = ((io & PCI_BRIDGE_IO_BASE_MASK) as u64) << 8;
        windows.io_limit = (io & PCI_BRIDGE_IO_LIMIT_MASK) as u64;
        let upper_base = io & PCI_BRIDGE_IO_DECODE_MASK == PCI_BRIDGE_IO_DECODE_32;
        let upper_limit = io & PCI_BRIDGE_IO_LIMIT_DECODE_MASK == PCI_BRIDGE_IO_LIMIT_DECODE_32;
        if upper_base || upper_limit {
            let high = config.read32(PciReg32::IoWindowUpper)?;
            if upper_base {
                windows.io_base |= ((high & PCI_BRIDGE_IO_BASE_HIGH_MASK) as u64) << 16;
            }
            if upper_limit {
                windows.io_limit |= (high & PCI_BRIDGE_IO_LIMIT_HIGH_MASK) as u64;
            }
        }

        let memory = config.read32(PciReg32::MemoryWindow)?;
        windows.memory_base = ((memory & PCI_BRIDGE_MEMORY_BASE_MASK) as u64) << 16;
        windows.memory_limit = (memory & PCI_BRIDGE_MEMORY_LIMIT_MASK) as u64;

        let prefetch = config.read32(PciReg32::PrefetchableMemoryWindow)?;
        windows.prefetch_base = ((prefetch & PCI_BRIDGE_MEMORY_BASE_MASK) as u64) << 16;
        windows.prefetch_limit = (prefetch & PCI_BRIDGE_MEMORY_LIMIT_MASK) as u64;
        if prefetch & PCI_BRIDGE_PREFETCH_DECODE_MASK == PCI_BRIDGE_PREFETCH_DECODE_64 {
            let high = config.read32(PciReg32::PrefetchableMemoryBaseUpper)?;
            windows.prefetch_base |= (high as u64) << 32;
        }
        if prefetch & PCI_BRIDGE_PREFETCH_LIMIT_DECODE_MASK == PCI_BRIDGE_PREFETCH_LIMIT_DECODE_64 {
            let high = config.read32(PciReg32::PrefetchableMemoryLimitUpper)?;
            windows.prefetch_limit |= (high as u64) << 32;
        }

        self.interrupt_pin = read_interrupt_pin(config)?;
        self.bridge_windows = windows;
        self.bars_read = true;
        debug!("{:?}: bridge windows {:x?}", config, windows);
        Ok(())
    }
}

/// Length of a window that forwards `[base, limit + granularity)`.
fn window_length(base: u64, limit: u64, granularity: u64) -> u64 {
    if limit >= base {
        limit + granularity - base
    } else {
        0
    }
}

impl PciNode {
    /// Requirements and boot allocations of an ordinary function.
    pub(super) fn query_function_resources(&self) -> PciResult<ResourceReport> {
        let mut inner = self.lock();
        let config = inner.function_config(self)?;
        inner.size_bars(&config)?;

        let decode_bits = inner.decode_bits;
        let boot = inner.boot_configuration;
        let bar_count = inner.bar_count as usize;
        let mut lengths = [0u64; PCI_BAR_COUNT];
        let mut requirements = ResourceRequirementList::new();
        let mut index = 0;
        while index < bar_count {
            let decode = decode_bits.bar32[index];
            let requirement = if decode_bits.is_io(index) {
                let (length, maximum) = io_bar_size(decode);
                lengths[index] = length;
                ResourceRequirement {
                    rtype: ResourceType::IoPort,
                    minimum: 0,
                    maximum,
                    alignment: length,
                    length,
                    characteristics: ResourceCharacteristics::empty(),
                    flags: ResourceFlags::NOT_SHAREABLE,
                }
            } else {
                let top_bit = match decode & PCI_BAR_MEMORY_SIZE_MASK {
                    // decoded below 1 MiB, so the range ends at 1 << 20
                    PCI_BAR_MEMORY_SIZE_1MB => 19,
                    PCI_BAR_MEMORY_SIZE_64 if decode_bits.bar_pair(index).is_some() => 63,
                    _ => 31,
                };
                let address = memory_address(&decode_bits, &decode_bits, index);
                let (length, maximum) = memory_bar_size(address, top_bit);
                lengths[index] = length;
                let mut characteristics = ResourceCharacteristics::empty();
                if decode & PCI_BAR_MEMORY_PREFETCHABLE != 0 {
                    characteristics |= ResourceCharacteristics::MEMORY_PREFETCHABLE;
                }
                ResourceRequirement {
                    rtype: ResourceType::PhysicalAddressSpace,
                    minimum: 0,
                    maximum,
                    alignment: length,
                    length,
                    characteristics,
                    flags: ResourceFlags::NOT_SHAREABLE,
                }
            };
            requirements.push(requirement)?;
            index += if decode_bits.bar_pair(index).is_some() { 2 } else { 1 };
        }

        let pin = inner.interrupt_pin as u64;
        if pin != 0 {
            requirements.push(ResourceRequirement {
                rtype: ResourceType::InterruptLine,
                minimum: pin,
                maximum: pin + 1,
                alignment: 1,
                length: 1,
                characteristics: ResourceCharacteristics::INTERRUPT_LINE_ACTIVE_LOW,
                flags: ResourceFlags::empty(),
            })?;
        }
        let mut configurations = ResourceConfigurationList::new();
        configurations.push(requirements)?;

        let control = inner.boot_control;
        let mut boot_allocations = ResourceAllocationList::new();
        let mut index = 0;
        while index < bar_count {
            let allocation = if decode_bits.is_io(index) {
                let enabled = control & PCI_COMMAND_IO_DECODE != 0;
                ResourceAllocation {
                    rtype: ResourceType::IoPort,
                    allocation: (boot.bar32[index] & !PCI_BAR_IO_FLAGS_MASK) as u64,
                    length: if enabled { lengths[index] } else { 0 },
                    characteristics: ResourceCharacteristics::empty(),
                    flags: ResourceFlags::NOT_SHAREABLE,
                }
            } else {
                let enabled = control & PCI_COMMAND_MEMORY_DECODE != 0;
                let mut characteristics = ResourceCharacteristics::empty();
                if decode_bits.bar32[index] & PCI_BAR_MEMORY_PREFETCHABLE != 0 {
                    characteristics |= ResourceCharacteristics::MEMORY_PREFETCHABLE;
                }
                ResourceAllocation {
                    rtype: ResourceType::PhysicalAddressSpace,
                    allocation: memory_address(&boot, &decode_bits, index),
                    length: if enabled { lengths[index] } else { 0 },
                    characteristics,
                    flags: ResourceFlags::NOT_SHAREABLE,
                }
            };
            boot_allocations.push(allocation)?;
            index += if decode_bits.bar_pair(index).is_some() { 2 } else { 1 };
        }
        if pin != 0 {
            boot_allocations.push(ResourceAllocation {
                rtype: ResourceType::InterruptLine,
                allocation: pin,
                length: 1,
                characteristics: ResourceCharacteristics::INTERRUPT_LINE_ACTIVE_LOW,
                flags: ResourceFlags::empty(),
            })?;
        }
        Ok((configurations, boot_allocations))
    }

    /// Requirements and boot allocations of a PCI-to-PCI bridge function.
    ///
    /// Every window is requested with zero length: a bridge only needs one
    /// if something behind it does.
    pub(super) fn query_bridge_resources(&self) -> PciResult<ResourceReport> {
        let mut inner = self.lock();
        let config = inner.function_config(self)?;
        inner.read_bridge_windows(&config)?;

        let mut requirements = ResourceRequirementList::new();
        requirements.push(ResourceRequirement {
            rtype: ResourceType::BusNumber,
            minimum: 0,
            maximum: 0x100,
            alignment: 1,
            length: 1,
            characteristics: ResourceCharacteristics::empty(),
            flags: ResourceFlags::NOT_SHAREABLE,
        })?;
        requirements.push(ResourceRequirement {
            rtype: ResourceType::IoPort,
            minimum: 0,
            maximum: u32::MAX as u64,
            alignment: PCI_BRIDGE_IO_GRANULARITY,
            length: 0,
            characteristics: ResourceCharacteristics::empty(),
            flags: ResourceFlags::NOT_SHAREABLE,
        })?;
        requirements.push(ResourceRequirement {
            rtype: ResourceType::PhysicalAddressSpace,
            minimum: 0,
            maximum: u32::MAX as u64,
            alignment: PCI_BRIDGE_MEMORY_GRANULARITY,
            length: 0,
            characteristics: ResourceCharacteristics::empty(),
            flags: ResourceFlags::NOT_SHAREABLE,
        })?;
        requirements.push(ResourceRequirement {
            rtype: ResourceType::PhysicalAddressSpace,
            minimum: 0,
            maximum: u64::MAX,
            alignment: PCI_BRIDGE_MEMORY_GRANULARITY,
            length: 0,
            characteristics: ResourceCharacteristics::MEMORY_PREFETCHABLE,
            flags: ResourceFlags::NOT_SHAREABLE,
        })?;
        let mut configurations = ResourceConfigurationList::new();
        configurations.push(requirements)?;

        let w = inner.bridge_windows;
        let mut boot_allocations = ResourceAllocationList::new();
        if w.secondary_bus != PCI_BRIDGE_NO_SECONDARY_BUS {
            let windows = [
                (
                    ResourceType::BusNumber,
                    w.secondary_bus as u64,
                    1,
                    ResourceCharacteristics::empty(),
                ),
                (
                    ResourceType::IoPort,
                    w.io_base,
                    window_length(w.io_base, w.io_limit, PCI_BRIDGE_IO_GRANULARITY),
                    ResourceCharacteristics::empty(),
                ),
                (
                    ResourceType::PhysicalAddressSpace,
                    w.memory_base,
                    window_length(w.memory_base, w.memory_limit, PCI_BRIDGE_MEMORY_GRANULARITY),
                    ResourceCharacteristics::empty(),
                ),
                (
                    ResourceType::PhysicalAddressSpace,
                    w.prefetch_base,
                    window_length(w.prefetch_base, w.prefetch_limit, PCI_BRIDGE_MEMORY_GRANULARITY),
                    ResourceCharacteristics::MEMORY_PREFETCHABLE,
                ),
            ];
            for (rtype, allocation, length, characteristics) in windows.iter().copied() {
                boot_allocations.push(ResourceAllocation {
                    rtype,
                    allocation,
                    length,
                    characteristics,
                    flags: ResourceFlags::NOT_SHAREABLE,
                })?;
            }
        }
        Ok((configurations, boot_allocations))
    }
}

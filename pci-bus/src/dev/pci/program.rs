//! Programming granted resources into BARs and bridge windows.

use super::config::{PciReg16, PciReg32};
use super::constants::*;
use super::nodes::PciNode;
use crate::dev::{ResourceAllocationList, ResourceType};
use crate::{PciError, PciResult};
use pci_hal::PhysAddr;

// Register values that forward nothing: base above limit.
const CLOSED_IO_WINDOW: u16 = 0x00F0;
const CLOSED_IO_WINDOW_UPPER: u32 = 0;
const CLOSED_MEMORY_WINDOW: u32 = 0x0000_FFF0;
const CLOSED_PREFETCH_BASE_UPPER: u32 = 0xFFFF_FFFF;
const CLOSED_PREFETCH_LIMIT_UPPER: u32 = 0;

const BAR32_LIMIT: u64 = 1 << 32;

impl PciNode {
    /// Write the bus-local allocations into the function's BARs.
    ///
    /// Allocations are matched to BARs in order; an I/O BAR takes the next
    /// I/O allocation and a memory BAR the next memory one. Decoding is off
    /// while the BARs change and comes back only for the kinds programmed.
    pub(super) fn set_function_resources(
        &self,
        bus_local: Option<&ResourceAllocationList>,
    ) -> PciResult {
        let allocations = match bus_local {
            Some(allocations) => allocations,
            None => return Ok(()),
        };
        let mut inner = self.lock();
        let config = inner.function_config(self)?;
        inner.size_bars(&config)?;
        let msix = match &inner.msi {
            Some(msi) => msi.msix_bar_info()?,
            None => None,
        };

        config.write16(PciReg16::Command, 0)?;
        let decode_bits = inner.decode_bits;
        let mut remaining = allocations.iter();
        let mut command = 0;
        let mut table: Option<PhysAddr> = None;
        let mut pending: Option<PhysAddr> = None;
        let mut index = 0;
        while index < inner.bar_count as usize {
            let decode = decode_bits.bar32[index];
            let is_io = decode_bits.is_io(index);
            let wanted = if is_io {
                ResourceType::IoPort
            } else {
                ResourceType::PhysicalAddressSpace
            };
            let allocation = remaining.by_ref().find(|a| a.rtype == wanted).ok_or_else(|| {
                warn!("{:?}: no {:?} allocation left for BAR {}", config, wanted, index);
                PciError::INVALID_CONFIGURATION
            })?;
            let is_64bit = decode_bits.bar_pair(index).is_some();
            let end = allocation.allocation.checked_add(allocation.length);
            if decode != 0 && !is_64bit && end.map_or(true, |end| end > BAR32_LIMIT) {
                warn!(
                    "{:?}: {:#x}+{:#x} does not fit 32-bit BAR {}",
                    config, allocation.allocation, allocation.length, index
                );
                return Err(PciError::INVALID_CONFIGURATION);
            }
            if decode != 0 {
                if is_io {
                    config.write_bar(index, allocation.allocation as u32 | PCI_BAR_IO_SPACE)?;
                    command |= PCI_COMMAND_IO_DECODE;
                } else {
                    let flags = (decode & PCI_BAR_MEMORY_FLAGS_MASK) as u64;
                    if is_64bit {
                        config.write_bar64(index, allocation.allocation | flags)?;
                    } else {
                        config.write_bar(index, (allocation.allocation | flags) as u32)?;
                    }
                    command |= PCI_COMMAND_MEMORY_DECODE;
                }
                debug!(
                    "{:?}: BAR {} <- {:#x}+{:#x}",
                    config, index, allocation.allocation, allocation.length
                );
                if let Some(info) = msix {
                    let base = allocation.allocation as PhysAddr;
                    if info.table_bar == index {
                        table = Some(base + info.table_offset as PhysAddr);
                    }
                    if info.pending_bar == index {
                        pending = Some(base + info.pending_offset as PhysAddr);
                    }
                }
            }
            index += if is_64bit { 2 } else { 1 };
        }
        config.write16(PciReg16::Command, command)?;

        if let Some(msi) = &inner.msi {
            msi.set_msix_location(table, pending);
        }
        Ok(())
    }

    /// Turn on decoding, bus mastering and memory-write-invalidate.
    pub(super) fn enable(&self) -> PciResult {
        let config = self.config()?;
        let command = config.read16(PciReg16::Command)?;
        config.write16(PciReg16::Command, command | PCI_COMMAND_ENABLE_FLAGS)
    }

    /// Write the bus-local allocations of a bridge function into its bus
    /// number register and forwarding windows.
    ///
    /// Windows without an allocation are closed. The subordinate bus number
    /// is left as firmware set it.
    pub(super) fn set_bridge_resources(
        &self,
        bus_local: Option<&ResourceAllocationList>,
    ) -> PciResult {
        let allocations = match bus_local {
            Some(allocations) => allocations,
            None => return Ok(()),
        };
        let inner = self.lock();
        let config = inner.function_config(self)?;

        let mut io = CLOSED_IO_WINDOW;
        let mut io_upper = CLOSED_IO_WINDOW_UPPER;
        let mut memory = CLOSED_MEMORY_WINDOW;
        let mut prefetch = CLOSED_MEMORY_WINDOW;
        let mut prefetch_base_upper = CLOSED_PREFETCH_BASE_UPPER;
        let mut prefetch_limit_upper = CLOSED_PREFETCH_LIMIT_UPPER;
        let mut command = PCI_BRIDGE_COMMAND_FLAGS;

        let bus_numbers = config.read32(PciReg32::BusNumbers)?;
        let firmware_secondary =
            ((bus_numbers & PCI_BRIDGE_SECONDARY_BUS_MASK) >> PCI_BRIDGE_SECONDARY_BUS_SHIFT) as u8;
        let subordinate = (bus_numbers & PCI_BRIDGE_SUBORDINATE_BUS_MASK)
            >> PCI_BRIDGE_SUBORDINATE_BUS_SHIFT;
        let mut secondary = firmware_secondary;

        config.write16(PciReg16::Command, 0)?;
        for allocation in allocations.iter() {
            let base = allocation.allocation;
            let length = allocation.length;
            match allocation.rtype {
                ResourceType::BusNumber => {
                    assert_eq!(length, 1, "a bridge takes exactly one bus number");
                    secondary = base as u8;
                }
                ResourceType::IoPort if length != 0 => {
                    let limit = base + length - PCI_BRIDGE_IO_GRANULARITY;
                    io = (((base >> 8) as u32 & PCI_BRIDGE_IO_BASE_MASK)
                        | (limit as u32 & PCI_BRIDGE_IO_LIMIT_MASK)) as u16;
                    io_upper = ((base >> 16) as u32 & PCI_BRIDGE_IO_BASE_HIGH_MASK)
                        | (limit as u32 & PCI_BRIDGE_IO_LIMIT_HIGH_MASK);
                    if base >> 16 != 0 {
                        io |= PCI_BRIDGE_IO_DECODE_32 as u16;
                    }
                    if limit >> 16 != 0 {
                        io |= PCI_BRIDGE_IO_LIMIT_DECODE_32 as u16;
                    }
                    command |= PCI_COMMAND_IO_DECODE;
                }
                ResourceType::PhysicalAddressSpace if length != 0 => {
                    let limit = base + length - PCI_BRIDGE_MEMORY_GRANULARITY;
                    let window = ((base >> 16) as u32 & PCI_BRIDGE_MEMORY_BASE_MASK)
                        | (limit as u32 & PCI_BRIDGE_MEMORY_LIMIT_MASK);
                    if allocation.is_prefetchable() {
                        prefetch = window;
                        prefetch_base_upper = (base >> 32) as u32;
                        prefetch_limit_upper = (limit >> 32) as u32;
                        if prefetch_base_upper != 0 {
                            prefetch |= PCI_BRIDGE_PREFETCH_DECODE_64;
                        }
                        if prefetch_limit_upper != 0 {
                            prefetch |= PCI_BRIDGE_PREFETCH_LIMIT_DECODE_64;
                        }
                    } else {
                        memory = window;
                    }
                    command |= PCI_COMMAND_MEMORY_DECODE;
                }
                _ => {}
            }
        }

        if secondary != firmware_secondary {
            error!(
                "{:?}: granted secondary bus {} but firmware set up {}",
                config, secondary, firmware_secondary
            );
        }
        assert_eq!(secondary, firmware_secondary);
        let bus_numbers = (bus_numbers & PCI_BRIDGE_LATENCY_TIMER_MASK)
            | inner.bus_number as u32
            | (secondary as u32) << PCI_BRIDGE_SECONDARY_BUS_SHIFT
            | subordinate << PCI_BRIDGE_SUBORDINATE_BUS_SHIFT;

        info!(
            "{:?}: bridge to bus {}..={}, io {:#06x}/{:#x}, memory {:#x}, prefetch {:#x}/{:#x}/{:#x}",
            config,
            secondary,
            subordinate,
            io,
            io_upper,
            memory,
            prefetch,
            prefetch_base_upper,
            prefetch_limit_upper
        );
        config.write32(PciReg32::BusNumbers, bus_numbers)?;
        config.write16(PciReg16::IoWindow, io)?;
        config.write32(PciReg32::IoWindowUpper, io_upper)?;
        config.write32(PciReg32::MemoryWindow, memory)?;
        config.write32(PciReg32::PrefetchableMemoryWindow, prefetch)?;
        config.write32(PciReg32::PrefetchableMemoryBaseUpper, prefetch_base_upper)?;
        config.write32(PciReg32::PrefetchableMemoryLimitUpper, prefetch_limit_upper)?;
        config.write16(PciReg16::Command, command)
    }
}

#[cfg(test)]
mod tests {
    use super::super::msi::MsiContext;
    use super::*;
    use crate::dev::{ResourceAllocation, ResourceCharacteristics, ResourceFlags};
    use crate::testing::{function_node, platform_for};
    use alloc::sync::Arc;
    use alloc::vec::Vec;
    use pci_hal::libos::{FakeConfigSpace, FakeFunction};

    fn allocation(rtype: ResourceType, allocation: u64, length: u64) -> ResourceAllocation {
        ResourceAllocation {
            rtype,
            allocation,
            length,
            characteristics: ResourceCharacteristics::empty(),
            flags: ResourceFlags::NOT_SHAREABLE,
        }
    }

    fn list(allocations: &[ResourceAllocation]) -> ResourceAllocationList {
        ResourceAllocationList {
            allocations: allocations.to_vec(),
        }
    }

    fn bars(space: &FakeConfigSpace) -> Vec<u32> {
        (0x10..0x28).step_by(4).map(|o| space.read32(0, 6, 0, o)).collect()
    }

    fn nic() -> FakeFunction {
        FakeFunction::new(0x8086, 0x10d3, 0x0200_0000)
            .command(0x0007)
            .interrupt_pin(1)
            .bar(0, 0xfebc_0000, 0xfffe_0000)
            .bar(2, 0x0000_e001, 0xffff_ffe0)
            .bar64(3, 0x0000_0008_0000_000c, 0x4000)
    }

    #[test]
    fn boot_allocations_program_back_unchanged() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, nic());
        let before = bars(&space);
        let node = function_node(&space, 0, 6, 0);
        let (_, boot) = node.query_function_resources().unwrap();
        node.set_function_resources(Some(&boot)).unwrap();
        assert_eq!(bars(&space), before);
        let command = space.read16(0, 6, 0, 0x04);
        assert_eq!(command & 0x3, 0x3);
    }

    #[test]
    fn allocations_land_in_bars() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, nic());
        let node = function_node(&space, 0, 6, 0);
        node.query_function_resources().unwrap();
        let mut prefetchable = allocation(ResourceType::PhysicalAddressSpace, 0x1_0000_4000, 0x4000);
        prefetchable.characteristics = ResourceCharacteristics::MEMORY_PREFETCHABLE;
        let granted = list(&[
            allocation(ResourceType::PhysicalAddressSpace, 0xf800_0000, 0x2_0000),
            allocation(ResourceType::PhysicalAddressSpace, 0, 0),
            allocation(ResourceType::IoPort, 0x2040, 0x20),
            prefetchable,
            allocation(ResourceType::InterruptLine, 1, 1),
        ]);
        node.set_function_resources(Some(&granted)).unwrap();

        let programmed = bars(&space);
        assert_eq!(programmed[0], 0xf800_0000);
        // the empty slot is left alone
        assert_eq!(programmed[1], 0);
        assert_eq!(programmed[2], 0x2041);
        assert_eq!(programmed[3], 0x0000_400c);
        assert_eq!(programmed[4], 0x1);
        // decoding off first, both kinds on last
        let writes = space.writes();
        let commands: Vec<u32> = writes
            .iter()
            .filter(|w| w.offset == 0x04)
            .map(|w| w.value)
            .collect();
        assert_eq!(commands.first(), Some(&0));
        assert_eq!(commands.last(), Some(&0x3));

        node.enable().unwrap();
        assert_eq!(space.read16(0, 6, 0, 0x04), 0x0017);
    }

    #[test]
    fn io_only_function_decodes_io_only() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(
            0,
            6,
            0,
            FakeFunction::new(0x8086, 0x7113, 0x0680_0000).bar(0, 0x1, 0xffff_fff0),
        );
        let node = function_node(&space, 0, 6, 0);
        node.query_function_resources().unwrap();
        node.set_function_resources(Some(&list(&[allocation(ResourceType::IoPort, 0x1000, 0x10)])))
            .unwrap();
        assert_eq!(space.read32(0, 6, 0, 0x10), 0x1001);
        assert_eq!(space.read16(0, 6, 0, 0x04), PCI_COMMAND_IO_DECODE);
    }

    #[test]
    fn missing_allocation_is_invalid_configuration() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, nic());
        let node = function_node(&space, 0, 6, 0);
        node.query_function_resources().unwrap();
        let granted = list(&[
            allocation(ResourceType::PhysicalAddressSpace, 0xf800_0000, 0x2_0000),
            allocation(ResourceType::PhysicalAddressSpace, 0, 0),
        ]);
        assert_eq!(
            node.set_function_resources(Some(&granted)),
            Err(PciError::INVALID_CONFIGURATION)
        );
    }

    #[test]
    fn nothing_granted_is_nothing_written() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, nic());
        let node = function_node(&space, 0, 6, 0);
        space.clear_writes();
        node.set_function_resources(None).unwrap();
        node.set_bridge_resources(None).unwrap();
        assert!(space.writes().is_empty());
    }

    #[test]
    fn msix_structures_follow_their_bar() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(
            0,
            6,
            0,
            FakeFunction::new(0x15ad, 0x07b0, 0x0200_0000)
                .bar(0, 0, 0xffff_f000)
                .bar(1, 0, 0xffff_e000)
                // table in BAR 0 at 0, pending array in BAR 1 at 0x1000
                .capability(
                    0x48,
                    0x11,
                    &[0x07, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x10, 0x00, 0x00],
                ),
        );
        let node = function_node(&space, 0, 6, 0);
        let msi = MsiContext::discover(node.config().unwrap(), &platform_for(space.clone()))
            .unwrap()
            .unwrap();
        node.lock().msi = Some(msi.clone());
        node.query_function_resources().unwrap();
        let granted = list(&[
            allocation(ResourceType::PhysicalAddressSpace, 0xfe00_0000, 0x1000),
            allocation(ResourceType::PhysicalAddressSpace, 0xfe00_2000, 0x2000),
        ]);
        node.set_function_resources(Some(&granted)).unwrap();
        assert_eq!(msi.msix_table_phys(), Some(0xfe00_0000));
        assert_eq!(msi.msix_pending_phys(), Some(0xfe00_3000));
    }

    fn bridge() -> FakeFunction {
        let mut f = FakeFunction::new(0x8086, 0x244e, 0x0604_0000).header_type(1);
        // latency 0x40, subordinate 0x10, secondary 1, primary 0
        f.set32(0x18, 0x4010_0100);
        f
    }

    #[test]
    fn bridge_windows_are_encoded() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, bridge());
        let node = function_node(&space, 0, 6, 0);
        let mut prefetchable = allocation(ResourceType::PhysicalAddressSpace, 0xc000_0000, 0x20_0000);
        prefetchable.characteristics = ResourceCharacteristics::MEMORY_PREFETCHABLE;
        let granted = list(&[
            allocation(ResourceType::BusNumber, 1, 1),
            allocation(ResourceType::IoPort, 0x1000, 0x1000),
            allocation(ResourceType::PhysicalAddressSpace, 0xe000_0000, 0x10_0000),
            prefetchable,
        ]);
        space.clear_writes();
        node.set_bridge_resources(Some(&granted)).unwrap();

        assert_eq!(space.read32(0, 6, 0, 0x18), 0x4010_0100);
        assert_eq!(space.read16(0, 6, 0, 0x1c), 0x1010);
        assert_eq!(space.read32(0, 6, 0, 0x30), 0);
        assert_eq!(space.read32(0, 6, 0, 0x20), 0xe000_e000);
        assert_eq!(space.read32(0, 6, 0, 0x24), 0xc010_c000);
        assert_eq!(space.read32(0, 6, 0, 0x28), 0);
        assert_eq!(space.read32(0, 6, 0, 0x2c), 0);
        assert_eq!(space.read16(0, 6, 0, 0x04), 0x011f);

        let order: Vec<(u8, u8)> = space.writes().iter().map(|w| (w.offset, w.size)).collect();
        assert_eq!(
            order,
            [
                (0x04, 2),
                (0x18, 4),
                (0x1c, 2),
                (0x30, 4),
                (0x20, 4),
                (0x24, 4),
                (0x28, 4),
                (0x2c, 4),
                (0x04, 2),
            ]
        );
    }

    #[test]
    fn bridge_without_windows_forwards_nothing() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, bridge());
        let node = function_node(&space, 0, 6, 0);
        let granted = list(&[
            allocation(ResourceType::BusNumber, 1, 1),
            allocation(ResourceType::IoPort, 0, 0),
        ]);
        node.set_bridge_resources(Some(&granted)).unwrap();
        assert_eq!(space.read16(0, 6, 0, 0x1c), 0x00f0);
        assert_eq!(space.read32(0, 6, 0, 0x20), 0x0000_fff0);
        assert_eq!(space.read32(0, 6, 0, 0x24), 0x0000_fff0);
        assert_eq!(space.read32(0, 6, 0, 0x28), 0xffff_ffff);
        assert_eq!(space.read16(0, 6, 0, 0x04), PCI_BRIDGE_COMMAND_FLAGS);
    }

    #[test]
    fn high_windows_set_decode_flags() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, bridge());
        let node = function_node(&space, 0, 6, 0);
        let mut prefetchable =
            allocation(ResourceType::PhysicalAddressSpace, 0x8_0000_0000, 0x40_0000);
        prefetchable.characteristics = ResourceCharacteristics::MEMORY_PREFETCHABLE;
        let granted = list(&[
            allocation(ResourceType::IoPort, 0x1_0000, 0x2000),
            prefetchable,
        ]);
        node.set_bridge_resources(Some(&granted)).unwrap();
        assert_eq!(space.read16(0, 6, 0, 0x1c), 0x1101);
        assert_eq!(space.read32(0, 6, 0, 0x30), 0x0001_0001);
        assert_eq!(space.read32(0, 6, 0, 0x24), 0x0031_0001);
        assert_eq!(space.read32(0, 6, 0, 0x28), 0x8);
        assert_eq!(space.read32(0, 6, 0, 0x2c), 0x8);
    }

    #[test]
    #[should_panic]
    fn bridge_secondary_must_match_firmware() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, bridge());
        let node = function_node(&space, 0, 6, 0);
        let granted = list(&[allocation(ResourceType::BusNumber, 5, 1)]);
        let _ = node.set_bridge_resources(Some(&granted));
    }

    #[test]
    #[should_panic]
    fn bridge_takes_a_single_bus_number() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, bridge());
        let node = function_node(&space, 0, 6, 0);
        let granted = list(&[allocation(ResourceType::BusNumber, 1, 16)]);
        let _ = node.set_bridge_resources(Some(&granted));
    }

    #[test]
    fn allocation_beyond_4g_for_32bit_bar_is_refused() {
        let space = Arc::new(FakeConfigSpace::new());
        space.add_function(0, 6, 0, nic());
        let node = function_node(&space, 0, 6, 0);
        node.query_function_resources().unwrap();
        let before = space.read32(0, 6, 0, 0x10);
        let granted = list(&[
            allocation(ResourceType::PhysicalAddressSpace, 0x1_0000_0000, 0x2_0000),
            allocation(ResourceType::PhysicalAddressSpace, 0, 0),
            allocation(ResourceType::IoPort, 0x2040, 0x20),
            allocation(ResourceType::PhysicalAddressSpace, 0x1_0000_4000, 0x4000),
        ]);
        assert_eq!(
            node.set_function_resources(Some(&granted)),
            Err(PciError::INVALID_CONFIGURATION)
        );
        assert_eq!(space.read32(0, 6, 0, 0x10), before);

        // ending exactly at 4 GiB still fits
        let granted = list(&[
            allocation(ResourceType::PhysicalAddressSpace, 0xfffe_0000, 0x2_0000),
            allocation(ResourceType::PhysicalAddressSpace, 0, 0),
            allocation(ResourceType::IoPort, 0x2040, 0x20),
            allocation(ResourceType::PhysicalAddressSpace, 0x1_0000_4000, 0x4000),
        ]);
        node.set_function_resources(Some(&granted)).unwrap();
        assert_eq!(space.read32(0, 6, 0, 0x10), 0xfffe_0000);
    }
}

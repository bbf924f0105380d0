//! Configuration mechanism 1: an address port and a data port.

use super::config::{check_access, ConfigAccess};
use crate::PciResult;
use alloc::sync::Arc;
use pci_hal::PortIo;
use spin::Mutex;

const PCI_CONFIG_ADDR: u16 = 0xcf8;
const PCI_CONFIG_DATA: u16 = 0xcfc;
const PCI_CONFIG_ENABLE: u32 = 1 << 31;

/// Returns the BDF address without the bottom two bits masked off.
pub fn pci_bdf_raw_addr(bus: u8, dev: u8, func: u8, offset: u8) -> u32 {
    ((bus as u32 & 0xff) << 16)         // bits 23-16 bus
        | ((dev as u32 & 0x1f) << 11)   // bits 15-11 device
        | ((func as u32 & 0x7) << 8)    // bits 10-8 func
        | (offset as u32 & 0xff) // bits 7-2 reg, with bottom 2 bits as well
}

/// Root-bus configuration access through ports 0xCF8/0xCFC.
pub struct Mechanism1 {
    ports: Arc<dyn PortIo>,
    // address and data port writes must not interleave
    lock: Mutex<()>,
}

impl Mechanism1 {
    pub fn new(ports: Arc<dyn PortIo>) -> Self {
        Mechanism1 {
            ports,
            lock: Mutex::new(()),
        }
    }

    fn select(&self, addr: u32) -> u16 {
        self.ports
            .out32(PCI_CONFIG_ADDR, (addr & !0x3) | PCI_CONFIG_ENABLE);
        PCI_CONFIG_DATA + (addr & 0x3) as u16
    }

    fn read_addr(&self, addr: u32, size: usize) -> u32 {
        let _lock = self.lock.lock();
        let port = self.select(addr);
        match size {
            1 => self.ports.in8(port) as u32,
            2 => self.ports.in16(port) as u32,
            _ => self.ports.in32(port),
        }
    }

    fn write_addr(&self, addr: u32, size: usize, value: u32) {
        let _lock = self.lock.lock();
        let port = self.select(addr);
        match size {
            1 => self.ports.out8(port, value as u8),
            2 => self.ports.out16(port, value as u16),
            _ => self.ports.out32(port, value),
        }
    }
}

impl ConfigAccess for Mechanism1 {
    fn read(&self, bus: u8, dev: u8, func: u8, offset: u32, size: usize) -> PciResult<u64> {
        check_access(offset, size)?;
        let addr = pci_bdf_raw_addr(bus, dev, func, offset as u8);
        let value = if size == 8 {
            let low = self.read_addr(addr, 4) as u64;
            let high = self.read_addr(addr + 4, 4) as u64;
            low | high << 32
        } else {
            self.read_addr(addr, size) as u64
        };
        trace!(
            "config read {:02x}:{:02x}.{} @ {:#x} ({}) = {:#x}",
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
        trace!(
            "config write {:02x}:{:02x}.{} @ {:#x} ({}) <- {:#x}",
            bus,
            dev,
            func,
            offset,
            size,
            value
        );
        let addr = pci_bdf_raw_addr(bus, dev, func, offset as u8);
        if size == 8 {
            self.write_addr(addr, 4, value as u32);
            self.write_addr(addr + 4, 4, (value >> 32) as u32);
        } else {
            self.write_addr(addr, size, value as u32);
        }
        Ok(())
    }
}

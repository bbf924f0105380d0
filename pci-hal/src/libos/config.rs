use alloc::collections::BTreeMap;
use alloc::vec::Vec;
use spin::Mutex;

use crate::PortIo;

const CONFIG_ADDRESS: u16 = 0xcf8;
const CONFIG_DATA: u16 = 0xcfc;
const CONFIG_ENABLE: u32 = 1 << 31;

const BAR_BASE: usize = 0x10;
const BAR_END: usize = 0x28;

/// A configuration-space write observed on the data port.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ConfigWrite {
    pub bus: u8,
    pub dev: u8,
    pub func: u8,
    pub offset: u8,
    pub size: u8,
    pub value: u32,
}

/// The 256-byte configuration header of one emulated function.
///
/// BARs behave like hardware: bits below the decoded size and the type
/// bits are hardwired, so writing all ones reads back the size mask.
#[derive(Clone)]
pub struct FakeFunction {
    regs: [u8; 256],
    bar_masks: [u32; 6],
    bar_flags: [u32; 6],
    last_cap: u8,
}

impl FakeFunction {
    /// `class_code` is the dword at 0x08: class, subclass, prog-if, revision.
    pub fn new(vendor_id: u16, device_id: u16, class_code: u32) -> Self {
        let mut f = FakeFunction {
            regs: [0; 256],
            bar_masks: [0; 6],
            bar_flags: [0; 6],
            last_cap: 0,
        };
        f.set16(0x00, vendor_id);
        f.set16(0x02, device_id);
        f.set32(0x08, class_code);
        f
    }

    pub fn multi_function(mut self) -> Self {
        self.regs[0x0e] |= 0x80;
        self
    }

    pub fn header_type(mut self, kind: u8) -> Self {
        self.regs[0x0e] = (self.regs[0x0e] & 0x80) | (kind & 0x7f);
        self
    }

    pub fn command(mut self, command: u16) -> Self {
        self.set16(0x04, command);
        self
    }

    pub fn interrupt_pin(mut self, pin: u8) -> Self {
        self.regs[0x3d] = pin;
        self
    }

    /// A 32-bit BAR holding `firmware`, decoding the bits set in `size_mask`.
    pub fn bar(mut self, index: usize, firmware: u32, size_mask: u32) -> Self {
        let flags_mask = if firmware & 0x1 != 0 { 0x3 } else { 0xf };
        self.bar_masks[index] = size_mask & !flags_mask;
        self.bar_flags[index] = firmware & flags_mask;
        self.set32(BAR_BASE + index * 4, firmware);
        self
    }

    /// A 64-bit memory BAR occupying `index` and `index + 1`.
    pub fn bar64(mut self, index: usize, firmware: u64, size: u64) -> Self {
        let mask = !(size - 1);
        self.bar_masks[index] = mask as u32 & !0xf;
        self.bar_flags[index] = (firmware as u32 & 0xf) | 0x4;
        self.set32(BAR_BASE + index * 4, firmware as u32 | 0x4);
        self.bar_masks[index + 1] = (mask >> 32) as u32;
        self.bar_flags[index + 1] = 0;
        self.set32(BAR_BASE + (index + 1) * 4, (firmware >> 32) as u32);
        self
    }

    /// Append a capability at `offset`; `body` starts at `offset + 2`.
    pub fn capability(mut self, offset: u8, id: u8, body: &[u8]) -> Self {
        self.regs[0x06] |= 0x10;
        if self.last_cap == 0 {
            let pointer = if self.regs[0x0e] & 0x7f == 2 { 0x14 } else { 0x34 };
            self.regs[pointer] = offset;
        } else {
            self.regs[self.last_cap as usize + 1] = offset;
        }
        let offset = offset as usize;
        self.regs[offset] = id;
        self.regs[offset + 1] = 0;
        self.regs[offset + 2..offset + 2 + body.len()].copy_from_slice(body);
        self.last_cap = offset as u8;
        self
    }

    pub fn read8(&self, offset: usize) -> u8 {
        self.regs[offset]
    }

    pub fn read16(&self, offset: usize) -> u16 {
        u16::from_le_bytes([self.regs[offset], self.regs[offset + 1]])
    }

    pub fn read32(&self, offset: usize) -> u32 {
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.regs[offset..offset + 4]);
        u32::from_le_bytes(bytes)
    }

    pub fn set8(&mut self, offset: usize, value: u8) {
        self.regs[offset] = value;
    }

    pub fn set16(&mut self, offset: usize, value: u16) {
        self.regs[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
    }

    pub fn set32(&mut self, offset: usize, value: u32) {
        self.regs[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
    }

    fn write_dword(&mut self, reg: usize, mut value: u32) {
        // a bridge header only has two BARs
        let bar_end = if self.regs[0x0e] & 0x7f == 1 {
            BAR_BASE + 8
        } else {
            BAR_END
        };
        if (BAR_BASE..bar_end).contains(&reg) {
            let index = (reg - BAR_BASE) / 4;
            value = (value & self.bar_masks[index]) | self.bar_flags[index];
        }
        self.set32(reg, value);
    }
}

struct Inner {
    address: u32,
    functions: BTreeMap<(u8, u8, u8), FakeFunction>,
    writes: Vec<ConfigWrite>,
}

impl Inner {
    fn target(&self, port: u16) -> Option<((u8, u8, u8), usize)> {
        if self.address & CONFIG_ENABLE == 0 {
            return None;
        }
        let bus = (self.address >> 16) as u8;
        let dev = ((self.address >> 11) & 0x1f) as u8;
        let func = ((self.address >> 8) & 0x7) as u8;
        let offset = (self.address & 0xfc) as usize + (port - CONFIG_DATA) as usize;
        Some(((bus, dev, func), offset))
    }

    fn read(&self, port: u16, size: usize) -> u32 {
        let all_ones = (u64::MAX >> (64 - size * 8)) as u32;
        if !(CONFIG_DATA..CONFIG_DATA + 4).contains(&port) {
            return all_ones;
        }
        match self.target(port) {
            Some((bdf, offset)) => match self.functions.get(&bdf) {
                Some(f) => match size {
                    1 => f.read8(offset) as u32,
                    2 => f.read16(offset) as u32,
                    _ => f.read32(offset),
                },
                None => all_ones,
            },
            None => all_ones,
        }
    }

    fn write(&mut self, port: u16, size: usize, value: u32) {
        if port == CONFIG_ADDRESS && size == 4 {
            self.address = value;
            return;
        }
        if !(CONFIG_DATA..CONFIG_DATA + 4).contains(&port) {
            return;
        }
        let ((bus, dev, func), offset) = match self.target(port) {
            Some(target) => target,
            None => return,
        };
        self.writes.push(ConfigWrite {
            bus,
            dev,
            func,
            offset: offset as u8,
            size: size as u8,
            value,
        });
        if let Some(f) = self.functions.get_mut(&(bus, dev, func)) {
            let reg = offset & 0xfc;
            let shift = (offset & 0x3) * 8;
            let width_mask = (u64::MAX >> (64 - size * 8)) as u32;
            let merged = (f.read32(reg) & !(width_mask << shift)) | ((value & width_mask) << shift);
            f.write_dword(reg, merged);
        }
    }
}

/// A mechanism-1 address/data port pair in front of emulated functions.
pub struct FakeConfigSpace {
    inner: Mutex<Inner>,
}

impl Default for FakeConfigSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeConfigSpace {
    pub fn new() -> Self {
        FakeConfigSpace {
            inner: Mutex::new(Inner {
                address: 0,
                functions: BTreeMap::new(),
                writes: Vec::new(),
            }),
        }
    }

    /// Plug `function` in at `bus:dev.func`, replacing whatever was there.
    pub fn add_function(&self, bus: u8, dev: u8, func: u8, function: FakeFunction) {
        self.inner.lock().functions.insert((bus, dev, func), function);
    }

    pub fn remove_function(&self, bus: u8, dev: u8, func: u8) {
        self.inner.lock().functions.remove(&(bus, dev, func));
    }

    /// Run `f` against the registers of `bus:dev.func`, if present.
    pub fn with_function<R>(
        &self,
        bus: u8,
        dev: u8,
        func: u8,
        f: impl FnOnce(&mut FakeFunction) -> R,
    ) -> Option<R> {
        self.inner.lock().functions.get_mut(&(bus, dev, func)).map(f)
    }

    /// Register contents without going through the ports.
    pub fn read32(&self, bus: u8, dev: u8, func: u8, offset: usize) -> u32 {
        self.with_function(bus, dev, func, |f| f.read32(offset))
            .unwrap_or(u32::MAX)
    }

    pub fn read16(&self, bus: u8, dev: u8, func: u8, offset: usize) -> u16 {
        self.with_function(bus, dev, func, |f| f.read16(offset))
            .unwrap_or(u16::MAX)
    }

    /// Every data-port write since creation or the last [`clear_writes`].
    ///
    /// [`clear_writes`]: FakeConfigSpace::clear_writes
    pub fn writes(&self) -> Vec<ConfigWrite> {
        self.inner.lock().writes.clone()
    }

    pub fn clear_writes(&self) {
        self.inner.lock().writes.clear();
    }
}

impl PortIo for FakeConfigSpace {
    fn in8(&self, port: u16) -> u8 {
        self.inner.lock().read(port, 1) as u8
    }
    fn in16(&self, port: u16) -> u16 {
        self.inner.lock().read(port, 2) as u16
    }
    fn in32(&self, port: u16) -> u32 {
        let inner = self.inner.lock();
        if port == CONFIG_ADDRESS {
            return inner.address;
        }
        inner.read(port, 4)
    }
    fn out8(&self, port: u16, value: u8) {
        self.inner.lock().write(port, 1, value as u32)
    }
    fn out16(&self, port: u16, value: u16) {
        self.inner.lock().write(port, 2, value as u32)
    }
    fn out32(&self, port: u16, value: u32) {
        self.inner.lock().write(port, 4, value)
    }
}

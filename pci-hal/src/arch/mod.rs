//! Platform port I/O.

use crate::PortIo;

cfg_if::cfg_if! {
if #[cfg(all(target_arch = "x86_64", target_os = "none"))] {
    use core::arch::asm;

    /// The processor's own I/O port space.
    pub struct SystemPorts;

    impl PortIo for SystemPorts {
        fn in8(&self, port: u16) -> u8 {
            let value: u8;
            unsafe {
                asm!("in al, dx", out("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
            value
        }
        fn in16(&self, port: u16) -> u16 {
            let value: u16;
            unsafe {
                asm!("in ax, dx", out("ax") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
            value
        }
        fn in32(&self, port: u16) -> u32 {
            let value: u32;
            unsafe {
                asm!("in eax, dx", out("eax") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
            value
        }
        fn out8(&self, port: u16, value: u8) {
            unsafe {
                asm!("out dx, al", in("al") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
        }
        fn out16(&self, port: u16, value: u16) {
            unsafe {
                asm!("out dx, ax", in("ax") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
        }
        fn out32(&self, port: u16, value: u32) {
            unsafe {
                asm!("out dx, eax", in("eax") value, in("dx") port, options(nomem, nostack, preserves_flags));
            }
        }
    }
} else {
    /// Platforms without an I/O port space read all ones and drop writes,
    /// which makes every mechanism-1 function look absent.
    pub struct SystemPorts;

    impl PortIo for SystemPorts {
        fn in8(&self, port: u16) -> u8 {
            warn!("port read {:#x} without port I/O", port);
            u8::MAX
        }
        fn in16(&self, port: u16) -> u16 {
            warn!("port read {:#x} without port I/O", port);
            u16::MAX
        }
        fn in32(&self, port: u16) -> u32 {
            warn!("port read {:#x} without port I/O", port);
            u32::MAX
        }
        fn out8(&self, _port: u16, _value: u8) {}
        fn out16(&self, _port: u16, _value: u16) {}
        fn out32(&self, _port: u16, _value: u32) {}
    }
}
} // cfg_if!

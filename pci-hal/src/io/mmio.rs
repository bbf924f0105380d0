use super::Io;
use core::cell::UnsafeCell;
use core::ops::{BitAnd, BitOr, Not};

/// Memory-mapped I/O.
#[repr(transparent)]
pub struct Mmio<T>(UnsafeCell<T>);

// Registers are accessed with volatile operations only.
unsafe impl<T: Send> Sync for Mmio<T> {}

impl<T> Mmio<T> {
    /// # Safety
    ///
    /// This function is unsafe because `base_addr` may be an arbitrary address.
    pub unsafe fn from_base_as<'a, R>(base_addr: usize) -> &'a R {
        assert_eq!(base_addr % core::mem::align_of::<T>(), 0);
        &*(base_addr as *const R)
    }

    /// # Safety
    ///
    /// This function is unsafe because `base_addr` may be an arbitrary address.
    pub unsafe fn from_base<'a>(base_addr: usize) -> &'a Self {
        Self::from_base_as(base_addr)
    }

    /// # Safety
    ///
    /// `offset` elements past this register must stay inside the mapping.
    pub unsafe fn add<'a>(&self, offset: usize) -> &'a Self {
        Self::from_base((self.0.get() as *const T).add(offset) as _)
    }
}

impl<T> Io for Mmio<T>
where
    T: Copy + BitAnd<Output = T> + BitOr<Output = T> + Not<Output = T>,
{
    type Value = T;

    fn read(&self) -> T {
        unsafe {
            let val = core::ptr::read_volatile(self.0.get() as *const T);
            #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
            core::arch::asm!("fence i,r");
            val
        }
    }

    fn write(&self, value: T) {
        unsafe {
            #[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
            core::arch::asm!("fence w,o");
            core::ptr::write_volatile(self.0.get(), value)
        };
    }
}

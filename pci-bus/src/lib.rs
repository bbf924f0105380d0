//! PCI bus core
//!
//! Enumerates buses and bridges, reports and programs function resources,
//! answers the state-change requests of the device manager and manages
//! MSI/MSI-X vectors. Everything outside PCI is reached through the traits
//! in [`dev`] and in `pci_hal`.

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate std;

pub mod dev;
mod error;

#[cfg(test)]
mod testing;

pub use self::error::*;

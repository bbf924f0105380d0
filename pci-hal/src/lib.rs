//! Hardware Abstraction Layer for the PCI bus core.
//!
//! Every service the core needs from the surrounding kernel is expressed as
//! a trait in [`platform`]. Bare-metal x86_64 port I/O lives in [`arch`];
//! the `libos` feature provides host-side implementations of all of them.

#![no_std]

extern crate alloc;

#[macro_use]
extern crate log;

#[cfg(test)]
#[macro_use]
extern crate std;

mod defs;
pub mod io;
pub mod platform;

pub mod arch;

#[cfg(feature = "libos")]
pub mod libos;

pub use self::defs::*;
pub use self::platform::*;

//! Host-side implementations of the platform services.
//!
//! They back the PCI core in tests: a mechanism-1 port pair in front of an
//! in-memory configuration space, heap buffers standing in for device
//! memory, and an interrupt controller that hands out predictable messages.

mod config;
mod interrupt;
mod mem;

pub use self::config::{ConfigWrite, FakeConfigSpace, FakeFunction};
pub use self::interrupt::{FakeInterruptController, FakePlatform};
pub use self::mem::HostMemory;

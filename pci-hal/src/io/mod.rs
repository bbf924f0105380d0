//! Register access primitives.

use core::ops::{BitAnd, BitOr, Not};

mod mmio;

pub use mmio::Mmio;

/// A single hardware register.
///
/// Writes take `&self`: a register is shared device state, not memory the
/// caller owns.
pub trait Io {
    type Value: Copy
        + BitAnd<Output = Self::Value>
        + BitOr<Output = Self::Value>
        + Not<Output = Self::Value>;

    fn read(&self) -> Self::Value;
    fn write(&self, value: Self::Value);

    /// Set or clear the bits in `flags`.
    fn writef(&self, flags: Self::Value, value: bool) {
        let tmp: Self::Value = match value {
            true => self.read() | flags,
            false => self.read() & !flags,
        };
        self.write(tmp);
    }
}

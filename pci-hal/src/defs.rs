use bitflags::bitflags;
use numeric_enum_macro::numeric_enum;

/// The error type which is returned from HAL functions.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HalError {
    /// The platform does not provide the service.
    NotSupported,
    /// The request could not be satisfied for lack of memory or mappings.
    NoMemory,
    /// An address or size did not describe anything the platform owns.
    InvalidAddress,
    /// A parameter such as a vector count was outside the accepted range.
    InvalidParameter,
}

/// The result type returned by HAL functions.
pub type HalResult<T = ()> = core::result::Result<T, HalError>;

/// Physical address.
pub type PhysAddr = usize;

/// Virtual address.
pub type VirtAddr = usize;

bitflags! {
    /// Access rights of a mapping.
    pub struct MMUFlags: usize {
        const READ  = 1 << 2;
        const WRITE = 1 << 3;
    }
}

numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, PartialEq, Clone, Copy)]
    /// Caching of a device mapping.
    pub enum CachePolicy {
        Uncached = 1,
        UncachedDevice = 2,
    }
}

/// The set of processors an interrupt may be delivered to.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum ProcessorSet {
    /// Any processor in the system.
    All,
    /// Exactly one processor, by ID.
    Single(u32),
}

/// One address/data pair a device writes to raise a message-signaled
/// interrupt.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct MsiInfo {
    pub address: u64,
    pub data: u64,
}

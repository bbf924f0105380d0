use pci_hal::HalError;

/// The type returned by PCI core operations.
pub type PciResult<T = ()> = Result<T, PciError>;

/// PCI core statuses are signed 32 bit integers, negative for failures.
#[allow(non_camel_case_types)]
#[allow(clippy::upper_case_acronyms)]
#[repr(i32)]
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PciError {
    /// Fall-through for failures with no better description.
    UNKNOWN = -1,

    /// The capability or feature is absent on this function,
    /// or the request lies outside the standard configuration header.
    NOT_SUPPORTED = -2,

    /// An allocation needed for the operation failed.
    NO_MEMORY = -4,

    /// An access size or other argument is malformed.
    INVALID_PARAMETER = -10,

    /// A vector index or count reaches past the supported maximum.
    OUT_OF_BOUNDS = -14,

    /// A caller provided interface buffer has the wrong size.
    /// The required size is reported back.
    INCORRECT_BUFFER_SIZE = -15,

    /// The granted resources do not line up with the decode bits
    /// of the function.
    INVALID_CONFIGURATION = -20,

    /// The MSI-X structures cannot be reached yet because the BARs
    /// holding them have not been programmed.
    TOO_EARLY = -21,

    /// Nobody in the driver stack has handled the request yet.
    NOT_HANDLED = -22,

    /// The queried interface is not exposed by this node.
    NO_INTERFACE = -25,

    /// An interface with the same UUID is already registered
    /// on the device.
    DUPLICATE_ENTRY = -26,

    /// The device manager asked for a device this driver does not drive.
    UNKNOWN_DEVICE = -27,
}

impl From<HalError> for PciError {
    fn from(e: HalError) -> Self {
        match e {
            HalError::NotSupported => PciError::NOT_SUPPORTED,
            HalError::NoMemory => PciError::NO_MEMORY,
            HalError::InvalidAddress => PciError::INVALID_PARAMETER,
            HalError::InvalidParameter => PciError::INVALID_PARAMETER,
        }
    }
}

impl From<alloc::collections::TryReserveError> for PciError {
    fn from(_: alloc::collections::TryReserveError) -> Self {
        PciError::NO_MEMORY
    }
}

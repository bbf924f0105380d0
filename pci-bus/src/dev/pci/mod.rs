//! The PCI bus driver.
//!
//! One [`PciNode`] exists per driver context: the functional driver of a
//! root bus or bridge, or the bus driver of a function. The device manager
//! routes IRPs to [`PciBusDriver`] together with the node they belong to.

mod bar;
mod bus;
mod caps;
mod class;
mod config;
pub mod constants;
mod driver;
mod ecam;
mod enumerate;
mod interface;
mod msi;
mod nodes;
mod pio;
mod program;

pub use self::bar::ResourceReport;
pub use self::caps::{CapabilityWalk, PciCapability};
pub use self::class::class_id;
pub use self::config::{ConfigAccess, PciConfig, PciReg16, PciReg32, PciReg8};
pub use self::driver::{PciBusDriver, PciPlatform};
pub use self::ecam::{EcamConfig, PciEcamRegion};
pub use self::interface::{
    AcpiBusAddress, ConfigInterface, PciInterface, SpecificConfigInterface, ACPI_BUS_ADDRESS_UUID,
    PCI_BUS_DEVICE_UUID, PCI_CONFIG_UUID, PCI_MSI_UUID, SPECIFIC_PCI_CONFIG_UUID,
};
pub use self::msi::{
    MsiContext, MsiFlags, MsiInfoFlags, MsiInformation, MsiType, MsixBarInfo,
};
pub use self::nodes::{BarSet, BridgeWindows, ChildInfo, PciChild, PciFunctionType, PciNode};
pub use self::pio::{pci_bdf_raw_addr, Mechanism1};

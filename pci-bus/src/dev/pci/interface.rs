//! Interfaces published on PCI devices.

use super::config::{ConfigAccess, PciConfig};
use super::driver::PciPlatform;
use super::msi::MsiContext;
use super::nodes::{PciFunctionType, PciNode};
use crate::dev::{DeviceHandle, DeviceManager, QueryInterface, Uuid};
use crate::{PciError, PciResult};
use alloc::sync::{Arc, Weak};
use core::mem::size_of;

/// Configuration space of the publishing function.
pub const PCI_CONFIG_UUID: Uuid = Uuid([0x49435000, 0x6e6f6320, 0x20676966, 0x65636361]);
/// Configuration space of any function below a bus or bridge.
pub const SPECIFIC_PCI_CONFIG_UUID: Uuid = Uuid([0x49435001, 0x63657073, 0x63696669, 0x666e6f63]);
/// Device and function number in the form ACPI `_ADR` uses.
pub const ACPI_BUS_ADDRESS_UUID: Uuid = Uuid([0x49504341, 0x73756220, 0x64646120, 0x73736572]);
/// MSI and MSI-X control.
pub const PCI_MSI_UUID: Uuid = Uuid([0x49435002, 0x2069736d, 0x2078736d, 0x746e6920]);
/// The bus driver's own node. Only PCI itself asks for this one.
pub const PCI_BUS_DEVICE_UUID: Uuid = Uuid([0x73696d6f, 0x74207365, 0x656b206f, 0x61207066]);

/// Reads and writes the standard header of one function.
#[derive(Debug, Clone)]
pub struct ConfigInterface {
    config: PciConfig,
}

impl ConfigInterface {
    pub fn new(config: PciConfig) -> Self {
        ConfigInterface { config }
    }

    pub fn read(&self, offset: u32, size: usize) -> PciResult<u64> {
        if offset > 0xff {
            return Err(PciError::NOT_SUPPORTED);
        }
        self.config.read(offset, size)
    }

    pub fn write(&self, offset: u32, size: usize, value: u64) -> PciResult {
        if offset > 0xff {
            return Err(PciError::NOT_SUPPORTED);
        }
        self.config.write(offset, size, value)
    }
}

/// Reads and writes any function reachable through a bus's accessor.
#[derive(Clone)]
pub struct SpecificConfigInterface {
    access: Arc<dyn ConfigAccess>,
}

impl SpecificConfigInterface {
    pub fn new(access: Arc<dyn ConfigAccess>) -> Self {
        SpecificConfigInterface { access }
    }

    pub fn read(&self, bus: u8, dev: u8, func: u8, offset: u32, size: usize) -> PciResult<u64> {
        if offset > 0xff {
            return Err(PciError::NOT_SUPPORTED);
        }
        self.access.read(bus, dev, func, offset, size)
    }

    pub fn write(
        &self,
        bus: u8,
        dev: u8,
        func: u8,
        offset: u32,
        size: usize,
        value: u64,
    ) -> PciResult {
        if offset > 0xff {
            return Err(PciError::NOT_SUPPORTED);
        }
        self.access.write(bus, dev, func, offset, size, value)
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct AcpiBusAddress {
    /// `device << 16 | function`
    pub bus_address: u32,
}

/// An interface handed out through QueryInterface or registered with the
/// device manager.
#[derive(Clone)]
pub enum PciInterface {
    Config(ConfigInterface),
    SpecificConfig(SpecificConfigInterface),
    AcpiBusAddress(AcpiBusAddress),
    BusDevice(Weak<PciNode>),
    Msi(Arc<MsiContext>),
}

impl core::fmt::Debug for PciInterface {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            PciInterface::Config(i) => write!(f, "Config({:?})", i.config),
            PciInterface::SpecificConfig(_) => write!(f, "SpecificConfig"),
            PciInterface::AcpiBusAddress(a) => write!(f, "AcpiBusAddress({:#x})", a.bus_address),
            PciInterface::BusDevice(node) => write!(f, "BusDevice({:?})", node.upgrade()),
            PciInterface::Msi(ctx) => write!(f, "Msi({:?})", ctx),
        }
    }
}

/// Size of the interface `node` provides for `uuid`, if it provides one.
fn provided_size(node: &PciNode, uuid: &Uuid) -> Option<usize> {
    let function = node.is_function();
    match *uuid {
        PCI_CONFIG_UUID if function => Some(size_of::<ConfigInterface>()),
        SPECIFIC_PCI_CONFIG_UUID if !function => Some(size_of::<SpecificConfigInterface>()),
        ACPI_BUS_ADDRESS_UUID if function => Some(size_of::<AcpiBusAddress>()),
        // a bridge's functional driver leaves this to the function below it
        PCI_BUS_DEVICE_UUID if node.kind() != PciFunctionType::Bridge => {
            Some(size_of::<Weak<PciNode>>())
        }
        PCI_MSI_UUID if function && node.msi().is_some() => Some(size_of::<Arc<MsiContext>>()),
        _ => None,
    }
}

fn build(node: &Arc<PciNode>, uuid: &Uuid) -> PciResult<PciInterface> {
    Ok(match *uuid {
        PCI_CONFIG_UUID => PciInterface::Config(ConfigInterface::new(node.config()?)),
        SPECIFIC_PCI_CONFIG_UUID => PciInterface::SpecificConfig(SpecificConfigInterface::new(
            node.config_access().ok_or(PciError::TOO_EARLY)?,
        )),
        ACPI_BUS_ADDRESS_UUID => PciInterface::AcpiBusAddress(AcpiBusAddress {
            bus_address: (node.device_number() as u32) << 16 | node.function_number() as u32,
        }),
        PCI_BUS_DEVICE_UUID => PciInterface::BusDevice(Arc::downgrade(node)),
        PCI_MSI_UUID => PciInterface::Msi(node.msi().ok_or(PciError::NO_INTERFACE)?),
        _ => return Err(PciError::NO_INTERFACE),
    })
}

/// Answer a QueryInterface request on `node`.
///
/// Without a buffer only the required size is reported. `NO_INTERFACE`
/// means the request should continue down the stack.
pub(super) fn query_interface(node: &Arc<PciNode>, query: &mut QueryInterface) -> PciResult {
    let uuid = query.uuid.ok_or(PciError::INVALID_PARAMETER)?;
    let size = provided_size(node, &uuid).ok_or(PciError::NO_INTERFACE)?;
    if !query.has_buffer {
        query.buffer_size = size;
        return Ok(());
    }
    if query.buffer_size != size {
        query.buffer_size = size;
        return Err(PciError::INCORRECT_BUFFER_SIZE);
    }
    query.interface = Some(build(node, &uuid)?);
    Ok(())
}

fn destroy(os: &dyn DeviceManager, uuid: &Uuid, device: DeviceHandle) {
    if let Err(e) = os.destroy_interface(uuid, device) {
        warn!("failed to withdraw interface {:x?} from {:?}: {:?}", uuid.0, device, e);
    }
}

/// Register the per-function interfaces of `node` on `device`, and set up
/// MSI if the function has it. Nothing stays registered on failure.
pub(super) fn create_function_interfaces(
    os: &dyn DeviceManager,
    platform: &PciPlatform,
    device: DeviceHandle,
    node: &Arc<PciNode>,
) -> PciResult {
    let config = node.config()?;
    let mut own_config = true;
    match os.create_interface(
        &PCI_CONFIG_UUID,
        device,
        PciInterface::Config(ConfigInterface::new(config.clone())),
    ) {
        Ok(()) => {}
        // the bridge's functional driver may have been there first
        Err(PciError::DUPLICATE_ENTRY) if node.is_bridge_function() => {
            warn!("{:?}: config interface already present on bridge", config);
            own_config = false;
        }
        Err(e) => return Err(e),
    }
    let rollback = |count: usize| {
        if own_config {
            destroy(os, &PCI_CONFIG_UUID, device);
        }
        if count > 1 {
            destroy(os, &ACPI_BUS_ADDRESS_UUID, device);
        }
    };

    let address = AcpiBusAddress {
        bus_address: (node.device_number() as u32) << 16 | node.function_number() as u32,
    };
    if let Err(e) = os.create_interface(
        &ACPI_BUS_ADDRESS_UUID,
        device,
        PciInterface::AcpiBusAddress(address),
    ) {
        rollback(1);
        return Err(e);
    }

    let msi = match MsiContext::discover(config, platform) {
        Ok(msi) => msi,
        Err(e) => {
            rollback(2);
            return Err(e);
        }
    };
    if let Some(msi) = msi {
        if let Err(e) = os.create_interface(&PCI_MSI_UUID, device, PciInterface::Msi(msi.clone())) {
            rollback(2);
            return Err(e);
        }
        node.lock().msi = Some(msi);
    }
    Ok(())
}

/// Register the interfaces of a started bus or bridge.
pub(super) fn create_bus_interfaces(
    os: &dyn DeviceManager,
    device: DeviceHandle,
    node: &PciNode,
) -> PciResult {
    let access = node.config_access().ok_or(PciError::TOO_EARLY)?;
    os.create_interface(
        &SPECIFIC_PCI_CONFIG_UUID,
        device,
        PciInterface::SpecificConfig(SpecificConfigInterface::new(access)),
    )
}

//! I/O request packets.
//!
//! The device manager builds an IRP, sends it down a device stack and each
//! driver on the way gets a look at it. Exactly one of them completes it,
//! which turns it around to travel back up.

use super::pci::PciInterface;
use super::*;
use alloc::vec::Vec;
use numeric_enum_macro::numeric_enum;

numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum IrpMajor {
        StateChange = 1,
        Open = 2,
        Close = 3,
        Io = 4,
        SystemControl = 5,
        UserControl = 6,
    }
}

numeric_enum! {
    #[repr(u32)]
    #[derive(Debug, Clone, Copy, Eq, PartialEq)]
    pub enum IrpMinor {
        QueryResources = 0x1000,
        StartDevice = 0x1001,
        QueryChildren = 0x1002,
        QueryInterface = 0x1003,
        RemoveDevice = 0x1004,
        Idle = 0x1005,
        Suspend = 0x1006,
        Resume = 0x1007,
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum IrpDirection {
    /// Travelling toward the bus driver.
    Down,
    /// Completed, travelling back to the originator.
    Up,
}

/// Filled by the bus driver of a device.
#[derive(Debug, Default)]
pub struct QueryResources {
    pub requirements: Option<ResourceConfigurationList>,
    pub boot_allocations: Option<ResourceAllocationList>,
}

/// The resources granted to a device, as seen by the processor and as seen
/// from the device's own bus.
#[derive(Debug, Default)]
pub struct StartDevice {
    pub processor_local: Option<ResourceAllocationList>,
    pub bus_local: Option<ResourceAllocationList>,
}

#[derive(Debug, Default)]
pub struct QueryChildren {
    pub children: Vec<DeviceHandle>,
}

/// A request for an interface keyed by UUID.
///
/// Without a buffer the caller only asks whether the interface exists and
/// how large it is.
#[derive(Debug, Default)]
pub struct QueryInterface {
    pub uuid: Option<Uuid>,
    pub has_buffer: bool,
    pub buffer_size: usize,
    pub interface: Option<PciInterface>,
}

#[derive(Debug)]
pub enum IrpPayload {
    None,
    QueryResources(QueryResources),
    StartDevice(StartDevice),
    QueryChildren(QueryChildren),
    QueryInterface(QueryInterface),
}

#[derive(Debug)]
pub struct Irp {
    /// The device whose stack the IRP was sent to.
    pub device: DeviceHandle,
    pub major: IrpMajor,
    pub minor: IrpMinor,
    pub direction: IrpDirection,
    status: PciResult,
    completed: bool,
    pub payload: IrpPayload,
}

impl Irp {
    pub fn new(device: DeviceHandle, major: IrpMajor, minor: IrpMinor) -> Self {
        let payload = match minor {
            IrpMinor::QueryResources => IrpPayload::QueryResources(QueryResources::default()),
            IrpMinor::StartDevice => IrpPayload::StartDevice(StartDevice::default()),
            IrpMinor::QueryChildren => IrpPayload::QueryChildren(QueryChildren::default()),
            IrpMinor::QueryInterface => IrpPayload::QueryInterface(QueryInterface::default()),
            _ => IrpPayload::None,
        };
        Irp {
            device,
            major,
            minor,
            direction: IrpDirection::Down,
            status: Err(PciError::NOT_HANDLED),
            completed: false,
            payload,
        }
    }

    /// A state-change IRP carrying `minor`.
    pub fn state_change(device: DeviceHandle, minor: IrpMinor) -> Self {
        Self::new(device, IrpMajor::StateChange, minor)
    }

    /// A StartDevice IRP carrying the granted resources.
    pub fn start_device(
        device: DeviceHandle,
        processor_local: Option<ResourceAllocationList>,
        bus_local: Option<ResourceAllocationList>,
    ) -> Self {
        let mut irp = Self::state_change(device, IrpMinor::StartDevice);
        irp.payload = IrpPayload::StartDevice(StartDevice {
            processor_local,
            bus_local,
        });
        irp
    }

    /// A QueryInterface IRP for `uuid`, with an interface buffer of
    /// `buffer_size` bytes if given.
    pub fn query_interface(device: DeviceHandle, uuid: Uuid, buffer_size: Option<usize>) -> Self {
        let mut irp = Self::state_change(device, IrpMinor::QueryInterface);
        irp.payload = IrpPayload::QueryInterface(QueryInterface {
            uuid: Some(uuid),
            has_buffer: buffer_size.is_some(),
            buffer_size: buffer_size.unwrap_or(0),
            interface: None,
        });
        irp
    }

    /// Finalize the IRP and turn it around.
    ///
    /// # Panic
    ///
    /// Panics if the IRP has already been completed.
    pub fn complete(&mut self, status: PciResult) {
        assert!(!self.completed, "IRP {:?} completed twice", self.minor);
        self.status = status;
        self.completed = true;
        self.direction = IrpDirection::Up;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// `NOT_HANDLED` until somebody completes the IRP.
    pub fn status(&self) -> PciResult {
        self.status
    }

    pub fn query_resources_mut(&mut self) -> PciResult<&mut QueryResources> {
        match &mut self.payload {
            IrpPayload::QueryResources(p) => Ok(p),
            _ => Err(PciError::INVALID_PARAMETER),
        }
    }

    pub fn start_device_mut(&mut self) -> PciResult<&mut StartDevice> {
        match &mut self.payload {
            IrpPayload::StartDevice(p) => Ok(p),
            _ => Err(PciError::INVALID_PARAMETER),
        }
    }

    pub fn query_children_mut(&mut self) -> PciResult<&mut QueryChildren> {
        match &mut self.payload {
            IrpPayload::QueryChildren(p) => Ok(p),
            _ => Err(PciError::INVALID_PARAMETER),
        }
    }

    pub fn query_interface_mut(&mut self) -> PciResult<&mut QueryInterface> {
        match &mut self.payload {
            IrpPayload::QueryInterface(p) => Ok(p),
            _ => Err(PciError::INVALID_PARAMETER),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_turns_irp_around() {
        let mut irp = Irp::state_change(DeviceHandle(1), IrpMinor::Idle);
        assert_eq!(irp.status(), Err(PciError::NOT_HANDLED));
        assert_eq!(irp.direction, IrpDirection::Down);
        irp.complete(Ok(()));
        assert!(irp.is_completed());
        assert_eq!(irp.direction, IrpDirection::Up);
        assert_eq!(irp.status(), Ok(()));
    }

    #[test]
    #[should_panic]
    fn double_completion_panics() {
        let mut irp = Irp::state_change(DeviceHandle(1), IrpMinor::Resume);
        irp.complete(Ok(()));
        irp.complete(Err(PciError::UNKNOWN));
    }

    #[test]
    fn payload_follows_minor() {
        let mut irp = Irp::state_change(DeviceHandle(2), IrpMinor::QueryChildren);
        assert!(irp.query_children_mut().is_ok());
        assert_eq!(
            irp.query_resources_mut().err(),
            Some(PciError::INVALID_PARAMETER)
        );
        let mut irp = Irp::query_interface(DeviceHandle(2), Uuid([1, 2, 3, 4]), None);
        let query = irp.query_interface_mut().unwrap();
        assert!(!query.has_buffer);
        assert_eq!(query.uuid, Some(Uuid([1, 2, 3, 4])));
    }
}

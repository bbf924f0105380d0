//! Services of the OS device manager consumed by the PCI core.

use super::pci::{PciInterface, PciNode};
use super::*;
use alloc::sync::Arc;

/// An OS device object, owned by the device manager.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, PartialOrd, Ord)]
pub struct DeviceHandle(pub usize);

/// Identifies an interface type.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub struct Uuid(pub [u32; 4]);

/// The device manager: owns the device tree and routes IRPs along device
/// stacks.
pub trait DeviceManager: Send + Sync {
    /// Create a child device under `parent` with PCI as its bus driver.
    /// `context` is the driver context of the new stack's lowest layer.
    fn create_device(
        &self,
        parent: DeviceHandle,
        device_id: &str,
        class_id: Option<&str>,
        context: Arc<PciNode>,
    ) -> PciResult<DeviceHandle>;

    /// Put `context` on top of `device`'s driver stack.
    fn attach_driver(&self, device: DeviceHandle, context: Arc<PciNode>) -> PciResult;

    /// Publish an interface on `device`.
    ///
    /// Returns `DUPLICATE_ENTRY` if `uuid` is already published there.
    fn create_interface(
        &self,
        uuid: &Uuid,
        device: DeviceHandle,
        interface: PciInterface,
    ) -> PciResult;

    fn destroy_interface(&self, uuid: &Uuid, device: DeviceHandle) -> PciResult;

    /// Send `irp` down the stack of `irp.device` and wait for it to complete.
    ///
    /// The outcome is left in the IRP status; the return value only reports
    /// whether the IRP could be sent.
    fn send_synchronous_irp(&self, irp: &mut Irp) -> PciResult;
}

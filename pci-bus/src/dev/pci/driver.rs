//! Entry points the device manager calls into.

use super::config::ConfigAccess;
use super::interface::query_interface;
use super::nodes::PciNode;
use crate::dev::{
    ArbiterService, DeviceHandle, DeviceManager, Irp, IrpDirection, IrpMajor, IrpMinor,
};
use crate::{PciError, PciResult};
use alloc::sync::Arc;
use pci_hal::{InterruptController, MemoryMapper, PlatformCaps};

/// Platform services the bus driver needs.
#[derive(Clone)]
pub struct PciPlatform {
    /// Configuration space of the root bus.
    pub root_config: Arc<dyn ConfigAccess>,
    pub mapper: Arc<dyn MemoryMapper>,
    pub interrupts: Arc<dyn InterruptController>,
    pub caps: Arc<dyn PlatformCaps>,
}

/// The PCI driver, bound to one device manager.
pub struct PciBusDriver {
    pub(super) os: Arc<dyn DeviceManager>,
    pub(super) arbiters: Arc<dyn ArbiterService>,
    pub(super) platform: PciPlatform,
}

impl PciBusDriver {
    pub fn new(
        os: Arc<dyn DeviceManager>,
        arbiters: Arc<dyn ArbiterService>,
        platform: PciPlatform,
    ) -> Self {
        PciBusDriver {
            os,
            arbiters,
            platform,
        }
    }

    pub fn platform(&self) -> &PciPlatform {
        &self.platform
    }

    /// Attach to a device the device manager thinks PCI should drive.
    ///
    /// Root buses are recognized by device ID, bridges by class ID.
    pub fn add_device(
        &self,
        device_id: &str,
        class_id: Option<&str>,
        device: DeviceHandle,
    ) -> PciResult<Arc<PciNode>> {
        let node = match (device_id, class_id) {
            ("PCI" | "PCIe", _) => PciNode::root_bus(self.platform.root_config.clone(), device),
            (_, Some("PCIBridge" | "PCIBridgeSubtractive")) => PciNode::bridge(device),
            _ => {
                warn!("not driving {:?}: {} {:?}", device, device_id, class_id);
                return Err(PciError::UNKNOWN_DEVICE);
            }
        };
        self.os.attach_driver(device, node.clone())?;
        info!("driving {:?} as {:?}", device, node.kind());
        Ok(node)
    }

    /// Handle a state-change IRP passing `node` on its way down.
    ///
    /// As bus driver of a function this completes every request it
    /// understands. As functional driver of a bus or bridge it leaves
    /// completion to the bus driver below, unless something fails.
    pub fn dispatch_state_change(&self, irp: &mut Irp, node: &Arc<PciNode>) {
        if irp.direction != IrpDirection::Down || irp.major != IrpMajor::StateChange {
            return;
        }
        trace!("{:?} {:?} at {:?}", irp.minor, irp.device, node);
        if node.is_function() {
            self.dispatch_function(irp, node);
        } else {
            self.dispatch_bus(irp, node);
        }
    }

    fn dispatch_function(&self, irp: &mut Irp, node: &Arc<PciNode>) {
        match irp.minor {
            IrpMinor::QueryResources => {
                let status = Self::query_resources(irp, node);
                irp.complete(status);
            }
            IrpMinor::StartDevice => {
                let status = Self::start_function(irp, node);
                if let Err(e) = status {
                    warn!("{:?}: start failed: {:?}", node, e);
                }
                irp.complete(status);
            }
            IrpMinor::QueryChildren => irp.complete(Ok(())),
            IrpMinor::QueryInterface => Self::answer_interface(irp, node),
            IrpMinor::Idle | IrpMinor::Suspend | IrpMinor::Resume => irp.complete(Ok(())),
            _ => {}
        }
    }

    fn dispatch_bus(&self, irp: &mut Irp, node: &Arc<PciNode>) {
        let status = match irp.minor {
            IrpMinor::StartDevice => self.start_bus_device(irp, node),
            IrpMinor::QueryChildren => self.query_children(irp, node),
            IrpMinor::QueryInterface => {
                Self::answer_interface(irp, node);
                return;
            }
            _ => return,
        };
        if let Err(e) = status {
            warn!("{:?} on {:?} failed: {:?}", irp.minor, node, e);
            irp.complete(Err(e));
        }
    }

    fn query_resources(irp: &mut Irp, node: &PciNode) -> PciResult {
        let (requirements, boot_allocations) = if node.is_bridge_function() {
            node.query_bridge_resources()?
        } else {
            node.query_function_resources()?
        };
        let query = irp.query_resources_mut()?;
        query.requirements = Some(requirements);
        query.boot_allocations = Some(boot_allocations);
        Ok(())
    }

    fn start_function(irp: &mut Irp, node: &PciNode) -> PciResult {
        let start = irp.start_device_mut()?;
        if node.is_bridge_function() {
            node.set_bridge_resources(start.bus_local.as_ref())
        } else {
            node.set_function_resources(start.bus_local.as_ref())?;
            node.enable()
        }
    }

    /// Complete the IRP unless the interface is not ours; then it keeps
    /// travelling down.
    fn answer_interface(irp: &mut Irp, node: &Arc<PciNode>) {
        let status = match irp.query_interface_mut() {
            Ok(query) => query_interface(node, query),
            Err(e) => Err(e),
        };
        if status != Err(PciError::NO_INTERFACE) {
            irp.complete(status);
        }
    }

    /// Handle a system-control IRP. There are none PCI understands.
    pub fn dispatch_system_control(&self, irp: &mut Irp, _node: &Arc<PciNode>) {
        if irp.direction == IrpDirection::Down {
            irp.complete(Err(PciError::NOT_SUPPORTED));
        }
    }
}

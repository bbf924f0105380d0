//! Starting a root bus or a bridge's functional driver.

use super::driver::PciBusDriver;
use super::interface::{create_bus_interfaces, PciInterface, PCI_BUS_DEVICE_UUID};
use super::nodes::PciNode;
use crate::dev::{Irp, ResourceAllocation, ResourceType};
use crate::{PciError, PciResult};
use alloc::sync::{Arc, Weak};
use core::mem::size_of;

impl PciBusDriver {
    /// Find the function node below `node` in the same device stack.
    ///
    /// The function answers a `PCI_BUS_DEVICE_UUID` query with itself; the
    /// bridge's own driver lets that query pass.
    fn bus_driver_node(&self, irp: &Irp) -> PciResult<Arc<PciNode>> {
        let mut query = Irp::query_interface(
            irp.device,
            PCI_BUS_DEVICE_UUID,
            Some(size_of::<Weak<PciNode>>()),
        );
        self.os.send_synchronous_irp(&mut query)?;
        query.status()?;
        match query.query_interface_mut()?.interface.take() {
            Some(PciInterface::BusDevice(node)) => node.upgrade().ok_or(PciError::UNKNOWN),
            other => {
                error!("{:?}: unexpected bus device answer {:?}", irp.device, other);
                Err(PciError::UNKNOWN)
            }
        }
    }

    /// Take over the granted ranges of a bus or bridge and publish them
    /// to its children through arbiters.
    ///
    /// A bridge first borrows the config accessor of its own function. Of
    /// a bus number range the first number is the bus itself; a single
    /// bus number only names the bus.
    pub(super) fn start_bus_device(&self, irp: &mut Irp, node: &Arc<PciNode>) -> PciResult {
        if node.config_access().is_none() {
            let function = self.bus_driver_node(irp)?;
            let access = function.config_access().ok_or(PciError::TOO_EARLY)?;
            node.lock().config = Some(access);
        }
        create_bus_interfaces(self.os.as_ref(), irp.device, node)?;

        let allocations = match &irp.start_device_mut()?.processor_local {
            Some(allocations) => allocations.clone(),
            None => return Ok(()),
        };
        let device = irp.device;
        let mut created: [Option<ResourceType>; 3] = [None; 3];
        let mut ensure_arbiter = |rtype: ResourceType| -> PciResult {
            if created.contains(&Some(rtype)) {
                return Ok(());
            }
            self.arbiters.create_arbiter(device, rtype)?;
            if let Some(slot) = created.iter_mut().find(|slot| slot.is_none()) {
                *slot = Some(rtype);
            }
            Ok(())
        };
        let add = |a: &ResourceAllocation, base: u64, length: u64| {
            self.arbiters
                .add_free_space(device, a.rtype, base, length, a.characteristics, a, 0)
        };

        for allocation in allocations.iter() {
            match allocation.rtype {
                ResourceType::BusNumber => {
                    node.lock().bus_number = allocation.allocation as u8;
                    if allocation.length > 1 {
                        ensure_arbiter(allocation.rtype)?;
                        add(
                            allocation,
                            allocation.allocation + 1,
                            allocation.length - 1,
                        )?;
                    }
                }
                ResourceType::PhysicalAddressSpace | ResourceType::IoPort => {
                    ensure_arbiter(allocation.rtype)?;
                    add(allocation, allocation.allocation, allocation.length)?;
                }
                _ => {}
            }
        }
        info!(
            "{:?}: bus {} started with {} ranges",
            device,
            node.bus_number(),
            allocations.len()
        );
        Ok(())
    }
}

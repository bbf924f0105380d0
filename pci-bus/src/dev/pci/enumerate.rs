//! Bus scanning.

use super::class::class_id;
use super::config::{ConfigAccess, PciReg32};
use super::constants::*;
use super::driver::PciBusDriver;
use super::interface::create_function_interfaces;
use super::nodes::{ChildInfo, PciChild, PciNode};
use crate::dev::{DeviceHandle, Irp};
use crate::{PciError, PciResult};
use alloc::format;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cmp::{max, min};

const PCI_INITIAL_CHILDREN: usize = 10;
const PCI_MAX_CHILDREN: usize = 256;

fn read_id(access: &dyn ConfigAccess, bus: u8, dev: u8, func: u8) -> PciResult<Option<(u16, u16)>> {
    let id = access.read(bus, dev, func, PciReg32::Id as u32, 4)? as u32;
    let vendor_id = id as u16;
    if vendor_id == PCI_INVALID_VENDOR_ID || vendor_id == 0 {
        return Ok(None);
    }
    Ok(Some((vendor_id, (id >> 16) as u16)))
}

/// Make room for one more child, growing geometrically up to the limit.
fn reserve_child(children: &mut Vec<PciChild>) -> PciResult {
    if children.len() < children.capacity() {
        return Ok(());
    }
    assert!(
        children.len() < PCI_MAX_CHILDREN,
        "more than {} functions on one bus",
        PCI_MAX_CHILDREN
    );
    let target = min(max(children.capacity() * 2, PCI_INITIAL_CHILDREN), PCI_MAX_CHILDREN);
    children.try_reserve_exact(target - children.len())?;
    Ok(())
}

impl PciBusDriver {
    /// Scan the bus behind `node` and create a device for every function
    /// not seen before.
    ///
    /// The node stays unlocked while devices are created, so the device
    /// manager may send requests back to it. Scans of one bus must not
    /// overlap.
    ///
    /// # Panic
    ///
    /// Panics if a known slot now reports different IDs.
    pub(super) fn enumerate_bus(&self, node: &Arc<PciNode>) -> PciResult {
        let (access, parent, bus, known) = {
            let inner = node.lock();
            let access = inner.config.clone().ok_or(PciError::TOO_EARLY)?;
            let parent = inner.device.ok_or(PciError::TOO_EARLY)?;
            let known: Vec<ChildInfo> = inner.children.iter().map(|c| c.info).collect();
            (access, parent, inner.bus_number, known)
        };
        debug!("scanning bus {:#x} of {:?}", bus, parent);

        let mut found = Vec::new();
        for dev in 0..PCI_MAX_DEVICES_PER_BUS {
            if read_id(access.as_ref(), bus, dev, 0)?.is_none() {
                continue;
            }
            let header = access.read(bus, dev, 0, PciReg32::Header as u32, 4)? as u32 >> 16;
            let functions = if header & PCI_HEADER_TYPE_MULTI_FN != 0 {
                PCI_MAX_FUNCTIONS_PER_DEVICE
            } else {
                1
            };
            for func in 0..functions {
                let (vendor_id, device_id) = match read_id(access.as_ref(), bus, dev, func)? {
                    Some(id) => id,
                    None => continue,
                };
                let old = known
                    .iter()
                    .find(|info| info.device_number == dev && info.function_number == func);
                if let Some(old) = old {
                    let same = old.vendor_id == vendor_id && old.device_id == device_id;
                    if !same {
                        error!(
                            "{:02x}:{:02x}.{} changed from {:04x}:{:04x} to {:04x}:{:04x}",
                            bus, dev, func, old.vendor_id, old.device_id, vendor_id, device_id
                        );
                    }
                    assert!(same, "PCI function changed identity in place");
                    continue;
                }
                found.try_reserve(1)?;
                found.push(ChildInfo {
                    device_number: dev,
                    function_number: func,
                    vendor_id,
                    device_id,
                });
            }
        }

        for info in found {
            reserve_child(&mut node.lock().children)?;
            let device = self.create_child(node, parent, access.clone(), bus, info)?;
            node.lock().children.push(PciChild { device, info });
        }
        Ok(())
    }

    fn create_child(
        &self,
        parent_node: &Arc<PciNode>,
        parent: DeviceHandle,
        access: Arc<dyn ConfigAccess>,
        bus: u8,
        info: ChildInfo,
    ) -> PciResult<DeviceHandle> {
        let class_code = access.read(
            bus,
            info.device_number,
            info.function_number,
            PciReg32::ClassCode as u32,
            4,
        )? as u32
            & PCI_CLASS_CODE_MASK;
        let child = PciNode::function(parent_node, access, bus, info, class_code);
        let device_id = format!("VEN_{:04X}&DEV_{:04X}", info.vendor_id, info.device_id);
        let class = class_id(class_code);
        let device = self
            .os
            .create_device(parent, &device_id, class, child.clone())?;
        child.lock().device = Some(device);
        create_function_interfaces(self.os.as_ref(), &self.platform, device, &child)?;
        info!(
            "{:02x}:{:02x}.{} {} class {:#010x} {:?} -> {:?}",
            bus, info.device_number, info.function_number, device_id, class_code, class, device
        );
        Ok(device)
    }

    /// Enumerate and report every child device of the bus.
    pub(super) fn query_children(&self, irp: &mut Irp, node: &Arc<PciNode>) -> PciResult {
        self.enumerate_bus(node)?;
        let children = node.children();
        let query = irp.query_children_mut()?;
        query.children.try_reserve(children.len())?;
        query.children.extend(children.iter().map(|c| c.device));
        Ok(())
    }
}

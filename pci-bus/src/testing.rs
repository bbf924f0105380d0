//! A device manager and platform to run the bus driver against.

use crate::dev::pci::{
    ChildInfo, ConfigAccess, Mechanism1, PciBusDriver, PciInterface, PciNode, PciPlatform,
};
use crate::dev::{
    DeviceHandle, DeviceManager, Irp, IrpMajor, IrpMinor, RegionArbiterService, Uuid,
};
use crate::{PciError, PciResult};
use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use core::sync::atomic::{AtomicUsize, Ordering};
use hashbrown::HashMap;
use pci_hal::libos::{FakeConfigSpace, FakeInterruptController, FakePlatform, HostMemory};
use spin::Mutex;

/// Platform services over `space`, with no device memory and MSI allowed.
pub fn platform_for(space: Arc<FakeConfigSpace>) -> PciPlatform {
    PciPlatform {
        root_config: Arc::new(Mechanism1::new(space)),
        mapper: Arc::new(HostMemory::new()),
        interrupts: Arc::new(FakeInterruptController::new()),
        caps: Arc::new(FakePlatform::new(true)),
    }
}

/// A function node for `bus:dev.func` of `space`, below a throwaway root.
pub fn function_node(space: &Arc<FakeConfigSpace>, bus: u8, dev: u8, func: u8) -> Arc<PciNode> {
    let access: Arc<dyn ConfigAccess> = Arc::new(Mechanism1::new(space.clone()));
    let root = PciNode::root_bus(access.clone(), DeviceHandle(0));
    let id = space.read32(bus, dev, func, 0x00);
    let class_code = space.read32(bus, dev, func, 0x08) & 0xffff_ff00;
    let info = ChildInfo {
        device_number: dev,
        function_number: func,
        vendor_id: id as u16,
        device_id: (id >> 16) as u16,
    };
    PciNode::function(&root, access, bus, info, class_code)
}

struct Device {
    device_id: String,
    class_id: Option<String>,
    parent: Option<DeviceHandle>,
    /// Bottom first.
    stack: Vec<Arc<PciNode>>,
}

/// Keeps devices, their driver stacks and published interfaces, and
/// routes IRPs down the stacks to a bound [`PciBusDriver`].
pub struct FakeDeviceManager {
    driver: Mutex<Weak<PciBusDriver>>,
    devices: Mutex<BTreeMap<DeviceHandle, Device>>,
    interfaces: Mutex<HashMap<(Uuid, DeviceHandle), PciInterface>>,
    failing: Mutex<Option<Uuid>>,
    next_handle: AtomicUsize,
}

impl Default for FakeDeviceManager {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDeviceManager {
    pub fn new() -> Self {
        FakeDeviceManager {
            driver: Mutex::new(Weak::new()),
            devices: Mutex::new(BTreeMap::new()),
            interfaces: Mutex::new(HashMap::new()),
            failing: Mutex::new(None),
            next_handle: AtomicUsize::new(100),
        }
    }

    pub fn bind(&self, driver: &Arc<PciBusDriver>) {
        *self.driver.lock() = Arc::downgrade(driver);
    }

    fn insert(&self, device: Device) -> DeviceHandle {
        let handle = DeviceHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        self.devices.lock().insert(handle, device);
        handle
    }

    /// A device with no driver yet, as firmware enumeration would report it.
    pub fn add_root(&self, device_id: &str) -> DeviceHandle {
        self.insert(Device {
            device_id: device_id.to_string(),
            class_id: None,
            parent: None,
            stack: Vec::new(),
        })
    }

    pub fn device_id(&self, device: DeviceHandle) -> Option<String> {
        self.devices.lock().get(&device).map(|d| d.device_id.clone())
    }

    pub fn class_id(&self, device: DeviceHandle) -> Option<String> {
        self.devices.lock().get(&device).and_then(|d| d.class_id.clone())
    }

    pub fn parent(&self, device: DeviceHandle) -> Option<DeviceHandle> {
        self.devices.lock().get(&device).and_then(|d| d.parent)
    }

    pub fn stack(&self, device: DeviceHandle) -> Vec<Arc<PciNode>> {
        self.devices
            .lock()
            .get(&device)
            .map(|d| d.stack.clone())
            .unwrap_or_default()
    }

    pub fn interface(&self, uuid: &Uuid, device: DeviceHandle) -> Option<PciInterface> {
        self.interfaces.lock().get(&(*uuid, device)).cloned()
    }

    pub fn interface_count(&self, device: DeviceHandle) -> usize {
        self.interfaces
            .lock()
            .keys()
            .filter(|(_, d)| *d == device)
            .count()
    }

    /// Make every later registration of `uuid` fail.
    pub fn fail_interface(&self, uuid: Uuid) {
        *self.failing.lock() = Some(uuid);
    }

    /// Send `irp` down the stack of `irp.device`, top first, until a
    /// driver completes it. Whatever is left is completed the way the
    /// parent bus would.
    pub fn send(&self, irp: &mut Irp) {
        let stack = self.stack(irp.device);
        let driver = self.driver.lock().upgrade();
        if let Some(driver) = driver {
            for node in stack.iter().rev() {
                match irp.major {
                    IrpMajor::SystemControl => driver.dispatch_system_control(irp, node),
                    _ => driver.dispatch_state_change(irp, node),
                }
                if irp.is_completed() {
                    return;
                }
            }
        }
        if irp.minor == IrpMinor::QueryInterface {
            irp.complete(Err(PciError::NO_INTERFACE));
        } else {
            irp.complete(Ok(()));
        }
    }
}

impl DeviceManager for FakeDeviceManager {
    fn create_device(
        &self,
        parent: DeviceHandle,
        device_id: &str,
        class_id: Option<&str>,
        context: Arc<PciNode>,
    ) -> PciResult<DeviceHandle> {
        Ok(self.insert(Device {
            device_id: device_id.to_string(),
            class_id: class_id.map(|c| c.to_string()),
            parent: Some(parent),
            stack: vec![context],
        }))
    }

    fn attach_driver(&self, device: DeviceHandle, context: Arc<PciNode>) -> PciResult {
        let mut devices = self.devices.lock();
        let entry = devices.get_mut(&device).ok_or(PciError::INVALID_PARAMETER)?;
        entry.stack.push(context);
        Ok(())
    }

    fn create_interface(
        &self,
        uuid: &Uuid,
        device: DeviceHandle,
        interface: PciInterface,
    ) -> PciResult {
        if *self.failing.lock() == Some(*uuid) {
            return Err(PciError::NO_MEMORY);
        }
        let mut interfaces = self.interfaces.lock();
        if interfaces.contains_key(&(*uuid, device)) {
            return Err(PciError::DUPLICATE_ENTRY);
        }
        interfaces.insert((*uuid, device), interface);
        Ok(())
    }

    fn destroy_interface(&self, uuid: &Uuid, device: DeviceHandle) -> PciResult {
        self.interfaces
            .lock()
            .remove(&(*uuid, device))
            .map(|_| ())
            .ok_or(PciError::INVALID_PARAMETER)
    }

    fn send_synchronous_irp(&self, irp: &mut Irp) -> PciResult {
        self.send(irp);
        Ok(())
    }
}

/// A root bus over `space` with the driver, device manager and arbiters
/// wired together.
pub struct TestBus {
    pub space: Arc<FakeConfigSpace>,
    pub mem: Arc<HostMemory>,
    pub irq: Arc<FakeInterruptController>,
    pub os: Arc<FakeDeviceManager>,
    pub arbiters: Arc<RegionArbiterService>,
    pub driver: Arc<PciBusDriver>,
    pub root_device: DeviceHandle,
    pub root: Arc<PciNode>,
}

impl TestBus {
    pub fn new(space: Arc<FakeConfigSpace>) -> Self {
        let mem = Arc::new(HostMemory::new());
        let irq = Arc::new(FakeInterruptController::new());
        let platform = PciPlatform {
            root_config: Arc::new(Mechanism1::new(space.clone())),
            mapper: mem.clone(),
            interrupts: irq.clone(),
            caps: Arc::new(FakePlatform::new(true)),
        };
        let os = Arc::new(FakeDeviceManager::new());
        let arbiters = Arc::new(RegionArbiterService::new());
        let driver = Arc::new(PciBusDriver::new(os.clone(), arbiters.clone(), platform));
        os.bind(&driver);
        let root_device = os.add_root("PCI");
        let root = driver.add_device("PCI", None, root_device).unwrap();
        TestBus {
            space,
            mem,
            irq,
            os,
            arbiters,
            driver,
            root_device,
            root,
        }
    }

    /// Send a state change with no payload to `device` and return its
    /// status.
    pub fn state_change(&self, device: DeviceHandle, minor: IrpMinor) -> (Irp, PciResult) {
        let mut irp = Irp::state_change(device, minor);
        self.os.send(&mut irp);
        let status = irp.status();
        (irp, status)
    }

    /// Enumerate `device` and return its children.
    pub fn query_children(&self, device: DeviceHandle) -> Vec<DeviceHandle> {
        let (mut irp, status) = self.state_change(device, IrpMinor::QueryChildren);
        assert_eq!(status, Ok(()));
        irp.query_children_mut().unwrap().children.clone()
    }
}

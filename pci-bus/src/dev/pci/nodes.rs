use super::config::{ConfigAccess, PciConfig};
use super::constants::*;
use super::msi::MsiContext;
use crate::dev::DeviceHandle;
use crate::{PciError, PciResult};
use alloc::sync::{Arc, Weak};
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// The role a node plays in its device stack.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum PciFunctionType {
    /// Functional driver of a root bus.
    RootBus,
    /// Functional driver of a PCI-to-PCI bridge, above the bridge's function.
    Bridge,
    /// Bus driver of a function. `is_bridge` if its class is PCI-to-PCI
    /// bridge and it reports windows instead of BARs.
    Function { is_bridge: bool },
}

/// The six BAR slots of a function.
///
/// A 64-bit memory BAR spans two adjacent slots; [`BarSet::bar_pair`]
/// composes them.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct BarSet {
    pub bar32: [u32; PCI_BAR_COUNT],
}

impl BarSet {
    pub fn is_io(&self, index: usize) -> bool {
        self.bar32[index] & PCI_BAR_IO_SPACE != 0
    }

    pub fn is_64bit(&self, index: usize) -> bool {
        !self.is_io(index)
            && self.bar32[index] & PCI_BAR_MEMORY_SIZE_MASK == PCI_BAR_MEMORY_SIZE_64
    }

    /// Slots `index` and `index + 1` as one value, if slot `index` is a
    /// 64-bit memory BAR with room for its upper half.
    pub fn bar_pair(&self, index: usize) -> Option<u64> {
        if !self.is_64bit(index) || index + 1 >= PCI_BAR_COUNT {
            return None;
        }
        Some(self.bar32[index] as u64 | (self.bar32[index + 1] as u64) << 32)
    }
}

/// Identity of a discovered child.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ChildInfo {
    pub device_number: u8,
    pub function_number: u8,
    pub vendor_id: u16,
    pub device_id: u16,
}

/// A child OS device together with what was read from its header.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PciChild {
    pub device: DeviceHandle,
    pub info: ChildInfo,
}

/// Bridge registers as firmware left them.
#[derive(Debug, Default, Clone, Copy, Eq, PartialEq)]
pub struct BridgeWindows {
    pub secondary_bus: u8,
    pub io_base: u64,
    pub io_limit: u64,
    pub memory_base: u64,
    pub memory_limit: u64,
    pub prefetch_base: u64,
    pub prefetch_limit: u64,
}

pub(super) struct PciNodeInner {
    pub bus_number: u8,
    pub config: Option<Arc<dyn ConfigAccess>>,
    pub device: Option<DeviceHandle>,
    pub interrupt_pin: u8,
    pub bars_read: bool,
    pub boot_configuration: BarSet,
    pub boot_control: u16,
    pub decode_bits: BarSet,
    pub bar_count: u8,
    pub bridge_windows: BridgeWindows,
    pub children: Vec<PciChild>,
    pub msi: Option<Arc<MsiContext>>,
}

/// One PCI driver context in the device tree.
pub struct PciNode {
    kind: PciFunctionType,
    device_number: u8,
    function_number: u8,
    class_code: u32,
    vendor_id: u16,
    device_id: u16,
    parent: Weak<PciNode>,
    inner: Mutex<PciNodeInner>,
}

impl core::fmt::Debug for PciNode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("PciNode")
            .field("kind", &self.kind)
            .field("bus", &inner.bus_number)
            .field("dev", &self.device_number)
            .field("func", &self.function_number)
            .field("class_code", &self.class_code)
            .field("device", &inner.device)
            .finish()
    }
}

impl PciNode {
    fn new(
        kind: PciFunctionType,
        bus_number: u8,
        device_number: u8,
        function_number: u8,
        parent: Weak<PciNode>,
        config: Option<Arc<dyn ConfigAccess>>,
        device: Option<DeviceHandle>,
    ) -> Self {
        PciNode {
            kind,
            device_number,
            function_number,
            class_code: 0,
            vendor_id: 0,
            device_id: 0,
            parent,
            inner: Mutex::new(PciNodeInner {
                bus_number,
                config,
                device,
                interrupt_pin: 0,
                bars_read: false,
                boot_configuration: BarSet::default(),
                boot_control: 0,
                decode_bits: BarSet::default(),
                bar_count: 0,
                bridge_windows: BridgeWindows::default(),
                children: Vec::new(),
                msi: None,
            }),
        }
    }

    /// The functional driver of root bus 0 of `config`.
    pub fn root_bus(config: Arc<dyn ConfigAccess>, device: DeviceHandle) -> Arc<Self> {
        Arc::new(Self::new(
            PciFunctionType::RootBus,
            0,
            0,
            0,
            Weak::new(),
            Some(config),
            Some(device),
        ))
    }

    /// The functional driver of a bridge. Config access is borrowed from
    /// the bridge's function when the bridge starts.
    pub fn bridge(device: DeviceHandle) -> Arc<Self> {
        Arc::new(Self::new(
            PciFunctionType::Bridge,
            0,
            0,
            0,
            Weak::new(),
            None,
            Some(device),
        ))
    }

    /// A function found at `bus:dev.func` while enumerating `parent`.
    pub(crate) fn function(
        parent: &Arc<PciNode>,
        config: Arc<dyn ConfigAccess>,
        bus: u8,
        info: ChildInfo,
        class_code: u32,
    ) -> Arc<Self> {
        let is_bridge =
            class_code == PCI_CLASS_BRIDGE_PCI || class_code == PCI_CLASS_BRIDGE_PCI_SUBTRACTIVE;
        let mut node = Self::new(
            PciFunctionType::Function { is_bridge },
            bus,
            info.device_number,
            info.function_number,
            Arc::downgrade(parent),
            Some(config),
            None,
        );
        node.class_code = class_code;
        node.vendor_id = info.vendor_id;
        node.device_id = info.device_id;
        Arc::new(node)
    }

    pub fn kind(&self) -> PciFunctionType {
        self.kind
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, PciFunctionType::Function { .. })
    }

    /// Function reporting bridge windows.
    pub fn is_bridge_function(&self) -> bool {
        self.kind == PciFunctionType::Function { is_bridge: true }
    }

    pub fn device_number(&self) -> u8 {
        self.device_number
    }

    pub fn function_number(&self) -> u8 {
        self.function_number
    }

    /// The class-code dword with the revision masked off.
    pub fn class_code(&self) -> u32 {
        self.class_code
    }

    pub fn vendor_id(&self) -> u16 {
        self.vendor_id
    }

    pub fn device_id(&self) -> u16 {
        self.device_id
    }

    pub fn parent(&self) -> Option<Arc<PciNode>> {
        self.parent.upgrade()
    }

    /// For functions, the bus they sit on. For buses and bridges, the bus
    /// they lead to.
    pub fn bus_number(&self) -> u8 {
        self.inner.lock().bus_number
    }

    pub fn device(&self) -> Option<DeviceHandle> {
        self.inner.lock().device
    }

    pub fn children(&self) -> Vec<PciChild> {
        self.inner.lock().children.clone()
    }

    pub fn interrupt_pin(&self) -> u8 {
        self.inner.lock().interrupt_pin
    }

    pub fn bar_count(&self) -> u8 {
        self.inner.lock().bar_count
    }

    pub fn decode_bits(&self) -> BarSet {
        self.inner.lock().decode_bits
    }

    pub fn boot_configuration(&self) -> BarSet {
        self.inner.lock().boot_configuration
    }

    pub fn boot_control(&self) -> u16 {
        self.inner.lock().boot_control
    }

    pub fn bridge_windows(&self) -> BridgeWindows {
        self.inner.lock().bridge_windows
    }

    pub fn msi(&self) -> Option<Arc<MsiContext>> {
        self.inner.lock().msi.clone()
    }

    pub fn config_access(&self) -> Option<Arc<dyn ConfigAccess>> {
        self.inner.lock().config.clone()
    }

    /// The configuration space of this function.
    pub fn config(&self) -> PciResult<PciConfig> {
        let inner = self.inner.lock();
        inner.function_config(self)
    }

    pub(super) fn lock(&self) -> MutexGuard<'_, PciNodeInner> {
        self.inner.lock()
    }
}

impl PciNodeInner {
    /// Config space of `node`'s own function; `TOO_EARLY` while a bridge
    /// has no accessor yet.
    pub fn function_config(&self, node: &PciNode) -> PciResult<PciConfig> {
        let access = self.config.clone().ok_or(PciError::TOO_EARLY)?;
        Ok(PciConfig::new(
            access,
            self.bus_number,
            node.device_number,
            node.function_number,
        ))
    }
}

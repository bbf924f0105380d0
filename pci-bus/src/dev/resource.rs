use {crate::*, alloc::vec::Vec, bitflags::bitflags, numeric_enum_macro::numeric_enum};

numeric_enum! {
    #[repr(u32)]
    /// The kinds of resources a device can request and be granted.
    #[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
    pub enum ResourceType {
        Invalid = 0,
        PhysicalAddressSpace = 1,
        IoPort = 2,
        InterruptLine = 3,
        InterruptVector = 4,
        BusNumber = 5,
        DmaChannel = 6,
        VendorSpecific = 7,
        Gpio = 8,
        SimpleBus = 9,
    }
}

bitflags! {
    /// Sharing rules of a requirement or allocation.
    #[derive(Default)]
    pub struct ResourceFlags: u32 {
        #[allow(clippy::identity_op)]
        /// Nobody else may be granted an overlapping range.
        const NOT_SHAREABLE = 1 << 0;
    }
}

bitflags! {
    /// Type-specific properties of a resource.
    #[derive(Default)]
    pub struct ResourceCharacteristics: u64 {
        #[allow(clippy::identity_op)]
        const MEMORY_PREFETCHABLE           = 1 << 0;
        const INTERRUPT_LINE_EDGE_TRIGGERED = 1 << 1;
        const INTERRUPT_LINE_ACTIVE_LOW     = 1 << 2;
    }
}

/// One range a device asks for.
///
/// The granted range must start in `[minimum, maximum)`, be aligned to
/// `alignment`, and span `length` units.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResourceRequirement {
    pub rtype: ResourceType,
    pub minimum: u64,
    pub maximum: u64,
    pub alignment: u64,
    pub length: u64,
    pub characteristics: ResourceCharacteristics,
    pub flags: ResourceFlags,
}

/// A set of requirements that must all be satisfied together.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ResourceRequirementList {
    pub requirements: Vec<ResourceRequirement>,
}

impl ResourceRequirementList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, requirement: ResourceRequirement) -> PciResult {
        self.requirements.try_reserve(1)?;
        self.requirements.push(requirement);
        Ok(())
    }

    pub fn iter(&self) -> impl Iterator<Item = &ResourceRequirement> {
        self.requirements.iter()
    }

    pub fn len(&self) -> usize {
        self.requirements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requirements.is_empty()
    }
}

/// Alternative requirement lists, in order of preference.
#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ResourceConfigurationList {
    pub alternatives: Vec<ResourceRequirementList>,
}

impl ResourceConfigurationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, list: ResourceRequirementList) -> PciResult {
        self.alternatives.try_reserve(1)?;
        self.alternatives.push(list);
        Ok(())
    }
}

/// A range granted to a device.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct ResourceAllocation {
    pub rtype: ResourceType,
    pub allocation: u64,
    pub length: u64,
    pub characteristics: ResourceCharacteristics,
    pub flags: ResourceFlags,
}

impl ResourceAllocation {
    pub fn is_prefetchable(&self) -> bool {
        self.characteristics
            .contains(ResourceCharacteristics::MEMORY_PREFETCHABLE)
    }
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct ResourceAllocationList {
    pub allocations: Vec<ResourceAllocation>,
}

impl ResourceAllocationList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, allocation: ResourceAllocation) -> PciResult {
        self.allocations.try_reserve(1)?;
        self.allocations.push(allocation);
        Ok(())
    }

    pub fn iter(&self) -> core::slice::Iter<'_, ResourceAllocation> {
        self.allocations.iter()
    }

    pub fn len(&self) -> usize {
        self.allocations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }
}

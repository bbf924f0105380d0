//! Resource arbiters.
//!
//! A bus driver hands the ranges it was granted to an arbiter on its own
//! device; the arbiter then carves them up among the bus's children.

use super::*;
use alloc::{sync::Arc, vec::Vec};
use hashbrown::HashMap;
use region_alloc::RegionAllocator;
use spin::Mutex;

/// The arbiter service of the device manager.
pub trait ArbiterService: Send + Sync {
    /// Create the arbiter for `rtype` on `device`.
    fn create_arbiter(&self, device: DeviceHandle, rtype: ResourceType) -> PciResult;

    /// Make `[base, base + length)` available to `device`'s children.
    ///
    /// `source` is the allocation the range was carved from and
    /// `translation_offset` converts bus addresses to processor addresses.
    #[allow(clippy::too_many_arguments)]
    fn add_free_space(
        &self,
        device: DeviceHandle,
        rtype: ResourceType,
        base: u64,
        length: u64,
        characteristics: ResourceCharacteristics,
        source: &ResourceAllocation,
        translation_offset: u64,
    ) -> PciResult;
}

/// A range handed to an arbiter, as recorded by [`RegionArbiterService`].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct FreeSpaceGrant {
    pub device: DeviceHandle,
    pub rtype: ResourceType,
    pub base: u64,
    pub length: u64,
    pub characteristics: ResourceCharacteristics,
    pub source: ResourceAllocation,
    pub translation_offset: u64,
}

/// Arbiter service keeping one region allocator per (device, type).
#[derive(Default)]
pub struct RegionArbiterService {
    pools: Mutex<HashMap<(DeviceHandle, ResourceType), Arc<Mutex<RegionAllocator>>>>,
    grants: Mutex<Vec<FreeSpaceGrant>>,
}

impl RegionArbiterService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `device` has an arbiter for `rtype`.
    pub fn has_arbiter(&self, device: DeviceHandle, rtype: ResourceType) -> bool {
        self.pools.lock().contains_key(&(device, rtype))
    }

    /// Every free-space grant so far, oldest first.
    pub fn grants(&self) -> Vec<FreeSpaceGrant> {
        self.grants.lock().clone()
    }
}

impl ArbiterService for RegionArbiterService {
    fn create_arbiter(&self, device: DeviceHandle, rtype: ResourceType) -> PciResult {
        let mut pools = self.pools.lock();
        if pools.contains_key(&(device, rtype)) {
            return Err(PciError::DUPLICATE_ENTRY);
        }
        debug!("create {:?} arbiter on {:?}", rtype, device);
        pools.insert((device, rtype), Default::default());
        Ok(())
    }

    fn add_free_space(
        &self,
        device: DeviceHandle,
        rtype: ResourceType,
        base: u64,
        length: u64,
        characteristics: ResourceCharacteristics,
        source: &ResourceAllocation,
        translation_offset: u64,
    ) -> PciResult {
        let pool = self
            .pools
            .lock()
            .get(&(device, rtype))
            .cloned()
            .ok_or(PciError::INVALID_PARAMETER)?;
        if length == 0 {
            return Ok(());
        }
        debug!(
            "{:?} arbiter on {:?}: free space {:#x}+{:#x}",
            rtype, device, base, length
        );
        pool.lock()
            .add_or_subtract(base as usize, length as usize, true);
        self.grants.lock().push(FreeSpaceGrant {
            device,
            rtype,
            base,
            length,
            characteristics,
            source: *source,
            translation_offset,
        });
        Ok(())
    }
}

//! The capability list in configuration space.

use super::config::{PciConfig, PciReg16, PciReg32, PciReg8};
use super::constants::*;
use crate::PciResult;

/// One entry of the capability list.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PciCapability {
    pub id: u8,
    pub offset: u8,
    pub next: u8,
}

/// Walks the capability list of one function.
///
/// The walk takes at most one step per dword after the standard header and
/// never visits an offset twice, so a corrupted list still terminates.
pub struct CapabilityWalk<'a> {
    config: &'a PciConfig,
    next: u8,
    visited: [bool; PCI_CONFIG_SPACE_SIZE as usize / 4],
    steps: usize,
}

impl<'a> CapabilityWalk<'a> {
    /// Start at the capability pointer. The list is empty if the status
    /// register does not advertise one.
    pub fn new(config: &'a PciConfig) -> PciResult<Self> {
        let next = if !has_capabilities(config)? {
            0
        } else {
            let header = config.read32(PciReg32::Header)?;
            let header_type = (header >> 16) & PCI_HEADER_TYPE_MASK;
            let pointer = if header_type == PCI_HEADER_TYPE_CARDBUS {
                PciReg8::CardbusCapabilitiesPtr
            } else {
                PciReg8::CapabilitiesPtr
            };
            config.read8(pointer)? & PCI_CAPABILITY_POINTER_MASK
        };
        Ok(CapabilityWalk {
            config,
            next,
            visited: [false; PCI_CONFIG_SPACE_SIZE as usize / 4],
            steps: 0,
        })
    }
}

impl<'a> Iterator for CapabilityWalk<'a> {
    type Item = PciResult<PciCapability>;

    fn next(&mut self) -> Option<Self::Item> {
        let offset = self.next;
        if offset == 0 {
            return None;
        }
        if self.steps >= PCI_CAPABILITY_WALK_LIMIT || self.visited[offset as usize / 4] {
            warn!(
                "{:?}: capability list loops at {:#x} after {} entries",
                self.config, offset, self.steps
            );
            self.next = 0;
            return None;
        }
        self.visited[offset as usize / 4] = true;
        self.steps += 1;
        let entry = match self.config.read16_(offset as u32) {
            Ok(entry) => entry,
            Err(e) => {
                self.next = 0;
                return Some(Err(e));
            }
        };
        let cap = PciCapability {
            id: entry as u8,
            offset,
            next: (entry >> 8) as u8 & PCI_CAPABILITY_POINTER_MASK,
        };
        debug!("{:?}: capability {:#x} at {:#x}", self.config, cap.id, offset);
        self.next = cap.next;
        Some(Ok(cap))
    }
}

/// Whether the function advertises a capability list at all.
pub(super) fn has_capabilities(config: &PciConfig) -> PciResult<bool> {
    Ok(config.read16(PciReg16::Status)? & PCI_STATUS_CAPABILITIES_LIST != 0)
}

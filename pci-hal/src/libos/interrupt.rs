use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};
use spin::Mutex;

use crate::{HalError, HalResult, InterruptController, MsiInfo, PlatformCaps, ProcessorSet};

const MSI_ADDRESS_BASE: u64 = 0xfee0_0000;

/// A local-APIC style message source: the destination processor goes in
/// the address, the vector in the data.
#[derive(Default)]
pub struct FakeInterruptController {
    requests: Mutex<Vec<(u64, u64, ProcessorSet)>>,
}

impl FakeInterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(vector, count, processors)` of every request so far.
    pub fn requests(&self) -> Vec<(u64, u64, ProcessorSet)> {
        self.requests.lock().clone()
    }
}

impl InterruptController for FakeInterruptController {
    fn get_msi_info(
        &self,
        vector: u64,
        count: u64,
        processors: &ProcessorSet,
    ) -> HalResult<Vec<MsiInfo>> {
        if count == 0 {
            return Err(HalError::InvalidParameter);
        }
        self.requests.lock().push((vector, count, *processors));
        let cpu = match processors {
            ProcessorSet::All => 0,
            ProcessorSet::Single(id) => *id as u64,
        };
        Ok((0..count)
            .map(|k| MsiInfo {
                address: MSI_ADDRESS_BASE | (cpu << 12),
                data: vector + k,
            })
            .collect())
    }
}

/// Platform capabilities with a switch for MSI support.
pub struct FakePlatform {
    msi_supported: AtomicBool,
}

impl FakePlatform {
    pub fn new(msi_supported: bool) -> Self {
        FakePlatform {
            msi_supported: AtomicBool::new(msi_supported),
        }
    }

    pub fn set_msi_supported(&self, supported: bool) {
        self.msi_supported.store(supported, Ordering::SeqCst);
    }
}

impl PlatformCaps for FakePlatform {
    fn msi_supported(&self) -> bool {
        self.msi_supported.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_follow_vector_and_target() {
        let ctrl = FakeInterruptController::new();
        let info = ctrl.get_msi_info(0x40, 3, &ProcessorSet::Single(2)).unwrap();
        assert_eq!(info.len(), 3);
        assert_eq!(info[0].address, 0xfee0_2000);
        assert_eq!(info[2].data, 0x42);
        assert_eq!(ctrl.requests(), vec![(0x40, 3, ProcessorSet::Single(2))]);
        assert!(ctrl.get_msi_info(0x40, 0, &ProcessorSet::All).is_err());
    }
}

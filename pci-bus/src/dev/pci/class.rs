//! Class tags published alongside a function's device ID.

use hashbrown::HashMap;
use lazy_static::lazy_static;

lazy_static! {
    /// `(class, subclass << 8 | prog-if)` to tag.
    static ref EXACT: HashMap<(u8, u16), &'static str> = {
        let mut m = HashMap::new();
        m.insert((0x00, 0x0100), "VGA");
        m.insert((0x01, 0x0601), "AHCI");
        m.insert((0x06, 0x0100), "ISA");
        m.insert((0x06, 0x0400), "PCIBridge");
        m.insert((0x06, 0x0401), "PCIBridgeSubtractive");
        m.insert((0x07, 0x0000), "Serial16550");
        m.insert((0x07, 0x0001), "Serial16550");
        m.insert((0x07, 0x0002), "Serial16550");
        m.insert((0x08, 0x0500), "SdHostPio");
        m.insert((0x08, 0x0501), "SdHost");
        m.insert((0x0C, 0x0300), "UHCI");
        m.insert((0x0C, 0x0310), "OHCI");
        m.insert((0x0C, 0x0320), "EHCI");
        m
    };

    /// `(class, subclass)` to tag, whatever the programming interface.
    static ref ANY_INTERFACE: HashMap<(u8, u8), &'static str> = {
        let mut m = HashMap::new();
        m.insert((0x01, 0x01), "IDE");
        m.insert((0x04, 0x03), "Audio");
        m
    };
}

/// The class tag for a class-code dword (`class << 24 | subclass << 16 |
/// prog-if << 8 | revision`), if it has one.
pub fn class_id(class_code: u32) -> Option<&'static str> {
    let class = (class_code >> 24) as u8;
    let subclass = (class_code >> 16) as u8;
    let interface = (class_code >> 8) as u8;
    EXACT
        .get(&(class, (subclass as u16) << 8 | interface as u16))
        .or_else(|| ANY_INTERFACE.get(&(class, subclass)))
        .copied()
}

//! Device-tree plumbing shared by bus drivers, and the PCI bus driver itself.

use super::*;

mod arbiter;
mod irp;
mod os;
pub mod pci;
mod resource;

pub use self::{arbiter::*, irp::*, os::*, resource::*};

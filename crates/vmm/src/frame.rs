//! The physical frame allocator contract.
//!
//! Frame bookkeeping lives outside this crate; the walker and the demand-fault
//! handler only ever ask for one frame at a time through this trait.

use crate::PhysicalAddress;

#[cfg(any(test, feature = "software-emulation"))]
use crate::{AddressTranslator, arch};

/// A supplier of physical page frames.
///
/// Implemented by the kernel's physical memory allocator and consumed by the
/// page-table walker (for intermediate tables) and the demand-fault handler
/// (for data pages).
pub trait FrameSource {
    /// Allocates one zero-filled, page-aligned physical frame.
    ///
    /// Returns None when physical memory is exhausted. There is no partial
    /// allocation: a Some result is always a whole usable frame.
    fn alloc_frame(&mut self) -> Option<PhysicalAddress>;
}

/// A frame source backed by the thread's emulated physical memory.
///
/// Frames come from the same bump allocation the emulated translator uses, so
/// they are zero-filled and never recycled.
#[cfg(any(test, feature = "software-emulation"))]
pub struct EmulatedFrameSource;

#[cfg(any(test, feature = "software-emulation"))]
impl FrameSource for EmulatedFrameSource {
    fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
        AddressTranslator::current()
            .allocate(arch::PAGE_SIZE, arch::PAGE_SIZE)
            .map(PhysicalAddress::new)
    }
}

//! Demand-fault resolution.
//!
//! The trap dispatcher routes load/store page faults here after filtering out
//! everything it treats as fatal. Resolution either re-attaches a page whose
//! frame is still recorded (validity revoked but presence kept) or allocates
//! a fresh frame for a first touch. A fault that cannot get a frame is
//! unrecoverable: there is no safe way to resume the faulting instruction.

use crate::{
    VirtualAddress, arch,
    arch::PageFlags,
    context,
    frame::FrameSource,
    page_directory::{PageDirectory, VmError},
};

/// Which kind of access raised the fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// A load from an unmapped or invalid page.
    Load,
    /// A store to an unmapped or invalid page.
    Store,
}

/// How a fault was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultResolution {
    /// The page's recorded frame was re-attached; no allocation happened.
    Reused,
    /// A fresh frame was allocated and mapped.
    Allocated,
}

/// Resolves a demand fault at `address` on `core`.
///
/// Queries the core's active root for the faulting page. A recorded frame is
/// re-mapped in place; an unknown page gets a fresh frame. Either way the
/// permission set follows the fault kind: read-only for loads, read-write for
/// stores. On success the dispatcher resumes the faulting instruction, which
/// re-executes against the now-valid translation.
///
/// Returns [`VmError::OutOfMemory`] when no frame can be had; the caller must
/// treat that as fatal for the faulting core.
///
/// # Panics
/// Panics if `core` has no active address space; faulting before activation
/// is a kernel bug, not a recoverable condition.
pub fn resolve_fault(
    core: usize,
    kind: FaultKind,
    address: VirtualAddress,
    frames: &mut dyn FrameSource,
) -> Result<FaultResolution, VmError> {
    let page = address.align_down(arch::PAGE_SIZE);

    let root = match context::active_root(core) {
        Some(root) => root,
        None => panic!("page fault on core {core} with no active address space"),
    };
    let mut directory = PageDirectory::from_root(root);

    let flags = match kind {
        FaultKind::Load => PageFlags::read_only(),
        FaultKind::Store => PageFlags::read_write(),
    };

    if let Some(frame) = directory.query(page) {
        // The page still records its frame; only validity was lost.
        directory.map(page, frame, flags, frames)?;
        log::trace!("core {core}: {kind:?} fault at {address} reused frame {frame}");
        Ok(FaultResolution::Reused)
    } else {
        let Some(frame) = frames.alloc_frame() else {
            log::error!("out of memory: cannot resolve {kind:?} fault at {address}");
            return Err(VmError::OutOfMemory);
        };
        directory.map(page, frame, flags, frames)?;
        log::trace!("core {core}: {kind:?} fault at {address} allocated frame {frame}");
        Ok(FaultResolution::Allocated)
    }
}

/// x86_64 trap entry: decodes the page-fault error code and CR2.
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub fn handle_page_fault(core: usize, error_code: u64, frames: &mut dyn FrameSource) {
    use x86_64::registers::control::Cr2;

    // Error-code bit 1 is set for stores.
    let kind = if error_code & (1 << 1) != 0 {
        FaultKind::Store
    } else {
        FaultKind::Load
    };
    let address = VirtualAddress::new(Cr2::read_raw() as usize);

    if let Err(error) = resolve_fault(core, kind, address, frames) {
        panic!("unresolvable {kind:?} fault at {address}: {error}");
    }
}

/// x86 trap entry: decodes the page-fault error code and CR2.
#[cfg(all(target_arch = "x86", not(test), not(feature = "software-emulation")))]
pub fn handle_page_fault(core: usize, error_code: u32, frames: &mut dyn FrameSource) {
    use core::arch::asm;

    // Error-code bit 1 is set for stores.
    let kind = if error_code & (1 << 1) != 0 {
        FaultKind::Store
    } else {
        FaultKind::Load
    };

    let faulting: usize;
    unsafe {
        asm!("mov {}, cr2", out(reg) faulting, options(nostack, preserves_flags));
    }
    let address = VirtualAddress::new(faulting);

    if let Err(error) = resolve_fault(core, kind, address, frames) {
        panic!("unresolvable {kind:?} fault at {address}: {error}");
    }
}

/// riscv64 trap entry: decodes scause and stval.
#[cfg(all(target_arch = "riscv64", not(test), not(feature = "software-emulation")))]
pub fn handle_page_fault(core: usize, frames: &mut dyn FrameSource) {
    use riscv::interrupt::Exception;
    use riscv::register::{
        scause::{self, Trap},
        stval,
    };

    let cause = scause::read();
    let kind = match cause.cause() {
        Trap::Exception(e) if e == Exception::LoadPageFault as usize => FaultKind::Load,
        Trap::Exception(e) if e == Exception::StorePageFault as usize => FaultKind::Store,
        other => panic!("handle_page_fault invoked for non-demand trap: {other:?}"),
    };
    let address = VirtualAddress::new(stval::read());

    if let Err(error) = resolve_fault(core, kind, address, frames) {
        panic!("unresolvable {kind:?} fault at {address}: {error}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        AddressTranslator, PhysicalAddress, context::activate, frame::EmulatedFrameSource,
    };

    // The active-root record is process-global; these tests claim core
    // indices 5 and up so they never collide with the context tests.

    fn setup() -> EmulatedFrameSource {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(256 * 1024));
        }
        EmulatedFrameSource
    }

    struct CountingFrameSource {
        inner: EmulatedFrameSource,
        allocated: usize,
    }

    impl CountingFrameSource {
        fn new() -> Self {
            Self {
                inner: EmulatedFrameSource,
                allocated: 0,
            }
        }
    }

    impl FrameSource for CountingFrameSource {
        fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
            self.allocated += 1;
            self.inner.alloc_frame()
        }
    }

    struct FailingFrameSource;

    impl FrameSource for FailingFrameSource {
        fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
            None
        }
    }

    fn activated_directory(core: usize, frames: &mut dyn FrameSource) -> PageDirectory {
        let directory = PageDirectory::new(frames).unwrap();
        unsafe { activate(core, &directory) };
        directory
    }

    #[test]
    fn first_touch_allocates_exactly_one_frame() {
        let mut setup_frames = setup();
        let mut directory = activated_directory(5, &mut setup_frames);

        // Prime the intermediate tables, then remove the translation
        // entirely, so the fault below measures only the data frame.
        let address = VirtualAddress::new(0x7000);
        directory
            .map(
                address,
                PhysicalAddress::new(0x9000),
                PageFlags::read_write(),
                &mut setup_frames,
            )
            .unwrap();
        directory.unmap(address);

        let mut frames = CountingFrameSource::new();
        let resolution = resolve_fault(5, FaultKind::Store, address, &mut frames).unwrap();

        assert_eq!(resolution, FaultResolution::Allocated);
        assert_eq!(frames.allocated, 1);
        assert!(directory.query(address).is_some());
    }

    #[test]
    fn revoked_page_is_reused_without_allocation() {
        let mut frames = setup();
        let mut directory = activated_directory(6, &mut frames);

        let address = VirtualAddress::new(0x7000);
        let frame = PhysicalAddress::new(0x9000);
        directory
            .map(address, frame, PageFlags::read_write(), &mut frames)
            .unwrap();
        directory.revoke_validity(address).unwrap();

        let mut counting = CountingFrameSource::new();
        let load = resolve_fault(6, FaultKind::Load, address, &mut counting).unwrap();
        assert_eq!(load, FaultResolution::Reused);

        directory.revoke_validity(address).unwrap();
        let store = resolve_fault(6, FaultKind::Store, address, &mut counting).unwrap();
        assert_eq!(store, FaultResolution::Reused);

        assert_eq!(counting.allocated, 0);
        assert_eq!(directory.query(address), Some(frame));
    }

    #[test]
    fn fault_kind_decides_the_permission_set() {
        let mut frames = setup();
        let directory = activated_directory(7, &mut frames);

        let load_page = VirtualAddress::new(0x7000);
        resolve_fault(7, FaultKind::Load, load_page, &mut frames).unwrap();

        let store_page = VirtualAddress::new(0x8000);
        resolve_fault(7, FaultKind::Store, store_page, &mut frames).unwrap();

        let load_flags = directory.leaf_flags(load_page).unwrap();
        assert!(!load_flags.is_writable());

        let store_flags = directory.leaf_flags(store_page).unwrap();
        assert!(store_flags.is_writable());
    }

    #[test]
    fn faulting_address_is_resolved_by_page() {
        let mut frames = setup();
        let directory = activated_directory(8, &mut frames);

        // An unaligned faulting address maps its whole page.
        let address = VirtualAddress::new(0x7234);
        resolve_fault(8, FaultKind::Load, address, &mut frames).unwrap();

        assert!(directory.query(VirtualAddress::new(0x7000)).is_some());
    }

    #[test]
    fn exhaustion_is_reported_as_out_of_memory() {
        let mut frames = setup();
        let _directory = activated_directory(9, &mut frames);

        let result = resolve_fault(
            9,
            FaultKind::Store,
            VirtualAddress::new(0x7000),
            &mut FailingFrameSource,
        );

        assert_eq!(result, Err(VmError::OutOfMemory));
    }

    #[test]
    #[should_panic(expected = "no active address space")]
    fn fault_without_active_root_is_a_kernel_bug() {
        let mut frames = setup();
        let _ = resolve_fault(
            MAX_FAULT_TEST_CORE,
            FaultKind::Load,
            VirtualAddress::new(0x7000),
            &mut frames,
        );
    }

    /// A core index no test ever activates.
    const MAX_FAULT_TEST_CORE: usize = crate::MAX_CORES - 1;
}

//! Per-core address-space tracking, activation, and core bring-up.
//!
//! Each core owns exactly one active root at a time, recorded in a slot
//! indexed by core id. Cores get their own kernel root rather than sharing
//! one: duplicating the identity mapping per core costs a few frames but
//! removes all cross-core coordination from the bring-up path.

use crate::{
    HumanSize, PhysicalAddress, arch,
    arch::PageFlags,
    frame::FrameSource,
    guard,
    page_directory::{PageDirectory, VmError},
};

/// Maximum number of hardware cores the active-root record can track.
pub const MAX_CORES: usize = 16;

/// The per-core active-root record, stored inside the global guard.
pub(crate) struct ActiveRoots {
    slots: [Option<PhysicalAddress>; MAX_CORES],
}

impl ActiveRoots {
    pub(crate) const fn new() -> Self {
        Self {
            slots: [None; MAX_CORES],
        }
    }

    pub(crate) fn get(&self, core: usize) -> Option<PhysicalAddress> {
        self.slots[core]
    }

    pub(crate) fn set(&mut self, core: usize, root: PhysicalAddress) {
        self.slots[core] = Some(root);
    }
}

/// Returns the root currently recorded as active for `core`.
///
/// None before the core's first activation.
///
/// # Panics
/// Panics if `core >= MAX_CORES`.
pub fn active_root(core: usize) -> Option<PhysicalAddress> {
    assert!(core < MAX_CORES, "core index out of range");
    guard::lock().get(core)
}

/// Makes `directory` the active address space on `core`.
///
/// Records the root in the per-core slot, loads it into the hardware
/// root-table register, and performs a full translation-cache flush. Runs
/// under the guard: the slot array is shared kernel state even though each
/// core only writes its own slot.
///
/// # Safety
///
/// The directory must map everything the core touches from the next
/// instruction on, the kernel image and the table memory included. Activating
/// an incomplete hierarchy corrupts execution with no diagnostic.
///
/// # Panics
/// Panics if `core >= MAX_CORES`.
pub unsafe fn activate(core: usize, directory: &PageDirectory) {
    assert!(core < MAX_CORES, "core index out of range");

    let root = directory.root_address();
    let mut state = guard::lock();
    state.set(core, root);
    // SAFETY: Caller guarantees the hierarchy is complete.
    unsafe {
        arch::activate_root(root);
    }
    arch::flush_all();
    drop(state);

    log::info!("core {core}: address space {root} active");
}

/// One memory-mapped I/O window the kernel needs reachable.
#[derive(Debug, Clone, Copy)]
pub struct MmioWindow {
    /// Physical base of the window.
    pub base: PhysicalAddress,
    /// Size of the window in bytes.
    pub size: usize,
}

/// What the boot bridge hands over for core bring-up: where the kernel image
/// sits in physical memory, and which device windows it needs.
pub struct BootImage<'a> {
    /// First byte of the kernel image.
    pub image_start: PhysicalAddress,
    /// One past the last byte of the kernel image.
    pub image_end: PhysicalAddress,
    /// Device windows to identity-map alongside the image.
    pub mmio: &'a [MmioWindow],
}

/// Brings virtual memory up on one core.
///
/// Builds a fresh root, identity-maps the kernel image (coarse
/// read/write/execute, no section-level separation) and every MMIO window,
/// activates the new space on `core`, and enables hardware translation. Every
/// core runs this independently at bring-up; there is no shared boot root.
pub fn bring_up_core(
    core: usize,
    image: &BootImage<'_>,
    frames: &mut dyn FrameSource,
) -> Result<PageDirectory, VmError> {
    let mut directory = PageDirectory::new(frames)?;

    let image_bytes = directory.identity_map_range(
        image.image_start,
        image.image_end,
        PageFlags::kernel_rwx(),
        frames,
    )?;

    let mut mmio_bytes = 0;
    for window in image.mmio {
        mmio_bytes += directory.identity_map_range(
            window.base,
            window.base + window.size,
            PageFlags::mmio(),
            frames,
        )?;
    }

    // SAFETY: The directory identity-maps the kernel image, so execution
    // continues through unchanged addresses once translation switches over.
    unsafe {
        activate(core, &directory);
        arch::enable_translation();
    }

    log::info!(
        "core {core}: identity mapped {} kernel image, {} MMIO",
        HumanSize(image_bytes),
        HumanSize(mmio_bytes),
    );

    Ok(directory)
}

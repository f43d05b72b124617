//! Software emulation port for testing and development.
//!
//! A scale model that runs on any host, designed so every walker and mapping
//! algorithm can be exercised without hardware access:
//!
//! - 24-bit addresses (vs 48-bit on x86_64)
//! - 3 levels of page tables (vs 4 on x86_64)
//! - 4-bit indices (16 entries per table, vs 9-bit/512 entries on x86_64)
//! - 12-bit page offset (4 KiB pages, same as the hardware ports)
//!
//! The privileged primitives (root register write, translation-cache flush,
//! translation enable) record into thread-local cells instead of touching
//! hardware, so tests can observe activation and invalidation traffic.

mod entry;
mod flags;
mod table;

pub use entry::PageEntry;
pub use flags::PageFlags;
pub use table::PageTable;

use core::cell::Cell;

use crate::{PhysicalAddress, VirtualAddress};

/// Maximum number of bits in a physical address for the software model.
pub const MAX_PHYSICAL_BITS: usize = 24;

/// Maximum number of bits in a virtual address for the software model.
pub const MAX_VIRTUAL_BITS: usize = 24;

/// Page size in bytes (4 KiB, matching the hardware ports).
pub const PAGE_SIZE: usize = 4096;

/// Number of page table levels (levels 2, 1, 0).
pub const PAGE_TABLE_LEVELS: usize = 3;

/// Returns the page table index for a virtual address at the given level.
///
/// Address layout:
/// - Bits 0-11: page offset
/// - Bits 12-15: level 0 index (terminal)
/// - Bits 16-19: level 1 index
/// - Bits 20-23: level 2 index (root)
#[inline]
pub const fn page_index(address: usize, level: usize) -> usize {
    let bits_for_level = match level {
        0 | 1 | 2 => 4,
        _ => panic!("level out of range for software model (0-2)"),
    };
    let shift = 12 + (level * bits_for_level);
    (address >> shift) & ((1 << bits_for_level) - 1)
}

/// Validates a physical address for the software model.
///
/// Physical addresses must fit within 24 bits.
#[inline]
pub const fn validate_physical(addr: usize) -> bool {
    addr <= 0x00FF_FFFF
}

/// Validates a virtual address for the software model.
///
/// Virtual addresses must be canonical: bits 24 and up must be sign-extended
/// from bit 23.
#[inline]
pub const fn validate_virtual(addr: usize) -> bool {
    canonicalize_virtual(addr) == addr
}

/// Canonicalizes a virtual address by sign-extending bit 23.
#[inline]
pub const fn canonicalize_virtual(addr: usize) -> usize {
    if (addr & 0x0080_0000) != 0 {
        addr | !0x00FF_FFFF
    } else {
        addr & 0x00FF_FFFF
    }
}

std::thread_local! {
    static ROOT_REGISTER: Cell<Option<usize>> = const { Cell::new(None) };
    static ADDRESS_FLUSHES: Cell<usize> = const { Cell::new(0) };
    static FULL_FLUSHES: Cell<usize> = const { Cell::new(0) };
    static TRANSLATION_ENABLED: Cell<bool> = const { Cell::new(false) };
}

/// Writes the emulated root-table register.
///
/// # Safety
///
/// Safe in emulation; the signature matches the hardware ports, where loading
/// an invalid root corrupts all subsequent translation.
pub unsafe fn activate_root(root: PhysicalAddress) {
    ROOT_REGISTER.with(|r| r.set(Some(root.as_usize())));
}

/// Records a single-address translation-cache invalidation.
pub fn flush_address(_virt: VirtualAddress) {
    ADDRESS_FLUSHES.with(|c| c.set(c.get() + 1));
}

/// Records a full translation-cache invalidation.
pub fn flush_all() {
    FULL_FLUSHES.with(|c| c.set(c.get() + 1));
}

/// Marks translation as enabled for the calling thread.
///
/// # Safety
///
/// Safe in emulation; the signature matches the hardware ports, where turning
/// translation on with an unmapped kernel is fatal.
pub unsafe fn enable_translation() {
    TRANSLATION_ENABLED.with(|t| t.set(true));
}

/// Returns the last root written through `activate_root` on this thread.
pub fn root_register() -> Option<usize> {
    ROOT_REGISTER.with(|r| r.get())
}

/// Returns the number of single-address flushes issued on this thread.
pub fn address_flush_count() -> usize {
    ADDRESS_FLUSHES.with(|c| c.get())
}

/// Returns the number of full flushes issued on this thread.
pub fn full_flush_count() -> usize {
    FULL_FLUSHES.with(|c| c.get())
}

/// Returns whether translation has been enabled on this thread.
pub fn translation_enabled() -> bool {
    TRANSLATION_ENABLED.with(|t| t.get())
}

/// Emulated physical memory for software simulation.
///
/// Provides a simulated physical address space for page-table operations
/// without requiring hardware or virtual-memory support from the host OS.
pub struct EmulatedMemory {
    /// The underlying buffer. Backed by u64 so that physical offsets aligned
    /// for page-table entries stay aligned as host pointers.
    memory: Vec<u64>,
    /// Next allocation offset in bytes (simple bump allocator).
    next_alloc: core::sync::atomic::AtomicUsize,
}

impl EmulatedMemory {
    /// Creates a new zero-filled emulated memory region of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            memory: vec![0u64; size.div_ceil(8)],
            next_alloc: core::sync::atomic::AtomicUsize::new(0),
        }
    }

    /// Allocates a block from the emulated space.
    ///
    /// Returns the physical address of the block, or None when there is not
    /// enough space left. Memory starts zeroed and is never recycled, so
    /// every block comes back zero-filled.
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        use core::sync::atomic::Ordering;

        loop {
            let current = self.next_alloc.load(Ordering::Relaxed);

            let aligned = (current + align - 1) & !(align - 1);
            let end = aligned + size;

            if end > self.size() {
                return None;
            }

            if self
                .next_alloc
                .compare_exchange(current, end, Ordering::Relaxed, Ordering::Relaxed)
                .is_ok()
            {
                return Some(aligned);
            }
        }
    }

    /// Translates a physical address to a pointer into the buffer.
    pub fn translate(&self, phys: usize) -> *mut u8 {
        assert!(phys < self.size(), "physical address out of bounds");
        unsafe { (self.memory.as_ptr() as *mut u8).add(phys) }
    }

    /// Translates a pointer into the buffer back to a physical address.
    pub fn ptr_to_phys(&self, ptr: *const u8) -> usize {
        let offset = unsafe { ptr.offset_from(self.memory.as_ptr() as *const u8) };
        assert!(offset >= 0, "pointer not within emulated memory");
        assert!(
            (offset as usize) < self.size(),
            "pointer not within emulated memory"
        );
        offset as usize
    }

    /// Returns the size of the emulated memory region in bytes.
    pub fn size(&self) -> usize {
        self.memory.len() * 8
    }
}

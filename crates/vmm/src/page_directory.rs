//! Architecture-independent page-table management.
//!
//! This module provides the `PageDirectory` type: a handle over one address
//! space's root table, with the table walker and the map/unmap/query
//! operations built on it. The walker is a single algorithm parameterized by
//! the per-architecture constant set (level count, index widths, page size);
//! ports supply only those constants plus the entry format and the privileged
//! primitives.

use core::fmt;

use crate::{
    PhysicalAddress, VirtualAddress,
    address::AddressTranslator,
    arch::{self, PageEntry, PageFlags, PageTable},
    frame::FrameSource,
    guard,
};

/// Errors surfaced by page-table operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No valid translation exists for the requested address.
    NotMapped,
    /// The frame source could not supply a frame.
    OutOfMemory,
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotMapped => write!(f, "address is not mapped"),
            Self::OutOfMemory => write!(f, "out of physical memory"),
        }
    }
}

/// The result of a successful `map` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapOutcome {
    /// A new translation was written.
    Mapped,
    /// The identical translation was already in place; nothing was written.
    AlreadyMapped,
}

/// The result of an `unmap` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapOutcome {
    /// The translation was removed.
    Unmapped,
    /// The terminal entry existed but was already clear.
    AlreadyUnmapped,
    /// No table hierarchy reaches the address at all.
    NotMapped,
}

/// A handle over one address space's page-table hierarchy.
///
/// The hierarchy itself lives in physical frames reached through the address
/// translator; the handle carries only the root's physical address, so it can
/// be rebuilt from the per-core active-root record at any time (the
/// demand-fault handler does exactly that). Intermediate tables are created
/// lazily by the walker and are never reclaimed, even when they become empty.
pub struct PageDirectory {
    /// Physical address of the root page table.
    root: PhysicalAddress,
}

impl PageDirectory {
    /// Creates a new address space with an empty root table.
    ///
    /// The root frame comes from the given frame source; the only failure
    /// mode is [`VmError::OutOfMemory`].
    pub fn new(frames: &mut dyn FrameSource) -> Result<Self, VmError> {
        let root = alloc_table(frames)?;
        Ok(Self { root })
    }

    /// Wraps an existing root table in a handle.
    pub const fn from_root(root: PhysicalAddress) -> Self {
        Self { root }
    }

    /// Returns the physical address of the root table.
    pub const fn root_address(&self) -> PhysicalAddress {
        self.root
    }

    /// Maps a virtual address to a physical address with the given flags.
    ///
    /// Walks the hierarchy, allocating intermediate tables as needed, writes
    /// the terminal entry with the validity bit forced on, and invalidates
    /// the cached translation for the address. Re-establishing a translation
    /// that is already in place byte-for-byte is a warned no-op, so callers
    /// (boot code in particular) can map idempotently.
    ///
    /// # Panics
    /// Panics if `virt` or `phys` is not page-aligned.
    pub fn map(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
        frames: &mut dyn FrameSource,
    ) -> Result<MapOutcome, VmError> {
        let _serialized = guard::lock();
        self.map_locked(virt, phys, flags, frames)
    }

    /// `map` without acquiring the guard; for callers that already hold it.
    pub(crate) fn map_locked(
        &mut self,
        virt: VirtualAddress,
        phys: PhysicalAddress,
        flags: PageFlags,
        frames: &mut dyn FrameSource,
    ) -> Result<MapOutcome, VmError> {
        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );
        assert!(
            phys.is_aligned(arch::PAGE_SIZE),
            "physical address must be page-aligned"
        );

        let entry = self.walk_or_create(virt, frames)?;

        let mut new_flags = flags;
        new_flags.set_present(true);
        let new_entry = PageEntry::new(phys, new_flags);

        if *entry == new_entry {
            log::warn!("remap of {virt} -> {phys}: translation already in place");
            return Ok(MapOutcome::AlreadyMapped);
        }

        *entry = new_entry;
        arch::flush_address(virt);
        Ok(MapOutcome::Mapped)
    }

    /// Removes the translation for a virtual address.
    ///
    /// Both redundant forms are warned and otherwise ignored: an address no
    /// table hierarchy reaches, and a terminal entry that is already clear.
    /// Intermediate tables left empty by the removal are not reclaimed.
    ///
    /// # Panics
    /// Panics if `virt` is not page-aligned.
    pub fn unmap(&mut self, virt: VirtualAddress) -> UnmapOutcome {
        let _serialized = guard::lock();

        assert!(
            virt.is_aligned(arch::PAGE_SIZE),
            "virtual address must be page-aligned"
        );

        let entry = match self.walk(virt) {
            Ok(entry) => entry,
            Err(_) => {
                log::warn!("unmap of {virt}: no table hierarchy reaches the address");
                return UnmapOutcome::NotMapped;
            }
        };

        if entry.is_empty() {
            log::warn!("unmap of {virt}: terminal entry already clear");
            return UnmapOutcome::AlreadyUnmapped;
        }

        entry.clear();
        arch::flush_address(virt);
        UnmapOutcome::Unmapped
    }

    /// Returns the frame backing a virtual address, or None if unmapped.
    ///
    /// Reports the recorded frame even when the entry's validity bit has been
    /// revoked (see [`PageEntry::frame`]); the demand-fault handler depends
    /// on that to distinguish re-attachable pages from never-touched ones.
    /// Never allocates, never mutates.
    pub fn query(&self, virt: VirtualAddress) -> Option<PhysicalAddress> {
        let _serialized = guard::lock();
        self.lookup(virt).ok()?.frame()
    }

    /// Identity-maps `[start, end)` (virtual address = physical address).
    ///
    /// The range is widened outward to page boundaries. Returns the number of
    /// bytes mapped. Used by boot code for the kernel image and MMIO windows.
    pub fn identity_map_range(
        &mut self,
        start: PhysicalAddress,
        end: PhysicalAddress,
        flags: PageFlags,
        frames: &mut dyn FrameSource,
    ) -> Result<usize, VmError> {
        let _serialized = guard::lock();

        let mut frame = start.align_down(arch::PAGE_SIZE).frame_number();
        let last = end.align_up(arch::PAGE_SIZE).frame_number();
        let mut bytes = 0;

        while frame < last {
            let phys = frame.start();
            let virt = VirtualAddress::new(phys.as_usize());
            self.map_locked(virt, phys, flags, frames)?;
            bytes += arch::PAGE_SIZE;
            frame = frame + 1;
        }

        Ok(bytes)
    }

    /// Clears the validity bit of the terminal entry for `virt`, keeping the
    /// recorded frame.
    ///
    /// Models hardware that revokes validity without discarding the frame
    /// number, which is the state the demand-fault reuse path recovers from.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn revoke_validity(&mut self, virt: VirtualAddress) -> Result<(), VmError> {
        let _serialized = guard::lock();
        let entry = self.walk(virt)?;
        let mut flags = entry.flags();
        flags.set_present(false);
        entry.set_flags(flags);
        arch::flush_address(virt);
        Ok(())
    }

    /// Returns the terminal entry's flags for `virt`, if the walk reaches it.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn leaf_flags(&self, virt: VirtualAddress) -> Option<PageFlags> {
        let _serialized = guard::lock();
        self.lookup(virt).ok().map(|entry| entry.flags())
    }

    /// Walks the hierarchy to the terminal entry for a virtual address.
    ///
    /// Fails with [`VmError::NotMapped`] if any intermediate entry is
    /// invalid; no side effects in that case. The returned entry itself may
    /// be in any state.
    fn walk(&mut self, virt: VirtualAddress) -> Result<&mut PageEntry, VmError> {
        let translator = AddressTranslator::current();

        // SAFETY: The root was allocated and zeroed by alloc_table, and every
        // descent below goes through a valid entry this crate wrote.
        let mut table =
            unsafe { &mut *translator.phys_to_ptr::<PageTable>(self.root.as_usize()) };

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let index = virt.page_index(level);
            let entry = table.entry(index);

            let Some(next) = entry.address() else {
                return Err(VmError::NotMapped);
            };
            debug_assert!(!entry.is_leaf(), "huge mappings are not supported");

            // SAFETY: The entry is valid, so it references a zeroed table
            // frame installed by walk_or_create.
            table = unsafe { &mut *translator.phys_to_ptr::<PageTable>(next.as_usize()) };
        }

        Ok(table.entry_mut(virt.page_index(0)))
    }

    /// Walks the hierarchy, materializing missing intermediate tables.
    ///
    /// A parent entry is only written after its child frame has been
    /// allocated and zeroed, so a failed allocation can never leave a valid
    /// entry referencing an unallocated frame. Does not make the terminal
    /// entry valid; that is `map`'s job.
    fn walk_or_create(
        &mut self,
        virt: VirtualAddress,
        frames: &mut dyn FrameSource,
    ) -> Result<&mut PageEntry, VmError> {
        let translator = AddressTranslator::current();

        // SAFETY: Same invariants as walk.
        let mut table =
            unsafe { &mut *translator.phys_to_ptr::<PageTable>(self.root.as_usize()) };

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let index = virt.page_index(level);

            if table.entry(index).address().is_none() {
                let frame = alloc_table(frames)?;
                *table.entry_mut(index) = PageEntry::new(frame, PageFlags::table());
            }

            let entry = table.entry(index);
            debug_assert!(!entry.is_leaf(), "huge mappings are not supported");
            let next = entry.address().expect("entry was just checked or created");

            // SAFETY: The entry is valid, so it references a zeroed table
            // frame installed above or by an earlier walk.
            table = unsafe { &mut *translator.phys_to_ptr::<PageTable>(next.as_usize()) };
        }

        Ok(table.entry_mut(virt.page_index(0)))
    }

    /// Read-only walk to the terminal entry, returning a copy of it.
    fn lookup(&self, virt: VirtualAddress) -> Result<PageEntry, VmError> {
        let translator = AddressTranslator::current();

        // SAFETY: Same invariants as walk; only shared references are formed.
        let mut table = unsafe { &*translator.phys_to_ptr::<PageTable>(self.root.as_usize()) };

        for level in (1..arch::PAGE_TABLE_LEVELS).rev() {
            let entry = table.entry(virt.page_index(level));

            let Some(next) = entry.address() else {
                return Err(VmError::NotMapped);
            };

            // SAFETY: The entry is valid, so it references a table frame.
            table = unsafe { &*translator.phys_to_ptr::<PageTable>(next.as_usize()) };
        }

        Ok(table.entry(virt.page_index(0)))
    }
}

/// Allocates one frame and installs an all-invalid page table in it.
///
/// The frame source contract says frames arrive zeroed; the table is cleared
/// explicitly anyway, since a table with a stray valid entry corrupts every
/// walk that crosses it.
fn alloc_table(frames: &mut dyn FrameSource) -> Result<PhysicalAddress, VmError> {
    let Some(frame) = frames.alloc_frame() else {
        log::error!("out of memory: failed to allocate a page-table frame");
        return Err(VmError::OutOfMemory);
    };
    debug_assert!(
        frame.is_aligned(arch::PAGE_SIZE),
        "frame source returned an unaligned frame"
    );

    let translator = AddressTranslator::current();
    // SAFETY: The frame was just handed out by the frame source, so nothing
    // else references it yet.
    unsafe {
        core::ptr::write_bytes(
            translator.phys_to_ptr::<u8>(frame.as_usize()),
            0,
            core::mem::size_of::<PageTable>(),
        );
    }

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::EmulatedFrameSource;

    fn setup() -> EmulatedFrameSource {
        if AddressTranslator::try_current().is_none() {
            AddressTranslator::set_current(AddressTranslator::emulated(256 * 1024));
        }
        EmulatedFrameSource
    }

    /// Counts allocations on the way through to the emulated source.
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

    /// A frame source that is permanently exhausted.
    struct FailingFrameSource;

    impl FrameSource for FailingFrameSource {
        fn alloc_frame(&mut self) -> Option<PhysicalAddress> {
            None
        }
    }

    fn root_table<'a>(dir: &PageDirectory) -> &'a PageTable {
        let translator = AddressTranslator::current();
        unsafe { &*translator.phys_to_ptr::<PageTable>(dir.root_address().as_usize()) }
    }

    #[test]
    fn map_then_query_round_trip() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        let phys = PhysicalAddress::new(0x2000);

        let outcome = dir
            .map(virt, phys, PageFlags::read_write(), &mut frames)
            .unwrap();

        assert_eq!(outcome, MapOutcome::Mapped);
        assert_eq!(dir.query(virt), Some(phys));
    }

    #[test]
    fn query_unmapped_address() {
        let mut frames = setup();
        let dir = PageDirectory::new(&mut frames).unwrap();

        assert_eq!(dir.query(VirtualAddress::new(0x1000)), None);
    }

    #[test]
    fn unmap_clears_mapping() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        dir.map(
            virt,
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();

        assert_eq!(dir.unmap(virt), UnmapOutcome::Unmapped);
        assert_eq!(dir.query(virt), None);
    }

    #[test]
    fn unmap_without_tables_is_recoverable() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        assert_eq!(
            dir.unmap(VirtualAddress::new(0x1000)),
            UnmapOutcome::NotMapped
        );
    }

    #[test]
    fn redundant_unmap_is_recoverable() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        dir.map(
            virt,
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();
        dir.unmap(virt);

        // The intermediate tables survive, so the walk reaches a cleared
        // terminal entry this time.
        assert_eq!(dir.unmap(virt), UnmapOutcome::AlreadyUnmapped);
    }

    #[test]
    fn idempotent_remap_warns_without_mutation() {
        let mut frames = CountingFrameSource::new();
        setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        let phys = PhysicalAddress::new(0x3000);

        dir.map(virt, phys, PageFlags::read_only(), &mut frames)
            .unwrap();
        let allocated_after_first = frames.allocated;

        let outcome = dir
            .map(virt, phys, PageFlags::read_only(), &mut frames)
            .unwrap();

        assert_eq!(outcome, MapOutcome::AlreadyMapped);
        assert_eq!(dir.query(virt), Some(phys));
        assert_eq!(frames.allocated, allocated_after_first);
    }

    #[test]
    fn remap_with_different_frame_overwrites() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        dir.map(
            virt,
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();

        let outcome = dir
            .map(
                virt,
                PhysicalAddress::new(0x5000),
                PageFlags::read_write(),
                &mut frames,
            )
            .unwrap();

        assert_eq!(outcome, MapOutcome::Mapped);
        assert_eq!(dir.query(virt), Some(PhysicalAddress::new(0x5000)));
    }

    #[test]
    fn intermediate_tables_allocate_once() {
        let mut frames = CountingFrameSource::new();
        setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();
        assert_eq!(frames.allocated, 1); // the root

        // All in the same 64 KiB terminal-table window: same indices at every
        // level above the terminal one.
        dir.map(
            VirtualAddress::new(0x1000),
            PhysicalAddress::new(0x1000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();
        assert_eq!(frames.allocated, 3); // one table per missing level

        for page in 2..=4usize {
            dir.map(
                VirtualAddress::new(page * arch::PAGE_SIZE),
                PhysicalAddress::new(page * arch::PAGE_SIZE),
                PageFlags::read_write(),
                &mut frames,
            )
            .unwrap();
        }
        assert_eq!(frames.allocated, 3); // no further table allocations
    }

    #[test]
    fn out_of_memory_leaves_no_partial_hierarchy() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let result = dir.map(
            VirtualAddress::new(0x1000),
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut FailingFrameSource,
        );

        assert_eq!(result, Err(VmError::OutOfMemory));
        assert_eq!(dir.query(VirtualAddress::new(0x1000)), None);
        assert!(root_table(&dir).is_vacant());
    }

    #[test]
    fn map_and_unmap_flush_the_address() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();
        let virt = VirtualAddress::new(0x1000);

        let flushes_before = arch::address_flush_count();
        dir.map(
            virt,
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();
        assert_eq!(arch::address_flush_count(), flushes_before + 1);

        dir.unmap(virt);
        assert_eq!(arch::address_flush_count(), flushes_before + 2);
    }

    #[test]
    fn revoked_entry_still_reports_its_frame() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);
        let phys = PhysicalAddress::new(0x2000);
        dir.map(virt, phys, PageFlags::read_write(), &mut frames)
            .unwrap();

        dir.revoke_validity(virt).unwrap();
        assert_eq!(dir.query(virt), Some(phys));
    }

    #[test]
    fn concrete_mapping_scenario() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let virt = VirtualAddress::new(0x1000);

        dir.map(
            virt,
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        )
        .unwrap();
        assert_eq!(dir.query(virt), Some(PhysicalAddress::new(0x2000)));

        dir.unmap(virt);
        assert_eq!(dir.query(virt), None);

        dir.map(
            virt,
            PhysicalAddress::new(0x3000),
            PageFlags::read_only(),
            &mut frames,
        )
        .unwrap();
        let second = dir
            .map(
                virt,
                PhysicalAddress::new(0x3000),
                PageFlags::read_only(),
                &mut frames,
            )
            .unwrap();

        assert_eq!(second, MapOutcome::AlreadyMapped);
        assert_eq!(dir.query(virt), Some(PhysicalAddress::new(0x3000)));
    }

    #[test]
    fn identity_map_range_covers_whole_span() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let start = PhysicalAddress::new(0x4000);
        let end = PhysicalAddress::new(0x4000 + 3 * arch::PAGE_SIZE);
        let bytes = dir
            .identity_map_range(start, end, PageFlags::kernel_rwx(), &mut frames)
            .unwrap();

        assert_eq!(bytes, 3 * arch::PAGE_SIZE);
        for page in 0..3 {
            let addr = 0x4000 + page * arch::PAGE_SIZE;
            assert_eq!(
                dir.query(VirtualAddress::new(addr)),
                Some(PhysicalAddress::new(addr))
            );
        }
    }

    #[test]
    #[should_panic(expected = "virtual address must be page-aligned")]
    fn map_rejects_unaligned_virtual_address() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let _ = dir.map(
            VirtualAddress::new(0x1004),
            PhysicalAddress::new(0x2000),
            PageFlags::read_write(),
            &mut frames,
        );
    }

    #[test]
    #[should_panic(expected = "physical address must be page-aligned")]
    fn map_rejects_unaligned_physical_address() {
        let mut frames = setup();
        let mut dir = PageDirectory::new(&mut frames).unwrap();

        let _ = dir.map(
            VirtualAddress::new(0x1000),
            PhysicalAddress::new(0x2004),
            PageFlags::read_write(),
            &mut frames,
        );
    }
}

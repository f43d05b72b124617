//! Page table entry for x86_64.

use crate::PhysicalAddress;

use super::flags::PageFlags;

/// A single page table entry for x86_64.
///
/// A 64-bit value holding a physical address in bits 12-51 and flags in the
/// remaining bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct PageEntry(usize);

impl PageEntry {
    /// Physical address mask (bits 12-51, assuming 52-bit physical addresses).
    const ADDRESS_MASK: usize = 0x000F_FFFF_FFFF_F000;

    /// Flag bits mask (bits 0-11 and 52-63).
    const FLAGS_MASK: usize = !Self::ADDRESS_MASK;

    /// Huge-page bit (2 MiB / 1 GiB mappings). Never set by this crate; huge
    /// pages are unsupported.
    const HUGE_PAGE_BIT: usize = 1 << 7;

    /// Creates a new page table entry.
    ///
    /// The physical address must be page-aligned.
    pub fn new(address: PhysicalAddress, flags: PageFlags) -> Self {
        debug_assert!(
            address.as_usize() & 0xFFF == 0,
            "physical address must be page-aligned"
        );

        let addr_bits = address.as_usize() & Self::ADDRESS_MASK;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        Self(addr_bits | flag_bits)
    }

    /// Returns the physical address stored in this entry, or None if the
    /// entry is not present.
    ///
    /// This is the accessor the walker descends through: an entry without the
    /// validity bit must never be dereferenced as a table pointer.
    pub fn address(self) -> Option<PhysicalAddress> {
        if self.is_present() {
            Some(PhysicalAddress::new(self.0 & Self::ADDRESS_MASK))
        } else {
            None
        }
    }

    /// Returns the frame recorded in this entry, present or not.
    ///
    /// Unlike [`PageEntry::address`], this also reports a frame whose
    /// validity bit has been revoked. The demand-fault handler uses it to
    /// re-attach such pages without allocating a fresh frame.
    pub fn frame(self) -> Option<PhysicalAddress> {
        let addr_bits = self.0 & Self::ADDRESS_MASK;
        if addr_bits != 0 {
            Some(PhysicalAddress::new(addr_bits))
        } else {
            None
        }
    }

    /// Returns the flags for this entry.
    pub fn flags(self) -> PageFlags {
        PageFlags::from_raw(self.0 & Self::FLAGS_MASK)
    }

    /// Sets the flags for this entry, preserving the address.
    pub fn set_flags(&mut self, flags: PageFlags) {
        let addr_bits = self.0 & Self::ADDRESS_MASK;
        let flag_bits = flags.to_raw() & Self::FLAGS_MASK;
        self.0 = addr_bits | flag_bits;
    }

    /// Returns whether this entry is present (valid).
    pub fn is_present(self) -> bool {
        self.flags().is_present()
    }

    /// Returns whether this entry maps a huge page directly at a non-terminal
    /// level. Always false for entries written by this crate.
    pub fn is_leaf(self) -> bool {
        self.is_present() && (self.0 & Self::HUGE_PAGE_BIT) != 0
    }

    /// Returns whether this entry is all-zero (records nothing).
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Clears this entry to the all-zero invalid state.
    pub fn clear(&mut self) {
        self.0 = 0;
    }

    /// Returns the raw value of this entry.
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl Default for PageEntry {
    fn default() -> Self {
        Self(0)
    }
}

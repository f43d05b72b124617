//! Page table entry flags for riscv64 Sv39.

/// Page table entry flags for Sv39.
///
/// The RISC-V permission model is explicit: a valid entry with none of R/W/X
/// set is a pointer to the next-level table, and a valid entry with any of
/// them set is a leaf. The accessed/dirty bits are pre-set on leaf flags so
/// implementations that trap instead of updating them in hardware never
/// fault on first touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Valid bit.
    const VALID: usize = 1 << 0;

    /// Readable bit.
    const READ: usize = 1 << 1;

    /// Writable bit.
    const WRITE: usize = 1 << 2;

    /// Executable bit.
    const EXECUTE: usize = 1 << 3;

    /// User-accessible bit.
    const USER: usize = 1 << 4;

    /// Global bit (translation valid in all address spaces).
    const GLOBAL: usize = 1 << 5;

    /// Accessed bit.
    const ACCESSED: usize = 1 << 6;

    /// Dirty bit.
    const DIRTY: usize = 1 << 7;

    /// Creates empty page flags (entry invalid).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Flags for an entry pointing at a next-level table (valid, R=W=X=0).
    pub const fn table() -> Self {
        Self(Self::VALID)
    }

    /// Flags for a read-only data page.
    pub const fn read_only() -> Self {
        Self(Self::READ | Self::ACCESSED)
    }

    /// Flags for a writable data page.
    pub const fn read_write() -> Self {
        Self(Self::READ | Self::WRITE | Self::ACCESSED | Self::DIRTY)
    }

    /// Flags for the coarse kernel-image identity mapping.
    pub const fn kernel_rwx() -> Self {
        Self(Self::READ | Self::WRITE | Self::EXECUTE | Self::GLOBAL | Self::ACCESSED | Self::DIRTY)
    }

    /// Flags for a device (MMIO) window.
    ///
    /// Sv39 has no cacheability bits in the base PTE format (that is the
    /// Svpbmt extension); device memory relies on the platform's PMA regions.
    pub const fn mmio() -> Self {
        Self(Self::READ | Self::WRITE | Self::ACCESSED | Self::DIRTY)
    }

    /// Creates page flags from a raw value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw value of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Returns whether the valid bit is set.
    pub fn is_present(self) -> bool {
        (self.0 & Self::VALID) != 0
    }

    /// Sets or clears the valid bit.
    pub fn set_present(&mut self, present: bool) {
        if present {
            self.0 |= Self::VALID;
        } else {
            self.0 &= !Self::VALID;
        }
    }

    /// Returns whether the readable bit is set.
    pub fn is_readable(self) -> bool {
        (self.0 & Self::READ) != 0
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITE) != 0
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        if writable {
            self.0 |= Self::WRITE;
        } else {
            self.0 &= !Self::WRITE;
        }
    }

    /// Returns whether the executable bit is set.
    pub fn is_executable(self) -> bool {
        (self.0 & Self::EXECUTE) != 0
    }

    /// Returns whether the user-accessible bit is set.
    pub fn is_user(self) -> bool {
        (self.0 & Self::USER) != 0
    }

    /// Sets or clears the user-accessible bit.
    pub fn set_user(&mut self, user: bool) {
        if user {
            self.0 |= Self::USER;
        } else {
            self.0 &= !Self::USER;
        }
    }

    /// Returns whether the global bit is set.
    pub fn is_global(self) -> bool {
        (self.0 & Self::GLOBAL) != 0
    }

    /// Returns whether any of R/W/X is set (leaf flags, not a table pointer).
    pub fn is_leaf_permissions(self) -> bool {
        (self.0 & (Self::READ | Self::WRITE | Self::EXECUTE)) != 0
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

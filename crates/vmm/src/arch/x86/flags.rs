//! Page table entry flags for x86 (32-bit).

/// Page table entry flags for x86.
///
/// The classic 32-bit format: no no-execute bit, so every present page is
/// executable and the read-only/read-write distinction carries the whole
/// permission story.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageFlags(usize);

impl PageFlags {
    /// Present bit.
    const PRESENT: usize = 1 << 0;

    /// Writable bit.
    const WRITABLE: usize = 1 << 1;

    /// User-accessible bit.
    const USER: usize = 1 << 2;

    /// Cache-disable bit (PCD).
    const NO_CACHE: usize = 1 << 4;

    /// Global bit (requires CR4.PGE).
    const GLOBAL: usize = 1 << 8;

    /// Creates empty page flags (page not present).
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Flags for an entry pointing at a next-level table.
    ///
    /// Intermediate entries are writable; the effective permission is decided
    /// at the terminal level.
    pub const fn table() -> Self {
        Self(Self::PRESENT | Self::WRITABLE)
    }

    /// Flags for a read-only data page.
    pub const fn read_only() -> Self {
        Self(0)
    }

    /// Flags for a writable data page.
    pub const fn read_write() -> Self {
        Self(Self::WRITABLE)
    }

    /// Flags for the coarse kernel-image identity mapping.
    pub const fn kernel_rwx() -> Self {
        Self(Self::WRITABLE | Self::GLOBAL)
    }

    /// Flags for a device (MMIO) window.
    pub const fn mmio() -> Self {
        Self(Self::WRITABLE | Self::NO_CACHE)
    }

    /// Creates page flags from a raw value.
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }

    /// Returns the raw value of these flags.
    pub const fn to_raw(self) -> usize {
        self.0
    }

    /// Returns whether the present bit is set.
    pub fn is_present(self) -> bool {
        (self.0 & Self::PRESENT) != 0
    }

    /// Sets or clears the present bit.
    pub fn set_present(&mut self, present: bool) {
        if present {
            self.0 |= Self::PRESENT;
        } else {
            self.0 &= !Self::PRESENT;
        }
    }

    /// Returns whether the writable bit is set.
    pub fn is_writable(self) -> bool {
        (self.0 & Self::WRITABLE) != 0
    }

    /// Sets or clears the writable bit.
    pub fn set_writable(&mut self, writable: bool) {
        if writable {
            self.0 |= Self::WRITABLE;
        } else {
            self.0 &= !Self::WRITABLE;
        }
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

    /// Returns whether the cache-disable bit is set.
    pub fn is_no_cache(self) -> bool {
        (self.0 & Self::NO_CACHE) != 0
    }
}

impl Default for PageFlags {
    fn default() -> Self {
        Self::empty()
    }
}

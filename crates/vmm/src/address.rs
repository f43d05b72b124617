//! Physical and virtual address types, and the translator between them.
//!
//! Page tables live in physical frames, so every walk has to turn the frame
//! number found in an entry into a pointer the kernel can dereference. The
//! [`AddressTranslator`] owns that conversion; the two newtypes make sure a
//! physical address is never used where a virtual one is meant and that
//! out-of-range values are rejected the moment they are constructed.

use core::fmt;
use core::ops::{Add, Sub};

use crate::{FrameNumber, PageNumber, arch};

#[cfg(any(test, feature = "software-emulation"))]
use crate::arch::EmulatedMemory;

/// A physical memory address.
///
/// Construction rejects values wider than the architecture's physical address
/// width, so downstream code can rely on every instance being representable.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysicalAddress(usize);

impl PhysicalAddress {
    /// Creates a new physical address.
    ///
    /// # Panics
    ///
    /// Panics if the value exceeds the architecture's physical address width.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(
            arch::validate_physical(addr),
            "physical address exceeds maximum width"
        );
        Self(addr)
    }

    /// Recovers the physical address behind a direct-mapped virtual address.
    ///
    /// # Panics
    ///
    /// Panics if no translator has been installed.
    #[inline]
    pub fn from_direct_mapped(virt: VirtualAddress) -> Self {
        Self::new(AddressTranslator::current().virt_to_phys(virt.as_usize()))
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Whether this address is a multiple of `align` (a power of two).
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 % align == 0
    }

    /// The nearest multiple of `align` at or below this address.
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    /// The nearest multiple of `align` at or above this address.
    #[inline]
    pub const fn align_up(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// The frame containing this address.
    #[inline]
    pub fn frame_number(self) -> FrameNumber {
        FrameNumber::from(self)
    }
}

/// A virtual memory address.
///
/// Construction rejects non-canonical values, so page-table index extraction
/// never sees bits outside the architecture's translated range.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    /// Creates a new virtual address.
    ///
    /// # Panics
    ///
    /// Panics if the value is not canonical for the architecture.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        assert!(arch::validate_virtual(addr), "address is not canonical");
        Self(addr)
    }

    /// The direct-mapped virtual address of a physical address.
    ///
    /// # Panics
    ///
    /// Panics if no translator has been installed.
    #[inline]
    pub fn direct_mapped(phys: PhysicalAddress) -> Self {
        let translator = AddressTranslator::current();
        let virt = translator.phys_to_virt(phys.as_usize());

        // Emulated translation yields host pointers, which are not canonical
        // for the modeled architecture; skip the check there.
        #[cfg(any(test, feature = "software-emulation"))]
        if matches!(translator, AddressTranslator::Emulated(_)) {
            return Self(virt);
        }

        Self::new(virt)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Reinterprets the address as a pointer.
    #[inline]
    pub const fn as_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// Reinterprets the address as a mutable pointer.
    #[inline]
    pub const fn as_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }

    /// Whether this address is a multiple of `align` (a power of two).
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 % align == 0
    }

    /// The nearest multiple of `align` at or below this address.
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    /// The byte offset of this address within its page.
    #[inline]
    pub const fn page_offset(self) -> usize {
        self.0 % arch::PAGE_SIZE
    }

    /// The page-table index governing this address at `level`.
    ///
    /// Levels count from 0 (the terminal level, closest to the data page)
    /// upward; each level's field width is an architecture constant.
    #[inline]
    pub const fn page_index(self, level: usize) -> usize {
        arch::page_index(self.0, level)
    }

    /// The page containing this address.
    #[inline]
    pub fn page_number(self) -> PageNumber {
        PageNumber::from(self)
    }
}

macro_rules! address_fmt_and_ops {
    ($name:ident) => {
        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, offset: usize) -> Self {
                Self::new(self.0 + offset)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, offset: usize) -> Self {
                Self::new(self.0 - offset)
            }
        }

        impl Sub for $name {
            type Output = usize;

            #[inline]
            fn sub(self, other: Self) -> usize {
                self.0 - other.0
            }
        }
    };
}

address_fmt_and_ops!(PhysicalAddress);
address_fmt_and_ops!(VirtualAddress);

/// Converts between physical addresses and pointers the kernel can follow.
///
/// Two modes exist:
/// - `Hardware`: the kernel's direct map of physical memory at a fixed
///   virtual offset.
/// - `Emulated`: a simulated physical memory buffer, for tests and
///   development on a host OS.
pub enum AddressTranslator {
    /// Translation through the direct-map offset.
    Hardware { direct_map_offset: usize },
    /// Translation into a simulated memory region.
    #[cfg(any(test, feature = "software-emulation"))]
    Emulated(EmulatedMemory),
}

/// The installed translator. Set once at kernel initialization with the
/// Hardware variant; thread-local in emulated builds so each test thread owns
/// an isolated physical memory image.
#[cfg(not(any(test, feature = "software-emulation")))]
static TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();

#[cfg(any(test, feature = "software-emulation"))]
std::thread_local! {
    static TRANSLATOR: spin::Once<AddressTranslator> = spin::Once::new();
}

impl AddressTranslator {
    /// A hardware translator with the given direct-map offset.
    pub const fn hardware(direct_map_offset: usize) -> Self {
        Self::Hardware { direct_map_offset }
    }

    /// An emulated translator backed by `size` bytes of simulated memory.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn emulated(size: usize) -> Self {
        Self::Emulated(EmulatedMemory::new(size))
    }

    /// Installs the global translator. Must happen exactly once, before the
    /// first page-table operation.
    ///
    /// # Panics
    ///
    /// Panics if a translator is already installed.
    pub fn set_current(translator: AddressTranslator) {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            if TRANSLATOR.get().is_some() {
                panic!("an address translator is already installed");
            }
            TRANSLATOR.call_once(|| translator);
        }

        #[cfg(any(test, feature = "software-emulation"))]
        TRANSLATOR.with(|slot| {
            if slot.get().is_some() {
                panic!("an address translator is already installed");
            }
            slot.call_once(|| translator);
        });
    }

    /// The installed translator.
    ///
    /// # Panics
    ///
    /// Panics if none has been installed yet.
    pub fn current() -> &'static AddressTranslator {
        #[cfg(not(any(test, feature = "software-emulation")))]
        {
            TRANSLATOR
                .get()
                .expect("no address translator installed; AddressTranslator::set_current must run first")
        }

        #[cfg(any(test, feature = "software-emulation"))]
        TRANSLATOR.with(|slot| {
            let translator = slot
                .get()
                .expect("no address translator installed; AddressTranslator::set_current must run first");
            // SAFETY: The reference is leaked to 'static. The thread-local
            // outlives every caller on its thread, and spin::Once never
            // replaces a value once set.
            unsafe { &*(translator as *const AddressTranslator) }
        })
    }

    /// The installed translator, or None before installation.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn try_current() -> Option<&'static AddressTranslator> {
        TRANSLATOR.with(|slot| {
            slot.get().map(|translator| {
                // SAFETY: Same reasoning as in current().
                unsafe { &*(translator as *const AddressTranslator) }
            })
        })
    }

    /// Maps a physical address to a dereferenceable virtual address.
    pub fn phys_to_virt(&self, phys: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => phys.wrapping_add(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => memory.translate(phys) as usize,
        }
    }

    /// Maps a dereferenceable virtual address back to its physical address.
    pub fn virt_to_phys(&self, virt: usize) -> usize {
        match self {
            Self::Hardware { direct_map_offset } => virt.wrapping_sub(*direct_map_offset),
            #[cfg(any(test, feature = "software-emulation"))]
            Self::Emulated(memory) => memory.ptr_to_phys(virt as *const u8),
        }
    }

    /// Maps a physical address to a typed pointer.
    pub fn phys_to_ptr<T>(&self, phys: usize) -> *mut T {
        self.phys_to_virt(phys) as *mut T
    }

    /// Carves a block out of the emulated memory (emulated mode only).
    ///
    /// Returns the physical address of the block, or None once the simulated
    /// memory is exhausted.
    #[cfg(any(test, feature = "software-emulation"))]
    pub fn allocate(&self, size: usize, align: usize) -> Option<usize> {
        match self {
            Self::Hardware { .. } => panic!("cannot allocate through a hardware translator"),
            Self::Emulated(memory) => memory.allocate(size, align),
        }
    }
}

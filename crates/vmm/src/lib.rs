#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Vesper Virtual Memory Manager (VMM)
//!
//! The Vesper Virtual Memory Manager (VMM) is the address-translation layer of
//! the Vesper operating system kernel. It provides:
//!
//! - Hierarchical page-table construction and mutation (map / unmap / query).
//! - Per-core address-space activation and translation-cache invalidation.
//! - Demand-fault resolution for load and store faults.
//! - Support for multiple architectures: x86 (2-level), x86_64 (4-level),
//!   riscv64 Sv39 (3-level).
//! - Software emulation for testing in non-kernel environments.
//!
//! Physical frames are supplied by an external frame allocator through the
//! [`FrameSource`] trait; this crate never owns frame bookkeeping.

mod address;
mod arch;
mod context;
mod fault;
mod frame;
mod guard;
mod human_size;
mod numbers;
mod page_directory;

pub use address::{AddressTranslator, PhysicalAddress, VirtualAddress};
pub use context::{BootImage, MAX_CORES, MmioWindow, active_root, activate, bring_up_core};
pub use fault::{FaultKind, FaultResolution, resolve_fault};
#[cfg(all(
    any(target_arch = "x86", target_arch = "x86_64", target_arch = "riscv64"),
    not(test),
    not(feature = "software-emulation")
))]
pub use fault::handle_page_fault;
pub use frame::FrameSource;
pub use human_size::HumanSize;
pub use numbers::{FrameNumber, PageNumber};
pub use page_directory::{MapOutcome, PageDirectory, UnmapOutcome, VmError};

pub use arch::{PAGE_SIZE, PAGE_TABLE_LEVELS, PageEntry, PageFlags, PageTable};

#[cfg(any(test, feature = "software-emulation"))]
pub use frame::EmulatedFrameSource;

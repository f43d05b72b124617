//! Architecture-specific page-table formats and privileged primitives.
//!
//! Each port is a small constant set (level count, index widths, address
//! widths) plus the entry/flag/table types and the four privileged
//! primitives: `activate_root`, `flush_address`, `flush_all`,
//! `enable_translation`. The walker and every operation above it are written
//! once against this surface.

// Hardware ports are compiled whenever the target matches, but only exported
// outside of tests and software emulation.
// NOTE: We DO include the modules even during tests so that rust-analyzer can see them.
#[cfg(target_arch = "x86")]
mod x86;
#[cfg(all(target_arch = "x86", not(test), not(feature = "software-emulation")))]
pub use x86::*;

#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use x86_64::*;

#[cfg(target_arch = "riscv64")]
mod riscv64;
#[cfg(all(target_arch = "riscv64", not(test), not(feature = "software-emulation")))]
pub use riscv64::*;

// The software scale model replaces the hardware port when:
// - running tests, OR
// - the software-emulation feature is explicitly enabled.
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

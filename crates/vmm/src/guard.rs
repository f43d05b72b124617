//! The global mutual-exclusion guard over page-table memory.
//!
//! Every operation that reads or writes shared table memory or the per-core
//! active-root record serializes on this one lock: walks, map/unmap/query,
//! activation. Coarse, but correct for a small number of cores with
//! infrequent mapping churn; a per-root lock plus an unguarded query fast
//! path is the known upgrade if contention ever shows up in profiles.
//!
//! The lock exists for the lifetime of the kernel; there is no teardown.

use crate::context::ActiveRoots;

static VM_STATE: spin::Mutex<ActiveRoots> = spin::Mutex::new(ActiveRoots::new());

/// Acquires the guard, blocking (spinning) until any other core releases it.
///
/// The returned guard doubles as access to the per-core active-root record;
/// callers that only need serialization bind it to `_serialized`.
pub(crate) fn lock() -> spin::MutexGuard<'static, ActiveRoots> {
    VM_STATE.lock()
}

//! Synchronization primitives.
//!
//! Provides [`SpinLock`], the lock used for page-table levels, and the
//! [`atomic`] re-exports that switch to shuttle's instrumented atomics under
//! `cfg(shuttle)` so lock-protected structures can be model-checked.

mod shuttle_compat;
mod spinlock;

pub use spinlock::{SpinLock, SpinLockGuard};

/// Atomic types used by lock-protected shared structures.
///
/// Under `cfg(shuttle)` these are shuttle's scheduler-aware atomics;
/// otherwise they are `core::sync::atomic`.
pub mod atomic {
    pub use super::shuttle_compat::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
}

pub use shuttle_compat::spin_hint;

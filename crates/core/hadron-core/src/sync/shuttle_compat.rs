//! Shuttle compatibility shim.
//!
//! When compiled with `cfg(shuttle)`, re-exports shuttle's atomics and
//! yields to the shuttle scheduler inside spin loops. Otherwise, re-exports
//! `core::sync::atomic` and uses the CPU spin-loop hint.
//!
//! This allows page-table locks and entries to be exercised under shuttle's
//! randomized scheduler without code changes.

// ---------------------------------------------------------------------------
// Shuttle mode
// ---------------------------------------------------------------------------

#[cfg(shuttle)]
pub use shuttle::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Backs off inside a spin loop.
#[cfg(shuttle)]
#[inline]
pub fn spin_hint() {
    shuttle::thread::yield_now();
}

// ---------------------------------------------------------------------------
// Normal mode
// ---------------------------------------------------------------------------

#[cfg(not(shuttle))]
pub use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// Backs off inside a spin loop.
#[cfg(not(shuttle))]
#[inline]
pub fn spin_hint() {
    core::hint::spin_loop();
}

//! Core types and synchronization primitives for the Hadron mm crates.
//!
//! This crate contains the host-testable pieces the memory-management
//! subsystems build on: typed virtual/physical addresses and frame numbers,
//! the [`SpinLock`](sync::SpinLock) used for page-table locks, and the
//! leveled `klog!` logging macros.
//!
//! By living outside the kernel crates these types can be tested with
//! `cargo test` (and shuttle, via `--cfg shuttle`) on the host without a
//! kernel target.

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod addr;
pub mod log;
pub mod sync;

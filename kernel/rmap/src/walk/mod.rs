//! Reverse-mapping walk: locate every entry in a region that maps a frame.
//!
//! A walk is driven through a [`WalkCursor`]. Each [`step`] returns either
//! [`MatchResult::Matched`] with the page-table lock protecting the matched
//! slot held, or [`MatchResult::Exhausted`] with nothing held. A caller acts
//! on the match (unmap, clear access bits, install a migration entry) while
//! the lock is held and then steps again:
//!
//! ```ignore
//! let mut walk = WalkCursor::begin(target, region, addr, WalkFlags::empty(), caps);
//! while let MatchResult::Matched(m) = walk.step() {
//!     // m.slot is stable until the next step or finish
//! }
//! ```
//!
//! # Structure
//!
//! - [`matcher`]: pure predicates deciding whether an entry maps the target.
//! - [`descend`]: root-to-leaf descent for the current address.
//! - [`iter`]: advancing within a table, bound checks, boundary restarts.
//! - [`hugetlb`]: single-lookup path for hugetlb targets.
//! - [`cursor`]: the state machine tying these together.
//!
//! # Locks
//!
//! A cursor holds at most one page-table lock at a time. Unlocked reads
//! only decide whether a slot is worth locking; the decision is always
//! re-made on a read taken under the lock, so a concurrent split or
//! collapse is observed rather than missed.
//!
//! [`step`]: WalkCursor::step

mod cursor;
mod descend;
mod hugetlb;
mod iter;
mod matcher;

#[cfg(all(test, shuttle))]
mod shuttle_tests;

pub use cursor::{WalkCursor, WalkState};

use core::fmt;

use hadron_core::addr::VirtAddr;
use hadron_core::sync::{SpinLock, SpinLockGuard};

use crate::config::PagingCaps;
use crate::entry::PageTableEntry;
use crate::page::TargetPage;
use crate::region::AddressRegion;
use crate::table::{PageTableOps, Slot};
use crate::Level;

bitflags::bitflags! {
    /// Walk modifiers.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct WalkFlags: u8 {
        /// Lock every candidate leaf slot, even ones whose unlocked read
        /// says there is nothing to find.
        const SYNC      = 1 << 0;
        /// Match migration placeholders instead of live mappings.
        const MIGRATION = 1 << 1;
    }
}

/// Which page-table lock a cursor holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockKind {
    /// Lock covering a PUD slot.
    Pud,
    /// Lock covering a PMD slot.
    Pmd,
    /// Lock covering a PTE table.
    Pte,
    /// Lock covering a hugetlb entry.
    HugeTlb,
}

/// An owned, held page-table lock.
///
/// Dropping it releases the lock.
pub struct PtLock<'a> {
    kind: LockKind,
    guard: SpinLockGuard<'a, ()>,
}

impl<'a> PtLock<'a> {
    /// Spins until `lock` is acquired.
    pub(crate) fn acquire(lock: &'a SpinLock<()>, kind: LockKind) -> Self {
        Self {
            kind,
            guard: lock.lock(),
        }
    }

    /// The level this lock protects.
    pub fn kind(&self) -> LockKind {
        self.kind
    }

    /// The underlying lock.
    pub fn lock(&self) -> &'a SpinLock<()> {
        self.guard.lock_ref()
    }

    /// Releases the lock.
    pub fn unlock(self) {}
}

impl fmt::Debug for PtLock<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtLock")
            .field("kind", &self.kind)
            .field("lock", &self.lock().name())
            .finish()
    }
}

/// A located mapping of the target.
#[derive(Debug, Clone, Copy)]
pub struct Mapping<'a> {
    /// Virtual address the slot maps.
    pub address: VirtAddr,
    /// Level of the matched slot.
    pub level: Level,
    /// The matched slot.
    pub slot: Slot<'a>,
    /// Entry value read under the lock.
    pub entry: PageTableEntry,
    /// Lock held while this mapping is current.
    pub lock: LockKind,
}

/// Outcome of one [`WalkCursor::step`].
#[derive(Debug)]
pub enum MatchResult<'a> {
    /// A mapping was found; its lock is held by the cursor.
    Matched(Mapping<'a>),
    /// No further mappings; no lock is held.
    Exhausted,
}

impl<'a> MatchResult<'a> {
    /// Returns `true` for [`MatchResult::Matched`].
    pub fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }

    /// The mapping, if any.
    pub fn mapping(&self) -> Option<&Mapping<'a>> {
        match self {
            Self::Matched(m) => Some(m),
            Self::Exhausted => None,
        }
    }
}

/// Counters describing the work a walk did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    /// Descents from the root.
    pub descents: u32,
    /// Coarse entries found demoted to a table between the unlocked read
    /// and the locked re-read.
    pub splits: u32,
    /// Table boundaries crossed while advancing, including ranges skipped
    /// because a directory entry above them was empty.
    pub crossings: u32,
    /// Descents restarted because a PMD stopped pointing at a table between
    /// two reads.
    pub restarts: u32,
}

/// Returns `true` if any frame of `target` is mapped in `region`.
///
/// Stops at the first mapping found. Walks with [`WalkFlags::SYNC`], so
/// leaf slots are locked whatever their unlocked contents.
pub fn page_mapped_in_region<S>(
    target: &TargetPage,
    region: &AddressRegion<'_, S>,
    caps: PagingCaps,
) -> bool
where
    S: PageTableOps + ?Sized,
{
    let Some(first) = region.first_address(target) else {
        return false;
    };
    if first >= region.end() {
        return false;
    }
    let mut walk = WalkCursor::begin(*target, *region, first, WalkFlags::SYNC, caps);
    let found = walk.step().is_matched();
    walk.finish();
    found
}

/// Counts the entries in `region` that map `target`.
pub fn count_mappings<S>(
    target: &TargetPage,
    region: &AddressRegion<'_, S>,
    flags: WalkFlags,
    caps: PagingCaps,
) -> usize
where
    S: PageTableOps + ?Sized,
{
    let Some(first) = region.first_address(target) else {
        return 0;
    };
    if first >= region.end() {
        return 0;
    }
    let mut walk = WalkCursor::begin(*target, *region, first, flags, caps);
    let mut count = 0;
    while walk.step().is_matched() {
        count += 1;
    }
    count
}

//! The walk state machine.

use core::fmt;

use hadron_core::addr::VirtAddr;

use crate::config::PagingCaps;
use crate::entry::PageTableEntry;
use crate::page::TargetPage;
use crate::region::AddressRegion;
use crate::table::{PageTableOps, Slot};
use crate::{Level, PAGE_SIZE};

use super::iter::Bounds;
use super::{LockKind, MatchResult, Mapping, PtLock, WalkFlags, WalkStats};

/// Where a [`WalkCursor`] is in its walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkState {
    /// Created, not yet stepped.
    Init,
    /// Descending from the root.
    Descending,
    /// Matched a huge PUD; the next step ends the walk.
    PudMapped,
    /// Positioned on a PMD slot.
    CoarseScanning,
    /// Positioned on a PTE slot, or on the slot of a hugetlb page.
    LeafScanning,
    /// Advanced onto a new table; the next descent starts from the root.
    CrossedBoundary,
    /// Finished. Holds no lock and no slot handles.
    Done,
}

/// Next unit of work inside [`WalkCursor::step`].
pub(super) enum Flow<'a> {
    /// Descend from the root at the current address.
    Restart,
    /// Check a PMD slot; its lock is held. Carries the unlocked read that
    /// led to it.
    CheckPmd(Slot<'a>, PageTableEntry),
    /// Advance to the next PMD slot.
    NextPmd,
    /// Move to the leaf level under a PMD slot; no lock is held.
    PteLevel(Slot<'a>),
    /// Check a PTE slot; its lock is held.
    CheckPte(Slot<'a>),
    /// Advance to the next PTE slot.
    NextPte,
    /// Report a mapping.
    Matched(Mapping<'a>),
    /// No more mappings.
    Exhausted,
}

/// An in-progress search for the entries mapping one target in one region.
///
/// Create with [`begin`](Self::begin), then call [`step`](Self::step) until
/// it returns [`MatchResult::Exhausted`] or the caller has what it needs.
/// Between a match and the following `step`, the cursor holds the lock
/// protecting the matched slot. [`finish`](Self::finish) (or dropping the
/// cursor) releases it.
pub struct WalkCursor<'a, S: PageTableOps + ?Sized> {
    pub(super) target: TargetPage,
    pub(super) region: AddressRegion<'a, S>,
    pub(super) bounds: Bounds,
    pub(super) address: VirtAddr,
    pub(super) flags: WalkFlags,
    pub(super) caps: PagingCaps,
    pub(super) pud: Option<Slot<'a>>,
    pub(super) pmd: Option<Slot<'a>>,
    pub(super) pte: Option<Slot<'a>>,
    pub(super) ptl: Option<PtLock<'a>>,
    pub(super) state: WalkState,
    pub(super) stats: WalkStats,
    current: Option<Mapping<'a>>,
}

impl<'a, S: PageTableOps + ?Sized> WalkCursor<'a, S> {
    /// Prepares a walk for `target` in `region`, starting at `address`.
    ///
    /// `address` is normally where the region maps the target's first
    /// frame. Nothing is read or locked until the first [`step`](Self::step).
    pub fn begin(
        target: TargetPage,
        region: AddressRegion<'a, S>,
        address: VirtAddr,
        flags: WalkFlags,
        caps: PagingCaps,
    ) -> Self {
        debug_assert!(address.is_aligned(PAGE_SIZE), "unaligned walk start {address}");
        debug_assert!(region.contains(address), "walk start {address} outside {region:?}");
        Self {
            target,
            bounds: Bounds::new(&region, &target),
            region,
            address,
            flags,
            caps,
            pud: None,
            pmd: None,
            pte: None,
            ptl: None,
            state: WalkState::Init,
            stats: WalkStats::default(),
            current: None,
        }
    }

    /// Finds the next mapping of the target.
    ///
    /// Any lock held from the previous match is kept while scanning the
    /// same table and released once the scan leaves it. After
    /// [`MatchResult::Exhausted`] the cursor is finished and every further
    /// call returns `Exhausted` again.
    pub fn step(&mut self) -> MatchResult<'a> {
        self.current = None;
        let mut flow = match self.state {
            WalkState::Done => return MatchResult::Exhausted,
            WalkState::Init if self.target.is_hugetlb() => self.hugetlb_lookup(),
            WalkState::Init | WalkState::Descending | WalkState::CrossedBoundary => Flow::Restart,
            WalkState::PudMapped => Flow::Exhausted,
            WalkState::CoarseScanning => Flow::NextPmd,
            WalkState::LeafScanning => Flow::NextPte,
        };
        loop {
            flow = match flow {
                Flow::Restart => self.descend(),
                Flow::CheckPmd(pmd, hint) => self.check_locked_pmd(pmd, hint),
                Flow::NextPmd => self.next_pmd(),
                Flow::PteLevel(pmd) => self.map_pte(pmd),
                Flow::CheckPte(pte) => self.check_locked_pte(pte),
                Flow::NextPte => self.next_pte(),
                Flow::Matched(mapping) => {
                    debug_assert!(self.ptl.is_some(), "match without a lock");
                    self.current = Some(mapping);
                    return MatchResult::Matched(mapping);
                }
                Flow::Exhausted => {
                    self.finish();
                    return MatchResult::Exhausted;
                }
            };
        }
    }

    /// Ends the walk: releases any held lock and forgets all slots.
    ///
    /// Calling it again does nothing.
    pub fn finish(&mut self) {
        self.release();
        self.current = None;
        self.pud = None;
        self.pmd = None;
        self.pte = None;
        self.state = WalkState::Done;
    }

    /// Ends the walk, handing the current match and its lock to the caller.
    ///
    /// Returns `None` (and just finishes) if the cursor is not sitting on a
    /// match.
    pub fn detach(mut self) -> Option<(Mapping<'a>, PtLock<'a>)> {
        let mapping = self.current.take()?;
        let lock = self.ptl.take()?;
        self.finish();
        Some((mapping, lock))
    }

    /// Overwrites the matched slot while its lock is held.
    ///
    /// Returns `false` when there is no current match.
    pub fn set_mapped_entry(&self, entry: PageTableEntry) -> bool {
        match (&self.current, &self.ptl) {
            (Some(mapping), Some(_)) => {
                mapping.slot.write(entry);
                true
            }
            _ => false,
        }
    }

    /// The current match, if the last step produced one.
    pub fn mapping(&self) -> Option<&Mapping<'a>> {
        self.current.as_ref()
    }

    /// Current candidate address.
    pub fn address(&self) -> VirtAddr {
        self.address
    }

    /// Current state.
    pub fn state(&self) -> WalkState {
        self.state
    }

    /// Returns `true` while a page-table lock is held.
    pub fn holds_lock(&self) -> bool {
        self.ptl.is_some()
    }

    /// Kind of the lock held, if any.
    pub fn lock_kind(&self) -> Option<LockKind> {
        self.ptl.as_ref().map(PtLock::kind)
    }

    /// Work counters so far.
    pub fn stats(&self) -> WalkStats {
        self.stats
    }

    /// The PUD slot of the current position.
    pub fn pud(&self) -> Option<Slot<'a>> {
        self.pud
    }

    /// The PMD slot of the current position.
    pub fn pmd(&self) -> Option<Slot<'a>> {
        self.pmd
    }

    /// The PTE (or hugetlb) slot of the current position.
    pub fn pte(&self) -> Option<Slot<'a>> {
        self.pte
    }

    /// The target being searched for.
    pub fn target(&self) -> &TargetPage {
        &self.target
    }

    pub(super) fn release(&mut self) {
        if let Some(lock) = self.ptl.take() {
            lock.unlock();
        }
    }

    pub(super) fn mapping_at(
        &self,
        level: Level,
        slot: Slot<'a>,
        entry: PageTableEntry,
        lock: LockKind,
    ) -> Mapping<'a> {
        Mapping {
            address: self.address,
            level,
            slot,
            entry,
            lock,
        }
    }
}

impl<S: PageTableOps + ?Sized> Drop for WalkCursor<'_, S> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<S: PageTableOps + ?Sized> fmt::Debug for WalkCursor<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WalkCursor")
            .field("target", &self.target)
            .field("address", &self.address)
            .field("flags", &self.flags)
            .field("state", &self.state)
            .field("lock", &self.lock_kind())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

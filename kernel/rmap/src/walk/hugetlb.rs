//! Hugetlb targets: one lookup, one locked check.
//!
//! A hugetlb page is mapped by exactly one huge entry and is never split,
//! so there is nothing to scan.

use hadron_core::ktrace;

use crate::table::PageTableOps;

use super::cursor::{Flow, WalkCursor, WalkState};
use super::matcher;
use super::{LockKind, PtLock};

impl<'a, S: PageTableOps + ?Sized> WalkCursor<'a, S> {
    pub(super) fn hugetlb_lookup(&mut self) -> Flow<'a> {
        self.state = WalkState::LeafScanning;
        let size = self.target.size();
        let space = self.region.space();
        let Some((level, slot)) = space.huge_pte_offset(self.address, size) else {
            ktrace!("rmap: no hugetlb slot for {} ({:#x} bytes)", self.address, size);
            return Flow::Exhausted;
        };
        self.pte = Some(slot);
        self.ptl = Some(PtLock::acquire(
            space.huge_pte_lock(slot, level),
            LockKind::HugeTlb,
        ));
        let entry = slot.read();
        if !matcher::check_pte(&self.target, self.flags, entry.decode(level)) {
            return Flow::Exhausted;
        }
        Flow::Matched(self.mapping_at(level, slot, entry, LockKind::HugeTlb))
    }
}

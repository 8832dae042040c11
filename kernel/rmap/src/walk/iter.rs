//! Advancing a walk past a slot that did not match, or past a match the
//! caller has finished with.
//!
//! Only compound targets advance at all: a PUD-order THP may be mapped by
//! several huge PMDs, and any THP may be mapped piecemeal by PTEs. A
//! directory entry with nothing for the target skips the whole range it
//! covers. Each advance is bounded twice, by the end of the region and by
//! the end of the target's logical span in it; the two are checked
//! independently since either may be the tighter one.

use hadron_core::addr::VirtAddr;
use hadron_core::ktrace;

use crate::page::TargetPage;
use crate::region::AddressRegion;
use crate::table::PageTableOps;
use crate::{HPAGE_PUD_ORDER, PAGE_SIZE, PMD_SIZE, PUD_SIZE};

use super::cursor::{Flow, WalkCursor, WalkState};
use super::{LockKind, PtLock};

/// Limits on how far a walk may advance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) struct Bounds {
    region_end: VirtAddr,
    /// End of the target's span in the region; `None` when the region
    /// cannot map any frame of it.
    span_end: Option<u64>,
}

impl Bounds {
    pub(super) fn new<S: ?Sized>(region: &AddressRegion<'_, S>, target: &TargetPage) -> Self {
        Self {
            region_end: region.end(),
            span_end: region.vma_span_end(target),
        }
    }

    /// Returns `true` if a walk may move on to `address`.
    fn admits(&self, address: VirtAddr) -> bool {
        address < self.region_end && self.span_end.is_some_and(|end| address.as_u64() < end)
    }
}

/// Result of moving the current address forward by one slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Advance {
    /// Still inside the same table.
    Next(VirtAddr),
    /// Landed on the first slot of a different table.
    Crossed(VirtAddr),
    /// Past the region or the target's span.
    OutOfBounds,
}

/// Moves `address` forward by `step` bytes. `boundary` is the span one
/// table at this level covers.
pub(super) fn advance(address: VirtAddr, step: u64, boundary: u64, bounds: &Bounds) -> Advance {
    let Some(next) = address.checked_add(step) else {
        return Advance::OutOfBounds;
    };
    if !bounds.admits(next) {
        return Advance::OutOfBounds;
    }
    if next.is_aligned(boundary) {
        Advance::Crossed(next)
    } else {
        Advance::Next(next)
    }
}

impl<'a, S: PageTableOps + ?Sized> WalkCursor<'a, S> {
    /// Moves to the next non-empty PMD slot of the current table.
    ///
    /// Only a PUD-order THP can be mapped by more than one PMD. Any other
    /// target skips to the next PMD-sized range, where PTEs may still map
    /// part of it.
    pub(super) fn next_pmd(&mut self) -> Flow<'a> {
        self.state = WalkState::CoarseScanning;
        if !self.target.is_transhuge() || self.target.order() != HPAGE_PUD_ORDER {
            return self.step_forward(PMD_SIZE);
        }
        let Some(mut pmd) = self.pmd else {
            return Flow::Exhausted;
        };
        loop {
            match advance(self.address, PMD_SIZE, PUD_SIZE, &self.bounds) {
                Advance::OutOfBounds => return Flow::Exhausted,
                Advance::Crossed(next) => {
                    self.address = next;
                    return self.cross_boundary();
                }
                Advance::Next(next) => {
                    self.address = next;
                    let Some(following) = pmd.next() else {
                        return self.cross_boundary();
                    };
                    pmd = following;
                }
            }
            if !pmd.read().is_none() {
                break;
            }
        }
        self.pmd = Some(pmd);
        let hint = pmd.read();
        if self.ptl.is_none() {
            let lock = self.region.space().pmd_lock(pmd);
            self.ptl = Some(PtLock::acquire(lock, LockKind::Pmd));
        }
        Flow::CheckPmd(pmd, hint)
    }

    /// Moves to the next non-empty PTE slot of the current table.
    ///
    /// Only a transparently huge target can be mapped by more than one PTE.
    pub(super) fn next_pte(&mut self) -> Flow<'a> {
        self.state = WalkState::LeafScanning;
        if !self.target.is_transhuge() || self.target.is_hugetlb() {
            return Flow::Exhausted;
        }
        let Some(mut pte) = self.pte else {
            return Flow::Exhausted;
        };
        loop {
            match advance(self.address, PAGE_SIZE, PMD_SIZE, &self.bounds) {
                Advance::OutOfBounds => return Flow::Exhausted,
                Advance::Crossed(next) => {
                    self.address = next;
                    return self.cross_boundary();
                }
                Advance::Next(next) => {
                    self.address = next;
                    let Some(following) = pte.next() else {
                        return self.cross_boundary();
                    };
                    pte = following;
                }
            }
            if !pte.read().is_none() {
                break;
            }
        }
        self.pte = Some(pte);
        if self.ptl.is_none() {
            let lock = self.region.space().pte_lock(pte);
            self.ptl = Some(PtLock::acquire(lock, LockKind::Pte));
        }
        Flow::CheckPte(pte)
    }

    /// Skips the rest of the `size`-aligned range holding the current
    /// address and restarts from the root at the start of the next one.
    pub(super) fn step_forward(&mut self, size: u64) -> Flow<'a> {
        self.release();
        let next = self.address.align_down(size).checked_add(size);
        match next.filter(|&next| self.bounds.admits(next)) {
            Some(next) => {
                self.address = next;
                self.cross_boundary()
            }
            None => Flow::Exhausted,
        }
    }

    /// Drops the current table and its lock; the next descent starts from
    /// the root at the new address.
    fn cross_boundary(&mut self) -> Flow<'a> {
        self.release();
        self.state = WalkState::CrossedBoundary;
        self.stats.crossings += 1;
        ktrace!("rmap: crossed table boundary, restarting at {}", self.address);
        Flow::Restart
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(region_end: u64, span_end: Option<u64>) -> Bounds {
        Bounds {
            region_end: VirtAddr::new(region_end),
            span_end,
        }
    }

    #[test]
    fn advance_within_table() {
        let b = bounds(0x80_0000, Some(0x80_0000));
        assert_eq!(
            advance(VirtAddr::new(0x40_0000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::Next(VirtAddr::new(0x40_1000))
        );
    }

    #[test]
    fn advance_onto_boundary() {
        let b = bounds(0x100_0000, Some(0x100_0000));
        assert_eq!(
            advance(VirtAddr::new(0x5F_F000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::Crossed(VirtAddr::new(0x60_0000))
        );
    }

    #[test]
    fn region_end_bounds_advance() {
        let b = bounds(0x40_3000, Some(0x60_0000));
        assert_eq!(
            advance(VirtAddr::new(0x40_1000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::Next(VirtAddr::new(0x40_2000))
        );
        assert_eq!(
            advance(VirtAddr::new(0x40_2000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::OutOfBounds
        );
    }

    #[test]
    fn span_end_bounds_advance() {
        // The region extends well past the target.
        let b = bounds(0x100_0000, Some(0x40_8000));
        assert_eq!(
            advance(VirtAddr::new(0x40_7000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::OutOfBounds
        );
    }

    #[test]
    fn boundary_past_bounds_is_out_of_bounds() {
        let b = bounds(0x60_0000, Some(0x100_0000));
        assert_eq!(
            advance(VirtAddr::new(0x5F_F000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::OutOfBounds
        );
    }

    #[test]
    fn no_span_never_advances() {
        let b = bounds(0x100_0000, None);
        assert_eq!(
            advance(VirtAddr::new(0x40_0000), PAGE_SIZE, PMD_SIZE, &b),
            Advance::OutOfBounds
        );
    }

    #[test]
    fn coarse_steps_cross_pud_boundaries() {
        let b = bounds(0x1_0000_0000, Some(0x1_0000_0000));
        assert_eq!(
            advance(VirtAddr::new(0x4000_0000), PMD_SIZE, PUD_SIZE, &b),
            Advance::Next(VirtAddr::new(0x4020_0000))
        );
        assert_eq!(
            advance(VirtAddr::new(0x7FE0_0000), PMD_SIZE, PUD_SIZE, &b),
            Advance::Crossed(VirtAddr::new(0x8000_0000))
        );
    }
}

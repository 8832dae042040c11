//! Root-to-leaf descent for the cursor's current address.
//!
//! Directory levels are read without locks. A huge PUD, or a PMD that is
//! huge or a migration placeholder, is locked and re-read before anything is
//! decided; a PMD that points at a table goes straight to the leaf level,
//! where the PTE lock is taken.

use hadron_core::ktrace;

use crate::entry::{EntrySnapshot, PageTableEntry};
use crate::table::{PageTableOps, Slot};
use crate::{Level, PMD_SIZE, PUD_SIZE};

use super::cursor::{Flow, WalkCursor, WalkState};
use super::matcher::{self, CoarseCheck};
use super::{LockKind, PtLock, WalkFlags};

impl<'a, S: PageTableOps + ?Sized> WalkCursor<'a, S> {
    /// Walks from the root to the first slot worth checking at `address`.
    ///
    /// A directory level with nothing for the target rules out only the
    /// range it covers; the walk moves on to the next such range.
    pub(super) fn descend(&mut self) -> Flow<'a> {
        debug_assert!(self.ptl.is_none(), "descending with a page-table lock held");
        self.state = WalkState::Descending;
        self.stats.descents += 1;
        self.pud = None;
        self.pmd = None;
        self.pte = None;

        let space = self.region.space();
        let address = self.address;

        let pgde = space.root().slot(Level::Pgd.index(address)).read();
        let Some(pud_table) = space.child(pgde) else {
            return self.step_forward(Level::Pgd.size());
        };
        let pud = pud_table.slot(Level::Pud.index(address));
        self.pud = Some(pud);

        match pud.read().decode(Level::Pud) {
            EntrySnapshot::Huge(_) if self.caps.pud_transparent_huge => {
                let lock = PtLock::acquire(space.pud_lock(pud), LockKind::Pud);
                let entry = pud.read();
                match matcher::check_pud(&self.target, self.flags, entry.decode(Level::Pud)) {
                    CoarseCheck::LiveHuge => {
                        self.ptl = Some(lock);
                        self.state = WalkState::PudMapped;
                        return Flow::Matched(self.mapping_at(Level::Pud, pud, entry, LockKind::Pud));
                    }
                    CoarseCheck::SplitDemoted => {
                        lock.unlock();
                        self.stats.splits += 1;
                        ktrace!("rmap: pud at {} split under walk", address);
                    }
                    CoarseCheck::MigrationHuge | CoarseCheck::NoMapping => {
                        lock.unlock();
                        return self.step_forward(PUD_SIZE);
                    }
                }
            }
            EntrySnapshot::Table(_) => {}
            _ => return self.step_forward(PUD_SIZE),
        }

        let pude = pud.read();
        let Some(pmd_table) = space.child(pude) else {
            return if matches!(pude.decode(Level::Pud), EntrySnapshot::Table(_)) {
                self.step_forward(PUD_SIZE)
            } else {
                Flow::Restart
            };
        };
        let pmd = pmd_table.slot(Level::Pmd.index(address));
        self.pmd = Some(pmd);

        let pmde = pmd.read();
        let hint = pmde.decode(Level::Pmd);
        if matcher::pmd_worth_locking(self.caps, hint) {
            self.ptl = Some(PtLock::acquire(space.pmd_lock(pmd), LockKind::Pmd));
            Flow::CheckPmd(pmd, pmde)
        } else if matches!(hint, EntrySnapshot::Table(_)) {
            Flow::PteLevel(pmd)
        } else {
            Flow::NextPmd
        }
    }

    /// Decides on a PMD slot whose lock is held. `hint` is the unlocked read
    /// that led here.
    pub(super) fn check_locked_pmd(&mut self, pmd: Slot<'a>, hint: PageTableEntry) -> Flow<'a> {
        debug_assert_eq!(self.lock_kind(), Some(LockKind::Pmd));
        let entry = pmd.read();
        match matcher::check_pmd(&self.target, self.flags, self.caps, entry.decode(Level::Pmd)) {
            CoarseCheck::LiveHuge | CoarseCheck::MigrationHuge => {
                self.state = WalkState::CoarseScanning;
                Flow::Matched(self.mapping_at(Level::Pmd, pmd, entry, LockKind::Pmd))
            }
            CoarseCheck::SplitDemoted => {
                self.release();
                if hint.is_huge() {
                    self.stats.splits += 1;
                    ktrace!("rmap: pmd at {} split under walk", self.address);
                }
                Flow::PteLevel(pmd)
            }
            CoarseCheck::NoMapping => Flow::NextPmd,
        }
    }

    /// Positions on the PTE slot for `address` under `pmd`, locking it if
    /// it could match.
    pub(super) fn map_pte(&mut self, pmd: Slot<'a>) -> Flow<'a> {
        debug_assert!(self.ptl.is_none());
        self.state = WalkState::LeafScanning;
        let space = self.region.space();
        let pmde = pmd.read();
        let Some(table) = space.child(pmde) else {
            if pmd.read() == pmde && matches!(pmde.decode(Level::Pmd), EntrySnapshot::Table(_)) {
                return self.step_forward(PMD_SIZE);
            }
            ktrace!("rmap: pmd at {} changed under walk, restarting", self.address);
            self.stats.restarts += 1;
            return Flow::Restart;
        };
        let pte = table.slot(Level::Pte.index(self.address));
        self.pte = Some(pte);
        if !self.flags.contains(WalkFlags::SYNC)
            && !matcher::pte_worth_locking(self.flags, pte.read().decode(Level::Pte))
        {
            return Flow::NextPte;
        }
        self.ptl = Some(PtLock::acquire(space.pte_lock(pte), LockKind::Pte));
        Flow::CheckPte(pte)
    }

    /// Decides on a PTE slot whose lock is held.
    pub(super) fn check_locked_pte(&mut self, pte: Slot<'a>) -> Flow<'a> {
        debug_assert_eq!(self.lock_kind(), Some(LockKind::Pte));
        let entry = pte.read();
        if matcher::check_pte(&self.target, self.flags, entry.decode(Level::Pte)) {
            Flow::Matched(self.mapping_at(Level::Pte, pte, entry, LockKind::Pte))
        } else {
            Flow::NextPte
        }
    }
}

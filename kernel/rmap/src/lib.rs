//! Reverse-mapping page-table walker.
//!
//! Given a physical frame (or a compound allocation of `2^order` frames) and
//! an [`AddressRegion`], the walker finds every page-table entry in that
//! region which maps the frame, returning each one with the page-table lock
//! that makes it stable. Callers (reclaim, migration, accounting) mutate the
//! entry under that lock and then resume the walk.
//!
//! The hierarchy is four levels deep (PGD -> PUD -> PMD -> PTE) and a mapping
//! may terminate at the PUD, PMD, or PTE level. Other contexts may split,
//! collapse, or migrate entries while the walk is in progress; the walker
//! treats every unlocked read as a hint and re-reads under the lock.
//!
//! # Crate layout
//!
//! - [`entry`]: raw entry encoding and its decoded [`EntrySnapshot`].
//! - [`table`]: page tables, slot handles, and the [`PageTableOps`] seam an
//!   address space implements.
//! - [`space`]: an in-memory [`AddressSpace`] with the mutation paths
//!   (map, split, migrate) other subsystems perform.
//! - [`page`] / [`region`]: the walk inputs, [`TargetPage`] and
//!   [`AddressRegion`].
//! - [`walk`]: the walker itself, driven through [`WalkCursor`].
//! - [`config`]: capability and address-space configuration.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod config;
pub mod entry;
pub mod page;
pub mod region;
pub mod space;
pub mod table;
pub mod walk;

pub use config::{PagingCaps, SpaceConfig};
pub use entry::{EntrySnapshot, PageTableEntry, SwapEntry};
pub use page::{PageClass, TargetPage};
pub use region::AddressRegion;
pub use space::{AddressSpace, MapError};
pub use table::{PageTable, PageTableOps, Slot};
pub use walk::{
    LockKind, MatchResult, Mapping, PtLock, WalkCursor, WalkFlags, WalkState, WalkStats,
    count_mappings, page_mapped_in_region,
};

use hadron_core::addr::VirtAddr;

/// Base page shift.
pub const PAGE_SHIFT: u32 = 12;
/// Base page size (4 KiB).
pub const PAGE_SIZE: u64 = 1 << PAGE_SHIFT;
/// Entries in one page table at any level.
pub const ENTRIES_PER_TABLE: usize = 512;

/// Shift of the range covered by one PMD entry (2 MiB).
pub const PMD_SHIFT: u32 = 21;
/// Bytes covered by one PMD entry.
pub const PMD_SIZE: u64 = 1 << PMD_SHIFT;
/// Shift of the range covered by one PUD entry (1 GiB).
pub const PUD_SHIFT: u32 = 30;
/// Bytes covered by one PUD entry.
pub const PUD_SIZE: u64 = 1 << PUD_SHIFT;
/// Shift of the range covered by one PGD entry (512 GiB).
pub const PGD_SHIFT: u32 = 39;

/// Compound order of a PMD-sized huge page.
pub const HPAGE_PMD_ORDER: u8 = (PMD_SHIFT - PAGE_SHIFT) as u8;
/// Compound order of a PUD-sized huge page.
pub const HPAGE_PUD_ORDER: u8 = (PUD_SHIFT - PAGE_SHIFT) as u8;

/// A level of the page-table hierarchy, finest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Level {
    /// Leaf level: each entry maps one base page.
    Pte,
    /// Each entry maps 2 MiB or points to a PTE table.
    Pmd,
    /// Each entry maps 1 GiB or points to a PMD table.
    Pud,
    /// Root level: each entry points to a PUD table.
    Pgd,
}

impl Level {
    /// Address shift of the range one entry at this level covers.
    #[inline]
    pub const fn shift(self) -> u32 {
        match self {
            Self::Pte => PAGE_SHIFT,
            Self::Pmd => PMD_SHIFT,
            Self::Pud => PUD_SHIFT,
            Self::Pgd => PGD_SHIFT,
        }
    }

    /// Bytes covered by one entry at this level.
    #[inline]
    pub const fn size(self) -> u64 {
        1 << self.shift()
    }

    /// Index of `addr`'s entry within a table at this level.
    #[inline]
    pub const fn index(self, addr: VirtAddr) -> usize {
        ((addr.as_u64() >> self.shift()) as usize) & (ENTRIES_PER_TABLE - 1)
    }

    /// The next finer level, or `None` for the leaf level.
    #[inline]
    pub const fn finer(self) -> Option<Self> {
        match self {
            Self::Pte => None,
            Self::Pmd => Some(Self::Pte),
            Self::Pud => Some(Self::Pmd),
            Self::Pgd => Some(Self::Pud),
        }
    }

    /// Short lowercase name for log output.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Pte => "pte",
            Self::Pmd => "pmd",
            Self::Pud => "pud",
            Self::Pgd => "pgd",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_indices() {
        let addr = VirtAddr::new((3 << PGD_SHIFT) | (5 << PUD_SHIFT) | (7 << PMD_SHIFT) | (9 << PAGE_SHIFT));
        assert_eq!(Level::Pgd.index(addr), 3);
        assert_eq!(Level::Pud.index(addr), 5);
        assert_eq!(Level::Pmd.index(addr), 7);
        assert_eq!(Level::Pte.index(addr), 9);
    }

    #[test]
    fn level_sizes_and_orders() {
        assert_eq!(Level::Pte.size(), PAGE_SIZE);
        assert_eq!(Level::Pmd.size(), PMD_SIZE);
        assert_eq!(Level::Pud.size(), PUD_SIZE);
        assert_eq!(HPAGE_PMD_ORDER, 9);
        assert_eq!(HPAGE_PUD_ORDER, 18);
        assert_eq!(PAGE_SIZE << HPAGE_PMD_ORDER, PMD_SIZE);
    }

    #[test]
    fn levels_order_finest_first() {
        assert!(Level::Pte < Level::Pmd);
        assert!(Level::Pud < Level::Pgd);
        assert_eq!(Level::Pgd.finer(), Some(Level::Pud));
        assert_eq!(Level::Pte.finer(), None);
    }

    #[test]
    fn level_names() {
        let names = [Level::Pgd, Level::Pud, Level::Pmd, Level::Pte].map(Level::name);
        assert_eq!(names, ["pgd", "pud", "pmd", "pte"]);
    }
}

//! Page tables, slot handles, and the hierarchy interface the walker uses.
//!
//! A [`PageTable`] is 512 atomically-accessed entries plus the split lock
//! that protects them. A [`Slot`] names one entry of one table. The walker
//! reaches tables only through [`PageTableOps`], which an address space
//! implements to say where its root is, how a directory entry resolves to
//! the next table, and which lock protects each level.
//!
//! # Reads and locks
//!
//! [`Slot::read`] is an `Acquire` load. Taken without the slot's lock it is
//! a hint; taken with the lock held it is authoritative. Writers always hold
//! the lock for the slot they modify and publish with a `Release` store.

use core::fmt;

use hadron_core::addr::VirtAddr;
use hadron_core::sync::SpinLock;
use hadron_core::sync::atomic::{AtomicU64, Ordering};

use crate::entry::PageTableEntry;
use crate::{ENTRIES_PER_TABLE, Level, PMD_SIZE, PUD_SIZE};

/// One page table: 512 entries and the lock protecting them.
pub struct PageTable {
    entries: [AtomicU64; ENTRIES_PER_TABLE],
    ptl: SpinLock<()>,
}

impl PageTable {
    /// Creates a table with every entry `none`.
    pub fn new() -> Self {
        Self {
            entries: core::array::from_fn(|_| AtomicU64::new(0)),
            ptl: SpinLock::named("ptl", ()),
        }
    }

    /// Returns the slot at `index`.
    ///
    /// Panics if `index` is not below [`ENTRIES_PER_TABLE`].
    #[inline]
    pub fn slot(&self, index: usize) -> Slot<'_> {
        assert!(index < ENTRIES_PER_TABLE, "slot index {index} out of range");
        Slot { table: self, index }
    }

    /// The split page-table lock for this table's entries.
    #[inline]
    pub fn lock(&self) -> &SpinLock<()> {
        &self.ptl
    }

    /// Returns `true` if every entry is `none`.
    pub fn is_empty(&self) -> bool {
        self.entries
            .iter()
            .all(|e| e.load(Ordering::Relaxed) == 0)
    }
}

impl Default for PageTable {
    fn default() -> Self {
        Self::new()
    }
}

/// A position in the hierarchy: one entry of one table.
#[derive(Clone, Copy)]
pub struct Slot<'a> {
    table: &'a PageTable,
    index: usize,
}

impl<'a> Slot<'a> {
    /// Reads the entry.
    #[inline]
    pub fn read(self) -> PageTableEntry {
        PageTableEntry::from_raw(self.table.entries[self.index].load(Ordering::Acquire))
    }

    /// Replaces the entry. The caller must hold the lock protecting it.
    #[inline]
    pub(crate) fn write(self, entry: PageTableEntry) {
        self.table.entries[self.index].store(entry.raw(), Ordering::Release);
    }

    /// The following slot of the same table, `None` past the last entry.
    #[inline]
    pub fn next(self) -> Option<Slot<'a>> {
        (self.index + 1 < ENTRIES_PER_TABLE).then(|| Slot {
            table: self.table,
            index: self.index + 1,
        })
    }

    /// Index of this slot within its table.
    #[inline]
    pub fn index(self) -> usize {
        self.index
    }

    /// The table containing this slot.
    #[inline]
    pub fn table(self) -> &'a PageTable {
        self.table
    }
}

impl PartialEq for Slot<'_> {
    fn eq(&self, other: &Self) -> bool {
        core::ptr::eq(self.table, other.table) && self.index == other.index
    }
}

impl Eq for Slot<'_> {}

impl fmt::Debug for Slot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Slot({:p}[{}] = {:?})",
            self.table,
            self.index,
            self.read()
        )
    }
}

/// Access to an address space's page-table hierarchy.
///
/// The walker never allocates, frees, or (outside a caller's explicit
/// request) writes tables; it only resolves slots and takes the locks named
/// here. Implementations decide lock granularity: the defaults use the
/// per-table split lock for PMD and PTE slots. Whatever the choice, every
/// slot of one table must map to the same lock, since a walk keeps the lock
/// while it scans along a table.
pub trait PageTableOps {
    /// The root (PGD) table.
    fn root(&self) -> &PageTable;

    /// Resolves a present, non-huge directory entry to the table it points
    /// at. Returns `None` for any other entry.
    fn child(&self, entry: PageTableEntry) -> Option<&PageTable>;

    /// Lock protecting a PUD slot (typically address-space wide).
    fn pud_lock<'a>(&'a self, pud: Slot<'a>) -> &'a SpinLock<()>;

    /// Lock protecting a PMD slot.
    fn pmd_lock<'a>(&'a self, pmd: Slot<'a>) -> &'a SpinLock<()> {
        pmd.table().lock()
    }

    /// Lock protecting a PTE slot.
    fn pte_lock<'a>(&'a self, pte: Slot<'a>) -> &'a SpinLock<()> {
        pte.table().lock()
    }

    /// Finds the slot that maps a hugetlb page of `size` bytes at `addr`,
    /// together with the level of the table it was found in.
    ///
    /// Returns the PUD slot for 1 GiB pages and the PMD slot for 2 MiB
    /// pages. Returns `None` if the hierarchy above that slot is missing;
    /// for 2 MiB lookups a PUD that is huge or non-present is returned
    /// as-is, at [`Level::Pud`].
    fn huge_pte_offset(&self, addr: VirtAddr, size: u64) -> Option<(Level, Slot<'_>)> {
        let pgd = self.root().slot(Level::Pgd.index(addr));
        let pgde = pgd.read();
        if !pgde.is_present() {
            return None;
        }
        let pud = self.child(pgde)?.slot(Level::Pud.index(addr));
        if size == PUD_SIZE {
            return Some((Level::Pud, pud));
        }
        if size != PMD_SIZE {
            return None;
        }
        let pude = pud.read();
        if pude.is_none() {
            return None;
        }
        if pude.is_huge() || !pude.is_present() {
            return Some((Level::Pud, pud));
        }
        Some((Level::Pmd, self.child(pude)?.slot(Level::Pmd.index(addr))))
    }

    /// Lock protecting a hugetlb slot found at `level` by
    /// [`huge_pte_offset`](Self::huge_pte_offset).
    fn huge_pte_lock<'a>(&'a self, slot: Slot<'a>, level: Level) -> &'a SpinLock<()> {
        if level == Level::Pmd {
            self.pmd_lock(slot)
        } else {
            self.pud_lock(slot)
        }
    }
}

#[cfg(all(test, not(shuttle)))]
mod tests {
    use super::*;
    use crate::entry::EntryFlags;
    use hadron_core::addr::Pfn;

    #[test]
    fn new_table_is_empty() {
        let table = PageTable::new();
        assert!(table.is_empty());
        assert!(table.slot(0).read().is_none());
        assert!(table.slot(511).read().is_none());
    }

    #[test]
    fn slot_write_then_read() {
        let table = PageTable::new();
        let entry = PageTableEntry::new(Pfn::new(0x42), EntryFlags::WRITABLE);
        let _guard = table.lock().lock();
        table.slot(3).write(entry);
        assert_eq!(table.slot(3).read(), entry);
        assert!(!table.is_empty());
    }

    #[test]
    fn next_stays_within_table() {
        let table = PageTable::new();
        assert_eq!(table.slot(10).next().map(Slot::index), Some(11));
        assert!(table.slot(ENTRIES_PER_TABLE - 1).next().is_none());
    }

    #[test]
    fn slot_identity() {
        let a = PageTable::new();
        let b = PageTable::new();
        assert_eq!(a.slot(1), a.slot(1));
        assert_ne!(a.slot(1), a.slot(2));
        assert_ne!(a.slot(1), b.slot(1));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn slot_index_checked() {
        let table = PageTable::new();
        let _ = table.slot(ENTRIES_PER_TABLE);
    }
}

//! In-memory address space: a four-level page-table hierarchy with the
//! mutation paths other subsystems perform concurrently with a walk.
//!
//! Tables come from a fixed-capacity pool allocated up front; a directory
//! entry refers to a child table by a synthetic frame number
//! (`TABLE_PFN_BASE + pool index`), which [`PageTableOps::child`] resolves
//! back to the table.
//!
//! # Locking
//!
//! Every writer holds the lock protecting the slot it writes:
//!
//! - PGD and PUD slots, and the table pool: the address-space wide
//!   `page_table_lock` (also what [`PageTableOps::pud_lock`] returns).
//! - PMD slots: the PMD table's split lock.
//! - PTE slots: the PTE table's split lock.
//!
//! Nested locks are always taken top-down. A split fills the new table
//! completely before publishing it with a single store to the coarse slot.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt;

use hadron_core::addr::{Pfn, VirtAddr};
use hadron_core::kwarn;
use hadron_core::sync::atomic::{AtomicUsize, Ordering};
use hadron_core::sync::{SpinLock, SpinLockGuard};

use crate::config::SpaceConfig;
use crate::entry::{EntryFlags, PageTableEntry, SwapEntry};
use crate::table::{PageTable, PageTableOps, Slot};
use crate::{ENTRIES_PER_TABLE, Level, PAGE_SIZE, PMD_SIZE, PUD_SIZE};

/// Frame number recorded in a directory entry for pool table 0.
const TABLE_PFN_BASE: u64 = 1 << 39;

/// Flags of directory entries pointing at a child table.
const TABLE_FLAGS: EntryFlags = EntryFlags::WRITABLE.union(EntryFlags::USER);

/// Error type for address-space mutations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MapError {
    /// The table pool is exhausted.
    OutOfTables,
    /// Nothing (or not the expected kind of entry) is mapped at the address.
    NotMapped,
    /// The slot is already occupied.
    AlreadyMapped,
    /// The entry maps a different page size than requested, or the size is
    /// not supported.
    SizeMismatch,
    /// Address or frame is not aligned to the requested page size.
    Misaligned,
}

impl fmt::Display for MapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MapError::OutOfTables => write!(f, "page table pool exhausted"),
            MapError::NotMapped => write!(f, "page not mapped"),
            MapError::AlreadyMapped => write!(f, "page already mapped"),
            MapError::SizeMismatch => write!(f, "page size mismatch"),
            MapError::Misaligned => write!(f, "address not aligned to page size"),
        }
    }
}

/// Fixed-capacity table storage. Table 0 is the root.
struct TablePool {
    tables: Box<[PageTable]>,
    next: AtomicUsize,
}

impl TablePool {
    fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let tables: Vec<PageTable> = (0..capacity).map(|_| PageTable::new()).collect();
        Self {
            tables: tables.into_boxed_slice(),
            next: AtomicUsize::new(1),
        }
    }

    /// Hands out the next unused table. Callers serialize on
    /// `page_table_lock`.
    fn alloc(&self, _ptl: &SpinLockGuard<'_, ()>) -> Result<(usize, &PageTable), MapError> {
        let idx = self.next.load(Ordering::Relaxed);
        if idx >= self.tables.len() {
            kwarn!(
                "rmap: page table pool exhausted ({} tables)",
                self.tables.len()
            );
            return Err(MapError::OutOfTables);
        }
        self.next.store(idx + 1, Ordering::Release);
        Ok((idx, &self.tables[idx]))
    }

    fn allocated(&self) -> &[PageTable] {
        let n = self.next.load(Ordering::Acquire).min(self.tables.len());
        &self.tables[..n]
    }
}

/// Directory entry referring to pool table `idx`.
fn table_entry(idx: usize) -> PageTableEntry {
    PageTableEntry::new(Pfn::new(TABLE_PFN_BASE + idx as u64), TABLE_FLAGS)
}

/// A process address space: page-table hierarchy plus its locks.
pub struct AddressSpace {
    pool: TablePool,
    page_table_lock: SpinLock<()>,
    config: SpaceConfig,
}

impl AddressSpace {
    /// Creates an empty address space with the default configuration.
    pub fn new() -> Self {
        Self::with_config(SpaceConfig::default())
    }

    /// Creates an empty address space.
    pub fn with_config(config: SpaceConfig) -> Self {
        Self {
            pool: TablePool::new(config.max_tables),
            page_table_lock: SpinLock::named("page_table_lock", ()),
            config,
        }
    }

    /// The configuration this space was built with.
    pub fn config(&self) -> &SpaceConfig {
        &self.config
    }

    /// Number of tables in use, root included.
    pub fn tables_allocated(&self) -> usize {
        self.pool.allocated().len()
    }

    /// Number of page-table locks currently held by anyone.
    pub fn held_locks(&self) -> usize {
        let tables = self
            .pool
            .allocated()
            .iter()
            .filter(|t| t.lock().is_locked())
            .count();
        tables + usize::from(self.page_table_lock.is_locked())
    }

    // -----------------------------------------------------------------------
    // Lookup
    // -----------------------------------------------------------------------

    /// Returns the slot for `addr` at `level` without allocating, `None` if
    /// a table above it is missing or a huge entry terminates the walk early.
    pub fn lookup(&self, addr: VirtAddr, level: Level) -> Option<Slot<'_>> {
        let mut table = self.root();
        let mut cur = Level::Pgd;
        loop {
            let slot = table.slot(cur.index(addr));
            if cur == level {
                return Some(slot);
            }
            table = self.child(slot.read())?;
            cur = cur.finer()?;
        }
    }

    /// Reads the leaf entry mapping `addr`.
    pub fn read_pte(&self, addr: VirtAddr) -> Option<PageTableEntry> {
        self.lookup(addr, Level::Pte).map(Slot::read)
    }

    /// Reads the PMD entry covering `addr`.
    pub fn read_pmd(&self, addr: VirtAddr) -> Option<PageTableEntry> {
        self.lookup(addr, Level::Pmd).map(Slot::read)
    }

    /// Reads the PUD entry covering `addr`.
    pub fn read_pud(&self, addr: VirtAddr) -> Option<PageTableEntry> {
        self.lookup(addr, Level::Pud).map(Slot::read)
    }

    // -----------------------------------------------------------------------
    // Table construction
    // -----------------------------------------------------------------------

    /// Returns the slot for `addr` at `level`, allocating intermediate
    /// tables as needed.
    fn ensure<'a>(
        &'a self,
        addr: VirtAddr,
        level: Level,
        ptl: &SpinLockGuard<'_, ()>,
    ) -> Result<Slot<'a>, MapError> {
        let mut table = self.root();
        let mut cur = Level::Pgd;
        loop {
            let slot = table.slot(cur.index(addr));
            let Some(finer) = cur.finer() else {
                return Ok(slot);
            };
            if cur == level {
                return Ok(slot);
            }
            let entry = slot.read();
            table = if entry.is_none() {
                let (idx, new) = self.pool.alloc(ptl)?;
                self.install(slot, cur, table_entry(idx));
                new
            } else {
                self.child(entry).ok_or(MapError::SizeMismatch)?
            };
            cur = finer;
        }
    }

    /// Publishes a directory entry. PGD/PUD slots are covered by the
    /// caller's `page_table_lock`.
    fn install(&self, slot: Slot<'_>, level: Level, entry: PageTableEntry) {
        if level == Level::Pmd {
            let _pmd = self.pmd_lock(slot).lock();
            slot.write(entry);
        } else {
            slot.write(entry);
        }
    }

    /// Writes `entry` to a PTE slot under its lock, returning the old value.
    fn write_pte(&self, slot: Slot<'_>, entry: PageTableEntry) -> PageTableEntry {
        let _pte = self.pte_lock(slot).lock();
        let old = slot.read();
        slot.write(entry);
        old
    }

    // -----------------------------------------------------------------------
    // Mapping
    // -----------------------------------------------------------------------

    /// Maps the base page at `addr` to `pfn`.
    pub fn map_page(&self, addr: VirtAddr, pfn: Pfn, flags: EntryFlags) -> Result<(), MapError> {
        self.map_leaf(addr, PageTableEntry::new(pfn, flags))
    }

    /// Installs a device-private entry for `pfn` at `addr`.
    pub fn map_device_private(
        &self,
        addr: VirtAddr,
        pfn: Pfn,
        writable: bool,
    ) -> Result<(), MapError> {
        self.map_leaf(addr, SwapEntry::device_private(pfn, writable).to_entry())
    }

    fn map_leaf(&self, addr: VirtAddr, entry: PageTableEntry) -> Result<(), MapError> {
        if !addr.is_aligned(PAGE_SIZE) {
            return Err(MapError::Misaligned);
        }
        let slot = {
            let ptl = self.page_table_lock.lock();
            self.ensure(addr, Level::Pte, &ptl)?
        };
        let _pte = self.pte_lock(slot).lock();
        if !slot.read().is_none() {
            return Err(MapError::AlreadyMapped);
        }
        slot.write(entry);
        Ok(())
    }

    /// Maps a 2 MiB page at `addr` with a single huge PMD entry.
    pub fn map_huge_pmd(&self, addr: VirtAddr, pfn: Pfn, flags: EntryFlags) -> Result<(), MapError> {
        check_huge_alignment(addr, pfn, PMD_SIZE)?;
        let slot = {
            let ptl = self.page_table_lock.lock();
            self.ensure(addr, Level::Pmd, &ptl)?
        };
        let _pmd = self.pmd_lock(slot).lock();
        if !slot.read().is_none() {
            return Err(MapError::AlreadyMapped);
        }
        slot.write(PageTableEntry::new(pfn, flags | EntryFlags::HUGE_PAGE));
        Ok(())
    }

    /// Maps a 1 GiB page at `addr` with a single huge PUD entry.
    pub fn map_huge_pud(&self, addr: VirtAddr, pfn: Pfn, flags: EntryFlags) -> Result<(), MapError> {
        check_huge_alignment(addr, pfn, PUD_SIZE)?;
        let ptl = self.page_table_lock.lock();
        let slot = self.ensure(addr, Level::Pud, &ptl)?;
        if !slot.read().is_none() {
            return Err(MapError::AlreadyMapped);
        }
        slot.write(PageTableEntry::new(pfn, flags | EntryFlags::HUGE_PAGE));
        Ok(())
    }

    /// Maps a hugetlb page of `size` bytes at `addr`.
    ///
    /// `size` must be one of the sizes registered in the [`SpaceConfig`].
    pub fn map_hugetlb(
        &self,
        addr: VirtAddr,
        pfn: Pfn,
        size: u64,
        flags: EntryFlags,
    ) -> Result<(), MapError> {
        if !self.config.supports_hugetlb(size) {
            return Err(MapError::SizeMismatch);
        }
        if size == PUD_SIZE {
            self.map_huge_pud(addr, pfn, flags)
        } else {
            self.map_huge_pmd(addr, pfn, flags)
        }
    }

    /// Replaces the leaf entry at `addr`, allocating tables as needed.
    /// Returns the previous entry.
    pub fn set_pte(&self, addr: VirtAddr, entry: PageTableEntry) -> Result<PageTableEntry, MapError> {
        let slot = {
            let ptl = self.page_table_lock.lock();
            self.ensure(addr, Level::Pte, &ptl)?
        };
        Ok(self.write_pte(slot, entry))
    }

    /// Replaces the PMD entry covering `addr`, allocating tables as needed.
    /// Returns the previous entry.
    pub fn set_pmd(&self, addr: VirtAddr, entry: PageTableEntry) -> Result<PageTableEntry, MapError> {
        let slot = {
            let ptl = self.page_table_lock.lock();
            self.ensure(addr, Level::Pmd, &ptl)?
        };
        let _pmd = self.pmd_lock(slot).lock();
        let old = slot.read();
        slot.write(entry);
        Ok(old)
    }

    /// Clears the leaf entry at `addr` and returns what it held.
    pub fn clear_pte(&self, addr: VirtAddr) -> Result<PageTableEntry, MapError> {
        let slot = self.lookup(addr, Level::Pte).ok_or(MapError::NotMapped)?;
        let _pte = self.pte_lock(slot).lock();
        let old = slot.read();
        if old.is_none() {
            return Err(MapError::NotMapped);
        }
        slot.write(PageTableEntry::empty());
        Ok(old)
    }

    // -----------------------------------------------------------------------
    // Split and migration
    // -----------------------------------------------------------------------

    /// Demotes the huge PMD covering `addr` into a table of 512 base-page
    /// entries mapping the same frames.
    pub fn split_huge_pmd(&self, addr: VirtAddr) -> Result<(), MapError> {
        let ptl = self.page_table_lock.lock();
        let slot = self.lookup(addr, Level::Pmd).ok_or(MapError::NotMapped)?;
        let huge = slot.read();
        if !huge.is_huge() {
            return Err(MapError::NotMapped);
        }
        let (idx, table) = self.pool.alloc(&ptl)?;
        let flags = huge.flags() - EntryFlags::HUGE_PAGE;
        for i in 0..ENTRIES_PER_TABLE {
            table
                .slot(i)
                .write(PageTableEntry::new(huge.pfn() + i as u64, flags));
        }
        let _pmd = self.pmd_lock(slot).lock();
        if slot.read() != huge {
            return Err(MapError::NotMapped);
        }
        slot.write(table_entry(idx));
        Ok(())
    }

    /// Demotes the huge PUD covering `addr` into a table of 512 huge PMD
    /// entries mapping the same frames.
    pub fn split_huge_pud(&self, addr: VirtAddr) -> Result<(), MapError> {
        let ptl = self.page_table_lock.lock();
        let slot = self.lookup(addr, Level::Pud).ok_or(MapError::NotMapped)?;
        let huge = slot.read();
        if !huge.is_huge() {
            return Err(MapError::NotMapped);
        }
        let (idx, table) = self.pool.alloc(&ptl)?;
        let per_pmd = PMD_SIZE / PAGE_SIZE;
        for i in 0..ENTRIES_PER_TABLE {
            table
                .slot(i)
                .write(PageTableEntry::new(huge.pfn() + i as u64 * per_pmd, huge.flags()));
        }
        slot.write(table_entry(idx));
        Ok(())
    }

    /// Replaces the present leaf entry at `addr` with a migration entry for
    /// the same frame. Returns the frame.
    pub fn migrate_pte(&self, addr: VirtAddr) -> Result<Pfn, MapError> {
        let slot = self.lookup(addr, Level::Pte).ok_or(MapError::NotMapped)?;
        let _pte = self.pte_lock(slot).lock();
        let old = slot.read();
        if !old.is_present() {
            return Err(MapError::NotMapped);
        }
        let writable = old.flags().contains(EntryFlags::WRITABLE);
        slot.write(SwapEntry::migration(old.pfn(), writable).to_entry());
        Ok(old.pfn())
    }

    /// Replaces the huge PMD covering `addr` with a migration entry for its
    /// head frame. Returns the frame.
    pub fn migrate_pmd(&self, addr: VirtAddr) -> Result<Pfn, MapError> {
        let slot = self.lookup(addr, Level::Pmd).ok_or(MapError::NotMapped)?;
        let _pmd = self.pmd_lock(slot).lock();
        let old = slot.read();
        if !old.is_huge() {
            return Err(MapError::SizeMismatch);
        }
        let writable = old.flags().contains(EntryFlags::WRITABLE);
        slot.write(SwapEntry::migration(old.pfn(), writable).to_entry());
        Ok(old.pfn())
    }
}

impl Default for AddressSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("tables", &self.tables_allocated())
            .field("capacity", &self.pool.tables.len())
            .finish_non_exhaustive()
    }
}

fn check_huge_alignment(addr: VirtAddr, pfn: Pfn, size: u64) -> Result<(), MapError> {
    if !addr.is_aligned(size) || pfn.start_address().as_u64() % size != 0 {
        return Err(MapError::Misaligned);
    }
    Ok(())
}

impl PageTableOps for AddressSpace {
    fn root(&self) -> &PageTable {
        &self.pool.tables[0]
    }

    fn child(&self, entry: PageTableEntry) -> Option<&PageTable> {
        if !entry.is_present() || entry.is_huge() {
            return None;
        }
        let idx = entry.pfn().offset_from(Pfn::new(TABLE_PFN_BASE))?;
        self.pool.allocated().get(usize::try_from(idx).ok()?)
    }

    fn pud_lock<'a>(&'a self, _pud: Slot<'a>) -> &'a SpinLock<()> {
        &self.page_table_lock
    }
}

#[cfg(all(test, not(shuttle)))]
mod tests {
    use super::*;
    use crate::entry::EntrySnapshot;

    const BASE: u64 = 0x4000_0000;

    fn va(addr: u64) -> VirtAddr {
        VirtAddr::new(addr)
    }

    #[test]
    fn map_page_then_read() {
        let space = AddressSpace::new();
        space
            .map_page(va(BASE + 0x3000), Pfn::new(0x1234), EntryFlags::WRITABLE)
            .unwrap();
        let pte = space.read_pte(va(BASE + 0x3000)).unwrap();
        assert_eq!(pte.decode(Level::Pte), EntrySnapshot::Present(Pfn::new(0x1234)));
        assert!(space.read_pte(va(BASE + 0x4000)).unwrap().is_none());
        assert_eq!(space.tables_allocated(), 4);
    }

    #[test]
    fn double_map_rejected() {
        let space = AddressSpace::new();
        space.map_page(va(BASE), Pfn::new(1), EntryFlags::empty()).unwrap();
        assert_eq!(
            space.map_page(va(BASE), Pfn::new(2), EntryFlags::empty()),
            Err(MapError::AlreadyMapped)
        );
    }

    #[test]
    fn misaligned_huge_mappings_rejected() {
        let space = AddressSpace::new();
        assert_eq!(
            space.map_huge_pmd(va(BASE + 0x1000), Pfn::new(0x200), EntryFlags::empty()),
            Err(MapError::Misaligned)
        );
        assert_eq!(
            space.map_huge_pmd(va(BASE), Pfn::new(0x201), EntryFlags::empty()),
            Err(MapError::Misaligned)
        );
        assert_eq!(
            space.map_page(va(BASE + 1), Pfn::new(1), EntryFlags::empty()),
            Err(MapError::Misaligned)
        );
    }

    #[test]
    fn huge_pmd_blocks_leaf_mapping() {
        let space = AddressSpace::new();
        space
            .map_huge_pmd(va(BASE), Pfn::new(0x200), EntryFlags::WRITABLE)
            .unwrap();
        assert!(space.read_pmd(va(BASE)).unwrap().is_huge());
        assert_eq!(space.read_pte(va(BASE)), None);
        assert_eq!(
            space.map_page(va(BASE + 0x1000), Pfn::new(1), EntryFlags::empty()),
            Err(MapError::SizeMismatch)
        );
    }

    #[test]
    fn split_huge_pmd_preserves_frames() {
        let space = AddressSpace::new();
        space
            .map_huge_pmd(va(BASE), Pfn::new(0x400), EntryFlags::WRITABLE)
            .unwrap();
        space.split_huge_pmd(va(BASE)).unwrap();

        let pmd = space.read_pmd(va(BASE)).unwrap();
        assert!(matches!(pmd.decode(Level::Pmd), EntrySnapshot::Table(_)));
        for i in [0u64, 1, 255, 511] {
            let pte = space.read_pte(va(BASE + i * PAGE_SIZE)).unwrap();
            assert_eq!(pte.pfn(), Pfn::new(0x400 + i));
            assert!(pte.flags().contains(EntryFlags::WRITABLE));
            assert!(!pte.flags().contains(EntryFlags::HUGE_PAGE));
        }
        assert_eq!(space.split_huge_pmd(va(BASE)), Err(MapError::NotMapped));
    }

    #[test]
    fn split_huge_pud_yields_huge_pmds() {
        let space = AddressSpace::new();
        space
            .map_huge_pud(va(BASE), Pfn::new(0x4_0000), EntryFlags::empty())
            .unwrap();
        space.split_huge_pud(va(BASE)).unwrap();
        let pmd = space.read_pmd(va(BASE + 3 * PMD_SIZE)).unwrap();
        assert!(pmd.is_huge());
        assert_eq!(pmd.pfn(), Pfn::new(0x4_0000 + 3 * 512));
    }

    #[test]
    fn migrate_and_clear() {
        let space = AddressSpace::new();
        space
            .map_page(va(BASE), Pfn::new(0x99), EntryFlags::WRITABLE)
            .unwrap();
        assert_eq!(space.migrate_pte(va(BASE)), Ok(Pfn::new(0x99)));
        let swp = space.read_pte(va(BASE)).unwrap().swap_entry().unwrap();
        assert!(swp.is_migration());
        assert_eq!(swp.pfn(), Pfn::new(0x99));

        let old = space.clear_pte(va(BASE)).unwrap();
        assert!(old.is_swap());
        assert_eq!(space.clear_pte(va(BASE)), Err(MapError::NotMapped));
    }

    #[test]
    fn migrate_pmd_requires_huge() {
        let space = AddressSpace::new();
        space.map_page(va(BASE), Pfn::new(1), EntryFlags::empty()).unwrap();
        assert_eq!(space.migrate_pmd(va(BASE)), Err(MapError::SizeMismatch));

        space
            .map_huge_pmd(va(BASE + PMD_SIZE), Pfn::new(0x600), EntryFlags::empty())
            .unwrap();
        assert_eq!(space.migrate_pmd(va(BASE + PMD_SIZE)), Ok(Pfn::new(0x600)));
        let pmd = space.read_pmd(va(BASE + PMD_SIZE)).unwrap();
        assert_eq!(pmd.decode(Level::Pmd), EntrySnapshot::Migration(Pfn::new(0x600)));
    }

    #[test]
    fn pool_exhaustion() {
        let space = AddressSpace::with_config(SpaceConfig::new(3));
        assert_eq!(
            space.map_page(va(BASE), Pfn::new(1), EntryFlags::empty()),
            Err(MapError::OutOfTables)
        );
        assert_eq!(space.tables_allocated(), 3);
        assert_eq!(space.held_locks(), 0);
    }

    #[test]
    fn hugetlb_size_must_be_registered() {
        let space = AddressSpace::with_config(
            SpaceConfig::new(8).with_hugetlb_size(PMD_SIZE).unwrap(),
        );
        assert_eq!(
            space.map_hugetlb(va(0), Pfn::new(0), PUD_SIZE, EntryFlags::empty()),
            Err(MapError::SizeMismatch)
        );
        space
            .map_hugetlb(va(BASE), Pfn::new(0x200), PMD_SIZE, EntryFlags::empty())
            .unwrap();
        assert!(space.read_pmd(va(BASE)).unwrap().is_huge());
        assert_eq!(space.config().hugetlb_sizes(), &[PMD_SIZE]);
    }

    #[test]
    fn set_pte_returns_previous_entry() {
        let space = AddressSpace::new();
        let addr = va(BASE + 0x5000);
        let first = PageTableEntry::new(Pfn::new(0x10), EntryFlags::WRITABLE);
        assert!(space.set_pte(addr, first).unwrap().is_none());

        let migration = SwapEntry::migration(Pfn::new(0x10), true).to_entry();
        assert_eq!(space.set_pte(addr, migration).unwrap(), first);
        assert_eq!(space.read_pte(addr), Some(migration));
        assert_eq!(space.held_locks(), 0);
    }

    #[test]
    fn set_pmd_replaces_table_with_huge_entry() {
        let space = AddressSpace::new();
        space.map_page(va(BASE), Pfn::new(1), EntryFlags::empty()).unwrap();
        let table = space.read_pmd(va(BASE)).unwrap();

        let huge = PageTableEntry::new(Pfn::new(0x200), EntryFlags::HUGE_PAGE);
        assert_eq!(space.set_pmd(va(BASE), huge).unwrap(), table);
        assert_eq!(
            space.read_pmd(va(BASE)).unwrap().decode(Level::Pmd),
            EntrySnapshot::Huge(Pfn::new(0x200))
        );
        assert_eq!(space.read_pte(va(BASE)), None);
        assert_eq!(space.held_locks(), 0);
    }

    #[test]
    fn huge_pte_offset_finds_hugetlb_slots() {
        let space = AddressSpace::new();
        assert_eq!(space.huge_pte_offset(va(BASE), PMD_SIZE), None);

        space
            .map_hugetlb(va(BASE), Pfn::new(0x200), PMD_SIZE, EntryFlags::empty())
            .unwrap();
        let (level, slot) = space.huge_pte_offset(va(BASE), PMD_SIZE).unwrap();
        assert_eq!(level, Level::Pmd);
        assert_eq!(Some(slot), space.lookup(va(BASE), Level::Pmd));
        assert_eq!(slot.read().pfn(), Pfn::new(0x200));
        assert!(core::ptr::eq(space.huge_pte_lock(slot, level), slot.table().lock()));

        space
            .map_hugetlb(va(2 * PUD_SIZE), Pfn::new(0x4_0000), PUD_SIZE, EntryFlags::empty())
            .unwrap();
        let (level, slot) = space.huge_pte_offset(va(2 * PUD_SIZE), PUD_SIZE).unwrap();
        assert_eq!(level, Level::Pud);
        assert!(slot.read().is_huge());
        assert_eq!(space.huge_pte_offset(va(BASE), 0x1_0000), None);
    }

    #[test]
    fn pmd_sized_lookup_stops_at_huge_pud() {
        let space = AddressSpace::new();
        let addr = va(2 * PUD_SIZE + PMD_SIZE);
        space
            .map_huge_pud(va(2 * PUD_SIZE), Pfn::new(0x4_0000), EntryFlags::empty())
            .unwrap();
        let (level, slot) = space.huge_pte_offset(addr, PMD_SIZE).unwrap();
        assert_eq!(level, Level::Pud);
        assert_eq!(Some(slot), space.lookup(addr, Level::Pud));
        assert!(core::ptr::eq(space.huge_pte_lock(slot, level), &space.page_table_lock));
    }

    #[test]
    fn locks_by_level() {
        let space = AddressSpace::new();
        space.map_page(va(BASE), Pfn::new(1), EntryFlags::empty()).unwrap();
        let pud = space.lookup(va(BASE), Level::Pud).unwrap();
        let pmd = space.lookup(va(BASE), Level::Pmd).unwrap();
        let pte = space.lookup(va(BASE), Level::Pte).unwrap();

        assert!(core::ptr::eq(space.pud_lock(pud), &space.page_table_lock));
        assert!(core::ptr::eq(space.pmd_lock(pmd), pmd.table().lock()));
        assert!(!core::ptr::eq(space.pmd_lock(pmd), space.pte_lock(pte)));

        let guard = space.pte_lock(pte).lock();
        assert_eq!(space.held_locks(), 1);
        drop(guard);
        assert_eq!(space.held_locks(), 0);
    }

    #[test]
    fn map_error_display() {
        assert_eq!(MapError::NotMapped.to_string(), "page not mapped");
        assert_eq!(MapError::OutOfTables.to_string(), "page table pool exhausted");
    }
}

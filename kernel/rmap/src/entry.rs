//! Page-table entry encoding.
//!
//! Entries follow the x86_64 layout: flag bits in the low 12 bits, the frame
//! address in bits 12..51. An all-zero entry is `none`. Any other entry with
//! `PRESENT` clear is a swap-class entry; those written by this crate also
//! set the software `SWAP` bit so that swap area 0, offset 0 is distinct from
//! `none`.
//!
//! Swap-class entries carry a 5-bit type in bits 1..5:
//!
//! | Type      | Meaning                          |
//! |-----------|----------------------------------|
//! | `0..=27`  | ordinary swap area               |
//! | `28`/`29` | device-private, read/write       |
//! | `30`/`31` | migration placeholder, read/write |
//!
//! Device-private and migration entries store the frame number as their
//! offset, so reverse mapping can match them against a target frame.

use core::fmt;

use hadron_core::addr::Pfn;

use crate::{Level, PAGE_SHIFT};

/// Physical address mask: bits 12..51 of an entry.
pub const ADDR_MASK: u64 = 0x000F_FFFF_FFFF_F000;

bitflags::bitflags! {
    /// Page table entry flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct EntryFlags: u64 {
        /// Entry is present / valid.
        const PRESENT   = 1 << 0;
        /// Page is writable.
        const WRITABLE  = 1 << 1;
        /// Page is accessible from user mode.
        const USER      = 1 << 2;
        /// Set by hardware on access.
        const ACCESSED  = 1 << 5;
        /// Set by hardware on write.
        const DIRTY     = 1 << 6;
        /// PS bit -- 2 MiB page in a PMD, 1 GiB page in a PUD.
        const HUGE_PAGE = 1 << 7;
        /// Software bit marking a non-present swap-class entry.
        const SWAP      = 1 << 9;
    }
}

const SWAP_TYPE_SHIFT: u32 = 1;
const SWAP_TYPE_MASK: u64 = 0x1F;

const TYPE_DEVICE_READ: u8 = 28;
const TYPE_DEVICE_WRITE: u8 = 29;
const TYPE_MIGRATION_READ: u8 = 30;
const TYPE_MIGRATION_WRITE: u8 = 31;

/// A single page table entry (64 bits).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct PageTableEntry(u64);

impl PageTableEntry {
    /// An empty (`none`) entry.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates a present entry pointing at `pfn` with the given `flags`.
    ///
    /// `PRESENT` is always added.
    pub const fn new(pfn: Pfn, flags: EntryFlags) -> Self {
        Self((pfn.start_address().as_u64() & ADDR_MASK) | flags.bits() | EntryFlags::PRESENT.bits())
    }

    /// Reinterprets a raw 64-bit value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw 64-bit value.
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Returns `true` for the all-zero entry.
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` if the PRESENT bit is set.
    pub const fn is_present(self) -> bool {
        self.0 & EntryFlags::PRESENT.bits() != 0
    }

    /// Returns `true` for a present entry with the PS bit set.
    ///
    /// Only meaningful above the leaf level.
    pub const fn is_huge(self) -> bool {
        self.is_present() && self.0 & EntryFlags::HUGE_PAGE.bits() != 0
    }

    /// Returns `true` for a swap-class entry: neither `none` nor present.
    pub const fn is_swap(self) -> bool {
        !self.is_none() && !self.is_present()
    }

    /// Returns the frame number held in the address bits.
    pub const fn pfn(self) -> Pfn {
        Pfn::new((self.0 & ADDR_MASK) >> PAGE_SHIFT)
    }

    /// Returns the flags portion of this entry.
    pub const fn flags(self) -> EntryFlags {
        EntryFlags::from_bits_truncate(self.0 & !ADDR_MASK)
    }

    /// Decodes a swap-class entry, `None` for `none` and present entries.
    pub const fn swap_entry(self) -> Option<SwapEntry> {
        if !self.is_swap() {
            return None;
        }
        let code = ((self.0 >> SWAP_TYPE_SHIFT) & SWAP_TYPE_MASK) as u8;
        Some(SwapEntry::from_parts(code, (self.0 & ADDR_MASK) >> PAGE_SHIFT))
    }

    /// Decodes this entry as read from a table at `level`.
    pub fn decode(self, level: Level) -> EntrySnapshot {
        if self.is_none() {
            return EntrySnapshot::Empty;
        }
        if self.is_present() {
            return match level {
                Level::Pte => EntrySnapshot::Present(self.pfn()),
                _ if self.is_huge() => EntrySnapshot::Huge(self.pfn()),
                _ => EntrySnapshot::Table(self.pfn()),
            };
        }
        match self.swap_entry() {
            Some(swp) if swp.is_migration() => EntrySnapshot::Migration(swp.pfn()),
            Some(swp) if swp.is_device_private() => EntrySnapshot::Device(swp.pfn()),
            _ => EntrySnapshot::Swap,
        }
    }
}

impl fmt::Debug for PageTableEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageTableEntry({:#x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Swap-class entries
// ---------------------------------------------------------------------------

/// What a swap-class entry stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapKind {
    /// Page contents live in swap area `n`.
    Swap(u8),
    /// Frame owned by a device, not addressable by the CPU.
    DevicePrivate {
        /// Whether the original mapping was writable.
        writable: bool,
    },
    /// Frame is being migrated; faults wait for the migration to finish.
    Migration {
        /// Whether the original mapping was writable.
        writable: bool,
    },
}

/// A decoded swap-class entry: a kind plus a 40-bit offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SwapEntry {
    kind: SwapKind,
    offset: u64,
}

impl SwapEntry {
    /// Number of ordinary swap areas the type field can name.
    pub const MAX_SWAP_AREAS: u8 = TYPE_DEVICE_READ;

    /// An ordinary swap entry.
    pub fn swap(area: u8, offset: u64) -> Self {
        debug_assert!(area < Self::MAX_SWAP_AREAS, "swap area {area} out of range");
        Self {
            kind: SwapKind::Swap(area),
            offset,
        }
    }

    /// A migration placeholder for `pfn`.
    pub const fn migration(pfn: Pfn, writable: bool) -> Self {
        Self {
            kind: SwapKind::Migration { writable },
            offset: pfn.as_u64(),
        }
    }

    /// A device-private entry for `pfn`.
    pub const fn device_private(pfn: Pfn, writable: bool) -> Self {
        Self {
            kind: SwapKind::DevicePrivate { writable },
            offset: pfn.as_u64(),
        }
    }

    const fn from_parts(code: u8, offset: u64) -> Self {
        let kind = match code {
            TYPE_DEVICE_READ => SwapKind::DevicePrivate { writable: false },
            TYPE_DEVICE_WRITE => SwapKind::DevicePrivate { writable: true },
            TYPE_MIGRATION_READ => SwapKind::Migration { writable: false },
            TYPE_MIGRATION_WRITE => SwapKind::Migration { writable: true },
            area => SwapKind::Swap(area),
        };
        Self { kind, offset }
    }

    const fn type_code(self) -> u8 {
        match self.kind {
            SwapKind::Swap(area) => area,
            SwapKind::DevicePrivate { writable: false } => TYPE_DEVICE_READ,
            SwapKind::DevicePrivate { writable: true } => TYPE_DEVICE_WRITE,
            SwapKind::Migration { writable: false } => TYPE_MIGRATION_READ,
            SwapKind::Migration { writable: true } => TYPE_MIGRATION_WRITE,
        }
    }

    /// Returns the entry kind.
    pub const fn kind(self) -> SwapKind {
        self.kind
    }

    /// Returns the raw offset field.
    pub const fn offset(self) -> u64 {
        self.offset
    }

    /// Returns `true` for a migration placeholder.
    pub const fn is_migration(self) -> bool {
        matches!(self.kind, SwapKind::Migration { .. })
    }

    /// Returns `true` for a device-private entry.
    pub const fn is_device_private(self) -> bool {
        matches!(self.kind, SwapKind::DevicePrivate { .. })
    }

    /// Frame number recorded by a migration or device-private entry.
    ///
    /// For ordinary swap entries this is the swap offset reinterpreted, which
    /// is meaningless; check the kind first.
    pub const fn pfn(self) -> Pfn {
        Pfn::new(self.offset)
    }

    /// Encodes this entry into a non-present page-table entry.
    pub const fn to_entry(self) -> PageTableEntry {
        PageTableEntry(
            ((self.offset << PAGE_SHIFT) & ADDR_MASK)
                | ((self.type_code() as u64) << SWAP_TYPE_SHIFT)
                | EntryFlags::SWAP.bits(),
        )
    }
}

// ---------------------------------------------------------------------------
// Decoded snapshot
// ---------------------------------------------------------------------------

/// The decoded meaning of one read of a page-table slot.
///
/// A snapshot taken without the slot's lock is only a hint; see
/// [`crate::walk`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntrySnapshot {
    /// Nothing mapped.
    Empty,
    /// Leaf entry mapping a base page.
    Present(Pfn),
    /// Coarse entry that terminates the hierarchy early (2 MiB / 1 GiB).
    Huge(Pfn),
    /// Coarse entry pointing at a finer table.
    Table(Pfn),
    /// Migration placeholder for the frame.
    Migration(Pfn),
    /// Device-private frame: counts as a mapping though the CPU cannot
    /// access it.
    Device(Pfn),
    /// Any other non-present entry.
    Swap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_entry_is_none() {
        let entry = PageTableEntry::empty();
        assert!(entry.is_none());
        assert!(!entry.is_present());
        assert!(!entry.is_swap());
        assert_eq!(entry.decode(Level::Pte), EntrySnapshot::Empty);
    }

    #[test]
    fn present_entry_keeps_pfn_and_flags() {
        let entry = PageTableEntry::new(Pfn::new(0x1234), EntryFlags::WRITABLE | EntryFlags::USER);
        assert!(entry.is_present());
        assert_eq!(entry.pfn(), Pfn::new(0x1234));
        assert!(entry.flags().contains(EntryFlags::PRESENT | EntryFlags::WRITABLE));
        assert!(!entry.flags().contains(EntryFlags::HUGE_PAGE));
    }

    #[test]
    fn decode_depends_on_level() {
        let leaf = PageTableEntry::new(Pfn::new(0x200), EntryFlags::WRITABLE);
        let huge = PageTableEntry::new(Pfn::new(0x200), EntryFlags::HUGE_PAGE);
        assert_eq!(leaf.decode(Level::Pte), EntrySnapshot::Present(Pfn::new(0x200)));
        assert_eq!(leaf.decode(Level::Pmd), EntrySnapshot::Table(Pfn::new(0x200)));
        assert_eq!(huge.decode(Level::Pmd), EntrySnapshot::Huge(Pfn::new(0x200)));
        assert_eq!(huge.decode(Level::Pud), EntrySnapshot::Huge(Pfn::new(0x200)));
        assert!(huge.is_huge());
        assert!(!leaf.is_huge());
    }

    #[test]
    fn migration_entry_carries_pfn() {
        let entry = SwapEntry::migration(Pfn::new(0xABCDE), true).to_entry();
        assert!(entry.is_swap());
        let swp = entry.swap_entry().unwrap();
        assert!(swp.is_migration());
        assert_eq!(swp.kind(), SwapKind::Migration { writable: true });
        assert_eq!(swp.pfn(), Pfn::new(0xABCDE));
        assert_eq!(entry.decode(Level::Pte), EntrySnapshot::Migration(Pfn::new(0xABCDE)));
        assert_eq!(entry.decode(Level::Pmd), EntrySnapshot::Migration(Pfn::new(0xABCDE)));
    }

    #[test]
    fn device_private_entry_decodes() {
        let entry = SwapEntry::device_private(Pfn::new(0x77), false).to_entry();
        let swp = entry.swap_entry().unwrap();
        assert!(swp.is_device_private());
        assert!(!swp.is_migration());
        assert_eq!(entry.decode(Level::Pte), EntrySnapshot::Device(Pfn::new(0x77)));
    }

    #[test]
    fn swap_area_zero_offset_zero_is_not_none() {
        let entry = SwapEntry::swap(0, 0).to_entry();
        assert!(!entry.is_none());
        assert!(entry.is_swap());
        assert_eq!(entry.swap_entry().unwrap().kind(), SwapKind::Swap(0));
        assert_eq!(entry.decode(Level::Pte), EntrySnapshot::Swap);
    }

    #[test]
    fn swap_type_codes_distinct() {
        let kinds = [
            SwapEntry::swap(27, 1),
            SwapEntry::device_private(Pfn::new(1), false),
            SwapEntry::device_private(Pfn::new(1), true),
            SwapEntry::migration(Pfn::new(1), false),
            SwapEntry::migration(Pfn::new(1), true),
        ];
        for (i, a) in kinds.iter().enumerate() {
            for (j, b) in kinds.iter().enumerate() {
                if i != j {
                    assert_ne!(a.to_entry(), b.to_entry(), "{a:?} and {b:?} encode identically");
                }
            }
        }
    }

    #[test]
    fn present_entry_has_no_swap_entry() {
        let entry = PageTableEntry::new(Pfn::new(5), EntryFlags::empty());
        assert!(entry.swap_entry().is_none());
    }
}

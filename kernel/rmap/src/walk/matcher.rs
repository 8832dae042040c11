//! Deciding whether one entry maps the target.
//!
//! Everything here is a pure function of a decoded entry, the target, and
//! the walk mode. Callers pass a snapshot read under the slot's lock, except
//! for the `*_worth_locking` filters, which exist to screen unlocked reads.

use crate::config::PagingCaps;
use crate::entry::EntrySnapshot;
use crate::page::TargetPage;

use super::WalkFlags;

/// Outcome of checking a locked PMD or PUD entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum CoarseCheck {
    /// A live huge mapping of the target.
    LiveHuge,
    /// A huge migration placeholder for the target.
    MigrationHuge,
    /// The entry now points at a finer table; continue one level down.
    SplitDemoted,
    /// Nothing at this entry maps the target.
    NoMapping,
}

/// Returns `true` if a leaf (or hugetlb) entry maps the target.
pub(super) fn check_pte(target: &TargetPage, flags: WalkFlags, entry: EntrySnapshot) -> bool {
    let pfn = match (entry, flags.contains(WalkFlags::MIGRATION)) {
        (EntrySnapshot::Migration(pfn), true)
        | (
            EntrySnapshot::Present(pfn) | EntrySnapshot::Huge(pfn) | EntrySnapshot::Device(pfn),
            false,
        ) => pfn,
        _ => return false,
    };
    target.pfn_matches(pfn)
}

/// Classifies a PMD entry read under the PMD lock.
pub(super) fn check_pmd(
    target: &TargetPage,
    flags: WalkFlags,
    caps: PagingCaps,
    entry: EntrySnapshot,
) -> CoarseCheck {
    let migration = flags.contains(WalkFlags::MIGRATION);
    match entry {
        EntrySnapshot::Huge(pfn) if caps.transparent_huge && !migration => {
            if target.pfn_matches(pfn) {
                CoarseCheck::LiveHuge
            } else {
                CoarseCheck::NoMapping
            }
        }
        EntrySnapshot::Migration(pfn) if caps.thp_migration && migration => {
            if target.pfn_matches(pfn) {
                CoarseCheck::MigrationHuge
            } else {
                CoarseCheck::NoMapping
            }
        }
        EntrySnapshot::Table(_) => CoarseCheck::SplitDemoted,
        _ => CoarseCheck::NoMapping,
    }
}

/// Classifies a PUD entry read under the PUD lock.
///
/// There are no PUD-level migration placeholders, so a migration walk never
/// matches here.
pub(super) fn check_pud(target: &TargetPage, flags: WalkFlags, entry: EntrySnapshot) -> CoarseCheck {
    match entry {
        EntrySnapshot::Huge(pfn)
            if !flags.contains(WalkFlags::MIGRATION) && target.pfn_matches(pfn) =>
        {
            CoarseCheck::LiveHuge
        }
        EntrySnapshot::Table(_) => CoarseCheck::SplitDemoted,
        _ => CoarseCheck::NoMapping,
    }
}

/// Whether an unlocked read of a leaf slot could possibly match.
///
/// A migration walk only cares about swap-class entries; any other walk
/// wants present entries and device-private placeholders.
pub(super) fn pte_worth_locking(flags: WalkFlags, entry: EntrySnapshot) -> bool {
    if flags.contains(WalkFlags::MIGRATION) {
        matches!(
            entry,
            EntrySnapshot::Migration(_) | EntrySnapshot::Device(_) | EntrySnapshot::Swap
        )
    } else {
        matches!(entry, EntrySnapshot::Present(_) | EntrySnapshot::Device(_))
    }
}

/// Whether an unlocked read of a PMD slot is worth taking the PMD lock for.
pub(super) fn pmd_worth_locking(caps: PagingCaps, entry: EntrySnapshot) -> bool {
    match entry {
        EntrySnapshot::Huge(_) => caps.transparent_huge,
        EntrySnapshot::Migration(_) => true,
        _ => false,
    }
}

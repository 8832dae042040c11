//! Randomized schedules of a split racing a walk.

use shuttle::sync::Arc;
use shuttle::thread;

use hadron_core::addr::{Pfn, VirtAddr};

use super::*;
use crate::config::SpaceConfig;
use crate::entry::EntryFlags;
use crate::space::AddressSpace;
use crate::{HPAGE_PMD_ORDER, PAGE_SIZE, PMD_SIZE};

const VMA: u64 = 0x40_0000_0000;

#[test]
fn split_racing_with_walk() {
    shuttle::check_random(
        || {
            let space = Arc::new(AddressSpace::with_config(SpaceConfig::new(8)));
            let addr = VirtAddr::new(VMA);
            space
                .map_huge_pmd(addr, Pfn::new(0x200), EntryFlags::WRITABLE)
                .unwrap();

            let splitter = {
                let space = Arc::clone(&space);
                thread::spawn(move || space.split_huge_pmd(addr).unwrap())
            };

            let target = TargetPage::transhuge(Pfn::new(0x200), HPAGE_PMD_ORDER, 0);
            let region = AddressRegion::new(&*space, addr, addr + PMD_SIZE, 0);
            let count = count_mappings(&target, &region, WalkFlags::empty(), PagingCaps::x86_64());
            assert!(count == 1 || count == 512, "saw {count} mappings");

            splitter.join().unwrap();
            assert_eq!(space.held_locks(), 0);
        },
        100,
    );
}

#[test]
fn migration_racing_with_walk() {
    shuttle::check_random(
        || {
            let space = Arc::new(AddressSpace::with_config(SpaceConfig::new(8)));
            let addr = VirtAddr::new(VMA);
            for i in 0..4 {
                space
                    .map_page(addr + i * PAGE_SIZE, Pfn::new(0x100 + i), EntryFlags::empty())
                    .unwrap();
            }

            let migrator = {
                let space = Arc::clone(&space);
                thread::spawn(move || {
                    for i in 0..4 {
                        space.migrate_pte(addr + i * PAGE_SIZE).unwrap();
                    }
                })
            };

            let target = TargetPage::transhuge(Pfn::new(0x100), 2, 0);
            let region = AddressRegion::new(&*space, addr, addr + PMD_SIZE, 0);
            let caps = PagingCaps::x86_64();
            let live = count_mappings(&target, &region, WalkFlags::empty(), caps);
            assert!(live <= 4);

            migrator.join().unwrap();
            assert_eq!(count_mappings(&target, &region, WalkFlags::MIGRATION, caps), 4);
            assert_eq!(space.held_locks(), 0);
        },
        100,
    );
}

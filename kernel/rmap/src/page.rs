//! The frame a walk searches for.

use hadron_core::addr::Pfn;

use crate::{HPAGE_PUD_ORDER, PAGE_SIZE};

bitflags::bitflags! {
    /// Allocation class of a target page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageClass: u8 {
        /// Explicit huge page from the hugetlb pool. Mapped by exactly one
        /// huge entry; never split.
        const HUGETLB   = 1 << 0;
        /// Transparently promoted compound page. May be mapped by one huge
        /// entry or piecemeal by many smaller ones after a split.
        const TRANSHUGE = 1 << 1;
    }
}

/// Identity of the physical frame(s) being searched for.
///
/// Immutable for the duration of a walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetPage {
    pfn: Pfn,
    order: u8,
    class: PageClass,
    index: u64,
}

impl TargetPage {
    /// A single base page at logical position `index` (in pages) within its
    /// mapping.
    pub const fn new(pfn: Pfn, index: u64) -> Self {
        Self {
            pfn,
            order: 0,
            class: PageClass::empty(),
            index,
        }
    }

    /// A transparently huge compound page of `2^order` frames.
    pub fn transhuge(pfn: Pfn, order: u8, index: u64) -> Self {
        debug_assert!(order > 0, "a transparent huge page spans more than one frame");
        debug_assert!(order <= HPAGE_PUD_ORDER, "order {order} exceeds a PUD mapping");
        Self {
            pfn,
            order,
            class: PageClass::TRANSHUGE,
            index,
        }
    }

    /// A hugetlb page of `2^order` frames.
    pub fn hugetlb(pfn: Pfn, order: u8, index: u64) -> Self {
        debug_assert!(order > 0, "a hugetlb page spans more than one frame");
        debug_assert!(order <= HPAGE_PUD_ORDER, "order {order} exceeds a PUD mapping");
        Self {
            pfn,
            order,
            class: PageClass::HUGETLB,
            index,
        }
    }

    /// Base (head) frame number.
    pub const fn pfn(&self) -> Pfn {
        self.pfn
    }

    /// Compound order.
    pub const fn order(&self) -> u8 {
        self.order
    }

    /// Allocation class.
    pub const fn class(&self) -> PageClass {
        self.class
    }

    /// Logical position within the mapping, in base pages.
    pub const fn index(&self) -> u64 {
        self.index
    }

    /// Number of base frames.
    pub const fn nr_pages(&self) -> u64 {
        1 << self.order
    }

    /// Size in bytes.
    pub const fn size(&self) -> u64 {
        self.nr_pages() * PAGE_SIZE
    }

    /// Returns `true` for hugetlb pages.
    pub const fn is_hugetlb(&self) -> bool {
        self.class.contains(PageClass::HUGETLB)
    }

    /// Returns `true` for a transparent huge page head.
    pub const fn is_transhuge(&self) -> bool {
        self.class.contains(PageClass::TRANSHUGE) && self.order > 0
    }

    /// Returns `true` if `pfn` is one of this page's frames.
    ///
    /// Any sub-frame of a compound page counts: callers act on the compound
    /// unit, so a leaf entry mapping any part of it is a mapping of the page.
    pub fn pfn_matches(&self, pfn: Pfn) -> bool {
        pfn.offset_from(self.pfn)
            .is_some_and(|off| off < self.nr_pages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HPAGE_PMD_ORDER;

    #[test]
    fn single_page_matches_only_itself() {
        let page = TargetPage::new(Pfn::new(0x1000), 7);
        assert!(page.pfn_matches(Pfn::new(0x1000)));
        assert!(!page.pfn_matches(Pfn::new(0x1001)));
        assert!(!page.pfn_matches(Pfn::new(0xFFF)));
        assert_eq!(page.nr_pages(), 1);
        assert!(!page.is_transhuge());
        assert!(!page.is_hugetlb());
    }

    #[test]
    fn thp_matches_every_subpage() {
        let page = TargetPage::transhuge(Pfn::new(0x200), HPAGE_PMD_ORDER, 0);
        assert!(page.is_transhuge());
        assert_eq!(page.nr_pages(), 512);
        assert_eq!(page.size(), crate::PMD_SIZE);
        assert!(page.pfn_matches(Pfn::new(0x200)));
        assert!(page.pfn_matches(Pfn::new(0x200 + 511)));
        assert!(!page.pfn_matches(Pfn::new(0x200 + 512)));
        assert!(!page.pfn_matches(Pfn::new(0x1FF)));
    }

    #[test]
    fn hugetlb_class() {
        let page = TargetPage::hugetlb(Pfn::new(0x400), HPAGE_PMD_ORDER, 0);
        assert!(page.is_hugetlb());
        assert!(!page.is_transhuge());
        assert_eq!(page.class(), PageClass::HUGETLB);
    }

    #[test]
    fn largest_order_is_pud_sized() {
        let page = TargetPage::transhuge(Pfn::new(0x4_0000), HPAGE_PUD_ORDER, 0);
        assert_eq!(page.size(), crate::PUD_SIZE);
    }

    #[test]
    #[should_panic(expected = "exceeds a PUD mapping")]
    fn oversized_order_rejected() {
        let _ = TargetPage::hugetlb(Pfn::new(0), 64, 0);
    }
}

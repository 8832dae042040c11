//! The virtual memory area a walk searches.

use core::fmt;

use hadron_core::addr::VirtAddr;

use crate::page::TargetPage;
use crate::{PAGE_SHIFT, PAGE_SIZE};

/// A virtual memory area `[start, end)` of one address space.
///
/// `pgoff` is the position (in pages) within the backing file or anonymous
/// object that `start` maps; it translates a page's logical index into the
/// only virtual address where this region can map it. The walker only reads
/// a region.
pub struct AddressRegion<'a, S: ?Sized> {
    start: VirtAddr,
    end: VirtAddr,
    pgoff: u64,
    space: &'a S,
}

impl<S: ?Sized> Clone for AddressRegion<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S: ?Sized> Copy for AddressRegion<'_, S> {}

impl<'a, S: ?Sized> AddressRegion<'a, S> {
    /// Creates a region over `[start, end)` of `space`.
    ///
    /// Both bounds must be page aligned and `start < end`.
    pub fn new(space: &'a S, start: VirtAddr, end: VirtAddr, pgoff: u64) -> Self {
        debug_assert!(start.is_aligned(PAGE_SIZE) && end.is_aligned(PAGE_SIZE));
        debug_assert!(start < end, "empty region {start}..{end}");
        Self {
            start,
            end,
            pgoff,
            space,
        }
    }

    /// First address of the region.
    pub const fn start(&self) -> VirtAddr {
        self.start
    }

    /// One past the last address of the region.
    pub const fn end(&self) -> VirtAddr {
        self.end
    }

    /// Mapping offset of `start`, in pages.
    pub const fn pgoff(&self) -> u64 {
        self.pgoff
    }

    /// The address space this region belongs to.
    pub const fn space(&self) -> &'a S {
        self.space
    }

    /// Size in bytes.
    pub fn len(&self) -> u64 {
        self.end - self.start
    }

    /// Returns `true` if `addr` lies inside the region.
    pub fn contains(&self, addr: VirtAddr) -> bool {
        self.start <= addr && addr < self.end
    }

    /// The virtual address at which this region would map the first frame
    /// of `page`.
    ///
    /// `None` when the page's index precedes the region's offset or the
    /// address would fall outside the canonical lower half. The result may
    /// lie beyond `end`; callers check.
    pub fn vma_address(&self, page: &TargetPage) -> Option<VirtAddr> {
        let pages = page.index().checked_sub(self.pgoff)?;
        let offset = pages.checked_mul(1 << PAGE_SHIFT)?;
        self.start.checked_add(offset)
    }

    /// One past the last address at which this region would map a frame of
    /// `page`, as a raw address.
    ///
    /// Unlike [`vma_address`](Self::vma_address) this is defined for a
    /// compound page whose head precedes the region's offset but whose tail
    /// does not. `None` when no frame of `page` falls at or after `pgoff`.
    pub fn vma_span_end(&self, page: &TargetPage) -> Option<u64> {
        let end_index = page.index().checked_add(page.nr_pages())?;
        let pages = end_index.checked_sub(self.pgoff).filter(|&n| n > 0)?;
        self.start.as_u64().checked_add(pages.checked_mul(PAGE_SIZE)?)
    }

    /// First address in the region at which a frame of `page` could be
    /// mapped, which may lie at or beyond `end`.
    pub fn first_address(&self, page: &TargetPage) -> Option<VirtAddr> {
        self.vma_span_end(page)?;
        if page.index() < self.pgoff {
            Some(self.start)
        } else {
            self.vma_address(page)
        }
    }
}

impl<S: ?Sized> fmt::Debug for AddressRegion<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressRegion")
            .field("start", &self.start)
            .field("end", &self.end)
            .field("pgoff", &self.pgoff)
            .finish_non_exhaustive()
    }
}

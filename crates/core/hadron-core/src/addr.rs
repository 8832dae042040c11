//! Typed virtual address, physical address, and frame number wrappers.
//!
//! [`VirtAddr`] and [`PhysAddr`] prevent mixing the two address spaces at the
//! type level; [`Pfn`] names a physical frame by number, which is what
//! page-table entries and reverse-mapping lookups compare.

use core::fmt;
use core::ops::{Add, Sub};

/// Base page shift (4 KiB frames).
pub const FRAME_SHIFT: u32 = 12;

/// Physical address space mask: bits 0..51.
const PHYS_ADDR_MASK: u64 = 0x000F_FFFF_FFFF_FFFF;

/// A canonical 64-bit virtual address.
///
/// With 4-level paging, bits 48..63 must be a sign-extension of bit 47.
/// This type enforces that invariant via sign-extension from bit 47.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct VirtAddr(u64);

impl VirtAddr {
    /// Creates a new `VirtAddr`. Panics if the address is not canonical.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        let canonical = Self::new_truncate(addr);
        assert!(
            canonical.0 == addr,
            "VirtAddr::new: address is not canonical"
        );
        canonical
    }

    /// Creates a new `VirtAddr`, truncating to canonical form by
    /// sign-extending from bit 47.
    #[inline]
    pub const fn new_truncate(addr: u64) -> Self {
        Self((((addr << 16) as i64) >> 16) as u64)
    }

    /// Returns the raw `u64` value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` if the address is aligned to `align`.
    ///
    /// `align` must be a power of two.
    #[inline]
    pub const fn is_aligned(self, align: u64) -> bool {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 & (align - 1) == 0
    }

    /// Aligns the address down to `align`.
    ///
    /// `align` must be a power of two.
    #[inline]
    pub const fn align_down(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self::new_truncate(self.0 & !(align - 1))
    }

    /// Aligns the address up to `align`.
    ///
    /// `align` must be a power of two.
    #[inline]
    pub const fn align_up(self, align: u64) -> Self {
        debug_assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self::new_truncate((self.0 + align - 1) & !(align - 1))
    }

    /// Adds `rhs` bytes, returning `None` if the result leaves the lower
    /// canonical half or wraps.
    #[inline]
    pub const fn checked_add(self, rhs: u64) -> Option<Self> {
        match self.0.checked_add(rhs) {
            Some(v) if Self::new_truncate(v).0 == v => Some(Self(v)),
            _ => None,
        }
    }
}

impl Add<u64> for VirtAddr {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self::new_truncate(self.0.wrapping_add(rhs))
    }
}

impl Sub<u64> for VirtAddr {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: u64) -> Self {
        Self::new_truncate(self.0.wrapping_sub(rhs))
    }
}

impl Sub<VirtAddr> for VirtAddr {
    type Output = u64;
    #[inline]
    fn sub(self, rhs: VirtAddr) -> u64 {
        self.0.wrapping_sub(rhs.0)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::LowerHex for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

// ---------------------------------------------------------------------------
// PhysAddr
// ---------------------------------------------------------------------------

/// A 64-bit physical address (masked to 52 bits).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PhysAddr(u64);

impl PhysAddr {
    /// Creates a new `PhysAddr`, masking to the 52-bit physical address space.
    /// Panics in debug mode if bits above 52 are set.
    #[inline]
    pub const fn new(addr: u64) -> Self {
        let masked = addr & PHYS_ADDR_MASK;
        debug_assert!(
            masked == addr,
            "PhysAddr::new: address exceeds 52-bit physical address space"
        );
        Self(masked)
    }

    /// Creates a new `PhysAddr`, truncating to the 52-bit physical address
    /// space.
    #[inline]
    pub const fn new_truncate(addr: u64) -> Self {
        Self(addr & PHYS_ADDR_MASK)
    }

    /// Returns the raw `u64` value.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PhysAddr({:#x})", self.0)
    }
}

// ---------------------------------------------------------------------------
// Pfn
// ---------------------------------------------------------------------------

/// A physical frame number: the physical address shifted right by
/// [`FRAME_SHIFT`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Pfn(u64);

/// Largest representable frame number (52-bit physical addresses).
const MAX_PFN: u64 = PHYS_ADDR_MASK >> FRAME_SHIFT;

impl Pfn {
    /// Creates a frame number. Panics in debug mode if it exceeds the
    /// physical address space.
    #[inline]
    pub const fn new(pfn: u64) -> Self {
        debug_assert!(pfn <= MAX_PFN, "Pfn::new: frame number out of range");
        Self(pfn & MAX_PFN)
    }

    /// Returns the frame containing `addr`.
    #[inline]
    pub const fn containing(addr: PhysAddr) -> Self {
        Self(addr.0 >> FRAME_SHIFT)
    }

    /// Returns the raw frame number.
    #[inline]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the physical address of the first byte of this frame.
    #[inline]
    pub const fn start_address(self) -> PhysAddr {
        PhysAddr(self.0 << FRAME_SHIFT)
    }

    /// Returns how many frames `self` lies above `base`, or `None` if it is
    /// below it.
    #[inline]
    pub const fn offset_from(self, base: Pfn) -> Option<u64> {
        self.0.checked_sub(base.0)
    }
}

impl Add<u64> for Pfn {
    type Output = Self;
    #[inline]
    fn add(self, rhs: u64) -> Self {
        Self::new(self.0 + rhs)
    }
}

impl fmt::Debug for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pfn({:#x})", self.0)
    }
}

impl fmt::Display for Pfn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn virt_canonical_lower_half() {
        let addr = VirtAddr::new(0x7FFF_FFFF_F000);
        assert_eq!(addr.as_u64(), 0x7FFF_FFFF_F000);
    }

    #[test]
    fn virt_truncate_sign_extends() {
        let addr = VirtAddr::new_truncate(0x8000_0000_0000);
        assert_eq!(addr.as_u64(), 0xFFFF_8000_0000_0000);
    }

    #[test]
    #[should_panic(expected = "not canonical")]
    fn virt_new_rejects_non_canonical() {
        let _ = VirtAddr::new(0x8000_0000_0000);
    }

    #[test]
    fn virt_alignment() {
        let addr = VirtAddr::new(0x20_1234);
        assert!(!addr.is_aligned(0x1000));
        assert_eq!(addr.align_down(0x1000).as_u64(), 0x20_1000);
        assert_eq!(addr.align_up(0x20_0000).as_u64(), 0x40_0000);
        assert!(VirtAddr::new(0x40_0000).is_aligned(0x20_0000));
    }

    #[test]
    fn virt_checked_add_stops_at_canonical_hole() {
        let top = VirtAddr::new(0x7FFF_FFFF_F000);
        assert!(top.checked_add(0x1000).is_none());
        assert_eq!(
            VirtAddr::new(0x1000).checked_add(0x1000),
            Some(VirtAddr::new(0x2000))
        );
    }

    #[test]
    fn virt_difference() {
        assert_eq!(VirtAddr::new(0x5000) - VirtAddr::new(0x2000), 0x3000);
    }

    #[test]
    fn pfn_address_conversions() {
        let pfn = Pfn::containing(PhysAddr::new(0x1234_5678));
        assert_eq!(pfn.as_u64(), 0x12345);
        assert_eq!(pfn.start_address().as_u64(), 0x1234_5000);
    }

    #[test]
    fn pfn_offset_from() {
        let base = Pfn::new(0x200);
        assert_eq!((base + 7).offset_from(base), Some(7));
        assert_eq!(Pfn::new(0x1FF).offset_from(base), None);
    }
}

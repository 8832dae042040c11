//! Walker capabilities and address-space configuration.
//!
//! Which huge-mapping forms a platform supports is passed explicitly as a
//! [`PagingCaps`] descriptor rather than read from global feature flags, so
//! one build can walk tables for differently-configured address spaces (and
//! tests can cover every combination).

use planck_noalloc::vec::ArrayVec;

use crate::space::MapError;
use crate::{PMD_SIZE, PUD_SIZE};

/// Huge-mapping capabilities of the platform whose tables are being walked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagingCaps {
    /// Anonymous/file memory may be mapped by huge PMD entries (THP).
    pub transparent_huge: bool,
    /// THP may also be mapped by huge PUD entries.
    pub pud_transparent_huge: bool,
    /// PMD-level migration placeholders exist (THP migrated without split).
    pub thp_migration: bool,
}

impl PagingCaps {
    /// No huge-mapping support beyond hugetlb.
    pub const NONE: Self = Self {
        transparent_huge: false,
        pud_transparent_huge: false,
        thp_migration: false,
    };

    /// Capabilities of an x86_64 kernel with THP, PUD THP, and THP
    /// migration enabled.
    pub const fn x86_64() -> Self {
        Self {
            transparent_huge: true,
            pud_transparent_huge: true,
            thp_migration: true,
        }
    }

    /// Returns a copy with PUD-level THP enabled or disabled.
    #[must_use]
    pub const fn with_pud_transparent_huge(mut self, enabled: bool) -> Self {
        self.pud_transparent_huge = enabled;
        self
    }

    /// Returns a copy with PMD migration entries enabled or disabled.
    #[must_use]
    pub const fn with_thp_migration(mut self, enabled: bool) -> Self {
        self.thp_migration = enabled;
        self
    }
}

impl Default for PagingCaps {
    fn default() -> Self {
        Self::x86_64()
    }
}

/// Maximum number of distinct hugetlb page sizes an address space supports.
pub const MAX_HUGETLB_SIZES: usize = 4;

/// Default page-table pool capacity, in tables.
pub const DEFAULT_MAX_TABLES: usize = 64;

/// Construction parameters for an [`AddressSpace`](crate::AddressSpace).
#[derive(Debug)]
pub struct SpaceConfig {
    /// Number of page tables (root included) the address space may allocate.
    pub max_tables: usize,
    hugetlb_sizes: ArrayVec<u64, MAX_HUGETLB_SIZES>,
}

impl SpaceConfig {
    /// Creates a configuration with room for `max_tables` tables and no
    /// hugetlb sizes.
    pub fn new(max_tables: usize) -> Self {
        Self {
            max_tables,
            hugetlb_sizes: ArrayVec::new(),
        }
    }

    /// Registers a hugetlb page size.
    ///
    /// Only PMD- and PUD-sized hugetlb pages can be described by this
    /// hierarchy.
    pub fn with_hugetlb_size(mut self, size: u64) -> Result<Self, MapError> {
        if size != PMD_SIZE && size != PUD_SIZE {
            return Err(MapError::SizeMismatch);
        }
        if !self.supports_hugetlb(size) {
            if self.hugetlb_sizes.is_full() {
                return Err(MapError::SizeMismatch);
            }
            self.hugetlb_sizes.push(size);
        }
        Ok(self)
    }

    /// Returns `true` if hugetlb pages of `size` bytes are supported.
    pub fn supports_hugetlb(&self, size: u64) -> bool {
        self.hugetlb_sizes.as_slice().contains(&size)
    }

    /// Registered hugetlb sizes, in registration order.
    pub fn hugetlb_sizes(&self) -> &[u64] {
        self.hugetlb_sizes.as_slice()
    }
}

impl Default for SpaceConfig {
    /// [`DEFAULT_MAX_TABLES`] tables, 2 MiB and 1 GiB hugetlb pages.
    fn default() -> Self {
        let mut hugetlb_sizes = ArrayVec::new();
        hugetlb_sizes.push(PMD_SIZE);
        hugetlb_sizes.push(PUD_SIZE);
        Self {
            max_tables: DEFAULT_MAX_TABLES,
            hugetlb_sizes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_enable_everything() {
        let caps = PagingCaps::default();
        assert!(caps.transparent_huge);
        assert!(caps.pud_transparent_huge);
        assert!(caps.thp_migration);
    }

    #[test]
    fn caps_builders() {
        let caps = PagingCaps::x86_64()
            .with_pud_transparent_huge(false)
            .with_thp_migration(false);
        assert!(caps.transparent_huge);
        assert!(!caps.pud_transparent_huge);
        assert!(!caps.thp_migration);
        assert_ne!(caps, PagingCaps::NONE);
    }

    #[test]
    fn default_space_supports_both_hugetlb_sizes() {
        let config = SpaceConfig::default();
        assert!(config.supports_hugetlb(PMD_SIZE));
        assert!(config.supports_hugetlb(PUD_SIZE));
        assert_eq!(config.max_tables, DEFAULT_MAX_TABLES);
    }

    #[test]
    fn hugetlb_size_registration() {
        let config = SpaceConfig::new(8).with_hugetlb_size(PMD_SIZE).unwrap();
        assert!(config.supports_hugetlb(PMD_SIZE));
        assert!(!config.supports_hugetlb(PUD_SIZE));

        let config = config.with_hugetlb_size(PMD_SIZE).unwrap();
        assert_eq!(config.hugetlb_sizes(), &[PMD_SIZE]);

        assert_eq!(
            SpaceConfig::new(8).with_hugetlb_size(0x1_0000).unwrap_err(),
            MapError::SizeMismatch
        );
    }
}

//! Compile-time configuration of the I/O virtual address layout.

use crate::address::IoVirtualAddress;

/// Number of bits in an IOMMU page offset.
pub const PAGE_SHIFT: u32 = 12;

/// IOMMU page size in bytes. This is the smallest unit the pool hands out and the smallest
/// translation the hardware installs.
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;

/// Largest alignment order the mapping engine requests from the pool (1 MiB).
///
/// Large buffers are not aligned to their own size; past 1 MiB the fragmentation cost of
/// coarser alignment outweighs the saving in IOMMU entries.
pub const MAX_POOL_ALIGNMENT_ORDER: u32 = 20;

/// The range of I/O virtual addresses one device may be handed.
///
/// Every registered device gets its own independent copy of the window; windows of
/// different devices may (and by default do) overlap because they live in different
/// translation domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovaWindow {
    base: IoVirtualAddress,
    size: usize,
}

impl IovaWindow {
    /// The window every device gets unless configured otherwise: `0x8000_0000`, 512 MiB.
    pub const DEFAULT: Self = Self::new(IoVirtualAddress::new(0x8000_0000), 0x2000_0000);

    /// Creates a window.
    ///
    /// # Panics
    ///
    /// Panics if `base` or `size` is not page-aligned, if the window is empty, if it contains
    /// the null address, or if its end address is not representable.
    pub const fn new(base: IoVirtualAddress, size: usize) -> Self {
        assert!(base.is_aligned(PAGE_SIZE), "window base must be page-aligned");
        assert!(size % PAGE_SIZE == 0, "window size must be page-aligned");
        assert!(size != 0, "window must not be empty");
        assert!(!base.is_null(), "window must not contain the null address");
        assert!(
            base.as_usize().checked_add(size).is_some(),
            "window must end inside the address space"
        );
        Self { base, size }
    }

    /// Returns the first address of the window.
    pub const fn base(&self) -> IoVirtualAddress {
        self.base
    }

    /// Returns the window size in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the end address (exclusive) of the window.
    pub const fn end(&self) -> IoVirtualAddress {
        IoVirtualAddress::new(self.base.as_usize() + self.size)
    }
}

impl Default for IovaWindow {
    fn default() -> Self {
        Self::DEFAULT
    }
}

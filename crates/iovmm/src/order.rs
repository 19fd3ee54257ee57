//! Base-2 orders.
//!
//! An order is the exponent of a power of two. Orders describe both alignments ("this address
//! is divisible by `2^n`") and chunk sizes ("this mapping covers `2^n` bytes"); the mapping
//! engine compares the two directly, so they share a type.

use core::fmt;

use crate::config::PAGE_SHIFT;

/// The exponent of a power of two.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct Order(u32);

impl Order {
    /// The order reported for the value zero, which every power of two divides.
    pub const UNBOUNDED: Self = Self(usize::BITS);

    /// The order of a single IOMMU page.
    pub const PAGE: Self = Self(PAGE_SHIFT);

    /// Creates an order from a raw exponent.
    #[inline]
    pub const fn new(exponent: u32) -> Self {
        Self(exponent)
    }

    /// Returns the raw exponent.
    #[inline]
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `2^order` in bytes.
    ///
    /// # Panics
    ///
    /// Panics if the order is [`Order::UNBOUNDED`].
    #[inline]
    pub const fn bytes(self) -> usize {
        assert!(self.0 < usize::BITS, "unbounded order has no byte size");
        1 << self.0
    }

    /// Index of the lowest set bit (`ffs` semantics, zero-based).
    ///
    /// This is the order of the largest power of two that divides `value`.
    #[inline]
    pub const fn lowest_set(value: usize) -> Self {
        Self(value.trailing_zeros())
    }

    /// Index of the highest set bit (`fls` semantics, zero-based).
    ///
    /// This is the order of the largest power of two that does not exceed `value`.
    ///
    /// # Panics
    ///
    /// Panics if `value` is zero.
    #[inline]
    pub const fn highest_set(value: usize) -> Self {
        assert!(value != 0, "highest set bit of zero is undefined");
        Self(usize::BITS - 1 - value.leading_zeros())
    }

    /// Returns the order in pages, as IOMMU page-table interfaces take it.
    ///
    /// # Panics
    ///
    /// Panics if the order is smaller than a page.
    #[inline]
    pub const fn page_order(self) -> u32 {
        assert!(self.0 >= PAGE_SHIFT, "order is smaller than a page");
        self.0 - PAGE_SHIFT
    }
}

impl fmt::Debug for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Order({})", self.0)
    }
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

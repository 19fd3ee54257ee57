//! Address types for the two sides of an IOMMU translation.
//!
//! A [`PhysicalAddress`] is what the CPU and the memory controller see; an
//! [`IoVirtualAddress`] is what a DMA-capable device issues on the bus and what the IOMMU
//! translates. Both carry the same alignment helpers so the mapping engine can reason about
//! them symmetrically.

use core::fmt;
use core::ops::{Add, Sub};

use crate::config::PAGE_SIZE;
use crate::order::Order;

/// Macro to define common address type functionality.
///
/// Both address kinds are plain `usize` newtypes; the macro keeps their arithmetic and
/// alignment helpers in lockstep.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(usize);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: usize) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_usize(self) -> usize {
                self.0
            }

            /// Checks if the address is aligned to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn is_aligned(self, align: usize) -> bool {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                self.0 & (align - 1) == 0
            }

            /// Aligns the address down to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_down(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self(self.0 & !(align - 1))
            }

            /// Aligns the address up to the given alignment.
            ///
            /// # Panics
            ///
            /// Panics if `align` is not a power of two.
            #[inline]
            pub const fn align_up(self, align: usize) -> Self {
                assert!(align.is_power_of_two(), "alignment must be a power of two");
                Self((self.0 + align - 1) & !(align - 1))
            }

            /// Returns the byte offset of this address within its IOMMU page.
            #[inline]
            pub const fn page_offset(self) -> usize {
                self.0 & (PAGE_SIZE - 1)
            }

            /// Rounds the address down to the start of its IOMMU page.
            #[inline]
            pub const fn page_floor(self) -> Self {
                Self(self.0 & !(PAGE_SIZE - 1))
            }

            /// Returns the order of the largest power of two dividing this address.
            ///
            /// The zero address is divisible by every power of two and reports
            /// [`Order::UNBOUNDED`].
            #[inline]
            pub const fn alignment_order(self) -> Order {
                Order::lowest_set(self.0)
            }
        }

        impl fmt::Pointer for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:p}", self.0 as *const u8)
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl From<usize> for $name {
            #[inline]
            fn from(addr: usize) -> Self {
                Self::new(addr)
            }
        }

        impl From<$name> for usize {
            #[inline]
            fn from(addr: $name) -> Self {
                addr.0
            }
        }

        impl Add<usize> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: usize) -> Self::Output {
                Self(self.0 + rhs)
            }
        }

        impl Sub<usize> for $name {
            type Output = Self;

            #[inline]
            fn sub(self, rhs: usize) -> Self::Output {
                Self(self.0 - rhs)
            }
        }

        impl Sub<$name> for $name {
            type Output = usize;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    PhysicalAddress,
    "A physical memory address.\n\n\
     Scatter-gather segments describe DMA buffers in terms of physical addresses. The\n\
     manager never allocates or touches physical memory, it only arranges it."
);

impl_address_common!(
    IoVirtualAddress,
    "An I/O virtual address (IOVA).\n\n\
     The device-visible side of an IOMMU translation. Addresses handed out by the manager\n\
     always fall inside the device's [`IovaWindow`](crate::IovaWindow)."
);

impl IoVirtualAddress {
    /// The failure sentinel returned by [`Iovmm::map`](crate::Iovmm::map).
    pub const NULL: Self = Self(0);

    /// Returns true if this is the failure sentinel.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Rounds a byte count up to a whole number of IOMMU pages.
#[inline]
pub const fn page_align(size: usize) -> usize {
    (size + PAGE_SIZE - 1) & !(PAGE_SIZE - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_offset_and_floor() {
        let addr = PhysicalAddress::new(0x1004);
        assert_eq!(addr.page_offset(), 0x004);
        assert_eq!(addr.page_floor(), PhysicalAddress::new(0x1000));
    }

    #[test]
    fn align_up_and_down() {
        let addr = IoVirtualAddress::new(0x8000_1234);
        assert_eq!(addr.align_down(0x1000).as_usize(), 0x8000_1000);
        assert_eq!(addr.align_up(0x1000).as_usize(), 0x8000_2000);
        assert!(addr.align_up(0x10_0000).is_aligned(0x10_0000));
    }

    #[test]
    fn alignment_order_of_addresses() {
        assert_eq!(PhysicalAddress::new(0x10_0000).alignment_order().get(), 20);
        assert_eq!(IoVirtualAddress::new(0x8010_0000).alignment_order().get(), 20);
        assert_eq!(PhysicalAddress::new(0).alignment_order(), Order::UNBOUNDED);
    }

    #[test]
    fn page_align_rounds_up() {
        assert_eq!(page_align(0), 0);
        assert_eq!(page_align(1), PAGE_SIZE);
        assert_eq!(page_align(PAGE_SIZE), PAGE_SIZE);
        assert_eq!(page_align(0x2004), 0x3000);
    }

    #[test]
    fn null_sentinel() {
        assert!(IoVirtualAddress::NULL.is_null());
        assert!(!IoVirtualAddress::new(0x8000_0000).is_null());
        assert_eq!(format!("{}", IoVirtualAddress::new(0x8000_0004)), "0x80000004");
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x1000)),
            "PhysicalAddress(0x1000)"
        );
    }
}

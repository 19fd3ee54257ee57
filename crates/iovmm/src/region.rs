//! Tracking of live mappings.
//!
//! A region is what one successful map produced: the address handed back to the caller
//! (which keeps the buffer's sub-page offset) and the number of bytes reserved for it.
//! Unmap only receives the address, so the tracker is what recovers the size.

use alloc::collections::TryReserveError;
use alloc::vec::Vec;

use crate::address::IoVirtualAddress;
use crate::pool::IovaRange;

/// One live mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    start: IoVirtualAddress,
    size: usize,
}

impl Region {
    /// Creates a region starting at the caller-visible address `start`.
    pub const fn new(start: IoVirtualAddress, size: usize) -> Self {
        Self { start, size }
    }

    /// Returns the address handed to the caller, including the sub-page offset.
    pub const fn start(&self) -> IoVirtualAddress {
        self.start
    }

    /// Returns the number of bytes reserved, a whole number of pages.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the page-aligned block this region occupies in the pool.
    pub const fn reservation(&self) -> IovaRange {
        IovaRange::new(self.start.page_floor(), self.size)
    }
}

/// Live regions of one address space, sorted by caller-visible start address.
///
/// Storage for a region is reserved with [`reserve`](Self::reserve) before anything is
/// mapped, so recording a finished mapping never allocates.
#[derive(Debug, Default)]
pub struct RegionTracker {
    regions: Vec<Region>,
}

impl RegionTracker {
    /// Creates an empty tracker.
    pub const fn new() -> Self {
        Self {
            regions: Vec::new(),
        }
    }

    /// Makes room for one more region.
    pub fn reserve(&mut self) -> Result<(), TryReserveError> {
        self.regions.try_reserve(1)
    }

    /// Records a new region in storage obtained from [`reserve`](Self::reserve).
    ///
    /// Regions never overlap: the pool never hands out the same block twice.
    pub fn insert(&mut self, region: Region) {
        debug_assert!(
            self.regions.len() < self.regions.capacity(),
            "region inserted without a reservation"
        );

        let index = self
            .regions
            .partition_point(|r| r.start() < region.start());
        debug_assert!(
            !self.overlaps_neighbours(index, &region.reservation()),
            "region {:?} overlaps a live region",
            region
        );
        self.regions.insert(index, region);
    }

    /// Removes and returns the region whose start is exactly `start`.
    pub fn take(&mut self, start: IoVirtualAddress) -> Option<Region> {
        let index = self
            .regions
            .binary_search_by_key(&start, Region::start)
            .ok()?;
        Some(self.regions.remove(index))
    }

    /// Returns the number of live regions.
    pub fn len(&self) -> usize {
        self.regions.len()
    }

    /// Returns true if no regions are live.
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Returns the total number of bytes reserved by live regions.
    pub fn reserved_bytes(&self) -> usize {
        self.regions.iter().map(Region::size).sum()
    }

    /// Removes every region, yielding them in address order.
    pub fn drain(&mut self) -> impl Iterator<Item = Region> {
        core::mem::take(&mut self.regions).into_iter()
    }

    fn overlaps_neighbours(&self, index: usize, range: &IovaRange) -> bool {
        let before = index.checked_sub(1).and_then(|i| self.regions.get(i));
        let after = self.regions.get(index);
        before
            .into_iter()
            .chain(after)
            .any(|r| r.reservation().overlaps(range))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reservation_drops_sub_page_offset() {
        let region = Region::new(IoVirtualAddress::new(0x8000_0004), 0x3000);
        let reservation = region.reservation();
        assert_eq!(reservation.base().as_usize(), 0x8000_0000);
        assert_eq!(reservation.size(), 0x3000);
    }

    #[test]
    fn lookup_is_by_exact_start() {
        let mut tracker = RegionTracker::new();
        tracker.reserve().unwrap();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_0004), 0x2000));

        assert!(tracker.take(IoVirtualAddress::new(0x8000_0000)).is_none());

        let region = tracker.take(IoVirtualAddress::new(0x8000_0004)).unwrap();
        assert_eq!(region.size(), 0x2000);
        assert!(tracker.is_empty());
    }

    #[test]
    fn drain_empties_tracker_in_address_order() {
        let mut tracker = RegionTracker::new();
        tracker.reserve().unwrap();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_4000), 0x1000));
        tracker.reserve().unwrap();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_0000), 0x2000));
        assert_eq!(tracker.reserved_bytes(), 0x3000);

        let drained: Vec<_> = tracker.drain().map(|r| r.start().as_usize()).collect();
        assert_eq!(drained, [0x8000_0000, 0x8000_4000]);
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn overlapping_insert_is_caught() {
        let mut tracker = RegionTracker::new();
        tracker.reserve().unwrap();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_0000), 0x2000));
        tracker.reserve().unwrap();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_1010), 0x1000));
    }

    #[test]
    fn insert_after_reserve_does_not_allocate() {
        let mut tracker = RegionTracker::new();
        for i in 0..8 {
            tracker.reserve().unwrap();
            let capacity = tracker.regions.capacity();
            tracker.insert(Region::new(IoVirtualAddress::new(0x8000_0000 + i * 0x2000), 0x1000));
            assert_eq!(tracker.regions.capacity(), capacity);
        }
        assert_eq!(tracker.len(), 8);
    }

    #[test]
    #[should_panic]
    #[cfg(debug_assertions)]
    fn insert_without_reserve_is_caught() {
        let mut tracker = RegionTracker::new();
        tracker.insert(Region::new(IoVirtualAddress::new(0x8000_0000), 0x1000));
    }
}

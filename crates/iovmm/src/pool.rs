//! I/O virtual address pool.
//!
//! Each address space owns one pool covering its [`IovaWindow`]. The pool keeps a sorted list
//! of free ranges, coalescing neighbours on free, and satisfies requests first-fit at a
//! caller-chosen power-of-two alignment. It does no locking of its own; the owning address
//! space serialises every call.

use alloc::vec::Vec;

use crate::address::IoVirtualAddress;
use crate::config::IovaWindow;
use crate::human_size::HumanSize;
use crate::order::Order;

/// Errors that can occur during pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolError {
    /// No free range can hold the request at the requested alignment.
    Exhausted,
    /// Bookkeeping storage for the free list could not be allocated.
    OutOfMemory,
    /// A zero-byte range was requested.
    ZeroSize,
}

/// A contiguous range of I/O virtual addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IovaRange {
    base: IoVirtualAddress,
    size: usize,
}

impl IovaRange {
    /// Creates a new range.
    pub const fn new(base: IoVirtualAddress, size: usize) -> Self {
        Self { base, size }
    }

    /// Returns the first address of this range.
    pub const fn base(&self) -> IoVirtualAddress {
        self.base
    }

    /// Returns the size of this range in bytes.
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Returns the end address (exclusive) of this range.
    pub const fn end(&self) -> IoVirtualAddress {
        IoVirtualAddress::new(self.base.as_usize() + self.size)
    }

    /// Returns true if this range overlaps with another range.
    pub const fn overlaps(&self, other: &IovaRange) -> bool {
        self.base.as_usize() < other.end().as_usize()
            && other.base.as_usize() < self.end().as_usize()
    }

    /// Returns true if `[base, base + size)` lies entirely inside this range.
    pub const fn contains(&self, base: IoVirtualAddress, size: usize) -> bool {
        base.as_usize() >= self.base.as_usize()
            && base.as_usize() + size <= self.end().as_usize()
    }
}

/// Sorted, non-adjacent, non-overlapping free ranges.
#[derive(Debug, Default)]
struct FreeList {
    ranges: Vec<IovaRange>,
}

impl FreeList {
    fn iter(&self) -> impl Iterator<Item = &IovaRange> {
        self.ranges.iter()
    }

    fn len(&self) -> usize {
        self.ranges.len()
    }

    fn total_size(&self) -> usize {
        self.ranges.iter().map(|r| r.size()).sum()
    }

    /// Removes `[base, base + size)` from the free range at `index`, splitting it if the
    /// block sits in the middle.
    fn carve(&mut self, index: usize, base: IoVirtualAddress, size: usize) -> Result<(), PoolError> {
        let range = self.ranges[index];
        debug_assert!(range.contains(base, size));

        let head = IovaRange::new(range.base(), base - range.base());
        let tail = IovaRange::new(base + size, range.end() - (base + size));

        match (head.size() != 0, tail.size() != 0) {
            (true, true) => {
                self.ranges
                    .try_reserve(1)
                    .map_err(|_| PoolError::OutOfMemory)?;
                self.ranges[index] = head;
                self.ranges.insert(index + 1, tail);
            }
            (true, false) => self.ranges[index] = head,
            (false, true) => self.ranges[index] = tail,
            (false, false) => {
                self.ranges.remove(index);
            }
        }

        Ok(())
    }

    /// Inserts a range, merging with its neighbours when they touch.
    fn insert(&mut self, range: IovaRange) -> Result<(), PoolError> {
        let index = self
            .ranges
            .partition_point(|r| r.base() < range.base());

        debug_assert!(
            index == 0 || !self.ranges[index - 1].overlaps(&range),
            "freed range overlaps a free range"
        );
        debug_assert!(
            index == self.ranges.len() || !self.ranges[index].overlaps(&range),
            "freed range overlaps a free range"
        );

        let joins_prev = index > 0 && self.ranges[index - 1].end() == range.base();
        let joins_next = index < self.ranges.len() && range.end() == self.ranges[index].base();

        match (joins_prev, joins_next) {
            (true, true) => {
                let next = self.ranges.remove(index);
                let prev = &mut self.ranges[index - 1];
                prev.size += range.size() + next.size();
            }
            (true, false) => self.ranges[index - 1].size += range.size(),
            (false, true) => {
                let next = &mut self.ranges[index];
                next.base = range.base();
                next.size += range.size();
            }
            (false, false) => {
                self.ranges
                    .try_reserve(1)
                    .map_err(|_| PoolError::OutOfMemory)?;
                self.ranges.insert(index, range);
            }
        }

        Ok(())
    }
}

/// Allocator over one device's I/O virtual address window.
///
/// Sizes are rounded up to the pool granule (one page), and no allocation is ever aligned
/// more loosely than the granule.
#[derive(Debug)]
pub struct IovaPool {
    window: IovaWindow,
    granule: Order,
    free: FreeList,
}

impl IovaPool {
    /// Creates a pool whose whole window is free.
    ///
    /// Fails with [`PoolError::OutOfMemory`] if the free-list storage cannot be allocated.
    pub fn new(window: IovaWindow, granule: Order) -> Result<Self, PoolError> {
        let mut ranges = Vec::new();
        ranges
            .try_reserve(1)
            .map_err(|_| PoolError::OutOfMemory)?;
        ranges.push(IovaRange::new(window.base(), window.size()));

        Ok(Self {
            window,
            granule,
            free: FreeList { ranges },
        })
    }

    /// Returns the window this pool manages.
    pub fn window(&self) -> IovaWindow {
        self.window
    }

    /// Allocates `size` bytes aligned to `2^align`.
    ///
    /// Uses the lowest-addressed free range that can hold the aligned block.
    pub fn allocate(&mut self, size: usize, align: Order) -> Result<IoVirtualAddress, PoolError> {
        let size = self.round_to_granule(size);
        if size == 0 {
            return Err(PoolError::ZeroSize);
        }

        let align = align.max(self.granule).bytes();

        let found = self.free.iter().enumerate().find_map(|(index, range)| {
            let candidate = range.base().align_up(align);
            if candidate >= range.end() || range.end() - candidate < size {
                return None;
            }
            Some((index, candidate))
        });

        let Some((index, base)) = found else {
            log::debug!(
                "iova pool exhausted: no {} block at {} alignment ({} free in {} ranges)",
                HumanSize(size),
                HumanSize(align),
                HumanSize(self.available()),
                self.free.len()
            );
            return Err(PoolError::Exhausted);
        };

        self.free.carve(index, base, size)?;
        Ok(base)
    }

    /// Returns a range to the pool.
    ///
    /// `base` and `size` must describe a block previously returned by
    /// [`allocate`](Self::allocate) and not yet freed.
    pub fn free(&mut self, base: IoVirtualAddress, size: usize) {
        let size = self.round_to_granule(size);
        if size == 0 {
            return;
        }

        debug_assert!(
            IovaRange::new(self.window.base(), self.window.size()).contains(base, size),
            "freed range lies outside the window"
        );

        if self.free.insert(IovaRange::new(base, size)).is_err() {
            log::error!(
                "iova pool could not record free of {} at {}; range leaked",
                HumanSize(size),
                base
            );
        }
    }

    /// Returns the number of free bytes.
    pub fn available(&self) -> usize {
        self.free.total_size()
    }

    /// Returns the number of allocated bytes.
    pub fn allocated(&self) -> usize {
        self.window.size() - self.available()
    }

    /// Releases the pool's bookkeeping. Blocks that were never freed are reclaimed with it.
    ///
    /// Returns the number of bytes that were still allocated.
    pub fn destroy(self) -> usize {
        self.allocated()
    }

    fn round_to_granule(&self, size: usize) -> usize {
        let granule = self.granule.bytes();
        (size + granule - 1) & !(granule - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PAGE_SIZE;

    const MIB: usize = 0x10_0000;

    fn pool() -> IovaPool {
        IovaPool::new(IovaWindow::DEFAULT, Order::PAGE).unwrap()
    }

    fn small_pool(pages: usize) -> IovaPool {
        let window = IovaWindow::new(IoVirtualAddress::new(0x8000_0000), pages * PAGE_SIZE);
        IovaPool::new(window, Order::PAGE).unwrap()
    }

    #[test]
    fn iova_range_operations() {
        let r1 = IovaRange::new(IoVirtualAddress::new(0x1000), 0x1000);
        let r2 = IovaRange::new(IoVirtualAddress::new(0x2000), 0x1000);
        let r3 = IovaRange::new(IoVirtualAddress::new(0x1800), 0x1000);

        assert_eq!(r1.end().as_usize(), 0x2000);
        assert!(!r1.overlaps(&r2));
        assert!(r1.overlaps(&r3));
        assert!(r1.contains(IoVirtualAddress::new(0x1800), 0x800));
        assert!(!r1.contains(IoVirtualAddress::new(0x1800), 0x801));
    }

    #[test]
    fn new_pool_is_entirely_free() {
        let pool = pool();
        assert_eq!(pool.available(), 0x2000_0000);
        assert_eq!(pool.allocated(), 0);
    }

    #[test]
    fn allocates_first_fit_at_window_base() {
        let mut pool = pool();
        let a = pool.allocate(2 * PAGE_SIZE, Order::new(13)).unwrap();
        let b = pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();

        assert_eq!(a.as_usize(), 0x8000_0000);
        assert_eq!(b.as_usize(), 0x8000_2000);
        assert_eq!(pool.allocated(), 3 * PAGE_SIZE);
    }

    #[test]
    fn honours_requested_alignment() {
        let mut pool = pool();
        pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();

        let aligned = pool.allocate(2 * MIB, Order::new(20)).unwrap();
        assert_eq!(aligned.as_usize(), 0x8010_0000);

        // The gap skipped for alignment is still usable.
        let filler = pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();
        assert_eq!(filler.as_usize(), 0x8000_1000);
    }

    #[test]
    fn rounds_sizes_to_pages() {
        let mut pool = pool();
        pool.allocate(1, Order::PAGE).unwrap();
        assert_eq!(pool.allocated(), PAGE_SIZE);
    }

    #[test]
    fn rejects_zero_size() {
        let mut pool = pool();
        assert_eq!(pool.allocate(0, Order::PAGE), Err(PoolError::ZeroSize));
    }

    #[test]
    fn free_coalesces_neighbours() {
        let mut pool = small_pool(8);
        let a = pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();
        let b = pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();
        let c = pool.allocate(PAGE_SIZE, Order::PAGE).unwrap();

        pool.free(a, PAGE_SIZE);
        pool.free(c, PAGE_SIZE);
        assert_eq!(pool.free.len(), 2);

        pool.free(b, PAGE_SIZE);
        assert_eq!(pool.free.len(), 1);
        assert_eq!(pool.available(), 8 * PAGE_SIZE);

        // Fully coalesced: the whole window fits in one allocation again.
        assert_eq!(
            pool.allocate(8 * PAGE_SIZE, Order::PAGE).unwrap().as_usize(),
            0x8000_0000
        );
    }

    #[test]
    fn exhausts_when_full() {
        let mut pool = small_pool(4);
        pool.allocate(4 * PAGE_SIZE, Order::PAGE).unwrap();
        assert_eq!(
            pool.allocate(PAGE_SIZE, Order::PAGE),
            Err(PoolError::Exhausted)
        );
    }

    #[test]
    fn fragmentation_defeats_alignment() {
        let mut pool = small_pool(4);
        let blocks: Vec<_> = (0..4)
            .map(|_| pool.allocate(PAGE_SIZE, Order::PAGE).unwrap())
            .collect();
        pool.free(blocks[1], PAGE_SIZE);
        pool.free(blocks[3], PAGE_SIZE);

        // Two free pages, but not adjacent.
        assert_eq!(pool.available(), 2 * PAGE_SIZE);
        assert_eq!(
            pool.allocate(2 * PAGE_SIZE, Order::PAGE),
            Err(PoolError::Exhausted)
        );
    }

    #[test]
    fn destroy_reports_outstanding_bytes() {
        let mut pool = pool();
        pool.allocate(3 * PAGE_SIZE, Order::PAGE).unwrap();
        assert_eq!(pool.destroy(), 3 * PAGE_SIZE);
    }
}

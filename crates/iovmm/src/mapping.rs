//! The mapping engine.
//!
//! Turns a scatter list into one contiguous run of I/O virtual addresses. Every translation
//! installed is a naturally aligned power of two in both address spaces, and as large as the
//! physical address, the virtual address and the remaining length allow at that point.

use crate::address::{IoVirtualAddress, PhysicalAddress};
use crate::config::{MAX_POOL_ALIGNMENT_ORDER, PAGE_SIZE};
use crate::domain::IommuDomain;
use crate::error::{HardwareError, IovmmError};
use crate::order::Order;

/// One physically contiguous piece of a DMA buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterSegment {
    phys: PhysicalAddress,
    len: usize,
}

impl ScatterSegment {
    /// Creates a segment of `len` bytes at `phys`.
    pub const fn new(phys: PhysicalAddress, len: usize) -> Self {
        Self { phys, len }
    }

    /// Returns the physical address of the first byte.
    pub const fn phys(&self) -> PhysicalAddress {
        self.phys
    }

    /// Returns the length in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the segment covers no bytes.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the page-aligned span of physical memory this segment touches, or `None` if
    /// the span does not fit the physical address space.
    fn page_span(&self) -> Option<(PhysicalAddress, usize)> {
        let floor = self.phys.page_floor();
        let span = self
            .len
            .checked_add(self.phys.page_offset())?
            .checked_add(PAGE_SIZE - 1)?
            & !(PAGE_SIZE - 1);

        // The last byte must be addressable; the span may end exactly at the top of memory.
        if span != 0 {
            floor.as_usize().checked_add(span - 1)?;
        }
        Some((floor, span))
    }
}

/// How much I/O virtual space a scatter list needs, and where its first byte sits in it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScatterLayout {
    start_offset: usize,
    size: usize,
}

impl ScatterLayout {
    /// Computes the reservation for `segments`.
    ///
    /// The first segment's sub-page offset is carried into the virtual range, so the
    /// reservation is `page_align(offset + total length)`. Lists whose page-rounded segments
    /// would not fit that reservation (an inner segment that ends or starts mid-page) are
    /// rejected, as is a list covering no bytes at all.
    pub fn of(segments: &[ScatterSegment]) -> Result<Self, IovmmError> {
        let first = segments.first().ok_or(IovmmError::InvalidScatterList)?;
        let start_offset = first.phys().page_offset();

        let size = segments
            .iter()
            .try_fold(start_offset, |total, segment| total.checked_add(segment.len()))
            .and_then(|total| total.checked_add(PAGE_SIZE - 1))
            .map(|total| total & !(PAGE_SIZE - 1))
            .ok_or(IovmmError::InvalidScatterList)?;

        if size == 0 {
            return Err(IovmmError::InvalidScatterList);
        }

        let spanned = segments.iter().try_fold(0usize, |total, segment| {
            total.checked_add(segment.page_span()?.1)
        });
        if spanned.is_none_or(|spanned| spanned > size) {
            return Err(IovmmError::InvalidScatterList);
        }

        Ok(Self { start_offset, size })
    }

    /// Returns the offset of the buffer's first byte within its first page.
    pub const fn start_offset(&self) -> usize {
        self.start_offset
    }

    /// Returns the number of bytes to reserve, a whole number of pages.
    pub const fn size(&self) -> usize {
        self.size
    }
}

/// Alignment order to request from the pool for a reservation of `size` bytes.
///
/// The block is aligned to its own size rounded down to a power of two, capped at 1 MiB.
pub fn pool_order(size: usize) -> Order {
    Order::highest_set(size.min(1 << MAX_POOL_ALIGNMENT_ORDER))
}

/// Order of the largest translation that can be installed at this point of a walk.
///
/// A chunk must be aligned to its size in both address spaces and must not run past the
/// remaining length; the answer is the smallest of the three constraints.
pub fn chunk_order(phys: PhysicalAddress, iova: IoVirtualAddress, len: usize) -> Order {
    phys.alignment_order()
        .min(iova.alignment_order())
        .min(Order::highest_set(len))
}

/// Order of the next piece when removing a run of translations at `iova` with `remaining`
/// bytes left to remove.
pub fn teardown_order(iova: IoVirtualAddress, remaining: usize) -> Order {
    Order::highest_set(remaining).min(iova.alignment_order())
}

/// One translation the engine installs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    pub iova: IoVirtualAddress,
    pub phys: PhysicalAddress,
    pub order: Order,
}

/// Walks a scatter list laid out from `start`, yielding the chunks to install in order.
///
/// The walk stops at a segment whose span runs off the end of physical memory; such lists
/// never pass [`ScatterLayout::of`].
pub struct Chunks<'a> {
    segments: core::slice::Iter<'a, ScatterSegment>,
    iova: IoVirtualAddress,
    phys: PhysicalAddress,
    remaining: usize,
}

impl<'a> Chunks<'a> {
    /// Starts a walk of `segments` whose first page lands at `start`.
    pub fn new(start: IoVirtualAddress, segments: &'a [ScatterSegment]) -> Self {
        Self {
            segments: segments.iter(),
            iova: start,
            phys: PhysicalAddress::new(0),
            remaining: 0,
        }
    }
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        while self.remaining == 0 {
            let (phys, len) = self.segments.next()?.page_span()?;
            self.phys = phys;
            self.remaining = len;
        }

        let order = chunk_order(self.phys, self.iova, self.remaining);
        let chunk = Chunk {
            iova: self.iova,
            phys: self.phys,
            order,
        };

        self.iova = self.iova + order.bytes();
        self.remaining -= order.bytes();
        // A segment may end on the last physical page; there is no next address to advance to.
        if self.remaining != 0 {
            self.phys = self.phys + order.bytes();
        }

        Some(chunk)
    }
}

/// Installs every chunk of `segments` laid out from `start`.
///
/// Stops at the first rejected chunk and reports its address; chunks before it stay
/// installed for [`rollback`] to remove.
pub fn install<D: IommuDomain>(
    domain: &mut D,
    start: IoVirtualAddress,
    segments: &[ScatterSegment],
) -> Result<usize, (IoVirtualAddress, HardwareError)> {
    let mut installed = 0;
    for chunk in Chunks::new(start, segments) {
        domain
            .map(chunk.iova, chunk.phys, chunk.order.page_order())
            .map_err(|err| (chunk.iova, err))?;

        #[cfg(feature = "detailed-logging")]
        log::trace!(
            "installed {} -> {} ({})",
            chunk.iova,
            chunk.phys,
            crate::HumanSize(chunk.order.bytes())
        );

        installed += 1;
    }
    Ok(installed)
}

/// Removes the chunks [`install`] put in place before it was rejected at `failed_at`.
///
/// The walk is re-derived from the scatter list, so each removal matches exactly one
/// install. Returns the number of chunks removed.
pub fn rollback<D: IommuDomain>(
    domain: &mut D,
    start: IoVirtualAddress,
    segments: &[ScatterSegment],
    failed_at: IoVirtualAddress,
) -> usize {
    Chunks::new(start, segments)
        .take_while(|chunk| chunk.iova < failed_at)
        .map(|chunk| domain.unmap(chunk.iova, chunk.order.page_order()))
        .count()
}

/// Removes all translations in `[start, start + size)`, largest aligned pieces first.
///
/// Returns the number of bytes the domain reported as unmapped.
pub fn teardown<D: IommuDomain>(domain: &mut D, start: IoVirtualAddress, size: usize) -> usize {
    let mut iova = start;
    let mut remaining = size;
    let mut unmapped = 0;

    while remaining != 0 {
        let order = teardown_order(iova, remaining);
        unmapped += domain.unmap(iova, order.page_order());

        iova = iova + order.bytes();
        remaining -= order.bytes();
    }

    unmapped
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::EmulatedIommu;
    use crate::domain::IommuHardware;

    const MIB: usize = 0x10_0000;

    fn segment(phys: usize, len: usize) -> ScatterSegment {
        ScatterSegment::new(PhysicalAddress::new(phys), len)
    }

    fn orders(start: usize, segments: &[ScatterSegment]) -> Vec<u32> {
        Chunks::new(IoVirtualAddress::new(start), segments)
            .map(|c| c.order.get())
            .collect()
    }

    #[test]
    fn layout_carries_sub_page_offset() {
        let layout = ScatterLayout::of(&[segment(0x1004, 8192)]).unwrap();
        assert_eq!(layout.start_offset(), 0x004);
        assert_eq!(layout.size(), 0x3000);
    }

    #[test]
    fn layout_sums_segments() {
        let layout =
            ScatterLayout::of(&[segment(0x1000, 0x1000), segment(0x9000, 0x3000)]).unwrap();
        assert_eq!(layout.start_offset(), 0);
        assert_eq!(layout.size(), 0x4000);
    }

    #[test]
    fn layout_rejects_empty_lists() {
        assert_eq!(ScatterLayout::of(&[]), Err(IovmmError::InvalidScatterList));
        assert_eq!(
            ScatterLayout::of(&[segment(0x1000, 0)]),
            Err(IovmmError::InvalidScatterList)
        );
    }

    #[test]
    fn layout_rejects_inner_segment_ending_mid_page() {
        // Each half-page segment spans a whole page, twice what the reservation holds.
        assert_eq!(
            ScatterLayout::of(&[segment(0x1000, 0x800), segment(0x5000, 0x800)]),
            Err(IovmmError::InvalidScatterList)
        );
    }

    #[test]
    fn pool_order_is_capped_at_one_mebibyte() {
        assert_eq!(pool_order(0x1000).get(), 12);
        assert_eq!(pool_order(0x3000).get(), 13);
        assert_eq!(pool_order(MIB).get(), 20);
        assert_eq!(pool_order(64 * MIB).get(), 20);
    }

    #[test]
    fn chunk_order_is_triple_minimum() {
        let order = chunk_order(
            PhysicalAddress::new(0x10_0000),
            IoVirtualAddress::new(0x8010_0000),
            0x20_0000,
        );
        assert_eq!(order.get(), 20);

        // Physical alignment limits.
        let order = chunk_order(
            PhysicalAddress::new(0x1_3000),
            IoVirtualAddress::new(0x8000_0000),
            0x10_0000,
        );
        assert_eq!(order.get(), 12);

        // Length limits.
        let order = chunk_order(
            PhysicalAddress::new(0),
            IoVirtualAddress::new(0x8000_0000),
            0x3000,
        );
        assert_eq!(order.get(), 13);
    }

    #[test]
    fn aligned_run_uses_mebibyte_chunks() {
        let chunks: Vec<_> =
            Chunks::new(IoVirtualAddress::new(0x8010_0000), &[segment(0x10_0000, 0x20_0000)])
                .collect();

        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].iova.as_usize(), 0x8010_0000);
        assert_eq!(chunks[0].phys.as_usize(), 0x10_0000);
        assert_eq!(chunks[1].iova.as_usize(), 0x8020_0000);
        assert_eq!(chunks[1].phys.as_usize(), 0x20_0000);
        assert!(chunks.iter().all(|c| c.order.get() == 20));
    }

    #[test]
    fn chunks_grow_and_shrink_with_alignment() {
        // 28 KiB starting one page into a 16 KiB-aligned block: 4K, 8K, 16K.
        assert_eq!(orders(0x8000_1000, &[segment(0x4_1000, 0x7000)]), [12, 13, 14]);
        // Same size from an aligned start: 16K, 8K, 4K.
        assert_eq!(orders(0x8000_0000, &[segment(0x4_0000, 0x7000)]), [14, 13, 12]);
    }

    #[test]
    fn chunks_cover_sub_page_head_and_every_segment() {
        let segments = [segment(0x1004, 0xFFC), segment(0x8000, 0x2000)];
        let chunks: Vec<_> = Chunks::new(IoVirtualAddress::new(0x8000_0000), &segments).collect();

        assert_eq!(chunks[0].phys.as_usize(), 0x1000);
        let covered: usize = chunks.iter().map(|c| c.order.bytes()).sum();
        assert_eq!(covered, ScatterLayout::of(&segments).unwrap().size());
    }

    #[test]
    fn layout_rejects_segment_span_overflow() {
        // The total fits, but the second segment's page-rounded span does not.
        assert_eq!(
            ScatterLayout::of(&[segment(0x1000, 0), segment(0x2FFF, usize::MAX - 0xFFF)]),
            Err(IovmmError::InvalidScatterList)
        );
        // A segment running past the top of physical memory.
        assert_eq!(
            ScatterLayout::of(&[segment(usize::MAX & !0xFFF, 0x2000)]),
            Err(IovmmError::InvalidScatterList)
        );
    }

    #[test]
    fn walk_ends_on_the_top_physical_page() {
        let top = usize::MAX & !0xFFF;
        let chunks: Vec<_> =
            Chunks::new(IoVirtualAddress::new(0x8000_0000), &[segment(top, 0x1000)]).collect();

        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].phys.as_usize(), top);
        assert_eq!(chunks[0].order.get(), 12);
    }

    #[test]
    fn rollback_undoes_exactly_the_installed_chunks() {
        let iommu = EmulatedIommu::new();
        let mut domain = iommu.alloc_domain().unwrap();
        let probe = iommu.probe(0);
        probe.fail_install(3);

        let segments: Vec<_> = (0..5).map(|i| segment(0x10_0000 + i * 0x3000, 0x1000)).collect();
        let start = IoVirtualAddress::new(0x8000_0000);

        let (failed_at, err) = install(&mut domain, start, &segments).unwrap_err();
        assert_eq!(err, HardwareError::TableFull);
        assert_eq!(failed_at.as_usize(), 0x8000_2000);

        assert_eq!(rollback(&mut domain, start, &segments, failed_at), 2);
        assert_eq!(probe.removals().len(), 2);
        assert_eq!(probe.mapped_bytes(), 0);
    }

    #[test]
    fn teardown_splits_on_alignment_and_length() {
        let iommu = EmulatedIommu::new();
        let mut domain = iommu.alloc_domain().unwrap();
        let start = IoVirtualAddress::new(0x8000_0000);
        let segments = [segment(0x40_0000, 0x7000)];
        install(&mut domain, start, &segments).unwrap();

        assert_eq!(teardown(&mut domain, start, 0x7000), 0x7000);

        let orders: Vec<_> = iommu.probe(0).removals().iter().map(|&(_, o)| o).collect();
        assert_eq!(orders, [2, 1, 0]);
    }
}

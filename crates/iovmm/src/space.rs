//! Per-device I/O address spaces.
//!
//! An address space bundles a device's translation domain, the pool over its I/O virtual
//! window and the regions currently mapped through it, all behind one spinlock. Operations
//! that may run with interrupts already disabled (deactivate, unmap) take the lock with local
//! interrupts masked; the others take it plainly.

use spin::Mutex;

use crate::address::IoVirtualAddress;
use crate::arch;
use crate::config::IovaWindow;
use crate::device::DeviceId;
use crate::domain::{DomainBinding, DomainState, IommuDomain};
use crate::error::IovmmError;
use crate::human_size::HumanSize;
use crate::mapping::{self, ScatterLayout, ScatterSegment};
use crate::order::Order;
use crate::pool::{IovaPool, PoolError};
use crate::region::{Region, RegionTracker};

/// Snapshot of an address space's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpaceUsage {
    /// The device's I/O virtual window.
    pub window: IovaWindow,
    /// Bytes of the window not reserved by any mapping.
    pub available: usize,
    /// Number of live mappings.
    pub regions: usize,
    /// Bytes reserved by live mappings.
    pub reserved: usize,
    /// Attach state of the domain.
    pub domain: DomainState,
}

impl SpaceUsage {
    /// Returns true if the domain is attached to the device.
    pub fn is_active(&self) -> bool {
        self.domain == DomainState::Attached
    }
}

struct SpaceState<D> {
    binding: DomainBinding<D>,
    pool: IovaPool,
    regions: RegionTracker,
}

/// The I/O virtual address space of one device.
pub struct AddressSpace<D> {
    device: DeviceId,
    /// `None` once the space has been torn down.
    state: Mutex<Option<SpaceState<D>>>,
}

impl<D> AddressSpace<D> {
    /// Returns the device this space belongs to.
    pub fn device(&self) -> DeviceId {
        self.device
    }
}

impl<D: IommuDomain> AddressSpace<D> {
    /// Builds an address space around a freshly allocated domain.
    ///
    /// If the pool cannot be created the domain is freed again.
    pub fn new(device: DeviceId, domain: D, window: IovaWindow) -> Result<Self, IovmmError> {
        let pool = IovaPool::new(window, Order::PAGE).map_err(|err| {
            log::error!("{device}: cannot create iova pool: {err:?}");
            IovmmError::OutOfMemory
        })?;

        Ok(Self {
            device,
            state: Mutex::new(Some(SpaceState {
                binding: DomainBinding::new(device, domain),
                pool,
                regions: RegionTracker::new(),
            })),
        })
    }

    /// Attaches the domain to the device.
    pub fn activate(&self) -> Result<(), IovmmError> {
        self.with_state(|state| {
            state.binding.activate().map_err(|err| {
                log::error!("{}: domain attach failed: {}", self.device, err);
                IovmmError::AttachFailed(err)
            })
        })?
    }

    /// Detaches the domain from the device. Safe to call with interrupts disabled.
    pub fn deactivate(&self) -> Result<(), IovmmError> {
        self.with_state_irqsave(|state| state.binding.deactivate())
    }

    /// Reserves a contiguous I/O virtual range for `segments` and installs translations for
    /// every page of it.
    ///
    /// The lock is held across reservation, every install and, on failure, the rollback, so
    /// no other mapping on this device observes a half-built range.
    pub fn map(&self, segments: &[ScatterSegment]) -> Result<IoVirtualAddress, IovmmError> {
        let layout = ScatterLayout::of(segments).inspect_err(|_| {
            log::warn!(
                "{}: rejecting scatter list of {} segments",
                self.device,
                segments.len()
            );
        })?;

        self.with_state(|state| state.map(self.device, segments, layout))?
    }

    /// Removes the mapping that [`map`](Self::map) returned as `iova`.
    ///
    /// Returns the removed region, or `None` if no mapping starts at `iova`. Safe to call with
    /// interrupts disabled.
    pub fn unmap(&self, iova: IoVirtualAddress) -> Result<Option<Region>, IovmmError> {
        self.with_state_irqsave(|state| state.unmap(self.device, iova))
    }

    /// Returns a snapshot of the bookkeeping, or `None` once torn down.
    pub fn usage(&self) -> Option<SpaceUsage> {
        self.with_state(|state| SpaceUsage {
            window: state.pool.window(),
            available: state.pool.available(),
            regions: state.regions.len(),
            reserved: state.regions.reserved_bytes(),
            domain: state.binding.state(),
        })
        .ok()
    }

    /// Tears the space down: detaches and frees the domain, drops every region and the pool.
    ///
    /// Returns false if the space was already torn down. Later operations fail with
    /// [`IovmmError::NotRegistered`].
    pub fn teardown(&self) -> bool {
        let Some(state) = self.state.lock().take() else {
            return false;
        };
        state.teardown(self.device);
        true
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut SpaceState<D>) -> R) -> Result<R, IovmmError> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(IovmmError::NotRegistered)?;
        Ok(f(state))
    }

    fn with_state_irqsave<R>(
        &self,
        f: impl FnOnce(&mut SpaceState<D>) -> R,
    ) -> Result<R, IovmmError> {
        arch::without_interrupts(|| self.with_state(f))
    }
}

impl<D: IommuDomain> SpaceState<D> {
    fn map(
        &mut self,
        device: DeviceId,
        segments: &[ScatterSegment],
        layout: ScatterLayout,
    ) -> Result<IoVirtualAddress, IovmmError> {
        // Room for the region record comes first, so a finished mapping can always be recorded.
        self.regions.reserve().map_err(|_| {
            log::error!("{device}: cannot allocate a region record");
            IovmmError::OutOfMemory
        })?;

        let size = layout.size();
        let start = self
            .pool
            .allocate(size, mapping::pool_order(size))
            .map_err(|err| {
                log::warn!(
                    "{device}: no room for {} of iova space: {err:?}",
                    HumanSize(size)
                );
                match err {
                    PoolError::Exhausted | PoolError::OutOfMemory => IovmmError::OutOfMemory,
                    PoolError::ZeroSize => IovmmError::InvalidScatterList,
                }
            })?;

        let domain = self.binding.domain_mut();
        if let Err((failed_at, err)) = mapping::install(domain, start, segments) {
            let undone = mapping::rollback(domain, start, segments, failed_at);
            self.pool.free(start, size);
            log::error!(
                "{device}: install at {failed_at} failed ({err}); rolled back {undone} chunks of {} at {start}",
                HumanSize(size)
            );
            return Err(IovmmError::MappingFailed(err));
        }

        let region = Region::new(start + layout.start_offset(), size);
        self.regions.insert(region);

        log::debug!(
            "{device}: mapped {} at {} ({} segments)",
            HumanSize(size),
            region.start(),
            segments.len()
        );
        Ok(region.start())
    }

    fn unmap(&mut self, device: DeviceId, iova: IoVirtualAddress) -> Option<Region> {
        let region = self.regions.take(iova)?;
        let reservation = region.reservation();

        // The range goes back to the pool before its translations are removed; both happen
        // under the same lock.
        self.pool.free(reservation.base(), reservation.size());

        let unmapped = mapping::teardown(
            self.binding.domain_mut(),
            reservation.base(),
            reservation.size(),
        );
        if unmapped != reservation.size() {
            log::warn!(
                "{device}: unmapping {} at {} removed {} of translations",
                HumanSize(reservation.size()),
                iova,
                HumanSize(unmapped)
            );
        }

        log::debug!("{device}: unmapped {} at {}", HumanSize(region.size()), iova);
        Some(region)
    }

    fn teardown(mut self, device: DeviceId) {
        // Freeing the domain frees its page table, so live regions need no per-chunk unmap.
        self.binding.destroy();

        if !self.regions.is_empty() {
            log::debug!(
                "{device}: dropping {} live regions ({})",
                self.regions.len(),
                HumanSize(self.regions.reserved_bytes())
            );
        }
        for region in self.regions.drain() {
            let reservation = region.reservation();
            self.pool.free(reservation.base(), reservation.size());
        }

        let leaked = self.pool.destroy();
        if leaked != 0 {
            log::warn!("{device}: {} of iova space unaccounted for", HumanSize(leaked));
        }
    }
}

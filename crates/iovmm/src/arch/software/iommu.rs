//! Emulated IOMMU.
//!
//! Every domain records its translations in a sorted map and keeps counters of what was asked
//! of it. The IOMMU keeps a handle to each domain it ever allocated, so tests can keep
//! inspecting a domain after the manager has freed it.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, Ordering};

use spin::Mutex;

use crate::address::{IoVirtualAddress, PhysicalAddress};
use crate::config::PAGE_SIZE;
use crate::device::DeviceId;
use crate::domain::{IommuDomain, IommuHardware};
use crate::error::HardwareError;

/// One `map` call as the domain received it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Install {
    pub iova: IoVirtualAddress,
    pub phys: PhysicalAddress,
    pub page_order: u32,
}

impl Install {
    /// Returns the number of bytes the install covers.
    pub fn size(&self) -> usize {
        PAGE_SIZE << self.page_order
    }
}

#[derive(Debug, Default)]
struct Table {
    /// Installed translations: iova -> (phys, size).
    entries: BTreeMap<IoVirtualAddress, (PhysicalAddress, usize)>,
    attached: Option<DeviceId>,
    freed: bool,
    attached_when_freed: bool,
    installs: Vec<Install>,
    removals: Vec<(IoVirtualAddress, u32)>,
    unmaps_with_interrupts_masked: usize,
    /// One-based index of the install that will be rejected.
    fail_install: Option<usize>,
    fail_attach: Option<HardwareError>,
}

impl Table {
    fn overlaps(&self, iova: IoVirtualAddress, size: usize) -> bool {
        self.entries
            .range(..iova + size)
            .next_back()
            .is_some_and(|(&start, &(_, len))| start + len > iova)
    }
}

/// A translation domain of the emulated IOMMU.
pub struct EmulatedDomain {
    table: Arc<Mutex<Table>>,
}

impl IommuDomain for EmulatedDomain {
    fn attach(&mut self, device: DeviceId) -> Result<(), HardwareError> {
        let mut table = self.table.lock();
        if let Some(err) = table.fail_attach.take() {
            return Err(err);
        }
        if table.attached.is_some() {
            return Err(HardwareError::AlreadyAttached);
        }
        table.attached = Some(device);
        Ok(())
    }

    fn detach(&mut self, device: DeviceId) -> Result<(), HardwareError> {
        let mut table = self.table.lock();
        if table.attached != Some(device) {
            return Err(HardwareError::NotAttached);
        }
        table.attached = None;
        Ok(())
    }

    fn map(
        &mut self,
        iova: IoVirtualAddress,
        phys: PhysicalAddress,
        page_order: u32,
    ) -> Result<(), HardwareError> {
        let size = PAGE_SIZE << page_order;
        assert!(iova.is_aligned(size), "iova {iova} not aligned to {size:#x}");
        assert!(phys.is_aligned(size), "phys {phys} not aligned to {size:#x}");

        let mut table = self.table.lock();
        table.installs.push(Install {
            iova,
            phys,
            page_order,
        });

        if table.fail_install == Some(table.installs.len()) {
            return Err(HardwareError::TableFull);
        }
        if table.overlaps(iova, size) {
            return Err(HardwareError::AlreadyMapped);
        }

        table.entries.insert(iova, (phys, size));
        Ok(())
    }

    fn unmap(&mut self, iova: IoVirtualAddress, page_order: u32) -> usize {
        let size = PAGE_SIZE << page_order;
        let mut table = self.table.lock();

        table.removals.push((iova, page_order));
        if !super::interrupts_enabled() {
            table.unmaps_with_interrupts_masked += 1;
        }

        let covered: Vec<_> = table
            .entries
            .range(iova..iova + size)
            .map(|(&start, _)| start)
            .collect();

        covered
            .into_iter()
            .filter_map(|start| table.entries.remove(&start))
            .map(|(_, len)| len)
            .sum()
    }
}

impl Drop for EmulatedDomain {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        table.attached_when_freed = table.attached.is_some();
        table.freed = true;
        table.entries.clear();
    }
}

/// Emulated IOMMU.
pub struct EmulatedIommu {
    domains: Mutex<Vec<Arc<Mutex<Table>>>>,
    fail_alloc: AtomicBool,
}

impl EmulatedIommu {
    /// Creates an IOMMU that has not allocated any domains yet.
    pub const fn new() -> Self {
        Self {
            domains: Mutex::new(Vec::new()),
            fail_alloc: AtomicBool::new(false),
        }
    }

    /// Makes the next domain allocation fail.
    pub fn fail_next_alloc(&self) {
        self.fail_alloc.store(true, Ordering::Release);
    }

    /// Returns the number of domains allocated so far.
    pub fn domain_count(&self) -> usize {
        self.domains.lock().len()
    }

    /// Returns a probe for the `index`-th domain ever allocated.
    ///
    /// # Panics
    ///
    /// Panics if fewer than `index + 1` domains were allocated.
    pub fn probe(&self, index: usize) -> DomainProbe {
        let domains = self.domains.lock();
        assert!(index < domains.len(), "domain {index} was never allocated");
        DomainProbe {
            table: domains[index].clone(),
        }
    }
}

impl Default for EmulatedIommu {
    fn default() -> Self {
        Self::new()
    }
}

impl IommuHardware for EmulatedIommu {
    type Domain = EmulatedDomain;

    fn alloc_domain(&self) -> Option<EmulatedDomain> {
        if self.fail_alloc.swap(false, Ordering::AcqRel) {
            return None;
        }

        let table = Arc::new(Mutex::new(Table::default()));
        self.domains.lock().push(table.clone());
        Some(EmulatedDomain { table })
    }
}

/// Inspection and fault-injection handle for one emulated domain.
pub struct DomainProbe {
    table: Arc<Mutex<Table>>,
}

impl DomainProbe {
    /// Returns the device the domain is attached to.
    pub fn attached(&self) -> Option<DeviceId> {
        self.table.lock().attached
    }

    /// Returns true once the domain has been freed.
    pub fn is_freed(&self) -> bool {
        self.table.lock().freed
    }

    /// Returns true if the domain was freed while detached.
    pub fn was_detached_before_free(&self) -> bool {
        let table = self.table.lock();
        table.freed && !table.attached_when_freed
    }

    /// Translates a device address through the domain.
    pub fn translate(&self, iova: IoVirtualAddress) -> Option<PhysicalAddress> {
        let table = self.table.lock();
        let (&start, &(phys, size)) = table.entries.range(..=iova).next_back()?;
        (iova - start < size).then(|| phys + (iova - start))
    }

    /// Returns the number of bytes currently translated.
    pub fn mapped_bytes(&self) -> usize {
        self.table.lock().entries.values().map(|&(_, size)| size).sum()
    }

    /// Returns every `map` call received, including rejected ones.
    pub fn installs(&self) -> Vec<Install> {
        self.table.lock().installs.clone()
    }

    /// Returns every `unmap` call received as `(iova, page_order)`.
    pub fn removals(&self) -> Vec<(IoVirtualAddress, u32)> {
        self.table.lock().removals.clone()
    }

    /// Returns how many `unmap` calls arrived with interrupts masked.
    pub fn unmaps_with_interrupts_masked(&self) -> usize {
        self.table.lock().unmaps_with_interrupts_masked
    }

    /// Rejects the `n`-th install (one-based, counted over the domain's lifetime).
    pub fn fail_install(&self, n: usize) {
        self.table.lock().fail_install = Some(n);
    }

    /// Rejects the next attach with `err`.
    pub fn fail_next_attach(&self, err: HardwareError) {
        self.table.lock().fail_attach = Some(err);
    }
}

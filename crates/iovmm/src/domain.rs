//! IOMMU translation domains.
//!
//! The manager treats the IOMMU as an opaque capability: something that can create a domain,
//! attach it to a device, and install or remove power-of-two translations in it. The page-table
//! format behind those calls belongs to the IOMMU driver.

use crate::address::{IoVirtualAddress, PhysicalAddress};
use crate::device::DeviceId;
use crate::error::HardwareError;

/// One hardware translation context.
///
/// Dropping a domain frees it, including its page table; the manager always detaches a domain
/// before dropping it.
///
/// Every method is called with the owning address space locked, possibly with local interrupts
/// masked, so implementations must not sleep.
pub trait IommuDomain: Send {
    /// Points the device's translation unit at this domain.
    fn attach(&mut self, device: DeviceId) -> Result<(), HardwareError>;

    /// Stops the device's translation unit from using this domain.
    fn detach(&mut self, device: DeviceId) -> Result<(), HardwareError>;

    /// Installs one translation of `PAGE_SIZE << page_order` bytes.
    ///
    /// Both addresses are aligned to the translation size.
    fn map(
        &mut self,
        iova: IoVirtualAddress,
        phys: PhysicalAddress,
        page_order: u32,
    ) -> Result<(), HardwareError>;

    /// Removes the translations covering `PAGE_SIZE << page_order` bytes at `iova`.
    ///
    /// Returns the number of bytes that were actually unmapped.
    fn unmap(&mut self, iova: IoVirtualAddress, page_order: u32) -> usize;
}

/// Factory for translation domains.
pub trait IommuHardware: Sync {
    /// The domain type this IOMMU produces.
    type Domain: IommuDomain;

    /// Allocates a fresh, detached domain with an empty page table.
    fn alloc_domain(&self) -> Option<Self::Domain>;
}

/// Attach state of a domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomainState {
    /// Allocated, never attached.
    Created,
    /// Translating for the device.
    Attached,
    /// Previously attached, now dormant.
    Detached,
}

/// A domain together with the device it belongs to and its attach state.
///
/// Destruction is [`destroy`](Self::destroy), which consumes the binding.
pub struct DomainBinding<D> {
    device: DeviceId,
    domain: D,
    state: DomainState,
}

impl<D: IommuDomain> DomainBinding<D> {
    /// Wraps a freshly allocated domain for `device`.
    pub fn new(device: DeviceId, domain: D) -> Self {
        Self {
            device,
            domain,
            state: DomainState::Created,
        }
    }

    /// Returns the current attach state.
    pub fn state(&self) -> DomainState {
        self.state
    }

    /// Returns true if the domain is translating for the device.
    pub fn is_active(&self) -> bool {
        self.state == DomainState::Attached
    }

    /// Attaches the domain.
    ///
    /// A failed attach leaves the state untouched; in particular a redundant attach of an
    /// already attached domain keeps it attached.
    pub fn activate(&mut self) -> Result<(), HardwareError> {
        self.domain.attach(self.device)?;
        self.state = DomainState::Attached;
        Ok(())
    }

    /// Detaches the domain. Hardware errors are logged, and the domain is considered detached
    /// regardless.
    pub fn deactivate(&mut self) {
        if let Err(err) = self.domain.detach(self.device) {
            log::warn!("{}: ignoring detach failure: {}", self.device, err);
        }
        self.state = DomainState::Detached;
    }

    /// Detaches the domain if it is attached, then frees it.
    pub fn destroy(mut self) {
        if self.is_active() {
            self.deactivate();
        }
        log::trace!("{}: freeing translation domain", self.device);
        drop(self.domain);
    }

    /// Returns the domain for page-table updates.
    pub fn domain_mut(&mut self) -> &mut D {
        &mut self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::EmulatedIommu;

    fn binding(iommu: &EmulatedIommu) -> DomainBinding<<EmulatedIommu as IommuHardware>::Domain> {
        DomainBinding::new(DeviceId::new(0x10), iommu.alloc_domain().unwrap())
    }

    #[test]
    fn starts_created_and_inactive() {
        let iommu = EmulatedIommu::new();
        let binding = binding(&iommu);
        assert_eq!(binding.state(), DomainState::Created);
        assert!(!binding.is_active());
    }

    #[test]
    fn activate_then_deactivate() {
        let iommu = EmulatedIommu::new();
        let mut binding = binding(&iommu);

        binding.activate().unwrap();
        assert_eq!(binding.state(), DomainState::Attached);
        assert_eq!(iommu.probe(0).attached(), Some(DeviceId::new(0x10)));

        binding.deactivate();
        assert_eq!(binding.state(), DomainState::Detached);
        assert_eq!(iommu.probe(0).attached(), None);

        binding.activate().unwrap();
        assert!(binding.is_active());
    }

    #[test]
    fn redundant_attach_keeps_domain_attached() {
        let iommu = EmulatedIommu::new();
        let mut binding = binding(&iommu);

        binding.activate().unwrap();
        assert_eq!(binding.activate(), Err(HardwareError::AlreadyAttached));
        assert!(binding.is_active());
    }

    #[test]
    fn failed_first_attach_stays_inactive() {
        let iommu = EmulatedIommu::new();
        let mut binding = binding(&iommu);
        iommu.probe(0).fail_next_attach(HardwareError::Other(-16));

        assert_eq!(binding.activate(), Err(HardwareError::Other(-16)));
        assert_eq!(binding.state(), DomainState::Created);
    }

    #[test]
    fn deactivate_ignores_detach_errors() {
        let iommu = EmulatedIommu::new();
        let mut binding = binding(&iommu);

        // Never attached, so the hardware refuses to detach.
        binding.deactivate();
        assert_eq!(binding.state(), DomainState::Detached);
    }

    #[test]
    fn destroy_detaches_before_freeing() {
        let iommu = EmulatedIommu::new();
        let mut binding = binding(&iommu);
        binding.activate().unwrap();

        binding.destroy();
        let probe = iommu.probe(0);
        assert!(probe.is_freed());
        assert!(probe.was_detached_before_free());
    }
}

//! The I/O virtual memory manager.
//!
//! [`Iovmm`] is the face drivers see. It owns the IOMMU capability and the registry of
//! per-device address spaces, and routes each call to the right space.

use alloc::sync::Arc;

use crate::address::IoVirtualAddress;
use crate::config::IovaWindow;
use crate::device::DeviceId;
use crate::domain::IommuHardware;
use crate::error::IovmmError;
use crate::human_size::HumanSize;
use crate::mapping::ScatterSegment;
use crate::registry::Registry;
use crate::space::{AddressSpace, SpaceUsage};

/// Per-device I/O virtual memory manager.
///
/// A driver calls [`setup`](Self::setup) once per device, [`activate`](Self::activate) to
/// start translating, [`map`](Self::map) and [`unmap`](Self::unmap) for each DMA buffer, and
/// [`cleanup`](Self::cleanup) when the device goes away.
///
/// Every device gets its own copy of the window; addresses handed to different devices may
/// coincide.
pub struct Iovmm<H: IommuHardware> {
    hardware: H,
    window: IovaWindow,
    registry: Registry<H::Domain>,
}

impl<H: IommuHardware> Iovmm<H> {
    /// Creates a manager that gives every device the default window.
    pub const fn new(hardware: H) -> Self {
        Self::with_window(hardware, IovaWindow::DEFAULT)
    }

    /// Creates a manager that gives every device `window`.
    pub const fn with_window(hardware: H, window: IovaWindow) -> Self {
        Self {
            hardware,
            window,
            registry: Registry::new(),
        }
    }

    /// Returns the IOMMU behind this manager.
    pub fn hardware(&self) -> &H {
        &self.hardware
    }

    /// Returns the window every device gets.
    pub fn window(&self) -> IovaWindow {
        self.window
    }

    /// Creates an address space and a translation domain for `device`.
    ///
    /// The domain starts detached; call [`activate`](Self::activate) to attach it.
    pub fn setup(&self, device: DeviceId) -> Result<(), IovmmError> {
        if self.registry.contains(device) {
            log::warn!("{device}: setup called twice");
            return Err(IovmmError::AlreadyRegistered);
        }

        let Some(domain) = self.hardware.alloc_domain() else {
            log::error!("{device}: cannot allocate translation domain");
            return Err(IovmmError::OutOfMemory);
        };

        let space = Arc::new(AddressSpace::new(device, domain, self.window)?);
        if let Err(err) = self.registry.register(space.clone()) {
            log::warn!("{device}: lost setup race: {err}");
            space.teardown();
            return Err(err);
        }

        log::debug!(
            "{device}: created {} iova space at {}",
            HumanSize(self.window.size()),
            self.window.base()
        );
        Ok(())
    }

    /// Tears down everything `setup` created for `device`.
    ///
    /// The domain is detached if needed and freed, and mappings still live are dropped
    /// without being unmapped one by one. The caller must ensure nothing else operates on the
    /// device concurrently.
    pub fn cleanup(&self, device: DeviceId) {
        let Some(space) = self.registry.unregister(device) else {
            log::warn!("{device}: cleanup: {}", IovmmError::NotRegistered);
            return;
        };

        space.teardown();
        log::debug!("{device}: iova space destroyed");
    }

    /// Attaches the device's domain so the device starts translating through it.
    ///
    /// If the IOMMU rejects the attach the domain keeps its previous state; in particular a
    /// repeated activate reports the hardware's complaint but leaves the domain attached.
    pub fn activate(&self, device: DeviceId) -> Result<(), IovmmError> {
        self.space(device, "activate")?.activate()?;
        log::debug!("{device}: domain attached");
        Ok(())
    }

    /// Detaches the device's domain.
    ///
    /// Detach failures are logged and the domain is treated as detached anyway. May be called
    /// with interrupts disabled, including from interrupt handlers.
    pub fn deactivate(&self, device: DeviceId) {
        let Ok(space) = self.space(device, "deactivate") else {
            return;
        };
        if space.deactivate().is_ok() {
            log::debug!("{device}: domain detached");
        }
    }

    /// Maps `segments` into one contiguous range of the device's address space.
    ///
    /// Returns the device-visible address of the first byte, or [`IoVirtualAddress::NULL`] on
    /// any failure. The returned address keeps the first segment's offset within its page.
    pub fn map(&self, device: DeviceId, segments: &[ScatterSegment]) -> IoVirtualAddress {
        self.try_map(device, segments)
            .unwrap_or(IoVirtualAddress::NULL)
    }

    /// Like [`map`](Self::map), but reports why a mapping failed.
    pub fn try_map(
        &self,
        device: DeviceId,
        segments: &[ScatterSegment],
    ) -> Result<IoVirtualAddress, IovmmError> {
        self.space(device, "map")?.map(segments)
    }

    /// Removes the mapping `map` returned as `iova`.
    ///
    /// Unknown devices and addresses are logged and otherwise ignored. May be called with
    /// interrupts disabled, including from interrupt handlers.
    pub fn unmap(&self, device: DeviceId, iova: IoVirtualAddress) {
        let Ok(space) = self.space(device, "unmap") else {
            return;
        };

        match space.unmap(iova) {
            Ok(Some(_)) => {}
            Ok(None) => log::warn!("{device}: unmap: no mapping starts at {iova}"),
            Err(err) => log::warn!("{device}: unmap of {iova}: {err}"),
        }
    }

    /// Returns a snapshot of the device's address-space bookkeeping.
    pub fn usage(&self, device: DeviceId) -> Option<SpaceUsage> {
        self.registry.lookup(device)?.usage()
    }

    /// Returns true if `setup` has been called for `device` and `cleanup` has not.
    pub fn is_registered(&self, device: DeviceId) -> bool {
        self.registry.contains(device)
    }

    /// Returns the number of devices with an address space.
    pub fn device_count(&self) -> usize {
        self.registry.len()
    }

    fn space(
        &self,
        device: DeviceId,
        operation: &str,
    ) -> Result<Arc<AddressSpace<H::Domain>>, IovmmError> {
        self.registry.lookup(device).ok_or_else(|| {
            log::warn!("{device}: {operation}: {}", IovmmError::NotRegistered);
            IovmmError::NotRegistered
        })
    }
}

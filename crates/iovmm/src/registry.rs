//! Device to address-space registry.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use spin::RwLock;

use crate::arch;
use crate::device::DeviceId;
use crate::error::IovmmError;
use crate::space::AddressSpace;

/// Associates each registered device with its address space.
///
/// Lookups take the lock shared and hand out a reference-counted space, so the registry lock
/// is never held while a space's own lock is taken. Writers mask local interrupts so that a
/// lookup from an interrupt handler cannot spin against an interrupted writer.
pub struct Registry<D> {
    spaces: RwLock<BTreeMap<DeviceId, Arc<AddressSpace<D>>>>,
}

impl<D> Registry<D> {
    /// Creates an empty registry.
    pub const fn new() -> Self {
        Self {
            spaces: RwLock::new(BTreeMap::new()),
        }
    }

    /// Registers `space` under its device.
    pub fn register(&self, space: Arc<AddressSpace<D>>) -> Result<(), IovmmError> {
        let device = space.device();
        arch::without_interrupts(|| {
            let mut spaces = self.spaces.write();
            if spaces.contains_key(&device) {
                return Err(IovmmError::AlreadyRegistered);
            }
            spaces.insert(device, space);
            Ok(())
        })
    }

    /// Returns the space registered for `device`.
    pub fn lookup(&self, device: DeviceId) -> Option<Arc<AddressSpace<D>>> {
        self.spaces.read().get(&device).cloned()
    }

    /// Removes and returns the space registered for `device`.
    pub fn unregister(&self, device: DeviceId) -> Option<Arc<AddressSpace<D>>> {
        arch::without_interrupts(|| self.spaces.write().remove(&device))
    }

    /// Returns true if `device` has a registered space.
    pub fn contains(&self, device: DeviceId) -> bool {
        self.spaces.read().contains_key(&device)
    }

    /// Returns the number of registered devices.
    pub fn len(&self) -> usize {
        self.spaces.read().len()
    }
}

impl<D> Default for Registry<D> {
    fn default() -> Self {
        Self::new()
    }
}

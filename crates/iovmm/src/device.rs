//! Device identities.

use core::fmt;

/// Opaque identity of a DMA-capable device.
///
/// The manager never looks inside a device; it only uses the identity to find the device's
/// address space and passes it back to the IOMMU when attaching or detaching a domain. Bus
/// drivers typically derive it from the address of their device structure or a stream ID.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct DeviceId(usize);

impl DeviceId {
    /// Creates a device identity from a raw value.
    #[inline]
    pub const fn new(raw: usize) -> Self {
        Self(raw)
    }

    /// Creates a device identity from the address of a device structure.
    #[inline]
    pub fn from_ptr<T>(device: *const T) -> Self {
        Self(device as usize)
    }

    /// Returns the raw identity value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({:#x})", self.0)
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev@{:#x}", self.0)
    }
}

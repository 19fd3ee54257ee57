//! Error types.

use core::fmt;

/// Errors reported by the I/O virtual memory manager.
///
/// Only [`Iovmm::setup`](crate::Iovmm::setup), [`Iovmm::activate`](crate::Iovmm::activate)
/// and [`Iovmm::try_map`](crate::Iovmm::try_map) hand these to callers. Teardown paths log
/// them and carry on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IovmmError {
    /// The device has no address space; `setup` was never called for it.
    NotRegistered,
    /// The device already has an address space.
    AlreadyRegistered,
    /// No I/O virtual space left in the window, or a construction-time allocation failed.
    OutOfMemory,
    /// The IOMMU rejected a page-table install.
    MappingFailed(HardwareError),
    /// The IOMMU rejected attaching the domain to the device.
    AttachFailed(HardwareError),
    /// The scatter list is empty, covers no bytes, or its page-rounded segments would not
    /// fit the reservation computed for it.
    InvalidScatterList,
}

impl fmt::Display for IovmmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRegistered => write!(f, "device has no I/O address space"),
            Self::AlreadyRegistered => write!(f, "device already has an I/O address space"),
            Self::OutOfMemory => write!(f, "out of I/O virtual address space"),
            Self::MappingFailed(err) => write!(f, "page-table install failed: {err}"),
            Self::AttachFailed(err) => write!(f, "domain attach failed: {err}"),
            Self::InvalidScatterList => write!(f, "scatter list cannot be mapped contiguously"),
        }
    }
}

/// Errors reported by the IOMMU hardware behind an [`IommuDomain`](crate::IommuDomain).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareError {
    /// The domain is already attached to a device.
    AlreadyAttached,
    /// The domain is not attached to the device.
    NotAttached,
    /// The translation table has no room for another entry.
    TableFull,
    /// The address is already translated by this domain.
    AlreadyMapped,
    /// Driver-specific failure, usually a negated errno.
    Other(i32),
}

impl fmt::Display for HardwareError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyAttached => write!(f, "domain already attached"),
            Self::NotAttached => write!(f, "domain not attached"),
            Self::TableFull => write!(f, "translation table full"),
            Self::AlreadyMapped => write!(f, "address already mapped"),
            Self::Other(code) => write!(f, "hardware error {code}"),
        }
    }
}

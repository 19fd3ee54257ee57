#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # I/O Virtual Memory Manager (IOVMM)
//!
//! IOVMM sits between DMA-capable peripherals behind an IOMMU and the physical memory their
//! buffers live in. For every registered device it provides:
//!
//! - A private I/O virtual address window, carved up by a first-fit pool allocator.
//! - A translation domain, attached to and detached from the device on request.
//! - Mapping of scatter lists of physical segments into one contiguous device-visible
//!   range, installed with the largest translations alignment allows.
//! - Software emulation of the IOMMU and of interrupt masking for testing in non-kernel
//!   environments.
//!
//! Physical memory allocation and the page-table format of any particular IOMMU are out of
//! scope; the IOMMU is reached through [`IommuHardware`] and [`IommuDomain`].

extern crate alloc;

mod address;
mod arch;
mod config;
mod device;
mod domain;
mod error;
mod human_size;
mod manager;
mod mapping;
mod order;
mod pool;
mod region;
mod registry;
mod space;

pub use address::{IoVirtualAddress, PhysicalAddress, page_align};
pub use config::{IovaWindow, MAX_POOL_ALIGNMENT_ORDER, PAGE_SHIFT, PAGE_SIZE};
pub use device::DeviceId;
pub use domain::{DomainState, IommuDomain, IommuHardware};
pub use error::{HardwareError, IovmmError};
pub use human_size::HumanSize;
pub use manager::Iovmm;
pub use mapping::{ScatterLayout, ScatterSegment};
pub use order::Order;
pub use region::Region;
pub use space::SpaceUsage;

pub use arch::{interrupts_enabled, without_interrupts};

#[cfg(any(test, feature = "software-emulation"))]
pub use arch::{DomainProbe, EmulatedDomain, EmulatedIommu, Install};

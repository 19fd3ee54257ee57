//! Software emulation for testing and development.
//!
//! Provides a host-side stand-in for the two hardware facilities the manager depends on:
//! - Interrupt masking, emulated with a per-thread nesting counter.
//! - An IOMMU whose page table is a sorted map, with probes for inspecting and fault
//!   injection from tests.

mod interrupts;
mod iommu;

pub use interrupts::{interrupts_enabled, without_interrupts};
pub use iommu::{DomainProbe, EmulatedDomain, EmulatedIommu, Install};

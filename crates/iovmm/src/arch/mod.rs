//! Architecture-specific support.
//!
//! The manager needs exactly one thing from the CPU: a way to run a critical section with
//! local interrupts masked, so that [`deactivate`](crate::Iovmm::deactivate) and
//! [`unmap`](crate::Iovmm::unmap) can be called from contexts that already run with
//! interrupts disabled without deadlocking against an interrupted holder of the same lock.

// Hardware implementations are compiled for their target even during tests so that
// rust-analyzer can see them, but only exported outside of tests and emulation.
#[cfg(target_arch = "x86_64")]
mod x86_64;
#[cfg(all(target_arch = "x86_64", not(test), not(feature = "software-emulation")))]
pub use self::x86_64::*;

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(all(target_arch = "aarch64", not(test), not(feature = "software-emulation")))]
pub use self::aarch64::*;

#[cfg(target_arch = "arm")]
mod arm;
#[cfg(all(target_arch = "arm", not(test), not(feature = "software-emulation")))]
pub use self::arm::*;

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod software;
#[cfg(any(test, feature = "software-emulation"))]
pub use software::*;

#[cfg(not(any(
    test,
    feature = "software-emulation",
    target_arch = "x86_64",
    target_arch = "aarch64",
    target_arch = "arm"
)))]
compile_error!("unsupported architecture; enable the `software-emulation` feature");

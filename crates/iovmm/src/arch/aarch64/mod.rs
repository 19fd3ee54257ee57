//! AArch64 interrupt masking, via the `DAIF.I` bit.

use core::arch::asm;

/// IRQ mask bit in `DAIF`.
const DAIF_I: u64 = 1 << 7;

/// Runs `f` with local IRQs masked, restoring the previous `DAIF` afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let daif: u64;
    // SAFETY: Masking IRQs on the local CPU only affects PSTATE. The asm is not `nomem` so it
    // also orders the critical section's memory accesses after the mask.
    unsafe {
        asm!("mrs {0}, daif", "msr daifset, #2", out(reg) daif, options(nostack));
    }

    let result = f();

    // SAFETY: Restores exactly the PSTATE.DAIF value read above.
    unsafe {
        asm!("msr daif, {0}", in(reg) daif, options(nostack));
    }

    result
}

/// Returns true if local IRQs are unmasked.
#[inline]
pub fn interrupts_enabled() -> bool {
    let daif: u64;
    // SAFETY: Reading DAIF has no side effects.
    unsafe {
        asm!("mrs {0}, daif", out(reg) daif, options(nomem, nostack, preserves_flags));
    }
    daif & DAIF_I == 0
}

//! 32-bit ARM interrupt masking, via the `CPSR.I` bit.

use core::arch::asm;

/// IRQ disable bit in `CPSR`.
const CPSR_I: u32 = 1 << 7;

/// Runs `f` with local IRQs disabled, restoring the previous `CPSR` control bits afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    let cpsr: u32;
    // SAFETY: Disabling IRQs on the local CPU only affects the CPSR control field.
    unsafe {
        asm!("mrs {0}, cpsr", "cpsid i", out(reg) cpsr, options(nostack));
    }

    let result = f();

    // SAFETY: Restores exactly the control field read above.
    unsafe {
        asm!("msr cpsr_c, {0}", in(reg) cpsr, options(nostack));
    }

    result
}

/// Returns true if local IRQs are enabled.
#[inline]
pub fn interrupts_enabled() -> bool {
    let cpsr: u32;
    // SAFETY: Reading CPSR has no side effects.
    unsafe {
        asm!("mrs {0}, cpsr", out(reg) cpsr, options(nomem, nostack, preserves_flags));
    }
    cpsr & CPSR_I == 0
}

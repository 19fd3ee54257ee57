//! x86_64 interrupt masking, via `RFLAGS.IF`.

/// Runs `f` with local interrupts disabled, restoring the previous state afterwards.
#[inline]
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    ::x86_64::instructions::interrupts::without_interrupts(f)
}

/// Returns true if local interrupts are enabled.
#[inline]
pub fn interrupts_enabled() -> bool {
    ::x86_64::instructions::interrupts::are_enabled()
}

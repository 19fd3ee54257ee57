//! Emulated local interrupt masking.

use core::cell::Cell;

std::thread_local! {
    /// Nesting depth of masked sections on this thread; zero means interrupts are enabled.
    static MASK_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Restores the enclosing mask depth, including when the critical section unwinds.
struct Unmask;

impl Drop for Unmask {
    fn drop(&mut self) {
        MASK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Runs `f` with emulated interrupts masked on the current thread.
pub fn without_interrupts<F, R>(f: F) -> R
where
    F: FnOnce() -> R,
{
    MASK_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let _unmask = Unmask;
    f()
}

/// Returns true if no masked section is active on the current thread.
pub fn interrupts_enabled() -> bool {
    MASK_DEPTH.with(|depth| depth.get() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_for_the_duration_of_the_section() {
        assert!(interrupts_enabled());
        let inside = without_interrupts(interrupts_enabled);
        assert!(!inside);
        assert!(interrupts_enabled());
    }

    #[test]
    fn sections_nest() {
        without_interrupts(|| {
            without_interrupts(|| assert!(!interrupts_enabled()));
            assert!(!interrupts_enabled());
        });
        assert!(interrupts_enabled());
    }

    #[test]
    fn masking_is_per_thread() {
        without_interrupts(|| {
            let other = std::thread::spawn(interrupts_enabled).join().unwrap();
            assert!(other);
        });
    }
}

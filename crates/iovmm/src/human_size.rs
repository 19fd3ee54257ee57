//! Human-readable byte counts for log lines.

use core::fmt;

/// Formats a byte count with binary prefixes, as used in mapping diagnostics.
///
/// Exact multiples print without a fraction; anything else prints one decimal, truncated.
///
/// ```
/// use iovmm::HumanSize;
///
/// assert_eq!(format!("{}", HumanSize(512)), "512B");
/// assert_eq!(format!("{}", HumanSize(8192)), "8KiB");
/// assert_eq!(format!("{}", HumanSize(0x18_0000)), "1.5MiB");
/// assert_eq!(format!("{}", HumanSize(0x2000_0000)), "512MiB");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct HumanSize(pub usize);

impl From<usize> for HumanSize {
    #[inline]
    fn from(value: usize) -> Self {
        Self(value)
    }
}

impl fmt::Display for HumanSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];

        let mut unit = 0;
        let mut scale = 1usize;
        while unit + 1 < UNITS.len() && self.0 / scale >= 1024 {
            scale <<= 10;
            unit += 1;
        }

        let whole = self.0 / scale;
        let rest = self.0 % scale;
        if rest == 0 {
            write!(f, "{}{}", whole, UNITS[unit])
        } else {
            let tenths = (rest as u128 * 10 / scale as u128) as usize;
            write!(f, "{}.{}{}", whole, tenths, UNITS[unit])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_small_counts_as_bytes() {
        assert_eq!(format!("{}", HumanSize(0)), "0B");
        assert_eq!(format!("{}", HumanSize(1023)), "1023B");
    }

    #[test]
    fn formats_page_multiples() {
        assert_eq!(format!("{}", HumanSize(4096)), "4KiB");
        assert_eq!(format!("{}", HumanSize(0x10_0000)), "1MiB");
        assert_eq!(format!("{}", HumanSize(0x4000_0000)), "1GiB");
    }

    #[test]
    fn truncates_to_one_decimal() {
        assert_eq!(format!("{}", HumanSize(1536)), "1.5KiB");
        assert_eq!(format!("{}", HumanSize(0x5000)), "20KiB");
        assert_eq!(format!("{}", HumanSize(1025)), "1.0KiB");
        assert_eq!(format!("{}", HumanSize(2047)), "1.9KiB");
        assert_eq!(format!("{}", HumanSize(0x1F_FFFF)), "1.9MiB");
    }
}

//! Capacity evaluation against a fixed optical-media size
//!
//! Tier thresholds are decided with integer arithmetic so the boundaries are
//! exact; the floating-point percentage is only used for display.

use std::fmt;

/// Single-layer DVD capacity in decimal bytes
pub const DVD5_CAPACITY: u64 = 4_700_000_000;

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;
const GIB: u64 = 1024 * MIB;

/// Status classification of a capacity reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StatusTier {
    /// At most 80% of the reference capacity
    Ok,
    /// Above 80% and at most 100%
    Warning,
    /// Above 100%
    Over,
}

impl fmt::Display for StatusTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::Warning => write!(f, "Warning"),
            Self::Over => write!(f, "Over capacity"),
        }
    }
}

/// A derived capacity readout; never stored, recomputed per selection
#[derive(Debug, Clone, PartialEq)]
pub struct CapacityReading {
    pub total_bytes: u64,
    pub formatted_size: String,
    /// Unclamped percentage, may exceed 100
    pub percent: f64,
    /// Progress bar fill in `[0.0, 1.0]`
    pub fill: f32,
    pub tier: StatusTier,
}

impl CapacityReading {
    pub fn exceeds_capacity(&self) -> bool {
        self.tier == StatusTier::Over
    }

    /// Percentage text as shown to the user
    pub fn percent_text(&self) -> String {
        format!("{:.2}%", self.percent)
    }
}

/// Evaluate `total_bytes` against `reference_bytes`
///
/// A zero reference is treated as a capacity of one byte so the reading stays
/// finite.
pub fn evaluate(total_bytes: u64, reference_bytes: u64) -> CapacityReading {
    let reference = reference_bytes.max(1);
    let percent = total_bytes as f64 / reference as f64 * 100.0;

    CapacityReading {
        total_bytes,
        formatted_size: format_size(total_bytes),
        percent,
        fill: (percent / 100.0).clamp(0.0, 1.0) as f32,
        tier: tier_for(total_bytes, reference),
    }
}

fn tier_for(total: u64, reference: u64) -> StatusTier {
    let total = total as u128;
    let reference = reference as u128;

    if total * 100 <= reference * 80 {
        StatusTier::Ok
    } else if total <= reference {
        StatusTier::Warning
    } else {
        StatusTier::Over
    }
}

/// Human-readable size: whole KB (rounded up) below 1 MB, then MB and GB with
/// two decimals
///
/// The unit is picked after rounding, so a value never reads as 1024 of the
/// smaller unit.
pub fn format_size(bytes: u64) -> String {
    let kb = bytes.div_ceil(KIB);
    if kb < 1024 {
        return format!("{} KB", kb);
    }

    let mb = bytes as f64 / MIB as f64;
    if (mb * 100.0).round() < 1024.0 * 100.0 {
        format!("{:.2} MB", mb)
    } else {
        format!("{:.2} GB", bytes as f64 / GIB as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_capacity_is_100_percent() {
        let reading = evaluate(DVD5_CAPACITY, DVD5_CAPACITY);
        assert_eq!(reading.percent, 100.0);
        assert_eq!(reading.tier, StatusTier::Warning);
        assert_eq!(reading.fill, 1.0);
    }

    #[test]
    fn test_tier_boundaries_are_exact() {
        let cap = 1_000_000;
        assert_eq!(evaluate(800_000, cap).tier, StatusTier::Ok);
        assert_eq!(evaluate(800_100, cap).tier, StatusTier::Warning);
        assert_eq!(evaluate(1_000_000, cap).tier, StatusTier::Warning);
        assert_eq!(evaluate(1_000_100, cap).tier, StatusTier::Over);

        assert_eq!(evaluate(DVD5_CAPACITY / 100 * 80, DVD5_CAPACITY).tier, StatusTier::Ok);
    }

    #[test]
    fn test_over_capacity_percent_is_unclamped() {
        let reading = evaluate(DVD5_CAPACITY * 2, DVD5_CAPACITY);
        assert_eq!(reading.percent, 200.0);
        assert_eq!(reading.fill, 1.0);
        assert!(reading.exceeds_capacity());
        assert_eq!(reading.percent_text(), "200.00%");
    }

    #[test]
    fn test_evaluate_is_monotonic() {
        let mut previous = evaluate(0, DVD5_CAPACITY);
        assert_eq!(previous.fill, 0.0);
        for step in 1..=60u64 {
            let reading = evaluate(step * 100_000_000, DVD5_CAPACITY);
            assert!(reading.percent >= previous.percent);
            assert!(reading.tier >= previous.tier);
            assert!(reading.fill >= previous.fill);
            previous = reading;
        }
    }

    #[test]
    fn test_format_size_boundaries() {
        assert_eq!(format_size(0), "0 KB");
        assert_eq!(format_size(1), "1 KB");
        assert_eq!(format_size(1023 * KIB), "1023 KB");
        assert_eq!(format_size(1024 * KIB), "1.00 MB");
        assert_eq!(format_size(1023 * MIB + 990 * KIB), "1023.97 MB");
        assert_eq!(format_size(1024 * MIB), "1.00 GB");
        assert_eq!(format_size(DVD5_CAPACITY), "4.38 GB");
    }

    #[test]
    fn test_format_size_never_shows_1024_of_a_unit() {
        assert_eq!(format_size(MIB - 1), "1.00 MB");
        assert_eq!(format_size(1023 * KIB + 1), "1.00 MB");
        assert_eq!(format_size(GIB - 1), "1.00 GB");
        assert_eq!(format_size(GIB - 6 * KIB), "1023.99 MB");
    }

    #[test]
    fn test_zero_reference_does_not_divide_by_zero() {
        let reading = evaluate(10, 0);
        assert!(reading.percent.is_finite());
        assert_eq!(reading.tier, StatusTier::Over);
    }
}

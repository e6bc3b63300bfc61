//! Whether a candidate tick is clearly better than an incumbent tick.
//!
//! Entering the bank needs a bigger margin than staying in it. Both checks
//! refuse when either tick is zero or unknown.

use crate::cheque::Tick;

/// Minimum absolute gain for a candidate to enter.
pub const ENTRY_MIN_GAIN: f64 = 5.0;
/// Absolute gain that admits a candidate regardless of ratio.
pub const ENTRY_BIG_GAIN: f64 = 100.0;
/// Maximum candidate/incumbent ratio for a candidate to enter.
pub const ENTRY_MAX_RATIO: f64 = 0.85;
/// Absolute gain that displaces an incumbent.
pub const RETENTION_GAIN: f64 = 20.0;
/// Maximum candidate/incumbent ratio that displaces an incumbent.
pub const RETENTION_MAX_RATIO: f64 = 0.9;

pub fn admit_for_entry(incumbent: &Tick, candidate: &Tick) -> bool {
    let (Some(incumbent), Some(candidate)) = (incumbent.value(), candidate.value()) else {
        return false;
    };
    let gain = incumbent - candidate;
    gain >= ENTRY_MIN_GAIN && (gain >= ENTRY_BIG_GAIN || candidate / incumbent <= ENTRY_MAX_RATIO)
}

pub fn admit_for_retention(incumbent: &Tick, candidate: &Tick) -> bool {
    let (Some(incumbent), Some(candidate)) = (incumbent.value(), candidate.value()) else {
        return false;
    };
    incumbent - candidate >= RETENTION_GAIN || candidate / incumbent <= RETENTION_MAX_RATIO
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(incumbent: i64, candidate: i64) -> bool {
        admit_for_entry(&Tick::Int(incumbent), &Tick::Int(candidate))
    }

    fn retention(incumbent: i64, candidate: i64) -> bool {
        admit_for_retention(&Tick::Int(incumbent), &Tick::Int(candidate))
    }

    #[test]
    fn test_entry_boundaries() {
        assert!(!entry(100, 94));
        assert!(!entry(100, 0));
        assert!(!entry(105, 0));
        assert!(entry(200, 90));
        assert!(entry(100, 85));
        assert!(!entry(100, 86));
        // Ratio alone is not enough without the minimum gain.
        assert!(!entry(20, 16));
        assert!(entry(1000, 900));
    }

    #[test]
    fn test_retention_boundaries() {
        assert!(!retention(100, 94));
        assert!(retention(100, 90));
        assert!(!retention(100, 91));
        assert!(retention(1000, 980));
        assert!(!retention(1000, 981));
        assert!(!retention(0, 10));
        assert!(!retention(100, 0));
    }

    #[test]
    fn test_entry_is_stricter_than_retention() {
        assert!(retention(100, 90) && !entry(100, 90));
        assert!(retention(1000, 950) && !entry(1000, 950));
    }

    #[test]
    fn test_unknown_ticks_are_refused() {
        assert!(!admit_for_entry(&Tick::unknown(), &Tick::Int(1)));
        assert!(!admit_for_retention(&Tick::Float(50.0), &Tick::unknown()));
        assert!(admit_for_retention(&Tick::Float(50.0), &Tick::Float(45.0)));
    }
}

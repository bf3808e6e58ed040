//! Cost classifier (spec §4.2).
//!
//! A pure function: two planner cost numbers in, one of three classes
//! out. No state, no I/O — kept as its own tiny module because the
//! thresholds are the one piece of behavior every caller (the dispatcher
//! and the `/explain` endpoint) must agree on byte-for-byte.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Class {
    Quick,
    Medium,
    Slow,
}

impl Class {
    pub const ALL: [Class; 3] = [Class::Quick, Class::Medium, Class::Slow];

    /// Lowercase name used in the `/explain` `"queue"` field and in
    /// metric labels, matching `original_source/postpass/handlers.go`'s
    /// `"quick"`/`"medium"`/`"slow"` strings.
    pub fn as_str(&self) -> &'static str {
        match self {
            Class::Quick => "quick",
            Class::Medium => "medium",
            Class::Slow => "slow",
        }
    }
}

impl fmt::Display for Class {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a planner cost pair. `med` is the integer average of the
/// startup and total cost (spec §3, invariant 4). Thresholds are strict:
/// `med < quick_medium` is Quick, `med < medium_slow` is Medium, else Slow.
pub fn classify(startup: f64, total: f64, quick_medium: i64, medium_slow: i64) -> Class {
    let med = ((startup + total) / 2.0) as i64;
    if med < quick_medium {
        Class::Quick
    } else if med < medium_slow {
        Class::Medium
    } else {
        Class::Slow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const QM: i64 = 150;
    const MS: i64 = 150_000;

    #[test]
    fn quick_below_threshold() {
        assert_eq!(classify(5.0, 15.0, QM, MS), Class::Quick);
    }

    #[test]
    fn quick_medium_boundary_is_exclusive_on_medium_side() {
        // med == 150 must NOT be Quick: threshold is strict '<'.
        assert_eq!(classify(150.0, 150.0, QM, MS), Class::Medium);
        assert_eq!(classify(149.0, 149.0, QM, MS), Class::Quick);
    }

    #[test]
    fn medium_between_thresholds() {
        assert_eq!(classify(500.0, 500.0, QM, MS), Class::Medium);
    }

    #[test]
    fn medium_slow_boundary_is_exclusive_on_slow_side() {
        assert_eq!(classify(150_000.0, 150_000.0, QM, MS), Class::Slow);
        assert_eq!(classify(149_999.0, 149_999.0, QM, MS), Class::Medium);
    }

    #[test]
    fn slow_far_above_threshold() {
        assert_eq!(classify(2_000_000.0, 2_000_000.0, QM, MS), Class::Slow);
    }

    #[test]
    fn classification_is_total() {
        // every finite pair maps to exactly one of the three classes —
        // exercised here by checking the function never panics across a
        // wide sweep and always returns a member of Class::ALL.
        for startup in [-1.0, 0.0, 1.0, 1e9] {
            for total in [-1.0, 0.0, 1.0, 1e9] {
                let c = classify(startup, total, QM, MS);
                assert!(Class::ALL.contains(&c));
            }
        }
    }
}

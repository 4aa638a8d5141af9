use std::fmt;

use serde::{Deserialize, Serialize};

pub type Timestamp = i64;

/// A closed interval of timestamps, `min <= max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    pub min: Timestamp,
    pub max: Timestamp,
}

impl TimeRange {
    pub fn new(min: Timestamp, max: Timestamp) -> Self {
        debug_assert!(min <= max, "time range [{min}, {max}] is inverted");
        Self { min, max }
    }

    /// `ts` lies beyond this range in the given scan direction.
    pub fn is_passed_by(&self, ts: Timestamp, ascending: bool) -> bool {
        if ascending {
            ts > self.max
        } else {
            ts < self.min
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_direction_comparisons() {
        let range = TimeRange::new(5, 9);
        assert!(range.is_passed_by(10, true));
        assert!(!range.is_passed_by(9, true));
        assert!(range.is_passed_by(4, false));
        assert!(!range.is_passed_by(5, false));
    }
}

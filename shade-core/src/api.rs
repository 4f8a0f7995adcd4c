//! SDK level ranges
//!
//! Both class definitions and shadow mappings are only valid for a range of
//! SDK levels. Ranges are inclusive on both ends.

use serde::{Deserialize, Serialize};
use shade_error::ConfigError;
use std::fmt;

/// Inclusive range of SDK levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApiRange {
    min: i32,
    max: i32,
}

impl ApiRange {
    /// Every SDK level
    pub const ALL: ApiRange = ApiRange {
        min: 1,
        max: i32::MAX,
    };

    pub fn new(min: i32, max: i32) -> Result<Self, ConfigError> {
        if min > max || min < 1 {
            return Err(ConfigError::InvalidApiRange(min, max));
        }
        Ok(Self { min, max })
    }

    /// `min` and every later SDK
    pub const fn since(min: i32) -> Self {
        Self { min, max: i32::MAX }
    }

    /// Every SDK up to and including `max`
    pub const fn up_to(max: i32) -> Self {
        Self { min: 1, max }
    }

    pub const fn exactly(sdk: i32) -> Self {
        Self { min: sdk, max: sdk }
    }

    pub const fn min(&self) -> i32 {
        self.min
    }

    pub const fn max(&self) -> i32 {
        self.max
    }

    #[inline]
    pub const fn contains(&self, sdk: i32) -> bool {
        sdk >= self.min && sdk <= self.max
    }

    pub const fn overlaps(&self, other: &ApiRange) -> bool {
        self.min <= other.max && other.min <= self.max
    }
}

impl Default for ApiRange {
    fn default() -> Self {
        ApiRange::ALL
    }
}

impl fmt::Display for ApiRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (1, i32::MAX) => write!(f, "all"),
            (min, i32::MAX) => write!(f, "{}+", min),
            (min, max) if min == max => write!(f, "{}", min),
            (min, max) => write!(f, "{}..={}", min, max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contains() {
        let range = ApiRange::new(23, 28).expect("valid range");
        assert!(range.contains(23));
        assert!(range.contains(28));
        assert!(!range.contains(29));
        assert!(ApiRange::ALL.contains(35));
    }

    #[test]
    fn test_overlaps() {
        assert!(ApiRange::since(29).overlaps(&ApiRange::up_to(30)));
        assert!(!ApiRange::since(29).overlaps(&ApiRange::up_to(28)));
        assert!(ApiRange::exactly(30).overlaps(&ApiRange::ALL));
    }

    #[test]
    fn test_invalid_range() {
        assert_eq!(ApiRange::new(30, 20), Err(ConfigError::InvalidApiRange(30, 20)));
    }

    #[test]
    fn test_display() {
        assert_eq!(ApiRange::ALL.to_string(), "all");
        assert_eq!(ApiRange::since(29).to_string(), "29+");
        assert_eq!(ApiRange::exactly(30).to_string(), "30");
        assert_eq!(ApiRange::up_to(28).to_string(), "1..=28");
    }
}

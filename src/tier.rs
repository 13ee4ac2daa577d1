//! Package tiers and the strategy range each one unlocks
//!
//! | Tier | Max strategy ID | Max phase |
//! |------|-----------------|-----------|
//! | Essentials | 0 | 0 |
//! | Foundation | 13 | 2 |
//! | Complete | 30 | 4 |
//! | Premium | 59 | 7 |
//!
//! The ID bounds sit on the catalog's phase boundaries, so a tier always
//! unlocks whole phases.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use crate::error::CrmError;

/// Service package a client is enrolled in
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PackageTier {
    Essentials = 0,
    Foundation = 1,
    Complete = 2,
    Premium = 3,
}

impl PackageTier {
    /// All tiers, lowest first
    pub const ALL: [PackageTier; 4] = [
        PackageTier::Essentials,
        PackageTier::Foundation,
        PackageTier::Complete,
        PackageTier::Premium,
    ];

    /// Highest catalog strategy ID reachable by this tier
    pub fn max_strategy_id(self) -> u32 {
        match self {
            PackageTier::Essentials => 0,
            PackageTier::Foundation => 13,
            PackageTier::Complete => 30,
            PackageTier::Premium => 59,
        }
    }

    /// Highest workflow phase reachable by this tier
    pub fn max_phase(self) -> u32 {
        match self {
            PackageTier::Essentials => 0,
            PackageTier::Foundation => 2,
            PackageTier::Complete => 4,
            PackageTier::Premium => 7,
        }
    }

    /// Strategy IDs provisioned for this tier (empty for Essentials)
    pub fn strategy_range(self) -> RangeInclusive<u32> {
        1..=self.max_strategy_id()
    }

    pub fn includes_strategy(self, strategy_id: u32) -> bool {
        self.strategy_range().contains(&strategy_id)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PackageTier::Essentials => "Essentials",
            PackageTier::Foundation => "Foundation",
            PackageTier::Complete => "Complete",
            PackageTier::Premium => "Premium",
        }
    }

    /// Parse a stored tier name, ignoring case. Returns None for unknown names.
    pub fn from_db_value(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "essentials" => Some(PackageTier::Essentials),
            "foundation" => Some(PackageTier::Foundation),
            "complete" => Some(PackageTier::Complete),
            "premium" => Some(PackageTier::Premium),
            _ => None,
        }
    }
}

impl fmt::Display for PackageTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PackageTier {
    type Err = CrmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PackageTier::from_db_value(s)
            .ok_or_else(|| CrmError::InvalidInput(format!("unknown package tier '{}'", s)))
    }
}

/// Max strategy ID for a tier name. Unknown tiers get no strategies.
pub fn max_strategy_id(tier: &str) -> u32 {
    PackageTier::from_db_value(tier).map_or(0, PackageTier::max_strategy_id)
}

/// Max phase for a tier name. Unknown tiers get phase 0.
pub fn max_phase(tier: &str) -> u32 {
    PackageTier::from_db_value(tier).map_or(0, PackageTier::max_phase)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_essentials_has_no_strategies() {
        assert_eq!(max_strategy_id("Essentials"), 0);
        assert_eq!(max_phase("Essentials"), 0);
        assert!(PackageTier::Essentials.strategy_range().is_empty());
    }

    #[test]
    fn test_bounds_non_decreasing_across_tiers() {
        for pair in PackageTier::ALL.windows(2) {
            assert!(pair[0].max_strategy_id() <= pair[1].max_strategy_id());
            assert!(pair[0].max_phase() <= pair[1].max_phase());
            assert!(pair[0] < pair[1]);
        }
    }

    #[test]
    fn test_table_values() {
        assert_eq!(max_strategy_id("Foundation"), 13);
        assert_eq!(max_strategy_id("Complete"), 30);
        assert_eq!(max_strategy_id("Premium"), 59);
        assert_eq!(max_phase("Foundation"), 2);
        assert_eq!(max_phase("Complete"), 4);
        assert_eq!(max_phase("Premium"), 7);
    }

    #[test]
    fn test_unknown_tier_gets_nothing() {
        assert_eq!(max_strategy_id("Platinum"), 0);
        assert_eq!(max_phase(""), 0);
        assert!("Platinum".parse::<PackageTier>().is_err());
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("premium".parse::<PackageTier>().unwrap(), PackageTier::Premium);
        assert_eq!(max_strategy_id(" FOUNDATION "), 13);
    }

    #[test]
    fn test_includes_strategy() {
        assert!(PackageTier::Foundation.includes_strategy(13));
        assert!(!PackageTier::Foundation.includes_strategy(14));
        assert!(!PackageTier::Foundation.includes_strategy(0));
    }
}

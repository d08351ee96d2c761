//! Volume-level labels from traded amount and turnover.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::data::normalize::YI;

/// Qualitative trading-volume label shown on the leaderboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeLevel {
    Surge,
    Strong,
    Mild,
    Normal,
    Shrinking,
    Unknown,
}

impl VolumeLevel {
    pub fn label(&self) -> &'static str {
        match self {
            VolumeLevel::Surge => "强放量",
            VolumeLevel::Strong => "明显放量",
            VolumeLevel::Mild => "温和放量",
            VolumeLevel::Normal => "正常",
            VolumeLevel::Shrinking => "缩量",
            VolumeLevel::Unknown => "-",
        }
    }
}

impl fmt::Display for VolumeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Classify volume by amount tier; turnover thresholds rise as size falls.
pub fn classify_volume_level(amount: Option<f64>, turnover: Option<f64>) -> VolumeLevel {
    let (Some(amount), Some(turnover)) = (amount, turnover) else {
        return VolumeLevel::Unknown;
    };
    let yi = amount / YI;

    // (surge, strong, mild) turnover thresholds per tier
    let tiers = if yi >= 10.0 {
        Some((10.0, 5.0, 3.0))
    } else if yi >= 5.0 {
        Some((15.0, 8.0, 5.0))
    } else if yi >= 2.0 {
        Some((30.0, 20.0, 10.0))
    } else {
        None
    };

    match tiers {
        Some((surge, strong, mild)) => {
            if turnover >= surge {
                VolumeLevel::Surge
            } else if turnover >= strong {
                VolumeLevel::Strong
            } else if turnover >= mild {
                VolumeLevel::Mild
            } else {
                VolumeLevel::Normal
            }
        }
        None if turnover >= 15.0 => VolumeLevel::Mild,
        None if turnover < 3.0 => VolumeLevel::Shrinking,
        None => VolumeLevel::Normal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_large_caps() {
        assert_eq!(classify_volume_level(Some(12.0 * YI), Some(11.0)), VolumeLevel::Surge);
        assert_eq!(classify_volume_level(Some(12.0 * YI), Some(6.0)), VolumeLevel::Strong);
        assert_eq!(classify_volume_level(Some(12.0 * YI), Some(3.0)), VolumeLevel::Mild);
        assert_eq!(classify_volume_level(Some(12.0 * YI), Some(1.0)), VolumeLevel::Normal);
    }

    #[test]
    fn test_mid_tiers() {
        assert_eq!(classify_volume_level(Some(6.0 * YI), Some(8.0)), VolumeLevel::Strong);
        assert_eq!(classify_volume_level(Some(6.0 * YI), Some(4.9)), VolumeLevel::Normal);
        assert_eq!(classify_volume_level(Some(3.0 * YI), Some(25.0)), VolumeLevel::Strong);
        assert_eq!(classify_volume_level(Some(3.0 * YI), Some(30.0)), VolumeLevel::Surge);
    }

    #[test]
    fn test_small_amounts() {
        assert_eq!(classify_volume_level(Some(1.0 * YI), Some(16.0)), VolumeLevel::Mild);
        assert_eq!(classify_volume_level(Some(1.0 * YI), Some(2.0)), VolumeLevel::Shrinking);
        assert_eq!(classify_volume_level(Some(1.0 * YI), Some(5.0)), VolumeLevel::Normal);
    }

    #[test]
    fn test_missing_inputs() {
        assert_eq!(classify_volume_level(None, Some(5.0)), VolumeLevel::Unknown);
        assert_eq!(classify_volume_level(Some(YI), None), VolumeLevel::Unknown);
        assert_eq!(VolumeLevel::Unknown.to_string(), "-");
        assert_eq!(VolumeLevel::Surge.to_string(), "强放量");
    }
}

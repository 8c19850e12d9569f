//! 节奏档位：safe / balanced / fast-human
//!
//! 同一档位同时作用于拟人化延迟（倍率、分心概率偏置）与节流（延迟倍率、警告放大系数）。

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", from = "String")]
pub enum PacingProfile {
    Safe,
    #[default]
    Balanced,
    FastHuman,
}

impl PacingProfile {
    /// 未知名称回退到 balanced
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_lowercase().as_str() {
            "safe" => Self::Safe,
            "fast-human" | "fast_human" => Self::FastHuman,
            _ => Self::Balanced,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Safe => "safe",
            Self::Balanced => "balanced",
            Self::FastHuman => "fast-human",
        }
    }

    /// HumanPacer 的整体倍率
    pub(crate) fn pace_mult(&self) -> f64 {
        match self {
            Self::Safe => 1.22,
            Self::Balanced => 1.0,
            Self::FastHuman => 0.88,
        }
    }

    /// 犹豫 / 分心概率的加性偏置
    pub(crate) fn distraction_boost(&self) -> f64 {
        match self {
            Self::Safe => 0.01,
            Self::Balanced => 0.0,
            Self::FastHuman => -0.005,
        }
    }

    /// Throttle 的整体倍率
    pub(crate) fn throttle_mult(&self) -> f64 {
        match self {
            Self::Safe => 1.16,
            Self::Balanced => 1.0,
            Self::FastHuman => 0.9,
        }
    }

    /// 每次警告的惩罚放大系数
    pub(crate) fn warning_boost(&self) -> f64 {
        match self {
            Self::Safe => 1.1,
            Self::Balanced => 1.0,
            Self::FastHuman => 0.92,
        }
    }
}

impl From<String> for PacingProfile {
    fn from(value: String) -> Self {
        Self::from_name(&value)
    }
}

impl fmt::Display for PacingProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_profile_from_name_falls_back_to_balanced() {
        assert_eq!(PacingProfile::from_name("SAFE"), PacingProfile::Safe);
        assert_eq!(PacingProfile::from_name("fast-human"), PacingProfile::FastHuman);
        assert_eq!(PacingProfile::from_name("turbo"), PacingProfile::Balanced);
        assert_eq!(PacingProfile::from_name(""), PacingProfile::Balanced);
    }

    #[test]
    fn test_profile_deserialize_lenient() {
        let p: PacingProfile = serde_json::from_str("\"fast-human\"").unwrap();
        assert_eq!(p, PacingProfile::FastHuman);
        let p: PacingProfile = serde_json::from_str("\"whatever\"").unwrap();
        assert_eq!(p, PacingProfile::Balanced);
    }

    #[test]
    fn test_safe_is_slower_than_fast_human() {
        assert!(PacingProfile::Safe.pace_mult() > PacingProfile::FastHuman.pace_mult());
        assert!(PacingProfile::Safe.throttle_mult() > PacingProfile::FastHuman.throttle_mult());
    }
}

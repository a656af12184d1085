//! Priority tiers for job scheduling

use serde::{Deserialize, Serialize};

/// Scheduling tier of a pipeline
///
/// Ordering is total: `Forced > High > Normal`. Within a tier jobs run in
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    #[default]
    Normal,
    High,
    Forced,
}

impl Priority {
    /// Map the `priority` run option to a tier
    ///
    /// `force` selects Forced, `high` selects High, anything else (including
    /// no value) is Normal.
    pub fn from_option(value: Option<&str>) -> Self {
        match value {
            Some("force") => Self::Forced,
            Some("high") => Self::High,
            _ => Self::Normal,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::High => write!(f, "high"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

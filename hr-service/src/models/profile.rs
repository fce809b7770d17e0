//! Denormalized profile mirror of the authoritative subscription row.

use serde::{Deserialize, Serialize};

/// Collapsed subscription tier. Anything that is not verifiably premium
/// collapses to free.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProfileStatus {
    Free,
    Premium,
}

impl ProfileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileStatus::Free => "free",
            ProfileStatus::Premium => "premium",
        }
    }

    pub fn from_stored(s: &str) -> Self {
        match s {
            "premium" => ProfileStatus::Premium,
            _ => ProfileStatus::Free,
        }
    }
}

//! Rating records and the per-farm aggregation rules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{FarmgateError, Result};
use crate::session::SessionToken;

/// Highest star value a voter may give.
pub const MAX_STARS: u8 = 5;

/// Stable identity of whoever cast a rating.
///
/// Signed-in accounts vote as `user_{account_id}`, anonymous visitors as
/// `anon_{session_token}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VoterId(String);

impl VoterId {
    pub fn account(account_id: impl fmt::Display) -> Self {
        Self(format!("user_{}", account_id))
    }

    pub fn anonymous(token: &SessionToken) -> Self {
        Self(format!("anon_{}", token))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with("anon_")
    }
}

impl From<&str> for VoterId {
    fn from(raw: &str) -> Self {
        Self(raw.to_string())
    }
}

impl fmt::Display for VoterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A validated rating submission. Zero means "clear my rating".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingValue {
    Clear,
    Stars(u8),
}

impl RatingValue {
    /// Validate a raw submitted value.
    ///
    /// # Errors
    ///
    /// Values outside `0..=5` are rejected with a validation error.
    pub fn parse(raw: i64) -> Result<Self> {
        match raw {
            0 => Ok(Self::Clear),
            1..=5 => Ok(Self::Stars(raw as u8)),
            _ => Err(FarmgateError::validation(format!(
                "Rating must be between 0 and {}, got {}",
                MAX_STARS, raw
            ))),
        }
    }

    pub fn stars(self) -> Option<u8> {
        match self {
            Self::Clear => None,
            Self::Stars(n) => Some(n),
        }
    }
}

/// What happens when a voter who already rated a farm submits again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalPolicy {
    /// A new star value replaces the old one; zero removes it.
    #[default]
    ReplaceUnlessZero,
    /// Any resubmission removes the existing rating.
    ToggleOff,
}

impl RemovalPolicy {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace_unless_zero" | "replace" => Some(Self::ReplaceUnlessZero),
            "toggle_off" | "toggle" => Some(Self::ToggleOff),
            _ => None,
        }
    }
}

/// One voter's rating of one farm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatingEntry {
    pub voter_id: VoterId,
    pub value: u8,
    pub timestamp: DateTime<Utc>,
}

/// How a submission changed the stored ratings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingAction {
    Added,
    Updated,
    Removed,
    None,
}

/// A farm's ratings together with their running mean.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RatedFarm {
    pub entity_id: String,
    pub average_rating: f64,
    /// In submission order, at most one entry per voter.
    pub ratings: Vec<RatingEntry>,
    /// Bumped on every save; used for compare-and-save.
    pub version: u64,
}

impl RatedFarm {
    pub fn new(entity_id: impl Into<String>) -> Self {
        Self {
            entity_id: entity_id.into(),
            average_rating: 0.0,
            ratings: Vec::new(),
            version: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.ratings.len()
    }

    pub fn rating_of(&self, voter_id: &VoterId) -> Option<u8> {
        self.ratings
            .iter()
            .find(|entry| &entry.voter_id == voter_id)
            .map(|entry| entry.value)
    }

    /// Apply a submission in place and recompute the average.
    pub fn apply(
        &mut self,
        voter_id: &VoterId,
        value: RatingValue,
        policy: RemovalPolicy,
        now: DateTime<Utc>,
    ) -> RatingAction {
        let existing = self.ratings.iter().position(|entry| &entry.voter_id == voter_id);

        let action = match (existing, value, policy) {
            (Some(idx), RatingValue::Clear, _) | (Some(idx), _, RemovalPolicy::ToggleOff) => {
                self.ratings.remove(idx);
                RatingAction::Removed
            }
            (Some(idx), RatingValue::Stars(stars), RemovalPolicy::ReplaceUnlessZero) => {
                let entry = &mut self.ratings[idx];
                entry.value = stars;
                entry.timestamp = now;
                RatingAction::Updated
            }
            (None, RatingValue::Stars(stars), _) => {
                self.ratings.push(RatingEntry {
                    voter_id: voter_id.clone(),
                    value: stars,
                    timestamp: now,
                });
                RatingAction::Added
            }
            (None, RatingValue::Clear, _) => RatingAction::None,
        };

        self.recompute_average();
        action
    }

    fn recompute_average(&mut self) {
        self.average_rating = if self.ratings.is_empty() {
            0.0
        } else {
            let total: u32 = self.ratings.iter().map(|entry| u32::from(entry.value)).sum();
            f64::from(total) / self.ratings.len() as f64
        };
    }
}

/// Result of a rating submission.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingOutcome {
    pub average: f64,
    pub count: usize,
    pub action: RatingAction,
}

/// Aggregate view of a farm's ratings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingSummary {
    pub average: f64,
    pub count: usize,
}

/// Aggregate view plus the caller's own rating, if any.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct RatingInfo {
    pub average: f64,
    pub count: usize,
    pub voter_rating: Option<u8>,
}

//! Farm rating aggregation.
//!
//! Each voter holds at most one rating per farm. Submissions go through
//! [`RatingAggregator`], which applies the configured [`RemovalPolicy`],
//! recomputes the mean and persists the farm through an atomic per-farm update.

mod aggregator;
mod model;
mod store;

pub use aggregator::RatingAggregator;
pub use model::{
    MAX_STARS, RatedFarm, RatingAction, RatingEntry, RatingInfo, RatingOutcome, RatingSummary,
    RatingValue, RemovalPolicy, VoterId,
};
pub use store::{InMemoryRatingStore, RatingMutation, RatingStore};

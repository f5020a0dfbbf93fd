use chrono::Utc;

use super::model::{
    RatedFarm, RatingAction, RatingInfo, RatingOutcome, RatingSummary, RatingValue, RemovalPolicy,
    VoterId,
};
use super::store::RatingStore;
use crate::error::{FarmgateError, Result};

/// Maintains one rating per voter per farm and the farm's running mean.
pub struct RatingAggregator<S: RatingStore> {
    store: S,
    policy: RemovalPolicy,
}

impl<S: RatingStore> RatingAggregator<S> {
    #[must_use]
    pub fn new(store: S) -> Self {
        Self {
            store,
            policy: RemovalPolicy::default(),
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RemovalPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> RemovalPolicy {
        self.policy
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Create an empty rating record for a farm. Idempotent.
    pub async fn register_entity(&self, entity_id: &str) -> Result<RatingSummary> {
        validate_entity_id(entity_id)?;

        if self.store.insert_entity(&RatedFarm::new(entity_id)).await? {
            tracing::info!(target: "farmgate::ratings", entity_id = %entity_id, "Registered farm for ratings");
        }
        self.rating_summary(entity_id).await
    }

    /// Record, replace or remove `voter_id`'s rating of a farm.
    ///
    /// Concurrent submissions for one farm are serialized by the store, so
    /// callers never see a write conflict.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the farm has no rating record
    pub async fn submit_rating(
        &self,
        entity_id: &str,
        voter_id: &VoterId,
        value: RatingValue,
    ) -> Result<RatingOutcome> {
        let policy = self.policy;
        let mut apply = |entity: &mut RatedFarm| entity.apply(voter_id, value, policy, Utc::now());

        let (entity, action) = self
            .store
            .update_entity(entity_id, &mut apply)
            .await?
            .ok_or_else(|| FarmgateError::not_found(format!("Farm {}", entity_id)))?;

        if action != RatingAction::None {
            tracing::info!(
                target: "farmgate::ratings",
                entity_id = %entity_id,
                voter_id = %voter_id,
                action = ?action,
                average = entity.average_rating,
                count = entity.count(),
                "Rating submitted"
            );
        }
        Ok(RatingOutcome {
            average: entity.average_rating,
            count: entity.count(),
            action,
        })
    }

    pub async fn rating_summary(&self, entity_id: &str) -> Result<RatingSummary> {
        let entity = self.load(entity_id).await?;
        Ok(RatingSummary {
            average: entity.average_rating,
            count: entity.count(),
        })
    }

    pub async fn voter_rating(&self, entity_id: &str, voter_id: &VoterId) -> Result<Option<u8>> {
        Ok(self.load(entity_id).await?.rating_of(voter_id))
    }

    pub async fn rating_info(
        &self,
        entity_id: &str,
        voter_id: Option<&VoterId>,
    ) -> Result<RatingInfo> {
        let entity = self.load(entity_id).await?;
        Ok(RatingInfo {
            average: entity.average_rating,
            count: entity.count(),
            voter_rating: voter_id.and_then(|v| entity.rating_of(v)),
        })
    }

    async fn load(&self, entity_id: &str) -> Result<RatedFarm> {
        self.store
            .get_entity(entity_id)
            .await?
            .ok_or_else(|| FarmgateError::not_found(format!("Farm {}", entity_id)))
    }
}

fn validate_entity_id(entity_id: &str) -> Result<()> {
    if entity_id.trim().is_empty() {
        return Err(FarmgateError::validation("Farm id cannot be empty"));
    }
    if entity_id.len() > 128 {
        return Err(FarmgateError::validation("Farm id is too long"));
    }
    Ok(())
}

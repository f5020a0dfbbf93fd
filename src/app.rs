use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::ratings::{InMemoryRatingStore, RatingAggregator, RatingStore};
use crate::session::{InMemorySessionStore, SessionStore};
use crate::subscriptions::{
    InMemorySubscriptionStore, SubscriptionGate, SubscriptionManager, SubscriptionStore,
    SubscriptionSweeper,
};

pub type SharedRatingStore = Arc<dyn RatingStore>;
pub type SharedSubscriptionStore = Arc<dyn SubscriptionStore>;

/// Shared state handed to every handler.
///
/// Stores sit behind trait objects so a deployment can swap in its own
/// persistence without changing handler types.
#[derive(Clone)]
pub struct AppContext {
    pub ratings: Arc<RatingAggregator<SharedRatingStore>>,
    pub sessions: Arc<dyn SessionStore>,
    pub subscriptions: Arc<SubscriptionManager<SharedSubscriptionStore>>,
    pub gate: Arc<SubscriptionGate<SharedSubscriptionStore>>,
    pub subscription_store: SharedSubscriptionStore,
    pub config: Arc<Config>,
}

impl AppContext {
    /// Wire the components over the given stores.
    pub fn new(
        config: Config,
        rating_store: SharedRatingStore,
        subscription_store: SharedSubscriptionStore,
        sessions: Arc<dyn SessionStore>,
    ) -> Self {
        let ratings = RatingAggregator::new(rating_store).with_policy(config.ratings.removal_policy);
        let subscriptions =
            SubscriptionManager::new(subscription_store.clone(), config.subscriptions.clone());
        let gate = SubscriptionGate::new(
            subscription_store.clone(),
            config.subscriptions.exempt_paths.clone(),
        );

        Self {
            ratings: Arc::new(ratings),
            sessions,
            subscriptions: Arc::new(subscriptions),
            gate: Arc::new(gate),
            subscription_store,
            config: Arc::new(config),
        }
    }

    /// Everything in memory. Suitable for development and tests.
    pub fn in_memory(config: Config) -> Self {
        let sessions = InMemorySessionStore::new(Duration::from_secs(config.sessions.ttl_seconds));
        Self::new(
            config,
            Arc::new(InMemoryRatingStore::new()),
            Arc::new(InMemorySubscriptionStore::new()),
            Arc::new(sessions),
        )
    }

    /// Register the farms listed in `ratings.farms`. Idempotent.
    pub async fn register_configured_farms(&self) -> Result<usize> {
        for farm_id in &self.config.ratings.farms {
            self.ratings.register_entity(farm_id).await?;
        }
        Ok(self.config.ratings.farms.len())
    }

    /// A sweeper over this context's subscription store.
    pub fn sweeper(&self) -> SubscriptionSweeper<SharedSubscriptionStore> {
        SubscriptionSweeper::new(
            self.subscription_store.clone(),
            self.config.subscriptions.clone(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigBuilder;
    use crate::ratings::{RemovalPolicy, VoterId, RatingValue, RatingAction};

    #[tokio::test]
    async fn test_in_memory_context_honours_config() {
        let config = ConfigBuilder::new()
            .with_removal_policy(RemovalPolicy::ToggleOff)
            .build()
            .unwrap();
        let ctx = AppContext::in_memory(config);
        assert_eq!(ctx.ratings.policy(), RemovalPolicy::ToggleOff);

        ctx.ratings.register_entity("farm-1").await.unwrap();
        let voter = VoterId::account(1);
        ctx.ratings.submit_rating("farm-1", &voter, RatingValue::Stars(3)).await.unwrap();
        let out = ctx.ratings.submit_rating("farm-1", &voter, RatingValue::Stars(3)).await.unwrap();
        assert_eq!(out.action, RatingAction::Removed);
    }

    #[tokio::test]
    async fn test_configured_farms_are_registered() {
        let config = ConfigBuilder::new().with_farms(["farm-1", "farm-2"]).build().unwrap();
        let ctx = AppContext::in_memory(config);
        assert!(ctx.ratings.rating_summary("farm-1").await.is_err());

        assert_eq!(ctx.register_configured_farms().await.unwrap(), 2);
        ctx.ratings.submit_rating("farm-2", &VoterId::account(1), RatingValue::Stars(4)).await.unwrap();
        // Seeding again keeps existing ratings.
        ctx.register_configured_farms().await.unwrap();
        assert_eq!(ctx.ratings.rating_summary("farm-2").await.unwrap().count, 1);
        assert_eq!(ctx.ratings.rating_summary("farm-1").await.unwrap().count, 0);
    }

    #[tokio::test]
    async fn test_manager_and_gate_share_store() {
        let ctx = AppContext::in_memory(Config::default());
        ctx.subscriptions
            .create_subscription("farmer-1", crate::subscriptions::NewSubscription::trial())
            .await
            .unwrap();
        assert!(ctx.subscription_store.get_by_owner("farmer-1").await.unwrap().is_some());
        assert_eq!(ctx.sweeper().run_once(chrono::Utc::now()).await.unwrap().errors, 0);
    }
}

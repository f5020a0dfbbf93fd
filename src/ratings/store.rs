//! Persistence for rated farms.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::model::{RatedFarm, RatingAction};
use crate::error::Result;

/// Mutation applied to one farm by [`RatingStore::update_entity`].
pub type RatingMutation<'a> = dyn FnMut(&mut RatedFarm) -> RatingAction + Send + 'a;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Storage backend for rated farms.
///
/// Writes go through [`update_entity`](RatingStore::update_entity), which
/// serializes writers per farm. Stores that can lock a single record
/// override it; the default falls back to
/// [`compare_and_save`](RatingStore::compare_and_save) and retries until
/// the write lands.
#[async_trait]
pub trait RatingStore: Send + Sync {
    async fn get_entity(&self, entity_id: &str) -> Result<Option<RatedFarm>>;

    /// Insert a new farm. Returns `false` if one already exists.
    async fn insert_entity(&self, entity: &RatedFarm) -> Result<bool>;

    /// Save `entity` only if the stored version still equals `expected_version`.
    ///
    /// Returns `false` on a version mismatch or when the farm has vanished.
    /// Implementations store `entity.version` as given.
    async fn compare_and_save(&self, entity: &RatedFarm, expected_version: u64) -> Result<bool>;

    /// Apply `mutate` to the stored farm as one atomic step.
    ///
    /// The version is bumped only when the mutation reports a change.
    /// `mutate` may run more than once and must derive its result from the
    /// record it is given. Returns `None` if the farm does not exist.
    async fn update_entity(
        &self,
        entity_id: &str,
        mutate: &mut RatingMutation<'_>,
    ) -> Result<Option<(RatedFarm, RatingAction)>> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;
        loop {
            let Some(mut entity) = self.get_entity(entity_id).await? else {
                return Ok(None);
            };
            let expected_version = entity.version;

            let action = mutate(&mut entity);
            if action == RatingAction::None {
                return Ok(Some((entity, action)));
            }

            entity.version = expected_version + 1;
            if self.compare_and_save(&entity, expected_version).await? {
                return Ok(Some((entity, action)));
            }

            attempt += 1;
            tracing::debug!(
                target: "farmgate::ratings",
                entity_id = %entity_id,
                attempt,
                "Rating version conflict, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

#[async_trait]
impl<T: RatingStore + ?Sized> RatingStore for Arc<T> {
    async fn get_entity(&self, entity_id: &str) -> Result<Option<RatedFarm>> {
        (**self).get_entity(entity_id).await
    }

    async fn insert_entity(&self, entity: &RatedFarm) -> Result<bool> {
        (**self).insert_entity(entity).await
    }

    async fn compare_and_save(&self, entity: &RatedFarm, expected_version: u64) -> Result<bool> {
        (**self).compare_and_save(entity, expected_version).await
    }

    async fn update_entity(
        &self,
        entity_id: &str,
        mutate: &mut RatingMutation<'_>,
    ) -> Result<Option<(RatedFarm, RatingAction)>> {
        (**self).update_entity(entity_id, mutate).await
    }
}

/// In-memory rating store.
#[derive(Clone, Default)]
pub struct InMemoryRatingStore {
    entities: Arc<RwLock<HashMap<String, RatedFarm>>>,
}

impl InMemoryRatingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RatingStore for InMemoryRatingStore {
    async fn get_entity(&self, entity_id: &str) -> Result<Option<RatedFarm>> {
        Ok(self.entities.read().await.get(entity_id).cloned())
    }

    async fn insert_entity(&self, entity: &RatedFarm) -> Result<bool> {
        let mut entities = self.entities.write().await;
        if entities.contains_key(&entity.entity_id) {
            return Ok(false);
        }
        entities.insert(entity.entity_id.clone(), entity.clone());
        Ok(true)
    }

    async fn compare_and_save(&self, entity: &RatedFarm, expected_version: u64) -> Result<bool> {
        let mut entities = self.entities.write().await;
        match entities.get_mut(&entity.entity_id) {
            Some(current) if current.version == expected_version => {
                *current = entity.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn update_entity(
        &self,
        entity_id: &str,
        mutate: &mut RatingMutation<'_>,
    ) -> Result<Option<(RatedFarm, RatingAction)>> {
        let mut entities = self.entities.write().await;
        let Some(current) = entities.get_mut(entity_id) else {
            return Ok(None);
        };

        let action = mutate(current);
        if action != RatingAction::None {
            current.version += 1;
        }
        Ok(Some((current.clone(), action)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratings::model::{RatingValue, RemovalPolicy, VoterId};
    use chrono::Utc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn star(voter: &VoterId, stars: i64) -> impl FnMut(&mut RatedFarm) -> RatingAction + Send + '_ {
        let value = RatingValue::parse(stars).unwrap();
        move |farm| farm.apply(voter, value, RemovalPolicy::default(), Utc::now())
    }

    /// Delegates to an in-memory store but only exposes compare-and-save,
    /// losing the first `failures` saves.
    struct CasOnlyStore {
        inner: InMemoryRatingStore,
        failures: AtomicU32,
    }

    #[async_trait]
    impl RatingStore for CasOnlyStore {
        async fn get_entity(&self, entity_id: &str) -> Result<Option<RatedFarm>> {
            self.inner.get_entity(entity_id).await
        }

        async fn insert_entity(&self, entity: &RatedFarm) -> Result<bool> {
            self.inner.insert_entity(entity).await
        }

        async fn compare_and_save(&self, entity: &RatedFarm, expected_version: u64) -> Result<bool> {
            let lost = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Ok(false);
            }
            self.inner.compare_and_save(entity, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_insert_is_unique() {
        let store = InMemoryRatingStore::new();
        assert!(store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap());
        assert!(!store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap());
        assert!(store.get_entity("farm-1").await.unwrap().is_some());
        assert!(store.get_entity("farm-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_save_rejects_stale_version() {
        let store = InMemoryRatingStore::new();
        store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap();

        let mut first = store.get_entity("farm-1").await.unwrap().unwrap();
        let mut second = first.clone();

        first.version = 1;
        first.average_rating = 4.0;
        assert!(store.compare_and_save(&first, 0).await.unwrap());

        second.version = 1;
        second.average_rating = 2.0;
        assert!(!store.compare_and_save(&second, 0).await.unwrap());

        let stored = store.get_entity("farm-1").await.unwrap().unwrap();
        assert_eq!(stored.average_rating, 4.0);
    }

    #[tokio::test]
    async fn test_compare_and_save_missing_entity() {
        let store = InMemoryRatingStore::new();
        assert!(!store.compare_and_save(&RatedFarm::new("ghost"), 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_update_entity_bumps_version_only_on_change() {
        let store = InMemoryRatingStore::new();
        store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap();
        let voter = VoterId::account(7);

        let (farm, action) = store.update_entity("farm-1", &mut star(&voter, 4)).await.unwrap().unwrap();
        assert_eq!(action, RatingAction::Added);
        assert_eq!(farm.version, 1);

        let (farm, action) = store.update_entity("farm-1", &mut star(&voter, 0)).await.unwrap().unwrap();
        assert_eq!(action, RatingAction::Removed);
        assert_eq!(farm.version, 2);

        let (farm, action) = store.update_entity("farm-1", &mut star(&voter, 0)).await.unwrap().unwrap();
        assert_eq!(action, RatingAction::None);
        assert_eq!(farm.version, 2);

        assert!(store.update_entity("ghost", &mut star(&voter, 3)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_compare_and_save_fallback_retries_until_saved() {
        let store = CasOnlyStore {
            inner: InMemoryRatingStore::new(),
            failures: AtomicU32::new(10),
        };
        store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap();
        let voter = VoterId::account(7);

        let (farm, action) = store.update_entity("farm-1", &mut star(&voter, 5)).await.unwrap().unwrap();
        assert_eq!(action, RatingAction::Added);
        assert_eq!(farm.version, 1);
        assert_eq!(farm.average_rating, 5.0);
        assert_eq!(store.failures.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_compare_and_save_fallback_under_contention() {
        let store = Arc::new(CasOnlyStore {
            inner: InMemoryRatingStore::new(),
            failures: AtomicU32::new(0),
        });
        store.insert_entity(&RatedFarm::new("farm-1")).await.unwrap();

        let mut tasks = Vec::new();
        for i in 0..16 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                let voter = VoterId::account(i);
                store.update_entity("farm-1", &mut star(&voter, 1 + i % 5)).await
            }));
        }
        for task in tasks {
            assert!(task.await.unwrap().unwrap().is_some());
        }

        let farm = store.get_entity("farm-1").await.unwrap().unwrap();
        assert_eq!(farm.count(), 16);
        assert_eq!(farm.version, 16);
    }
}

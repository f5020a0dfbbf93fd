//! Persistence for subscriptions and their payments.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;

use super::error::SubscriptionError;
use super::model::{Payment, Subscription, SubscriptionStatus};
use crate::error::{FarmgateError, Result};

/// Mutation applied to one subscription by [`SubscriptionStore::update`].
///
/// Returns `Ok(false)` to leave the record untouched.
pub type SubscriptionMutation<'a> =
    dyn FnMut(&mut Subscription) -> std::result::Result<bool, SubscriptionError> + Send + 'a;

const INITIAL_BACKOFF: Duration = Duration::from_millis(1);
const MAX_BACKOFF: Duration = Duration::from_millis(50);

/// Storage backend for subscriptions.
///
/// Status changes go through [`update`](SubscriptionStore::update), which
/// serializes writers per subscription.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_by_owner(&self, owner_id: &str) -> Result<Option<Subscription>>;

    async fn get_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>>;

    /// Insert a new subscription. Returns `false` if the owner already has one.
    async fn insert(&self, subscription: &Subscription) -> Result<bool>;

    /// Save only if the stored version still equals `expected_version`.
    async fn compare_and_save(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool>;

    /// Subscriptions currently in any of `statuses`.
    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> Result<Vec<Subscription>>;

    async fn append_payment(&self, payment: &Payment) -> Result<()>;

    /// Payments for a subscription, oldest first.
    async fn list_payments(&self, subscription_id: &str) -> Result<Vec<Payment>>;

    /// Apply `mutate` to the stored subscription as one atomic step.
    ///
    /// A failed mutation leaves the record as it was. `mutate` may run more
    /// than once and must derive its result from the record it is given.
    /// The default reads and compare-and-saves until the write lands.
    /// Returns `None` if the subscription does not exist.
    async fn update(
        &self,
        subscription_id: &str,
        mutate: &mut SubscriptionMutation<'_>,
    ) -> Result<Option<(Subscription, bool)>> {
        let mut backoff = INITIAL_BACKOFF;
        let mut attempt: u32 = 0;
        loop {
            let Some(current) = self.get_by_id(subscription_id).await? else {
                return Ok(None);
            };

            let mut updated = current.clone();
            if !mutate(&mut updated)? {
                return Ok(Some((current, false)));
            }

            updated.version = current.version + 1;
            if self.compare_and_save(&updated, current.version).await? {
                return Ok(Some((updated, true)));
            }

            attempt += 1;
            tracing::debug!(
                target: "farmgate::subscriptions",
                subscription_id = %subscription_id,
                attempt,
                "Subscription version conflict, retrying"
            );
            tokio::time::sleep(backoff).await;
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    }
}

#[async_trait]
impl<T: SubscriptionStore + ?Sized> SubscriptionStore for Arc<T> {
    async fn get_by_owner(&self, owner_id: &str) -> Result<Option<Subscription>> {
        (**self).get_by_owner(owner_id).await
    }

    async fn get_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        (**self).get_by_id(subscription_id).await
    }

    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        (**self).insert(subscription).await
    }

    async fn compare_and_save(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        (**self).compare_and_save(subscription, expected_version).await
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> Result<Vec<Subscription>> {
        (**self).list_by_status(statuses).await
    }

    async fn append_payment(&self, payment: &Payment) -> Result<()> {
        (**self).append_payment(payment).await
    }

    async fn list_payments(&self, subscription_id: &str) -> Result<Vec<Payment>> {
        (**self).list_payments(subscription_id).await
    }

    async fn update(
        &self,
        subscription_id: &str,
        mutate: &mut SubscriptionMutation<'_>,
    ) -> Result<Option<(Subscription, bool)>> {
        (**self).update(subscription_id, mutate).await
    }
}

/// Apply `mutate` to a subscription through [`SubscriptionStore::update`].
///
/// On success the saved (or untouched) record is returned with a flag
/// saying whether it changed.
///
/// # Errors
///
/// - `SubscriptionNotFound` if the record does not exist
/// - whatever `mutate` returns
pub async fn update_subscription<S, F>(
    store: &S,
    subscription_id: &str,
    mut mutate: F,
) -> Result<(Subscription, bool)>
where
    S: SubscriptionStore + ?Sized,
    F: FnMut(&mut Subscription) -> std::result::Result<bool, SubscriptionError> + Send,
{
    store.update(subscription_id, &mut mutate).await?.ok_or_else(|| {
        FarmgateError::from(SubscriptionError::SubscriptionNotFound {
            subscription_id: subscription_id.to_string(),
        })
    })
}

/// Drop a billing claim after a charge that changed nothing.
///
/// Failures are logged rather than returned; an unreleased claim lapses on
/// its own.
pub async fn release_billing_claim<S: SubscriptionStore + ?Sized>(store: &S, subscription_id: &str, claim_id: &str) {
    let result = update_subscription(store, subscription_id, |sub| Ok(sub.release_claim(claim_id))).await;
    if let Err(err) = result {
        tracing::warn!(
            target: "farmgate::subscriptions",
            subscription_id = %subscription_id,
            error = %err,
            "Could not release billing claim"
        );
    }
}

#[derive(Default)]
struct InMemoryInner {
    subscriptions: HashMap<String, Subscription>,
    owners: HashMap<String, String>,
    payments: HashMap<String, Vec<Payment>>,
}

/// In-memory subscription store.
#[derive(Clone, Default)]
pub struct InMemorySubscriptionStore {
    inner: Arc<RwLock<InMemoryInner>>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite a record regardless of version. Test setup only.
    pub async fn force_save(&self, subscription: Subscription) {
        let mut inner = self.inner.write().await;
        inner
            .owners
            .insert(subscription.owner_id.clone(), subscription.id.clone());
        inner
            .subscriptions
            .insert(subscription.id.clone(), subscription);
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn get_by_owner(&self, owner_id: &str) -> Result<Option<Subscription>> {
        let inner = self.inner.read().await;
        Ok(inner
            .owners
            .get(owner_id)
            .and_then(|id| inner.subscriptions.get(id))
            .cloned())
    }

    async fn get_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>> {
        Ok(self.inner.read().await.subscriptions.get(subscription_id).cloned())
    }

    async fn insert(&self, subscription: &Subscription) -> Result<bool> {
        let mut inner = self.inner.write().await;
        if inner.owners.contains_key(&subscription.owner_id)
            || inner.subscriptions.contains_key(&subscription.id)
        {
            return Ok(false);
        }
        inner
            .owners
            .insert(subscription.owner_id.clone(), subscription.id.clone());
        inner
            .subscriptions
            .insert(subscription.id.clone(), subscription.clone());
        Ok(true)
    }

    async fn compare_and_save(
        &self,
        subscription: &Subscription,
        expected_version: u64,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        match inner.subscriptions.get_mut(&subscription.id) {
            Some(current)
                if current.version == expected_version && current.owner_id == subscription.owner_id =>
            {
                *current = subscription.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> Result<Vec<Subscription>> {
        let inner = self.inner.read().await;
        let mut matching: Vec<_> = inner
            .subscriptions
            .values()
            .filter(|sub| statuses.contains(&sub.status))
            .cloned()
            .collect();
        matching.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(matching)
    }

    async fn append_payment(&self, payment: &Payment) -> Result<()> {
        self.inner
            .write()
            .await
            .payments
            .entry(payment.subscription_id.clone())
            .or_default()
            .push(payment.clone());
        Ok(())
    }

    async fn list_payments(&self, subscription_id: &str) -> Result<Vec<Payment>> {
        Ok(self
            .inner
            .read()
            .await
            .payments
            .get(subscription_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update(
        &self,
        subscription_id: &str,
        mutate: &mut SubscriptionMutation<'_>,
    ) -> Result<Option<(Subscription, bool)>> {
        let mut inner = self.inner.write().await;
        let Some(current) = inner.subscriptions.get_mut(subscription_id) else {
            return Ok(None);
        };

        let mut updated = current.clone();
        if !mutate(&mut updated)? {
            return Ok(Some((current.clone(), false)));
        }
        updated.version = current.version + 1;
        *current = updated.clone();
        Ok(Some((updated, true)))
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::subscriptions::model::{PaymentMethod, PaymentStatus, SubscriptionEvent};
    use chrono::Utc;

    #[tokio::test]
    async fn test_one_subscription_per_owner() {
        let store = InMemorySubscriptionStore::new();
        let now = Utc::now();

        assert!(store.insert(&Subscription::new_trial("farmer-1", now, 30)).await.unwrap());
        assert!(!store.insert(&Subscription::new_trial("farmer-1", now, 30)).await.unwrap());

        let found = store.get_by_owner("farmer-1").await.unwrap().unwrap();
        assert_eq!(store.get_by_id(&found.id).await.unwrap().unwrap(), found);
        assert!(store.get_by_owner("farmer-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_update_applies_and_bumps_version() {
        let store = InMemorySubscriptionStore::new();
        let now = Utc::now();
        let sub = Subscription::new_trial("farmer-1", now, 30);
        store.insert(&sub).await.unwrap();

        let (saved, changed) = update_subscription(&store, &sub.id, |s| {
            s.apply(SubscriptionEvent::PaymentReceived, now, 30)?;
            Ok(true)
        })
        .await
        .unwrap();

        assert!(changed);
        assert_eq!(saved.version, 1);
        assert_eq!(saved.status, SubscriptionStatus::Active);
    }

    #[tokio::test]
    async fn test_update_without_change_keeps_version() {
        let store = InMemorySubscriptionStore::new();
        let sub = Subscription::new_trial("farmer-1", Utc::now(), 30);
        store.insert(&sub).await.unwrap();

        let (saved, changed) = update_subscription(&store, &sub.id, |_| Ok(false)).await.unwrap();
        assert!(!changed);
        assert_eq!(saved.version, 0);
    }

    #[tokio::test]
    async fn test_update_propagates_mutation_error() {
        let store = InMemorySubscriptionStore::new();
        let now = Utc::now();
        let sub = Subscription::new_trial("farmer-1", now, 30);
        store.insert(&sub).await.unwrap();

        let err = update_subscription(&store, &sub.id, |s| {
            s.apply(SubscriptionEvent::CancelRequested, now, 30)?;
            Ok(true)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, FarmgateError::Validation(_)));
    }

    #[tokio::test]
    async fn test_update_missing_subscription() {
        let store = InMemorySubscriptionStore::new();
        let err = update_subscription(&store, "nope", |_| Ok(true)).await.unwrap_err();
        assert!(matches!(err, FarmgateError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_stale_write_is_rejected() {
        let store = InMemorySubscriptionStore::new();
        let sub = Subscription::new_trial("farmer-1", Utc::now(), 30);
        store.insert(&sub).await.unwrap();

        let mut first = sub.clone();
        first.version = 1;
        assert!(store.compare_and_save(&first, 0).await.unwrap());
        assert!(!store.compare_and_save(&first, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_payments_and_listing() {
        let store = InMemorySubscriptionStore::new();
        let now = Utc::now();
        let trial = Subscription::new_trial("farmer-1", now, 30);
        let mut expired = Subscription::new_trial("farmer-2", now, 30);
        expired.status = SubscriptionStatus::Expired;
        store.insert(&trial).await.unwrap();
        store.insert(&expired).await.unwrap();

        let trials = store.list_by_status(&[SubscriptionStatus::Trial]).await.unwrap();
        assert_eq!(trials.len(), 1);
        assert_eq!(trials[0].owner_id, "farmer-1");

        let payment = Payment::new(&trial.id, 999, PaymentMethod::Card, "txn-1", PaymentStatus::Completed, now);
        store.append_payment(&payment).await.unwrap();
        assert_eq!(store.list_payments(&trial.id).await.unwrap(), vec![payment]);
        assert!(store.list_payments(&expired.id).await.unwrap().is_empty());
    }

    /// Exposes only the required methods, so writes take the
    /// compare-and-save fallback. Loses the first `failures` saves.
    struct CasOnlyStore {
        inner: InMemorySubscriptionStore,
        failures: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl SubscriptionStore for CasOnlyStore {
        async fn get_by_owner(&self, owner_id: &str) -> Result<Option<Subscription>> {
            self.inner.get_by_owner(owner_id).await
        }

        async fn get_by_id(&self, subscription_id: &str) -> Result<Option<Subscription>> {
            self.inner.get_by_id(subscription_id).await
        }

        async fn insert(&self, subscription: &Subscription) -> Result<bool> {
            self.inner.insert(subscription).await
        }

        async fn compare_and_save(&self, subscription: &Subscription, expected_version: u64) -> Result<bool> {
            use std::sync::atomic::Ordering;
            let lost = self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if lost {
                return Ok(false);
            }
            self.inner.compare_and_save(subscription, expected_version).await
        }

        async fn list_by_status(&self, statuses: &[SubscriptionStatus]) -> Result<Vec<Subscription>> {
            self.inner.list_by_status(statuses).await
        }

        async fn append_payment(&self, payment: &Payment) -> Result<()> {
            self.inner.append_payment(payment).await
        }

        async fn list_payments(&self, subscription_id: &str) -> Result<Vec<Payment>> {
            self.inner.list_payments(subscription_id).await
        }
    }

    #[tokio::test]
    async fn test_fallback_retries_until_saved() {
        let store = CasOnlyStore {
            inner: InMemorySubscriptionStore::new(),
            failures: std::sync::atomic::AtomicU32::new(12),
        };
        let now = Utc::now();
        let sub = Subscription::new_trial("farmer-1", now, 30);
        store.insert(&sub).await.unwrap();

        let (saved, changed) = update_subscription(&store, &sub.id, |s| {
            s.apply(SubscriptionEvent::PaymentReceived, now, 30)?;
            Ok(true)
        })
        .await
        .unwrap();
        assert!(changed);
        assert_eq!(saved.version, 1);
        assert_eq!(saved.status, SubscriptionStatus::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_serialize() {
        let memory = Arc::new(InMemorySubscriptionStore::new());
        let cas_only = Arc::new(CasOnlyStore {
            inner: InMemorySubscriptionStore::new(),
            failures: std::sync::atomic::AtomicU32::new(0),
        });
        let stores: [Arc<dyn SubscriptionStore>; 2] = [memory, cas_only];

        for store in stores {
            let sub = Subscription::new_trial("farmer-1", Utc::now(), 30);
            store.insert(&sub).await.unwrap();

            let tasks: Vec<_> = (0..16)
                .map(|_| {
                    let store = store.clone();
                    let id = sub.id.clone();
                    tokio::spawn(async move {
                        update_subscription(&store, &id, |s| {
                            s.trial_ending_notification_sent = !s.trial_ending_notification_sent;
                            Ok(true)
                        })
                        .await
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap().unwrap();
            }

            let stored = store.get_by_id(&sub.id).await.unwrap().unwrap();
            assert_eq!(stored.version, 16);
            assert!(!stored.trial_ending_notification_sent);
        }
    }

    #[tokio::test]
    async fn test_failed_mutation_leaves_record() {
        let store = InMemorySubscriptionStore::new();
        let now = Utc::now();
        let sub = Subscription::new_trial("farmer-1", now, 30);
        store.insert(&sub).await.unwrap();

        let result = update_subscription(&store, &sub.id, |s| {
            s.plan = crate::subscriptions::model::SubscriptionPlan::Premium;
            s.apply(SubscriptionEvent::CancelRequested, now, 30)?;
            Ok(true)
        })
        .await;
        assert!(result.is_err());
        assert_eq!(store.get_by_id(&sub.id).await.unwrap().unwrap(), sub);
    }
}

//! Periodic subscription maintenance.
//!
//! The sweep sends trial notices, expires lapsed trials and renews active
//! subscriptions whose billing date has arrived. It goes through the same
//! per-subscription updates, billing claims and transition rules as request
//! handlers, so it can run alongside live traffic.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::audit::{SubscriptionAuditEvent, SubscriptionAuditLogger, TracingAuditLogger};
use super::error::{SubscriptionError, charged_but_unsaved};
use super::model::{Payment, PaymentStatus, Subscription, SubscriptionEvent, SubscriptionStatus};
use super::notify::{SubscriptionNotifier, TracingNotifier};
use super::payment::{ApprovingGateway, ChargeOutcome, ChargeRequest, PaymentGateway};
use super::plans::PlanCatalog;
use super::storage::{SubscriptionStore, release_billing_claim, update_subscription};
use crate::config::SubscriptionConfig;
use crate::error::Result;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub trial_ending_notices: usize,
    pub expiry_notices: usize,
    pub trials_expired: usize,
    pub renewals: usize,
    pub failed_payments: usize,
    /// Subscriptions skipped because of an error; see the logs.
    pub errors: usize,
}

pub struct SubscriptionSweeper<S, N = TracingNotifier, L = TracingAuditLogger>
where
    S: SubscriptionStore,
    N: SubscriptionNotifier,
    L: SubscriptionAuditLogger,
{
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    notifier: N,
    audit: L,
    catalog: PlanCatalog,
    config: SubscriptionConfig,
}

impl<S: SubscriptionStore> SubscriptionSweeper<S> {
    #[must_use]
    pub fn new(store: S, config: SubscriptionConfig) -> Self {
        Self {
            store,
            gateway: Arc::new(ApprovingGateway),
            notifier: TracingNotifier,
            audit: TracingAuditLogger,
            catalog: PlanCatalog::default(),
            config,
        }
    }
}

impl<S, N, L> SubscriptionSweeper<S, N, L>
where
    S: SubscriptionStore,
    N: SubscriptionNotifier,
    L: SubscriptionAuditLogger,
{
    #[must_use]
    pub fn with_notifier<N2: SubscriptionNotifier>(self, notifier: N2) -> SubscriptionSweeper<S, N2, L> {
        SubscriptionSweeper {
            store: self.store,
            gateway: self.gateway,
            notifier,
            audit: self.audit,
            catalog: self.catalog,
            config: self.config,
        }
    }

    #[must_use]
    pub fn with_audit_logger<L2: SubscriptionAuditLogger>(self, audit: L2) -> SubscriptionSweeper<S, N, L2> {
        SubscriptionSweeper {
            store: self.store,
            gateway: self.gateway,
            notifier: self.notifier,
            audit,
            catalog: self.catalog,
            config: self.config,
        }
    }

    #[must_use]
    pub fn with_gateway(mut self, gateway: Arc<dyn PaymentGateway>) -> Self {
        self.gateway = gateway;
        self
    }

    #[must_use]
    pub fn with_catalog(mut self, catalog: PlanCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Run every maintenance step once, as of `now`.
    ///
    /// Failures on one subscription are logged and counted; the sweep moves
    /// on to the next. Only a failure to list subscriptions aborts it.
    pub async fn run_once(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        let candidates = self
            .store
            .list_by_status(&[SubscriptionStatus::Trial, SubscriptionStatus::Active])
            .await?;

        let notice_window = now + Duration::days(self.config.trial_notice_days);
        let expire_before = now - Duration::days(self.config.grace_period_days);

        for sub in &candidates {
            if sub.status != SubscriptionStatus::Trial {
                continue;
            }
            if !sub.trial_ending_notification_sent && sub.end_date > now && sub.end_date <= notice_window {
                self.step(&mut report, sub, "trial_ending_notice", self.send_trial_ending(sub, now)).await;
            }
            if !sub.expired_notification_sent && sub.end_date <= now {
                self.step(&mut report, sub, "expiry_notice", self.send_expiry(sub)).await;
            }
            if sub.end_date <= expire_before {
                self.step(&mut report, sub, "expire_trial", self.expire_trial(sub, now, expire_before)).await;
            }
        }

        for sub in &candidates {
            if renewal_due(sub, now) {
                self.step(&mut report, sub, "renewal", self.renew(sub, now)).await;
            }
        }

        tracing::info!(
            target: "farmgate::sweep",
            trial_ending_notices = report.trial_ending_notices,
            expiry_notices = report.expiry_notices,
            trials_expired = report.trials_expired,
            renewals = report.renewals,
            failed_payments = report.failed_payments,
            errors = report.errors,
            "Subscription sweep finished"
        );
        Ok(report)
    }

    async fn step(
        &self,
        report: &mut SweepReport,
        sub: &Subscription,
        step: &'static str,
        work: impl Future<Output = Result<StepOutcome>>,
    ) {
        match work.await {
            Ok(StepOutcome::Skipped) => {}
            Ok(StepOutcome::TrialEndingNotice) => report.trial_ending_notices += 1,
            Ok(StepOutcome::ExpiryNotice) => report.expiry_notices += 1,
            Ok(StepOutcome::TrialExpired) => report.trials_expired += 1,
            Ok(StepOutcome::Renewed) => report.renewals += 1,
            Ok(StepOutcome::PaymentFailed) => report.failed_payments += 1,
            Err(err) => {
                report.errors += 1;
                tracing::error!(
                    target: "farmgate::sweep",
                    subscription_id = %sub.id,
                    step,
                    error = %err,
                    "Sweep step failed"
                );
            }
        }
    }

    async fn send_trial_ending(&self, sub: &Subscription, now: DateTime<Utc>) -> Result<StepOutcome> {
        let (claimed, changed) = update_subscription(&self.store, &sub.id, |s| {
            if s.status != SubscriptionStatus::Trial || s.trial_ending_notification_sent {
                return Ok(false);
            }
            s.trial_ending_notification_sent = true;
            s.updated_at = now;
            Ok(true)
        })
        .await?;
        if !changed {
            return Ok(StepOutcome::Skipped);
        }

        let days_left = (claimed.end_date - now).num_days().max(0);
        self.notifier.trial_ending(&claimed, days_left).await;
        self.audit_notice(&claimed, "trial_ending").await;
        Ok(StepOutcome::TrialEndingNotice)
    }

    async fn send_expiry(&self, sub: &Subscription) -> Result<StepOutcome> {
        let (claimed, changed) = update_subscription(&self.store, &sub.id, |s| {
            if s.expired_notification_sent {
                return Ok(false);
            }
            s.expired_notification_sent = true;
            Ok(true)
        })
        .await?;
        if !changed {
            return Ok(StepOutcome::Skipped);
        }

        self.notifier.subscription_expired(&claimed).await;
        self.audit_notice(&claimed, "trial_expired").await;
        Ok(StepOutcome::ExpiryNotice)
    }

    async fn expire_trial(
        &self,
        sub: &Subscription,
        now: DateTime<Utc>,
        expire_before: DateTime<Utc>,
    ) -> Result<StepOutcome> {
        let cycle_days = self.config.billing_cycle_days;
        let (expired, changed) = update_subscription(&self.store, &sub.id, |s| {
            if s.status != SubscriptionStatus::Trial || s.end_date > expire_before || s.billing_in_progress(now) {
                return Ok(false);
            }
            s.apply(SubscriptionEvent::TrialExpired, now, cycle_days)?;
            Ok(true)
        })
        .await?;
        if !changed {
            return Ok(StepOutcome::Skipped);
        }

        tracing::info!(
            target: "farmgate::sweep",
            owner_id = %expired.owner_id,
            subscription_id = %expired.id,
            "Trial expired"
        );
        self.audit
            .log(SubscriptionAuditEvent::StatusChanged {
                subscription_id: expired.id.clone(),
                from: SubscriptionStatus::Trial,
                to: expired.status,
                event: SubscriptionEvent::TrialExpired,
            })
            .await;
        Ok(StepOutcome::TrialExpired)
    }

    async fn renew(&self, sub: &Subscription, now: DateTime<Utc>) -> Result<StepOutcome> {
        let Some(method) = sub.payment_method else {
            tracing::warn!(
                target: "farmgate::sweep",
                subscription_id = %sub.id,
                "Active subscription has no payment method, cannot renew"
            );
            return self.mark_payment_failed(sub, None, None, now).await;
        };

        // Claim the renewal before charging so overlapping sweeps bill once.
        let mut claim_id = None;
        let (claimed, _) = update_subscription(&self.store, &sub.id, |s| {
            claim_id = None;
            if !renewal_due(s, now) || s.billing_in_progress(now) {
                return Ok(false);
            }
            claim_id = Some(s.claim_billing(now)?);
            Ok(true)
        })
        .await?;
        let Some(claim_id) = claim_id else {
            return Ok(StepOutcome::Skipped);
        };

        let amount_cents = self.catalog.price_cents(claimed.plan);
        let charge = ChargeRequest {
            subscription_id: claimed.id.clone(),
            owner_id: claimed.owner_id.clone(),
            amount_cents,
            method,
            mpesa_number: claimed.mpesa_number.clone(),
            description: format!("{} plan renewal", claimed.plan),
        };

        let outcome = match self.gateway.charge(&charge).await {
            Ok(outcome) => outcome,
            Err(err) => {
                release_billing_claim(&self.store, &claimed.id, &claim_id).await;
                return Err(err);
            }
        };

        let transaction_id = match outcome {
            ChargeOutcome::Approved { transaction_id } => transaction_id,
            ChargeOutcome::Declined { reason } => {
                let payment = Payment::new(&claimed.id, amount_cents, method, "", PaymentStatus::Failed, now)
                    .with_description(format!("{} ({})", charge.description, reason));
                return self.mark_payment_failed(&claimed, Some(payment), Some(claim_id.as_str()), now).await;
            }
        };

        let payment = Payment::new(&claimed.id, amount_cents, method, &transaction_id, PaymentStatus::Completed, now)
            .with_description(charge.description);
        if let Err(err) = self.store.append_payment(&payment).await {
            tracing::error!(
                target: "farmgate::sweep",
                subscription_id = %claimed.id,
                transaction_id = %transaction_id,
                error = %err,
                "Renewal charged but the payment could not be recorded"
            );
            return Err(charged_but_unsaved(&claimed.id, &transaction_id));
        }
        self.audit_payment(&payment).await;

        let cycle_days = self.config.billing_cycle_days;
        let result = update_subscription(&self.store, &claimed.id, |s| {
            if !s.release_claim(&claim_id) {
                return Err(SubscriptionError::Internal {
                    message: "billing claim was taken over".to_string(),
                });
            }
            s.apply(SubscriptionEvent::PaymentReceived, now, cycle_days)?;
            Ok(true)
        })
        .await;
        let renewed = match result {
            Ok((renewed, _)) => renewed,
            Err(err) => {
                tracing::error!(
                    target: "farmgate::sweep",
                    subscription_id = %claimed.id,
                    transaction_id = %transaction_id,
                    error = %err,
                    "Renewal charged but the subscription could not be updated"
                );
                return Err(charged_but_unsaved(&claimed.id, &transaction_id));
            }
        };

        self.audit
            .log(SubscriptionAuditEvent::StatusChanged {
                subscription_id: renewed.id.clone(),
                from: SubscriptionStatus::Active,
                to: renewed.status,
                event: SubscriptionEvent::PaymentReceived,
            })
            .await;
        Ok(StepOutcome::Renewed)
    }

    /// Move a due subscription to `payment_pending`, releasing `claim_id`.
    async fn mark_payment_failed(
        &self,
        sub: &Subscription,
        payment: Option<Payment>,
        claim_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<StepOutcome> {
        if let Some(payment) = &payment {
            if let Err(err) = self.store.append_payment(payment).await {
                if let Some(claim_id) = claim_id {
                    release_billing_claim(&self.store, &sub.id, claim_id).await;
                }
                return Err(err);
            }
            self.audit_payment(payment).await;
        }

        let cycle_days = self.config.billing_cycle_days;
        let mut applied = false;
        let (failed, _) = update_subscription(&self.store, &sub.id, |s| {
            applied = false;
            let released = claim_id.is_some_and(|id| s.release_claim(id));
            if claim_id.is_none() && (!renewal_due(s, now) || s.billing_in_progress(now)) {
                return Ok(false);
            }
            if s.status != SubscriptionStatus::Active {
                return Ok(released);
            }
            s.apply(SubscriptionEvent::PaymentFailed, now, cycle_days)?;
            applied = true;
            Ok(true)
        })
        .await?;
        if !applied {
            return Ok(StepOutcome::Skipped);
        }

        tracing::warn!(
            target: "farmgate::sweep",
            owner_id = %failed.owner_id,
            subscription_id = %failed.id,
            "Renewal payment failed"
        );
        if let Some(payment) = &payment {
            self.notifier.payment_failed(&failed, payment).await;
        }
        self.audit
            .log(SubscriptionAuditEvent::StatusChanged {
                subscription_id: failed.id.clone(),
                from: SubscriptionStatus::Active,
                to: failed.status,
                event: SubscriptionEvent::PaymentFailed,
            })
            .await;
        Ok(StepOutcome::PaymentFailed)
    }

    async fn audit_notice(&self, sub: &Subscription, kind: &'static str) {
        self.audit
            .log(SubscriptionAuditEvent::NotificationSent {
                subscription_id: sub.id.clone(),
                kind,
            })
            .await;
    }

    async fn audit_payment(&self, payment: &Payment) {
        self.audit
            .log(SubscriptionAuditEvent::PaymentRecorded {
                subscription_id: payment.subscription_id.clone(),
                payment_id: payment.id.clone(),
                amount_cents: payment.amount_cents,
                status: payment.status,
            })
            .await;
    }
}

fn renewal_due(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.status == SubscriptionStatus::Active
        && sub.is_active
        && sub.next_billing_date.is_some_and(|due| due <= now)
}

enum StepOutcome {
    Skipped,
    TrialEndingNotice,
    ExpiryNotice,
    TrialExpired,
    Renewed,
    PaymentFailed,
}

/// Handle to a running sweeper task.
pub struct SweeperHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stop the sweeper, waiting for an in-flight sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(err) = self.task.await {
            tracing::error!(target: "farmgate::sweep", error = %err, "Sweeper task ended abnormally");
        }
    }
}

/// Run the sweep every `interval` on the tokio runtime until shut down.
///
/// The first sweep runs immediately.
pub fn spawn_sweeper<S, N, L>(
    sweeper: Arc<SubscriptionSweeper<S, N, L>>,
    interval: std::time::Duration,
) -> SweeperHandle
where
    S: SubscriptionStore + 'static,
    N: SubscriptionNotifier + 'static,
    L: SubscriptionAuditLogger + 'static,
{
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let task = tokio::spawn(async move {
        tracing::info!(target: "farmgate::sweep", interval_secs = interval.as_secs(), "Subscription sweeper started");
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    tracing::info!(target: "farmgate::sweep", "Shutdown signal received");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = sweeper.run_once(Utc::now()).await {
                        tracing::error!(target: "farmgate::sweep", error = %err, "Subscription sweep failed");
                    }
                }
            }
        }

        tracing::info!(target: "farmgate::sweep", "Subscription sweeper stopped");
    });

    SweeperHandle { shutdown_tx, task }
}

use chrono::Utc;
use serde::Deserialize;
use std::sync::Arc;

use super::access::{AccessReport, access_report};
use super::audit::{SubscriptionAuditEvent, SubscriptionAuditLogger, TracingAuditLogger};
use super::error::{SubscriptionError, charged_but_unsaved};
use super::model::{
    Payment, PaymentMethod, PaymentStatus, Subscription, SubscriptionEvent, SubscriptionPlan,
    SubscriptionStatus,
};
use super::payment::{
    ApprovingGateway, ChargeOutcome, ChargeRequest, PaymentGateway, PaymentRequest,
    validate_method_details,
};
use super::plans::PlanCatalog;
use super::storage::{SubscriptionStore, release_billing_claim, update_subscription};
use crate::config::SubscriptionConfig;
use crate::error::Result;
use crate::identity::AccountRole;

/// Request body for creating a subscription.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSubscription {
    pub plan: SubscriptionPlan,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub mpesa_number: Option<String>,
}

impl NewSubscription {
    pub fn trial() -> Self {
        Self {
            plan: SubscriptionPlan::FreeTrial,
            payment_method: None,
            mpesa_number: None,
        }
    }

    pub fn paid(plan: SubscriptionPlan, method: PaymentMethod) -> Self {
        Self {
            plan,
            payment_method: Some(method),
            mpesa_number: None,
        }
    }
}

/// Request body for switching plans.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PlanChange {
    pub plan: SubscriptionPlan,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub mpesa_number: Option<String>,
}

/// A recorded payment and the subscription it was applied to.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct PaymentReceipt {
    pub subscription: Subscription,
    pub payment: Payment,
}

/// Subscription lifecycle operations.
///
/// Every mutation goes through the store's per-subscription update, so
/// concurrent requests for the same subscription serialize without a
/// global lock.
pub struct SubscriptionManager<S: SubscriptionStore, L: SubscriptionAuditLogger = TracingAuditLogger> {
    store: S,
    gateway: Arc<dyn PaymentGateway>,
    catalog: PlanCatalog,
    config: SubscriptionConfig,
    audit: L,
}

impl<S: SubscriptionStore> SubscriptionManager<S> {
    #[must_use]
    pub fn new(store: S, config: SubscriptionConfig) -> Self {
        Self {
            store,
            gateway: Arc::new(ApprovingGateway),
            catalog: PlanCatalog::default(),
            config,
            audit: TracingAuditLogger,
        }
    }
}

impl<S: SubscriptionStore, L: SubscriptionAuditLogger> SubscriptionManager<S, L> {
    #[must_use]
    pub fn with_audit_logger<L2: SubscriptionAuditLogger>(self, audit: L2) -> SubscriptionManager<S, L2> {
        SubscriptionManager {
            store: self.store,
            gateway: self.gateway,
            catalog: self.catalog,
            config: self.config,
            audit,
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

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn catalog(&self) -> &PlanCatalog {
        &self.catalog
    }

    pub fn config(&self) -> &SubscriptionConfig {
        &self.config
    }

    /// Start a subscription for `owner_id`.
    ///
    /// Free trials start in `trial`; paid plans start `active` and need a
    /// payment method.
    pub async fn create_subscription(
        &self,
        owner_id: &str,
        request: NewSubscription,
    ) -> Result<Subscription> {
        validate_owner_id(owner_id)?;

        if self.store.get_by_owner(owner_id).await?.is_some() {
            return Err(SubscriptionError::AlreadySubscribed {
                owner_id: owner_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let subscription = if request.plan.is_paid() {
            let method = request
                .payment_method
                .ok_or(SubscriptionError::PaymentMethodRequired { plan: request.plan })?;
            validate_method_details(method, request.mpesa_number.as_deref())?;
            Subscription::new_paid(
                owner_id,
                request.plan,
                method,
                request.mpesa_number,
                now,
                self.config.paid_term_days,
                self.config.billing_cycle_days,
            )
        } else {
            let mut trial = Subscription::new_trial(owner_id, now, self.config.trial_days);
            if let Some(method) = request.payment_method {
                validate_method_details(method, request.mpesa_number.as_deref())?;
                trial.payment_method = Some(method);
                trial.mpesa_number = request.mpesa_number;
            }
            trial
        };
        subscription.validate_new(now)?;

        if !self.store.insert(&subscription).await? {
            return Err(SubscriptionError::AlreadySubscribed {
                owner_id: owner_id.to_string(),
            }
            .into());
        }

        tracing::info!(
            target: "farmgate::subscriptions",
            owner_id = %owner_id,
            subscription_id = %subscription.id,
            plan = %subscription.plan,
            status = %subscription.status,
            "Subscription created"
        );
        self.audit
            .log(SubscriptionAuditEvent::Created {
                owner_id: owner_id.to_string(),
                subscription_id: subscription.id.clone(),
                plan: subscription.plan,
                status: subscription.status,
            })
            .await;

        Ok(subscription)
    }

    pub async fn get_subscription(&self, owner_id: &str) -> Result<Subscription> {
        self.store.get_by_owner(owner_id).await?.ok_or_else(|| {
            SubscriptionError::NoSubscription {
                owner_id: owner_id.to_string(),
            }
            .into()
        })
    }

    /// Access summary for an account.
    pub async fn check_access(&self, account_id: &str, role: AccountRole) -> Result<AccessReport> {
        let subscription = if role.requires_subscription() {
            self.store.get_by_owner(account_id).await?
        } else {
            None
        };
        Ok(access_report(role, subscription.as_ref(), Utc::now()))
    }

    /// Record a payment made by the owner and apply it to the subscription.
    ///
    /// Trial, expired and payment-pending subscriptions become active;
    /// active ones are renewed for another cycle.
    pub async fn record_payment(
        &self,
        owner_id: &str,
        request: PaymentRequest,
    ) -> Result<PaymentReceipt> {
        request.validate()?;
        let current = self.get_subscription(owner_id).await?;

        let plan = request.plan.unwrap_or(current.plan);
        if !plan.is_paid() {
            return Err(SubscriptionError::InvalidPayment {
                reason: "choose a paid plan to pay for".to_string(),
            }
            .into());
        }
        current.status.transition(SubscriptionEvent::PaymentReceived)?;

        let now = Utc::now();
        let cycle_days = self.config.billing_cycle_days;
        let mut before = None;
        let (subscription, _) = update_subscription(
            &self.store,
            &current.id,
            |sub| {
                if sub.billing_in_progress(now) {
                    return Err(SubscriptionError::PaymentInProgress {
                        subscription_id: sub.id.clone(),
                    });
                }
                before = Some((sub.status, sub.plan));
                sub.plan = plan;
                sub.payment_method = Some(request.method);
                if request.mpesa_number.is_some() {
                    sub.mpesa_number = request.mpesa_number.clone();
                }
                sub.apply(SubscriptionEvent::PaymentReceived, now, cycle_days)?;
                Ok(true)
            },
        )
        .await?;

        let transaction_id = request
            .transaction_id
            .clone()
            .unwrap_or_else(|| format!("TXN-{}", uuid::Uuid::new_v4().simple()));
        let payment = Payment::new(
            &subscription.id,
            request.amount_cents,
            request.method,
            transaction_id,
            PaymentStatus::Completed,
            now,
        )
        .with_description(format!("{} plan payment", plan));
        self.store.append_payment(&payment).await?;

        tracing::info!(
            target: "farmgate::subscriptions",
            owner_id = %owner_id,
            subscription_id = %subscription.id,
            amount_cents = payment.amount_cents,
            status = %subscription.status,
            "Payment recorded"
        );

        if let Some((from_status, from_plan)) = before {
            self.audit_plan_change(&subscription.id, from_plan, plan).await;
            self.audit_transition(&subscription.id, from_status, subscription.status, SubscriptionEvent::PaymentReceived)
                .await;
        }
        self.audit_payment(&payment).await;

        Ok(PaymentReceipt { subscription, payment })
    }

    /// Move to another paid plan.
    ///
    /// Active subscriptions switch immediately. Trial, expired and
    /// payment-pending subscriptions are charged the new plan's price and
    /// become active when the charge is approved. The billing claim is taken
    /// before the gateway is called, so concurrent changes charge once.
    pub async fn change_plan(&self, owner_id: &str, change: PlanChange) -> Result<Subscription> {
        let current = self.get_subscription(owner_id).await?;
        check_plan_change(&current, change.plan)?;

        let method = change
            .payment_method
            .or(current.payment_method)
            .ok_or(SubscriptionError::PaymentMethodRequired { plan: change.plan })?;
        let mpesa_number = change.mpesa_number.clone().or_else(|| current.mpesa_number.clone());
        validate_method_details(method, mpesa_number.as_deref())?;

        let now = Utc::now();
        let mut claim_id = None;
        let mut before = None;
        let (claimed, _) = update_subscription(&self.store, &current.id, |sub| {
            check_plan_change(sub, change.plan)?;
            if sub.status != SubscriptionStatus::Active {
                claim_id = Some(sub.claim_billing(now)?);
                return Ok(true);
            }
            if sub.billing_in_progress(now) {
                return Err(SubscriptionError::PaymentInProgress {
                    subscription_id: sub.id.clone(),
                });
            }
            claim_id = None;
            before = Some(sub.plan);
            sub.plan = change.plan;
            sub.payment_method = Some(method);
            sub.mpesa_number = mpesa_number.clone();
            sub.updated_at = now;
            Ok(true)
        })
        .await?;

        let Some(claim_id) = claim_id else {
            self.log_plan_change(owner_id, &claimed);
            if let Some(from_plan) = before {
                self.audit_plan_change(&claimed.id, from_plan, claimed.plan).await;
            }
            return Ok(claimed);
        };

        let amount_cents = self.catalog.price_cents(change.plan);
        let charge = ChargeRequest {
            subscription_id: claimed.id.clone(),
            owner_id: owner_id.to_string(),
            amount_cents,
            method,
            mpesa_number: mpesa_number.clone(),
            description: format!("Upgrade to {} plan", change.plan),
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
                let failed = Payment::new(&claimed.id, amount_cents, method, "", PaymentStatus::Failed, now)
                    .with_description(format!("{} ({})", charge.description, reason));
                let recorded = self.store.append_payment(&failed).await;
                release_billing_claim(&self.store, &claimed.id, &claim_id).await;
                recorded?;
                self.audit_payment(&failed).await;
                return Err(SubscriptionError::PaymentDeclined {
                    reason,
                    status: claimed.status,
                }
                .into());
            }
        };

        // The money has moved: record it before touching the subscription and
        // never charge again from here on.
        let payment = Payment::new(&claimed.id, amount_cents, method, &transaction_id, PaymentStatus::Completed, now)
            .with_description(charge.description);
        if let Err(err) = self.store.append_payment(&payment).await {
            tracing::error!(
                target: "farmgate::subscriptions",
                subscription_id = %claimed.id,
                transaction_id = %transaction_id,
                error = %err,
                "Plan change charged but the payment could not be recorded"
            );
            return Err(charged_but_unsaved(&claimed.id, &transaction_id));
        }
        self.audit_payment(&payment).await;

        let cycle_days = self.config.billing_cycle_days;
        let mut before = None;
        let result = update_subscription(&self.store, &claimed.id, |sub| {
            if !sub.release_claim(&claim_id) {
                return Err(SubscriptionError::Internal {
                    message: "billing claim was taken over".to_string(),
                });
            }
            before = Some((sub.status, sub.plan));
            sub.plan = change.plan;
            sub.payment_method = Some(method);
            sub.mpesa_number = mpesa_number.clone();
            sub.apply(SubscriptionEvent::PaymentReceived, now, cycle_days)?;
            Ok(true)
        })
        .await;

        let subscription = match result {
            Ok((subscription, _)) => subscription,
            Err(err) => {
                tracing::error!(
                    target: "farmgate::subscriptions",
                    subscription_id = %claimed.id,
                    transaction_id = %transaction_id,
                    error = %err,
                    "Plan change charged but the subscription could not be updated"
                );
                return Err(charged_but_unsaved(&claimed.id, &transaction_id));
            }
        };

        self.log_plan_change(owner_id, &subscription);
        if let Some((from_status, from_plan)) = before {
            self.audit_plan_change(&subscription.id, from_plan, subscription.plan).await;
            self.audit_transition(&subscription.id, from_status, subscription.status, SubscriptionEvent::PaymentReceived)
                .await;
        }

        Ok(subscription)
    }

    fn log_plan_change(&self, owner_id: &str, subscription: &Subscription) {
        tracing::info!(
            target: "farmgate::subscriptions",
            owner_id = %owner_id,
            subscription_id = %subscription.id,
            plan = %subscription.plan,
            status = %subscription.status,
            "Subscription plan changed"
        );
    }

    /// Cancel an active subscription. Only its owner may do this.
    pub async fn cancel_subscription(&self, actor_id: &str, subscription_id: &str) -> Result<Subscription> {
        let current = self.store.get_by_id(subscription_id).await?.ok_or_else(|| {
            SubscriptionError::SubscriptionNotFound {
                subscription_id: subscription_id.to_string(),
            }
        })?;
        if current.owner_id != actor_id {
            tracing::warn!(
                target: "farmgate::subscriptions",
                actor_id = %actor_id,
                subscription_id = %subscription_id,
                "Refused to cancel another account's subscription"
            );
            return Err(SubscriptionError::NotOwner {
                subscription_id: subscription_id.to_string(),
            }
            .into());
        }

        let now = Utc::now();
        let cycle_days = self.config.billing_cycle_days;
        let mut from = current.status;
        let (subscription, _) = update_subscription(&self.store, subscription_id, |sub| {
            if sub.billing_in_progress(now) {
                return Err(SubscriptionError::PaymentInProgress {
                    subscription_id: sub.id.clone(),
                });
            }
            from = sub.apply(SubscriptionEvent::CancelRequested, now, cycle_days)?;
            Ok(true)
        })
        .await?;

        tracing::info!(
            target: "farmgate::subscriptions",
            owner_id = %actor_id,
            subscription_id = %subscription_id,
            "Subscription canceled"
        );
        self.audit_transition(subscription_id, from, subscription.status, SubscriptionEvent::CancelRequested)
            .await;

        Ok(subscription)
    }

    /// The owner's payments, newest first.
    pub async fn payment_history(&self, owner_id: &str) -> Result<Vec<Payment>> {
        let subscription = self.get_subscription(owner_id).await?;
        let mut payments = self.store.list_payments(&subscription.id).await?;
        payments.reverse();
        payments.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(payments)
    }

    async fn audit_transition(
        &self,
        subscription_id: &str,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        event: SubscriptionEvent,
    ) {
        self.audit
            .log(SubscriptionAuditEvent::StatusChanged {
                subscription_id: subscription_id.to_string(),
                from,
                to,
                event,
            })
            .await;
    }

    async fn audit_plan_change(&self, subscription_id: &str, from: SubscriptionPlan, to: SubscriptionPlan) {
        if from != to {
            self.audit
                .log(SubscriptionAuditEvent::PlanChanged {
                    subscription_id: subscription_id.to_string(),
                    from,
                    to,
                })
                .await;
        }
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

fn check_plan_change(current: &Subscription, plan: SubscriptionPlan) -> std::result::Result<(), SubscriptionError> {
    if plan == current.plan {
        return Err(SubscriptionError::InvalidPlanChange {
            reason: format!("already on the {} plan", plan),
        });
    }
    if !plan.is_paid() {
        return Err(SubscriptionError::InvalidPlanChange {
            reason: "cannot switch back to the free trial".to_string(),
        });
    }
    if current.status == SubscriptionStatus::Canceled {
        return Err(SubscriptionError::InvalidPlanChange {
            reason: "the subscription has been canceled".to_string(),
        });
    }
    Ok(())
}

fn validate_owner_id(owner_id: &str) -> std::result::Result<(), SubscriptionError> {
    if owner_id.trim().is_empty() {
        return Err(SubscriptionError::InvalidOwnerId {
            reason: "cannot be empty".to_string(),
        });
    }
    if owner_id.len() > 128 {
        return Err(SubscriptionError::InvalidOwnerId {
            reason: "too long".to_string(),
        });
    }
    Ok(())
}

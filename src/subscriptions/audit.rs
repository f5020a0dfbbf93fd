//! Audit trail for subscription state changes.

use std::fmt;
use std::future::Future;

use super::model::{PaymentStatus, SubscriptionEvent, SubscriptionPlan, SubscriptionStatus};

/// Audit events emitted by the subscription manager and sweeper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionAuditEvent {
    Created {
        owner_id: String,
        subscription_id: String,
        plan: SubscriptionPlan,
        status: SubscriptionStatus,
    },
    StatusChanged {
        subscription_id: String,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
        event: SubscriptionEvent,
    },
    PlanChanged {
        subscription_id: String,
        from: SubscriptionPlan,
        to: SubscriptionPlan,
    },
    PaymentRecorded {
        subscription_id: String,
        payment_id: String,
        amount_cents: i64,
        status: PaymentStatus,
    },
    NotificationSent {
        subscription_id: String,
        kind: &'static str,
    },
}

impl fmt::Display for SubscriptionAuditEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created { owner_id, subscription_id, plan, status } => {
                write!(f, "Subscription created: owner={}, sub={}, plan={}, status={}", owner_id, subscription_id, plan, status)
            }
            Self::StatusChanged { subscription_id, from, to, event } => {
                write!(f, "Subscription status changed: sub={}, {} -> {} on {}", subscription_id, from, to, event)
            }
            Self::PlanChanged { subscription_id, from, to } => {
                write!(f, "Subscription plan changed: sub={}, {} -> {}", subscription_id, from, to)
            }
            Self::PaymentRecorded { subscription_id, payment_id, amount_cents, status } => {
                write!(f, "Payment recorded: sub={}, payment={}, amount_cents={}, status={:?}", subscription_id, payment_id, amount_cents, status)
            }
            Self::NotificationSent { subscription_id, kind } => {
                write!(f, "Notification sent: sub={}, kind={}", subscription_id, kind)
            }
        }
    }
}

impl SubscriptionAuditEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "subscription_created",
            Self::StatusChanged { .. } => "status_changed",
            Self::PlanChanged { .. } => "plan_changed",
            Self::PaymentRecorded { .. } => "payment_recorded",
            Self::NotificationSent { .. } => "notification_sent",
        }
    }
}

/// Sink for subscription audit events.
///
/// Implementations must not fail the operation being audited; handle
/// delivery problems internally.
pub trait SubscriptionAuditLogger: Send + Sync {
    fn log(&self, event: SubscriptionAuditEvent) -> impl Future<Output = ()> + Send;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpAuditLogger;

impl SubscriptionAuditLogger for NoOpAuditLogger {
    async fn log(&self, _event: SubscriptionAuditEvent) {}
}

/// Logs audit events through `tracing` at INFO level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl SubscriptionAuditLogger for TracingAuditLogger {
    async fn log(&self, event: SubscriptionAuditEvent) {
        tracing::info!(
            target: "farmgate::audit",
            event_type = %event.kind(),
            "{}", event
        );
    }
}

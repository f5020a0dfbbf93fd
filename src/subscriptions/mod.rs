//! Farmer subscriptions and the access gate.
//!
//! - [`model`]: records, plans and the lifecycle state machine
//! - [`access`]: pure access decisions
//! - [`SubscriptionManager`]: create, pay, change plan, cancel
//! - [`SubscriptionGate`]: per-request enforcement as axum middleware
//! - [`SubscriptionSweeper`]: periodic notices, expiry and renewals

pub mod access;
pub mod audit;
mod error;
mod gate;
mod manager;
pub mod model;
pub mod notify;
pub mod payment;
mod plans;
pub mod storage;
mod sweep;

pub use access::{AccessReport, access_report, can_access, days_remaining};
pub use audit::{NoOpAuditLogger, SubscriptionAuditEvent, SubscriptionAuditLogger, TracingAuditLogger};
pub use error::SubscriptionError;
pub use gate::{DenyReason, GateDecision, SubscriptionGate, decide};
pub use manager::{NewSubscription, PaymentReceipt, PlanChange, SubscriptionManager};
pub use model::{
    BillingClaim, Payment, PaymentMethod, PaymentStatus, Subscription, SubscriptionEvent, SubscriptionPlan,
    SubscriptionStatus,
};
pub use notify::{SubscriptionNotifier, TracingNotifier};
pub use payment::{ApprovingGateway, ChargeOutcome, ChargeRequest, PaymentGateway, PaymentRequest};
pub use plans::{PlanCatalog, PlanInfo};
pub use storage::{
    InMemorySubscriptionStore, SubscriptionMutation, SubscriptionStore, release_billing_claim,
    update_subscription,
};
pub use sweep::{SubscriptionSweeper, SweepReport, SweeperHandle, spawn_sweeper};

//! The plan catalogue shown to farmers.

use serde::Serialize;

use super::model::SubscriptionPlan;

/// Display details and price for one plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanInfo {
    pub id: SubscriptionPlan,
    pub name: String,
    /// Price per billing cycle in cents.
    pub monthly_price_cents: i64,
    pub features: Vec<String>,
}

/// The set of plans on offer.
#[derive(Debug, Clone)]
pub struct PlanCatalog {
    plans: Vec<PlanInfo>,
}

impl PlanCatalog {
    pub fn new(plans: Vec<PlanInfo>) -> Self {
        Self { plans }
    }

    pub fn plans(&self) -> &[PlanInfo] {
        &self.plans
    }

    pub fn get(&self, plan: SubscriptionPlan) -> Option<&PlanInfo> {
        self.plans.iter().find(|info| info.id == plan)
    }

    /// Price of one billing cycle; unknown plans cost nothing.
    pub fn price_cents(&self, plan: SubscriptionPlan) -> i64 {
        self.get(plan).map_or(0, |info| info.monthly_price_cents)
    }
}

fn plan(id: SubscriptionPlan, name: &str, price: i64, features: &[&str]) -> PlanInfo {
    PlanInfo {
        id,
        name: name.to_string(),
        monthly_price_cents: price,
        features: features.iter().map(|f| f.to_string()).collect(),
    }
}

impl Default for PlanCatalog {
    fn default() -> Self {
        Self::new(vec![
            plan(
                SubscriptionPlan::FreeTrial,
                "Free Trial",
                0,
                &["30-day access", "List up to 10 products", "Basic analytics"],
            ),
            plan(
                SubscriptionPlan::Basic,
                "Basic",
                999,
                &["Unlimited products", "Order management", "Basic analytics"],
            ),
            plan(
                SubscriptionPlan::Premium,
                "Premium",
                1999,
                &["Everything in Basic", "Advanced analytics", "Priority listing"],
            ),
            plan(
                SubscriptionPlan::Enterprise,
                "Enterprise",
                4999,
                &["Everything in Premium", "Multiple farms", "Dedicated support"],
            ),
        ])
    }
}

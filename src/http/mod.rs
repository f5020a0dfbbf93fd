//! HTTP surface: route modules and handlers.

mod ratings;
mod routes;
mod subscriptions;

pub use ratings::RatingsModule;
pub use routes::RouteModule;
pub use subscriptions::SubscriptionsModule;

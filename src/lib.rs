//! Farmgate - farm ratings and farmer subscriptions for a produce marketplace
//!
//! Two components behind one axum router:
//!
//! - **Ratings**: consumers and anonymous visitors rate farms 1-5; each voter
//!   holds at most one rating per farm and the stored average is always the
//!   mean of the current ratings. Anonymous voters are identified by a
//!   server-issued session token.
//! - **Subscriptions**: farmers need a live trial or paid subscription to
//!   reach gated routes. A background sweep sends trial notices, expires
//!   lapsed trials and renews paid plans.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use farmgate::{App, AppContext, ConfigBuilder};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     farmgate::init_tracing();
//!
//!     let config = ConfigBuilder::new().from_env().build()?;
//!     App::new(AppContext::in_memory(config)).serve().await?;
//!     Ok(())
//! }
//! ```

mod app;
mod config;
mod core;
mod error;
pub mod health;
mod http;
pub mod identity;
mod middleware;
pub mod ratings;
pub mod session;
pub mod subscriptions;
pub mod testing;
pub mod utils;

// Re-exports for public API
pub use app::{AppContext, SharedRatingStore, SharedSubscriptionStore};
pub use config::{
    Config, ConfigBuilder, LoggingConfig, RatingConfig, ServerConfig, SessionConfig,
    SubscriptionConfig,
};
pub use core::App;
pub use error::{
    ErrorContext, ErrorResponse, ErrorWithContext, FarmgateError, PaymentRequiredDetail, Result,
};
pub use health::{ComponentHealth, HealthStatus};
pub use http::{RatingsModule, RouteModule, SubscriptionsModule};
pub use identity::{AccountRole, Identity, SESSION_HEADER};

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing/logging with sensible defaults
///
/// # Environment Variables
///
/// - `RUST_LOG`: log filter (e.g. "info", "farmgate=debug")
/// - `FARMGATE_LOG_JSON`: set to "true" for JSON formatted logs
///
/// Does nothing if a global subscriber is already installed.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let json_logs = std::env::var("FARMGATE_LOG_JSON")
        .map(|v| v.parse::<bool>().unwrap_or(false))
        .unwrap_or(false);

    install_subscriber(env_filter, json_logs);
}

/// Initialize tracing from a loaded [`Config`]
///
/// `RUST_LOG` still wins over `logging.level` when set.
pub fn init_tracing_with_config(config: &Config) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    install_subscriber(env_filter, config.logging.json);
}

fn install_subscriber(env_filter: EnvFilter, json: bool) {
    let result = if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .try_init()
    };

    if result.is_err() {
        tracing::debug!("Tracing subscriber already installed");
    }
}

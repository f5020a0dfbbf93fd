use crate::{
    app::{AppContext, SharedSubscriptionStore},
    health,
    http::{RatingsModule, RouteModule, SubscriptionsModule},
    middleware::MakeRequestUuid,
    session::SessionStore,
    subscriptions::{SubscriptionGate, spawn_sweeper},
};
use axum::{Router, middleware::from_fn_with_state, routing::get};
use std::time::Duration;
use tokio::signal;
use tower_http::request_id::{PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

/// The farmgate HTTP service.
///
/// Holds the API routes, the subscription gate in front of them and the
/// shared [`AppContext`].
pub struct App {
    router: Router<AppContext>,
    context: AppContext,
}

impl App {
    /// Creates an App serving the rating and subscription APIs
    pub fn new(context: AppContext) -> Self {
        Self::empty(context)
            .register_module(RatingsModule)
            .register_module(SubscriptionsModule)
    }

    /// Creates an App with no routes registered
    pub fn empty(context: AppContext) -> Self {
        Self {
            router: Router::new(),
            context,
        }
    }

    /// Register a route module with the application
    ///
    /// Routes registered here sit behind the subscription gate.
    pub fn register_module<M: RouteModule>(self, module: M) -> Self {
        Self {
            router: module.register(self.router),
            context: self.context,
        }
    }

    pub fn context(&self) -> &AppContext {
        &self.context
    }

    /// Build the final router with the gate, health check and middleware stack applied.
    pub fn into_router(self) -> Router {
        let gate = self.context.gate.clone();

        // Middleware order (from outer to inner):
        // request id, tracing, subscription gate, handlers.
        let health_routes = Router::<AppContext>::new().route("/health", get(health::health_handler));

        self.router
            .layer(from_fn_with_state(gate, SubscriptionGate::<SharedSubscriptionStore>::middleware))
            .merge(health_routes)
            .with_state(self.context)
            .layer(TraceLayer::new_for_http())
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// Start the application server and the subscription sweeper
    pub async fn serve(self) -> Result<(), std::io::Error> {
        let config = self.context.config.clone();
        let addr = config
            .server
            .addr()
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err))?;

        let interval = Duration::from_secs(config.subscriptions.sweep_interval_seconds);
        let sweeper = spawn_sweeper(std::sync::Arc::new(self.context.sweeper()), interval);
        let session_cleanup = spawn_session_cleanup(self.context.sessions.clone(), interval);

        let listener = tokio::net::TcpListener::bind(addr).await?;

        tracing::info!("Server starting on http://{}", addr);
        tracing::info!("Health check available at http://{}/health", addr);

        let result = axum::serve(listener, self.into_router())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        session_cleanup.abort();
        sweeper.shutdown().await;
        result
    }
}

/// Drop expired voter sessions every `interval`.
fn spawn_session_cleanup(
    sessions: std::sync::Arc<dyn SessionStore>,
    interval: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            match sessions.cleanup_expired().await {
                Ok(0) => {}
                Ok(removed) => tracing::debug!(removed, "Expired voter sessions removed"),
                Err(err) => tracing::warn!(error = %err, "Voter session cleanup failed"),
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, starting graceful shutdown");
        },
    }
}

use axum::Router;

use crate::app::AppContext;

/// A group of routes registered on the application together.
///
/// Handlers take `State<AppContext>`; state is applied once by the `App`.
pub trait RouteModule {
    fn routes(&self) -> Router<AppContext>;

    /// Optional path prefix for every route in the module.
    fn prefix(&self) -> Option<&str> {
        None
    }

    fn register(self, router: Router<AppContext>) -> Router<AppContext>
    where
        Self: Sized,
    {
        let routes = self.routes();
        match self.prefix() {
            Some(prefix) => router.nest(prefix, routes),
            None => router.merge(routes),
        }
    }
}

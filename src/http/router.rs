use axum::Router;
use tower_http::trace::TraceLayer;

use super::handlers;
use super::types::AppState;

/// Builds the full API router. One resource family per path prefix; the
/// handlers apply the access-control policy uniformly.
pub fn app(state: AppState) -> Router {
    Router::new()
        .nest("/api/auth", handlers::auth::routes())
        .nest("/api/users", handlers::users::routes())
        .nest("/api/students", handlers::students::routes())
        .nest("/api/grades", handlers::grades::routes())
        .nest("/api/assignments", handlers::assignments::routes())
        .nest("/api/attendance", handlers::attendance::routes())
        .nest("/api/behavior", handlers::behavior::routes())
        .nest("/api/meetings", handlers::meetings::routes())
        .nest("/api/messages", handlers::messages::routes())
        .nest("/api/announcements", handlers::announcements::routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

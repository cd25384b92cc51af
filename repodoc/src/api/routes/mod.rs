//! Route definitions.

pub mod health;
pub mod jobs;

use axum::Router;
use tower_http::services::ServeDir;

use crate::api::server::AppState;
use crate::storage::FILES_ROUTE;

/// Create the application router.
pub fn create_router(state: AppState) -> Router {
    let files = ServeDir::new(&state.storage_dir);

    Router::new()
        .merge(jobs::router())
        .nest("/health", health::router())
        .nest_service(FILES_ROUTE, files)
        .with_state(state)
}

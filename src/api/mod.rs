//! Read-only inspection API over the project buckets and the event outbox.

mod handlers;
pub mod middleware;

use axum::{middleware::from_fn_with_state, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::store::{SqliteObjectStore, StoreOptions};

pub use middleware::ApiAuth;

#[derive(Clone)]
pub struct AppState {
    pub store: SqliteObjectStore,
    pub options: StoreOptions,
}

impl AppState {
    pub fn new(store: SqliteObjectStore, options: StoreOptions) -> Self {
        Self { store, options }
    }
}

pub fn create_router(state: AppState, auth: ApiAuth) -> Router {
    let protected = Router::new()
        // Projects
        .route("/projects", get(handlers::list_projects))
        .route("/projects/{slug}/epic", get(handlers::get_epic))
        .route("/projects/{slug}/rules", get(handlers::get_rules))
        .route("/projects/{slug}/ledger", get(handlers::get_ledger))
        // Notification outbox
        .route("/events", get(handlers::list_events))
        .route_layer(from_fn_with_state(auth, middleware::auth_middleware));

    let api = Router::new()
        .merge(protected)
        // Health
        .route("/health", get(handlers::health));

    Router::new()
        .nest("/api/v1", api)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

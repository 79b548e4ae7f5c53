pub mod auth;
pub mod error;
mod hardware;
mod logs;
pub mod rate_limit;
mod users;
mod validation;

use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // Login is the only public route that touches credentials
    let login_routes = Router::new()
        .route("/login", post(auth::login))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            rate_limit::rate_limit_login,
        ));

    // Every handler below takes a Session or AdminSession extractor
    let session_routes = Router::new()
        .route("/logout", post(auth::logout))
        .route("/session", get(auth::current_session))
        .route("/actuate", get(hardware::actuate))
        .route("/stream", get(hardware::stream))
        .route("/logs", get(logs::list_logbook))
        .route("/logs/hardware", get(logs::list_hardware_events))
        .route(
            "/users",
            get(users::list_users)
                .post(users::create_user)
                .delete(users::remove_user),
        );

    Router::new()
        .route("/health", get(health_check))
        .merge(login_routes)
        .merge(session_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_check() -> &'static str {
    "OK"
}

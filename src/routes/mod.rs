// Route modules
pub mod bridge;

use crate::{app_state::AppState, middleware::logging_middleware};
use axum::{
    http::{header, HeaderValue, Method},
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

/// Create the bridge router served to the hosted content
pub fn create_router(state: AppState) -> Router {
    let cors = bridge_cors(&state.config.server.content_origin);

    Router::new()
        .nest("/bridge", bridge_routes())
        .layer(middleware::from_fn(logging_middleware))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn bridge_routes() -> Router<AppState> {
    Router::new()
        .route("/plans", get(bridge::get_plans))
        .route("/buy", post(bridge::buy))
        .route("/auth", post(bridge::set_auth))
}

/// Only the hosted content's origin may call the bridge from a browser context
fn bridge_cors(content_origin: &str) -> CorsLayer {
    let allow_origin = if content_origin == "*" {
        AllowOrigin::any()
    } else {
        match content_origin.parse::<HeaderValue>() {
            Ok(origin) => AllowOrigin::exact(origin),
            Err(e) => {
                warn!("Invalid content origin {:?}: {}", content_origin, e);
                AllowOrigin::list(Vec::<HeaderValue>::new())
            }
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}

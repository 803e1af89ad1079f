use axum::{
    http::{header, Method},
    middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod metrics;
pub mod middlewares;
pub mod models;
pub mod services;
pub mod utils;

pub use config::Config;
pub use services::AppState;

pub fn create_router(app_state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE])
        .allow_origin(tower_http::cors::Any);

    Router::new()
        // Public endpoints (no auth required)
        .route("/health", get(handlers::health_check))
        .route(
            "/metrics",
            get(handlers::metrics_handler)
                .layer(middleware::from_fn(handlers::metrics_auth_middleware)),
        )
        // Room channel; identity is optional and checked during the upgrade
        .route("/api/v1/ws", get(handlers::ws::room_socket))
        .nest("/api/v1/rooms", room_routes(app_state.clone()))
        .with_state(app_state)
        .layer(cors)
        .layer(middleware::from_fn(
            middlewares::metrics::metrics_middleware,
        ))
        .layer(TraceLayer::new_for_http())
}

fn room_routes(app_state: Arc<AppState>) -> Router<Arc<AppState>> {
    let public_routes = Router::new().route("/{code}", get(handlers::rooms::get_room));

    // Teacher endpoints (require JWT)
    let teacher_routes = Router::new()
        .route("/", post(handlers::rooms::create_room))
        .route("/{code}/results", get(handlers::rooms::get_results))
        .route("/{code}/groups", get(handlers::rooms::get_groups))
        .route("/{code}/start", post(handlers::rooms::start_room))
        .route("/{code}/stop", post(handlers::rooms::stop_room))
        .route("/{code}/events", get(handlers::sse::room_stream))
        .route_layer(middleware::from_fn(
            middlewares::auth::teacher_guard_middleware,
        ))
        .route_layer(middleware::from_fn_with_state(
            app_state,
            middlewares::auth::auth_middleware,
        ));

    public_routes.merge(teacher_routes)
}

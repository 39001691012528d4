use crate::state::AppState;
use axum::Router;
use axum::routing::get;
use std::sync::{Arc, RwLock};

pub mod handlers;
pub mod responses;

pub fn router(state: Arc<RwLock<AppState>>) -> Router {
    Router::new()
        .route("/api/health", get(handlers::get_health))
        .route("/api/lots", get(handlers::get_lots))
        .route("/api/events/recent", get(handlers::get_recent_events))
        .route("/api/predict", get(handlers::get_predict))
        .with_state(state)
}

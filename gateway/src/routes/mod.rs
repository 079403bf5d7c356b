pub mod health;
pub mod predict;

use std::sync::Arc;

use axum::Router;

use crate::AppState;

/// Every gateway route, bound to `state`.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(health::router())
        .merge(predict::router())
        .with_state(state)
}

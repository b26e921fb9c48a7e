//! HTTP route handlers.

pub mod badges;
pub mod recent;

use std::sync::Arc;

use axum::Router;

use crate::server::AppState;

/// `/go/...` badge and coverage routes.
pub fn badge_routes() -> Router<Arc<AppState>> {
    badges::routes()
}

/// `/api/v1` routes.
pub fn api_v1_routes() -> Router<Arc<AppState>> {
    Router::new().merge(recent::routes())
}

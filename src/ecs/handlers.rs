use super::service::Coordinator;
use super::types::{MemberInfo, RingEntryInfo};

use axum::{Extension, Json, Router, routing::get};
use std::sync::Arc;

pub const ENDPOINT_RING: &str = "/ring";
pub const ENDPOINT_MEMBERS: &str = "/members";

pub fn admin_router(coordinator: Arc<Coordinator>) -> Router {
    Router::new()
        .route(ENDPOINT_RING, get(handle_get_ring))
        .route(ENDPOINT_MEMBERS, get(handle_get_members))
        .layer(Extension(coordinator))
}

pub async fn handle_get_ring(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<Vec<RingEntryInfo>> {
    let ring = coordinator.ring_snapshot().await;
    tracing::debug!("Serving ring snapshot with {} entries", ring.len());
    Json(ring)
}

pub async fn handle_get_members(
    Extension(coordinator): Extension<Arc<Coordinator>>,
) -> Json<Vec<MemberInfo>> {
    Json(coordinator.members())
}

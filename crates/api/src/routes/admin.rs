//! Operator endpoints for the gateway guard.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway::GuardStatus;
use store::LifecycleStore;

use crate::state::AppState;

/// GET /admin/gateway: breaker states and quota usage.
pub async fn gateway_status<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<GuardStatus> {
    Json(state.gateway.guard().status())
}

/// POST /admin/gateway/reset: closes both breakers.
pub async fn reset_gateway<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<GuardStatus> {
    let guard = state.gateway.guard();
    guard.reset();
    tracing::warn!("gateway breakers reset by operator");
    Json(guard.status())
}

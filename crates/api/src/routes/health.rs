//! Liveness with a view of the payment gateway breakers.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use gateway::BreakerState;
use serde::Serialize;
use store::LifecycleStore;

use crate::state::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    /// `ok`, or `degraded` while either gateway breaker is not closed.
    pub status: &'static str,
    pub gateway_general: BreakerState,
    pub gateway_payment: BreakerState,
}

/// GET /health
///
/// Always 200: an open breaker limits bookings but the engine still serves
/// reads, cancels and webhooks.
pub async fn check<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
) -> Json<HealthResponse> {
    let guard = state.gateway.guard().status();
    let degraded = guard.general != BreakerState::Closed || guard.payment != BreakerState::Closed;
    Json(HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        gateway_general: guard.general,
        gateway_payment: guard.payment,
    })
}

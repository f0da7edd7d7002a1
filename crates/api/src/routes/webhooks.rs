//! Gateway webhook receiver.

use std::sync::Arc;

use axum::Json;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use store::LifecycleStore;
use webhooks::WebhookReceipt;

use crate::error::ApiError;
use crate::state::AppState;

pub const SIGNATURE_HEADER: &str = "x-gateway-signature";

/// POST /webhooks/gateway: verifies the signature over the raw body and
/// applies the event at most once.
#[tracing::instrument(skip_all)]
pub async fn receive<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<WebhookReceipt>), ApiError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    let receipt = state.webhooks.handle(&body, signature).await?;
    Ok((StatusCode::ACCEPTED, Json(receipt)))
}

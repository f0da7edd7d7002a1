//! Saga inspection endpoint.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use common::SagaId;
use domain::PaymentSaga;
use store::{LifecycleStore, StoreError};

use crate::error::ApiError;
use crate::state::AppState;

/// GET /sagas/{id}: the saga record with its step log.
#[tracing::instrument(skip(state))]
pub async fn get<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<SagaId>,
) -> Result<Json<PaymentSaga>, ApiError> {
    let saga = state
        .bookings
        .get_saga(id)
        .await?
        .ok_or(StoreError::SagaNotFound(id))?;
    Ok(Json(saga))
}

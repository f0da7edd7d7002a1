//! Order booking and lifecycle endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use common::{Money, OrderId};
use domain::{Actor, Order, OrderStatus, SideEffect, SlotId};
use orders::{Applied, CancelOutcome, RescheduleOutcome, StatusUpdate};
use saga::BookingRequest;
use serde::{Deserialize, Serialize};
use store::{AuditEntry, LifecycleStore};

use crate::error::ApiError;
use crate::state::AppState;

// -- Request types --

#[derive(Deserialize)]
pub struct CancelRequest {
    pub actor: Actor,
    pub reason: Option<String>,
}

#[derive(Deserialize)]
pub struct RescheduleRequest {
    pub slot_ids: Vec<SlotId>,
    pub scheduled_time: DateTime<Utc>,
    pub actor: Actor,
}

#[derive(Deserialize)]
pub struct StatusRequest {
    pub to: OrderStatus,
    pub actor: Actor,
    pub new_payment_method: Option<String>,
    #[serde(default)]
    pub payment_confirmed: bool,
    pub metadata: Option<serde_json::Value>,
    pub reason: Option<String>,
}

impl From<StatusRequest> for StatusUpdate {
    fn from(req: StatusRequest) -> Self {
        StatusUpdate {
            to: req.to,
            actor: req.actor,
            new_payment_method: req.new_payment_method,
            payment_confirmed: req.payment_confirmed,
            metadata: req.metadata,
            reason: req.reason,
        }
    }
}

#[derive(Deserialize)]
pub struct ForceStatusRequest {
    pub to: OrderStatus,
    pub reason: String,
}

#[derive(Deserialize)]
pub struct QuoteRequest {
    pub amount: Money,
    pub metadata: Option<serde_json::Value>,
    pub actor: Actor,
}

// -- Response types --

#[derive(Serialize)]
pub struct TransitionResponse {
    pub order: Order,
    pub side_effects: Vec<SideEffect>,
}

impl From<Applied> for TransitionResponse {
    fn from(applied: Applied) -> Self {
        Self {
            order: applied.order,
            side_effects: applied.side_effects,
        }
    }
}

// -- Handlers --

/// POST /orders: book an order through the payment authorization saga.
#[tracing::instrument(skip_all)]
pub async fn create<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<BookingRequest>,
) -> Result<(StatusCode, Json<Order>), ApiError> {
    let order = state.bookings.execute(req).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

/// GET /orders/{id}
#[tracing::instrument(skip(state))]
pub async fn get<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Order>, ApiError> {
    Ok(Json(state.orders.get_order(id).await?))
}

/// GET /orders/{id}/audit: every applied transition, oldest first.
#[tracing::instrument(skip(state))]
pub async fn audit<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<Vec<AuditEntry>>, ApiError> {
    Ok(Json(state.orders.audit_trail(id).await?))
}

/// POST /orders/{id}/cancel
#[tracing::instrument(skip(state, req))]
pub async fn cancel<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<CancelRequest>,
) -> Result<Json<CancelOutcome>, ApiError> {
    Ok(Json(state.orders.cancel(id, req.actor, req.reason).await?))
}

/// POST /orders/{id}/reschedule: retires the order and books a new row.
#[tracing::instrument(skip(state, req))]
pub async fn reschedule<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<RescheduleRequest>,
) -> Result<(StatusCode, Json<RescheduleOutcome>), ApiError> {
    let outcome = state
        .orders
        .reschedule(id, req.slot_ids, req.scheduled_time, req.actor)
        .await?;
    Ok((StatusCode::CREATED, Json(outcome)))
}

/// POST /orders/{id}/status: partner and system status updates.
#[tracing::instrument(skip(state, req))]
pub async fn update_status<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<StatusRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = state.orders.update_status(id, req.into()).await?;
    Ok(Json(applied.into()))
}

/// POST /orders/{id}/force-status: administrative override.
#[tracing::instrument(skip(state, req))]
pub async fn force_status<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<ForceStatusRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = state.orders.force_status(id, req.to, req.reason).await?;
    Ok(Json(applied.into()))
}

/// POST /orders/{id}/quote
#[tracing::instrument(skip(state, req))]
pub async fn submit_quote<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
    Json(req): Json<QuoteRequest>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = state
        .orders
        .submit_quote(id, req.amount, req.metadata, req.actor)
        .await?;
    Ok(Json(applied.into()))
}

/// POST /orders/{id}/quote/approve
#[tracing::instrument(skip(state))]
pub async fn approve_quote<S: LifecycleStore + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<OrderId>,
) -> Result<Json<TransitionResponse>, ApiError> {
    let applied = state.orders.approve_quote(id).await?;
    Ok(Json(applied.into()))
}

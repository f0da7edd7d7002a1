//! Shared application state and the collaborators it is wired from.

use std::sync::Arc;

use async_trait::async_trait;
use common::OrderId;
use domain::{
    CancellationPolicy, CapacityAllocator, CollaboratorError, FeeRate, InMemoryCapacity,
    NotificationDispatcher, PolicyStore, ServiceType, SideEffect,
};
use gateway::{GatewayGuard, GuardedGateway, InMemoryGateway, PaymentGateway};
use orders::OrderService;
use saga::PaymentAuthorizationSaga;
use store::LifecycleStore;
use webhooks::WebhookProcessor;

use crate::config::Config;

/// Shared application state accessible from all handlers.
pub struct AppState<S: LifecycleStore + ?Sized> {
    pub orders: OrderService<S>,
    pub bookings: PaymentAuthorizationSaga<S>,
    pub webhooks: WebhookProcessor<S>,
    pub gateway: GuardedGateway,
}

/// External systems the engine talks to.
pub struct Collaborators {
    pub gateway: Arc<dyn PaymentGateway>,
    pub capacity: Arc<dyn CapacityAllocator>,
    pub notifier: Arc<dyn NotificationDispatcher>,
}

impl Collaborators {
    /// Simulated gateway, in-process slot allocator and a dispatcher that
    /// only logs.
    pub fn local() -> Self {
        Self {
            gateway: Arc::new(InMemoryGateway::new()),
            capacity: Arc::new(InMemoryCapacity::new()),
            notifier: Arc::new(LoggingDispatcher),
        }
    }
}

/// Builds the services over one store. All of them share a single gateway
/// guard so the breakers see every call.
pub fn create_state<S: LifecycleStore + ?Sized>(
    store: Arc<S>,
    collaborators: Collaborators,
    config: &Config,
) -> Arc<AppState<S>> {
    let guard = Arc::new(GatewayGuard::new(config.guard));
    let gateway = GuardedGateway::new(collaborators.gateway, guard);

    let orders = OrderService::new(
        Arc::clone(&store),
        gateway.clone(),
        collaborators.capacity,
        Arc::clone(&collaborators.notifier),
        config.lifecycle,
    );
    let bookings = PaymentAuthorizationSaga::new(
        Arc::clone(&store),
        gateway.clone(),
        Arc::clone(&collaborators.notifier),
        config.strategy,
    );
    let webhooks = WebhookProcessor::new(
        store,
        collaborators.notifier,
        config.webhooks.clone(),
    );

    Arc::new(AppState {
        orders,
        bookings,
        webhooks,
        gateway,
    })
}

/// The policies a fresh deployment starts with: 24 hours notice, 15% fee.
pub fn default_policies() -> Vec<CancellationPolicy> {
    [
        ("standard-pickup-delivery", ServiceType::PickupDelivery),
        ("standard-on-site", ServiceType::OnSite),
    ]
    .into_iter()
    .map(|(id, service_type)| CancellationPolicy {
        id: id.to_string(),
        version: 1,
        service_type,
        notice_hours: 24,
        fee_percent: FeeRate::from_bps(1_500),
        active: true,
    })
    .collect()
}

/// Stores the default policy for every service type that has none active.
pub async fn seed_policies<P: PolicyStore + ?Sized>(policies: &P) -> Result<usize, CollaboratorError> {
    let mut seeded = 0;
    for policy in default_policies() {
        if policies.active_policy(policy.service_type).await?.is_none() {
            tracing::info!(policy_id = %policy.id, service_type = ?policy.service_type, "seeding cancellation policy");
            policies.put_policy(policy).await?;
            seeded += 1;
        }
    }
    Ok(seeded)
}

/// Dispatcher for deployments without a notification service: every tag is
/// logged and counted.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl NotificationDispatcher for LoggingDispatcher {
    async fn dispatch(&self, order_id: OrderId, effects: &[SideEffect]) -> Result<(), CollaboratorError> {
        for effect in effects {
            metrics::counter!("side_effects_dispatched_total", "effect" => effect.as_str())
                .increment(1);
            tracing::info!(%order_id, effect = effect.as_str(), "side effect");
        }
        Ok(())
    }
}

//! The single sanctioned write into an order row.

use common::{SagaId, Version};
use domain::{Order, SagaStep};

use crate::records::{AuditEntry, WebhookRecord};

/// Field changes applied to the current row inside the guarded write.
pub type Mutation = Box<dyn FnOnce(&mut Order) + Send>;

/// A version-guarded update and everything committed with it.
///
/// The store applies the mutation, bumps the version, appends the audit
/// entries, closes the saga and records the webhook event in one atomic
/// write. If the row is no longer at `expected_version` nothing is written.
pub struct OrderUpdate {
    pub expected_version: Version,
    pub(crate) mutation: Mutation,
    pub(crate) audit: Vec<AuditEntry>,
    pub(crate) saga_completion: Option<(SagaId, SagaStep)>,
    pub(crate) webhook: Option<WebhookRecord>,
}

impl OrderUpdate {
    pub fn new(expected_version: Version, mutation: impl FnOnce(&mut Order) + Send + 'static) -> Self {
        Self {
            expected_version,
            mutation: Box::new(mutation),
            audit: Vec::new(),
            saga_completion: None,
            webhook: None,
        }
    }

    pub fn with_audit(mut self, entry: AuditEntry) -> Self {
        self.audit.push(entry);
        self
    }

    /// Appends `final_step` to the saga and marks it completed.
    pub fn completing_saga(mut self, saga_id: SagaId, final_step: SagaStep) -> Self {
        self.saga_completion = Some((saga_id, final_step));
        self
    }

    /// Records the webhook event as processed by this write.
    pub fn recording_event(mut self, record: WebhookRecord) -> Self {
        self.webhook = Some(record);
        self
    }

    pub fn audit_entries(&self) -> &[AuditEntry] {
        &self.audit
    }
}

impl std::fmt::Debug for OrderUpdate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrderUpdate")
            .field("expected_version", &self.expected_version)
            .field("audit", &self.audit)
            .field("saga_completion", &self.saga_completion)
            .field("webhook", &self.webhook.as_ref().map(|w| &w.event_id))
            .finish_non_exhaustive()
    }
}

/// Applies the mutation to a copy of `current` and returns the next row.
///
/// Identity, version and creation time are restored after the mutation so a
/// caller cannot rewrite them.
pub(crate) fn next_row(current: &Order, mutation: Mutation, now: chrono::DateTime<chrono::Utc>) -> Order {
    let mut next = current.clone();
    mutation(&mut next);
    next.id = current.id;
    next.created_at = current.created_at;
    next.version = current.version.next();
    next.updated_at = now;
    next
}

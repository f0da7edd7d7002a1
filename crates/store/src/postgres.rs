use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{OrderId, SagaId};
use domain::{
    CancellationPolicy, CollaboratorError, FeeRate, Order, PaymentSaga, PolicyStore, SagaStatus,
    ServiceType, StepRecord, StrategyKind,
};
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::records::{AuditEntry, EventOutcome, SaveResult, WebhookRecord};
use crate::store::{OrderStore, SagaStore, WebhookLedger};
use crate::update::{OrderUpdate, next_row};
use crate::{Result, StoreError};

const WEBHOOK_PK: &str = "webhook_events_pkey";

/// PostgreSQL-backed store implementation.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Creates a new PostgreSQL store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let data: serde_json::Value = row.try_get("data")?;
        Ok(serde_json::from_value(data)?)
    }

    fn row_to_saga(row: PgRow) -> Result<PaymentSaga> {
        let steps: serde_json::Value = row.try_get("steps")?;
        let strategy: String = row.try_get("strategy")?;
        let status: String = row.try_get("status")?;

        Ok(PaymentSaga {
            id: SagaId::from_uuid(row.try_get::<Uuid, _>("id")?),
            saga_type: row.try_get("saga_type")?,
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            strategy: strategy.parse::<StrategyKind>().map_err(StoreError::Corrupt)?,
            status: status.parse::<SagaStatus>().map_err(StoreError::Corrupt)?,
            steps: serde_json::from_value(steps)?,
            error: row.try_get("error")?,
            needs_reconciliation: row.try_get("needs_reconciliation")?,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }

    fn row_to_event(row: PgRow) -> Result<WebhookRecord> {
        let outcome: String = row.try_get("outcome")?;
        Ok(WebhookRecord {
            event_id: row.try_get("event_id")?,
            event_type: row.try_get("event_type")?,
            order_id: row
                .try_get::<Option<Uuid>, _>("order_id")?
                .map(OrderId::from_uuid),
            outcome: outcome.parse::<EventOutcome>().map_err(StoreError::Corrupt)?,
            payload: row.try_get("payload")?,
            processed_at: row.try_get("processed_at")?,
        })
    }

    fn row_to_audit(row: PgRow) -> Result<AuditEntry> {
        let from: String = row.try_get("from_status")?;
        let to: String = row.try_get("to_status")?;
        let actor: String = row.try_get("actor")?;
        Ok(AuditEntry {
            order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id")?),
            from: from.parse().map_err(StoreError::Corrupt)?,
            to: to.parse().map_err(StoreError::Corrupt)?,
            actor: actor.parse().map_err(StoreError::Corrupt)?,
            reason: row.try_get("reason")?,
            is_override: row.try_get("is_override")?,
            recorded_at: row.try_get("recorded_at")?,
        })
    }

    fn row_to_policy(row: PgRow) -> Result<CancellationPolicy> {
        let service_type: String = row.try_get("service_type")?;
        Ok(CancellationPolicy {
            id: row.try_get("id")?,
            version: row.try_get::<i32, _>("version")? as u32,
            service_type: service_type.parse().map_err(StoreError::Corrupt)?,
            notice_hours: row.try_get::<i32, _>("notice_hours")? as u32,
            fee_percent: FeeRate::from_bps(row.try_get::<i32, _>("fee_bps")? as u32),
            active: row.try_get("active")?,
        })
    }

    async fn insert_audit(tx: &mut Transaction<'_, Postgres>, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO order_audit_log (order_id, from_status, to_status, actor, reason, is_override, recorded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(entry.order_id.as_uuid())
        .bind(entry.from.as_str())
        .bind(entry.to.as_str())
        .bind(entry.actor.as_str())
        .bind(&entry.reason)
        .bind(entry.is_override)
        .bind(entry.recorded_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    async fn insert_event(
        tx: &mut Transaction<'_, Postgres>,
        record: &WebhookRecord,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, order_id, outcome, payload, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.order_id.map(|id| id.as_uuid()))
        .bind(record.outcome.as_str())
        .bind(&record.payload)
        .bind(record.processed_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some(WEBHOOK_PK)
            {
                return StoreError::DuplicateEvent(record.event_id.clone());
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn complete_saga(
        tx: &mut Transaction<'_, Postgres>,
        saga_id: SagaId,
        step: StepRecord,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let step = serde_json::to_value(vec![step])?;
        let result = sqlx::query(
            r#"
            UPDATE payment_sagas
            SET steps = steps || $2::jsonb, status = 'completed', completed_at = $3
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(saga_id.as_uuid())
        .bind(step)
        .bind(now)
        .execute(&mut **tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::closed_or_missing(&mut **tx, saga_id).await);
        }
        Ok(())
    }

    async fn closed_or_missing<'e, E>(executor: E, saga_id: SagaId) -> StoreError
    where
        E: sqlx::PgExecutor<'e>,
    {
        let exists: std::result::Result<Option<i32>, sqlx::Error> =
            sqlx::query_scalar("SELECT 1 FROM payment_sagas WHERE id = $1")
                .bind(saga_id.as_uuid())
                .fetch_optional(executor)
                .await;
        match exists {
            Ok(Some(_)) => StoreError::SagaClosed(saga_id),
            Ok(None) => StoreError::SagaNotFound(saga_id),
            Err(e) => StoreError::Database(e),
        }
    }
}

#[async_trait]
impl OrderStore for PostgresStore {
    async fn insert_order(&self, order: &Order) -> Result<()> {
        let data = serde_json::to_value(order)?;
        sqlx::query(
            r#"
            INSERT INTO orders (id, version, status, service_type, customer_id, scheduled_time, data, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order.id.as_uuid())
        .bind(order.version.as_i64())
        .bind(order.status.as_str())
        .bind(order.service_type.as_str())
        .bind(order.customer_id.as_uuid())
        .bind(order.scheduled_time)
        .bind(data)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("orders_pkey")
            {
                return StoreError::OrderExists(order.id);
            }
            StoreError::Database(e)
        })?;
        Ok(())
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query("SELECT data FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;
        row.map(Self::row_to_order).transpose()
    }

    async fn update_with_version(&self, id: OrderId, update: OrderUpdate) -> Result<Order> {
        let OrderUpdate {
            expected_version,
            mutation,
            audit,
            saga_completion,
            webhook,
        } = update;

        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT data FROM orders WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(StoreError::OrderNotFound(id))?;
        let current = Self::row_to_order(row)?;
        if current.version != expected_version {
            metrics::counter!("order_version_conflicts_total").increment(1);
            tracing::debug!(order_id = %id, expected = %expected_version, "version conflict");
            return Err(StoreError::Conflict {
                order_id: id,
                expected: expected_version,
            });
        }

        let now = Utc::now();
        let next = next_row(&current, mutation, now);
        let data = serde_json::to_value(&next)?;

        // The version predicate is what serializes concurrent writers.
        let result = sqlx::query(
            r#"
            UPDATE orders
            SET version = $3, status = $4, scheduled_time = $5, data = $6, updated_at = $7
            WHERE id = $1 AND version = $2
            "#,
        )
        .bind(id.as_uuid())
        .bind(expected_version.as_i64())
        .bind(next.version.as_i64())
        .bind(next.status.as_str())
        .bind(next.scheduled_time)
        .bind(data)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            metrics::counter!("order_version_conflicts_total").increment(1);
            tracing::debug!(order_id = %id, expected = %expected_version, "version conflict");
            return Err(StoreError::Conflict {
                order_id: id,
                expected: expected_version,
            });
        }

        for entry in &audit {
            Self::insert_audit(&mut tx, entry).await?;
        }
        if let Some((saga_id, step)) = saga_completion {
            let record = StepRecord {
                step,
                recorded_at: now,
            };
            Self::complete_saga(&mut tx, saga_id, record, now).await?;
        }
        if let Some(record) = &webhook {
            Self::insert_event(&mut tx, record).await?;
        }

        tx.commit().await?;
        Ok(next)
    }

    async fn delete_draft(&self, id: OrderId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM orders WHERE id = $1 AND status = 'draft'")
            .bind(id.as_uuid())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn audit_trail(&self, id: OrderId) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT order_id, from_status, to_status, actor, reason, is_override, recorded_at
            FROM order_audit_log
            WHERE order_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_audit).collect()
    }
}

#[async_trait]
impl SagaStore for PostgresStore {
    async fn create_saga(&self, saga: &PaymentSaga) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payment_sagas (id, saga_type, order_id, strategy, status, steps, error, needs_reconciliation, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(saga.id.as_uuid())
        .bind(&saga.saga_type)
        .bind(saga.order_id.as_uuid())
        .bind(saga.strategy.as_str())
        .bind(saga.status.as_str())
        .bind(serde_json::to_value(&saga.steps)?)
        .bind(&saga.error)
        .bind(saga.needs_reconciliation)
        .bind(saga.created_at)
        .bind(saga.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_step(&self, id: SagaId, step: StepRecord) -> Result<()> {
        let step = serde_json::to_value(vec![step])?;
        let result = sqlx::query(
            "UPDATE payment_sagas SET steps = steps || $2::jsonb WHERE id = $1 AND status = 'pending'",
        )
        .bind(id.as_uuid())
        .bind(step)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::closed_or_missing(&self.pool, id).await);
        }
        Ok(())
    }

    async fn fail_saga(&self, id: SagaId, error: &str, needs_reconciliation: bool) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE payment_sagas
            SET status = 'failed', error = $2, needs_reconciliation = $3, completed_at = $4
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id.as_uuid())
        .bind(error)
        .bind(needs_reconciliation)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(Self::closed_or_missing(&self.pool, id).await);
        }
        Ok(())
    }

    async fn get_saga(&self, id: SagaId) -> Result<Option<PaymentSaga>> {
        let row = sqlx::query(
            r#"
            SELECT id, saga_type, order_id, strategy, status, steps, error, needs_reconciliation, created_at, completed_at
            FROM payment_sagas
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_saga).transpose()
    }
}

#[async_trait]
impl WebhookLedger for PostgresStore {
    async fn find_event(&self, event_id: &str) -> Result<Option<WebhookRecord>> {
        let row = sqlx::query(
            r#"
            SELECT event_id, event_type, order_id, outcome, payload, processed_at
            FROM webhook_events
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(Self::row_to_event).transpose()
    }

    async fn record_event(&self, record: &WebhookRecord) -> Result<SaveResult> {
        let result = sqlx::query(
            r#"
            INSERT INTO webhook_events (event_id, event_type, order_id, outcome, payload, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (event_id) DO NOTHING
            "#,
        )
        .bind(&record.event_id)
        .bind(&record.event_type)
        .bind(record.order_id.map(|id| id.as_uuid()))
        .bind(record.outcome.as_str())
        .bind(&record.payload)
        .bind(record.processed_at)
        .execute(&self.pool)
        .await?;

        Ok(if result.rows_affected() == 0 {
            SaveResult::AlreadyExists
        } else {
            SaveResult::Inserted
        })
    }
}

#[async_trait]
impl PolicyStore for PostgresStore {
    async fn active_policy(
        &self,
        service_type: ServiceType,
    ) -> std::result::Result<Option<CancellationPolicy>, CollaboratorError> {
        let row = sqlx::query(
            r#"
            SELECT id, version, service_type, notice_hours, fee_bps, active
            FROM cancellation_policies
            WHERE service_type = $1 AND active
            "#,
        )
        .bind(service_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::from)?;

        Ok(row.map(Self::row_to_policy).transpose()?)
    }

    async fn put_policy(&self, policy: CancellationPolicy) -> std::result::Result<(), CollaboratorError> {
        let write = async {
            let mut tx = self.pool.begin().await?;
            if policy.active {
                sqlx::query(
                    "UPDATE cancellation_policies SET active = FALSE WHERE service_type = $1 AND active",
                )
                .bind(policy.service_type.as_str())
                .execute(&mut *tx)
                .await?;
            }
            sqlx::query(
                r#"
                INSERT INTO cancellation_policies (id, version, service_type, notice_hours, fee_bps, active)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (id, version) DO UPDATE
                SET service_type = EXCLUDED.service_type,
                    notice_hours = EXCLUDED.notice_hours,
                    fee_bps = EXCLUDED.fee_bps,
                    active = EXCLUDED.active
                "#,
            )
            .bind(&policy.id)
            .bind(policy.version as i32)
            .bind(policy.service_type.as_str())
            .bind(policy.notice_hours as i32)
            .bind(policy.fee_percent.bps() as i32)
            .bind(policy.active)
            .execute(&mut *tx)
            .await?;
            tx.commit().await?;
            Ok::<_, StoreError>(())
        };
        Ok(write.await?)
    }
}

use crate::store::retention_cutoff;
use crate::{OutboxError, OutboxRecord, OutboxResult, OutboxStats, OutboxStore};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use sqlx::{FromRow, PgExecutor, PgPool, Postgres, Transaction};
use std::time::Duration;
use uuid::Uuid;

const SELECT_COLUMNS: &str = r#"
    SELECT event_id, event_type, aggregate_id, aggregate_type, tenant_id, event_version,
           payload, occurred_at, correlation_id, causation_id, created_at, processed_at
    FROM events_outbox
"#;

/// Postgres-backed outbox (`events_outbox` table)
#[derive(Debug, Clone)]
pub struct PgOutboxStore {
    pool: PgPool,
}

impl PgOutboxStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Enqueue an event inside the caller's business transaction.
    ///
    /// The row only becomes visible to the processor when the caller commits;
    /// a rollback removes it together with the business change.
    pub async fn append_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        event: &DomainEvent,
    ) -> OutboxResult<()> {
        insert_event(&mut **tx, event).await
    }
}

async fn insert_event<'e, E: PgExecutor<'e>>(executor: E, event: &DomainEvent) -> OutboxResult<()> {
    event.validate().map_err(OutboxError::InvalidEvent)?;

    let version = i32::try_from(event.event_version())
        .map_err(|_| OutboxError::InvalidEvent("event_version out of range".to_string()))?;

    sqlx::query(
        r#"
        INSERT INTO events_outbox
            (event_id, event_type, aggregate_id, aggregate_type, tenant_id, event_version,
             payload, occurred_at, correlation_id, causation_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(event.event_id())
    .bind(event.event_type())
    .bind(event.aggregate_id())
    .bind(event.aggregate_type())
    .bind(event.tenant_id())
    .bind(version)
    .bind(event.payload())
    .bind(event.timestamp())
    .bind(event.correlation_id())
    .bind(event.causation_id())
    .execute(executor)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(ref db) if db.is_unique_violation() => {
            OutboxError::DuplicateKey(event.event_id())
        }
        other => OutboxError::Database(other),
    })?;

    tracing::debug!(
        event_id = %event.event_id(),
        event_type = %event.event_type(),
        "Event enqueued to outbox"
    );

    Ok(())
}

#[async_trait]
impl OutboxStore for PgOutboxStore {
    async fn append(&self, event: &DomainEvent) -> OutboxResult<()> {
        insert_event(&self.pool, event).await
    }

    async fn fetch_unprocessed(&self, limit: usize) -> OutboxResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "{SELECT_COLUMNS} WHERE processed_at IS NULL ORDER BY created_at ASC, id ASC LIMIT $1"
        ))
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn mark_processed(&self, event_id: Uuid) -> OutboxResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE events_outbox
            SET processed_at = COALESCE(processed_at, NOW())
            WHERE event_id = $1
            "#,
        )
        .bind(event_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(OutboxError::NotFound(event_id));
        }
        Ok(())
    }

    async fn purge_processed_older_than(&self, retention: Duration) -> OutboxResult<u64> {
        let cutoff = retention_cutoff(retention)?;
        let result = sqlx::query(
            r#"
            DELETE FROM events_outbox
            WHERE processed_at IS NOT NULL AND processed_at < $1
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn stats_snapshot(&self) -> OutboxResult<OutboxStats> {
        let (total, unprocessed, oldest, newest): (
            i64,
            i64,
            Option<DateTime<Utc>>,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COUNT(*) FILTER (WHERE processed_at IS NULL),
                   MIN(created_at),
                   MAX(created_at)
            FROM events_outbox
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        let total = total.max(0) as u64;
        let unprocessed = unprocessed.max(0) as u64;
        Ok(OutboxStats {
            total,
            unprocessed,
            processed: total.saturating_sub(unprocessed),
            oldest,
            newest,
        })
    }

    async fn fetch_by_aggregate(&self, aggregate_id: &str) -> OutboxResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "{SELECT_COLUMNS} WHERE aggregate_id = $1 ORDER BY created_at ASC, id ASC"
        ))
        .bind(aggregate_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }

    async fn fetch_by_type(
        &self,
        event_type: &str,
        limit: usize,
    ) -> OutboxResult<Vec<OutboxRecord>> {
        let rows = sqlx::query_as::<_, OutboxRow>(&format!(
            "{SELECT_COLUMNS} WHERE event_type = $1 ORDER BY created_at ASC, id ASC LIMIT $2"
        ))
        .bind(event_type)
        .bind(clamp_limit(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(OutboxRecord::from).collect())
    }
}

fn clamp_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

#[derive(Debug, FromRow)]
struct OutboxRow {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    aggregate_type: String,
    tenant_id: String,
    event_version: i32,
    payload: serde_json::Value,
    occurred_at: DateTime<Utc>,
    correlation_id: Option<String>,
    causation_id: Option<String>,
    created_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl From<OutboxRow> for OutboxRecord {
    fn from(row: OutboxRow) -> Self {
        let event = DomainEvent::new(
            row.event_type,
            row.aggregate_type,
            row.aggregate_id,
            row.tenant_id,
            row.payload,
        )
        .with_event_id(row.event_id)
        .with_version(u32::try_from(row.event_version).unwrap_or(1).max(1))
        .with_timestamp(row.occurred_at)
        .with_correlation_id(row.correlation_id)
        .with_causation_id(row.causation_id);

        OutboxRecord {
            event,
            created_at: row.created_at,
            processed_at: row.processed_at,
        }
    }
}

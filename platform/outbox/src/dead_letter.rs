//! Dead-letter sinks for events whose handlers keep failing.
//!
//! Only consulted when the processor is built with dead-lettering enabled.
//! Once an event is written here it is marked processed and stops being
//! retried; operators can inspect `failed_events` and replay it by hand.

use crate::{OutboxError, OutboxResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use sqlx::PgPool;
use std::sync::Mutex;

/// An event the processor gave up on
#[derive(Debug, Clone)]
pub struct DeadLetter {
    pub event: DomainEvent,
    pub handler: String,
    pub error: String,
    pub failure_count: u32,
    pub failed_at: DateTime<Utc>,
}

#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn write(&self, letter: &DeadLetter) -> OutboxResult<()>;
}

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterSink {
    letters: Mutex<Vec<DeadLetter>>,
}

impl InMemoryDeadLetterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn letters(&self) -> Vec<DeadLetter> {
        self.letters
            .lock()
            .map(|letters| letters.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterSink for InMemoryDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> OutboxResult<()> {
        self.letters
            .lock()
            .map_err(|_| OutboxError::Internal("dead-letter mutex poisoned".to_string()))?
            .push(letter.clone());
        Ok(())
    }
}

/// Writes to the `failed_events` table
#[derive(Debug, Clone)]
pub struct PgDeadLetterSink {
    pool: PgPool,
}

impl PgDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn write(&self, letter: &DeadLetter) -> OutboxResult<()> {
        let envelope_json = serde_json::to_value(&letter.event)
            .map_err(|e| OutboxError::Internal(format!("failed to serialize envelope: {}", e)))?;
        let failure_count = i32::try_from(letter.failure_count).unwrap_or(i32::MAX);

        sqlx::query(
            r#"
            INSERT INTO failed_events
                (event_id, event_type, tenant_id, envelope_json, handler, error, failure_count, failed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (event_id) DO UPDATE
            SET failure_count = EXCLUDED.failure_count,
                handler = EXCLUDED.handler,
                error = EXCLUDED.error,
                failed_at = EXCLUDED.failed_at
            "#,
        )
        .bind(letter.event.event_id())
        .bind(letter.event.event_type())
        .bind(letter.event.tenant_id())
        .bind(&envelope_json)
        .bind(&letter.handler)
        .bind(&letter.error)
        .bind(failure_count)
        .bind(letter.failed_at)
        .execute(&self.pool)
        .await?;

        tracing::error!(
            event_id = %letter.event.event_id(),
            event_type = %letter.event.event_type(),
            tenant_id = %letter.event.tenant_id(),
            handler = %letter.handler,
            failure_count = letter.failure_count,
            error = %letter.error,
            "Event moved to failed_events"
        );

        Ok(())
    }
}

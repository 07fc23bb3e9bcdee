//! # Outbox
//!
//! Transactional outbox for domain events.
//!
//! Producers append events in the same transaction as their business write
//! ([`PgOutboxStore::append_in_tx`], or [`InMemoryOutboxStore::begin`] in
//! tests). The [`OutboxProcessor`] drains unprocessed records in creation
//! order, dispatches them through the shared handler registry, and purges
//! processed records once they fall out of the retention window.

pub mod dead_letter;
mod memory_store;
mod pg_store;
mod processor;
mod record;
mod store;

pub use dead_letter::{DeadLetter, DeadLetterSink, InMemoryDeadLetterSink, PgDeadLetterSink};
pub use memory_store::{InMemoryOutboxStore, InMemoryOutboxTx};
pub use pg_store::PgOutboxStore;
pub use processor::{DrainReport, OutboxProcessor, ProcessorConfig, ProcessorStats, ReplayReport};
pub use record::{OutboxRecord, OutboxStats};
pub use store::OutboxStore;

use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum OutboxError {
    #[error("event {0} is already in the outbox")]
    DuplicateKey(Uuid),

    #[error("event {0} not found in the outbox")]
    NotFound(Uuid),

    #[error("invalid event: {0}")]
    InvalidEvent(String),

    #[error("invalid retention: {0}")]
    InvalidRetention(String),

    #[error("invalid processor config: {0}")]
    InvalidConfig(String),

    #[error("outbox processor is not running")]
    NotRunning,

    #[error("outbox processor is already running")]
    AlreadyRunning,

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type OutboxResult<T> = Result<T, OutboxError>;

/// Apply the `events_outbox` and `failed_events` migrations
pub async fn run_migrations(pool: &sqlx::PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./db/migrations").run(pool).await
}

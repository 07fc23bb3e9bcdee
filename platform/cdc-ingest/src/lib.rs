//! # CDC Ingest
//!
//! Turns row-level change records from a log-based capture stream into
//! domain events and hands them to an [`event_bus::EventPublisher`].
//!
//! ```text
//! NATS / in-memory stream ──► CdcRecord ──► CdcAdapter ──► DomainEvent ──► publisher
//! ```
//!
//! Emitted event ids are derived from `(table, id, op, ts_ms)`, so a record
//! delivered twice yields the same idempotency key both times.

mod adapter;
pub mod extract;
mod record;
mod stream;
mod worker;

pub use adapter::{CdcAdapter, CdcEntity};
pub use record::{CdcOp, CdcRecord, CdcSource, RowImage};
pub use stream::{ChangeStream, InMemoryChangeStream, NatsChangeStream, RawMessage};
pub use worker::{start_cdc_consumer, CdcConsumer, CdcConsumerStats};

#[derive(Debug, thiserror::Error)]
pub enum CdcError {
    #[error("malformed CDC record: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("CDC record has no source table")]
    MissingTable,

    #[error("'{op}' record is missing its '{image}' image")]
    MissingImage {
        op: &'static str,
        image: &'static str,
    },

    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: &'static str, reason: String },

    #[error("transport error: {0}")]
    Transport(String),
}

pub type CdcResult<T> = Result<T, CdcError>;

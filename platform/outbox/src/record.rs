use chrono::{DateTime, Utc};
use event_bus::DomainEvent;
use serde::Serialize;

/// One row of the outbox: an event plus its delivery bookkeeping
#[derive(Debug, Clone, PartialEq)]
pub struct OutboxRecord {
    pub event: DomainEvent,
    pub created_at: DateTime<Utc>,
    /// Set once, when the processor (or a replay) has handled the event
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    pub fn new(event: DomainEvent, created_at: DateTime<Utc>) -> Self {
        Self {
            event,
            created_at,
            processed_at: None,
        }
    }

    pub fn is_processed(&self) -> bool {
        self.processed_at.is_some()
    }
}

/// Point-in-time counts over the whole outbox
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub total: u64,
    pub unprocessed: u64,
    pub processed: u64,
    /// `created_at` of the oldest record still stored
    pub oldest: Option<DateTime<Utc>>,
    /// `created_at` of the newest record
    pub newest: Option<DateTime<Utc>>,
}

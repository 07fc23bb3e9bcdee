use crate::extract::{self, RowIdentity};
use crate::record::{CdcOp, CdcRecord, RowImage};
use crate::{CdcError, CdcResult};
use chrono::{DateTime, Utc};
use event_bus::{event_types, DomainEvent};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Namespace for deterministic CDC event ids
const CDC_EVENT_NAMESPACE: Uuid = Uuid::from_u128(0x5d1f_3c0a_8e2b_4a7c_9f60_1b2e_7d4c_a803);

/// Aggregate a captured table maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CdcEntity {
    Organization,
    Employee,
}

impl CdcEntity {
    fn aggregate_type(&self) -> &'static str {
        match self {
            CdcEntity::Organization => event_types::AGGREGATE_ORGANIZATION,
            CdcEntity::Employee => event_types::AGGREGATE_EMPLOYEE,
        }
    }

    fn event_type(&self, op: CdcOp) -> &'static str {
        match (self, op) {
            (CdcEntity::Organization, CdcOp::Create | CdcOp::Read) => event_types::ORGANIZATION_CREATED,
            (CdcEntity::Organization, CdcOp::Update) => event_types::ORGANIZATION_UPDATED,
            (CdcEntity::Organization, CdcOp::Delete) => event_types::ORGANIZATION_DELETED,
            (CdcEntity::Employee, CdcOp::Create | CdcOp::Read) => event_types::EMPLOYEE_CREATED,
            (CdcEntity::Employee, CdcOp::Update) => event_types::EMPLOYEE_UPDATED,
            (CdcEntity::Employee, CdcOp::Delete) => event_types::EMPLOYEE_DELETED,
        }
    }

    fn attributes(&self, image: &RowImage) -> CdcResult<(RowIdentity, Map<String, Value>)> {
        match self {
            CdcEntity::Organization => extract::organization_attributes(image),
            CdcEntity::Employee => extract::employee_attributes(image),
        }
    }
}

/// Turns change records into domain events.
///
/// - `c` / `r`: `<aggregate>.created` with the full after-image attributes
/// - `u`: `<aggregate>.updated` with `{"changed_fields": <full after-image attributes>}`
/// - `d`: `<aggregate>.deleted` with the identity taken from the before-image
///
/// Records with an unknown op or from an unrouted table produce no event.
#[derive(Debug, Clone)]
pub struct CdcAdapter {
    tables: HashMap<String, CdcEntity>,
}

impl Default for CdcAdapter {
    fn default() -> Self {
        Self::new()
            .with_table("organization_units", CdcEntity::Organization)
            .with_table("employees", CdcEntity::Employee)
    }
}

impl CdcAdapter {
    /// Adapter with no table routes
    pub fn new() -> Self {
        Self {
            tables: HashMap::new(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>, entity: CdcEntity) -> Self {
        self.tables.insert(table.into(), entity);
        self
    }

    pub fn entity_for(&self, table: &str) -> Option<CdcEntity> {
        self.tables.get(table).copied()
    }

    pub fn adapt(&self, record: &CdcRecord) -> CdcResult<Option<DomainEvent>> {
        let Some(op) = record.op() else {
            tracing::warn!(op = %record.op, "Unknown CDC operation, record dropped");
            return Ok(None);
        };

        let Some(table) = record.table() else {
            return Err(CdcError::MissingTable);
        };

        let Some(entity) = self.entity_for(table) else {
            tracing::warn!(table, "CDC record from unrouted table dropped");
            return Ok(None);
        };

        let (identity, payload) = match op {
            CdcOp::Create | CdcOp::Read => {
                let after = record
                    .after
                    .as_ref()
                    .ok_or(CdcError::MissingImage { op: op.as_str(), image: "after" })?;
                let (identity, attributes) = entity.attributes(after)?;
                (identity, Value::Object(attributes))
            }
            CdcOp::Update => {
                let after = record
                    .after
                    .as_ref()
                    .ok_or(CdcError::MissingImage { op: op.as_str(), image: "after" })?;
                let (identity, attributes) = entity.attributes(after)?;
                (identity, json!({ "changed_fields": attributes }))
            }
            CdcOp::Delete => {
                let before = record
                    .before
                    .as_ref()
                    .ok_or(CdcError::MissingImage { op: op.as_str(), image: "before" })?;
                let identity = extract::identity(before)?;
                (
                    identity,
                    json!({
                        "id": identity.id.to_string(),
                        "tenant_id": identity.tenant_id.to_string(),
                    }),
                )
            }
        };

        let event_id = Uuid::new_v5(
            &CDC_EVENT_NAMESPACE,
            format!("{}:{}:{}:{}", table, identity.id, op.as_str(), record.ts_ms).as_bytes(),
        );
        let occurred_at = DateTime::<Utc>::from_timestamp_millis(record.ts_ms)
            .filter(|_| record.ts_ms > 0)
            .unwrap_or_else(Utc::now);

        let event = DomainEvent::new(
            entity.event_type(op),
            entity.aggregate_type(),
            identity.id.to_string(),
            identity.tenant_id.to_string(),
            payload,
        )
        .with_event_id(event_id)
        .with_timestamp(occurred_at)
        .with_causation_id(Some(format!("cdc:{}:{}", table, record.ts_ms)));

        tracing::debug!(
            event_id = %event.event_id(),
            event_type = %event.event_type(),
            aggregate_id = %event.aggregate_id(),
            "CDC record adapted"
        );

        Ok(Some(event))
    }
}

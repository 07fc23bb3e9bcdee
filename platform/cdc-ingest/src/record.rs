//! Debezium-style change records

use crate::{CdcError, CdcResult};
use serde::Deserialize;
use serde_json::{Map, Value};

/// A row image: column name → value
pub type RowImage = Map<String, Value>;

/// Where a change came from
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CdcSource {
    #[serde(default)]
    pub db: Option<String>,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
}

/// One row-level change as delivered by the capture stream
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CdcRecord {
    #[serde(default)]
    pub before: Option<RowImage>,
    #[serde(default)]
    pub after: Option<RowImage>,
    pub op: String,
    #[serde(default)]
    pub source: CdcSource,
    #[serde(default)]
    pub ts_ms: i64,
}

impl CdcRecord {
    /// Parse a record from raw message bytes.
    ///
    /// Accepts both the bare change record and the schema-wrapped form
    /// (`{"schema": .., "payload": {..}}`) emitted when converters include schemas.
    pub fn from_slice(bytes: &[u8]) -> CdcResult<Self> {
        let value: Value = serde_json::from_slice(bytes)?;
        let inner = match value.get("payload") {
            Some(payload) if payload.get("op").is_some() => payload.clone(),
            _ => value,
        };
        serde_json::from_value(inner).map_err(CdcError::from)
    }

    pub fn op(&self) -> Option<CdcOp> {
        CdcOp::parse(&self.op)
    }

    pub fn table(&self) -> Option<&str> {
        self.source.table.as_deref()
    }
}

/// Operation tag of a change record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CdcOp {
    Create,
    Update,
    Delete,
    /// Initial snapshot read, treated as a create
    Read,
}

impl CdcOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "c" => Some(CdcOp::Create),
            "u" => Some(CdcOp::Update),
            "d" => Some(CdcOp::Delete),
            "r" => Some(CdcOp::Read),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CdcOp::Create => "c",
            CdcOp::Update => "u",
            CdcOp::Delete => "d",
            CdcOp::Read => "r",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_bare_record() {
        let bytes = serde_json::to_vec(&json!({
            "before": null,
            "after": { "id": "a", "tenant_id": "b" },
            "op": "c",
            "source": { "db": "organization_db", "schema": "public", "table": "organization_units" },
            "ts_ms": 1700000000000_i64
        }))
        .unwrap();

        let record = CdcRecord::from_slice(&bytes).unwrap();
        assert_eq!(record.op(), Some(CdcOp::Create));
        assert_eq!(record.table(), Some("organization_units"));
        assert!(record.before.is_none());
        assert_eq!(record.ts_ms, 1700000000000);
    }

    #[test]
    fn test_parse_schema_wrapped_record() {
        let bytes = serde_json::to_vec(&json!({
            "schema": { "type": "struct" },
            "payload": {
                "before": { "id": "a", "tenant_id": "b" },
                "op": "d",
                "source": { "table": "employees" },
                "ts_ms": 5
            }
        }))
        .unwrap();

        let record = CdcRecord::from_slice(&bytes).unwrap();
        assert_eq!(record.op(), Some(CdcOp::Delete));
        assert!(record.after.is_none());
        assert_eq!(record.table(), Some("employees"));
    }

    #[test]
    fn test_unknown_op_and_garbage() {
        let record = CdcRecord::from_slice(br#"{"op":"t"}"#).unwrap();
        assert_eq!(record.op(), None);

        assert!(matches!(
            CdcRecord::from_slice(b"not json"),
            Err(CdcError::Malformed(_))
        ));
    }
}

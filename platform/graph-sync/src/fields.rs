//! Payload field selection shared by the consumers

use crate::graph::Properties;
use crate::outcome::{SyncError, SyncResult};
use event_bus::DomainEvent;
use serde_json::{Map, Value};

pub(crate) const STATUS_ACTIVE: &str = "ACTIVE";
pub(crate) const STATUS_INACTIVE: &str = "INACTIVE";

pub(crate) fn payload_object(event: &DomainEvent) -> SyncResult<&Map<String, Value>> {
    event.payload().as_object().ok_or_else(|| {
        SyncError::InvalidPayload(format!(
            "{} payload must be a JSON object",
            event.event_type()
        ))
    })
}

/// The change set of an update event. Producers that send the changed
/// attributes at the top level instead of under `changed_fields` are accepted.
pub(crate) fn changed_fields(event: &DomainEvent) -> SyncResult<&Map<String, Value>> {
    let payload = payload_object(event)?;
    match payload.get("changed_fields") {
        None => Ok(payload),
        Some(Value::Object(changes)) => Ok(changes),
        Some(other) => Err(SyncError::InvalidPayload(format!(
            "changed_fields must be an object, got {other}"
        ))),
    }
}

/// Copy the recognized attributes out of `source`
pub(crate) fn pick(source: &Map<String, Value>, recognized: &[&str]) -> Properties {
    recognized
        .iter()
        .filter_map(|field| {
            source
                .get(*field)
                .map(|value| (field.to_string(), value.clone()))
        })
        .collect()
}

/// Parent reference carried by a payload.
///
/// `None`: the payload says nothing about the parent.
/// `Some(None)`: the parent was explicitly cleared (null or empty string).
/// `Some(Some(id))`: the parent to link to.
pub(crate) fn parent_reference(
    source: &Map<String, Value>,
    field: &str,
) -> SyncResult<Option<Option<String>>> {
    match source.get(field) {
        None => Ok(None),
        Some(Value::Null) => Ok(Some(None)),
        Some(Value::String(id)) if id.is_empty() => Ok(Some(None)),
        Some(Value::String(id)) => Ok(Some(Some(id.clone()))),
        Some(other) => Err(SyncError::InvalidPayload(format!(
            "{field} must be a string, got {other}"
        ))),
    }
}

/// Event bookkeeping written alongside every node change
pub(crate) fn event_stamp(event: &DomainEvent, source: &Map<String, Value>) -> Properties {
    let mut stamp = Properties::new();
    stamp.insert(
        "last_event_id".into(),
        Value::String(event.event_id().to_string()),
    );
    stamp.insert("event_version".into(), Value::from(event.event_version()));
    let updated_at = source
        .get("updated_at")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| event.timestamp().to_rfc3339());
    stamp.insert("updated_at".into(), Value::String(updated_at));
    stamp
}

pub(crate) fn activity(active: bool) -> Properties {
    let mut props = Properties::new();
    let status = if active { STATUS_ACTIVE } else { STATUS_INACTIVE };
    props.insert("status".into(), Value::String(status.to_string()));
    props.insert("is_active".into(), Value::Bool(active));
    props
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(payload: Value) -> DomainEvent {
        DomainEvent::new("organization.updated", "organization", "org-1", "t1", payload)
    }

    #[test]
    fn test_changed_fields_fallback_to_payload() {
        let nested = event(json!({ "changed_fields": { "name": "A" } }));
        assert_eq!(changed_fields(&nested).unwrap()["name"], json!("A"));

        let flat = event(json!({ "name": "B" }));
        assert_eq!(changed_fields(&flat).unwrap()["name"], json!("B"));

        let bad = event(json!({ "changed_fields": [1, 2] }));
        assert!(matches!(changed_fields(&bad), Err(SyncError::InvalidPayload(_))));

        let not_object = event(json!("oops"));
        assert!(matches!(payload_object(&not_object), Err(SyncError::InvalidPayload(_))));
    }

    #[test]
    fn test_pick_ignores_unrecognized() {
        let source = json!({ "name": "A", "secret": 1, "level": 2 });
        let picked = pick(source.as_object().unwrap(), &["name", "level", "status"]);
        assert_eq!(Value::Object(picked), json!({ "name": "A", "level": 2 }));
    }

    #[test]
    fn test_parent_reference_states() {
        let map = |v: Value| v.as_object().cloned().unwrap();
        let field = "parent_unit_id";

        assert_eq!(parent_reference(&map(json!({})), field).unwrap(), None);
        assert_eq!(
            parent_reference(&map(json!({ "parent_unit_id": null })), field).unwrap(),
            Some(None)
        );
        assert_eq!(
            parent_reference(&map(json!({ "parent_unit_id": "" })), field).unwrap(),
            Some(None)
        );
        assert_eq!(
            parent_reference(&map(json!({ "parent_unit_id": "org-p" })), field).unwrap(),
            Some(Some("org-p".to_string()))
        );
        assert!(parent_reference(&map(json!({ "parent_unit_id": 7 })), field).is_err());
    }

    #[test]
    fn test_event_stamp_prefers_payload_timestamp() {
        let e = event(json!({}));
        let source = json!({ "updated_at": "2024-05-01T00:00:00+00:00" });
        let stamp = event_stamp(&e, source.as_object().unwrap());
        assert_eq!(stamp["updated_at"], json!("2024-05-01T00:00:00+00:00"));
        assert_eq!(stamp["last_event_id"], json!(e.event_id().to_string()));
        assert_eq!(stamp["event_version"], json!(1));

        let stamp = event_stamp(&e, &Map::new());
        assert_eq!(stamp["updated_at"], json!(e.timestamp().to_rfc3339()));
    }
}

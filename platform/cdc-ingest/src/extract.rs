//! Attribute extraction from row images.
//!
//! Identity columns (`id`, `tenant_id`) are mandatory and must be UUIDs; a
//! record without them is rejected. Every other column is optional and falls
//! back to a default.

use crate::record::RowImage;
use crate::{CdcError, CdcResult};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use uuid::Uuid;

pub const STATUS_ACTIVE: &str = "ACTIVE";
pub const STATUS_INACTIVE: &str = "INACTIVE";

/// Primary key of a captured row
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowIdentity {
    pub id: Uuid,
    pub tenant_id: Uuid,
}

pub fn identity(image: &RowImage) -> CdcResult<RowIdentity> {
    Ok(RowIdentity {
        id: required_uuid(image, "id")?,
        tenant_id: required_uuid(image, "tenant_id")?,
    })
}

fn required_uuid(image: &RowImage, field: &'static str) -> CdcResult<Uuid> {
    let raw = match image.get(field) {
        None | Some(Value::Null) => return Err(CdcError::MissingField(field)),
        Some(Value::String(s)) => s,
        Some(other) => {
            return Err(CdcError::InvalidField {
                field,
                reason: format!("expected a UUID string, got {}", other),
            })
        }
    };

    Uuid::parse_str(raw).map_err(|e| CdcError::InvalidField {
        field,
        reason: e.to_string(),
    })
}

fn string_or_default(image: &RowImage, field: &str) -> String {
    image
        .get(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn non_empty_string(image: &RowImage, field: &str) -> Option<String> {
    image
        .get(field)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// RFC 3339 timestamp column, or now when absent or unparsable
fn timestamp_or_now(image: &RowImage, field: &str) -> String {
    image
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
        .to_rfc3339()
}

/// Active flag (default true) and status (explicit, else derived from the flag)
fn activity(image: &RowImage) -> (bool, String) {
    let is_active = image.get("is_active").and_then(Value::as_bool);
    let status = non_empty_string(image, "status").unwrap_or_else(|| {
        match is_active {
            Some(false) => STATUS_INACTIVE,
            _ => STATUS_ACTIVE,
        }
        .to_string()
    });
    (is_active.unwrap_or(true), status)
}

/// Reference column to another row. Present-but-empty or unparsable values
/// become an explicit null so downstream can clear the relation; an absent
/// column stays absent.
fn reference(image: &RowImage, field: &str, attributes: &mut Map<String, Value>) {
    if !image.contains_key(field) {
        return;
    }
    let value = image
        .get(field)
        .and_then(Value::as_str)
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|id| Value::String(id.to_string()))
        .unwrap_or(Value::Null);
    attributes.insert(field.to_string(), value);
}

fn base_attributes(identity: &RowIdentity, image: &RowImage) -> Map<String, Value> {
    let (is_active, status) = activity(image);
    let mut attributes = Map::new();
    attributes.insert("id".into(), Value::String(identity.id.to_string()));
    attributes.insert(
        "tenant_id".into(),
        Value::String(identity.tenant_id.to_string()),
    );
    attributes.insert("status".into(), Value::String(status));
    attributes.insert("is_active".into(), Value::Bool(is_active));
    attributes.insert(
        "created_at".into(),
        Value::String(timestamp_or_now(image, "created_at")),
    );
    attributes.insert(
        "updated_at".into(),
        Value::String(timestamp_or_now(image, "updated_at")),
    );
    attributes
}

/// Attributes of an `organization_units` row
pub fn organization_attributes(image: &RowImage) -> CdcResult<(RowIdentity, Map<String, Value>)> {
    let identity = identity(image)?;
    let mut attributes = base_attributes(&identity, image);

    attributes.insert("name".into(), Value::String(string_or_default(image, "name")));
    attributes.insert(
        "unit_type".into(),
        Value::String(string_or_default(image, "unit_type")),
    );
    if let Some(description) = non_empty_string(image, "description") {
        attributes.insert("description".into(), Value::String(description));
    }
    if let Some(level) = image.get("level").and_then(Value::as_i64) {
        attributes.insert("level".into(), Value::from(level));
    }
    if let Some(profile) = image.get("profile").filter(|p| !p.is_null()) {
        attributes.insert("profile".into(), profile.clone());
    }
    reference(image, "parent_unit_id", &mut attributes);

    Ok((identity, attributes))
}

/// Attributes of an `employees` row
pub fn employee_attributes(image: &RowImage) -> CdcResult<(RowIdentity, Map<String, Value>)> {
    let identity = identity(image)?;
    let mut attributes = base_attributes(&identity, image);

    for field in ["employee_number", "first_name", "last_name", "email"] {
        attributes.insert(field.into(), Value::String(string_or_default(image, field)));
    }
    for field in ["phone", "position", "hire_date"] {
        if let Some(value) = non_empty_string(image, field) {
            attributes.insert(field.into(), Value::String(value));
        }
    }
    reference(image, "organization_id", &mut attributes);

    Ok((identity, attributes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn image(value: Value) -> RowImage {
        value.as_object().cloned().unwrap()
    }

    const ORG: &str = "7b0d6a3e-1c52-4d0e-9a44-0b7f2a1e9c01";
    const TENANT: &str = "3c1f9e2a-5b7d-4f10-8e21-6a9c0d4b2f77";

    #[test]
    fn test_missing_identity_rejected() {
        let err = identity(&image(json!({ "tenant_id": TENANT }))).unwrap_err();
        assert!(matches!(err, CdcError::MissingField("id")));

        let err = identity(&image(json!({ "id": ORG, "tenant_id": null }))).unwrap_err();
        assert!(matches!(err, CdcError::MissingField("tenant_id")));
    }

    #[test]
    fn test_unparsable_identity_rejected() {
        let err = identity(&image(json!({ "id": "not-a-uuid", "tenant_id": TENANT }))).unwrap_err();
        assert!(matches!(err, CdcError::InvalidField { field: "id", .. }));

        let err = identity(&image(json!({ "id": ORG, "tenant_id": 42 }))).unwrap_err();
        assert!(matches!(err, CdcError::InvalidField { field: "tenant_id", .. }));
    }

    #[test]
    fn test_organization_defaults() {
        let (id, attrs) =
            organization_attributes(&image(json!({ "id": ORG, "tenant_id": TENANT }))).unwrap();

        assert_eq!(id.id.to_string(), ORG);
        assert_eq!(attrs["is_active"], json!(true));
        assert_eq!(attrs["status"], json!("ACTIVE"));
        assert_eq!(attrs["name"], json!(""));
        assert!(attrs.get("parent_unit_id").is_none());
        assert!(DateTime::parse_from_rfc3339(attrs["created_at"].as_str().unwrap()).is_ok());
    }

    #[test]
    fn test_status_derived_from_active_flag() {
        let (_, attrs) = organization_attributes(&image(json!({
            "id": ORG, "tenant_id": TENANT, "is_active": false
        })))
        .unwrap();
        assert_eq!(attrs["status"], json!("INACTIVE"));

        let (_, attrs) = organization_attributes(&image(json!({
            "id": ORG, "tenant_id": TENANT, "is_active": false, "status": "PLANNED"
        })))
        .unwrap();
        assert_eq!(attrs["status"], json!("PLANNED"));
    }

    #[test]
    fn test_parent_reference_cleared_when_null() {
        let (_, attrs) = organization_attributes(&image(json!({
            "id": ORG, "tenant_id": TENANT, "parent_unit_id": null, "level": 2,
            "created_at": "2024-03-01T10:00:00Z"
        })))
        .unwrap();

        assert_eq!(attrs["parent_unit_id"], Value::Null);
        assert_eq!(attrs["level"], json!(2));
        assert_eq!(attrs["created_at"], json!("2024-03-01T10:00:00+00:00"));
    }

    #[test]
    fn test_employee_attributes() {
        let (_, attrs) = employee_attributes(&image(json!({
            "id": ORG,
            "tenant_id": TENANT,
            "first_name": "Ada",
            "last_name": "Lovelace",
            "phone": "",
            "organization_id": TENANT
        })))
        .unwrap();

        assert_eq!(attrs["first_name"], json!("Ada"));
        assert_eq!(attrs["employee_number"], json!(""));
        assert!(attrs.get("phone").is_none());
        assert_eq!(attrs["organization_id"], json!(TENANT));
    }
}

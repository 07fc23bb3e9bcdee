//! # Domain Event
//!
//! Immutable, versioned envelope describing one state change of one aggregate.
//!
//! ## Envelope Fields
//!
//! - `event_id`: Globally unique identifier, used downstream as the idempotency key
//! - `event_type`: `<aggregate>.<verb>` tag (e.g. `organization.created`)
//! - `aggregate_id` / `aggregate_type`: The entity instance the event describes
//! - `tenant_id`: Multi-tenant isolation
//! - `event_version`: Schema revision of this event type, starts at 1
//! - `payload`: Event-specific data
//! - `timestamp`: When the change happened
//! - `correlation_id` / `causation_id`: Optional tracing links
//!
//! Fields are only reachable through getters; once built, an event cannot change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Standard domain event envelope.
///
/// # Examples
///
/// ```rust
/// use event_bus::{event_types, DomainEvent};
/// use serde_json::json;
///
/// let event = DomainEvent::new(
///     event_types::ORGANIZATION_CREATED,
///     "organization",
///     "3f1c2a4e-0000-0000-0000-000000000001",
///     "tenant-123",
///     json!({ "name": "Engineering" }),
/// )
/// .with_correlation_id(Some("corr-456".to_string()));
///
/// assert_eq!(event.event_version(), 1);
/// assert!(event.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    event_id: Uuid,
    event_type: String,
    aggregate_id: String,
    aggregate_type: String,
    tenant_id: String,
    event_version: u32,
    payload: serde_json::Value,
    timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    correlation_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    causation_id: Option<String>,
}

impl DomainEvent {
    /// Create a new event with a fresh `event_id`, version 1, and the current time.
    pub fn new(
        event_type: impl Into<String>,
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        tenant_id: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            event_type: event_type.into(),
            aggregate_id: aggregate_id.into(),
            aggregate_type: aggregate_type.into(),
            tenant_id: tenant_id.into(),
            event_version: 1,
            payload,
            timestamp: Utc::now(),
            correlation_id: None,
            causation_id: None,
        }
    }

    /// Set an explicit event_id (deterministic producers, tests)
    pub fn with_event_id(mut self, event_id: Uuid) -> Self {
        self.event_id = event_id;
        self
    }

    /// Set the schema revision of this event type
    pub fn with_version(mut self, event_version: u32) -> Self {
        self.event_version = event_version;
        self
    }

    /// Set the time the change happened
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the correlation ID
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Set the causation ID
    pub fn with_causation_id(mut self, causation_id: Option<String>) -> Self {
        self.causation_id = causation_id;
        self
    }

    pub fn event_id(&self) -> Uuid {
        self.event_id
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn aggregate_id(&self) -> &str {
        &self.aggregate_id
    }

    pub fn aggregate_type(&self) -> &str {
        &self.aggregate_type
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn event_version(&self) -> u32 {
        self.event_version
    }

    pub fn payload(&self) -> &serde_json::Value {
        &self.payload
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    pub fn causation_id(&self) -> Option<&str> {
        self.causation_id.as_deref()
    }

    /// Aggregate prefix of the event type (`organization` for `organization.created`)
    pub fn aggregate_prefix(&self) -> &str {
        self.event_type
            .split_once('.')
            .map(|(aggregate, _)| aggregate)
            .unwrap_or(&self.event_type)
    }

    /// Deserialize the payload into an event-specific type
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.payload)
    }

    /// Validate the envelope
    ///
    /// # Validation Rules
    ///
    /// - `event_type`: non-empty, shaped as `<aggregate>.<verb>`
    /// - `aggregate_id`: non-empty
    /// - `tenant_id`: non-empty
    /// - `event_version`: at least 1
    pub fn validate(&self) -> Result<(), String> {
        match self.event_type.split_once('.') {
            Some((aggregate, verb)) if !aggregate.is_empty() && !verb.is_empty() => {}
            _ => {
                return Err(format!(
                    "event_type '{}' must have the form <aggregate>.<verb>",
                    self.event_type
                ))
            }
        }

        if self.aggregate_id.is_empty() {
            return Err("aggregate_id cannot be empty".to_string());
        }

        if self.tenant_id.is_empty() {
            return Err("tenant_id cannot be empty".to_string());
        }

        if self.event_version == 0 {
            return Err("event_version must start at 1".to_string());
        }

        Ok(())
    }
}

/// Validate a serialized event envelope before deserializing it
///
/// Used at transport boundaries where the payload is raw JSON.
pub fn validate_envelope_fields(envelope: &serde_json::Value) -> Result<(), String> {
    let event_id = envelope
        .get("event_id")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid event_id")?;

    Uuid::parse_str(event_id).map_err(|e| format!("event_id is not a UUID: {}", e))?;

    envelope
        .get("timestamp")
        .and_then(|v| v.as_str())
        .ok_or("Missing or invalid timestamp")?;

    for field in ["event_type", "aggregate_id", "aggregate_type", "tenant_id"] {
        let value = envelope
            .get(field)
            .and_then(|v| v.as_str())
            .ok_or_else(|| format!("Missing or invalid {}", field))?;

        if value.is_empty() {
            return Err(format!("{} cannot be empty", field));
        }
    }

    // correlation_id and causation_id are optional
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> DomainEvent {
        DomainEvent::new(
            "organization.created",
            "organization",
            "org-1",
            "tenant-123",
            json!({"name": "Engineering"}),
        )
    }

    #[test]
    fn test_event_creation() {
        let event = sample();

        assert_eq!(event.tenant_id(), "tenant-123");
        assert_eq!(event.aggregate_prefix(), "organization");
        assert_eq!(event.event_version(), 1);
        assert!(event.correlation_id().is_none());
        assert!(event.causation_id().is_none());
    }

    #[test]
    fn test_event_with_builder() {
        let id = Uuid::new_v4();
        let event = sample()
            .with_event_id(id)
            .with_version(3)
            .with_correlation_id(Some("corr-456".to_string()))
            .with_causation_id(Some("cause-789".to_string()));

        assert_eq!(event.event_id(), id);
        assert_eq!(event.event_version(), 3);
        assert_eq!(event.correlation_id(), Some("corr-456"));
        assert_eq!(event.causation_id(), Some("cause-789"));
    }

    #[test]
    fn test_validate_rejects_bad_fields() {
        assert!(sample().validate().is_ok());

        let no_verb = DomainEvent::new("organization", "organization", "o", "t", json!({}));
        assert!(no_verb.validate().is_err());

        let no_tenant = DomainEvent::new("organization.created", "organization", "o", "", json!({}));
        assert!(no_tenant.validate().is_err());

        let v0 = sample().with_version(0);
        assert!(v0.validate().is_err());
    }

    #[test]
    fn test_serialized_envelope_passes_field_validation() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(validate_envelope_fields(&value).is_ok());

        let back: DomainEvent = serde_json::from_value(value).unwrap();
        assert_eq!(back.event_type(), "organization.created");
    }

    #[test]
    fn test_validate_envelope_fields_missing_tenant_id() {
        let envelope = json!({
            "event_id": "550e8400-e29b-41d4-a716-446655440000",
            "timestamp": "2024-01-01T00:00:00Z",
            "event_type": "employee.created",
            "aggregate_id": "emp-1",
            "aggregate_type": "employee"
        });

        assert!(validate_envelope_fields(&envelope).is_err());
    }
}

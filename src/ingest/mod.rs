//! Event ingestion -- canonical record validation and normalization.

pub mod jsonl;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("field '{field}' is empty")]
    EmptyField { field: &'static str },
    #[error("context must be a JSON object, got {found}")]
    BadContext { found: String },
}

/// Canonical wire-format event record, as accepted on ingestion.
///
/// `id` may be omitted; a fresh UUID is assigned during normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    #[serde(default)]
    pub id: Option<Uuid>,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub entity_id: String,
    pub action: String,
    #[serde(default)]
    pub context: Option<serde_json::Value>,
}

/// A validated, normalized event. Immutable once recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor_id: String,
    pub entity_id: String,
    pub action: String,
    pub context: Option<serde_json::Value>,
}

impl Event {
    /// Seller reference for state derivation: `context.seller_id` when the
    /// producer supplied one, otherwise the entity itself.
    pub fn seller_id(&self) -> &str {
        self.context
            .as_ref()
            .and_then(|c| c.get("seller_id"))
            .and_then(|s| s.as_str())
            .unwrap_or(&self.entity_id)
    }
}

/// Validate and normalize a raw record into an [`Event`].
///
/// Identifier fields are trimmed, the action label is lowercased, and an
/// event id is assigned if the producer did not send one.
pub fn normalize(record: EventRecord) -> Result<Event, IngestError> {
    let actor_id = record.actor_id.trim().to_string();
    if actor_id.is_empty() {
        return Err(IngestError::EmptyField { field: "actor_id" });
    }

    let entity_id = record.entity_id.trim().to_string();
    if entity_id.is_empty() {
        return Err(IngestError::EmptyField { field: "entity_id" });
    }

    let action = record.action.trim().to_lowercase();
    if action.is_empty() {
        return Err(IngestError::EmptyField { field: "action" });
    }

    let context = match record.context {
        Some(serde_json::Value::Null) | None => None,
        Some(v @ serde_json::Value::Object(_)) => Some(v),
        Some(other) => {
            let found = match other {
                serde_json::Value::Array(_) => "array",
                serde_json::Value::String(_) => "string",
                serde_json::Value::Number(_) => "number",
                serde_json::Value::Bool(_) => "boolean",
                _ => "unknown",
            };
            return Err(IngestError::BadContext {
                found: found.to_string(),
            });
        }
    };

    Ok(Event {
        id: record.id.unwrap_or_else(Uuid::new_v4),
        timestamp: record.timestamp,
        actor_id,
        entity_id,
        action,
        context,
    })
}

/// A pull-based source of raw event records (file, stdin, ...).
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Pull up to `max` raw records. `None` signals exhaustion.
    async fn next_batch(&mut self, max: usize) -> Result<Option<Vec<EventRecord>>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(actor: &str, entity: &str, action: &str) -> EventRecord {
        EventRecord {
            id: None,
            timestamp: Utc::now(),
            actor_id: actor.to_string(),
            entity_id: entity.to_string(),
            action: action.to_string(),
            context: None,
        }
    }

    #[test]
    fn test_normalize_trims_and_lowercases() {
        let event = normalize(raw(" alice ", "listing-1", " BID ")).unwrap();
        assert_eq!(event.actor_id, "alice");
        assert_eq!(event.entity_id, "listing-1");
        assert_eq!(event.action, "bid");
    }

    #[test]
    fn test_normalize_rejects_empty_actor() {
        let err = normalize(raw("   ", "listing-1", "bid")).unwrap_err();
        assert!(matches!(err, IngestError::EmptyField { field: "actor_id" }));
    }

    #[test]
    fn test_normalize_rejects_non_object_context() {
        let mut record = raw("alice", "listing-1", "bid");
        record.context = Some(serde_json::json!([1, 2, 3]));
        let err = normalize(record).unwrap_err();
        assert!(matches!(err, IngestError::BadContext { .. }));
    }

    #[test]
    fn test_normalize_assigns_id_when_missing() {
        let a = normalize(raw("alice", "listing-1", "bid")).unwrap();
        let b = normalize(raw("alice", "listing-1", "bid")).unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_seller_id_falls_back_to_entity() {
        let mut record = raw("alice", "listing-1", "bid");
        record.context = Some(serde_json::json!({ "seller_id": "bob" }));
        let event = normalize(record).unwrap();
        assert_eq!(event.seller_id(), "bob");

        let plain = normalize(raw("alice", "listing-1", "bid")).unwrap();
        assert_eq!(plain.seller_id(), "listing-1");
    }
}

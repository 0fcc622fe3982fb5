//! Source lifecycle events published by the system of record.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What happened to a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceEventKind {
    Created {
        name: String,
        url: String,
    },
    Updated {
        changed_fields: Vec<String>,
    },
    Deleted {
        reason: Option<String>,
    },
    Enabled {
        actor: Option<String>,
        reason: Option<String>,
    },
    Disabled {
        actor: Option<String>,
        reason: Option<String>,
    },
}

impl SourceEventKind {
    pub fn name(&self) -> &'static str {
        match self {
            SourceEventKind::Created { .. } => "created",
            SourceEventKind::Updated { .. } => "updated",
            SourceEventKind::Deleted { .. } => "deleted",
            SourceEventKind::Enabled { .. } => "enabled",
            SourceEventKind::Disabled { .. } => "disabled",
        }
    }
}

/// The event envelope as it travels through the log.
///
/// `event_id` is the idempotency key: redelivery and reclamation can hand
/// the same envelope to a handler more than once, and handlers dedupe on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceEvent {
    pub event_id: String,
    pub source_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: SourceEventKind,
}

impl SourceEvent {
    pub fn new(source_id: Uuid, kind: SourceEventKind) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            source_id,
            occurred_at: Utc::now(),
            kind,
        }
    }

    pub fn encode(&self) -> Result<Bytes, serde_json::Error> {
        Ok(Bytes::from(serde_json::to_vec(self)?))
    }

    pub fn decode(payload: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_round_trips_through_json() {
        let event = SourceEvent::new(
            Uuid::new_v4(),
            SourceEventKind::Disabled {
                actor: Some("admin".to_string()),
                reason: Some("site retired".to_string()),
            },
        );

        let bytes = event.encode().unwrap();
        let decoded = SourceEvent::decode(&bytes).unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn kind_tag_is_snake_case() {
        let event = SourceEvent::new(
            Uuid::new_v4(),
            SourceEventKind::Created {
                name: "Food shelf".to_string(),
                url: "https://example.org".to_string(),
            },
        );
        let json: serde_json::Value =
            serde_json::from_slice(&event.encode().unwrap()).unwrap();
        assert_eq!(json["type"], "created");
        assert_eq!(json["name"], "Food shelf");
    }

    #[test]
    fn decode_rejects_malformed_payloads() {
        assert!(SourceEvent::decode(b"not json").is_err());
        assert!(SourceEvent::decode(br#"{"type":"created"}"#).is_err());
    }
}

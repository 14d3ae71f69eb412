//! Wire messages exchanged with the renderer (UI) process.
//!
//! Outbound messages are tagged by `kind`. Replies to a data request carry
//! the kind `data-response:<source>` and either the data or `{ "error": .. }`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Prefix of the reply kind for a legacy data request
pub const DATA_RESPONSE_PREFIX: &str = "data-response:";

/// Messages the storage engine sends to the renderer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum RendererMessage {
    /// Ask the renderer for the contents of one legacy collection
    #[serde(rename = "request-data")]
    RequestData { source: String },

    /// Legacy data now lives in the relational store; the UI may offer a restart
    #[serde(rename = "legacy-migration-complete", rename_all = "camelCase")]
    LegacyMigrationComplete {
        user_id: i64,
        record_counts: BTreeMap<String, i64>,
    },
}

impl RendererMessage {
    /// Get a short description of the message for logging.
    pub fn description(&self) -> String {
        match self {
            RendererMessage::RequestData { source } => {
                format!("Request legacy data '{}'", source)
            }
            RendererMessage::LegacyMigrationComplete {
                user_id,
                record_counts,
            } => {
                let total: i64 = record_counts.values().sum();
                format!(
                    "Legacy migration complete for user {} ({} records)",
                    user_id, total
                )
            }
        }
    }
}

/// Reply from the renderer to a [`RendererMessage::RequestData`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataResponse {
    pub kind: String,
    #[serde(default)]
    pub payload: Value,
}

impl DataResponse {
    pub fn new(source: &str, payload: Value) -> Self {
        Self {
            kind: response_kind(source),
            payload,
        }
    }

    /// Reply carrying the renderer-side error marker
    pub fn error(source: &str, message: impl Into<String>) -> Self {
        Self::new(source, serde_json::json!({ "error": message.into() }))
    }

    /// Parse a raw JSON reply as received over the channel
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        serde_json::from_str(raw)
    }

    /// Source named by the reply kind, if the kind is a data response at all
    pub fn source(&self) -> Option<&str> {
        self.kind.strip_prefix(DATA_RESPONSE_PREFIX)
    }

    /// Error marker carried in the payload
    pub fn error_message(&self) -> Option<String> {
        match self.payload.get("error")? {
            Value::Null => None,
            Value::String(message) => Some(message.clone()),
            other => Some(other.to_string()),
        }
    }
}

/// `data-response:<source>`
pub fn response_kind(source: &str) -> String {
    format!("{}{}", DATA_RESPONSE_PREFIX, source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_wire_format() {
        let msg = RendererMessage::RequestData {
            source: "aliases".to_string(),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({ "kind": "request-data", "source": "aliases" })
        );
    }

    #[test]
    fn test_completion_wire_format() {
        let msg = RendererMessage::LegacyMigrationComplete {
            user_id: 9,
            record_counts: BTreeMap::from([("aliases".to_string(), 2)]),
        };
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            json!({
                "kind": "legacy-migration-complete",
                "userId": 9,
                "recordCounts": { "aliases": 2 }
            })
        );
        assert_eq!(msg.description(), "Legacy migration complete for user 9 (2 records)");
    }

    #[test]
    fn test_response_parsing() {
        let response =
            DataResponse::from_json(r#"{"kind":"data-response:userConfig","payload":{"theme":"dark"}}"#)
                .unwrap();
        assert_eq!(response.source(), Some("userConfig"));
        assert_eq!(response.error_message(), None);

        let failed = DataResponse::error("aliases", "store closed");
        assert_eq!(failed.kind, "data-response:aliases");
        assert_eq!(failed.error_message().as_deref(), Some("store closed"));
    }

    #[test]
    fn test_response_without_payload() {
        let response = DataResponse::from_json(r#"{"kind":"data-response:aliases"}"#).unwrap();
        assert_eq!(response.payload, Value::Null);
        assert_eq!(DataResponse::from_json(r#"{"kind":"other"}"#).unwrap().source(), None);
    }
}

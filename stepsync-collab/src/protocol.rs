//! JSON wire format shared by the HTTP API and the notification socket.
//!
//! ```text
//! POST /update   {"clientID": 1, "fileName": "k3Xa9QzP", "version": 0, "steps": [...]}
//! GET  /?name=k3Xa9QzP&version=2
//!   ◄── 200      {"fileName": "k3Xa9QzP", "version": 3, "steps": [{"clientID": 1, "step": ...}]}
//! ws   /ws?name=k3Xa9QzP
//!   ◄── text     "hey"      (no payload: re-pull to get the steps)
//! ```
//!
//! Step payloads are opaque JSON values.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{SyncError, SyncResult};

/// Body of every change notification frame.
pub const NOTIFICATION_TEXT: &str = "hey";

/// Steps submitted by a client.
///
/// Missing fields fall back to zero values and are then rejected by
/// validation, never by the decoder. `"steps": null` reads as no steps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateRequest {
    #[serde(rename = "clientID")]
    pub client_id: i64,
    #[serde(rename = "fileName")]
    pub doc_id: String,
    /// Version up to which the client is in sync
    pub version: i64,
    #[serde(deserialize_with = "null_as_empty")]
    pub steps: Vec<Value>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default())
}

impl UpdateRequest {
    pub fn new(client_id: i64, doc_id: impl Into<String>, version: i64, steps: Vec<Value>) -> Self {
        Self {
            client_id,
            doc_id: doc_id.into(),
            version,
            steps,
        }
    }

    /// Decode from a JSON body.
    pub fn decode(bytes: &[u8]) -> SyncResult<Self> {
        serde_json::from_slice(bytes).map_err(|e| SyncError::InvalidRequest(e.to_string()))
    }
}

/// Query string of pull requests and notification upgrades.
///
/// Kept as raw strings so bad input is echoed back verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DocumentQuery {
    pub name: Option<String>,
    pub version: Option<String>,
}

impl DocumentQuery {
    /// Non-empty document name.
    pub fn doc_id(&self) -> SyncResult<&str> {
        match self.name.as_deref() {
            Some(name) if !name.is_empty() => Ok(name),
            _ => Err(SyncError::InvalidRequest("invalid fileName: \"\"".into())),
        }
    }

    /// Non-negative version.
    pub fn version(&self) -> SyncResult<i64> {
        let raw = self.version.as_deref().unwrap_or_default();
        match raw.parse::<i32>() {
            Ok(version) if version >= 0 => Ok(i64::from(version)),
            _ => Err(SyncError::InvalidRequest(format!("invalid version: {raw}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn query(name: Option<&str>, version: Option<&str>) -> DocumentQuery {
        DocumentQuery {
            name: name.map(String::from),
            version: version.map(String::from),
        }
    }

    #[test]
    fn test_update_request_decode() {
        let body = br#"{"clientID": 3, "fileName": "abc", "version": 2, "steps": ["x", {"k": 1}]}"#;
        let request = UpdateRequest::decode(body).unwrap();
        assert_eq!(
            request,
            UpdateRequest::new(3, "abc", 2, vec![json!("x"), json!({"k": 1})])
        );
    }

    #[test]
    fn test_update_request_missing_fields() {
        let request = UpdateRequest::decode(b"{}").unwrap();
        assert_eq!(request, UpdateRequest::default());
    }

    #[test]
    fn test_update_request_null_steps() {
        let body = br#"{"clientID":1,"fileName":"x","version":0,"steps":null}"#;
        let request = UpdateRequest::decode(body).unwrap();
        assert_eq!(request, UpdateRequest::new(1, "x", 0, Vec::new()));

        let result = UpdateRequest::decode(br#"{"steps": 5}"#);
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[test]
    fn test_update_request_garbage() {
        let result = UpdateRequest::decode(b"not json");
        assert!(matches!(result, Err(SyncError::InvalidRequest(_))));
    }

    #[test]
    fn test_query_doc_id() {
        assert_eq!(query(Some("abc"), None).doc_id().unwrap(), "abc");
        assert!(query(Some(""), None).doc_id().is_err());
        assert!(query(None, None).doc_id().is_err());
    }

    #[test]
    fn test_query_version() {
        assert_eq!(query(None, Some("0")).version().unwrap(), 0);
        assert_eq!(query(None, Some("17")).version().unwrap(), 17);

        let err = query(None, Some("-1")).version().unwrap_err();
        assert_eq!(err, SyncError::InvalidRequest("invalid version: -1".into()));
        assert!(query(None, Some("two")).version().is_err());
        assert!(query(None, None).version().is_err());
    }
}

//! Wire envelope shared by both sides of the boundary

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A message crossing the boundary
///
/// `id` is present only on request/response pairs and absent on broadcast
/// events. A response echoes the request's `id` and `type` and carries
/// either `data` or `error`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(rename = "type")]
    pub kind: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Envelope {
    pub fn request(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn success(id: impl Into<String>, kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: Some(id.into()),
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn failure(id: impl Into<String>, kind: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            kind: kind.into(),
            data: None,
            error: Some(error.into()),
        }
    }

    pub fn event(kind: impl Into<String>, data: Value) -> Self {
        Self {
            id: None,
            kind: kind.into(),
            data: Some(data),
            error: None,
        }
    }

    pub fn is_event(&self) -> bool {
        self.id.is_none()
    }
}

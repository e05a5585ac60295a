//! Request and response envelopes for automation commands.
//!
//! One request envelope produces exactly one response envelope, correlated by
//! `requestId`. Request IDs are unique per connection, not globally.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorCode;

/// Inbound automation command. Immutable once parsed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub action: String,
    #[serde(rename = "subAction", default, skip_serializing_if = "Option::is_none")]
    pub sub_action: Option<String>,
    #[serde(default)]
    pub payload: Value,
}

impl RequestEnvelope {
    /// Dotted `action.subAction` form used in logs and coalescing decisions.
    pub fn qualified_action(&self) -> String {
        match &self.sub_action {
            Some(sub) => format!("{}.{}", self.action, sub),
            None => self.action.clone(),
        }
    }
}

/// Terminal response for one request. Every request receives exactly one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    #[serde(rename = "requestId")]
    pub request_id: String,
    pub success: bool,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(rename = "errorCode", default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl ResponseEnvelope {
    pub fn success(request_id: impl Into<String>, message: impl Into<String>, result: Value) -> Self {
        Self {
            request_id: request_id.into(),
            success: true,
            message: message.into(),
            result: Some(result),
            error_code: None,
        }
    }

    pub fn error(
        request_id: impl Into<String>,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            success: false,
            message: message.into(),
            result: None,
            error_code: Some(code),
        }
    }
}

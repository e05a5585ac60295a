//! Error codes surfaced to automation clients.
//!
//! The coordination layer resolves every failure into one of these codes;
//! operations may additionally return their own codes, which pass through
//! verbatim as [`ErrorCode::Op`].

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Machine-readable error code carried in a response envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// Request envelope or payload was malformed. Never retried.
    InvalidPayload,
    /// A field was present but semantically invalid. Never retried.
    InvalidArgument,
    /// Target resource does not exist.
    NotFound,
    /// The resource key is held by another in-flight operation. Retry later.
    ResourceBusy,
    /// The in-flight operation exceeded the stale timeout and was reaped.
    /// Treated as a failure; safe to retry.
    StaleTimeout,
    /// The bridge transport was torn down before the operation finished.
    ConnectionLost,
    /// No registered operation matched the action/subAction pair.
    UnknownAction,
    /// The operation panicked or the owning executor was unavailable.
    InternalError,
    /// Operation-specific code, passed through verbatim.
    Op(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            ErrorCode::InvalidPayload => "INVALID_PAYLOAD",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ResourceBusy => "RESOURCE_BUSY",
            ErrorCode::StaleTimeout => "STALE_TIMEOUT",
            ErrorCode::ConnectionLost => "CONNECTION_LOST",
            ErrorCode::UnknownAction => "UNKNOWN_ACTION",
            ErrorCode::InternalError => "INTERNAL_ERROR",
            ErrorCode::Op(code) => code,
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for ErrorCode {
    fn from(s: &str) -> Self {
        match s {
            "INVALID_PAYLOAD" => ErrorCode::InvalidPayload,
            "INVALID_ARGUMENT" => ErrorCode::InvalidArgument,
            "NOT_FOUND" => ErrorCode::NotFound,
            "RESOURCE_BUSY" => ErrorCode::ResourceBusy,
            "STALE_TIMEOUT" => ErrorCode::StaleTimeout,
            "CONNECTION_LOST" => ErrorCode::ConnectionLost,
            "UNKNOWN_ACTION" => ErrorCode::UnknownAction,
            "INTERNAL_ERROR" => ErrorCode::InternalError,
            other => ErrorCode::Op(other.to_string()),
        }
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(ErrorCode::from(s.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_round_trip() {
        let code = ErrorCode::ResourceBusy;
        let json = serde_json::to_string(&code).expect("serialize");
        assert_eq!(json, "\"RESOURCE_BUSY\"");
        let back: ErrorCode = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, code);
    }

    #[test]
    fn operation_codes_pass_through_verbatim() {
        let back: ErrorCode = serde_json::from_str("\"ASSET_EXISTS\"").expect("deserialize");
        assert_eq!(back, ErrorCode::Op("ASSET_EXISTS".to_string()));
        assert_eq!(back.as_str(), "ASSET_EXISTS");
    }
}

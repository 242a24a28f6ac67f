//! Message envelopes crossing the page/background boundary.
//!
//! Delivery is per-channel FIFO with no cross-channel ordering guarantee;
//! every request is correlated to its response by id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ErrorPayload;

/// Envelope tag for page → background requests.
pub const SOURCE_REQUEST: &str = "provider";
/// Envelope tag for background → page responses.
pub const SOURCE_RESPONSE: &str = "provider-response";
/// Envelope tag for background → page event broadcasts.
pub const SOURCE_EVENT: &str = "provider-event";

/// A request sent by the page-side provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Always [`SOURCE_REQUEST`].
    pub source: String,
    /// Correlation id.
    pub id: String,
    /// Provider method name.
    pub method: String,
    /// Method parameters.
    pub params: Value,
}

/// The response correlated to a [`RequestEnvelope`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Always [`SOURCE_RESPONSE`].
    pub source: String,
    /// Correlation id of the originating request.
    pub id: String,
    /// Result or normalized error payload.
    pub response: ResponseBody,
}

/// Result payload of a relayed call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseBody {
    /// Successful result value.
    Ok(Value),
    /// Normalized error from the fixed code table.
    Err(ErrorPayload),
}

/// An unsolicited event broadcast to page contexts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Always [`SOURCE_EVENT`].
    pub source: String,
    /// Event name (`accountsChanged`, `disconnect`).
    pub event: String,
    /// Event payload.
    pub data: Value,
}

impl RequestEnvelope {
    /// Builds a request envelope with the canonical source tag.
    #[must_use]
    pub fn new(id: String, method: String, params: Value) -> Self {
        Self {
            source: SOURCE_REQUEST.to_string(),
            id,
            method,
            params,
        }
    }
}

impl ResponseEnvelope {
    /// Builds a response envelope with the canonical source tag.
    #[must_use]
    pub fn new(id: String, response: ResponseBody) -> Self {
        Self {
            source: SOURCE_RESPONSE.to_string(),
            id,
            response,
        }
    }
}

impl EventEnvelope {
    /// Builds an event envelope with the canonical source tag.
    #[must_use]
    pub fn new(event: String, data: Value) -> Self {
        Self {
            source: SOURCE_EVENT.to_string(),
            event,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_request_envelope_wire_shape() {
        let envelope = RequestEnvelope::new(
            "abc-123".to_string(),
            "connect".to_string(),
            json!({ "onlyIfTrusted": false }),
        );
        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(value["source"], "provider");
        assert_eq!(value["id"], "abc-123");
        assert_eq!(value["method"], "connect");
    }

    #[test]
    fn test_response_body_round_trip() {
        let ok = ResponseEnvelope::new(
            "id1".to_string(),
            ResponseBody::Ok(json!({ "accounts": [] })),
        );
        let value = serde_json::to_value(&ok).expect("serialize");
        assert_eq!(value["source"], "provider-response");
        let decoded: ResponseEnvelope = serde_json::from_value(value).expect("deserialize");
        match decoded.response {
            ResponseBody::Ok(_) => {}
            ResponseBody::Err(err) => panic!("unexpected error body: {err:?}"),
        }

        let err = ResponseEnvelope::new(
            "id2".to_string(),
            ResponseBody::Err(ErrorPayload {
                code: 4001,
                message: "user_rejected".to_string(),
            }),
        );
        let value = serde_json::to_value(&err).expect("serialize");
        let decoded: ResponseEnvelope = serde_json::from_value(value).expect("deserialize");
        match decoded.response {
            ResponseBody::Err(payload) => assert_eq!(payload.code, 4001),
            ResponseBody::Ok(value) => panic!("unexpected ok body: {value}"),
        }
    }
}

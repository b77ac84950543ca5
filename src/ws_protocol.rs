use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const SESSION_UPDATE: &str = "session_update";
pub const TIME_EXPIRED: &str = "time_expired";
pub const SESSION_CLOSED: &str = "session_closed";
pub const REQUEST_VIEW: &str = "request_view";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEnvelope {
    pub event: String,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ts: Option<String>,
}

impl WsEnvelope {
    pub fn now(event: &str, payload: Value) -> Self {
        Self {
            event: event.to_string(),
            payload,
            request_id: None,
            ts: Some(Utc::now().to_rfc3339()),
        }
    }

    pub fn with_request_id(mut self, request_id: Option<String>) -> Self {
        self.request_id = request_id;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_request_without_optional_fields_parses() {
        let parsed: WsEnvelope =
            serde_json::from_str(r#"{"event":"request_view","payload":{}}"#).unwrap();
        assert_eq!(parsed.event, REQUEST_VIEW);
        assert!(parsed.request_id.is_none());
    }

    #[test]
    fn server_event_carries_timestamp() {
        let env = WsEnvelope::now(TIME_EXPIRED, serde_json::json!({"sessionId": 3}))
            .with_request_id(Some("abc".into()));
        let raw = serde_json::to_string(&env).unwrap();
        assert!(raw.contains("\"ts\""));
        assert!(raw.contains("\"request_id\":\"abc\""));
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Control-channel endpoint path
pub const CHANNEL_PATH: &str = "/api/v2/channels/samsung.remote.control";

/// Event names the device uses on the control channel
pub mod events {
    /// Channel accepted; `data.token` carries a freshly issued token
    pub const CHANNEL_CONNECT: &str = "ms.channel.connect";
    pub const CHANNEL_UNAUTHORIZED: &str = "ms.channel.unauthorized";
    /// Pairing prompt expired on the television
    pub const CHANNEL_TIMEOUT: &str = "ms.channel.timeOut";
}

/// Method names of control-channel calls
pub mod methods {
    pub const REMOTE_CONTROL: &str = "ms.remote.control";
    pub const DEVICE_INFO: &str = "GetDeviceInfo";
    pub const GET_ART_MODE: &str = "art.get_artmode_status";
    pub const SET_ART_MODE: &str = "art.set_artmode_status";
}

/// Outbound call frame
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallFrame {
    pub method: String,
    pub params: Value,
    pub id: String,
}

impl CallFrame {
    pub fn new(method: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            params: Value::Object(Default::default()),
            id: id.into(),
        }
    }

    pub fn with_params(mut self, params: Value) -> Self {
        // Absent params still go out as an empty object
        if !params.is_null() {
            self.params = params;
        }
        self
    }
}

/// Device-reported failure inside a response frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFailure {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    /// The `error` value exactly as the device sent it
    #[serde(skip)]
    pub raw: Value,
}

/// Notification pushed by the device
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventFrame {
    pub event: String,
    #[serde(default)]
    pub data: Value,
}

impl EventFrame {
    /// `data.token`, present on channel-connect events that issue a token
    pub fn token(&self) -> Option<&str> {
        self.data
            .get("token")
            .and_then(|v| v.as_str())
            .filter(|t| !t.is_empty())
    }
}

/// Parsed inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Response {
        id: String,
        outcome: std::result::Result<Value, RemoteFailure>,
    },
    Event(EventFrame),
}

impl InboundFrame {
    /// Classify raw text. A frame is a response when it carries an `id`
    /// plus `result` or `error`; otherwise an `event` field makes it an event.
    pub fn parse(text: &str) -> std::result::Result<Self, String> {
        let value: Value = serde_json::from_str(text).map_err(|e| format!("invalid JSON: {}", e))?;
        let obj = value
            .as_object()
            .ok_or_else(|| "frame is not a JSON object".to_string())?;

        let id = match obj.get("id") {
            Some(Value::String(s)) => Some(s.clone()),
            Some(Value::Number(n)) => Some(n.to_string()),
            _ => None,
        };

        if let Some(id) = id {
            if let Some(error) = obj.get("error") {
                return Ok(InboundFrame::Response {
                    id,
                    outcome: Err(parse_failure(error)),
                });
            }
            if let Some(result) = obj.get("result") {
                return Ok(InboundFrame::Response {
                    id,
                    outcome: Ok(result.clone()),
                });
            }
        }

        if let Some(event) = obj.get("event").and_then(|v| v.as_str()) {
            return Ok(InboundFrame::Event(EventFrame {
                event: event.to_string(),
                data: obj.get("data").cloned().unwrap_or(Value::Null),
            }));
        }

        Err("frame is neither a response nor an event".to_string())
    }
}

fn parse_failure(error: &Value) -> RemoteFailure {
    let mut failure = match error {
        Value::String(message) => RemoteFailure {
            code: 0,
            message: message.clone(),
            raw: Value::Null,
        },
        other => serde_json::from_value(other.clone()).unwrap_or_else(|_| RemoteFailure {
            code: 0,
            message: other.to_string(),
            raw: Value::Null,
        }),
    };
    failure.raw = error.clone();
    failure
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_frame_serializes_wire_shape() {
        let frame = CallFrame::new("GetDeviceInfo", "7").with_params(Value::Null);
        assert_eq!(
            serde_json::to_value(&frame).unwrap(),
            json!({ "method": "GetDeviceInfo", "params": {}, "id": "7" })
        );
    }

    #[test]
    fn parses_result_and_error_responses() {
        let ok = InboundFrame::parse(r#"{"id":"3","result":{"power":"on"}}"#).unwrap();
        assert_eq!(
            ok,
            InboundFrame::Response {
                id: "3".into(),
                outcome: Ok(json!({ "power": "on" }))
            }
        );

        let err = InboundFrame::parse(r#"{"id":4,"error":{"code":404,"message":"no such key"}}"#).unwrap();
        match err {
            InboundFrame::Response { id, outcome: Err(failure) } => {
                assert_eq!(id, "4");
                assert_eq!(failure.code, 404);
                assert_eq!(failure.message, "no such key");
                assert_eq!(failure.raw, json!({ "code": 404, "message": "no such key" }));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn event_field_wins_when_no_result() {
        let frame = InboundFrame::parse(
            r#"{"event":"ms.channel.connect","id":"x","data":{"token":"1234"}}"#,
        )
        .unwrap();
        match frame {
            InboundFrame::Event(event) => {
                assert_eq!(event.event, events::CHANNEL_CONNECT);
                assert_eq!(event.token(), Some("1234"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn rejects_unclassifiable_frames() {
        assert!(InboundFrame::parse("not json").is_err());
        assert!(InboundFrame::parse("[1,2]").is_err());
        assert!(InboundFrame::parse(r#"{"id":"1"}"#).is_err());
    }
}

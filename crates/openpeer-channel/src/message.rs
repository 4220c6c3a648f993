use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::flags::{Action, Category, Kind};

/// Subscription / publish type used when none is given.
pub const DEFAULT_MESSAGE_TYPE: &str = "*";

/// Logical unit exchanged between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Sequence number. Assigned by the sender of a request, echoed by replies.
    pub no: u64,
    #[serde(alias = "type")]
    pub kind: Kind,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub data: Option<Value>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "present"
    )]
    pub error: Option<Value>,
}

impl Message {
    pub fn new(no: u64, kind: Kind) -> Self {
        Self {
            no,
            kind,
            data: None,
            error: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn with_error(mut self, error: Value) -> Self {
        self.error = Some(error);
        self
    }

    /// `internal|reply` echoing `no`, carrying either a result or an error.
    pub fn reply(no: u64, outcome: std::result::Result<Value, Value>) -> Self {
        let reply = Self::new(no, Category::Internal | Action::Reply);
        match outcome {
            Ok(data) => reply.with_data(data),
            Err(error) => reply.with_error(error),
        }
    }

    /// The error carried by a reply, if it is a failed one. `null` counts as no error.
    pub fn failure(&self) -> Option<&Value> {
        self.error.as_ref().filter(|error| !error.is_null())
    }
}

/// Signed wire frame carrying one [`Message`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(alias = "playload")]
    pub payload: Message,
    /// ISO-8601 UTC timestamp, e.g. `2024-02-26T02:33:33.140Z`.
    pub time: String,
    pub version: String,
    pub signature: String,
}

/// `data` of a `common|message` push.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushData {
    #[serde(default)]
    pub message: Value,
    #[serde(
        rename = "messageType",
        alias = "messagetype",
        default = "default_message_type"
    )]
    pub message_type: String,
}

/// `data` of a `common|call`: which registered operation to run, and its arguments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallRequest {
    pub name: String,
    #[serde(default)]
    pub args: Vec<Value>,
}

fn default_message_type() -> String {
    DEFAULT_MESSAGE_TYPE.to_string()
}

// Keeps an explicit `null` distinct from an absent field.
fn present<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn optional_fields_are_omitted() {
        let message = Message::new(3, Category::Common | Action::Message);
        assert_eq!(
            serde_json::to_value(&message).unwrap(),
            json!({"no": 3, "kind": 129})
        );
    }

    #[test]
    fn explicit_null_data_survives() {
        let message = Message::new(1, Category::Internal | Action::Reply).with_data(Value::Null);
        let wire = serde_json::to_value(&message).unwrap();
        assert_eq!(wire, json!({"no": 1, "kind": 10, "data": null}));
        let back: Message = serde_json::from_value(wire).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn accepts_legacy_spellings() {
        let message: Message = serde_json::from_value(json!({"no": 4, "type": 257})).unwrap();
        assert_eq!(message.kind, Category::Common | Action::Call);

        let envelope: Envelope = serde_json::from_value(json!({
            "playload": {"no": 1, "kind": 129},
            "time": "t",
            "version": "v",
            "signature": "s",
        }))
        .unwrap();
        assert_eq!(envelope.payload.no, 1);

        let push: PushData =
            serde_json::from_value(json!({"message": 1, "messagetype": "tick"})).unwrap();
        assert_eq!(push.message_type, "tick");
    }

    #[test]
    fn push_type_defaults_to_wildcard() {
        let push: PushData = serde_json::from_value(json!({"message": "hi"})).unwrap();
        assert_eq!(push.message_type, DEFAULT_MESSAGE_TYPE);
        assert_eq!(
            serde_json::to_value(&push).unwrap(),
            json!({"message": "hi", "messageType": "*"})
        );
    }

    #[test]
    fn reply_failure_ignores_null_error() {
        let ok = Message::reply(2, Ok(json!(5)));
        assert_eq!(ok.failure(), None);
        assert_eq!(ok.data, Some(json!(5)));

        let failed = Message::reply(2, Err(json!("boom")));
        assert_eq!(failed.failure(), Some(&json!("boom")));

        let null_error =
            Message::new(2, Category::Internal | Action::Reply).with_error(Value::Null);
        assert_eq!(null_error.failure(), None);
    }
}

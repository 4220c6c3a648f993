//! Envelope framing and integrity tagging.
//!
//! The signature is a deterministic character-substitution hash over
//! `time + version`. It tells this protocol's frames apart from anything else
//! sharing the transport and pins the protocol version; it is not a MAC and
//! does not cover the payload.

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use crate::message::{Envelope, Message};

/// Protocol version stamped on every envelope.
pub const PROTOCOL_VERSION: &str = "v1.0";

/// Length of an envelope signature.
pub const SIGNATURE_LEN: usize = 12;

/// Digit count [`hash`] uses when callers have no preference.
pub const DEFAULT_HASH_DIGITS: usize = 6;

const CIPHER: &[u8; 62] = b"dHkfcJupR2ygGO0mX5xVBWZ31KvablITMst9D4C8hjEo7iwLqeS6YQUzNrFAPn";

const ENVELOPE_FIELDS: [&str; 3] = ["time", "version", "signature"];

/// Character-substitution hash.
///
/// Samples up to `digits` UTF-16 code units of `input` at a fixed stride and
/// maps each, shifted by its position and by `len % digits`, into the cipher
/// alphabet. Operates on UTF-16 code units so the output matches peers that
/// index strings that way.
pub fn hash(input: &str, digits: usize) -> String {
    if digits == 0 {
        return String::new();
    }
    let units: Vec<u16> = input.encode_utf16().collect();
    let step = (units.len() / digits).max(1);
    let offset = units.len() % digits;

    (0..digits.min(units.len()))
        .map(|i| {
            let code = usize::from(units[i * step]);
            char::from(CIPHER[(code + i + offset) % CIPHER.len()])
        })
        .collect()
}

/// Signature for an envelope stamped with `time` and `version`.
pub fn sign(time: &str, version: &str) -> String {
    hash(&format!("{time}{version}"), SIGNATURE_LEN)
}

/// Current time as ISO-8601 UTC with millisecond precision.
pub fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Wraps messages into signed envelopes and unwraps inbound frames.
#[derive(Debug, Clone)]
pub struct PacketCodec {
    version: String,
}

impl PacketCodec {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Stamp `message` with the current time and sign it.
    pub fn wrap(&self, message: Message) -> Envelope {
        self.wrap_at(message, timestamp())
    }

    /// Stamp `message` with an explicit time and sign it.
    pub fn wrap_at(&self, message: Message, time: String) -> Envelope {
        let signature = sign(&time, &self.version);
        Envelope {
            payload: message,
            time,
            version: self.version.clone(),
            signature,
        }
    }

    /// Wrap and serialize, ready for [`openpeer_transport::Transport::send`].
    pub fn encode(&self, message: Message) -> Result<Value> {
        Ok(serde_json::to_value(self.wrap(message))?)
    }

    /// Whether the envelope's signature matches its own time and version.
    pub fn verify(&self, envelope: &Envelope) -> bool {
        envelope.signature == sign(&envelope.time, &envelope.version)
    }

    /// Accept `raw` only if it is an envelope of this protocol and version.
    ///
    /// Anything else (foreign traffic, partial records, bad signatures) yields
    /// `None` and must be ignored by the caller.
    pub fn unwrap(&self, raw: &Value) -> Option<Envelope> {
        let record = raw.as_object()?;
        let has_payload = record.contains_key("payload") || record.contains_key("playload");
        if !has_payload || !ENVELOPE_FIELDS.iter().all(|f| record.contains_key(*f)) {
            trace!("dropping frame: not an envelope");
            return None;
        }

        let envelope: Envelope = match serde_json::from_value(raw.clone()) {
            Ok(envelope) => envelope,
            Err(err) => {
                trace!(error = %err, "dropping frame: malformed envelope");
                return None;
            }
        };

        if !self.verify(&envelope) {
            trace!(time = %envelope.time, "dropping frame: signature mismatch");
            return None;
        }
        if envelope.version != self.version {
            trace!(version = %envelope.version, "dropping frame: foreign protocol version");
            return None;
        }
        Some(envelope)
    }
}

impl Default for PacketCodec {
    fn default() -> Self {
        Self::new(PROTOCOL_VERSION)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::flags::{Action, Category, Kind};

    const TIME: &str = "2024-02-26T02:33:33.140Z";

    #[test]
    fn hash_known_vectors() {
        assert_eq!(hash("2024-02-26T02:33:33.140Zv1.0", 12), "Uz6rFTPdRkHH");
        assert_eq!(hash("2024-02-26T02:33:33.140Zv1.0", 6), "USNrcF");
        assert_eq!(hash("2025-10-16T08:00:00.000Zv1.0", 12), "Uz6zrTcARndH");
        assert_eq!(hash("hello world", DEFAULT_HASH_DIGITS), "LiQUFE");
    }

    #[test]
    fn hash_of_short_input_is_input_length() {
        assert_eq!(hash("abc", 12), "ChE");
        assert_eq!(hash("", 12), "");
        assert_eq!(hash("abc", 0), "");
    }

    #[test]
    fn sign_uses_time_then_version() {
        assert_eq!(sign(TIME, "v1.0"), "Uz6rFTPdRkHH");
        assert_eq!(sign(TIME, "v1.0").len(), SIGNATURE_LEN);
    }

    #[test]
    fn timestamp_is_iso_utc_millis() {
        let ts = timestamp();
        assert_eq!(ts.len(), TIME.len());
        assert!(ts.ends_with('Z'));
        assert_eq!(&ts[10..11], "T");
        assert_eq!(&ts[19..20], ".");
    }

    #[test]
    fn wrap_then_unwrap_preserves_message() {
        let codec = PacketCodec::default();
        let message = Message::new(7, Category::Common | Action::Call)
            .with_data(json!({"name": "add", "args": [2, 3]}));

        let envelope = codec.wrap(message.clone());
        assert!(codec.verify(&envelope));
        assert_eq!(envelope.version, PROTOCOL_VERSION);

        let raw = serde_json::to_value(&envelope).unwrap();
        let back = codec.unwrap(&raw).expect("own envelope should unwrap");
        assert_eq!(back.payload, message);
    }

    #[test]
    fn wire_shape_uses_documented_field_names() {
        let codec = PacketCodec::default();
        let envelope = codec.wrap_at(
            Message::new(1, Category::Internal | Action::Connect),
            TIME.to_string(),
        );
        assert_eq!(
            serde_json::to_value(&envelope).unwrap(),
            json!({
                "payload": {"no": 1, "kind": 18},
                "time": TIME,
                "version": "v1.0",
                "signature": "Uz6rFTPdRkHH",
            })
        );
    }

    #[test]
    fn tampered_signature_fails_verification() {
        let codec = PacketCodec::default();
        let mut envelope = codec.wrap_at(Message::new(1, Kind::from_bits(129)), TIME.to_string());
        envelope.signature = "Uz6rFTPdRkHX".to_string();
        assert!(!codec.verify(&envelope));
    }

    #[test]
    fn tampered_time_fails_verification() {
        let codec = PacketCodec::default();
        let mut envelope = codec.wrap_at(Message::new(1, Kind::from_bits(129)), TIME.to_string());
        // Index 2 is one of the sampled positions.
        envelope.time = "2034-02-26T02:33:33.140Z".to_string();
        assert!(!codec.verify(&envelope));
    }

    #[test]
    fn tampered_version_fails_verification() {
        let codec = PacketCodec::default();
        let mut envelope = codec.wrap_at(Message::new(1, Kind::from_bits(129)), TIME.to_string());
        envelope.version = "v1.0.1".to_string();
        assert!(!codec.verify(&envelope));
    }

    #[test]
    fn unwrap_rejects_non_envelopes() {
        let codec = PacketCodec::default();
        assert!(codec.unwrap(&json!("hello")).is_none());
        assert!(codec.unwrap(&json!(null)).is_none());
        assert!(codec.unwrap(&json!({"time": TIME, "version": "v1.0"})).is_none());
        assert!(codec
            .unwrap(&json!({
                "payload": "not a message",
                "time": TIME,
                "version": "v1.0",
                "signature": sign(TIME, "v1.0"),
            }))
            .is_none());
    }

    #[test]
    fn unwrap_rejects_bad_signature() {
        let codec = PacketCodec::default();
        let raw = json!({
            "payload": {"no": 1, "kind": 129},
            "time": TIME,
            "version": "v1.0",
            "signature": "AAAAAAAAAAAA",
        });
        assert!(codec.unwrap(&raw).is_none());
    }

    #[test]
    fn unwrap_rejects_other_versions_even_when_self_consistent() {
        let other = PacketCodec::new("v2.5");
        let raw = serde_json::to_value(other.wrap(Message::new(1, Kind::from_bits(129)))).unwrap();
        assert!(other.unwrap(&raw).is_some());
        assert!(PacketCodec::default().unwrap(&raw).is_none());
    }

    #[test]
    fn unwrap_accepts_legacy_payload_spelling() {
        let codec = PacketCodec::default();
        let raw = json!({
            "playload": {"no": 9, "type": 129, "data": {"message": 1, "messagetype": "*"}},
            "time": TIME,
            "version": "v1.0",
            "signature": sign(TIME, "v1.0"),
        });
        let envelope = codec.unwrap(&raw).expect("legacy frame should unwrap");
        assert_eq!(envelope.payload.no, 9);
        assert_eq!(envelope.payload.kind, Category::Common | Action::Message);
    }
}

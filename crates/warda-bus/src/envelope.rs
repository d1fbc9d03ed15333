//! The wire envelope exchanged on every bus topic.
//!
//! On the wire an envelope is a JSON object:
//!
//! ```json
//! {"id": "3fQx9aLk0PzW", "message": "...", "timestamp": 1718000000000}
//! ```
//!
//! Older senders omit `id`, and some omit `timestamp`; decoding fills both in.
//! `sender` and `is_local` exist only in memory and are never serialized.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use warda_types::{generate_id, Participant};

use crate::error::BusError;

/// A type that can ride in the `message` field of an [`Envelope`].
pub trait EnvelopePayload: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Decodes the raw `message` value.
    ///
    /// The default accepts whatever shape `serde` accepts for `Self`.
    fn from_message(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    /// A millisecond timestamp carried inside the payload itself, consulted
    /// when the envelope has none.
    fn embedded_timestamp(&self) -> Option<i64> {
        None
    }
}

/// Opaque text payloads. Non-string JSON is kept as its JSON text.
impl EnvelopePayload for String {
    fn from_message(value: Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::String(text) => Ok(text),
            other => Ok(other.to_string()),
        }
    }
}

/// An envelope whose payload is opaque text.
pub type ServiceMessage = Envelope<String>;

/// A message on the bus.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope<P = String> {
    id: String,
    /// Decoded `message` field; `None` when the sender sent none or `null`.
    pub payload: Option<P>,
    pub timestamp: DateTime<Utc>,
    /// Originating peer. Attached on receipt, or after a local publish.
    pub sender: Option<Participant>,
    /// `true` only for envelopes this process authored.
    pub is_local: bool,
}

#[derive(Deserialize)]
struct InboundWire {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    message: Option<Value>,
    /// Some senders emit fractional milliseconds.
    #[serde(default)]
    timestamp: Option<f64>,
}

#[derive(Serialize)]
struct OutboundWire<'a, P> {
    id: &'a str,
    message: Option<&'a P>,
    timestamp: i64,
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms > 0 {
        DateTime::from_timestamp_millis(ms)
    } else {
        None
    }
}

impl<P: EnvelopePayload> Envelope<P> {
    /// Creates an envelope with a fresh id, stamped now.
    pub fn new(payload: P) -> Self {
        Self {
            id: generate_id(),
            payload: Some(payload),
            timestamp: Utc::now(),
            sender: None,
            is_local: false,
        }
    }

    /// Creates an envelope authored by this process.
    pub fn local(payload: P) -> Self {
        Self {
            is_local: true,
            ..Self::new(payload)
        }
    }

    /// The correlation id. Assigned once and never regenerated.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn into_payload(self) -> Option<P> {
        self.payload
    }

    /// Decodes an envelope from raw packet bytes.
    ///
    /// A missing or empty `id` is replaced by a freshly generated one. The
    /// timestamp is the first available of: the envelope's own `timestamp`,
    /// the payload's [embedded timestamp](EnvelopePayload::embedded_timestamp),
    /// the time of decoding. Zero counts as absent.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::MalformedEnvelope`] if the bytes are not a JSON
    /// object of the envelope shape or the payload does not decode as `P`.
    pub fn parse(raw: &[u8]) -> Result<Self, BusError> {
        let wire: InboundWire = serde_json::from_slice(raw)
            .map_err(|e| BusError::MalformedEnvelope(e.to_string()))?;

        let payload = match wire.message {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                P::from_message(value)
                    .map_err(|e| BusError::MalformedEnvelope(format!("payload: {e}")))?,
            ),
        };

        let timestamp = wire
            .timestamp
            .filter(|ms| ms.is_finite())
            .and_then(|ms| from_millis(ms.trunc() as i64))
            .or_else(|| {
                payload
                    .as_ref()
                    .and_then(P::embedded_timestamp)
                    .and_then(from_millis)
            })
            .unwrap_or_else(Utc::now);

        Ok(Self {
            id: wire
                .id
                .filter(|id| !id.is_empty())
                .unwrap_or_else(generate_id),
            payload,
            timestamp,
            sender: None,
            is_local: false,
        })
    }

    /// Encodes the wire form: `id`, `message` and `timestamp` in milliseconds.
    pub fn to_json(&self) -> Result<String, BusError> {
        Ok(serde_json::to_string(&self.wire())?)
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, BusError> {
        Ok(serde_json::to_vec(&self.wire())?)
    }

    fn wire(&self) -> OutboundWire<'_, P> {
        OutboundWire {
            id: &self.id,
            message: self.payload.as_ref(),
            timestamp: self.timestamp.timestamp_millis(),
        }
    }
}

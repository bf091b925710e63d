//! Portal stream envelopes
//!
//! Every frame on the portal stream is a JSON object `{source, destination?, body}`.
//! The body is either the literal control string `"connected"` or an object carrying
//! bridge status. Outbound acknowledgements use the same shape with `destination` set.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::DecodeError;

/// Body literal the portal sends once the session is established
pub const CONNECTED_BODY: &str = "connected";

/// Command carried by every acknowledgement
const ACK_COMMAND: &str = "none";

/// Frame as it appears on the wire, before validation
#[derive(Debug, Serialize, Deserialize)]
struct WireFrame {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body: Option<Value>,
}

/// A decoded, addressed message
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    pub source: String,
    pub destination: Option<String>,
    pub body: Map<String, Value>,
}

/// Result of decoding one inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Session established; no registry effect
    Connected,
    /// Message from a bridge
    Message(Envelope),
}

impl Envelope {
    /// Build the acknowledgement for a message received from `destination`
    pub fn ack(source: &str, destination: &str) -> Self {
        let mut body = Map::new();
        body.insert("command".to_string(), Value::String(ACK_COMMAND.to_string()));
        Self {
            source: source.to_string(),
            destination: Some(destination.to_string()),
            body,
        }
    }

    /// Status fields the bridge reported in this message
    pub fn status(&self) -> StatusReport {
        StatusReport::from_body(&self.body)
    }
}

/// The two body fields the monitor interprets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub version: Option<String>,
    /// Bridge boot time as epoch seconds
    pub up_since: Option<f64>,
}

impl StatusReport {
    fn from_body(body: &Map<String, Value>) -> Self {
        let version = body.get("version").and_then(|v| match v {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        });
        let up_since = body.get("up_since").and_then(Value::as_f64);
        Self { version, up_since }
    }
}

/// Decode a raw text frame
pub fn decode(raw: &str) -> Result<Frame, DecodeError> {
    let wire: WireFrame = serde_json::from_str(raw)?;

    let body = match wire.body {
        None | Some(Value::Null) => return Err(DecodeError::MissingBody),
        Some(body) => body,
    };

    if body.as_str() == Some(CONNECTED_BODY) {
        return Ok(Frame::Connected);
    }

    let source = wire.source.ok_or(DecodeError::MissingSource)?;

    let body = match body {
        Value::Object(map) => map,
        other => return Err(DecodeError::InvalidBody(truncate(&other.to_string(), 80))),
    };

    Ok(Frame::Message(Envelope {
        source,
        destination: wire.destination,
        body,
    }))
}

/// Encode an envelope as a text frame
pub fn encode(envelope: &Envelope) -> String {
    let wire = WireFrame {
        source: Some(envelope.source.clone()),
        destination: envelope.destination.clone(),
        body: Some(Value::Object(envelope.body.clone())),
    };
    // A frame of strings and a JSON map always serializes
    serde_json::to_string(&wire).unwrap_or_default()
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &s[..idx]),
        None => s.to_string(),
    }
}

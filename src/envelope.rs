//! Event envelope carried over pub/sub.
//!
//! On the wire an envelope is a single JSON object: the `identifier` field
//! plus the payload's own fields merged at the top level, e.g.
//! `{"identifier":"0190…","item":"sku-42"}`.  Inbound messages may also use
//! the older `id` field name; when both are present `identifier` wins and
//! `id` is discarded.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::{Map, Value};

/// Field carrying the envelope identifier.
pub const IDENTIFIER_FIELD: &str = "identifier";
const LEGACY_IDENTIFIER_FIELD: &str = "id";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Envelope {
    identifier: String,
    #[serde(flatten)]
    payload: Map<String, Value>,
}

impl Envelope {
    /// Wrap `payload` under a freshly generated identifier.
    pub fn new(payload: Map<String, Value>) -> Self {
        Self::with_identifier(new_identifier(), payload)
    }

    /// Wrap `payload` under `identifier`.  Any identifier fields already in
    /// the payload are dropped so the envelope's own identifier is the only
    /// one on the wire.
    pub fn with_identifier(identifier: impl Into<String>, mut payload: Map<String, Value>) -> Self {
        payload.remove(IDENTIFIER_FIELD);
        payload.remove(LEGACY_IDENTIFIER_FIELD);
        Self {
            identifier: identifier.into(),
            payload,
        }
    }

    /// Build an envelope from an arbitrary JSON value, which must be an
    /// object.
    pub fn from_value(payload: Value) -> Result<Self> {
        match payload {
            Value::Object(map) => Ok(Self::new(map)),
            other => anyhow::bail!("order payload must be a JSON object, got {}", kind(&other)),
        }
    }

    /// Decode a raw pub/sub message.
    pub fn decode(raw: &str) -> Result<Self> {
        let mut payload: Map<String, Value> =
            serde_json::from_str(raw).context("message is not a JSON envelope")?;

        let identifier = payload.remove(IDENTIFIER_FIELD);
        let legacy = payload.remove(LEGACY_IDENTIFIER_FIELD);
        let identifier = match identifier.or(legacy) {
            Some(Value::String(identifier)) => identifier,
            Some(other) => anyhow::bail!("envelope identifier is {}, not a string", kind(&other)),
            None => anyhow::bail!("envelope has no identifier"),
        };
        anyhow::ensure!(
            !identifier.trim().is_empty(),
            "envelope identifier is empty"
        );

        Ok(Self {
            identifier,
            payload,
        })
    }

    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to serialize envelope")
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }
}

/// Generate a message identifier.
///
/// UUIDv7: millisecond timestamp prefix so ids sort by creation time, plus 74
/// random bits so two envelopes created in the same millisecond never share
/// an id.
pub fn new_identifier() -> String {
    uuid::Uuid::now_v7().to_string()
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

//! Versioned encoding for persisted snapshot payloads.
//!
//! ```json
//! {"version": 1, "payload": {"moby-dick.txt": "9f2c…"}}
//! ```
//!
//! Rows written before the envelope existed hold the bare mapping. Those decode
//! as version 0 and the store rewrites them in the current format the next time
//! they are read. Anything that is not valid JSON decodes to an empty mapping.

use super::{Metadata, Payload};
use anyhow::Result;
use serde::Serialize;
use serde_json::Value;

pub const CURRENT_VERSION: u32 = 1;

/// A decoded payload together with the envelope version it was stored in.
#[derive(Debug, Clone, PartialEq)]
pub struct Decoded {
    pub version: u32,
    pub payload: Payload,
}

impl Decoded {
    /// Stored in an older format that should be rewritten.
    pub fn is_legacy(&self) -> bool {
        self.version < CURRENT_VERSION
    }
}

#[derive(Serialize)]
struct Envelope<'a> {
    version: u32,
    payload: &'a Payload,
}

pub fn encode_payload(payload: &Payload) -> Result<String> {
    Ok(serde_json::to_string(&Envelope {
        version: CURRENT_VERSION,
        payload,
    })?)
}

pub fn decode_payload(raw: &str) -> Decoded {
    let value: Value = match serde_json::from_str(raw) {
        Ok(value) => value,
        Err(err) => {
            tracing::warn!("Undecodable snapshot payload, treating as empty: {}", err);
            return Decoded {
                version: CURRENT_VERSION,
                payload: Payload::new(),
            };
        }
    };

    let Value::Object(mut object) = value else {
        tracing::warn!("Snapshot payload is not a JSON object, treating as empty");
        return Decoded {
            version: CURRENT_VERSION,
            payload: Payload::new(),
        };
    };

    let enveloped = object.len() == 2
        && object.get("version").and_then(Value::as_u64).is_some()
        && object.get("payload").map(Value::is_object).unwrap_or(false);

    if enveloped {
        let raw_version = object.get("version").and_then(Value::as_u64);
        let Some(version) = raw_version.and_then(|v| u32::try_from(v).ok()) else {
            tracing::warn!(
                "Snapshot payload has out-of-range version {:?}, treating as empty",
                raw_version
            );
            return Decoded {
                version: CURRENT_VERSION,
                payload: Payload::new(),
            };
        };
        let inner = match object.remove("payload") {
            Some(Value::Object(inner)) => inner,
            _ => serde_json::Map::new(),
        };
        Decoded {
            version,
            payload: to_payload(inner),
        }
    } else {
        Decoded {
            version: 0,
            payload: to_payload(object),
        }
    }
}

pub fn encode_metadata(metadata: &Metadata) -> Result<String> {
    Ok(serde_json::to_string(metadata)?)
}

pub fn decode_metadata(raw: &str) -> Metadata {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(_) => {
            tracing::warn!("Snapshot metadata is not a JSON object, treating as empty");
            Metadata::new()
        }
        Err(err) => {
            tracing::warn!("Undecodable snapshot metadata, treating as empty: {}", err);
            Metadata::new()
        }
    }
}

fn to_payload(map: serde_json::Map<String, Value>) -> Payload {
    map.into_iter()
        .map(|(key, value)| match value {
            Value::String(hash) => (key, hash),
            other => (key, other.to_string()),
        })
        .collect()
}

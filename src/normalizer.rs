// src/normalizer.rs
//! Turns broker payloads into flat `(key, value)` updates.
//!
//! A JSON object payload is walked depth-first; every leaf becomes one update
//! keyed by the underscore-joined path from the (sanitized) topic down to the
//! leaf. Anything that is not a JSON object is relayed as a single update
//! carrying the raw payload text.

use serde_json::Value;

use crate::event::MessageEvent;

/// Nesting below this depth is not walked any further; the remaining subtree
/// is emitted as compact JSON text under the key reached so far.
pub const MAX_DEPTH: usize = 64;

/// Strips every `": "` fragment from a flat key.
pub fn sanitize_key(key: &str) -> String {
    key.replace(": ", "")
}

/// Maps a raw broker topic onto a flat-key prefix: `/` becomes `_`, then the
/// same colon-space strip as [`sanitize_key`].
pub fn sanitize_topic(topic: &str) -> String {
    sanitize_key(&topic.replace('/', "_"))
}

/// Flattens `value` under `prefix`.
///
/// Output order follows the iteration order of the input (object entries in
/// document order, arrays by index). Booleans become `"0"`/`"1"`, strings are
/// passed through unquoted, numbers and `null` use their JSON text. Numbers
/// keep the digits they were written with, whatever their magnitude.
pub fn flatten(prefix: &str, value: &Value) -> Vec<(String, String)> {
    let mut out = Vec::new();
    flatten_into(prefix.to_string(), value, 0, &mut out);
    out
}

fn flatten_into(prefix: String, value: &Value, depth: usize, out: &mut Vec<(String, String)>) {
    match value {
        Value::Object(map) if depth < MAX_DEPTH => {
            for (key, child) in map {
                flatten_into(format!("{prefix}_{key}"), child, depth + 1, out);
            }
        }
        Value::Array(items) if depth < MAX_DEPTH => {
            for (i, child) in items.iter().enumerate() {
                flatten_into(format!("{prefix}_{i}"), child, depth + 1, out);
            }
        }
        Value::Bool(b) => {
            let v = if *b { "1" } else { "0" };
            out.push((sanitize_key(&prefix), v.to_string()));
        }
        Value::String(s) => out.push((sanitize_key(&prefix), s.clone())),
        // numbers, null, and containers past MAX_DEPTH
        other => out.push((sanitize_key(&prefix), other.to_string())),
    }
}

/// Normalizes one inbound broker message into the events sent to the client.
///
/// Payloads that are not UTF-8 are decoded lossily. If the text parses as a
/// JSON object it is flattened; otherwise (bare scalars, arrays, malformed
/// JSON) the raw text is relayed as-is under the sanitized topic.
pub fn normalize_payload(topic: &str, payload: &[u8]) -> Vec<MessageEvent> {
    let text = String::from_utf8_lossy(payload);
    let prefix = sanitize_topic(topic);

    match serde_json::from_str::<Value>(&text) {
        Ok(value @ Value::Object(_)) => flatten(&prefix, &value)
            .into_iter()
            .map(|(key, value)| MessageEvent::new(key, value))
            .collect(),
        _ => vec![MessageEvent::new(prefix, text.into_owned())],
    }
}

//! Manifest rendering.
//!
//! A [`Manifest`] holds the canonical serialized form of one object: sorted
//! keys, no extra whitespace. Equal inputs always render to equal bytes, which
//! is what lets the apply step compare payloads with byte equality.

use serde_json::Value;
use thiserror::Error;

/// Errors raised while rendering a manifest.
///
/// Rendering is deterministic, so retrying with the same template cannot
/// succeed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// The template or one of its fields is not a JSON object.
    #[error("malformed template: '{field}' must be an object")]
    NotAnObject { field: &'static str },

    /// The requested replica count does not fit the manifest field.
    #[error("replica count {0} out of range")]
    ReplicasOutOfRange(u32),
}

/// One rendered manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    raw: Vec<u8>,
}

impl Manifest {
    /// Render a value into its canonical form.
    pub fn render(value: &Value) -> Result<Self, RenderError> {
        Ok(Self {
            raw: canonical_json(value).into_bytes(),
        })
    }

    /// Render a template unchanged (propagation).
    pub fn verbatim(template: &Value) -> Result<Self, RenderError> {
        if !template.is_object() {
            return Err(RenderError::NotAnObject { field: "template" });
        }
        Self::render(template)
    }

    /// Render a template with `spec.replicas` replaced (partitioning).
    pub fn with_replicas(template: &Value, replicas: u32) -> Result<Self, RenderError> {
        let replicas = i32::try_from(replicas).map_err(|_| RenderError::ReplicasOutOfRange(replicas))?;

        let mut value = template.clone();
        let Some(object) = value.as_object_mut() else {
            return Err(RenderError::NotAnObject { field: "template" });
        };

        let spec = object
            .entry("spec")
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
        let Some(spec) = spec.as_object_mut() else {
            return Err(RenderError::NotAnObject { field: "spec" });
        };
        spec.insert("replicas".to_string(), Value::from(replicas));

        Self::render(&value)
    }

    /// Wrap already-serialized bytes, e.g. read back from a store.
    pub fn from_raw(raw: Vec<u8>) -> Self {
        Self { raw }
    }

    /// The serialized bytes.
    pub fn raw(&self) -> &[u8] {
        &self.raw
    }

    /// Parse the payload back into a JSON value.
    pub fn to_value(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_slice(&self.raw)
    }

    /// Replica count carried in `spec.replicas`, if any.
    pub fn replicas(&self) -> Option<i64> {
        self.to_value().ok()?.get("spec")?.get("replicas")?.as_i64()
    }
}

/// Produce canonical JSON (sorted keys, no extra whitespace).
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut pairs: Vec<_> = map.iter().collect();
            pairs.sort_by_key(|(k, _)| *k);
            let inner: Vec<String> = pairs
                .iter()
                .map(|(k, v)| format!("\"{}\":{}", escape_json_string(k), canonical_json(v)))
                .collect();
            format!("{{{}}}", inner.join(","))
        }
        Value::Array(arr) => {
            let inner: Vec<String> = arr.iter().map(canonical_json).collect();
            format!("[{}]", inner.join(","))
        }
        Value::String(s) => format!("\"{}\"", escape_json_string(s)),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
    }
}

fn escape_json_string(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                out.push_str(&format!("\\u{:04x}", c as u32));
            }
            c => out.push(c),
        }
    }
    out
}

//! Decoded stream frames
//!
//! A frame is one classified `data:` payload. The three notations for the end
//! of a stream (`[DONE]`, `event: done`, `{"type":"done"}`) all decode to
//! [`Frame::Done`].

use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// One classified `data:` payload
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Progress {
        message: String,
        percent: u8,
        word_count: Option<u64>,
    },
    Chunk {
        text: String,
    },
    Result {
        payload: Value,
    },
    Error {
        message: String,
        code: Option<i64>,
    },
    Done,
}

/// JSON body of a `data:` line
///
/// Fields are read loosely: a value of the wrong shape becomes `None`
/// instead of failing the whole frame, so `type` alone decides the variant.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(rename = "type", default, deserialize_with = "loose_kind")]
    kind: Option<String>,
    #[serde(default, deserialize_with = "loose_text")]
    message: Option<String>,
    #[serde(default, deserialize_with = "loose_f64")]
    progress: Option<f64>,
    #[serde(default, deserialize_with = "loose_count")]
    word_count: Option<u64>,
    #[serde(default, deserialize_with = "loose_text")]
    content: Option<String>,
    #[serde(default)]
    data: Option<Value>,
    #[serde(default, deserialize_with = "loose_text")]
    error: Option<String>,
    #[serde(default, deserialize_with = "loose_code")]
    code: Option<i64>,
}

impl WireMessage {
    /// Convert into a frame, falling back to the active event name when the
    /// object carries no `type`. Returns `None` for unknown types.
    pub(crate) fn into_frame(self, event: &str) -> Option<Frame> {
        let kind = self.kind.as_deref().unwrap_or(event);
        match kind {
            "progress" => Some(Frame::Progress {
                message: self.message.unwrap_or_default(),
                percent: clamp_percent(self.progress.unwrap_or(0.0)),
                word_count: self.word_count,
            }),
            "chunk" => Some(Frame::Chunk {
                text: self.content.unwrap_or_default(),
            }),
            "result" => Some(Frame::Result {
                payload: self.data.unwrap_or(Value::Null),
            }),
            "error" => Some(Frame::Error {
                message: self
                    .error
                    .or(self.message)
                    .unwrap_or_else(|| "Unknown error".to_string()),
                code: self.code,
            }),
            "done" => Some(Frame::Done),
            _ => None,
        }
    }
}

fn loose_kind<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(kind) => Some(kind),
        _ => None,
    })
}

/// Strings as-is, other scalars and structures as their JSON text
fn loose_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(text) => Some(text),
        other => Some(other.to_string()),
    })
}

fn number_of(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    }
}

fn loose_f64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    Ok(number_of(&Value::deserialize(deserializer)?).filter(|n| n.is_finite()))
}

fn loose_count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<u64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if let Some(count) = value.as_u64() {
        return Ok(Some(count));
    }
    Ok(number_of(&value)
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map(|n| n.trunc() as u64))
}

/// Integer codes, with float codes truncated and numeric strings parsed
fn loose_code<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<i64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if let Some(code) = value.as_i64() {
        return Ok(Some(code));
    }
    Ok(number_of(&value)
        .filter(|n| n.is_finite() && n.abs() < i64::MAX as f64)
        .map(|n| n.trunc() as i64))
}

/// Round a server-reported percentage into `0..=100`
pub(crate) fn clamp_percent(value: f64) -> u8 {
    if !value.is_finite() {
        return 0;
    }
    value.round().clamp(0.0, 100.0) as u8
}

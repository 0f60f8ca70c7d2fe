//! Last-seen state of a streaming generation
//!
//! Folds outcomes into what a progress panel renders: percentage, status
//! message, accumulated text, word count, error and final result.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::outcome::StreamOutcome;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamState {
    pub is_streaming: bool,
    pub progress: u8,
    pub message: String,
    /// Concatenation of every chunk so far
    pub content: String,
    pub word_count: u64,
    pub error: Option<String>,
    pub error_code: Option<i64>,
    pub result: Option<Value>,
}

impl StreamState {
    /// Fresh state for a session that is about to start
    pub fn started() -> Self {
        Self {
            is_streaming: true,
            ..Self::default()
        }
    }

    pub fn apply(&mut self, outcome: &StreamOutcome) {
        match outcome {
            StreamOutcome::Progress {
                message,
                percent,
                word_count,
            } => {
                self.message.clone_from(message);
                self.progress = *percent;
                if let Some(count) = word_count {
                    self.word_count = *count;
                }
            }
            StreamOutcome::Chunk { text } => self.content.push_str(text),
            StreamOutcome::Result { payload } => self.result = Some(payload.clone()),
            StreamOutcome::Error { message, code } => {
                self.error = Some(message.clone());
                self.error_code = *code;
                self.is_streaming = false;
            }
            StreamOutcome::Complete => {
                self.is_streaming = false;
                self.progress = 100;
            }
        }
    }

    /// Mark the stream stopped without touching collected data
    pub fn stop(&mut self) {
        self.is_streaming = false;
    }

    /// Decode the final result into a caller type
    pub fn result_as<T: DeserializeOwned>(&self) -> Option<serde_json::Result<T>> {
        self.result
            .as_ref()
            .map(|value| serde_json::from_value(value.clone()))
    }
}

//! Stream outcomes delivered to callers

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

/// Semantic outcome of one stream frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StreamOutcome {
    /// Progress report
    #[serde(rename = "progress")]
    Progress {
        message: String,
        percent: u8,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        word_count: Option<u64>,
    },

    /// Content delta, concatenated by the caller in arrival order
    #[serde(rename = "chunk")]
    Chunk { text: String },

    /// Structured final artifact
    #[serde(rename = "result")]
    Result { payload: Value },

    /// Terminal failure
    #[serde(rename = "error")]
    Error {
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<i64>,
    },

    /// Terminal success, no more outcomes follow
    #[serde(rename = "complete")]
    Complete,
}

impl StreamOutcome {
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamOutcome::Error { .. } | StreamOutcome::Complete)
    }
}

/// Receiver of stream outcomes, one call per outcome, in order
pub trait OutcomeSink: Send {
    fn on_outcome(&mut self, outcome: StreamOutcome);
}

impl<F> OutcomeSink for F
where
    F: FnMut(StreamOutcome) + Send,
{
    fn on_outcome(&mut self, outcome: StreamOutcome) {
        self(outcome)
    }
}

impl OutcomeSink for mpsc::UnboundedSender<StreamOutcome> {
    fn on_outcome(&mut self, outcome: StreamOutcome) {
        // Receiver gone means nobody is listening anymore
        let _ = self.send(outcome);
    }
}

impl OutcomeSink for Vec<StreamOutcome> {
    fn on_outcome(&mut self, outcome: StreamOutcome) {
        self.push(outcome);
    }
}

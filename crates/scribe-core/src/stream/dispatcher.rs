//! Stream dispatcher
//!
//! Maps frames to outcomes and guarantees at most one terminal outcome and
//! at most one result per session. Once an error or completion went out, everything else the
//! connection delivers is swallowed.

use serde::Serialize;
use tracing::debug;

use super::frame::Frame;
use super::outcome::{OutcomeSink, StreamOutcome};

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    /// `Complete` was delivered
    Completed,
    /// `Error` was delivered
    Failed,
    /// Caller aborted; neither `Error` nor `Complete` was delivered
    Cancelled,
}

/// Per-session frame dispatcher
pub struct Dispatcher<S> {
    sink: S,
    end: Option<SessionEnd>,
    result_sent: bool,
    dispatched: usize,
}

impl<S: OutcomeSink> Dispatcher<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            end: None,
            result_sent: false,
            dispatched: 0,
        }
    }

    /// Deliver the outcome for one decoded frame
    pub fn dispatch(&mut self, frame: Frame) {
        if let Some(end) = self.end {
            debug!("Swallowing frame after session end ({:?}): {:?}", end, frame);
            return;
        }

        let outcome = match frame {
            Frame::Progress {
                message,
                percent,
                word_count,
            } => StreamOutcome::Progress {
                message,
                percent,
                word_count,
            },
            Frame::Chunk { text } if text.is_empty() => return,
            Frame::Chunk { text } => StreamOutcome::Chunk { text },
            Frame::Result { .. } if self.result_sent => {
                debug!("Swallowing repeated result frame");
                return;
            }
            Frame::Result { payload } => {
                self.result_sent = true;
                StreamOutcome::Result { payload }
            }
            Frame::Error { message, code } => {
                self.end = Some(SessionEnd::Failed);
                StreamOutcome::Error { message, code }
            }
            Frame::Done => {
                self.end = Some(SessionEnd::Completed);
                StreamOutcome::Complete
            }
        };
        self.emit(outcome);
    }

    /// The byte stream closed on its own. Servers that close without a
    /// terminal frame still get a `Complete`.
    pub fn finish_stream(&mut self) -> SessionEnd {
        if let Some(end) = self.end {
            return end;
        }
        debug!("Stream closed without terminal frame, synthesizing completion");
        self.end = Some(SessionEnd::Completed);
        self.emit(StreamOutcome::Complete);
        SessionEnd::Completed
    }

    /// Transport-level failure (bad status, refused connection, broken read)
    pub fn fail(&mut self, message: impl Into<String>, code: Option<i64>) -> SessionEnd {
        if let Some(end) = self.end {
            return end;
        }
        self.end = Some(SessionEnd::Failed);
        self.emit(StreamOutcome::Error {
            message: message.into(),
            code,
        });
        SessionEnd::Failed
    }

    /// Caller-initiated abort: end the session without any terminal outcome
    pub fn silence(&mut self) -> SessionEnd {
        *self.end.get_or_insert(SessionEnd::Cancelled)
    }

    pub fn is_terminated(&self) -> bool {
        self.end.is_some()
    }

    pub fn end(&self) -> Option<SessionEnd> {
        self.end
    }

    /// Number of outcomes delivered so far
    pub fn dispatched(&self) -> usize {
        self.dispatched
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    fn emit(&mut self, outcome: StreamOutcome) {
        self.dispatched += 1;
        self.sink.on_outcome(outcome);
    }
}

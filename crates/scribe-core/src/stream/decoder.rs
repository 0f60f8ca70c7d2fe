//! Incremental frame decoder
//!
//! Reassembles newline-delimited lines across network reads and classifies
//! every `data:` payload into a [`Frame`]. Partial lines are buffered as raw
//! bytes, so a multi-byte character split between two reads is decoded only
//! once its line is complete.

use serde_json::Value;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::frame::{Frame, WireMessage};

const DEFAULT_EVENT: &str = "message";
const DONE_EVENT: &str = "done";
const ERROR_EVENT: &str = "error";
const DONE_SENTINEL: &str = "[DONE]";

/// Line-buffering decoder for one stream session
pub struct FrameDecoder {
    /// Trailing bytes not yet terminated by a newline
    partial_line: Vec<u8>,
    /// Classification set by the last `event:` line
    current_event: String,
    /// Set once a terminal `Done` frame was produced
    finished: bool,
    started: Instant,
    bytes_received: usize,
    frame_count: usize,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            partial_line: Vec::new(),
            current_event: DEFAULT_EVENT.to_string(),
            finished: false,
            started: Instant::now(),
            bytes_received: 0,
            frame_count: 0,
        }
    }

    /// Feed one network read, returning every frame completed by it
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Frame> {
        let mut frames = Vec::new();
        if self.finished {
            debug!("Decoder finished, ignoring {} trailing bytes", bytes.len());
            return frames;
        }

        self.bytes_received += bytes.len();
        self.partial_line.extend_from_slice(bytes);

        // Everything up to the last newline is complete
        let Some(last_newline) = self.partial_line.iter().rposition(|b| *b == b'\n') else {
            return frames;
        };
        let residual = self.partial_line.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.partial_line, residual);

        for raw in complete.split(|b| *b == b'\n') {
            let decoded = String::from_utf8_lossy(raw);
            let line = decoded.strip_suffix('\r').unwrap_or(&decoded);
            if let Some(frame) = self.process_line(line) {
                frames.push(frame);
            }
            if self.finished {
                break;
            }
        }

        frames
    }

    /// Whether a terminal `Done` frame has been produced
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Called when the byte stream closes. An unterminated last line is
    /// never classified.
    pub fn finish(&mut self) {
        if !self.partial_line.is_empty() {
            debug!(
                "Discarding {} bytes of unterminated line at stream end",
                self.partial_line.len()
            );
            self.partial_line.clear();
        }
        info!(
            "Frame decoder closing: {:?} elapsed, {} frames, {} bytes",
            self.started.elapsed(),
            self.frame_count,
            self.bytes_received
        );
    }

    fn process_line(&mut self, line: &str) -> Option<Frame> {
        // Blank separators and SSE comments
        if line.is_empty() || line.starts_with(':') {
            return None;
        }

        if let Some(name) = line.strip_prefix("event:") {
            self.current_event = name.trim().to_string();
            return None;
        }

        let Some(data) = line.strip_prefix("data:") else {
            debug!("Ignoring non-data stream line: {}", line);
            return None;
        };
        let data = data.trim();
        if data.is_empty() {
            return None;
        }

        self.frame_count += 1;
        let event = std::mem::replace(&mut self.current_event, DEFAULT_EVENT.to_string());

        if data == DONE_SENTINEL || event == DONE_EVENT {
            return Some(self.done());
        }

        let frame = classify(data, &event)?;
        debug!("Frame #{} (event={}): {:?}", self.frame_count, event, frame);
        if frame == Frame::Done {
            return Some(self.done());
        }
        Some(frame)
    }

    fn done(&mut self) -> Frame {
        info!(
            "Stream done marker after {:?}, {} frames, {} bytes",
            self.started.elapsed(),
            self.frame_count,
            self.bytes_received
        );
        self.finished = true;
        self.partial_line.clear();
        Frame::Done
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Classify one non-empty `data:` payload under the given event name
///
/// The plain-text compatibility rules apply only to payloads that are not
/// JSON at all. Parsed JSON that is not an object carries no `type` and is
/// dropped.
fn classify(data: &str, event: &str) -> Option<Frame> {
    match serde_json::from_str::<Value>(data) {
        Ok(value @ Value::Object(_)) => {
            return match serde_json::from_value::<WireMessage>(value) {
                Ok(message) => {
                    let frame = message.into_frame(event);
                    if frame.is_none() {
                        debug!("Dropping frame with unknown type: {}", data);
                    }
                    frame
                }
                Err(e) => {
                    warn!("Dropping undecodable stream frame ({}): {}", e, data);
                    None
                }
            };
        }
        Ok(_) => {
            debug!("Dropping non-object JSON frame: {}", data);
            return None;
        }
        Err(_) => {}
    }

    // Plain-text error body
    if event == ERROR_EVENT {
        return Some(Frame::Error {
            message: data.to_string(),
            code: None,
        });
    }

    // Plain-text token streaming
    if !data.starts_with('{') {
        return Some(Frame::Chunk {
            text: data.to_string(),
        });
    }

    warn!("Dropping malformed stream frame: {}", data);
    None
}

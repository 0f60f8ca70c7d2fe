//! Streaming generation
//!
//! Decodes the server's line-oriented event stream and delivers typed
//! outcomes to the caller.
//!
//! Key components:
//! - `decoder` - line reassembly and frame classification
//! - `dispatcher` - frame to outcome mapping with a single terminal outcome
//! - `session` - one HTTP request driven through decoder and dispatcher
//! - `state` - accumulated view of a session for UIs

mod decoder;
mod dispatcher;
mod frame;
mod outcome;
mod session;
mod state;

pub use decoder::FrameDecoder;
pub use dispatcher::{Dispatcher, SessionEnd};
pub use frame::Frame;
pub use outcome::{OutcomeSink, StreamOutcome};
pub use session::{drive_stream, StreamSession};
pub use state::StreamState;

pub(crate) use frame::clamp_percent;

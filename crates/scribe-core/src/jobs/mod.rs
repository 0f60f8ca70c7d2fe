//! Background job polling
//!
//! Long generations can be delegated to a server-side job. The poller turns
//! the job id into a bounded sequence of status snapshots.

mod poller;
mod types;

pub use poller::{JobPoller, JobSource, PollEvent, PollSink, PollerState, DEFAULT_POLL_INTERVAL};
pub use types::{Job, JobStatus};

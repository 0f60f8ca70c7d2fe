//! Client core for the novel writing server
//!
//! Streams AI generation output as typed outcomes and polls long-running
//! background jobs until they finish.

pub mod auth;
pub mod cancellation;
pub mod client;
pub mod config;
pub mod jobs;
pub mod stream;

pub use auth::{CredentialProvider, EnvToken, NoCredentials, StaticToken};
pub use cancellation::AbortHandle;
pub use client::{ApiClient, ApiError};
pub use config::ClientConfig;
pub use jobs::{Job, JobPoller, JobSource, JobStatus, PollEvent, PollSink, PollerState};
pub use stream::{OutcomeSink, SessionEnd, StreamOutcome, StreamSession, StreamState};

//! Job status poller
//!
//! Watches one background job at a time: fetches its status immediately,
//! then on a fixed interval, until the job reaches a terminal status or the
//! caller stops watching. Ticks never overlap; each waits for the previous
//! fetch to finish.
//!
//! Every poll run carries a generation number. Stopping or restarting bumps
//! the generation, so a fetch that was already in flight resolves into a
//! stale result that is discarded instead of reviving a stopped poll.

use async_trait::async_trait;
use parking_lot::{Mutex, ReentrantMutex};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::types::{Job, JobStatus};
use crate::client::{ApiClient, ApiError};

/// Default delay between status fetches
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2000);

/// Where job snapshots come from
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_job(&self, job_id: &str) -> Result<Job, ApiError>;
}

#[async_trait]
impl JobSource for ApiClient {
    async fn fetch_job(&self, job_id: &str) -> Result<Job, ApiError> {
        let path = format!(
            "{}/{}",
            self.config().job_status_path.trim_end_matches('/'),
            job_id
        );
        self.get_json(&path).await
    }
}

/// Observation reported by the poller
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PollEvent {
    /// Non-terminal snapshot
    Progress {
        job_id: String,
        progress: u8,
        current_step: String,
    },
    /// Status fetch failed; polling continues
    FetchFailed { job_id: String, message: String },
    /// Job finished successfully; polling stopped
    Completed { job: Job },
    /// Job failed or was cancelled; polling stopped
    Failed { job: Job },
}

impl PollEvent {
    pub fn job_id(&self) -> &str {
        match self {
            PollEvent::Progress { job_id, .. } | PollEvent::FetchFailed { job_id, .. } => job_id,
            PollEvent::Completed { job } | PollEvent::Failed { job } => &job.id,
        }
    }
}

/// Receiver of poll events
pub trait PollSink: Send + Sync {
    fn on_event(&self, event: PollEvent);
}

impl<F> PollSink for F
where
    F: Fn(PollEvent) + Send + Sync,
{
    fn on_event(&self, event: PollEvent) {
        self(event)
    }
}

impl PollSink for mpsc::UnboundedSender<PollEvent> {
    fn on_event(&self, event: PollEvent) {
        let _ = self.send(event);
    }
}

/// Last-seen state of the watched job
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PollerState {
    pub job_id: Option<String>,
    pub job: Option<Job>,
    pub is_polling: bool,
    /// Message of the most recent failed fetch, cleared by the next success
    pub error: Option<String>,
}

struct Shared {
    generation: AtomicU64,
    state: Mutex<PollerState>,
    /// Held while checking the generation and emitting, so a stop cannot
    /// slip between the check and the event. Reentrant because sinks may
    /// call back into the poller.
    gate: ReentrantMutex<()>,
}

impl Shared {
    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }
}

pub struct JobPoller {
    source: Arc<dyn JobSource>,
    sink: Arc<dyn PollSink>,
    interval: Duration,
    shared: Arc<Shared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl JobPoller {
    pub fn new(source: Arc<dyn JobSource>, sink: Arc<dyn PollSink>) -> Self {
        Self {
            source,
            sink,
            interval: DEFAULT_POLL_INTERVAL,
            shared: Arc::new(Shared {
                generation: AtomicU64::new(0),
                state: Mutex::new(PollerState::default()),
                gate: ReentrantMutex::new(()),
            }),
            cancel: Mutex::new(None),
        }
    }

    /// Set the delay between fetches. Zero is ignored.
    pub fn with_interval(mut self, interval: Duration) -> Self {
        if interval.is_zero() {
            warn!("Ignoring zero poll interval, keeping {:?}", self.interval);
        } else {
            self.interval = interval;
        }
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Start watching a job
    ///
    /// No-op when already polling this id. Polling a different id stops the
    /// previous poll first. Must be called inside a tokio runtime.
    pub fn start_polling(&self, job_id: impl Into<String>) {
        let job_id = job_id.into();
        let _gate = self.shared.gate.lock();

        {
            let state = self.shared.state.lock();
            if state.is_polling && state.job_id.as_deref() == Some(job_id.as_str()) {
                debug!(job_id = %job_id, "Already polling job");
                return;
            }
        }

        self.halt();

        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        *self.shared.state.lock() = PollerState {
            job_id: Some(job_id.clone()),
            job: None,
            is_polling: true,
            error: None,
        };

        let cancel = CancellationToken::new();
        *self.cancel.lock() = Some(cancel.clone());

        info!(
            job_id = %job_id,
            interval_ms = self.interval.as_millis() as u64,
            "Job polling started"
        );

        let run = PollRun {
            job_id,
            generation,
            interval: self.interval,
            cancel,
            source: Arc::clone(&self.source),
            sink: Arc::clone(&self.sink),
            shared: Arc::clone(&self.shared),
        };
        tokio::spawn(run.run());
    }

    /// Stop watching. A fetch already in flight finishes, but its result is
    /// discarded.
    pub fn stop_polling(&self) {
        let _gate = self.shared.gate.lock();
        if self.halt() {
            info!("Job polling stopped");
        }
    }

    pub fn is_polling(&self) -> bool {
        self.shared.state.lock().is_polling
    }

    pub fn state(&self) -> PollerState {
        self.shared.state.lock().clone()
    }

    /// Invalidate the current run. Returns whether one was active.
    fn halt(&self) -> bool {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let was_polling = {
            let mut state = self.shared.state.lock();
            state.job_id = None;
            std::mem::replace(&mut state.is_polling, false)
        };
        if let Some(cancel) = self.cancel.lock().take() {
            cancel.cancel();
        }
        was_polling
    }
}

impl Drop for JobPoller {
    fn drop(&mut self) {
        self.halt();
    }
}

/// One poll run for one job id
struct PollRun {
    job_id: String,
    generation: u64,
    interval: Duration,
    cancel: CancellationToken,
    source: Arc<dyn JobSource>,
    sink: Arc<dyn PollSink>,
    shared: Arc<Shared>,
}

impl PollRun {
    async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fetches = 0usize;

        loop {
            // First tick completes immediately
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            fetches += 1;
            let result = self.source.fetch_job(&self.job_id).await;
            if !self.report(result) {
                break;
            }
        }

        debug!(job_id = %self.job_id, fetches, "Poll run exited");
    }

    /// Publish one fetch result. Returns whether polling continues.
    fn report(&self, result: Result<Job, ApiError>) -> bool {
        let _gate = self.shared.gate.lock();
        if !self.shared.is_current(self.generation) {
            debug!(job_id = %self.job_id, "Discarding status for stopped poll");
            return false;
        }

        let job = match result {
            Ok(job) => job,
            Err(err) => {
                let message = err.user_message();
                warn!(job_id = %self.job_id, "Job status fetch failed: {}", message);
                self.shared.state.lock().error = Some(message.clone());
                self.sink.on_event(PollEvent::FetchFailed {
                    job_id: self.job_id.clone(),
                    message,
                });
                return true;
            }
        };

        let terminal = job.is_terminal();
        {
            let mut state = self.shared.state.lock();
            state.job = Some(job.clone());
            state.error = None;
            if terminal {
                state.is_polling = false;
                state.job_id = None;
            }
        }

        if !terminal {
            debug!(
                job_id = %self.job_id,
                progress = job.progress,
                "Job status: {} ({})",
                job.status,
                job.current_step
            );
            self.sink.on_event(PollEvent::Progress {
                job_id: self.job_id.clone(),
                progress: job.progress,
                current_step: job.current_step,
            });
            return true;
        }

        // Terminal: retire this run before telling anyone
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        info!(job_id = %self.job_id, status = %job.status, "Job reached terminal status");
        let event = match job.status {
            JobStatus::Completed => PollEvent::Completed { job },
            _ => PollEvent::Failed { job },
        };
        self.sink.on_event(event);
        false
    }
}

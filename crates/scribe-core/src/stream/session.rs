//! Stream session
//!
//! One session runs one streaming request at a time: POST the payload, feed
//! every body read through a fresh decoder and dispatcher, and settle how
//! the stream ended. Natural closure without a terminal frame becomes
//! `Complete`; caller cancellation produces neither `Error` nor `Complete`.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::decoder::FrameDecoder;
use super::dispatcher::{Dispatcher, SessionEnd};
use super::outcome::{OutcomeSink, StreamOutcome};
use super::state::StreamState;
use crate::cancellation::AbortHandle;
use crate::client::ApiClient;

pub struct StreamSession {
    client: ApiClient,
    abort: AbortHandle,
    state: Arc<Mutex<StreamState>>,
}

impl StreamSession {
    pub fn new(client: ApiClient) -> Self {
        Self {
            client,
            abort: AbortHandle::new(),
            state: Arc::new(Mutex::new(StreamState::default())),
        }
    }

    /// Handle for aborting the current request from another task
    pub fn abort_handle(&self) -> AbortHandle {
        self.abort.clone()
    }

    /// Run one streaming request to its end
    ///
    /// Outcomes go to `sink` in arrival order; the returned value says how
    /// the session ended. Starting while another request of this session is
    /// still running does not cancel it.
    pub async fn start<P, S>(&self, endpoint: &str, payload: &P, sink: S) -> SessionEnd
    where
        P: Serialize + ?Sized,
        S: OutcomeSink,
    {
        let armed = self.abort.arm();
        *self.state.lock() = StreamState::started();
        let started = Instant::now();
        info!(endpoint = %endpoint, "Stream session starting");

        let mut dispatcher = Dispatcher::new(Tracked {
            state: Arc::clone(&self.state),
            inner: sink,
        });
        let token = armed.token();

        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => None,
            result = self.client.open_stream(endpoint, payload) => Some(result),
        };

        let end = match opened {
            None => dispatcher.silence(),
            Some(Err(err)) => {
                warn!("Stream request failed: {}", err);
                dispatcher.fail(err.user_message(), err.code())
            }
            Some(Ok(response)) => drive_stream(response.bytes_stream(), token, &mut dispatcher).await,
        };

        if end == SessionEnd::Cancelled {
            self.state.lock().stop();
        }
        self.abort.disarm(&armed);

        info!(
            endpoint = %endpoint,
            outcomes = dispatcher.dispatched(),
            "Stream session ended: {:?} after {:?}",
            end,
            started.elapsed()
        );
        end
    }

    /// Cancel the in-flight request. Idempotent; a no-op once the session
    /// has ended.
    pub fn abort(&self) {
        self.abort.abort();
        self.state.lock().stop();
    }

    /// Cancel anything in flight and forget all collected state
    pub fn reset(&self) {
        self.abort.abort();
        *self.state.lock() = StreamState::default();
    }

    /// Snapshot of what has been received so far
    pub fn state(&self) -> StreamState {
        self.state.lock().clone()
    }

    pub fn is_streaming(&self) -> bool {
        self.state.lock().is_streaming
    }
}

/// Feed an open byte stream through a fresh decoder into `dispatcher`
///
/// Stops reading at the first terminal outcome or when `token` fires.
pub async fn drive_stream<B, E, S>(
    body: B,
    token: &CancellationToken,
    dispatcher: &mut Dispatcher<S>,
) -> SessionEnd
where
    B: Stream<Item = Result<Bytes, E>>,
    E: Display,
    S: OutcomeSink,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = FrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => {
                info!("Stream session aborted by caller");
                return dispatcher.silence();
            }
            next = body.next() => next,
        };

        match next {
            Some(Ok(bytes)) => {
                for frame in decoder.feed(&bytes) {
                    dispatcher.dispatch(frame);
                }
                if dispatcher.is_terminated() {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!("Stream read failed: {}", e);
                decoder.finish();
                return dispatcher.fail(format!("Stream read failed: {e}"), None);
            }
            None => break,
        }
    }

    decoder.finish();
    dispatcher.finish_stream()
}

/// Folds every outcome into the session state before forwarding it
struct Tracked<S> {
    state: Arc<Mutex<StreamState>>,
    inner: S,
}

impl<S: OutcomeSink> OutcomeSink for Tracked<S> {
    fn on_outcome(&mut self, outcome: StreamOutcome) {
        self.state.lock().apply(&outcome);
        self.inner.on_outcome(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use std::time::Duration;

    const SCENARIO: &str = "event: progress\n\
data: {\"type\":\"progress\",\"message\":\"building\",\"progress\":30}\n\
\n\
data: {\"type\":\"chunk\",\"content\":\"Hello \"}\n\
\n\
data: {\"type\":\"chunk\",\"content\":\"world\"}\n\
\n\
event: done\n\
data: [DONE]\n";

    type Chunk = Result<Bytes, std::io::Error>;

    fn chunks(parts: Vec<&[u8]>) -> impl Stream<Item = Chunk> {
        let owned: Vec<Chunk> = parts
            .into_iter()
            .map(|part| Ok(Bytes::copy_from_slice(part)))
            .collect();
        stream::iter(owned)
    }

    async fn run(parts: Vec<&[u8]>) -> (SessionEnd, Vec<StreamOutcome>) {
        let token = CancellationToken::new();
        let mut dispatcher = Dispatcher::new(Vec::new());
        let end = drive_stream(chunks(parts), &token, &mut dispatcher).await;
        (end, dispatcher.into_sink())
    }

    fn count_complete(outcomes: &[StreamOutcome]) -> usize {
        outcomes
            .iter()
            .filter(|o| **o == StreamOutcome::Complete)
            .count()
    }

    #[tokio::test]
    async fn test_scenario_outcomes() {
        let (end, outcomes) = run(vec![SCENARIO.as_bytes()]).await;
        assert_eq!(end, SessionEnd::Completed);
        assert_eq!(
            outcomes,
            vec![
                StreamOutcome::Progress {
                    message: "building".to_string(),
                    percent: 30,
                    word_count: None,
                },
                StreamOutcome::Chunk {
                    text: "Hello ".to_string()
                },
                StreamOutcome::Chunk {
                    text: "world".to_string()
                },
                StreamOutcome::Complete,
            ]
        );

        let mut state = StreamState::started();
        outcomes.iter().for_each(|o| state.apply(o));
        assert_eq!(state.content, "Hello world");
    }

    #[tokio::test]
    async fn test_split_invariance() {
        let input = "data: {\"type\":\"progress\",\"message\":\"章节生成中\",\"progress\":12,\"word_count\":40}\n\
event: error\n\
data: {\"type\":\"chunk\",\"content\":\"ignored? no, typed\"}\n\
data: plain token\n\
data: null\n\
data: \"quoted\"\n\
data: {\"type\":\"progress\",\"progress\":\"64\",\"word_count\":-1}\n\
data: {\"type\":\"result\",\"data\":{\"title\":\"第一章\"}}\n\
data: {\"type\":\"result\",\"data\":{\"title\":\"第二章\"}}\n\
data: {\"type\":\"error\",\"error\":\"quota\",\"code\":\"QUOTA\"}\n\
data: [DONE]\n"
            .as_bytes();
        let (expected_end, expected) = run(vec![input]).await;
        assert_eq!(expected_end, SessionEnd::Failed);
        assert_eq!(expected.len(), 6);
        assert_eq!(
            expected[3],
            StreamOutcome::Progress {
                message: String::new(),
                percent: 64,
                word_count: None,
            }
        );
        assert_eq!(
            expected[5],
            StreamOutcome::Error {
                message: "quota".to_string(),
                code: None,
            }
        );

        for cut in 0..=input.len() {
            let (end, outcomes) = run(vec![&input[..cut], &input[cut..]]).await;
            assert_eq!(end, expected_end, "split at {cut}");
            assert_eq!(outcomes, expected, "split at {cut}");
        }

        let bytes: Vec<&[u8]> = input.chunks(1).collect();
        assert_eq!(run(bytes).await.1, expected);
    }

    #[tokio::test]
    async fn test_each_completion_notation_once() {
        for terminal in [
            "data: [DONE]\n",
            "event: done\ndata: {}\n",
            "data: {\"type\":\"done\"}\n",
        ] {
            let input = format!("data: a\n{terminal}data: b\ndata: [DONE]\n");
            let (end, outcomes) = run(vec![input.as_bytes()]).await;
            assert_eq!(end, SessionEnd::Completed, "{terminal:?}");
            assert_eq!(count_complete(&outcomes), 1, "{terminal:?}");
            assert_eq!(outcomes.len(), 2, "{terminal:?}");
        }
    }

    #[tokio::test]
    async fn test_error_frame_with_odd_code_is_not_completion() {
        for code in ["\"QUOTA\"", "500.0"] {
            let input = format!("data: {{\"type\":\"error\",\"error\":\"quota\",\"code\":{code}}}\n");
            let (end, outcomes) = run(vec![input.as_bytes()]).await;
            assert_eq!(end, SessionEnd::Failed, "code {code}");
            assert_eq!(count_complete(&outcomes), 0, "code {code}");
            assert!(matches!(&outcomes[..], [StreamOutcome::Error { message, .. }] if message == "quota"));
        }
    }

    #[tokio::test]
    async fn test_closure_without_terminal_frame_completes() {
        let (end, outcomes) = run(vec!["data: {\"type\":\"chunk\",\"content\":\"x\"}\n".as_bytes()]).await;
        assert_eq!(end, SessionEnd::Completed);
        assert_eq!(outcomes.last(), Some(&StreamOutcome::Complete));
    }

    #[tokio::test]
    async fn test_error_frame_suppresses_closure_completion() {
        let (end, outcomes) = run(vec![
            "event: error\ndata: upstream model unavailable\n".as_bytes(),
            "data: more\n".as_bytes(),
        ])
        .await;
        assert_eq!(end, SessionEnd::Failed);
        assert_eq!(count_complete(&outcomes), 0);
        assert_eq!(
            outcomes,
            vec![StreamOutcome::Error {
                message: "upstream model unavailable".to_string(),
                code: None,
            }]
        );
    }

    #[tokio::test]
    async fn test_read_error_is_failure() {
        let body = stream::iter(vec![
            Ok(Bytes::from_static(b"data: partial\n")),
            Err(std::io::Error::other("connection reset")),
        ]);
        let token = CancellationToken::new();
        let mut dispatcher = Dispatcher::new(Vec::new());
        let end = drive_stream(body, &token, &mut dispatcher).await;

        assert_eq!(end, SessionEnd::Failed);
        let outcomes = dispatcher.into_sink();
        assert_eq!(outcomes.len(), 2);
        assert!(
            matches!(&outcomes[1], StreamOutcome::Error { message, .. } if message.contains("connection reset"))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_emits_no_terminal() {
        let body = chunks(vec!["data: {\"type\":\"progress\",\"progress\":5}\n".as_bytes()])
            .chain(stream::pending());
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let mut dispatcher = Dispatcher::new(Vec::new());
        let end = drive_stream(body, &token, &mut dispatcher).await;

        assert_eq!(end, SessionEnd::Cancelled);
        let outcomes = dispatcher.into_sink();
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].is_terminal());
    }

    #[tokio::test]
    async fn test_already_cancelled_reads_nothing() {
        let token = CancellationToken::new();
        token.cancel();
        let mut dispatcher = Dispatcher::new(Vec::new());
        let end = drive_stream(chunks(vec![SCENARIO.as_bytes()]), &token, &mut dispatcher).await;
        assert_eq!(end, SessionEnd::Cancelled);
        assert!(dispatcher.into_sink().is_empty());
    }
}

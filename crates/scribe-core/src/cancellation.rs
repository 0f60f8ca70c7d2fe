//! Cancellation support for stream sessions
//!
//! Allows interrupting an in-flight streaming request from any task.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

/// Token installed for one request
#[derive(Debug)]
pub(crate) struct ArmedToken {
    id: u64,
    token: CancellationToken,
}

impl ArmedToken {
    pub(crate) fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[derive(Default)]
struct Slot {
    next_id: AtomicU64,
    current: Mutex<Option<(u64, CancellationToken)>>,
}

/// Cloneable handle that aborts the session's current request
#[derive(Clone, Default)]
pub struct AbortHandle {
    slot: Arc<Slot>,
}

impl AbortHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cancel the in-flight request, if any
    ///
    /// Safe to call repeatedly and after the request has already finished.
    pub fn abort(&self) {
        if let Some((_, token)) = self.slot.current.lock().take() {
            token.cancel();
        }
    }

    /// Whether a request is currently in flight
    pub fn is_active(&self) -> bool {
        self.slot.current.lock().is_some()
    }

    /// Install a fresh token for a new request
    pub(crate) fn arm(&self) -> ArmedToken {
        let id = self.slot.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        *self.slot.current.lock() = Some((id, token.clone()));
        ArmedToken { id, token }
    }

    /// Release the token once its request ended. A newer request's token is
    /// left alone.
    pub(crate) fn disarm(&self, armed: &ArmedToken) {
        let mut current = self.slot.current.lock();
        if current.as_ref().is_some_and(|(id, _)| *id == armed.id) {
            *current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_abort_is_idempotent() {
        let handle = AbortHandle::new();
        let armed = handle.arm();
        assert!(handle.is_active());

        handle.abort();
        handle.abort();
        assert!(armed.token().is_cancelled());
        assert!(!handle.is_active());
    }

    #[test]
    fn test_abort_after_disarm_is_noop() {
        let handle = AbortHandle::new();
        let armed = handle.arm();
        handle.disarm(&armed);
        handle.abort();
        assert!(!armed.token().is_cancelled());
    }

    #[test]
    fn test_disarm_keeps_newer_token() {
        let handle = AbortHandle::new();
        let first = handle.arm();
        let second = handle.arm();
        handle.disarm(&first);
        assert!(handle.is_active());

        handle.abort();
        assert!(second.token().is_cancelled());
        assert!(!first.token().is_cancelled());
    }
}

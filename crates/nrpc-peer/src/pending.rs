use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::error::{PeerError, Result};

type Completion = oneshot::Sender<Result<Value>>;

struct PendingCall {
    completion: Completion,
    created_at: Instant,
}

/// Outstanding local calls keyed by call id.
///
/// Each entry is completed exactly once: by its response, by the timeout
/// sweep, or when the peer shuts down.
#[derive(Default)]
pub struct PendingCalls {
    calls: HashMap<u32, PendingCall>,
}

impl PendingCalls {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a call created now and return the caller's handle.
    pub fn register(&mut self, id: u32) -> PendingReply {
        self.register_at(id, Instant::now())
    }

    pub(crate) fn register_at(&mut self, id: u32, created_at: Instant) -> PendingReply {
        let (completion, rx) = oneshot::channel();
        self.calls.insert(
            id,
            PendingCall {
                completion,
                created_at,
            },
        );
        PendingReply { id, rx }
    }

    /// Complete a call. Returns `false` when the id is unknown (already timed
    /// out, or from a stale session).
    pub fn complete(&mut self, id: u32, result: Result<Value>) -> bool {
        match self.calls.remove(&id) {
            Some(call) => {
                // The caller may have dropped its handle; nothing to do then.
                let _ = call.completion.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop a registration without completing it.
    pub fn forget(&mut self, id: u32) {
        self.calls.remove(&id);
    }

    /// Fail every call at least `timeout` old. Returns the expired ids.
    pub fn sweep(&mut self, now: Instant, timeout: Duration) -> Vec<u32> {
        let expired: Vec<u32> = self
            .calls
            .iter()
            .filter(|(_, call)| now.saturating_duration_since(call.created_at) >= timeout)
            .map(|(id, _)| *id)
            .collect();

        for id in &expired {
            self.complete(*id, Err(PeerError::Timeout(*id)));
        }
        expired
    }

    /// Fail every outstanding call with [`PeerError::Closed`].
    pub fn close_all(&mut self) -> usize {
        let count = self.calls.len();
        for (_, call) in self.calls.drain() {
            let _ = call.completion.send(Err(PeerError::Closed));
        }
        count
    }

    pub fn contains(&self, id: u32) -> bool {
        self.calls.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }
}

/// Handle to one outstanding call; resolves with the response `data`.
#[derive(Debug)]
#[must_use = "a call's result is only observable through its reply handle"]
pub struct PendingReply {
    id: u32,
    rx: oneshot::Receiver<Result<Value>>,
}

impl PendingReply {
    /// The call id carried on the wire.
    pub fn id(&self) -> u32 {
        self.id
    }
}

impl Future for PendingReply {
    type Output = Result<Value>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(PeerError::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}

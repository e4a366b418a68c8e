//! Response watching for the target usage endpoint.
//!
//! The watcher is installed on the session before any navigation begins and
//! stays active across every navigation within it. Matching is a plain URL
//! prefix test; the first matching response wins the capture slot and every
//! later match is ignored, so a session produces at most one outcome.

use std::sync::Mutex;

use thiserror::Error;
use tokio::sync::oneshot;

use crate::types::UsagePayload;

/// Why a matching response could not be turned into a payload.
#[derive(Debug, Error)]
pub enum PayloadError {
    #[error("usage response body is not valid JSON: {source}")]
    Malformed {
        #[source]
        source: serde_json::Error,
    },
    #[error("usage response body could not be read: {reason}")]
    BodyUnavailable { reason: String },
}

/// Outcome delivered through the capture slot.
pub type CaptureOutcome = Result<UsagePayload, PayloadError>;

/// Detects the response carrying the usage document.
#[derive(Debug, Clone)]
pub struct ResponseWatcher {
    endpoint_prefix: String,
}

impl ResponseWatcher {
    pub fn new(endpoint_prefix: impl Into<String>) -> Self {
        Self {
            endpoint_prefix: endpoint_prefix.into(),
        }
    }

    pub fn endpoint_prefix(&self) -> &str {
        &self.endpoint_prefix
    }

    /// Whether a response's originating request URL is the usage endpoint.
    pub fn matches(&self, url: &str) -> bool {
        url.starts_with(&self.endpoint_prefix)
    }

    /// Parse a matching response body as structured data.
    pub fn parse(&self, body: &[u8]) -> CaptureOutcome {
        serde_json::from_slice(body)
            .map(UsagePayload::new)
            .map_err(|source| PayloadError::Malformed { source })
    }
}

/// One-shot delivery slot for the captured payload.
///
/// `complete` consumes the inner sender on first use; later calls find the
/// slot taken and report `false`. Parse failures also take the slot: the
/// response was observed, so the session has nothing further to wait for.
#[derive(Debug)]
pub struct CaptureSlot {
    sender: Mutex<Option<oneshot::Sender<CaptureOutcome>>>,
}

impl CaptureSlot {
    /// Create a slot and the receiving half the extractor awaits.
    pub fn new() -> (Self, oneshot::Receiver<CaptureOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                sender: Mutex::new(Some(tx)),
            },
            rx,
        )
    }

    /// Deliver an outcome. Returns `true` if this call won the slot and the
    /// receiver was still listening.
    pub fn complete(&self, outcome: CaptureOutcome) -> bool {
        let sender = match self.sender.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }

    /// Whether a capture has already been delivered (or attempted).
    pub fn is_taken(&self) -> bool {
        match self.sender.lock() {
            Ok(guard) => guard.is_none(),
            Err(_) => true,
        }
    }
}

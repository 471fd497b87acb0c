use std::time::Duration;

use minrpc_common::ResponseMetadata;
use tokio::time::Instant;

/// Per-call context: an optional deadline that bounds the whole call
/// (pool acquisition included), and the response metadata the server
/// sent back, filled in when the call returns.
#[derive(Clone, Debug, Default)]
pub struct ClientContext {
    deadline: Option<Instant>,
    pub metadata: Option<ResponseMetadata>,
}

impl ClientContext {
    /// A context with no deadline.
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            deadline: Some(Instant::now() + timeout),
            metadata: None,
        }
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Self {
            deadline: Some(deadline),
            metadata: None,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

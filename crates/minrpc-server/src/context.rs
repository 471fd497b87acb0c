use minrpc_common::RequestMetadata;
use tokio::time::Instant;

/// Per-call context handed to every handler: the call's deadline, if the
/// caller set one, and the request metadata as it arrived (with
/// `client_addr` stamped by the server).
///
/// The dispatcher enforces the deadline regardless; a handler that wants
/// to stop early observes it through [`remaining`](Self::remaining) or
/// [`expired`](Self::expired).
#[derive(Clone, Debug)]
pub struct ServerContext {
    deadline: Option<Instant>,
    pub metadata: RequestMetadata,
}

impl ServerContext {
    pub fn new(deadline: Option<Instant>, metadata: RequestMetadata) -> Self {
        Self { deadline, metadata }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when the call has none.
    pub fn remaining(&self) -> Option<std::time::Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.remaining(), Some(rem) if rem.is_zero())
    }
}

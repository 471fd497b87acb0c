//! The call path.
//!
//! A call marshals the user request into the envelope, waits for a free
//! connection (racing the closed signal and the caller's deadline),
//! runs one strictly serial frame round trip over the socket and
//! decodes the typed response. Any transport fault discards the
//! connection and requests a replacement; the call itself is never
//! retried.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use minrpc_common::recorder::{CallRecord, Direction, Recorder, RingHandle};
use minrpc_common::transport::{read_frame, write_frame};
use minrpc_common::{fault, Error, Request, RequestMetadata, Response, Result};
use prost::Message;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tracing::{error, info};

use crate::context::ClientContext;
use crate::pool::{ClientOptions, ConnPool, ConnStats};

/// How long past the caller's deadline the socket keeps listening. The
/// server enforces the deadline too, but its clock starts after
/// transit; the grace lets its timeout verdict arrive instead of being
/// preempted by a local I/O cutoff.
const DEADLINE_GRACE: std::time::Duration = std::time::Duration::from_millis(100);

pub struct Client {
    service_name: String,
    job_name: String,
    pool: ConnPool,
    recorder: Recorder,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("service_name", &self.service_name)
            .field("job_name", &self.job_name)
            .finish()
    }
}

impl Client {
    /// Validates the options, starts the reconnect loop and the egress
    /// recorder. The pool fills in the background; calls issued before
    /// the first dial completes simply wait for a free connection.
    pub fn new(options: ClientOptions, binary_log_dir: Option<&Path>) -> Result<Self> {
        options.validate()?;
        let recorder = Recorder::spawn(&options.service_name, Direction::Egress, binary_log_dir);
        let pool = ConnPool::start(&options);
        Ok(Self {
            service_name: options.service_name,
            job_name: std::env::args().next().unwrap_or_else(|| "unknown".to_string()),
            pool,
            recorder,
        })
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// Issues one call.
    ///
    /// `None` for the request sends no payload; the remote handler sees
    /// no typed request. A `None` result means the handler returned no
    /// response, which is not an error. An `Err` carries the remote
    /// error string verbatim when the failure was the handler's, and a
    /// `[RPC_ERROR] `-prefixed diagnostic when it was the framework's.
    pub async fn call<Req, Resp>(
        &self,
        method: &str,
        ctx: &mut ClientContext,
        request: Option<&Req>,
    ) -> Result<Option<Resp>>
    where
        Req: Message,
        Resp: Message + Default,
    {
        let envelope = Request {
            metadata: Some(RequestMetadata {
                client_job_name: Some(self.job_name.clone()),
                client_request_id: Some(next_request_id()),
                service_name: Some(self.service_name.clone()),
                method_name: Some(method.to_string()),
                timeout_us: ctx
                    .deadline()
                    .map(|d| d.saturating_duration_since(Instant::now()).as_micros() as i64),
                client_addr: None,
            }),
            request_pb: request.map(Message::encode_to_vec),
        };
        let request_payload = envelope.encode_to_vec();
        let request_size = (request_payload.len() as u32).to_be_bytes();

        let mut entry = self.pool.acquire(ctx.deadline()).await?;

        let exchange = round_trip(&mut entry.stream, &request_payload);
        let outcome = match ctx.deadline() {
            Some(at) => match tokio::time::timeout_at(at + DEADLINE_GRACE, exchange).await {
                Ok(outcome) => outcome,
                Err(_) => Err(fault!("round trip did not finish before the deadline")),
            },
            None => exchange.await,
        };

        let response_payload = match outcome {
            Ok(payload) => payload,
            Err(e) => {
                error!(
                    endpoint = %entry.local_endpoint,
                    error = %e,
                    "call failed, connection discarded"
                );
                self.pool.discard(entry).await;
                return Err(e);
            }
        };
        self.pool.release(entry).await;

        let mut response_frame = Vec::with_capacity(4 + response_payload.len());
        response_frame.extend_from_slice(&(response_payload.len() as u32).to_be_bytes());
        response_frame.extend_from_slice(&response_payload);
        self.recorder.publish(CallRecord::new(
            request_size.to_vec(),
            request_payload,
            response_frame,
        ));

        let response = Response::decode(response_payload.as_slice())
            .map_err(|e| fault!("Failed to unmarshal RPC response: {e}"))?;
        ctx.metadata = response.metadata;

        if let Some(error) = response.error {
            return Err(Error::Remote(error));
        }
        match response.response_pb {
            None => Ok(None),
            Some(payload) if payload.is_empty() => Ok(None),
            Some(payload) => {
                let typed = Resp::decode(payload.as_slice())
                    .map_err(|e| fault!("Failed to unmarshal method response: {e}"))?;
                Ok(Some(typed))
            }
        }
    }

    /// Snapshot of the live connections, for diagnostics.
    pub fn stats(&self) -> Vec<ConnStats> {
        self.pool.stats()
    }

    /// The last 64 completed calls, oldest first.
    pub fn recent_calls(&self) -> Vec<CallRecord> {
        self.recorder.recent()
    }

    pub fn ring_handle(&self) -> RingHandle {
        self.recorder.ring_handle()
    }

    /// Shuts the pool down, then the recorder. Idempotent. Calls racing
    /// the close observe it at their next suspension point and fail
    /// with a client-closed error.
    pub async fn close(&self) {
        self.pool.close().await;
        self.recorder.close().await;
        info!(service = %self.service_name, "client is closed");
    }
}

/// One serial request/response exchange. Both failure directions leave
/// the socket in an unknown state, so the caller discards it on error.
async fn round_trip(stream: &mut TcpStream, request_payload: &[u8]) -> Result<Vec<u8>> {
    write_frame(stream, request_payload)
        .await
        .map_err(|e| fault!("{e}"))?;
    let response_payload = read_frame(stream).await.map_err(|e| fault!("{e}"))?;
    Ok(response_payload)
}

fn next_request_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{nanos:x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::RetryPolicy;
    use std::time::Duration;

    fn options(addr: &str) -> ClientOptions {
        ClientOptions::new("Hello", addr).retry(RetryPolicy {
            sleep: Duration::from_millis(10),
            backoff: 2.0,
            max_sleep: Duration::from_millis(100),
        })
    }

    #[test]
    fn construction_rejects_invalid_options() {
        let err = Client::new(options("localhost:1").pool_size(0), None).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn call_after_close_fails_fast() {
        let client = Client::new(options("127.0.0.1:1"), None).unwrap();
        client.close().await;

        let err = client
            .call::<Request, Response>("Say", &mut ClientContext::background(), None)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "[RPC_ERROR] Client is closed");
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let client = Client::new(options("127.0.0.1:1"), None).unwrap();
        client.close().await;
        client.close().await;
    }
}

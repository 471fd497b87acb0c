//! TCP accept loop and per-connection serving.
//!
//! Each accepted connection gets its own task running a strictly serial
//! read/dispatch/write loop; one outstanding request per socket. The
//! task exits, closing the connection, on the first I/O or framing
//! error. Accept errors are logged and never fatal to the listener.

use std::collections::HashMap;
use std::sync::Arc;

use minrpc_common::protocol::error::tagged;
use minrpc_common::recorder::CallRecord;
use minrpc_common::transport::{read_frame, write_frame};
use minrpc_common::{Error, Request, Response, Result};
use prost::Message;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::dispatch::dispatch;
use crate::registry::Service;

pub type ServiceMap = Arc<HashMap<String, Arc<Service>>>;

/// A bound listener, not yet serving. Splitting bind from run lets
/// callers bind port 0 and learn the kernel-assigned port.
pub struct RpcServer {
    listener: TcpListener,
}

impl RpcServer {
    pub async fn bind(port: u16) -> Result<Self> {
        let listener = TcpListener::bind(("0.0.0.0", port)).await?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Runs the accept loop forever. Rejects an empty service map;
    /// otherwise only listener-level failures are unrecoverable.
    pub async fn run(self, services: ServiceMap) -> Result<()> {
        if services.is_empty() {
            return Err(Error::config("no service to serve"));
        }
        info!(addr = %self.local_addr()?, "start listening");

        loop {
            let (stream, peer) = match self.listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "TCP accept failed");
                    continue;
                }
            };
            debug!(%peer, "connection established");
            let services = Arc::clone(&services);
            tokio::spawn(async move {
                handle_conn(stream, services).await;
                debug!(%peer, "connection closed");
            });
        }
    }
}

/// Read/dispatch/write loop for one connection. Returning closes the
/// socket.
async fn handle_conn(mut stream: TcpStream, services: ServiceMap) {
    let peer = match stream.peer_addr() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            error!(error = %e, "failed to resolve peer address");
            return;
        }
    };

    loop {
        let request_payload = match read_frame(&mut stream).await {
            Ok(payload) => payload,
            Err(e) if e.is_disconnect() => {
                debug!(%peer, "connection closed by peer");
                return;
            }
            Err(e) => {
                error!(%peer, error = %e, "failed to read request");
                return;
            }
        };

        let served = serve_request(&services, &request_payload, &peer).await;
        let response_payload = served.response.encode_to_vec();
        if let Err(e) = write_frame(&mut stream, &response_payload).await {
            error!(%peer, error = %e, "failed to write response");
            return;
        }

        if let Some(service) = served.service {
            let request_size = (request_payload.len() as u32).to_be_bytes().to_vec();
            let mut response_frame = Vec::with_capacity(4 + response_payload.len());
            response_frame.extend_from_slice(&(response_payload.len() as u32).to_be_bytes());
            response_frame.extend_from_slice(&response_payload);
            service.recorder().publish(CallRecord::new(
                request_size,
                request_payload,
                response_frame,
            ));
        }
        if served.hang_up {
            return;
        }
    }
}

/// Outcome of serving one frame. `service` is set when the request was
/// dispatched, so the caller can publish the round trip to its
/// recorder. `hang_up` is set when the byte stream itself is suspect;
/// the error response still goes out first.
struct Served {
    response: Response,
    service: Option<Arc<Service>>,
    hang_up: bool,
}

impl Served {
    fn reject(error: String, hang_up: bool) -> Self {
        Self {
            response: Response {
                error: Some(error),
                ..Default::default()
            },
            service: None,
            hang_up,
        }
    }
}

/// Decodes the envelope, stamps the client address and routes to the
/// named service.
///
/// A payload that fails to decode condemns the connection: framing
/// succeeded but the envelope did not, so everything after it is
/// suspect. A well-formed envelope naming an unknown destination only
/// fails the one request.
async fn serve_request(services: &ServiceMap, request_payload: &[u8], peer: &str) -> Served {
    let mut request = match Request::decode(request_payload) {
        Ok(request) => request,
        Err(e) => {
            return Served::reject(tagged(format!("Failed to unmarshal request: {e}")), true);
        }
    };

    let Some(metadata) = request.metadata.as_mut() else {
        return Served::reject(tagged("Request is missing metadata"), true);
    };
    metadata.client_addr = Some(peer.to_string());

    let Some(service_name) = metadata.service_name.clone() else {
        return Served::reject(tagged("Request.Metadata is missing service_name"), false);
    };
    let Some(service) = services.get(&service_name) else {
        return Served::reject(tagged(format!("Service '{service_name}' is not found")), false);
    };

    Served {
        response: dispatch(service, &request).await,
        service: Some(Arc::clone(service)),
        hang_up: false,
    }
}

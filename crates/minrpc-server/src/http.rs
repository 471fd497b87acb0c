//! Minimal HTTP multiplexer for diagnostics.
//!
//! One exact-match path table served over HTTP/1.1. This is not a web
//! framework; it exists so the controller has somewhere to mount the
//! `/rpcs` endpoint and operators have somewhere to point curl.

use std::collections::HashMap;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::registry::BoxFuture;
use minrpc_common::Result;

type Handler =
    Arc<dyn Fn(Request<Incoming>) -> BoxFuture<Response<Full<Bytes>>> + Send + Sync>;

/// Exact-path HTTP multiplexer. Routes are registered before serving;
/// unknown paths get a plain 404.
#[derive(Default)]
pub struct HttpMux {
    routes: HashMap<String, Handler>,
}

impl HttpMux {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn handle<F, Fut>(&mut self, path: impl Into<String>, handler: F)
    where
        F: Fn(Request<Incoming>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Response<Full<Bytes>>> + Send + 'static,
    {
        let handler: Handler = Arc::new(move |req| Box::pin(handler(req)));
        self.routes.insert(path.into(), handler);
    }

    /// Binds and serves forever. Accept and connection errors are
    /// logged, never fatal.
    pub async fn serve(self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve_on(listener).await
    }

    /// Serves on an already-bound listener.
    pub async fn serve_on(self, listener: TcpListener) -> Result<()> {
        info!(addr = %listener.local_addr()?, "diagnostic HTTP listening");
        let routes = Arc::new(self.routes);

        loop {
            let (stream, _) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!(error = %e, "HTTP accept failed");
                    continue;
                }
            };
            let routes = Arc::clone(&routes);
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req: Request<Incoming>| {
                    let routes = Arc::clone(&routes);
                    async move {
                        let response = match routes.get(req.uri().path()) {
                            Some(handler) => handler(req).await,
                            None => not_found(),
                        };
                        Ok::<_, Infallible>(response)
                    }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    debug!(error = %e, "HTTP connection error");
                }
            });
        }
    }
}

fn not_found() -> Response<Full<Bytes>> {
    Response::builder()
        .status(StatusCode::NOT_FOUND)
        .body(Full::new(Bytes::from_static(b"not found")))
        .expect("static response")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn get(addr: SocketAddr, path: &str) -> String {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut body = String::new();
        stream.read_to_string(&mut body).await.unwrap();
        body
    }

    #[tokio::test]
    async fn routes_and_404s() {
        let mut mux = HttpMux::new();
        mux.handle("/ping", |_req| async {
            Response::new(Full::new(Bytes::from_static(b"pong")))
        });

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(mux.serve_on(listener));

        let ok = get(addr, "/ping").await;
        assert!(ok.contains("200"));
        assert!(ok.ends_with("pong"));

        let missing = get(addr, "/nope").await;
        assert!(missing.contains("404"));
    }
}

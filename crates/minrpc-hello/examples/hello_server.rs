//! Serves the Hello service.
//!
//! ```bash
//! cargo run --example hello_server -- --port 9090 --log-dir /tmp/minrpc
//! RUST_LOG=debug cargo run --example hello_server -- --http 127.0.0.1:9091
//! ```

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use argh::FromArgs;
use async_trait::async_trait;
use minrpc::{AppError, Config, Controller, HttpMux, ServerContext};
use minrpc_hello::{
    hello_service, HelloHandler, SayRequest, SayResponse, SingRequest, SingResponse,
    SleepyRequest, SleepyResponse,
};
use tracing::info;

#[derive(FromArgs)]
/// Hello service server.
struct Args {
    /// TCP port to serve RPCs on
    #[argh(option, short = 'p', default = "9090")]
    port: u16,

    /// directory for binary traffic logs (omit to disable)
    #[argh(option)]
    log_dir: Option<PathBuf>,

    /// address for the diagnostic HTTP endpoint (omit to disable)
    #[argh(option)]
    http: Option<SocketAddr>,
}

struct Greeter;

#[async_trait]
impl HelloHandler for Greeter {
    async fn say(
        &self,
        ctx: ServerContext,
        request: Option<SayRequest>,
    ) -> Result<Option<SayResponse>, AppError> {
        let Some(request) = request else {
            info!("received nil say request");
            return Ok(None);
        };
        info!(metadata = ?ctx.metadata, "say request");
        let Some(body) = request.body else {
            return Err("Missing body".into());
        };
        Ok(Some(SayResponse {
            msg: Some(format!("Say received body:{body:?}")),
        }))
    }

    async fn sing(
        &self,
        ctx: ServerContext,
        request: Option<SingRequest>,
    ) -> Result<Option<SingResponse>, AppError> {
        let Some(request) = request else {
            info!("received nil sing request");
            return Ok(None);
        };
        info!(metadata = ?ctx.metadata, "sing request");
        let Some(body) = request.body else {
            return Err("Missing body".into());
        };
        Ok(Some(SingResponse {
            msg: Some(format!("Sing received body:{body:?}")),
        }))
    }

    async fn sleepy(
        &self,
        _ctx: ServerContext,
        request: Option<SleepyRequest>,
    ) -> Result<Option<SleepyResponse>, AppError> {
        let millis = request.and_then(|r| r.millis).unwrap_or(0).max(0) as u64;
        tokio::time::sleep(Duration::from_millis(millis)).await;
        Ok(Some(SleepyResponse {
            msg: Some(format!("slept {millis}ms")),
        }))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Args = argh::from_env();

    let controller = Controller::new(Config {
        binary_log_dir: args.log_dir,
        services: vec![hello_service(Arc::new(Greeter))],
    })?;

    if let Some(addr) = args.http {
        let mut mux = HttpMux::new();
        controller.register_introspection(&mut mux);
        tokio::spawn(mux.serve(addr));
    }

    controller.serve(args.port).await?;
    Ok(())
}

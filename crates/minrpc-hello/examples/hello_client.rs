//! Exercises the Hello service through the typed stub.
//!
//! ```bash
//! cargo run --example hello_client -- --addr localhost:9090 --pool-size 5
//! ```

use std::path::PathBuf;
use std::time::Duration;

use argh::FromArgs;
use minrpc::{ClientContext, ClientOptions, Config, Controller};
use minrpc_hello::{HelloClient, SayRequest, SingRequest, SleepyRequest};
use tracing::{error, info};

#[derive(FromArgs)]
/// Hello service client.
struct Args {
    /// server address
    #[argh(option, default = "String::from(\"localhost:9090\")")]
    addr: String,

    /// connection pool size
    #[argh(option, default = "5")]
    pool_size: usize,

    /// per-call timeout in milliseconds
    #[argh(option, default = "1000")]
    timeout_ms: u64,

    /// directory for binary traffic logs (omit to disable)
    #[argh(option)]
    log_dir: Option<PathBuf>,
}

async fn run_say(client: &HelloClient, timeout: Duration, request: Option<&SayRequest>) {
    let mut ctx = ClientContext::with_timeout(timeout);
    match client.say(&mut ctx, request).await {
        Err(e) => error!(error = %e, "say failed"),
        Ok(None) => info!("say returned no response"),
        Ok(Some(response)) => info!(msg = ?response.msg, "say returned"),
    }
}

async fn run_sing(client: &HelloClient, timeout: Duration, request: Option<&SingRequest>) {
    let mut ctx = ClientContext::with_timeout(timeout);
    match client.sing(&mut ctx, request).await {
        Err(e) => error!(error = %e, "sing failed"),
        Ok(None) => info!("sing returned no response"),
        Ok(Some(response)) => info!(msg = ?response.msg, "sing returned"),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    let args: Args = argh::from_env();
    let timeout = Duration::from_millis(args.timeout_ms);

    let controller = Controller::new(Config {
        binary_log_dir: args.log_dir,
        services: Vec::new(),
    })?;
    let client = HelloClient::new(
        &controller,
        ClientOptions::new(minrpc_hello::SERVICE_NAME, args.addr).pool_size(args.pool_size),
    )?;

    run_say(&client, timeout, None).await;
    run_say(&client, timeout, Some(&SayRequest { body: None })).await;
    run_say(
        &client,
        timeout,
        Some(&SayRequest {
            body: Some("say body".into()),
        }),
    )
    .await;

    run_sing(&client, timeout, None).await;
    run_sing(&client, timeout, Some(&SingRequest { body: None })).await;
    run_sing(
        &client,
        timeout,
        Some(&SingRequest {
            body: Some("sing body".into()),
        }),
    )
    .await;

    // Push the handler past the call deadline on purpose.
    let mut ctx = ClientContext::with_timeout(Duration::from_millis(100));
    match client
        .sleepy(&mut ctx, Some(&SleepyRequest { millis: Some(2000) }))
        .await
    {
        Err(e) => info!(error = %e, "sleepy timed out as expected"),
        Ok(response) => info!(?response, "sleepy returned"),
    }

    client.close().await;
    Ok(())
}

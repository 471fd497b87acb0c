//! Client integration tests against an in-process server.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use minrpc_client::{Client, ClientContext, ClientOptions, RetryPolicy};
use minrpc_server::registry::AppError;
use minrpc_server::{RpcServer, Service, ServiceBuilder};

#[derive(Clone, PartialEq, ::prost::Message)]
struct EchoRequest {
    #[prost(string, optional, tag = "1")]
    body: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
struct EchoResponse {
    #[prost(string, optional, tag = "1")]
    msg: Option<String>,
}

fn echo_services() -> minrpc_server::server::ServiceMap {
    let def = ServiceBuilder::new("Hello")
        .method("Say", |_ctx, req: Option<EchoRequest>| async move {
            let Some(req) = req else {
                return Ok::<Option<EchoResponse>, AppError>(None);
            };
            match req.body {
                None => Err("Missing body".into()),
                Some(body) => Ok(Some(EchoResponse {
                    msg: Some(format!("Say received body:{body:?}")),
                })),
            }
        })
        .method("Sleepy", |_ctx, _req: Option<EchoRequest>| async move {
            tokio::time::sleep(Duration::from_secs(2)).await;
            Ok::<Option<EchoResponse>, AppError>(None)
        })
        .build();
    let mut map = HashMap::new();
    map.insert("Hello".to_string(), Arc::new(Service::activate(def, None)));
    Arc::new(map)
}

/// Runs a server on its own runtime so a test can kill every task it
/// owns, per-connection handlers included.
struct ServerGuard {
    runtime: Option<tokio::runtime::Runtime>,
    port: u16,
}

impl ServerGuard {
    fn start(port: u16) -> Self {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (port_tx, port_rx) = std::sync::mpsc::channel();
        runtime.spawn(async move {
            let server = RpcServer::bind(port).await.unwrap();
            port_tx
                .send(server.local_addr().unwrap().port())
                .unwrap();
            let _ = server.run(echo_services()).await;
        });
        let port = port_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        Self {
            runtime: Some(runtime),
            port,
        }
    }

    fn addr(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    fn kill(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        self.kill();
    }
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        sleep: Duration::from_millis(20),
        backoff: 1.5,
        max_sleep: Duration::from_millis(200),
    }
}

fn client_for(addr: &str, pool_size: usize) -> Client {
    Client::new(
        ClientOptions::new("Hello", addr)
            .pool_size(pool_size)
            .retry(fast_retry()),
        None,
    )
    .unwrap()
}

async fn say(client: &Client, body: &str) -> minrpc_common::Result<Option<EchoResponse>> {
    let mut ctx = ClientContext::with_timeout(Duration::from_secs(1));
    client
        .call::<EchoRequest, EchoResponse>(
            "Say",
            &mut ctx,
            Some(&EchoRequest {
                body: Some(body.to_string()),
            }),
        )
        .await
}

#[tokio::test]
async fn echo_with_metadata() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 5);

    let mut ctx = ClientContext::with_timeout(Duration::from_secs(1));
    let response = client
        .call::<EchoRequest, EchoResponse>(
            "Say",
            &mut ctx,
            Some(&EchoRequest {
                body: Some("hi".into()),
            }),
        )
        .await
        .unwrap()
        .unwrap();

    assert_eq!(response.msg.as_deref(), Some("Say received body:\"hi\""));
    let metadata = ctx.metadata.expect("server fills response metadata");
    assert_eq!(metadata.service_name.as_deref(), Some("Hello"));
    assert_eq!(metadata.method_name.as_deref(), Some("Say"));
    client.close().await;
}

#[tokio::test]
async fn nil_request_nil_response() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 2);

    let mut ctx = ClientContext::with_timeout(Duration::from_secs(1));
    let response = client
        .call::<EchoRequest, EchoResponse>("Say", &mut ctx, None)
        .await
        .unwrap();
    assert!(response.is_none());
    client.close().await;
}

#[tokio::test]
async fn application_error_passes_through_verbatim() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 1);

    let mut ctx = ClientContext::with_timeout(Duration::from_secs(1));
    let err = client
        .call::<EchoRequest, EchoResponse>(
            "Say",
            &mut ctx,
            Some(&EchoRequest { body: None }),
        )
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Missing body");
    assert!(!err.is_framework());
    client.close().await;
}

#[tokio::test]
async fn unknown_service_is_a_framework_error() {
    let server = ServerGuard::start(0);
    let client = Client::new(
        ClientOptions::new("Nope", server.addr()).retry(fast_retry()),
        None,
    )
    .unwrap();

    let mut ctx = ClientContext::with_timeout(Duration::from_secs(1));
    let err = client
        .call::<EchoRequest, EchoResponse>("Say", &mut ctx, None)
        .await
        .unwrap_err();
    assert!(err
        .to_string()
        .starts_with("[RPC_ERROR] Service 'Nope' is not found"));
    assert!(err.is_framework());
    client.close().await;
}

#[tokio::test]
async fn handler_timeout_reports_the_dispatcher_verdict() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 1);

    // Let the pool establish before timing the call.
    say(&client, "warm up").await.unwrap();

    let started = std::time::Instant::now();
    let mut ctx = ClientContext::with_timeout(Duration::from_millis(100));
    let err = client
        .call::<EchoRequest, EchoResponse>("Sleepy", &mut ctx, None)
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(
        err.to_string()
            .starts_with("[RPC_ERROR] Method 'Hello.Sleepy' timed out"),
        "got: {err}"
    );
    assert!(elapsed <= Duration::from_millis(300), "took {elapsed:?}");
    client.close().await;
}

#[tokio::test]
async fn pool_size_one_recycles_a_single_connection() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 1);

    say(&client, "first").await.unwrap();
    let before = client.stats();
    assert_eq!(before.len(), 1);

    for i in 0..99 {
        say(&client, &format!("call {i}")).await.unwrap();
    }

    let after = client.stats();
    assert_eq!(after.len(), 1);
    assert_eq!(after[0].local_endpoint, before[0].local_endpoint);
    assert_eq!(after[0].connected_since, before[0].connected_since);
    client.close().await;
}

#[tokio::test]
async fn concurrent_calls_share_the_pool() {
    let server = ServerGuard::start(0);
    let client = Arc::new(client_for(&server.addr(), 3));

    let mut tasks = Vec::new();
    for i in 0..30 {
        let client = Arc::clone(&client);
        tasks.push(tokio::spawn(async move {
            say(&client, &format!("c{i}")).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    // Never more sockets than the pool size.
    assert!(client.stats().len() <= 3);
    client.close().await;
}

#[tokio::test]
async fn server_crash_recovery() {
    let mut server = ServerGuard::start(0);
    let port = server.port;
    let client = client_for(&server.addr(), 3);

    say(&client, "before crash").await.unwrap();
    server.kill();

    // Pooled connections are dead; in the worst case a call consumes
    // one stale connection per attempt before failing.
    let mut failures = 0;
    for _ in 0..4 {
        if say(&client, "during outage").await.is_err() {
            failures += 1;
        }
    }
    assert!(failures > 0);

    let _server = ServerGuard::start(port);
    let mut recovered = false;
    for _ in 0..50 {
        if say(&client, "after restart").await.is_ok() {
            recovered = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert!(recovered, "pool never recovered after restart");

    // The reconnect loop refills the pool to its configured size.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.stats().len(), 3);
    client.close().await;
}

#[tokio::test]
async fn close_shuts_all_sockets_and_fails_later_calls() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 3);

    say(&client, "hello").await.unwrap();
    client.close().await;
    assert!(client.stats().is_empty());

    let err = say(&client, "too late").await.unwrap_err();
    assert_eq!(err.to_string(), "[RPC_ERROR] Client is closed");
}

#[tokio::test]
async fn egress_binary_log_is_written() {
    let server = ServerGuard::start(0);
    let dir = tempfile::tempdir().unwrap();
    let client = Client::new(
        ClientOptions::new("Hello", server.addr())
            .pool_size(1)
            .retry(fast_retry()),
        Some(dir.path()),
    )
    .unwrap();

    say(&client, "logged").await.unwrap();
    client.close().await;

    let logs: Vec<_> = std::fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap())
        .collect();
    assert_eq!(logs.len(), 1);
    let name = logs[0].file_name().into_string().unwrap();
    assert!(name.starts_with("Hello-egress-"));
    assert!(logs[0].metadata().unwrap().len() > 0);
}

#[tokio::test]
async fn egress_recorder_sees_completed_calls() {
    let server = ServerGuard::start(0);
    let client = client_for(&server.addr(), 1);

    for i in 0..5 {
        say(&client, &format!("r{i}")).await.unwrap();
    }
    // Publication is asynchronous.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let recent = client.recent_calls();
    assert_eq!(recent.len(), 5);
    for record in &recent {
        assert_eq!(record.request_size.len(), 4);
        let advertised = u32::from_be_bytes(record.request_size[..4].try_into().unwrap());
        assert_eq!(advertised as usize, record.request.len());
    }
    client.close().await;
}

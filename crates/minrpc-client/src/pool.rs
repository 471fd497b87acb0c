//! Connection pool.
//!
//! Ownership of a connection transfers through the `free_conns`
//! channel: an entry is either queued there or held by exactly one
//! in-flight call, never both. The `reconnect` channel carries one
//! token per missing connection; the connect loop consumes tokens and
//! dials with capped exponential backoff, so
//! `entries + pending tokens == pool size` holds eventually.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, RwLock as StdRwLock};
use std::time::Duration;

use minrpc_common::{fault, Error, Result};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info};

/// Dial retry schedule: first retry after `sleep`, multiplied by
/// `backoff` per failure, capped at `max_sleep`. The schedule resets for
/// each new missing connection.
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    pub sleep: Duration,
    pub backoff: f64,
    pub max_sleep: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            sleep: Duration::from_secs(15),
            backoff: 1.3,
            max_sleep: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    /// Service to address on the remote controller.
    pub service_name: String,
    /// `host:port` of the remote controller.
    pub service_addr: String,
    /// Number of connections kept open. Also the call concurrency
    /// ceiling, since each connection carries one call at a time.
    pub conn_pool_size: usize,
    pub retry: RetryPolicy,
}

impl ClientOptions {
    pub fn new(service_name: impl Into<String>, service_addr: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            service_addr: service_addr.into(),
            conn_pool_size: 1,
            retry: RetryPolicy::default(),
        }
    }

    pub fn pool_size(mut self, size: usize) -> Self {
        self.conn_pool_size = size;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if self.conn_pool_size == 0 {
            return Err(Error::config("conn_pool_size must be > 0"));
        }
        if self.retry.sleep.is_zero() {
            return Err(Error::config("retry.sleep must be > 0"));
        }
        if self.retry.backoff <= 1.0 {
            return Err(Error::config("retry.backoff must be > 1.0"));
        }
        if self.retry.max_sleep < self.retry.sleep {
            return Err(Error::config("retry.max_sleep must be >= retry.sleep"));
        }
        Ok(())
    }
}

/// One pooled connection. Moves wholesale through the free channel;
/// whoever holds it owns the socket.
#[derive(Debug)]
pub(crate) struct ConnEntry {
    pub stream: TcpStream,
    pub local_endpoint: String,
}

/// Diagnostic snapshot of one live connection.
#[derive(Clone, Debug)]
pub struct ConnStats {
    pub local_endpoint: String,
    pub connected_since: Instant,
    pub idle_since: Instant,
}

pub(crate) struct ConnPool {
    service_addr: String,
    entries: Arc<StdRwLock<HashMap<String, ConnStats>>>,
    free_tx: mpsc::Sender<ConnEntry>,
    free_rx: Mutex<mpsc::Receiver<ConnEntry>>,
    reconnect_tx: mpsc::Sender<()>,
    closed_tx: watch::Sender<bool>,
    closed_rx: watch::Receiver<bool>,
    connect_loop: StdMutex<Option<JoinHandle<()>>>,
}

impl ConnPool {
    /// Seeds one reconnect token per slot and starts the connect loop.
    pub fn start(opts: &ClientOptions) -> Self {
        let (free_tx, free_rx) = mpsc::channel(opts.conn_pool_size);
        let (reconnect_tx, reconnect_rx) = mpsc::channel(opts.conn_pool_size);
        let (closed_tx, closed_rx) = watch::channel(false);
        let entries = Arc::new(StdRwLock::new(HashMap::new()));

        for _ in 0..opts.conn_pool_size {
            reconnect_tx
                .try_send(())
                .expect("seeding tokens within channel capacity");
        }

        let connect_loop = tokio::spawn(connect_loop(
            opts.service_addr.clone(),
            opts.retry.clone(),
            Arc::clone(&entries),
            free_tx.clone(),
            reconnect_rx,
            closed_rx.clone(),
        ));

        Self {
            service_addr: opts.service_addr.clone(),
            entries,
            free_tx,
            free_rx: Mutex::new(free_rx),
            reconnect_tx,
            closed_tx,
            closed_rx,
            connect_loop: StdMutex::new(Some(connect_loop)),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed_rx.borrow()
    }

    /// Waits for a free connection, racing the closed signal and the
    /// caller's deadline.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<ConnEntry> {
        let mut closed_rx = self.closed_rx.clone();
        if *closed_rx.borrow() {
            return Err(fault!("Client is closed"));
        }
        tokio::select! {
            _ = closed_rx.changed() => Err(fault!("Client is closed")),
            _ = wait_for(deadline) => Err(fault!("context deadline exceeded")),
            entry = async { self.free_rx.lock().await.recv().await } => {
                entry.ok_or_else(|| fault!("Client is closed"))
            }
        }
    }

    /// Returns a healthy connection to the free queue. If the client
    /// closed while the call was in flight, the connection is shut down
    /// instead.
    pub async fn release(&self, mut entry: ConnEntry) {
        if self.is_closed() {
            let _ = entry.stream.shutdown().await;
            self.entries
                .write()
                .expect("pool entries lock")
                .remove(&entry.local_endpoint);
            return;
        }

        if let Some(stats) = self
            .entries
            .write()
            .expect("pool entries lock")
            .get_mut(&entry.local_endpoint)
        {
            stats.idle_since = Instant::now();
        }
        if let Err(returned) = self.free_tx.try_send(entry) {
            // The queue is sized to the pool; overflow means a lost
            // close somewhere. Drop the connection instead of blocking.
            let mut entry = returned.into_inner();
            let _ = entry.stream.shutdown().await;
            self.entries
                .write()
                .expect("pool entries lock")
                .remove(&entry.local_endpoint);
        }
    }

    /// Drops a faulted connection and requests a replacement.
    pub async fn discard(&self, mut entry: ConnEntry) {
        error!(
            endpoint = %entry.local_endpoint,
            addr = %self.service_addr,
            "connection is unreusable, discarding"
        );
        let _ = entry.stream.shutdown().await;
        self.entries
            .write()
            .expect("pool entries lock")
            .remove(&entry.local_endpoint);
        let _ = self.reconnect_tx.try_send(());
    }

    /// Signals closed, joins the connect loop and shuts every idle
    /// connection.
    pub async fn close(&self) {
        if self.closed_tx.send_replace(true) {
            return;
        }
        let handle = self.connect_loop.lock().expect("connect loop lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        let mut free_rx = self.free_rx.lock().await;
        while let Ok(mut entry) = free_rx.try_recv() {
            info!(
                endpoint = %entry.local_endpoint,
                addr = %self.service_addr,
                "closing connection"
            );
            let _ = entry.stream.shutdown().await;
            self.entries
                .write()
                .expect("pool entries lock")
                .remove(&entry.local_endpoint);
        }
    }

    pub fn stats(&self) -> Vec<ConnStats> {
        self.entries
            .read()
            .expect("pool entries lock")
            .values()
            .cloned()
            .collect()
    }
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn connect_loop(
    service_addr: String,
    retry: RetryPolicy,
    entries: Arc<StdRwLock<HashMap<String, ConnStats>>>,
    free_tx: mpsc::Sender<ConnEntry>,
    mut reconnect_rx: mpsc::Receiver<()>,
    mut closed_rx: watch::Receiver<bool>,
) {
    loop {
        let token = tokio::select! {
            _ = closed_rx.changed() => None,
            token = reconnect_rx.recv() => token,
        };
        if token.is_none() {
            break;
        }

        let Some(entry) = connect_with_retry(&service_addr, &retry, &mut closed_rx).await else {
            break;
        };

        {
            let mut entries = entries.write().expect("pool entries lock");
            if entries.contains_key(&entry.local_endpoint) {
                // Two live sockets sharing a local endpoint means a
                // close was lost somewhere. Unrecoverable.
                error!(
                    endpoint = %entry.local_endpoint,
                    "entry with this local endpoint already exists"
                );
                std::process::abort();
            }
            let now = Instant::now();
            entries.insert(
                entry.local_endpoint.clone(),
                ConnStats {
                    local_endpoint: entry.local_endpoint.clone(),
                    connected_since: now,
                    idle_since: now,
                },
            );
        }

        if free_tx.send(entry).await.is_err() {
            break;
        }
    }
    debug!(addr = %service_addr, "quitting connect loop");
}

/// Dials until a connection lands or the pool closes. The backoff grows
/// multiplicatively within this attempt and is capped at `max_sleep`.
async fn connect_with_retry(
    service_addr: &str,
    retry: &RetryPolicy,
    closed_rx: &mut watch::Receiver<bool>,
) -> Option<ConnEntry> {
    let mut sleep = retry.sleep;
    loop {
        if *closed_rx.borrow() {
            return None;
        }
        let dialed = tokio::select! {
            _ = closed_rx.changed() => return None,
            dialed = TcpStream::connect(service_addr) => dialed,
        };
        match dialed.and_then(|stream| {
            let local_endpoint = stream.local_addr()?.to_string();
            Ok((stream, local_endpoint))
        }) {
            Ok((stream, local_endpoint)) => {
                info!(endpoint = %local_endpoint, addr = %service_addr, "established connection");
                return Some(ConnEntry {
                    stream,
                    local_endpoint,
                });
            }
            Err(e) => {
                error!(
                    addr = %service_addr,
                    error = %e,
                    retry_in = ?sleep,
                    "failed to dial"
                );
                tokio::select! {
                    _ = closed_rx.changed() => return None,
                    _ = tokio::time::sleep(sleep) => {}
                }
                sleep = sleep.mul_f64(retry.backoff).min(retry.max_sleep);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(addr: &str) -> ClientOptions {
        ClientOptions::new("Hello", addr).pool_size(3).retry(RetryPolicy {
            sleep: Duration::from_millis(10),
            backoff: 2.0,
            max_sleep: Duration::from_millis(100),
        })
    }

    #[test]
    fn validation_rejects_bad_options() {
        let good = options("localhost:1");
        assert!(good.validate().is_ok());

        assert!(good.clone().pool_size(0).validate().is_err());

        let mut bad = good.clone();
        bad.retry.sleep = Duration::ZERO;
        assert!(bad.validate().is_err());

        let mut bad = good.clone();
        bad.retry.backoff = 1.0;
        assert!(bad.validate().is_err());

        let mut bad = good;
        bad.retry.max_sleep = Duration::from_millis(1);
        assert!(bad.validate().is_err());
    }

    #[tokio::test]
    async fn pool_fills_to_size() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                // Park accepted sockets so they stay open.
                tokio::spawn(async move {
                    let _stream = stream;
                    std::future::pending::<()>().await;
                });
            }
        });

        let pool = ConnPool::start(&options(&addr));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(pool.stats().len(), 3);
        pool.close().await;
    }

    #[tokio::test]
    async fn acquire_respects_deadline() {
        // No server; the pool never fills.
        let pool = ConnPool::start(&options("127.0.0.1:1"));
        let err = pool
            .acquire(Some(Instant::now() + Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "[RPC_ERROR] context deadline exceeded");
        pool.close().await;
    }

    #[tokio::test]
    async fn acquire_after_close_fails_fast() {
        let pool = ConnPool::start(&options("127.0.0.1:1"));
        pool.close().await;
        let err = pool.acquire(None).await.unwrap_err();
        assert_eq!(err.to_string(), "[RPC_ERROR] Client is closed");
    }

    #[tokio::test]
    async fn discard_triggers_reconnect() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let _stream = stream;
                    std::future::pending::<()>().await;
                });
            }
        });

        let opts = options(&addr);
        let pool = ConnPool::start(&opts);
        tokio::time::sleep(Duration::from_millis(200)).await;

        let entry = pool.acquire(None).await.unwrap();
        pool.discard(entry).await;

        // The connect loop replaces the discarded entry.
        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(pool.stats().len(), 3);
        pool.close().await;
    }
}

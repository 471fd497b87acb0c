//! The controller: service registration, client construction and the
//! diagnostic endpoint.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use http_body_util::Full;
use minrpc_client::{Client, ClientOptions};
use minrpc_common::recorder::{CallRecord, RingHandle};
use minrpc_common::{Error, Result};
use minrpc_server::server::ServiceMap;
use minrpc_server::{HttpMux, RpcServer, Service, ServiceDef};
use serde_json::json;
use tracing::info;

/// Controller construction parameters.
///
/// `binary_log_dir` of `None` disables traffic persistence; otherwise
/// the directory is created if missing and every service and client
/// writes its append-only log there. An empty service list is fine for
/// client-only processes; serving is what rejects it.
#[derive(Default)]
pub struct Config {
    pub binary_log_dir: Option<PathBuf>,
    pub services: Vec<ServiceDef>,
}

/// The framework entry object for one process, on both the serving and
/// the calling side.
pub struct Controller {
    binary_log_dir: Option<PathBuf>,
    services: ServiceMap,
    egress_rings: Arc<RwLock<Vec<(String, RingHandle)>>>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("binary_log_dir", &self.binary_log_dir)
            .field("services", &self.services.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Controller {
    /// Creates the binary-log directory and activates every service
    /// (ingress recorder attached, methods announced). Fails if the
    /// directory cannot be created or a service name repeats.
    pub fn new(config: Config) -> Result<Self> {
        if let Some(dir) = &config.binary_log_dir {
            create_log_dir(dir)?;
        }

        let mut services = HashMap::new();
        for def in config.services {
            let name = def.name().to_string();
            let service = Service::activate(def, config.binary_log_dir.as_deref());
            if services.insert(name.clone(), Arc::new(service)).is_some() {
                return Err(Error::config(format!("duplicate service '{name}'")));
            }
        }

        Ok(Self {
            binary_log_dir: config.binary_log_dir,
            services: Arc::new(services),
            egress_rings: Arc::new(RwLock::new(Vec::new())),
        })
    }

    /// Binds the RPC port and blocks in the accept loop. Rejects an
    /// empty service set.
    pub async fn serve(&self, port: u16) -> Result<()> {
        self.bind(port).await?.run().await
    }

    /// Binds without serving yet, so callers can learn the
    /// kernel-assigned port before entering the accept loop.
    pub async fn bind(&self, port: u16) -> Result<BoundServer> {
        Ok(BoundServer {
            server: RpcServer::bind(port).await?,
            services: Arc::clone(&self.services),
        })
    }

    /// Builds a pooled client that shares this controller's binary-log
    /// directory, and registers its egress ring with the diagnostic
    /// endpoint.
    pub fn new_client(&self, options: ClientOptions) -> Result<Client> {
        let client = Client::new(options, self.binary_log_dir.as_deref())?;
        self.egress_rings
            .write()
            .expect("egress rings lock")
            .push((client.service_name().to_string(), client.ring_handle()));
        info!(service = %client.service_name(), "client registered");
        Ok(client)
    }

    /// Mounts the `/rpcs` handler, which lists the last 64 ingress and
    /// egress call records, into a caller-supplied multiplexer.
    pub fn register_introspection(&self, mux: &mut HttpMux) {
        let services = Arc::clone(&self.services);
        let egress_rings = Arc::clone(&self.egress_rings);
        mux.handle("/rpcs", move |_req| {
            let body = render_rpcs(&services, &egress_rings);
            async move {
                hyper::Response::builder()
                    .header("content-type", "application/json")
                    .body(Full::new(Bytes::from(body)))
                    .expect("static response")
            }
        });
    }
}

/// A bound but not yet serving RPC listener.
pub struct BoundServer {
    server: RpcServer,
    services: ServiceMap,
}

impl BoundServer {
    pub fn local_addr(&self) -> Result<std::net::SocketAddr> {
        self.server.local_addr()
    }

    /// Blocks in the accept loop.
    pub async fn run(self) -> Result<()> {
        self.server.run(self.services).await
    }
}

#[cfg(unix)]
fn create_log_dir(dir: &std::path::Path) -> Result<()> {
    use std::os::unix::fs::DirBuilderExt;
    std::fs::DirBuilder::new()
        .recursive(true)
        .mode(0o755)
        .create(dir)?;
    Ok(())
}

#[cfg(not(unix))]
fn create_log_dir(dir: &std::path::Path) -> Result<()> {
    std::fs::create_dir_all(dir)?;
    Ok(())
}

fn render_rpcs(
    services: &ServiceMap,
    egress_rings: &Arc<RwLock<Vec<(String, RingHandle)>>>,
) -> String {
    let ingress: Vec<_> = services
        .values()
        .map(|service| {
            json!({
                "direction": "ingress",
                "name": service.name(),
                "calls": render_calls(&service.recorder().recent()),
            })
        })
        .collect();

    let egress: Vec<_> = egress_rings
        .read()
        .expect("egress rings lock")
        .iter()
        .map(|(name, ring)| {
            let recent = ring.read().expect("egress ring lock").snapshot();
            json!({
                "direction": "egress",
                "name": name,
                "calls": render_calls(&recent),
            })
        })
        .collect();

    json!({ "ingress": ingress, "egress": egress }).to_string()
}

fn render_calls(records: &[CallRecord]) -> Vec<serde_json::Value> {
    records
        .iter()
        .map(|record| {
            json!({
                "request_size": record.request_size.iter().fold(0u64, |n, b| (n << 8) | *b as u64),
                "request_len": record.request.len(),
                "response_len": record.response.len(),
                "request_head": head_hex(&record.request),
                "response_head": head_hex(&record.response),
            })
        })
        .collect()
}

/// Hex of the first 32 bytes, enough to eyeball an envelope.
fn head_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .take(32)
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use minrpc_server::registry::AppError;
    use minrpc_server::ServiceBuilder;

    #[derive(Clone, PartialEq, ::prost::Message)]
    struct Note {
        #[prost(string, optional, tag = "1")]
        text: Option<String>,
    }

    fn hello_def() -> ServiceDef {
        ServiceBuilder::new("Hello")
            .method("Say", |_ctx, req: Option<Note>| async move {
                Ok::<_, AppError>(req)
            })
            .build()
    }

    #[tokio::test]
    async fn construction_creates_the_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let log_dir = dir.path().join("bin-logs");
        let controller = Controller::new(Config {
            binary_log_dir: Some(log_dir.clone()),
            services: vec![hello_def()],
        });
        assert!(controller.is_ok());
        assert!(log_dir.is_dir());
    }

    #[tokio::test]
    async fn construction_fails_when_dir_is_uncreatable() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("occupied");
        std::fs::write(&file, b"x").unwrap();

        let err = Controller::new(Config {
            binary_log_dir: Some(file),
            services: vec![],
        })
        .unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[tokio::test]
    async fn duplicate_service_names_are_rejected() {
        let err = Controller::new(Config {
            binary_log_dir: None,
            services: vec![hello_def(), hello_def()],
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn rpcs_body_lists_both_directions() {
        let controller = Controller::new(Config {
            binary_log_dir: None,
            services: vec![hello_def()],
        })
        .unwrap();
        let _client = controller
            .new_client(ClientOptions::new("Hello", "127.0.0.1:1"))
            .unwrap();

        let body = render_rpcs(&controller.services, &controller.egress_rings);
        let parsed: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed["ingress"][0]["name"], "Hello");
        assert_eq!(parsed["egress"][0]["name"], "Hello");
        _client.close().await;
    }
}

//! minrpc - a small, self-contained RPC framework.
//!
//! Services are user-supplied objects with typed methods; clients hold
//! stub objects that transmit typed request messages and await typed
//! responses over a fixed-size pool of long-lived TCP connections. On
//! the wire every message is a 4-byte big-endian length prefix followed
//! by a protobuf envelope.
//!
//! The [`Controller`] is the entry point on both sides: it owns the
//! binary-log directory, turns service definitions into served
//! services, and constructs pooled clients.
//!
//! # Serving
//!
//! ```no_run
//! use minrpc::{AppError, Config, Controller, ServerContext, ServiceBuilder};
//!
//! #[derive(Clone, PartialEq, ::prost::Message)]
//! struct Greeting {
//!     #[prost(string, optional, tag = "1")]
//!     text: Option<String>,
//! }
//!
//! #[tokio::main]
//! async fn main() -> minrpc::Result<()> {
//!     let hello = ServiceBuilder::new("Hello")
//!         .method("Say", |_ctx: ServerContext, req: Option<Greeting>| async move {
//!             Ok::<_, AppError>(req)
//!         })
//!         .build();
//!     let controller = Controller::new(Config {
//!         binary_log_dir: None,
//!         services: vec![hello],
//!     })?;
//!     controller.serve(9090).await
//! }
//! ```
//!
//! # Calling
//!
//! ```no_run
//! use minrpc::{ClientContext, ClientOptions, Config, Controller};
//! # #[derive(Clone, PartialEq, ::prost::Message)]
//! # struct Greeting {
//! #     #[prost(string, optional, tag = "1")]
//! #     text: Option<String>,
//! # }
//!
//! # #[tokio::main]
//! # async fn main() -> minrpc::Result<()> {
//! let controller = Controller::new(Config::default())?;
//! let client = controller.new_client(
//!     ClientOptions::new("Hello", "localhost:9090").pool_size(5),
//! )?;
//! let mut ctx = ClientContext::with_timeout(std::time::Duration::from_secs(1));
//! let reply: Option<Greeting> = client
//!     .call("Say", &mut ctx, Some(&Greeting { text: Some("hi".into()) }))
//!     .await?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

mod controller;

pub use controller::{BoundServer, Config, Controller};

pub use minrpc_client::{Client, ClientContext, ClientOptions, ConnStats, RetryPolicy};
pub use minrpc_common::protocol::{Request, RequestMetadata, Response, ResponseMetadata};
pub use minrpc_common::recorder::{CallRecord, Direction, Recorder, RECENT_CALLS};
pub use minrpc_common::{Error, Result, RPC_ERROR_PREFIX};
pub use minrpc_server::{AppError, HttpMux, ServerContext, ServiceBuilder, ServiceDef};

//! minrpc server side
//!
//! A service is a named bundle of typed methods. User code builds one
//! with [`ServiceBuilder`], which boxes each typed async handler behind
//! a uniform byte-level invoker; the dispatcher routes decoded requests
//! to those invokers and races them against the caller's deadline.
//!
//! The pieces, bottom up:
//!
//! - [`context::ServerContext`] - deadline plus request metadata, handed
//!   to every handler
//! - [`registry`] - typed method registration and the immutable method map
//! - [`dispatch`] - request decoding, deadline enforcement, response
//!   assembly
//! - [`server`] - TCP accept loop and the per-connection
//!   read/dispatch/write loop
//! - [`http`] - a minimal path multiplexer for the diagnostic endpoint

pub mod context;
pub mod dispatch;
pub mod http;
pub mod registry;
pub mod server;

pub use context::ServerContext;
pub use http::HttpMux;
pub use registry::{AppError, Service, ServiceBuilder, ServiceDef};
pub use server::RpcServer;

//! minrpc common types and transport
//!
//! This crate provides everything the minrpc client and server share:
//!
//! - [`protocol`] - the Request/Response envelope messages and error types
//! - [`transport`] - length-prefixed framing over any async byte stream
//! - [`recorder`] - the per-peer ring of recent calls and the binary
//!   traffic log
//!
//! # Wire format
//!
//! Every message on a minrpc socket is a frame: a 4-byte big-endian
//! unsigned length followed by exactly that many payload bytes. The
//! payload is a protobuf-encoded envelope ([`protocol::Request`] from
//! client to server, [`protocol::Response`] back).

pub mod protocol;
pub mod recorder;
pub mod transport;

pub use protocol::error::{Error, Result, RPC_ERROR_PREFIX};
pub use protocol::{Request, RequestMetadata, Response, ResponseMetadata};

//! minrpc client side
//!
//! A [`Client`] maintains a fixed-size pool of long-lived connections to
//! one remote service and issues strictly serial calls over whichever
//! connection is free. Connections that fault are discarded and
//! re-established in the background with capped exponential backoff.
//!
//! - [`pool`] - connection ownership, the reconnect loop, shutdown
//! - [`client`] - the typed call path and options validation
//! - [`context::ClientContext`] - per-call deadline, response metadata

pub mod client;
pub mod context;
pub mod pool;

pub use client::Client;
pub use context::ClientContext;
pub use pool::{ClientOptions, ConnStats, RetryPolicy};

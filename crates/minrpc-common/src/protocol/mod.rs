//! Protocol definitions
//!
//! The envelope messages that cross the wire, plus the framework error
//! type. Envelopes are protobuf messages in which every field is
//! optional, so an absent field is distinguishable from a zero-valued
//! one and the schema can evolve without breaking old peers.

pub mod envelope;
pub mod error;

pub use envelope::{Request, RequestMetadata, Response, ResponseMetadata};

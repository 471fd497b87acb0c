//! The Request/Response envelope schema.
//!
//! Declared by hand with prost's derive rather than generated from a
//! `.proto` file; the field tags below are the wire contract:
//!
//! ```text
//! Request          { 1: RequestMetadata metadata, 2: bytes request_pb }
//! RequestMetadata  { 1: string client_job_name, 2: string client_request_id,
//!                    3: string service_name, 4: string method_name,
//!                    5: int64 timeout_us, 6: string client_addr }
//! Response         { 1: ResponseMetadata metadata, 2: bytes response_pb,
//!                    3: string error }
//! ResponseMetadata { 1: string server_job_name, 2: string service_name,
//!                    3: string method_name }
//! ```
//!
//! `Response.error` being present is the sole signal of failure; exactly
//! one of `response_pb` and `error` is meaningful.

/// Caller-side call description, stamped by the client and completed by
/// the server (`client_addr`).
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct RequestMetadata {
    /// Invocation name of the calling process.
    #[prost(string, optional, tag = "1")]
    pub client_job_name: Option<String>,
    /// Per-call id, a nanosecond-time hex string.
    #[prost(string, optional, tag = "2")]
    pub client_request_id: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub service_name: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub method_name: Option<String>,
    /// Remaining call budget in microseconds; absent or <= 0 means no
    /// deadline.
    #[prost(int64, optional, tag = "5")]
    pub timeout_us: Option<i64>,
    /// Remote endpoint of the connection, filled by the server.
    #[prost(string, optional, tag = "6")]
    pub client_addr: Option<String>,
}

/// The outer message sent from client to server.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Request {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<RequestMetadata>,
    /// Marshaled user request; absent means the handler receives no
    /// typed request at all.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub request_pb: Option<Vec<u8>>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct ResponseMetadata {
    /// Invocation name of the serving process.
    #[prost(string, optional, tag = "1")]
    pub server_job_name: Option<String>,
    #[prost(string, optional, tag = "2")]
    pub service_name: Option<String>,
    #[prost(string, optional, tag = "3")]
    pub method_name: Option<String>,
}

/// The outer message sent from server to client.
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct Response {
    #[prost(message, optional, tag = "1")]
    pub metadata: Option<ResponseMetadata>,
    /// Marshaled user response.
    #[prost(bytes = "vec", optional, tag = "2")]
    pub response_pb: Option<Vec<u8>>,
    /// Untyped error string. Framework-origin errors carry the
    /// `[RPC_ERROR] ` prefix; handler-returned errors cross verbatim.
    #[prost(string, optional, tag = "3")]
    pub error: Option<String>,
}

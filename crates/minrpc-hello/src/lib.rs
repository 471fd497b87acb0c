//! Typed bindings for the `Hello` service.
//!
//! This is the output contract of the stub generator for the
//! declarative definition
//!
//! ```text
//! service Hello {
//!     Say(SayRequest) -> SayResponse
//!     Sing(SingRequest) -> SingResponse
//!     Sleepy(SleepyRequest) -> SleepyResponse
//! }
//! ```
//!
//! Three pieces: the payload messages, the [`HelloHandler`] trait a
//! server implements, and the [`HelloClient`] stub a caller holds. The
//! registration wrapper boxes each typed method behind the registry's
//! uniform byte-level invoker; the stub supplies the response type to
//! the client's generic call path. No reflection, no dynamic dispatch
//! on message types.

use std::sync::Arc;

use async_trait::async_trait;
use minrpc::{
    AppError, Client, ClientContext, ClientOptions, Controller, Result, ServerContext,
    ServiceBuilder, ServiceDef,
};

pub const SERVICE_NAME: &str = "Hello";

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SayRequest {
    #[prost(string, optional, tag = "1")]
    pub body: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SayResponse {
    #[prost(string, optional, tag = "1")]
    pub msg: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SingRequest {
    #[prost(string, optional, tag = "1")]
    pub body: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SingResponse {
    #[prost(string, optional, tag = "1")]
    pub msg: Option<String>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SleepyRequest {
    /// How long the handler sleeps before answering.
    #[prost(int64, optional, tag = "1")]
    pub millis: Option<i64>,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct SleepyResponse {
    #[prost(string, optional, tag = "1")]
    pub msg: Option<String>,
}

/// Server-side surface of the service. A `None` request means the
/// caller sent no payload; returning `Ok(None)` sends none back.
#[async_trait]
pub trait HelloHandler: Send + Sync + 'static {
    async fn say(
        &self,
        ctx: ServerContext,
        request: Option<SayRequest>,
    ) -> std::result::Result<Option<SayResponse>, AppError>;

    async fn sing(
        &self,
        ctx: ServerContext,
        request: Option<SingRequest>,
    ) -> std::result::Result<Option<SingResponse>, AppError>;

    async fn sleepy(
        &self,
        ctx: ServerContext,
        request: Option<SleepyRequest>,
    ) -> std::result::Result<Option<SleepyResponse>, AppError>;
}

/// Boxes every typed method of `handler` into a registrable service
/// definition.
pub fn hello_service<H: HelloHandler>(handler: Arc<H>) -> ServiceDef {
    let say = Arc::clone(&handler);
    let sing = Arc::clone(&handler);
    let sleepy = handler;
    ServiceBuilder::new(SERVICE_NAME)
        .method("Say", move |ctx, request| {
            let handler = Arc::clone(&say);
            async move { handler.say(ctx, request).await }
        })
        .method("Sing", move |ctx, request| {
            let handler = Arc::clone(&sing);
            async move { handler.sing(ctx, request).await }
        })
        .method("Sleepy", move |ctx, request| {
            let handler = Arc::clone(&sleepy);
            async move { handler.sleepy(ctx, request).await }
        })
        .build()
}

/// Typed client stub. Each method is a thin wrapper over the pooled
/// call path with the right message types filled in.
pub struct HelloClient {
    inner: Client,
}

impl HelloClient {
    pub fn new(controller: &Controller, options: ClientOptions) -> Result<Self> {
        Ok(Self {
            inner: controller.new_client(options)?,
        })
    }

    pub async fn say(
        &self,
        ctx: &mut ClientContext,
        request: Option<&SayRequest>,
    ) -> Result<Option<SayResponse>> {
        self.inner.call("Say", ctx, request).await
    }

    pub async fn sing(
        &self,
        ctx: &mut ClientContext,
        request: Option<&SingRequest>,
    ) -> Result<Option<SingResponse>> {
        self.inner.call("Sing", ctx, request).await
    }

    pub async fn sleepy(
        &self,
        ctx: &mut ClientContext,
        request: Option<&SleepyRequest>,
    ) -> Result<Option<SleepyResponse>> {
        self.inner.call("Sleepy", ctx, request).await
    }

    pub fn inner(&self) -> &Client {
        &self.inner
    }

    pub async fn close(&self) {
        self.inner.close().await
    }
}

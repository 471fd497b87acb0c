//! Typed method registration.
//!
//! [`ServiceBuilder::method`] accepts an async handler with typed
//! request and response messages and boxes it behind a uniform invoker
//! taking raw payload bytes, so the dispatcher never needs to know the
//! message types. The handler's error is whatever it wants it to be;
//! only its string representation crosses the wire, verbatim.
//!
//! A built [`ServiceDef`] is immutable. The controller turns it into a
//! live [`Service`] by attaching the ingress traffic recorder.

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;

use minrpc_common::recorder::{Direction, Recorder};
use prost::Message;
use tracing::info;

use crate::context::ServerContext;

/// Error type user handlers return. Its `to_string()` is the
/// application error the caller sees, with no framework prefix.
pub type AppError = Box<dyn std::error::Error + Send + Sync>;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What one method invocation produced, before envelope assembly.
pub(crate) enum MethodOutcome {
    /// Encoded response payload, or nothing if the handler returned none.
    Response(Option<Vec<u8>>),
    /// Application error, passed through verbatim.
    App(String),
    /// Framework failure inside the invoker (payload decode).
    Fault(String),
}

pub(crate) type Invoker =
    Arc<dyn Fn(ServerContext, Option<Vec<u8>>) -> BoxFuture<MethodOutcome> + Send + Sync>;

/// Builds the immutable method map of one service.
pub struct ServiceBuilder {
    name: String,
    methods: HashMap<String, Invoker>,
}

impl ServiceBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            methods: HashMap::new(),
        }
    }

    /// Registers a typed method.
    ///
    /// The handler receives the call context and the decoded request, or
    /// `None` when the caller sent no payload, and returns the typed
    /// response (or `None`) or an application error.
    pub fn method<Req, Resp, H, Fut>(mut self, name: impl Into<String>, handler: H) -> Self
    where
        Req: Message + Default + 'static,
        Resp: Message + 'static,
        H: Fn(ServerContext, Option<Req>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Resp>, AppError>> + Send + 'static,
    {
        let invoker: Invoker = Arc::new(
            move |ctx: ServerContext, payload: Option<Vec<u8>>| -> BoxFuture<MethodOutcome> {
                let decoded = match payload {
                    None => Ok(None),
                    Some(bytes) => Req::decode(bytes.as_slice()).map(Some),
                };
                match decoded {
                    Err(e) => {
                        let what = format!(
                            "Failed to unmarshal request for '{}.{}': {}",
                            ctx.metadata.service_name(),
                            ctx.metadata.method_name(),
                            e
                        );
                        Box::pin(std::future::ready(MethodOutcome::Fault(what)))
                    }
                    Ok(request) => {
                        let fut = handler(ctx, request);
                        Box::pin(async move {
                            match fut.await {
                                Ok(Some(response)) => {
                                    MethodOutcome::Response(Some(response.encode_to_vec()))
                                }
                                Ok(None) => MethodOutcome::Response(None),
                                Err(e) => MethodOutcome::App(e.to_string()),
                            }
                        })
                    }
                }
            },
        );
        self.methods.insert(name.into(), invoker);
        self
    }

    pub fn build(self) -> ServiceDef {
        ServiceDef {
            name: self.name,
            methods: self.methods,
        }
    }
}

/// A named, immutable set of serviceable methods.
pub struct ServiceDef {
    pub(crate) name: String,
    pub(crate) methods: HashMap<String, Invoker>,
}

impl ServiceDef {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn method_names(&self) -> impl Iterator<Item = &str> {
        self.methods.keys().map(String::as_str)
    }
}

/// A service wired for serving: its method map plus the ingress
/// recorder.
pub struct Service {
    def: ServiceDef,
    recorder: Recorder,
}

impl Service {
    /// Attaches the ingress recorder and announces the served methods.
    pub fn activate(def: ServiceDef, binary_log_dir: Option<&Path>) -> Self {
        let recorder = Recorder::spawn(&def.name, Direction::Ingress, binary_log_dir);
        for method in def.method_names() {
            info!(service = %def.name, method, "will serve method");
        }
        Self { def, recorder }
    }

    pub fn name(&self) -> &str {
        &self.def.name
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub(crate) fn invoker(&self, method: &str) -> Option<&Invoker> {
        self.def.methods.get(method)
    }
}

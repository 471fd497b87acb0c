//! Request dispatch.
//!
//! Given a decoded request whose service has already been resolved, the
//! dispatcher locates the method, hands the payload to its invoker on a
//! separate task and waits for whichever comes first, completion or the
//! caller's deadline. A handler that outlives its deadline keeps
//! running on the abandoned task; its result is discarded.

use std::sync::OnceLock;
use std::time::Duration;

use minrpc_common::protocol::error::tagged;
use minrpc_common::{Request, Response, ResponseMetadata};
use tokio::time::Instant;

use crate::context::ServerContext;
use crate::registry::{MethodOutcome, Service};

fn job_name() -> &'static str {
    static NAME: OnceLock<String> = OnceLock::new();
    NAME.get_or_init(|| std::env::args().next().unwrap_or_else(|| "unknown".to_string()))
}

/// Serves one request against a resolved service and produces the
/// response envelope. Never fails; every failure mode becomes the
/// response's error field.
pub(crate) async fn dispatch(service: &Service, request: &Request) -> Response {
    let metadata = request.metadata.clone().unwrap_or_default();
    let mut response = Response {
        metadata: Some(ResponseMetadata {
            server_job_name: Some(job_name().to_string()),
            service_name: metadata.service_name.clone(),
            method_name: metadata.method_name.clone(),
        }),
        response_pb: None,
        error: None,
    };

    let Some(method_name) = metadata.method_name.clone() else {
        response.error = Some(tagged("Request.Metadata is missing method_name"));
        return response;
    };
    let Some(invoker) = service.invoker(&method_name) else {
        response.error = Some(tagged(format!(
            "Method '{}.{}' is not found",
            metadata.service_name(),
            method_name
        )));
        return response;
    };

    let deadline = metadata
        .timeout_us
        .filter(|us| *us > 0)
        .map(|us| Instant::now() + Duration::from_micros(us as u64));
    let ctx = ServerContext::new(deadline, metadata.clone());

    let mut handler_task = tokio::spawn(invoker(ctx, request.request_pb.clone()));
    let outcome = match deadline {
        None => match (&mut handler_task).await {
            Ok(outcome) => outcome,
            Err(e) => MethodOutcome::Fault(format!(
                "Method '{}.{}' handler failed: {}",
                metadata.service_name(),
                method_name,
                e
            )),
        },
        Some(at) => tokio::select! {
            joined = &mut handler_task => match joined {
                Ok(outcome) => outcome,
                Err(e) => MethodOutcome::Fault(format!(
                    "Method '{}.{}' handler failed: {}",
                    metadata.service_name(),
                    method_name,
                    e
                )),
            },
            _ = tokio::time::sleep_until(at) => MethodOutcome::Fault(format!(
                "Method '{}.{}' timed out",
                metadata.service_name(),
                method_name
            )),
        },
    };

    match outcome {
        MethodOutcome::Response(payload) => response.response_pb = payload,
        MethodOutcome::App(error) => response.error = Some(error),
        MethodOutcome::Fault(what) => response.error = Some(tagged(what)),
    }
    response
}

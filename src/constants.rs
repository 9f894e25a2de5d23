//! # System Constants
//!
//! Message header names, originator-facing message templates and default
//! queue names shared by the dispatch engine components.

/// Message header names read from and written to the transport.
pub mod headers {
    pub const TENANT: &str = "tenant";
    pub const OWNER: &str = "owner";
    pub const SESSION: &str = "session";
    pub const REQUEST_ID: &str = "request-id";
    pub const CONTENT_TYPE: &str = "content-type";
    pub const WORKER_ID: &str = "worker-id";
    pub const DLQ_ERROR_STACKTRACE: &str = "x-exception-stacktrace";
    /// Prefix used to carry a request's additional headers on the wire.
    pub const ADDITIONAL_PREFIX: &str = "x-additional-";
}

/// Originator-facing message templates.
///
/// Placeholders are substituted positionally by the helpers in
/// [`crate::orchestration::notifier`] and [`crate::orchestration::request_validator`].
pub mod messages {
    pub const GRANTED: &str = "Your request has been successfully registered.";
    pub const DELAYED: &str =
        "Your request has been delayed as no worker is currently matching content type <{}>.";
    pub const INVALID: &str =
        "Your request is not valid as its body has been invalidated by the matching worker <{}>.";
    pub const SUCCESS: &str = "Your request has been successfully handled by the <{}> worker.";
    pub const ERROR: &str = "Error during processing your request in <{}> worker : Cause : {}.";
    pub const MISSING_HEADER: &str = "<{}> property is missing from request message headers";
    pub const SKIPPED_CONTENT_TYPE: &str =
        "Content type <{}> is configured to be automatically skipped on tenant <{}>";
    pub const REQUEST_ID_ALREADY_EXISTS: &str =
        "Request is denied cause the given requestId <{}> already exists";
    pub const UNKNOWN_WORKER_ERROR: &str = "Unknown error from worker";
    pub const WORKFLOW_MISSING_CONTENT: &str =
        "Workflow <{}> cannot continue to step <{}> as worker <{}> returned no content";
    pub const WORKFLOW_STEP_NOT_FOUND: &str =
        "Workflow <{}> has no step numbered <{}>, request cannot be dispatched";

    /// Fill `{}` placeholders in order.
    pub fn format(template: &str, args: &[&str]) -> String {
        let mut out = String::with_capacity(template.len());
        let mut rest = template;
        let mut args = args.iter();
        while let Some(pos) = rest.find("{}") {
            out.push_str(&rest[..pos]);
            out.push_str(args.next().copied().unwrap_or(""));
            rest = &rest[pos + 2..];
        }
        out.push_str(rest);
        out
    }
}

/// Fixed tag carried by every originator response.
pub const REQUEST_TYPE: &str = "WORKER_MANAGER";

/// Placeholder stored as the content of a terminal success that carried no payload.
pub const EMPTY_CONTENT: &[u8] = b"{}";

/// Default queue and exchange names.
pub mod queues {
    pub const REQUEST_QUEUE: &str = "dispatch.worker.manager.request";
    pub const RESPONSE_QUEUE: &str = "dispatch.worker.manager.response";
    pub const WORKER_RESPONSE_QUEUE: &str = "dispatch.worker.manager.worker.response";
    pub const WORKER_REQUEST_DLQ: &str = "dispatch.worker.manager.request.dlq";
    pub const HEARTBEAT_QUEUE: &str = "dispatch.worker.manager.heartbeat";
    pub const WORKER_REQUEST_TEMPLATE: &str = "dispatch.worker.{worker_type}.request";
    pub const ROUTING_KEY: &str = "#";
}

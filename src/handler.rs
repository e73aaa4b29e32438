//! Handler chain run on every outbound call, and the handlers shipped with
//! the invoker.

use crate::dispatch::{Dispatch, RequestContext};
use crate::metadata::HeaderSet;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Transport-level request headers; each key maps to its values.
pub type HeaderMap = HashMap<String, Vec<String>>;

/// Per-call state visible to handlers.
#[derive(Debug, Clone)]
pub struct MessageContext {
    operation: String,
    properties: RequestContext,
    request_headers: Option<HeaderMap>,
}

impl MessageContext {
    /// Context for an outgoing call of `operation`.
    pub fn new(properties: RequestContext, operation: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            properties,
            request_headers: None,
        }
    }

    pub fn with_request_headers(mut self, headers: HeaderMap) -> Self {
        self.request_headers = Some(headers);
        self
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    pub fn properties(&self) -> &RequestContext {
        &self.properties
    }

    /// Outgoing headers, created empty on first access.
    pub fn request_headers(&mut self) -> &mut HeaderMap {
        self.request_headers.get_or_insert_with(HeaderMap::new)
    }

    pub fn has_request_headers(&self) -> bool {
        self.request_headers.is_some()
    }

    /// Names of the outgoing headers set so far, sorted.
    pub fn request_header_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .request_headers
            .iter()
            .flat_map(|headers| headers.keys().map(String::as_str))
            .collect();
        names.sort_unstable();
        names
    }
}

/// An interceptor in a dispatch's processing chain.
pub trait Handler: Send + Sync {
    fn name(&self) -> &str;

    /// Returns `false` to stop the chain and fail the call.
    fn handle_message(&self, ctx: &mut MessageContext) -> bool;

    fn handle_fault(&self, _ctx: &mut MessageContext) -> bool {
        true
    }

    fn close(&self, _ctx: &mut MessageContext) {}
}

/// Error raised while producing a header set.
pub type HeaderError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the headers for one call.
pub type HeaderProducer = Box<dyn Fn() -> Result<HeaderSet, HeaderError> + Send + Sync>;

/// Writes a set of key/value pairs into the outgoing request headers.
pub struct RequestHeaderInjector {
    producer: HeaderProducer,
}

impl RequestHeaderInjector {
    pub fn new(producer: HeaderProducer) -> Self {
        Self { producer }
    }

    /// Injector for a fixed header set.
    pub fn from_headers(headers: HeaderSet) -> Self {
        Self::new(Box::new(move || -> Result<HeaderSet, HeaderError> { Ok(headers.clone()) }))
    }
}

impl Handler for RequestHeaderInjector {
    fn name(&self) -> &str {
        "request-header-injector"
    }

    fn handle_message(&self, ctx: &mut MessageContext) -> bool {
        let headers = match (self.producer)() {
            Ok(headers) => headers,
            Err(e) => {
                debug!(error = %e, "Failed to produce request headers");
                return false;
            }
        };
        let request_headers = ctx.request_headers();
        for (key, value) in headers {
            request_headers.insert(key, vec![value]);
        }
        true
    }
}

/// Logs outgoing calls at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHandler;

impl Handler for LoggingHandler {
    fn name(&self) -> &str {
        "logging"
    }

    fn handle_message(&self, ctx: &mut MessageContext) -> bool {
        let mut properties: Vec<&str> = ctx.properties().keys().collect();
        properties.sort_unstable();
        debug!(
            operation = %ctx.operation(),
            headers = ?ctx.request_header_names(),
            properties = ?properties,
            "Outbound SOAP call"
        );
        true
    }

    fn handle_fault(&self, ctx: &mut MessageContext) -> bool {
        debug!(operation = %ctx.operation(), "SOAP call returned a fault");
        true
    }
}

/// Append `handler` to the dispatch's chain.
pub fn register(dispatch: &mut Dispatch, handler: Arc<dyn Handler>) {
    dispatch.add_handler(handler);
}

/// Append an injector writing `headers` to the dispatch's chain.
pub fn register_headers(headers: HeaderSet, dispatch: &mut Dispatch) {
    register(dispatch, Arc::new(RequestHeaderInjector::from_headers(headers)));
}

//! Invocation handles and the configuration applied to them.

use crate::binding::{OutboundRequest, PortBinding};
use crate::config::Timeouts;
use crate::error::CallError;
use crate::handler::{Handler, MessageContext};
use crate::xml::{XmlFragment, XmlPayload};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Property keys understood by the binding engine.
pub mod properties {
    pub const SOAP_ACTION_USE: &str = "soap.action.use";
    pub const SOAP_ACTION_URI: &str = "soap.action.uri";
    pub const ENDPOINT_ADDRESS: &str = "endpoint.address";
    pub const USERNAME: &str = "auth.username";
    pub const PASSWORD: &str = "auth.password";
    pub const REQUEST_TIMEOUT: &str = "timeout.request";
    pub const CONNECT_TIMEOUT: &str = "timeout.connect";
    /// Alternate timeout keys read by older transports
    pub const LEGACY_REQUEST_TIMEOUT: &str = "legacy.request.timeout";
    pub const LEGACY_CONNECT_TIMEOUT: &str = "legacy.connect.timeout";
}

/// A value in the request context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    Flag(bool),
    Text(String),
    Millis(u64),
}

/// The property bag of an invocation handle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    properties: HashMap<String, PropertyValue>,
}

impl RequestContext {
    pub fn put(&mut self, key: impl Into<String>, value: PropertyValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&PropertyValue> {
        self.properties.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.properties.get(key) {
            Some(PropertyValue::Text(value)) => Some(value),
            _ => None,
        }
    }

    pub fn flag(&self, key: &str) -> bool {
        matches!(self.properties.get(key), Some(PropertyValue::Flag(true)))
    }

    pub fn millis(&self, key: &str) -> Option<u64> {
        match self.properties.get(key) {
            Some(PropertyValue::Millis(value)) => Some(*value),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    /// Property keys, for diagnostics.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.properties.keys().map(String::as_str)
    }
}

/// Named configuration items applied onto a request context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchConfig {
    SoapAction,
    EndpointAddress,
    Username,
    Password,
}

impl DispatchConfig {
    /// Resolve the value once and write it; empty values are skipped.
    pub fn apply<F>(self, context: &mut RequestContext, resolver: F)
    where
        F: FnOnce() -> String,
    {
        let value = resolver();
        if value.is_empty() {
            return;
        }
        match self {
            Self::SoapAction => {
                context.put(properties::SOAP_ACTION_USE, PropertyValue::Flag(true));
                context.put(properties::SOAP_ACTION_URI, PropertyValue::Text(value));
            }
            Self::EndpointAddress => {
                context.put(properties::ENDPOINT_ADDRESS, PropertyValue::Text(value))
            }
            Self::Username => context.put(properties::USERNAME, PropertyValue::Text(value)),
            Self::Password => context.put(properties::PASSWORD, PropertyValue::Text(value)),
        }
    }
}

/// Write connect and request timeouts under both primary and legacy keys.
pub fn apply_timeouts(context: &mut RequestContext, timeouts: Timeouts) {
    let request = PropertyValue::Millis(timeouts.request_ms);
    let connect = PropertyValue::Millis(timeouts.connect_ms);
    context.put(properties::REQUEST_TIMEOUT, request.clone());
    context.put(properties::LEGACY_REQUEST_TIMEOUT, request);
    context.put(properties::CONNECT_TIMEOUT, connect.clone());
    context.put(properties::LEGACY_CONNECT_TIMEOUT, connect);
}

/// A live, callable binding to one remote operation.
///
/// Cloning is cheap and yields an independent property bag and handler chain
/// over the same port binding.
#[derive(Clone)]
pub struct Dispatch {
    port: Arc<dyn PortBinding>,
    request_context: RequestContext,
    handler_chain: Vec<Arc<dyn Handler>>,
}

impl Dispatch {
    pub fn new(port: Arc<dyn PortBinding>) -> Self {
        Self {
            port,
            request_context: RequestContext::default(),
            handler_chain: Vec::new(),
        }
    }

    pub fn request_context(&self) -> &RequestContext {
        &self.request_context
    }

    pub fn request_context_mut(&mut self) -> &mut RequestContext {
        &mut self.request_context
    }

    pub fn handler_chain(&self) -> &[Arc<dyn Handler>] {
        &self.handler_chain
    }

    /// Append a handler; existing handlers keep their order.
    pub fn add_handler(&mut self, handler: Arc<dyn Handler>) {
        self.handler_chain.push(handler);
    }

    /// Address the call will go to.
    pub fn endpoint_address(&self) -> &str {
        self.request_context
            .text(properties::ENDPOINT_ADDRESS)
            .unwrap_or_else(|| self.port.address())
    }

    /// Run the handler chain and perform the remote call.
    pub fn invoke(&self, payload: &XmlPayload) -> Result<XmlFragment, CallError> {
        let mut ctx = MessageContext::new(self.request_context.clone(), payload.root());

        for handler in &self.handler_chain {
            if !handler.handle_message(&mut ctx) {
                debug!(handler = handler.name(), "Handler rejected outbound message");
                self.close_chain(&mut ctx);
                return Err(CallError::HandlerRejected(handler.name().to_string()));
            }
        }

        let headers = ctx.request_headers().clone();
        let result = self.port.call(OutboundRequest {
            context: &self.request_context,
            headers: &headers,
            payload,
        });

        if let Err(CallError::Fault(_)) = &result {
            for handler in self.handler_chain.iter().rev() {
                if !handler.handle_fault(&mut ctx) {
                    break;
                }
            }
        }
        self.close_chain(&mut ctx);
        result
    }

    fn close_chain(&self, ctx: &mut MessageContext) {
        for handler in self.handler_chain.iter().rev() {
            handler.close(ctx);
        }
    }
}

impl fmt::Debug for Dispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("address", &self.endpoint_address())
            .field("properties", &self.request_context.keys().collect::<Vec<_>>())
            .field("handlers", &self.handler_chain.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_soap_action() {
        let mut ctx = RequestContext::default();
        DispatchConfig::SoapAction.apply(&mut ctx, || "".to_string());
        assert_eq!(ctx.len(), 0);

        DispatchConfig::SoapAction.apply(&mut ctx, || "soapAction".to_string());
        assert_eq!(ctx.len(), 2);
        assert_eq!(ctx.text(properties::SOAP_ACTION_URI), Some("soapAction"));
        assert_eq!(
            ctx.get(properties::SOAP_ACTION_USE),
            Some(&PropertyValue::Flag(true))
        );
    }

    #[test]
    fn test_endpoint_address() {
        let mut ctx = RequestContext::default();
        DispatchConfig::EndpointAddress.apply(&mut ctx, String::new);
        assert_eq!(ctx.len(), 0);

        DispatchConfig::EndpointAddress.apply(&mut ctx, || "endpointAddress".to_string());
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.text(properties::ENDPOINT_ADDRESS), Some("endpointAddress"));
    }

    #[test]
    fn test_username() {
        let mut ctx = RequestContext::default();
        DispatchConfig::Username.apply(&mut ctx, String::new);
        assert_eq!(ctx.len(), 0);

        DispatchConfig::Username.apply(&mut ctx, || "username".to_string());
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.text(properties::USERNAME), Some("username"));
    }

    #[test]
    fn test_password() {
        let mut ctx = RequestContext::default();
        DispatchConfig::Password.apply(&mut ctx, String::new);
        assert_eq!(ctx.len(), 0);

        DispatchConfig::Password.apply(&mut ctx, || "password".to_string());
        assert_eq!(ctx.len(), 1);
        assert_eq!(ctx.text(properties::PASSWORD), Some("password"));
    }

    #[test]
    fn test_empty_value_leaves_existing_property() {
        let mut ctx = RequestContext::default();
        DispatchConfig::Username.apply(&mut ctx, || "first".to_string());
        DispatchConfig::Username.apply(&mut ctx, String::new);
        assert_eq!(ctx.text(properties::USERNAME), Some("first"));
    }

    #[test]
    fn test_resolver_called_once() {
        let mut calls = 0;
        let mut ctx = RequestContext::default();
        DispatchConfig::SoapAction.apply(&mut ctx, || {
            calls += 1;
            "urn:action".to_string()
        });
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_default_timeouts() {
        let mut ctx = RequestContext::default();
        apply_timeouts(&mut ctx, Timeouts::default());
        assert_eq!(ctx.len(), 4);
        assert_eq!(ctx.millis(properties::CONNECT_TIMEOUT), Some(10_000));
        assert_eq!(ctx.millis(properties::LEGACY_CONNECT_TIMEOUT), Some(10_000));
        assert_eq!(ctx.millis(properties::REQUEST_TIMEOUT), Some(50_000));
        assert_eq!(ctx.millis(properties::LEGACY_REQUEST_TIMEOUT), Some(50_000));
    }

    #[test]
    fn test_timeouts_idempotent() {
        let mut ctx = RequestContext::default();
        let timeouts = Timeouts {
            connect_ms: 1_000,
            request_ms: 2_000,
        };
        apply_timeouts(&mut ctx, timeouts);
        let once = ctx.clone();
        apply_timeouts(&mut ctx, timeouts);
        assert_eq!(ctx, once);
    }
}

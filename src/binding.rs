//! Seams to the SOAP binding engine.
//!
//! A [`BindingEngine`] resolves a WSDL into a [`PortBinding`]: something able
//! to carry one payload to the remote port and bring back the response Body.

use crate::config::ServiceEndpoint;
use crate::dispatch::RequestContext;
use crate::error::{BindingError, CallError};
use crate::handler::HeaderMap;
use crate::xml::{XmlFragment, XmlPayload};
use std::sync::Arc;

/// Resolves service descriptors into callable port bindings.
pub trait BindingEngine: Send + Sync {
    /// Fetch and interpret the WSDL, binding to `{namespace}service` / port.
    fn bind(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn PortBinding>, BindingError>;
}

/// Everything the transport needs for one call.
#[derive(Debug, Clone, Copy)]
pub struct OutboundRequest<'a> {
    pub context: &'a RequestContext,
    pub headers: &'a HeaderMap,
    pub payload: &'a XmlPayload,
}

/// A port resolved from a WSDL.
pub trait PortBinding: Send + Sync {
    /// Address published in the WSDL for this port.
    fn address(&self) -> &str;

    /// Send `request` and return the response Body element.
    fn call(&self, request: OutboundRequest<'_>) -> Result<XmlFragment, CallError>;
}

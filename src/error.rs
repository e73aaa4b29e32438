//! Error types for the SOAP invoker.

use std::fmt;
use thiserror::Error;

/// Top-level service errors.
#[derive(Error, Debug)]
pub enum SoapServiceError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to access WSDL [{wsdl_url}]: {source}")]
    Initialization {
        wsdl_url: String,
        #[source]
        source: BindingError,
    },

    #[error("Service has not been initialized")]
    NotInitialized,

    #[error("Failed to invoke service [{service}] for operation [{port}]: {source}")]
    Invocation {
        service: String,
        port: String,
        #[source]
        source: CallError,
    },
}

impl SoapServiceError {
    /// The per-call failure wrapped by an invocation error, if any.
    pub fn call_error(&self) -> Option<&CallError> {
        match self {
            Self::Invocation { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Errors raised while resolving a WSDL binding.
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Malformed WSDL URL: {0}")]
    InvalidWsdlUrl(String),

    #[error("WSDL could not be retrieved: {0}")]
    WsdlFetch(String),

    #[error("WSDL parsing error: {0}")]
    WsdlParse(String),

    #[error("Service {{{namespace}}}{name} not found in WSDL")]
    ServiceNotFound { namespace: String, name: String },

    #[error("Port {port} not found in service {service}")]
    PortNotFound { service: String, port: String },

    #[error("Unsupported binding for port {port}: {reason}")]
    UnsupportedBinding { port: String, reason: String },
}

/// Errors raised by a single remote call.
#[derive(Error, Debug)]
pub enum CallError {
    #[error("Malformed XML: {0}")]
    MalformedXml(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SOAP fault: {0}")]
    Fault(SoapFault),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {status}: {body}")]
    HttpStatus { status: u16, body: String },

    #[error("Handler {0} rejected the outbound message")]
    HandlerRejected(String),

    #[error("Transform error: {0}")]
    Transform(String),

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] BindingError),
}

/// A fault returned by the remote peer.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SoapFault {
    /// Fault code (`faultcode` or `Code/Value`)
    pub code: String,
    /// Human-readable reason (`faultstring` or `Reason/Text`)
    pub reason: String,
    /// Raw detail content, if present
    pub detail: Option<String>,
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.code.is_empty() {
            write!(f, "{}", self.reason)
        } else {
            write!(f, "[{}] {}", self.code, self.reason)
        }
    }
}

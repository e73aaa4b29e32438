//! SOAP service invoker for Zentinel
//!
//! Calls one operation of a WSDL-described SOAP service with an XML payload
//! and replaces the payload with the response body.
//!
//! # Features
//!
//! - WSDL 1.1 port resolution (SOAP 1.1 and 1.2 bindings) over http, https and file URLs
//! - Persistent or per-message invocation handles
//! - SOAP action, endpoint override, basic authentication and timeouts per handle
//! - Message metadata forwarded as HTTP request headers through a filter
//! - SOAP faults surfaced as typed errors
//! - Two response transformers for namespace handling
//!
//! # Example
//!
//! ```ignore
//! use zentinel_soap_invoker::{SoapMessage, SoapService, SoapServiceConfig};
//!
//! let mut service = SoapService::new(config);
//! service.initialize()?;
//!
//! let mut message = SoapMessage::new(r#"<ws:performEcho xmlns:ws="http://ws.example.com/"><arg0>Hello World</arg0></ws:performEcho>"#);
//! service.invoke(&mut message)?;
//! println!("{}", message.content());
//! ```

pub mod binding;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod handler;
pub mod http;
pub mod lifecycle;
pub mod message;
pub mod metadata;
pub mod secret;
pub mod service;
pub mod transform;
pub mod wsdl;
pub mod xml;

pub use binding::{BindingEngine, PortBinding};
pub use config::{MetadataFilterConfig, SoapServiceConfig};
pub use dispatch::{Dispatch, DispatchConfig};
pub use error::{BindingError, CallError, SoapFault, SoapServiceError};
pub use handler::{Handler, RequestHeaderInjector};
pub use http::HttpBindingEngine;
pub use lifecycle::DispatchStrategy;
pub use message::{AdapterMessage, MetadataElement, SoapMessage};
pub use service::{ServiceStats, SoapService};

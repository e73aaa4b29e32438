//! HTTP binding engine: resolves ports from WSDL and posts SOAP envelopes
//! with ureq.

use crate::binding::{BindingEngine, OutboundRequest, PortBinding};
use crate::config::{ServiceEndpoint, Timeouts, DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_REQUEST_TIMEOUT_MS};
use crate::dispatch::{properties, RequestContext};
use crate::error::{BindingError, CallError};
use crate::wsdl;
use crate::xml::{extract_body, wrap_envelope, SoapVersion, XmlFragment};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, trace};

/// Longest response body excerpt kept in an HTTP status error.
const MAX_ERROR_BODY: usize = 512;

/// Binding engine over HTTP(S).
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpBindingEngine {
    /// Timeouts used when fetching WSDL documents.
    pub fetch_timeouts: Timeouts,
}

impl BindingEngine for HttpBindingEngine {
    fn bind(&self, endpoint: &ServiceEndpoint) -> Result<Arc<dyn PortBinding>, BindingError> {
        let document = wsdl::load_wsdl(&endpoint.wsdl_url, self.fetch_timeouts)?;
        let definition = wsdl::parse_wsdl(&document)?;
        let port = definition.resolve_port(endpoint)?;

        debug!(
            service = %endpoint.service_name,
            port = %endpoint.port_name,
            address = %port.address,
            version = ?port.version,
            "Bound SOAP port"
        );

        Ok(Arc::new(HttpPort::new(port.address, port.version)))
    }
}

/// A SOAP port reached over HTTP.
///
/// The ureq agent, and with it the connection pool, is kept between calls
/// and rebuilt only when the requested timeouts change.
pub struct HttpPort {
    address: String,
    version: SoapVersion,
    agent: Mutex<Option<(Timeouts, ureq::Agent)>>,
}

impl HttpPort {
    pub fn new(address: impl Into<String>, version: SoapVersion) -> Self {
        Self {
            address: address.into(),
            version,
            agent: Mutex::new(None),
        }
    }

    fn agent(&self, timeouts: Timeouts) -> Result<ureq::Agent, CallError> {
        let mut cached = self
            .agent
            .lock()
            .map_err(|e| CallError::Transport(e.to_string()))?;
        if let Some((current, agent)) = cached.as_ref() {
            if *current == timeouts {
                return Ok(agent.clone());
            }
        }

        debug!(
            connect_ms = timeouts.connect_ms,
            request_ms = timeouts.request_ms,
            "Building HTTP agent"
        );
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .timeout_connect(Some(Duration::from_millis(timeouts.connect_ms)))
            .timeout_global(Some(Duration::from_millis(timeouts.request_ms)))
            .build()
            .into();
        *cached = Some((timeouts, agent.clone()));
        Ok(agent)
    }
}

impl fmt::Debug for HttpPort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpPort")
            .field("address", &self.address)
            .field("version", &self.version)
            .finish()
    }
}

impl PortBinding for HttpPort {
    fn address(&self) -> &str {
        &self.address
    }

    fn call(&self, request: OutboundRequest<'_>) -> Result<XmlFragment, CallError> {
        let ctx = request.context;
        let address = ctx
            .text(properties::ENDPOINT_ADDRESS)
            .unwrap_or(&self.address);
        let timeouts = effective_timeouts(ctx);
        let action = if ctx.flag(properties::SOAP_ACTION_USE) {
            ctx.text(properties::SOAP_ACTION_URI)
        } else {
            None
        };

        let agent = self.agent(timeouts)?;

        let mut builder = agent
            .post(address)
            .header("Content-Type", self.version.content_type(action));

        if self.version == SoapVersion::Soap11 {
            builder = builder.header("SOAPAction", format!("\"{}\"", action.unwrap_or("")));
        }

        if let Some(username) = ctx.text(properties::USERNAME) {
            let password = ctx.text(properties::PASSWORD).unwrap_or("");
            let credentials = STANDARD.encode(format!("{}:{}", username, password));
            builder = builder.header("Authorization", format!("Basic {}", credentials));
        }

        for (name, values) in request.headers {
            for value in values {
                builder = builder.header(name.as_str(), value.as_str());
            }
        }

        let envelope = wrap_envelope(self.version, request.payload);
        trace!(address = %address, envelope = %envelope, "Sending SOAP request");

        let mut response = builder.send(envelope).map_err(call_error)?;
        let status = response.status().as_u16();
        let body = response.body_mut().read_to_string().map_err(call_error)?;

        debug!(address = %address, status = status, "SOAP response received");

        let success = (200..300).contains(&status);
        match extract_body(&body) {
            Ok(fragment) if success => Ok(fragment),
            Err(CallError::Fault(fault)) => Err(CallError::Fault(fault)),
            Err(e) if success => Err(e),
            _ => Err(CallError::HttpStatus {
                status,
                body: excerpt(&body),
            }),
        }
    }
}

/// Timeouts from the primary keys, then the legacy keys, then defaults.
fn effective_timeouts(ctx: &RequestContext) -> Timeouts {
    Timeouts {
        connect_ms: ctx
            .millis(properties::CONNECT_TIMEOUT)
            .or_else(|| ctx.millis(properties::LEGACY_CONNECT_TIMEOUT))
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
        request_ms: ctx
            .millis(properties::REQUEST_TIMEOUT)
            .or_else(|| ctx.millis(properties::LEGACY_REQUEST_TIMEOUT))
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
    }
}

fn call_error(e: ureq::Error) -> CallError {
    match e {
        ureq::Error::Timeout(kind) => CallError::Timeout(kind.to_string()),
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::TimedOut => {
            CallError::Timeout(io.to_string())
        }
        other => CallError::Transport(other.to_string()),
    }
}

fn excerpt(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= MAX_ERROR_BODY {
        return trimmed.to_string();
    }
    let mut end = MAX_ERROR_BODY;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}

//! Configuration types for the SOAP invoker.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Default connection timeout (milliseconds).
pub const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 10_000;

/// Default request timeout (milliseconds).
pub const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 50_000;

/// Main configuration for a SOAP service invocation.
///
/// String fields other than the endpoint descriptor may contain `%message{..}`
/// expressions; these are only expanded when `per_message_dispatch` is set.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SoapServiceConfig {
    /// URL from which to download the WSDL
    pub wsdl_url: String,

    /// Target namespace of the service
    pub namespace: String,

    /// Name of the service to be invoked
    pub service_name: String,

    /// Port name within the service
    pub port_name: String,

    /// SOAP action to send
    pub soap_action: String,

    /// Service address overriding the one in the WSDL
    pub endpoint_address: String,

    /// Deprecated alias of `endpoint_address`
    pub wsdl_port_url: String,

    /// Username for HTTP basic authentication
    pub username: String,

    /// Password for HTTP basic authentication (may be encoded)
    pub password: String,

    /// Connection timeout in milliseconds
    pub connection_timeout_ms: Option<u64>,

    /// Request timeout in milliseconds
    pub request_timeout_ms: Option<u64>,

    /// Build a new dispatch for every message
    pub per_message_dispatch: bool,

    /// Use the namespace-normalizing transformer for responses
    pub use_fallback_transformer: bool,

    /// Log outgoing requests
    pub enable_debug: bool,

    /// Which metadata becomes HTTP request headers
    pub metadata_filter: MetadataFilterConfig,
}

impl Default for SoapServiceConfig {
    fn default() -> Self {
        Self {
            wsdl_url: String::new(),
            namespace: String::new(),
            service_name: String::new(),
            port_name: String::new(),
            soap_action: String::new(),
            endpoint_address: String::new(),
            wsdl_port_url: String::new(),
            username: String::new(),
            password: String::new(),
            connection_timeout_ms: None,
            request_timeout_ms: None,
            per_message_dispatch: false,
            use_fallback_transformer: false,
            enable_debug: false,
            metadata_filter: MetadataFilterConfig::default(),
        }
    }
}

impl SoapServiceConfig {
    /// Check required fields.
    pub fn validate(&self) -> Result<(), String> {
        let required = [
            ("wsdl_url", &self.wsdl_url),
            ("namespace", &self.namespace),
            ("service_name", &self.service_name),
            ("port_name", &self.port_name),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(format!("{} may not be blank", name));
            }
        }
        Ok(())
    }

    /// The endpoint descriptor part of this configuration.
    pub fn endpoint(&self) -> ServiceEndpoint {
        ServiceEndpoint {
            wsdl_url: self.wsdl_url.clone(),
            namespace: self.namespace.clone(),
            service_name: self.service_name.clone(),
            port_name: self.port_name.clone(),
        }
    }

    /// Endpoint address override, preferring `endpoint_address` over the
    /// deprecated `wsdl_port_url`.
    pub fn endpoint_address(&self) -> String {
        if !self.endpoint_address.is_empty() {
            return self.endpoint_address.clone();
        }
        if !self.wsdl_port_url.is_empty() {
            warn!("wsdl_port_url is deprecated; use endpoint_address instead");
            return self.wsdl_port_url.clone();
        }
        String::new()
    }

    /// Effective timeouts.
    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            connect_ms: self
                .connection_timeout_ms
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS),
            request_ms: self.request_timeout_ms.unwrap_or(DEFAULT_REQUEST_TIMEOUT_MS),
        }
    }
}

/// Identifies which operation binding to materialize.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEndpoint {
    pub wsdl_url: String,
    pub namespace: String,
    pub service_name: String,
    pub port_name: String,
}

/// Resolved timeouts in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub connect_ms: u64,
    pub request_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_ms: DEFAULT_CONNECT_TIMEOUT_MS,
            request_ms: DEFAULT_REQUEST_TIMEOUT_MS,
        }
    }
}

/// Metadata filter selection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MetadataFilterConfig {
    /// No metadata is passed on
    #[default]
    RemoveAll,
    /// All metadata is passed on
    NoOp,
    /// Keys matching an include pattern and no exclude pattern
    Glob {
        #[serde(default)]
        include: Vec<String>,
        #[serde(default)]
        exclude: Vec<String>,
    },
}

//! WSDL 1.1 retrieval and port resolution.
//!
//! Only what is needed to call a port is read: the target namespace, the
//! services with their ports and addresses, and the SOAP version of each
//! binding. Imports and schemas are not followed.

use crate::config::{ServiceEndpoint, Timeouts};
use crate::error::BindingError;
use crate::xml::SoapVersion;
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::NsReader;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const WSDL_NS: &str = "http://schemas.xmlsoap.org/wsdl/";
pub const WSDL_SOAP_11_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap/";
pub const WSDL_SOAP_12_NS: &str = "http://schemas.xmlsoap.org/wsdl/soap12/";

/// The parts of a WSDL document relevant to invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsdlDefinition {
    pub target_namespace: String,
    pub services: Vec<WsdlService>,
    pub bindings: Vec<WsdlBinding>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsdlService {
    pub name: String,
    pub ports: Vec<WsdlPort>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsdlPort {
    pub name: String,
    /// Local name of the referenced binding
    pub binding: String,
    pub address: Option<String>,
    pub version: Option<SoapVersion>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WsdlBinding {
    pub name: String,
    pub version: Option<SoapVersion>,
}

/// A port ready to be called.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPort {
    pub address: String,
    pub version: SoapVersion,
}

impl WsdlDefinition {
    /// Find the port named by `endpoint`.
    pub fn resolve_port(&self, endpoint: &ServiceEndpoint) -> Result<ResolvedPort, BindingError> {
        let service = self
            .services
            .iter()
            .find(|s| s.name == endpoint.service_name)
            .filter(|_| self.target_namespace == endpoint.namespace)
            .ok_or_else(|| BindingError::ServiceNotFound {
                namespace: endpoint.namespace.clone(),
                name: endpoint.service_name.clone(),
            })?;

        let port = service
            .ports
            .iter()
            .find(|p| p.name == endpoint.port_name)
            .ok_or_else(|| BindingError::PortNotFound {
                service: service.name.clone(),
                port: endpoint.port_name.clone(),
            })?;

        let version = port
            .version
            .or_else(|| {
                self.bindings
                    .iter()
                    .find(|b| b.name == port.binding)
                    .and_then(|b| b.version)
            })
            .ok_or_else(|| BindingError::UnsupportedBinding {
                port: port.name.clone(),
                reason: "not a SOAP binding".to_string(),
            })?;

        let address = port
            .address
            .clone()
            .ok_or_else(|| BindingError::UnsupportedBinding {
                port: port.name.clone(),
                reason: "no soap:address location".to_string(),
            })?;

        Ok(ResolvedPort { address, version })
    }
}

/// Parse a WSDL 1.1 document.
pub fn parse_wsdl(xml: &str) -> Result<WsdlDefinition, BindingError> {
    let mut reader = NsReader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut definition = WsdlDefinition::default();
    let mut in_definitions = false;
    let mut current_service: Option<WsdlService> = None;
    let mut current_port: Option<WsdlPort> = None;
    let mut current_binding: Option<WsdlBinding> = None;

    loop {
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| BindingError::WsdlParse(e.to_string()))?;
        let ns = match resolved {
            ResolveResult::Bound(ns) => String::from_utf8_lossy(ns.as_ref()).into_owned(),
            _ => String::new(),
        };

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let local = local_name(e);

                match (ns.as_str(), local.as_str()) {
                    (WSDL_NS, "definitions") => {
                        in_definitions = true;
                        definition.target_namespace = attribute(e, "targetNamespace")?.unwrap_or_default();
                    }
                    (WSDL_NS, "service") if in_definitions => {
                        let service = WsdlService {
                            name: attribute(e, "name")?.unwrap_or_default(),
                            ports: Vec::new(),
                        };
                        if is_start {
                            current_service = Some(service);
                        } else {
                            definition.services.push(service);
                        }
                    }
                    (WSDL_NS, "port") if current_service.is_some() => {
                        let port = WsdlPort {
                            name: attribute(e, "name")?.unwrap_or_default(),
                            binding: local_part(&attribute(e, "binding")?.unwrap_or_default()),
                            address: None,
                            version: None,
                        };
                        match (is_start, current_service.as_mut()) {
                            (true, _) => current_port = Some(port),
                            (false, Some(service)) => service.ports.push(port),
                            (false, None) => {}
                        }
                    }
                    (WSDL_SOAP_11_NS | WSDL_SOAP_12_NS, "address") => {
                        if let Some(port) = current_port.as_mut() {
                            port.address = attribute(e, "location")?;
                            port.version = binding_version(&ns);
                        }
                    }
                    (WSDL_NS, "binding") if in_definitions => {
                        let binding = WsdlBinding {
                            name: attribute(e, "name")?.unwrap_or_default(),
                            version: None,
                        };
                        if is_start {
                            current_binding = Some(binding);
                        } else {
                            definition.bindings.push(binding);
                        }
                    }
                    (WSDL_SOAP_11_NS | WSDL_SOAP_12_NS, "binding") => {
                        if let Some(binding) = current_binding.as_mut() {
                            binding.version = binding_version(&ns);
                        }
                    }
                    _ => {}
                }
            }
            Event::End(ref e) => {
                let local = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                match (ns.as_str(), local.as_str()) {
                    (WSDL_NS, "port") => {
                        if let (Some(port), Some(service)) = (current_port.take(), current_service.as_mut()) {
                            service.ports.push(port);
                        }
                    }
                    (WSDL_NS, "service") => {
                        if let Some(service) = current_service.take() {
                            definition.services.push(service);
                        }
                    }
                    (WSDL_NS, "binding") => {
                        if let Some(binding) = current_binding.take() {
                            definition.bindings.push(binding);
                        }
                    }
                    (WSDL_NS, "definitions") => in_definitions = false,
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if definition.target_namespace.is_empty() && definition.services.is_empty() {
        return Err(BindingError::WsdlParse(
            "Document is not a WSDL 1.1 definitions element".to_string(),
        ));
    }
    Ok(definition)
}

/// Parse a WSDL location, accepting http, https and file URLs.
pub fn parse_location(location: &str) -> Result<Url, BindingError> {
    let url = Url::parse(location)
        .map_err(|e| BindingError::InvalidWsdlUrl(format!("{}: {}", location, e)))?;
    match url.scheme() {
        "http" | "https" | "file" => Ok(url),
        scheme => Err(BindingError::InvalidWsdlUrl(format!(
            "unsupported scheme '{}' in {}",
            scheme, location
        ))),
    }
}

/// Retrieve a WSDL document from an http(s) or file URL.
pub fn load_wsdl(location: &str, timeouts: Timeouts) -> Result<String, BindingError> {
    let url = parse_location(location)?;

    debug!(wsdl_url = %url, "Loading WSDL");

    match url.scheme() {
        "http" | "https" => {
            let config = ureq::Agent::config_builder()
                .timeout_connect(Some(Duration::from_millis(timeouts.connect_ms)))
                .timeout_global(Some(Duration::from_millis(timeouts.request_ms)))
                .build();
            let agent: ureq::Agent = config.into();
            let mut response = agent
                .get(url.as_str())
                .call()
                .map_err(|e| BindingError::WsdlFetch(e.to_string()))?;
            response
                .body_mut()
                .read_to_string()
                .map_err(|e| BindingError::WsdlFetch(e.to_string()))
        }
        _ => {
            let path = url
                .to_file_path()
                .map_err(|_| BindingError::InvalidWsdlUrl(location.to_string()))?;
            std::fs::read_to_string(&path)
                .map_err(|e| BindingError::WsdlFetch(format!("{}: {}", path.display(), e)))
        }
    }
}

fn binding_version(ns: &str) -> Option<SoapVersion> {
    match ns {
        WSDL_SOAP_11_NS => Some(SoapVersion::Soap11),
        WSDL_SOAP_12_NS => Some(SoapVersion::Soap12),
        _ => None,
    }
}

fn local_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn local_part(qname: &str) -> String {
    qname.rsplit(':').next().unwrap_or(qname).to_string()
}

fn attribute(e: &BytesStart, name: &str) -> Result<Option<String>, BindingError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| BindingError::WsdlParse(e.to_string()))?;
        if attr.key.as_ref() == name.as_bytes() {
            let value = attr
                .unescape_value()
                .map_err(|e| BindingError::WsdlParse(e.to_string()))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

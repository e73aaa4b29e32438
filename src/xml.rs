//! SOAP XML handling: request payload parsing, envelope marshaling and
//! response body extraction.
//!
//! Uses quick-xml, which never expands external entities; DOCTYPE
//! declarations in request payloads are rejected outright.

use crate::error::{CallError, SoapFault};
use quick_xml::events::{BytesStart, Event};
use quick_xml::name::ResolveResult;
use quick_xml::{NsReader, Reader};

/// SOAP namespace URIs.
pub const SOAP_11_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const SOAP_12_NS: &str = "http://www.w3.org/2003/05/soap-envelope";

/// SOAP versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SoapVersion {
    /// SOAP 1.1 (namespace: http://schemas.xmlsoap.org/soap/envelope/)
    Soap11,
    /// SOAP 1.2 (namespace: http://www.w3.org/2003/05/soap-envelope)
    Soap12,
}

impl SoapVersion {
    /// Envelope namespace for this version.
    pub fn namespace(&self) -> &'static str {
        match self {
            Self::Soap11 => SOAP_11_NS,
            Self::Soap12 => SOAP_12_NS,
        }
    }

    fn from_namespace(ns: &str) -> Option<Self> {
        match ns {
            SOAP_11_NS => Some(Self::Soap11),
            SOAP_12_NS => Some(Self::Soap12),
            _ => None,
        }
    }

    /// HTTP Content-Type for a request. SOAP 1.2 carries the action here.
    pub fn content_type(&self, action: Option<&str>) -> String {
        match (self, action) {
            (Self::Soap11, _) => "text/xml; charset=utf-8".to_string(),
            (Self::Soap12, Some(action)) => {
                format!("application/soap+xml; charset=utf-8; action=\"{}\"", action)
            }
            (Self::Soap12, None) => "application/soap+xml; charset=utf-8".to_string(),
        }
    }
}

/// A namespace declaration; `prefix` is `None` for the default namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceDecl {
    pub prefix: Option<String>,
    pub uri: String,
}

impl NamespaceDecl {
    /// The attribute name declaring this namespace.
    pub fn attribute_name(&self) -> String {
        match &self.prefix {
            Some(prefix) => format!("xmlns:{}", prefix),
            None => "xmlns".to_string(),
        }
    }
}

/// A well-formed request body, ready to be enclosed in an envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlPayload {
    xml: String,
    root: String,
    root_namespace: Option<String>,
}

impl XmlPayload {
    pub fn as_str(&self) -> &str {
        &self.xml
    }

    /// Qualified name of the root element (the operation).
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn root_namespace(&self) -> Option<&str> {
        self.root_namespace.as_deref()
    }
}

/// A response body element plus the namespaces in scope where it was found.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct XmlFragment {
    pub xml: String,
    pub inherited: Vec<NamespaceDecl>,
}

impl XmlFragment {
    pub fn is_empty(&self) -> bool {
        self.xml.trim().is_empty()
    }
}

/// Parse a request payload as namespace-aware XML.
///
/// The payload must have exactly one root element and every prefix must be
/// bound. The XML declaration and anything before the root are dropped.
pub fn read_payload(data: &[u8]) -> Result<XmlPayload, CallError> {
    let xml_str = std::str::from_utf8(data)
        .map_err(|e| CallError::MalformedXml(format!("Invalid UTF-8: {}", e)))?;
    let xml_str = xml_str.strip_prefix('\u{FEFF}').unwrap_or(xml_str);

    let mut reader = NsReader::from_str(xml_str);

    let mut depth = 0u32;
    let mut root: Option<(String, Option<String>)> = None;
    let mut root_start = 0usize;

    loop {
        let before = reader.buffer_position() as usize;
        let (resolved, event) = reader
            .read_resolved_event()
            .map_err(|e| CallError::MalformedXml(format!("XML parse error: {}", e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let namespace = match resolved {
                    ResolveResult::Bound(ns) => Some(String::from_utf8_lossy(ns.as_ref()).into_owned()),
                    ResolveResult::Unbound => None,
                    ResolveResult::Unknown(prefix) => {
                        return Err(CallError::MalformedXml(format!(
                            "Unbound namespace prefix '{}'",
                            String::from_utf8_lossy(&prefix)
                        )));
                    }
                };
                check_attribute_prefixes(&reader, e)?;

                if depth == 0 {
                    if root.is_some() {
                        return Err(CallError::MalformedXml(
                            "Multiple root elements".to_string(),
                        ));
                    }
                    root = Some((qualified_name(e), namespace));
                    root_start = before;
                }
                if is_start {
                    depth += 1;
                }
            }
            Event::End(_) => {
                depth = depth.saturating_sub(1);
            }
            Event::Text(ref e) if depth == 0 => {
                if e.iter().any(|b| !b.is_ascii_whitespace()) {
                    return Err(CallError::MalformedXml(
                        "Text content outside of the root element".to_string(),
                    ));
                }
            }
            Event::CData(_) if depth == 0 => {
                return Err(CallError::MalformedXml(
                    "CDATA outside of the root element".to_string(),
                ));
            }
            Event::DocType(_) => {
                return Err(CallError::MalformedXml(
                    "DOCTYPE declarations are not allowed".to_string(),
                ));
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if depth != 0 {
        return Err(CallError::MalformedXml(
            "Unexpected end of document".to_string(),
        ));
    }
    let (root, root_namespace) =
        root.ok_or_else(|| CallError::MalformedXml("No root element".to_string()))?;

    Ok(XmlPayload {
        xml: xml_str[root_start..].trim().to_string(),
        root,
        root_namespace,
    })
}

fn check_attribute_prefixes(reader: &NsReader<&[u8]>, e: &BytesStart) -> Result<(), CallError> {
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CallError::MalformedXml(format!("Bad attribute: {}", e)))?;
        if is_namespace_attribute(attr.key.as_ref()) {
            continue;
        }
        if let (ResolveResult::Unknown(prefix), _) = reader.resolve_attribute(attr.key) {
            return Err(CallError::MalformedXml(format!(
                "Unbound namespace prefix '{}'",
                String::from_utf8_lossy(&prefix)
            )));
        }
    }
    Ok(())
}

/// Enclose a payload in a SOAP envelope.
pub fn wrap_envelope(version: SoapVersion, payload: &XmlPayload) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><soap:Envelope xmlns:soap="{}"><soap:Body>{}</soap:Body></soap:Envelope>"#,
        version.namespace(),
        payload.as_str()
    )
}

/// Extract the first element of the SOAP Body.
///
/// A `Fault` element is turned into [`CallError::Fault`]. An empty Body
/// yields an empty fragment.
pub fn extract_body(envelope: &str) -> Result<XmlFragment, CallError> {
    let mut reader = Reader::from_str(envelope);
    let mut scopes = NamespaceScopes::default();

    let mut depth = 0usize;
    let mut version: Option<SoapVersion> = None;
    let mut body_scope: Option<Vec<NamespaceDecl>> = None;
    let mut body_closed = false;
    let mut capture_start: Option<usize> = None;
    let mut capture: Option<(usize, usize)> = None;
    let mut fault: Option<FaultReader> = None;

    loop {
        let before = reader.buffer_position() as usize;
        let event = reader
            .read_event()
            .map_err(|e| CallError::MalformedXml(format!("Response parse error: {}", e)))?;

        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                let is_start = matches!(event, Event::Start(_));
                let level = depth + 1;
                scopes.push(e)?;
                let (prefix, local) = split_name(e.name().as_ref());
                let ns = scopes.resolve(prefix.as_deref()).map(str::to_string);

                if level == 1 {
                    version = ns.as_deref().and_then(SoapVersion::from_namespace);
                    if local != "Envelope" || version.is_none() {
                        return Err(CallError::MalformedXml(
                            "Response is not a SOAP envelope".to_string(),
                        ));
                    }
                } else if level == 2 && local == "Body" && ns.as_deref() == version.map(|v| v.namespace()) {
                    body_scope = Some(scopes.in_scope());
                    if !is_start {
                        body_closed = true;
                    }
                } else if level == 3 && body_scope.is_some() && !body_closed && capture_start.is_none() {
                    capture_start = Some(before);
                    if local == "Fault" && ns.as_deref() == version.map(|v| v.namespace()) {
                        fault = Some(FaultReader::default());
                    }
                    if !is_start {
                        capture = Some((before, reader.buffer_position() as usize));
                    }
                } else if let Some(fault) = fault.as_mut() {
                    if capture.is_none() {
                        fault.enter(&local, before, reader.buffer_position() as usize, is_start);
                    }
                }

                if is_start {
                    depth = level;
                } else {
                    scopes.pop();
                }
            }
            Event::End(ref e) => {
                let (_, local) = split_name(e.name().as_ref());
                if depth == 3 && capture_start.is_some() && capture.is_none() {
                    capture = capture_start.map(|start| (start, reader.buffer_position() as usize));
                } else if depth == 2 && body_scope.is_some() && local == "Body" {
                    body_closed = true;
                } else if let Some(fault) = fault.as_mut() {
                    if capture.is_none() {
                        fault.leave(before);
                    }
                }
                depth = depth.saturating_sub(1);
                scopes.pop();
            }
            Event::Text(ref e) => {
                if let Some(fault) = fault.as_mut() {
                    if capture.is_none() {
                        let text = e
                            .unescape()
                            .map_err(|e| CallError::MalformedXml(e.to_string()))?;
                        fault.text(&text);
                    }
                }
            }
            Event::CData(ref e) => {
                if let Some(fault) = fault.as_mut() {
                    if capture.is_none() {
                        fault.text(&String::from_utf8_lossy(e));
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    let inherited = body_scope
        .ok_or_else(|| CallError::MalformedXml("SOAP Body not found".to_string()))?;

    if let Some(fault) = fault {
        return Err(CallError::Fault(fault.finish(envelope)));
    }

    let xml = match capture {
        Some((start, end)) => envelope[start..end].trim().to_string(),
        None => String::new(),
    };
    Ok(XmlFragment { xml, inherited })
}

/// Collects faultcode / faultstring / detail while walking a Fault element.
#[derive(Debug, Default)]
struct FaultReader {
    path: Vec<String>,
    code: String,
    reason: String,
    detail_start: Option<usize>,
    detail: Option<(usize, usize)>,
}

impl FaultReader {
    fn enter(&mut self, local: &str, before: usize, after: usize, is_start: bool) {
        if self.path.is_empty() && (local == "detail" || local == "Detail") {
            if is_start {
                self.detail_start = Some(after);
            } else {
                self.detail = Some((before, before));
            }
        }
        if is_start {
            self.path.push(local.to_string());
        }
    }

    fn leave(&mut self, before: usize) {
        if self.path.len() == 1 {
            if let Some(start) = self.detail_start.take() {
                self.detail = Some((start, before));
            }
        }
        self.path.pop();
    }

    fn text(&mut self, text: &str) {
        let path: Vec<&str> = self.path.iter().map(String::as_str).collect();
        match path.as_slice() {
            ["faultcode"] | ["Code", "Value"] => self.code.push_str(text.trim()),
            ["faultstring"] | ["Reason", "Text"] => self.reason.push_str(text),
            _ => {}
        }
    }

    fn finish(self, envelope: &str) -> SoapFault {
        SoapFault {
            code: self.code,
            reason: self.reason.trim().to_string(),
            detail: self
                .detail
                .map(|(start, end)| envelope[start..end].trim().to_string()),
        }
    }
}

/// Namespace declarations per open element.
#[derive(Debug, Default)]
pub(crate) struct NamespaceScopes {
    scopes: Vec<Vec<NamespaceDecl>>,
}

impl NamespaceScopes {
    pub(crate) fn push(&mut self, e: &BytesStart) -> Result<(), CallError> {
        self.scopes.push(declarations(e)?);
        Ok(())
    }

    pub(crate) fn pop(&mut self) {
        self.scopes.pop();
    }

    pub(crate) fn resolve(&self, prefix: Option<&str>) -> Option<&str> {
        self.scopes
            .iter()
            .rev()
            .flat_map(|scope| scope.iter())
            .find(|decl| decl.prefix.as_deref() == prefix)
            .map(|decl| decl.uri.as_str())
            .filter(|uri| !uri.is_empty())
    }

    pub(crate) fn declares(&self, prefix: Option<&str>) -> bool {
        self.scopes
            .iter()
            .flat_map(|scope| scope.iter())
            .any(|decl| decl.prefix.as_deref() == prefix)
    }

    /// Effective declarations, innermost winning.
    pub(crate) fn in_scope(&self) -> Vec<NamespaceDecl> {
        let mut effective: Vec<NamespaceDecl> = Vec::new();
        for decl in self.scopes.iter().flat_map(|scope| scope.iter()) {
            match effective.iter_mut().find(|d| d.prefix == decl.prefix) {
                Some(existing) => existing.uri = decl.uri.clone(),
                None => effective.push(decl.clone()),
            }
        }
        effective
    }
}

/// Namespace declarations made by an element.
pub(crate) fn declarations(e: &BytesStart) -> Result<Vec<NamespaceDecl>, CallError> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| CallError::MalformedXml(format!("Bad attribute: {}", e)))?;
        let key = std::str::from_utf8(attr.key.as_ref()).unwrap_or("");
        let prefix = if key == "xmlns" {
            None
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            Some(prefix.to_string())
        } else {
            continue;
        };
        let uri = attr
            .unescape_value()
            .map_err(|e| CallError::MalformedXml(e.to_string()))?
            .into_owned();
        decls.push(NamespaceDecl { prefix, uri });
    }
    Ok(decls)
}

pub(crate) fn is_namespace_attribute(key: &[u8]) -> bool {
    key == b"xmlns" || key.starts_with(b"xmlns:")
}

/// Split a qualified name into prefix and local part.
pub(crate) fn split_name(name: &[u8]) -> (Option<String>, String) {
    let name = String::from_utf8_lossy(name);
    match name.split_once(':') {
        Some((prefix, local)) => (Some(prefix.to_string()), local.to_string()),
        None => (None, name.into_owned()),
    }
}

fn qualified_name(e: &BytesStart) -> String {
    String::from_utf8_lossy(e.name().as_ref()).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    const ECHO_REQUEST: &str = r#"<oxy:performEcho xmlns:oxy="http://ws.example.com/"><arg0>Hello World</arg0></oxy:performEcho>"#;

    #[test]
    fn test_read_payload() {
        let payload = read_payload(ECHO_REQUEST.as_bytes()).unwrap();
        assert_eq!(payload.root(), "oxy:performEcho");
        assert_eq!(payload.root_namespace(), Some("http://ws.example.com/"));
        assert_eq!(payload.as_str(), ECHO_REQUEST);
    }

    #[test]
    fn test_read_payload_strips_declaration() {
        let xml = format!("<?xml version=\"1.0\"?>\n{}\n", ECHO_REQUEST);
        let payload = read_payload(xml.as_bytes()).unwrap();
        assert_eq!(payload.as_str(), ECHO_REQUEST);
    }

    #[test]
    fn test_read_payload_strips_byte_order_mark() {
        let payload = read_payload(b"\xEF\xBB\xBF<a>x</a>").unwrap();
        assert_eq!(payload.as_str(), "<a>x</a>");

        let payload =
            read_payload("\u{FEFF}<?xml version=\"1.0\"?>\n<a>x</a>".as_bytes()).unwrap();
        assert_eq!(payload.as_str(), "<a>x</a>");
        assert!(!wrap_envelope(SoapVersion::Soap11, &payload).contains('\u{FEFF}'));
    }

    #[test]
    fn test_read_payload_rejects_unbound_prefix() {
        let err = read_payload(b"<oxy:performEcho><arg0/></oxy:performEcho>").unwrap_err();
        assert!(matches!(err, CallError::MalformedXml(_)));
    }

    #[test]
    fn test_read_payload_rejects_mismatched_tags() {
        assert!(read_payload(b"<a><b></a>").is_err());
    }

    #[test]
    fn test_read_payload_rejects_unclosed() {
        assert!(read_payload(b"<a><b/>").is_err());
    }

    #[test]
    fn test_read_payload_rejects_multiple_roots() {
        assert!(read_payload(b"<a/><b/>").is_err());
    }

    #[test]
    fn test_read_payload_rejects_doctype() {
        let xml = r#"<?xml version="1.0"?>
<!DOCTYPE foo [<!ENTITY xxe SYSTEM "file:///etc/passwd">]>
<foo>&xxe;</foo>"#;
        let err = read_payload(xml.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("DOCTYPE"));
    }

    #[test]
    fn test_read_payload_rejects_empty() {
        assert!(read_payload(b"   ").is_err());
        assert!(read_payload(b"not xml").is_err());
    }

    #[test]
    fn test_wrap_envelope() {
        let payload = read_payload(ECHO_REQUEST.as_bytes()).unwrap();
        let envelope = wrap_envelope(SoapVersion::Soap11, &payload);
        assert!(envelope.contains(SOAP_11_NS));
        assert!(envelope.contains("<soap:Body><oxy:performEcho"));

        let envelope = wrap_envelope(SoapVersion::Soap12, &payload);
        assert!(envelope.contains(SOAP_12_NS));
    }

    #[test]
    fn test_content_type() {
        assert_eq!(SoapVersion::Soap11.content_type(Some("urn:a")), "text/xml; charset=utf-8");
        assert!(SoapVersion::Soap12
            .content_type(Some("urn:a"))
            .contains("action=\"urn:a\""));
    }

    #[test]
    fn test_extract_body() {
        let envelope = r#"<?xml version="1.0"?>
<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/" xmlns:ns2="http://ws.example.com/">
  <S:Body>
    <ns2:performEchoResponse><return>Echoing data: Hello World</return></ns2:performEchoResponse>
  </S:Body>
</S:Envelope>"#;
        let fragment = extract_body(envelope).unwrap();
        assert_eq!(
            fragment.xml,
            "<ns2:performEchoResponse><return>Echoing data: Hello World</return></ns2:performEchoResponse>"
        );
        assert!(fragment.inherited.contains(&NamespaceDecl {
            prefix: Some("ns2".to_string()),
            uri: "http://ws.example.com/".to_string(),
        }));
    }

    #[test]
    fn test_extract_body_empty_element() {
        let envelope = r#"<soap:Envelope xmlns:soap="http://www.w3.org/2003/05/soap-envelope"><soap:Body><done xmlns="urn:x"/></soap:Body></soap:Envelope>"#;
        let fragment = extract_body(envelope).unwrap();
        assert_eq!(fragment.xml, r#"<done xmlns="urn:x"/>"#);
    }

    #[test]
    fn test_extract_empty_body() {
        let envelope = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body/></soap:Envelope>"#;
        let fragment = extract_body(envelope).unwrap();
        assert!(fragment.is_empty());
    }

    #[test]
    fn test_extract_soap_11_fault() {
        let envelope = r#"<S:Envelope xmlns:S="http://schemas.xmlsoap.org/soap/envelope/">
  <S:Body>
    <S:Fault>
      <faultcode>S:Server</faultcode>
      <faultstring>We do not support this operation</faultstring>
      <detail><code>42</code></detail>
    </S:Fault>
  </S:Body>
</S:Envelope>"#;
        match extract_body(envelope) {
            Err(CallError::Fault(fault)) => {
                assert_eq!(fault.code, "S:Server");
                assert_eq!(fault.reason, "We do not support this operation");
                assert_eq!(fault.detail.as_deref(), Some("<code>42</code>"));
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_soap_12_fault() {
        let envelope = r#"<env:Envelope xmlns:env="http://www.w3.org/2003/05/soap-envelope">
  <env:Body>
    <env:Fault>
      <env:Code><env:Value>env:Sender</env:Value></env:Code>
      <env:Reason><env:Text xml:lang="en">Bad &amp; wrong</env:Text></env:Reason>
    </env:Fault>
  </env:Body>
</env:Envelope>"#;
        match extract_body(envelope) {
            Err(CallError::Fault(fault)) => {
                assert_eq!(fault.code, "env:Sender");
                assert_eq!(fault.reason, "Bad & wrong");
                assert!(fault.detail.is_none());
            }
            other => panic!("expected fault, got {:?}", other),
        }
    }

    #[test]
    fn test_extract_body_rejects_non_envelope() {
        let err = extract_body("<html><body>Not Found</body></html>").unwrap_err();
        assert!(err.to_string().contains("not a SOAP envelope"));
    }
}

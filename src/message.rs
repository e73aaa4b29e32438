//! Pipeline message abstraction.

use std::io::{Cursor, Read, Write};

/// A key/value metadata entry carried by a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataElement {
    pub key: String,
    pub value: String,
}

impl MetadataElement {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// The in-flight message an invocation works on.
pub trait AdapterMessage {
    /// Expand placeholder expressions against this message.
    fn resolve(&self, expression: &str) -> String;

    /// Metadata in insertion order.
    fn metadata(&self) -> &[MetadataElement];

    /// Reader over the current payload.
    fn input(&self) -> Box<dyn Read + '_>;

    /// Writer replacing the payload.
    fn output(&mut self) -> Box<dyn Write + '_>;
}

/// In-memory message with `%message{key}` expression support.
#[derive(Debug, Clone, Default)]
pub struct SoapMessage {
    payload: Vec<u8>,
    metadata: Vec<MetadataElement>,
}

impl SoapMessage {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            metadata: Vec::new(),
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn content(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }

    /// Add or replace a metadata entry, keeping its original position.
    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.metadata.iter_mut().find(|m| m.key == key) {
            Some(existing) => existing.value = value,
            None => self.metadata.push(MetadataElement { key, value }),
        }
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .iter()
            .find(|m| m.key == key)
            .map(|m| m.value.as_str())
    }
}

const MESSAGE_EXPR_START: &str = "%message{";

impl AdapterMessage for SoapMessage {
    fn resolve(&self, expression: &str) -> String {
        let mut resolved = String::with_capacity(expression.len());
        let mut rest = expression;

        while let Some(start) = rest.find(MESSAGE_EXPR_START) {
            let after = &rest[start + MESSAGE_EXPR_START.len()..];
            let Some(end) = after.find('}') else {
                break;
            };
            resolved.push_str(&rest[..start]);
            // Unknown keys resolve to nothing.
            resolved.push_str(self.metadata_value(&after[..end]).unwrap_or(""));
            rest = &after[end + 1..];
        }
        resolved.push_str(rest);
        resolved
    }

    fn metadata(&self) -> &[MetadataElement] {
        &self.metadata
    }

    fn input(&self) -> Box<dyn Read + '_> {
        Box::new(Cursor::new(self.payload.as_slice()))
    }

    fn output(&mut self) -> Box<dyn Write + '_> {
        self.payload.clear();
        Box::new(&mut self.payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_plain_string() {
        let msg = SoapMessage::new("<a/>");
        assert_eq!(msg.resolve("http://host/service"), "http://host/service");
    }

    #[test]
    fn test_resolve_metadata_expression() {
        let mut msg = SoapMessage::new("<a/>");
        msg.add_metadata("host", "example.org");
        msg.add_metadata("path", "echo");
        assert_eq!(
            msg.resolve("http://%message{host}/%message{path}"),
            "http://example.org/echo"
        );
    }

    #[test]
    fn test_resolve_missing_key_is_empty() {
        let msg = SoapMessage::new("<a/>");
        assert_eq!(msg.resolve("%message{user}"), "");
    }

    #[test]
    fn test_resolve_unterminated_expression_is_literal() {
        let msg = SoapMessage::new("<a/>");
        assert_eq!(msg.resolve("abc%message{user"), "abc%message{user");
    }

    #[test]
    fn test_add_metadata_replaces_in_place() {
        let mut msg = SoapMessage::new("");
        msg.add_metadata("a", "1");
        msg.add_metadata("b", "2");
        msg.add_metadata("a", "3");
        let keys: Vec<_> = msg.metadata().iter().map(|m| m.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(msg.metadata_value("a"), Some("3"));
    }

    #[test]
    fn test_output_replaces_payload() {
        let mut msg = SoapMessage::new("old payload");
        msg.output().write_all(b"new").unwrap();
        assert_eq!(msg.content(), "new");
    }

    #[test]
    fn test_input_reads_payload() {
        let msg = SoapMessage::new("payload");
        let mut buf = String::new();
        msg.input().read_to_string(&mut buf).unwrap();
        assert_eq!(buf, "payload");
    }
}

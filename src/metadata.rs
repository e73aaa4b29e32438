//! Metadata filters deciding which message metadata become request headers.

use crate::config::MetadataFilterConfig;
use crate::message::AdapterMessage;
use glob::Pattern;
use tracing::warn;

/// Ordered header key/value pairs for one call.
pub type HeaderSet = Vec<(String, String)>;

/// Selects the metadata eligible to become request headers.
pub trait MetadataFilter: Send + Sync {
    fn filter(&self, message: &dyn AdapterMessage) -> HeaderSet;
}

/// Passes nothing on.
#[derive(Debug, Clone, Copy, Default)]
pub struct RemoveAllMetadataFilter;

impl MetadataFilter for RemoveAllMetadataFilter {
    fn filter(&self, _message: &dyn AdapterMessage) -> HeaderSet {
        Vec::new()
    }
}

/// Passes everything on.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetadataFilter;

impl MetadataFilter for NoOpMetadataFilter {
    fn filter(&self, message: &dyn AdapterMessage) -> HeaderSet {
        message
            .metadata()
            .iter()
            .map(|m| (m.key.clone(), m.value.clone()))
            .collect()
    }
}

/// Keys matching any include pattern and no exclude pattern.
///
/// An empty include list matches every key.
#[derive(Debug, Clone, Default)]
pub struct GlobMetadataFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl GlobMetadataFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Self {
        Self {
            include: compile(include),
            exclude: compile(exclude),
        }
    }

    fn accepts(&self, key: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|p| p.matches(key));
        included && !self.exclude.iter().any(|p| p.matches(key))
    }
}

impl MetadataFilter for GlobMetadataFilter {
    fn filter(&self, message: &dyn AdapterMessage) -> HeaderSet {
        message
            .metadata()
            .iter()
            .filter(|m| self.accepts(&m.key))
            .map(|m| (m.key.clone(), m.value.clone()))
            .collect()
    }
}

fn compile(patterns: &[String]) -> Vec<Pattern> {
    patterns
        .iter()
        .filter_map(|p| match Pattern::new(p) {
            Ok(pattern) => Some(pattern),
            Err(e) => {
                warn!(pattern = %p, error = %e, "Ignoring invalid metadata pattern");
                None
            }
        })
        .collect()
}

/// Build the filter described by configuration.
pub fn build_filter(config: &MetadataFilterConfig) -> Box<dyn MetadataFilter> {
    match config {
        MetadataFilterConfig::RemoveAll => Box::new(RemoveAllMetadataFilter),
        MetadataFilterConfig::NoOp => Box::new(NoOpMetadataFilter),
        MetadataFilterConfig::Glob { include, exclude } => {
            Box::new(GlobMetadataFilter::new(include, exclude))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::SoapMessage;

    fn message() -> SoapMessage {
        let mut msg = SoapMessage::new("<a/>");
        msg.add_metadata("hello", "world");
        msg.add_metadata("X-Trace-Id", "abc");
        msg.add_metadata("X-Internal", "secret");
        msg
    }

    #[test]
    fn test_remove_all() {
        assert!(RemoveAllMetadataFilter.filter(&message()).is_empty());
    }

    #[test]
    fn test_no_op_keeps_order() {
        let headers = NoOpMetadataFilter.filter(&message());
        assert_eq!(headers.len(), 3);
        assert_eq!(headers[0], ("hello".to_string(), "world".to_string()));
        assert_eq!(headers[2].0, "X-Internal");
    }

    #[test]
    fn test_glob_include_exclude() {
        let filter = GlobMetadataFilter::new(&["X-*".to_string()], &["X-Internal".to_string()]);
        let headers = filter.filter(&message());
        assert_eq!(headers, vec![("X-Trace-Id".to_string(), "abc".to_string())]);
    }

    #[test]
    fn test_glob_empty_include_matches_all() {
        let filter = GlobMetadataFilter::new(&[], &["X-*".to_string()]);
        let headers = filter.filter(&message());
        assert_eq!(headers, vec![("hello".to_string(), "world".to_string())]);
    }

    #[test]
    fn test_invalid_pattern_ignored() {
        let filter = GlobMetadataFilter::new(&["[".to_string(), "hello".to_string()], &[]);
        assert_eq!(filter.filter(&message()).len(), 1);
    }

    #[test]
    fn test_build_filter_default_removes_all() {
        let filter = build_filter(&MetadataFilterConfig::default());
        assert!(filter.filter(&message()).is_empty());
    }
}

//! Response transformers writing a SOAP Body element to an output stream.
//!
//! A Body element frequently uses prefixes declared on the Envelope; once it
//! is cut out of the envelope those declarations must travel with it.

use crate::error::CallError;
use crate::xml::{declarations, is_namespace_attribute, split_name, NamespaceDecl, NamespaceScopes, XmlFragment};
use quick_xml::events::{BytesDecl, BytesStart, Event};
use quick_xml::{Reader, Writer};
use std::io::Write;

/// Writes a response fragment as a standalone document.
pub trait Transformer: Send + Sync {
    fn transform(&self, source: &XmlFragment, out: &mut dyn Write) -> Result<(), CallError>;
}

/// Default transformer: copies the fragment event by event and re-declares
/// every inherited namespace the root element does not declare itself.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamingTransformer;

impl Transformer for StreamingTransformer {
    fn transform(&self, source: &XmlFragment, out: &mut dyn Write) -> Result<(), CallError> {
        let inherited = source.inherited.clone();
        copy_with_root_declarations(source, out, move |_| inherited)
    }
}

/// Fallback transformer: declares on the root only those inherited
/// namespaces that the fragment actually uses.
#[derive(Debug, Clone, Copy, Default)]
pub struct NamespaceNormalizingTransformer;

impl Transformer for NamespaceNormalizingTransformer {
    fn transform(&self, source: &XmlFragment, out: &mut dyn Write) -> Result<(), CallError> {
        let used = free_prefixes(&source.xml)?;
        let needed: Vec<NamespaceDecl> = source
            .inherited
            .iter()
            .filter(|decl| used.contains(&decl.prefix))
            .filter(|decl| !decl.uri.is_empty())
            .cloned()
            .collect();
        copy_with_root_declarations(source, out, move |_| needed)
    }
}

/// Build the configured transformer.
pub fn build_transformer(use_fallback: bool) -> Box<dyn Transformer> {
    if use_fallback {
        Box::new(NamespaceNormalizingTransformer)
    } else {
        Box::new(StreamingTransformer)
    }
}

fn copy_with_root_declarations<F>(
    source: &XmlFragment,
    out: &mut dyn Write,
    root_declarations: F,
) -> Result<(), CallError>
where
    F: FnOnce(&BytesStart) -> Vec<NamespaceDecl>,
{
    if source.is_empty() {
        return Ok(());
    }

    let mut writer = Writer::new(out);
    writer
        .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
        .map_err(transform_error)?;

    let mut reader = Reader::from_str(&source.xml);
    let mut root_declarations = Some(root_declarations);

    loop {
        let event = reader.read_event().map_err(transform_error)?;
        match event {
            Event::Start(e) => match root_declarations.take() {
                Some(f) => {
                    let root = with_declarations(&e, f(&e))?;
                    writer.write_event(Event::Start(root)).map_err(transform_error)?;
                }
                None => writer.write_event(Event::Start(e)).map_err(transform_error)?,
            },
            Event::Empty(e) => match root_declarations.take() {
                Some(f) => {
                    let root = with_declarations(&e, f(&e))?;
                    writer.write_event(Event::Empty(root)).map_err(transform_error)?;
                }
                None => writer.write_event(Event::Empty(e)).map_err(transform_error)?,
            },
            Event::Eof => break,
            other => writer.write_event(other).map_err(transform_error)?,
        }
    }
    Ok(())
}

fn with_declarations(
    element: &BytesStart,
    inherited: Vec<NamespaceDecl>,
) -> Result<BytesStart<'static>, CallError> {
    let local = declarations(element)?;
    let mut root = element.clone().into_owned();
    for decl in inherited {
        if local.iter().any(|d| d.prefix == decl.prefix) {
            continue;
        }
        // An empty default namespace needs no declaration on a root element.
        if decl.prefix.is_none() && decl.uri.is_empty() {
            continue;
        }
        let name = decl.attribute_name();
        root.push_attribute((name.as_str(), decl.uri.as_str()));
    }
    Ok(root)
}

/// Prefixes used in the fragment but not declared within it.
fn free_prefixes(xml: &str) -> Result<Vec<Option<String>>, CallError> {
    let mut reader = Reader::from_str(xml);
    let mut scopes = NamespaceScopes::default();
    let mut free: Vec<Option<String>> = Vec::new();

    loop {
        let event = reader.read_event().map_err(transform_error)?;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) => {
                scopes.push(e)?;
                let mut used = vec![split_name(e.name().as_ref()).0];
                for attr in e.attributes() {
                    let attr = attr.map_err(transform_error)?;
                    let key = attr.key.as_ref();
                    if is_namespace_attribute(key) {
                        continue;
                    }
                    // Unprefixed attributes are never in the default namespace.
                    if let (Some(prefix), _) = split_name(key) {
                        used.push(Some(prefix));
                    }
                }
                for prefix in used {
                    if prefix.as_deref() == Some("xml") || scopes.declares(prefix.as_deref()) {
                        continue;
                    }
                    if !free.contains(&prefix) {
                        free.push(prefix);
                    }
                }
                if matches!(event, Event::Empty(_)) {
                    scopes.pop();
                }
            }
            Event::End(_) => scopes.pop(),
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(free)
}

fn transform_error(e: impl std::fmt::Display) -> CallError {
    CallError::Transform(e.to_string())
}

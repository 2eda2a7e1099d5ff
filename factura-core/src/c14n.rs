//! Inclusive Canonical XML 1.0 (without comments).
//!
//! Canonicalizing a detached subtree needs the namespaces its future (or
//! actual) ancestors declare, because inclusive C14N renders every in-scope
//! namespace on the apex element. Callers pass them explicitly; nothing is
//! looked up implicitly.
use crate::xml::constants::XML_NS;
use crate::xml::{Element, NamespaceBinding, XmlDocument, XmlNode};
use std::collections::BTreeMap;
use thiserror::Error;

/// The only canonicalization method used for references and `SignedInfo`.
pub const CANONICALIZATION_METHOD: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";

#[derive(Debug, Error)]
pub enum C14nError {
    #[error("prefix '{prefix}' on <{element}> is not bound to any namespace")]
    UnboundPrefix { prefix: String, element: String },
}

/// Canonical bytes of `element` as if its ancestors declared `inherited`
/// (outermost first; later bindings shadow earlier ones).
pub fn canonicalize(element: &Element, inherited: &[NamespaceBinding]) -> Result<Vec<u8>, C14nError> {
    let mut scope = BTreeMap::new();
    for binding in inherited {
        scope.insert(
            binding.prefix().unwrap_or_default().to_string(),
            binding.uri().to_string(),
        );
    }
    let mut out = String::new();
    render_element(element, &scope, &BTreeMap::new(), &mut out)?;
    Ok(out.into_bytes())
}

/// Canonical bytes of a whole document.
pub fn canonicalize_document(document: &XmlDocument) -> Result<Vec<u8>, C14nError> {
    canonicalize(document.root(), &[])
}

// `rendered` is the namespace context already emitted by the parent; empty
// for the apex.
fn render_element(
    element: &Element,
    parent_scope: &BTreeMap<String, String>,
    rendered: &BTreeMap<String, String>,
    out: &mut String,
) -> Result<(), C14nError> {
    let mut scope = parent_scope.clone();
    for binding in element.namespaces() {
        scope.insert(
            binding.prefix().unwrap_or_default().to_string(),
            binding.uri().to_string(),
        );
    }

    let qualified = element.name().to_string();
    if let Some(prefix) = element.name().prefix() {
        ensure_bound(&scope, prefix, &qualified)?;
    }

    out.push('<');
    out.push_str(&qualified);

    // BTreeMap iteration puts the default namespace ("") first, then prefixes
    // in lexical order.
    for (prefix, uri) in &scope {
        if prefix == "xml" {
            continue;
        }
        let parent_uri = rendered.get(prefix).map(String::as_str);
        let emit = if prefix.is_empty() && uri.is_empty() {
            parent_uri.is_some_and(|parent| !parent.is_empty())
        } else {
            parent_uri != Some(uri.as_str())
        };
        if !emit {
            continue;
        }
        if prefix.is_empty() {
            out.push_str(" xmlns=\"");
        } else {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
        }
        out.push_str(&escape_attribute(uri));
        out.push('"');
    }

    let mut attributes = Vec::with_capacity(element.attributes().len());
    for attr in element.attributes() {
        let namespace = match attr.name().prefix() {
            Some(prefix) => ensure_bound(&scope, prefix, &qualified)?,
            None => "",
        };
        attributes.push((namespace, attr.name().local(), attr));
    }
    attributes.sort_by(|(ns_a, local_a, _), (ns_b, local_b, _)| {
        ns_a.cmp(ns_b).then_with(|| local_a.cmp(local_b))
    });
    for (_, _, attr) in attributes {
        out.push(' ');
        out.push_str(&attr.name().to_string());
        out.push_str("=\"");
        out.push_str(&escape_attribute(attr.value()));
        out.push('"');
    }
    out.push('>');

    for child in element.children() {
        match child {
            XmlNode::Element(child) => render_element(child, &scope, &scope, out)?,
            XmlNode::Text(text) => out.push_str(&escape_text(text)),
        }
    }

    out.push_str("</");
    out.push_str(&qualified);
    out.push('>');
    Ok(())
}

fn ensure_bound<'a>(
    scope: &'a BTreeMap<String, String>,
    prefix: &str,
    element: &str,
) -> Result<&'a str, C14nError> {
    if prefix == "xml" {
        return Ok(XML_NS);
    }
    scope
        .get(prefix)
        .map(String::as_str)
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| C14nError::UnboundPrefix {
            prefix: prefix.to_string(),
            element: element.to_string(),
        })
}

/// Escape text node content: `&`, `<`, `>` and carriage return.
pub(crate) fn escape_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

/// Escape an attribute value (also used for namespace URIs).
pub(crate) fn escape_attribute(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(ch),
        }
    }
    out
}

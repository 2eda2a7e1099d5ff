use super::{Element, XmlDocument, XmlNode};
use crate::c14n::{escape_attribute, escape_text};

const DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"no\"?>\n";

pub(super) fn document_to_string(document: &XmlDocument) -> String {
    let mut out = String::from(DECLARATION);
    write_element(document.root(), &mut out);
    out
}

// Written as-is: declarations stay where they are, attributes keep their
// order and empty elements get an explicit end tag.
fn write_element(element: &Element, out: &mut String) {
    let name = element.name().to_string();
    out.push('<');
    out.push_str(&name);
    for binding in element.namespaces() {
        match binding.prefix() {
            Some(prefix) => {
                out.push_str(" xmlns:");
                out.push_str(prefix);
            }
            None => out.push_str(" xmlns"),
        }
        out.push_str("=\"");
        out.push_str(&escape_attribute(binding.uri()));
        out.push('"');
    }
    for attr in element.attributes() {
        out.push(' ');
        out.push_str(&attr.name().to_string());
        out.push_str("=\"");
        out.push_str(&escape_attribute(attr.value()));
        out.push('"');
    }
    out.push('>');
    for child in element.children() {
        match child {
            XmlNode::Element(child) => write_element(child, out),
            XmlNode::Text(text) => out.push_str(&escape_text(text)),
        }
    }
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

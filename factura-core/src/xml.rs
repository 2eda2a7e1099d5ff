//! Namespaced XML tree used as input and output of the signing engine.
//!
//! The tree keeps namespace declarations exactly where they were written and
//! never resolves a prefix by looking at a parent it does not have: a detached
//! [`Element`] only knows its own declarations, and anything inherited from a
//! host document has to be passed in explicitly as a list of
//! [`NamespaceBinding`]s.
pub mod constants;
pub mod parse;
mod write;

use std::fmt::{self, Display, Formatter};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors emitted while reading XML documents.
#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error at byte {position}: {message}")]
    Parse { position: u64, message: String },
    #[error("document has no root element")]
    MissingRoot,
    #[error("unexpected content outside the root element at byte {position}")]
    ContentOutsideRoot { position: u64 },
    #[error("failed to read XML document '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A namespace declaration (`xmlns` or `xmlns:prefix`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NamespaceBinding {
    prefix: Option<String>,
    uri: String,
}

impl NamespaceBinding {
    pub fn new(prefix: Option<&str>, uri: impl Into<String>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            uri: uri.into(),
        }
    }

    pub fn prefixed(prefix: &str, uri: impl Into<String>) -> Self {
        Self::new(Some(prefix), uri)
    }

    pub fn default_namespace(uri: impl Into<String>) -> Self {
        Self::new(None, uri)
    }

    /// `None` for the default namespace.
    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Qualified name as written in the document: optional prefix plus local name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QName {
    prefix: Option<String>,
    local: String,
}

impl QName {
    pub fn new(prefix: Option<&str>, local: impl Into<String>) -> Self {
        Self {
            prefix: prefix.map(str::to_string),
            local: local.into(),
        }
    }

    /// Split `prefix:local` (or plain `local`).
    pub fn parse(name: &str) -> Self {
        match name.split_once(':') {
            Some((prefix, local)) => Self::new(Some(prefix), local),
            None => Self::new(None, name),
        }
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn local(&self) -> &str {
        &self.local
    }
}

impl Display for QName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.prefix {
            Some(prefix) => write!(f, "{prefix}:{}", self.local),
            None => f.write_str(&self.local),
        }
    }
}

/// Ordinary (non-namespace-declaration) attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    name: QName,
    value: String,
}

impl Attribute {
    pub fn new(name: &str, value: impl Into<String>) -> Self {
        Self {
            name: QName::parse(name),
            value: value.into(),
        }
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    pub fn value(&self) -> &str {
        &self.value
    }
}

/// Child of an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(Element),
    Text(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    name: QName,
    namespaces: Vec<NamespaceBinding>,
    attributes: Vec<Attribute>,
    children: Vec<XmlNode>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: QName::parse(name),
            namespaces: Vec::new(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_namespace(mut self, binding: NamespaceBinding) -> Self {
        self.namespaces.push(binding);
        self
    }

    pub fn with_attribute(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attributes.push(Attribute::new(name, value));
        self
    }

    pub fn with_child(mut self, child: Element) -> Self {
        self.children.push(XmlNode::Element(child));
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.push_text(text);
        self
    }

    pub fn name(&self) -> &QName {
        &self.name
    }

    /// Declarations made on this element only.
    pub fn namespaces(&self) -> &[NamespaceBinding] {
        &self.namespaces
    }

    pub fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|attr| attr.name.to_string() == name)
            .map(|attr| attr.value.as_str())
    }

    pub fn children(&self) -> &[XmlNode] {
        &self.children
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated direct text children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(text) => Some(text.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    /// Set an existing attribute or append a new one.
    pub fn set_attribute(&mut self, name: &str, value: impl Into<String>) {
        let value = value.into();
        match self.attributes.iter_mut().find(|attr| attr.name.to_string() == name) {
            Some(attr) => attr.value = value,
            None => self.attributes.push(Attribute::new(name, value)),
        }
    }

    /// Replace all children with a single text node.
    pub fn set_text(&mut self, text: impl Into<String>) {
        self.children = vec![XmlNode::Text(text.into())];
    }

    pub fn push_child(&mut self, node: XmlNode) {
        match node {
            XmlNode::Text(text) => self.push_text(text),
            element => self.children.push(element),
        }
    }

    /// Same name, declarations and attributes with different children.
    pub(crate) fn with_children_replaced(&self, children: Vec<XmlNode>) -> Element {
        Element {
            name: self.name.clone(),
            namespaces: self.namespaces.clone(),
            attributes: self.attributes.clone(),
            children,
        }
    }

    pub(crate) fn push_namespace(&mut self, binding: NamespaceBinding) {
        self.namespaces.push(binding);
    }

    pub(crate) fn push_attribute(&mut self, attribute: Attribute) {
        self.attributes.push(attribute);
    }

    // adjacent text (e.g. text followed by CDATA) collapses into one node
    fn push_text(&mut self, text: impl Into<String>) {
        let text = text.into();
        if text.is_empty() {
            return;
        }
        if let Some(XmlNode::Text(last)) = self.children.last_mut() {
            last.push_str(&text);
        } else {
            self.children.push(XmlNode::Text(text));
        }
    }

    /// Namespaces in scope on this element given what its ancestors declared.
    /// Later entries shadow earlier ones.
    pub fn in_scope(&self, inherited: &[NamespaceBinding]) -> Vec<NamespaceBinding> {
        let mut scope = inherited.to_vec();
        scope.extend(self.namespaces.iter().cloned());
        scope
    }

    /// Resolve this element's namespace URI against its own declarations and
    /// the inherited ones.
    pub fn namespace_uri<'a>(&'a self, inherited: &'a [NamespaceBinding]) -> Option<&'a str> {
        resolve_prefix(&self.namespaces, self.name.prefix())
            .or_else(|| resolve_prefix(inherited, self.name.prefix()))
            .filter(|uri| !uri.is_empty())
    }

    pub fn is_named(&self, inherited: &[NamespaceBinding], namespace: &str, local: &str) -> bool {
        self.name.local() == local && self.namespace_uri(inherited) == Some(namespace)
    }

    /// First direct child named `{namespace}local`; `inherited` is the scope
    /// of this element's ancestors.
    pub fn find_child(
        &self,
        inherited: &[NamespaceBinding],
        namespace: &str,
        local: &str,
    ) -> Option<&Element> {
        let scope = self.in_scope(inherited);
        self.child_elements()
            .find(|child| child.is_named(&scope, namespace, local))
    }
}

/// Last binding for `prefix` wins; `xml` is always bound.
pub(crate) fn resolve_prefix<'a>(
    scope: &'a [NamespaceBinding],
    prefix: Option<&str>,
) -> Option<&'a str> {
    if prefix == Some("xml") {
        return Some(constants::XML_NS);
    }
    scope
        .iter()
        .rev()
        .find(|binding| binding.prefix() == prefix)
        .map(NamespaceBinding::uri)
}

/// An element found inside a document together with everything its
/// ancestors declared.
#[derive(Debug, Clone)]
pub struct Located<'a> {
    element: &'a Element,
    inherited: Vec<NamespaceBinding>,
    path: Vec<usize>,
}

impl<'a> Located<'a> {
    pub fn element(&self) -> &'a Element {
        self.element
    }

    /// Namespaces declared by the ancestors, outermost first.
    pub fn inherited(&self) -> &[NamespaceBinding] {
        &self.inherited
    }

    /// Namespaces in scope on the element itself.
    pub fn in_scope(&self) -> Vec<NamespaceBinding> {
        self.element.in_scope(&self.inherited)
    }

    /// Child indices leading from the root to this element.
    pub fn path(&self) -> &[usize] {
        &self.path
    }
}

/// Owned document: a single root element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    root: Element,
}

impl XmlDocument {
    pub fn new(root: Element) -> Self {
        Self { root }
    }

    pub fn parse(xml: &str) -> Result<Self, XmlError> {
        parse::parse_document(xml)
    }

    pub fn from_path(path: &Path) -> Result<Self, XmlError> {
        let xml = std::fs::read_to_string(path).map_err(|source| XmlError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&xml)
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut Element {
        &mut self.root
    }

    pub fn into_root(self) -> Element {
        self.root
    }

    /// Serialize with an XML declaration and the tree written verbatim.
    pub fn to_xml_string(&self) -> String {
        write::document_to_string(self)
    }

    /// Every element named `{namespace}local`, in document order.
    pub fn find_all(&self, namespace: &str, local: &str) -> Vec<Located<'_>> {
        let mut found = Vec::new();
        let mut path = Vec::new();
        collect_matches(&self.root, &[], &mut path, namespace, local, &mut found);
        found
    }

    pub fn find(&self, namespace: &str, local: &str) -> Option<Located<'_>> {
        self.find_all(namespace, local).into_iter().next()
    }

    pub fn find_mut(&mut self, namespace: &str, local: &str) -> Option<&mut Element> {
        let path = self.find(namespace, local)?.path.clone();
        self.element_at_mut(&path)
    }

    pub fn element_at_mut(&mut self, path: &[usize]) -> Option<&mut Element> {
        let mut current = &mut self.root;
        for &index in path {
            current = match current.children.get_mut(index)? {
                XmlNode::Element(element) => element,
                XmlNode::Text(_) => return None,
            };
        }
        Some(current)
    }
}

fn collect_matches<'a>(
    element: &'a Element,
    inherited: &[NamespaceBinding],
    path: &mut Vec<usize>,
    namespace: &str,
    local: &str,
    found: &mut Vec<Located<'a>>,
) {
    if element.is_named(inherited, namespace, local) {
        found.push(Located {
            element,
            inherited: inherited.to_vec(),
            path: path.clone(),
        });
    }
    let scope = element.in_scope(inherited);
    for (index, child) in element.children.iter().enumerate() {
        if let XmlNode::Element(child) = child {
            path.push(index);
            collect_matches(child, &scope, path, namespace, local, found);
            path.pop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::constants::{CBC_NS, DS_NS, EXT_NS};
    use super::*;

    const SAMPLE: &str = r#"<Invoice xmlns="urn:oasis:names:specification:ubl:schema:xsd:Invoice-2" xmlns:cbc="urn:oasis:names:specification:ubl:schema:xsd:CommonBasicComponents-2" xmlns:ext="urn:oasis:names:specification:ubl:schema:xsd:CommonExtensionComponents-2"><ext:UBLExtensions><ext:UBLExtension><ext:ExtensionContent/></ext:UBLExtension><ext:UBLExtension><ext:ExtensionContent></ext:ExtensionContent></ext:UBLExtension></ext:UBLExtensions><cbc:ID>SETP990000129</cbc:ID></Invoice>"#;

    #[test]
    fn qname_splits_prefix() {
        let name = QName::parse("ds:Signature");
        assert_eq!(name.prefix(), Some("ds"));
        assert_eq!(name.local(), "Signature");
        assert_eq!(name.to_string(), "ds:Signature");
        assert_eq!(QName::parse("Invoice").prefix(), None);
    }

    #[test]
    fn find_all_tracks_inherited_namespaces_and_paths() {
        let doc = XmlDocument::parse(SAMPLE).expect("parse");
        let contents = doc.find_all(EXT_NS, "ExtensionContent");
        assert_eq!(contents.len(), 2);
        assert_eq!(contents[1].path(), &[0, 1, 0]);
        let prefixes: Vec<_> = contents[1]
            .in_scope()
            .iter()
            .map(|b| b.prefix().map(str::to_string))
            .collect();
        assert_eq!(
            prefixes,
            vec![None, Some("cbc".to_string()), Some("ext".to_string())]
        );
    }

    #[test]
    fn find_mut_allows_setting_text() {
        let mut doc = XmlDocument::parse(SAMPLE).expect("parse");
        doc.find_mut(CBC_NS, "ID").expect("cbc:ID").set_text("SETP990000130");
        assert_eq!(doc.find(CBC_NS, "ID").expect("cbc:ID").element().text(), "SETP990000130");
        assert!(doc.find(DS_NS, "Signature").is_none());
    }

    #[test]
    fn namespace_uri_prefers_own_declaration() {
        let inherited = vec![NamespaceBinding::prefixed("ds", "urn:other")];
        let element = Element::new("ds:Signature")
            .with_namespace(NamespaceBinding::prefixed("ds", DS_NS));
        assert_eq!(element.namespace_uri(&inherited), Some(DS_NS));
        assert_eq!(Element::new("ds:Signature").namespace_uri(&inherited), Some("urn:other"));
        assert_eq!(Element::new("x:Unbound").namespace_uri(&inherited), None);
    }

    #[test]
    fn text_nodes_merge() {
        let element = Element::new("cbc:Note").with_text("a").with_text("b");
        assert_eq!(element.children().len(), 1);
        assert_eq!(element.text(), "ab");
    }
}

use super::{Attribute, Element, NamespaceBinding, XmlDocument, XmlError, XmlNode};
use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

/// Parse a complete document.
///
/// Line endings are normalized to `\n` and attribute values have their
/// literal whitespace normalized to spaces, so the tree holds the same
/// character data an XML processor would report. Comments, processing
/// instructions and the document type declaration are dropped. CDATA
/// sections become ordinary text.
pub fn parse_document(xml: &str) -> Result<XmlDocument, XmlError> {
    let xml = xml.strip_prefix('\u{feff}').unwrap_or(xml);
    let mut reader = Reader::from_str(xml);
    let mut stack: Vec<Element> = Vec::new();
    let mut root: Option<Element> = None;

    loop {
        let position = reader.buffer_position() as u64;
        let event = reader.read_event().map_err(|err| XmlError::Parse {
            position,
            message: err.to_string(),
        })?;
        match event {
            Event::Start(start) => {
                let element = start_element(&start, position)?;
                ensure_single_root(&root, &stack, position)?;
                stack.push(element);
            }
            Event::Empty(start) => {
                let element = start_element(&start, position)?;
                ensure_single_root(&root, &stack, position)?;
                attach(element, &mut stack, &mut root);
            }
            Event::End(_) => {
                let element = stack.pop().ok_or(XmlError::Parse {
                    position,
                    message: "closing tag without matching start".to_string(),
                })?;
                attach(element, &mut stack, &mut root);
            }
            Event::Text(text) => {
                let raw = utf8(&text, position)?;
                let value = unescape(&normalize_line_endings(raw))
                    .map_err(|err| XmlError::Parse {
                        position,
                        message: err.to_string(),
                    })?
                    .into_owned();
                push_text(value, &mut stack, position)?;
            }
            Event::CData(cdata) => {
                let raw = cdata.into_inner();
                let value = normalize_line_endings(utf8(&raw, position)?);
                push_text(value, &mut stack, position)?;
            }
            Event::Eof => break,
            Event::Comment(_) | Event::PI(_) | Event::Decl(_) | Event::DocType(_) => {}
        }
    }

    if !stack.is_empty() {
        return Err(XmlError::Parse {
            position: reader.buffer_position() as u64,
            message: "unexpected end of document inside an element".to_string(),
        });
    }
    root.map(XmlDocument::new).ok_or(XmlError::MissingRoot)
}

fn start_element(start: &BytesStart<'_>, position: u64) -> Result<Element, XmlError> {
    let name = utf8(start.name().as_ref(), position)?.to_string();
    let mut element = Element::new(&name);
    for attr in start.attributes() {
        let attr = attr.map_err(|err| XmlError::Parse {
            position,
            message: err.to_string(),
        })?;
        let key = utf8(attr.key.as_ref(), position)?;
        let raw = utf8(&attr.value, position)?;
        let value = unescape(&normalize_attribute_whitespace(raw))
            .map_err(|err| XmlError::Parse {
                position,
                message: err.to_string(),
            })?
            .into_owned();
        if key == "xmlns" {
            element.push_namespace(NamespaceBinding::default_namespace(value));
        } else if let Some(prefix) = key.strip_prefix("xmlns:") {
            element.push_namespace(NamespaceBinding::prefixed(prefix, value));
        } else {
            element.push_attribute(Attribute::new(key, value));
        }
    }
    Ok(element)
}

fn ensure_single_root(
    root: &Option<Element>,
    stack: &[Element],
    position: u64,
) -> Result<(), XmlError> {
    if root.is_some() && stack.is_empty() {
        return Err(XmlError::ContentOutsideRoot { position });
    }
    Ok(())
}

fn attach(element: Element, stack: &mut [Element], root: &mut Option<Element>) {
    match stack.last_mut() {
        Some(parent) => parent.push_child(XmlNode::Element(element)),
        None => *root = Some(element),
    }
}

fn push_text(text: String, stack: &mut [Element], position: u64) -> Result<(), XmlError> {
    match stack.last_mut() {
        Some(parent) => {
            parent.push_child(XmlNode::Text(text));
            Ok(())
        }
        None if text.chars().all(char::is_whitespace) => Ok(()),
        None => Err(XmlError::ContentOutsideRoot { position }),
    }
}

fn utf8(bytes: &[u8], position: u64) -> Result<&str, XmlError> {
    std::str::from_utf8(bytes).map_err(|err| XmlError::Parse {
        position,
        message: err.to_string(),
    })
}

fn normalize_line_endings(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n")
}

fn normalize_attribute_whitespace(raw: &str) -> String {
    normalize_line_endings(raw)
        .chars()
        .map(|c| if matches!(c, '\t' | '\n') { ' ' } else { c })
        .collect()
}

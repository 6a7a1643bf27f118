#![forbid(unsafe_code)]

//! Owned XML document over roxmltree.
//!
//! roxmltree trees are immutable and borrow their input, so the document
//! keeps the source text and hands out short-lived parses. Every mutation
//! (inserting a signature, swapping an element for its `EncryptedData`,
//! splicing plaintext back in) is a splice of the source text followed by
//! a re-parse, which keeps node ranges of the untouched parts stable.

use std::ops::Range;

use ulriksdal_core::{Error, Result};

/// Attribute names consulted by the default id lookup, in priority order.
pub const DEFAULT_ID_ATTRS: [&str; 3] = ["Id", "id", "ID"];

/// An owned, well-formed XML document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct XmlDocument {
    text: String,
}

impl XmlDocument {
    /// Parse and validate XML, taking ownership of the text.
    pub fn parse(text: impl Into<String>) -> Result<Self> {
        let text = text.into();
        roxmltree::Document::parse_with_options(&text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))?;
        Ok(Self { text })
    }

    /// Parse and validate XML from bytes. A leading UTF-8 byte order mark is dropped.
    pub fn parse_bytes(data: &[u8]) -> Result<Self> {
        let data = data.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(data);
        let text = std::str::from_utf8(data)
            .map_err(|e| Error::XmlParse(format!("invalid UTF-8: {e}")))?;
        Self::parse(text)
    }

    /// Get the raw XML text.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn into_text(self) -> String {
        self.text
    }

    /// Parse the document and return a temporary `roxmltree::Document`.
    ///
    /// Parsing is deterministic, so `NodeId`s obtained from one parse are
    /// valid in any later parse of the same text.
    pub fn parse_doc(&self) -> Result<roxmltree::Document<'_>> {
        roxmltree::Document::parse_with_options(&self.text, crate::parsing_options())
            .map_err(|e| Error::XmlParse(e.to_string()))
    }

    /// Replace `range` of the source text and re-validate the result.
    pub fn splice(&self, range: Range<usize>, replacement: &str) -> Result<XmlDocument> {
        if range.start > range.end
            || range.end > self.text.len()
            || !self.text.is_char_boundary(range.start)
            || !self.text.is_char_boundary(range.end)
        {
            return Err(Error::XmlStructure(format!(
                "splice range {range:?} outside document"
            )));
        }
        let mut text = String::with_capacity(self.text.len() + replacement.len());
        text.push_str(&self.text[..range.start]);
        text.push_str(replacement);
        text.push_str(&self.text[range.end..]);
        XmlDocument::parse(text)
    }

    /// Insert `xml` as the last child of element `parent`.
    pub fn append_child(&self, parent: roxmltree::NodeId, xml: &str) -> Result<XmlDocument> {
        let doc = self.parse_doc()?;
        let node = doc
            .get_node(parent)
            .filter(|n| n.is_element())
            .ok_or_else(|| Error::XmlStructure(format!("{parent:?} is not an element")))?;
        let range = node.range();
        if let Some(last) = node.last_child() {
            let at = last.range().end;
            return self.splice(at..at, xml);
        }
        let raw = &self.text[range.clone()];
        if let Some(open) = raw.strip_suffix("/>") {
            let qname = crate::names::element_qname(node);
            return self.splice(range, &format!("{}>{xml}</{qname}>", open.trim_end()));
        }
        let close = raw
            .rfind("</")
            .ok_or_else(|| Error::XmlStructure("element has no end tag".into()))?;
        let at = range.start + close;
        self.splice(at..at, xml)
    }

    /// Find the first descendant element with the given local name and namespace.
    pub fn find_element<'a, 'input>(
        doc: &'a roxmltree::Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Option<roxmltree::Node<'a, 'input>> {
        doc.descendants().find(|n| is_element_named(n, ns, local_name))
    }

    /// Find all descendant elements with the given local name and namespace.
    pub fn find_elements<'a, 'input>(
        doc: &'a roxmltree::Document<'input>,
        ns: &str,
        local_name: &str,
    ) -> Vec<roxmltree::Node<'a, 'input>> {
        doc.descendants()
            .filter(|n| is_element_named(n, ns, local_name))
            .collect()
    }
}

/// Whether `node` is an element with this namespace and local name.
pub fn is_element_named(node: &roxmltree::Node<'_, '_>, ns: &str, local_name: &str) -> bool {
    node.is_element()
        && node.tag_name().name() == local_name
        && node.tag_name().namespace().unwrap_or("") == ns
}

/// First element child with the given namespace and local name.
pub fn find_child_element<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Option<roxmltree::Node<'a, 'input>> {
    node.children().find(|c| is_element_named(c, ns, local_name))
}

/// All element children with the given namespace and local name.
pub fn find_child_elements<'a, 'input>(
    node: roxmltree::Node<'a, 'input>,
    ns: &str,
    local_name: &str,
) -> Vec<roxmltree::Node<'a, 'input>> {
    node.children()
        .filter(|c| is_element_named(c, ns, local_name))
        .collect()
}

/// Concatenated text content of an element, or "" when it has none.
pub fn element_text(node: roxmltree::Node<'_, '_>) -> String {
    node.descendants()
        .filter(|n| n.is_text())
        .filter_map(|n| n.text())
        .collect()
}

/// Default `GetIdElement`: look the id up under `Id`, then `id`, then `ID`,
/// then any `extra_attrs`.
///
/// Within one attribute name the match must be unique; a second element
/// carrying the same value is reported as a structural error rather than
/// resolved to either candidate.
pub fn find_by_id<'a, 'input>(
    doc: &'a roxmltree::Document<'input>,
    id: &str,
    extra_attrs: &[String],
) -> Result<Option<roxmltree::Node<'a, 'input>>> {
    let names = DEFAULT_ID_ATTRS
        .iter()
        .copied()
        .chain(extra_attrs.iter().map(String::as_str));
    for attr_name in names {
        let mut found: Option<roxmltree::Node<'a, 'input>> = None;
        for node in doc.descendants().filter(|n| n.is_element()) {
            if node.attribute(attr_name) == Some(id) {
                if found.is_some() {
                    return Err(Error::InvalidUri(format!(
                        "id '{id}' is carried by more than one element"
                    )));
                }
                found = Some(node);
            }
        }
        if found.is_some() {
            return Ok(found);
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(matches!(
            XmlDocument::parse("<a><b></a>"),
            Err(Error::XmlParse(_))
        ));
    }

    #[test]
    fn test_parse_bytes_strips_bom() {
        let doc = XmlDocument::parse_bytes(b"\xEF\xBB\xBF<a/>").unwrap();
        assert_eq!(doc.text(), "<a/>");
    }

    #[test]
    fn test_splice_replaces_element() {
        let doc = XmlDocument::parse("<r><a>1</a><b/></r>").unwrap();
        let parsed = doc.parse_doc().unwrap();
        let a = XmlDocument::find_element(&parsed, "", "a").unwrap();
        let out = doc.splice(a.range(), "<c>2</c>").unwrap();
        assert_eq!(out.text(), "<r><c>2</c><b/></r>");
    }

    #[test]
    fn test_append_child() {
        for (input, expected) in [
            ("<r/>", "<r><x/></r>"),
            ("<r a='1' />", "<r a='1'><x/></r>"),
            ("<r></r>", "<r><x/></r>"),
            ("<r><a/>t</r>", "<r><a/>t<x/></r>"),
        ] {
            let doc = XmlDocument::parse(input).unwrap();
            let root = doc.parse_doc().unwrap().root_element().id();
            assert_eq!(doc.append_child(root, "<x/>").unwrap().text(), expected);
        }
    }

    #[test]
    fn test_splice_must_stay_well_formed() {
        let doc = XmlDocument::parse("<r><a/></r>").unwrap();
        assert!(doc.splice(3..7, "<x>").is_err());
    }

    #[test]
    fn test_find_by_id_priority() {
        let doc = XmlDocument::parse(r#"<r><a id="k"/><b Id="k"/></r>"#).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let node = find_by_id(&parsed, "k", &[]).unwrap().unwrap();
        assert_eq!(node.tag_name().name(), "b");
    }

    #[test]
    fn test_find_by_id_extra_attr() {
        let doc = XmlDocument::parse(r#"<r><a AssertionID="k"/></r>"#).unwrap();
        let parsed = doc.parse_doc().unwrap();
        assert!(find_by_id(&parsed, "k", &[]).unwrap().is_none());
        let extra = vec!["AssertionID".to_owned()];
        assert!(find_by_id(&parsed, "k", &extra).unwrap().is_some());
    }

    #[test]
    fn test_find_by_id_rejects_duplicates() {
        let doc = XmlDocument::parse(r#"<r><a Id="k"/><b Id="k"/></r>"#).unwrap();
        let parsed = doc.parse_doc().unwrap();
        assert!(find_by_id(&parsed, "k", &[]).is_err());
    }

    #[test]
    fn test_element_text() {
        let doc = XmlDocument::parse("<r>a<b>b</b>c</r>").unwrap();
        let parsed = doc.parse_doc().unwrap();
        assert_eq!(element_text(parsed.root_element()), "abc");
    }
}

#![forbid(unsafe_code)]

//! Shared rendering for C14N output: namespace and attribute ordering,
//! and the node kinds whose output does not depend on namespace policy.

use std::io::Write;

use crate::escape;
use crate::DocPosition;
use ulriksdal_core::{ns, Result};
use ulriksdal_xml::names;

/// A namespace declaration to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NsDecl {
    /// The prefix ("" for default namespace).
    pub prefix: String,
    /// The namespace URI ("" only for an `xmlns=""` undeclaration).
    pub uri: String,
}

impl NsDecl {
    pub fn new(prefix: &str, uri: &str) -> Self {
        Self {
            prefix: prefix.to_owned(),
            uri: uri.to_owned(),
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        if self.prefix.is_empty() {
            write!(out, " xmlns=\"{}\"", escape::escape_attr(&self.uri))?;
        } else {
            write!(out, " xmlns:{}=\"{}\"", self.prefix, escape::escape_attr(&self.uri))?;
        }
        Ok(())
    }
}

impl Ord for NsDecl {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // The default namespace sorts first, then by prefix.
        match (self.prefix.is_empty(), other.prefix.is_empty()) {
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            _ => self.prefix.cmp(&other.prefix),
        }
    }
}

impl PartialOrd for NsDecl {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// An attribute to be rendered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attr {
    /// The namespace URI of the attribute ("" for no namespace).
    pub ns_uri: String,
    pub local_name: String,
    /// The qualified name (prefix:local or just local).
    pub qualified_name: String,
    pub value: String,
}

impl Attr {
    pub fn write_to<W: Write + ?Sized>(&self, out: &mut W) -> Result<()> {
        write!(out, " {}=\"{}\"", self.qualified_name, escape::escape_attr(&self.value))?;
        Ok(())
    }
}

impl Ord for Attr {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // No-namespace attributes come first; the rest sort by
        // (namespace URI, local name).
        match (self.ns_uri.is_empty(), other.ns_uri.is_empty()) {
            (true, true) => self.local_name.cmp(&other.local_name),
            (true, false) => std::cmp::Ordering::Less,
            (false, true) => std::cmp::Ordering::Greater,
            (false, false) => self
                .ns_uri
                .cmp(&other.ns_uri)
                .then(self.local_name.cmp(&other.local_name)),
        }
    }
}

impl PartialOrd for Attr {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// The element's own attributes in canonical order.
pub fn element_attrs(node: roxmltree::Node<'_, '_>) -> Vec<Attr> {
    let mut attrs: Vec<Attr> = node
        .attributes()
        .map(|a| Attr {
            ns_uri: a.namespace().unwrap_or("").to_owned(),
            local_name: a.name().to_owned(),
            qualified_name: names::attr_qname_in(node, &a),
            value: a.value().to_owned(),
        })
        .collect();
    attrs.sort();
    attrs
}

/// `xml:*` attributes an orphaned element inherits from its ancestors
/// (nearest declaration wins), minus the ones it carries itself.
pub fn inherited_xml_attrs(node: roxmltree::Node<'_, '_>, own: &[Attr]) -> Vec<Attr> {
    let mut out: Vec<Attr> = Vec::new();
    for ancestor in node.ancestors().skip(1).filter(|a| a.is_element()) {
        for a in ancestor.attributes().filter(|a| a.namespace() == Some(ns::XML)) {
            let present = own
                .iter()
                .chain(out.iter())
                .any(|x| x.ns_uri == ns::XML && x.local_name == a.name());
            if !present {
                out.push(Attr {
                    ns_uri: ns::XML.to_owned(),
                    local_name: a.name().to_owned(),
                    qualified_name: format!("xml:{}", a.name()),
                    value: a.value().to_owned(),
                });
            }
        }
    }
    out
}

/// Position of a node relative to the document element.
pub fn doc_position(node: roxmltree::Node<'_, '_>) -> DocPosition {
    let at_top = node
        .parent()
        .is_some_and(|p| p.node_type() == roxmltree::NodeType::Root);
    if !at_top {
        DocPosition::InsideDocElement
    } else if node.prev_siblings().skip(1).any(|s| s.is_element()) {
        DocPosition::AfterDocElement
    } else {
        DocPosition::BeforeDocElement
    }
}

pub fn write_start_tag<W: Write + ?Sized>(
    out: &mut W,
    qname: &str,
    ns_decls: &[NsDecl],
    attrs: &[Attr],
) -> Result<()> {
    out.write_all(b"<")?;
    out.write_all(qname.as_bytes())?;
    for decl in ns_decls {
        decl.write_to(out)?;
    }
    for attr in attrs {
        attr.write_to(out)?;
    }
    out.write_all(b">")?;
    Ok(())
}

pub fn write_end_tag<W: Write + ?Sized>(out: &mut W, qname: &str) -> Result<()> {
    out.write_all(b"</")?;
    out.write_all(qname.as_bytes())?;
    out.write_all(b">")?;
    Ok(())
}

/// Render a text, comment or processing-instruction node. Elements and
/// the root are the caller's business.
pub fn write_leaf<W: Write + ?Sized>(
    out: &mut W,
    node: roxmltree::Node<'_, '_>,
    with_comments: bool,
) -> Result<()> {
    match node.node_type() {
        roxmltree::NodeType::Text => {
            // Whitespace outside the document element is not part of the
            // canonical form.
            if doc_position(node) == DocPosition::InsideDocElement {
                out.write_all(escape::escape_text(node.text().unwrap_or("")).as_bytes())?;
            }
        }
        roxmltree::NodeType::Comment if with_comments => {
            let position = doc_position(node);
            if position == DocPosition::AfterDocElement {
                out.write_all(b"\n")?;
            }
            out.write_all(b"<!--")?;
            out.write_all(node.text().unwrap_or("").as_bytes())?;
            out.write_all(b"-->")?;
            if position == DocPosition::BeforeDocElement {
                out.write_all(b"\n")?;
            }
        }
        roxmltree::NodeType::PI => {
            let position = doc_position(node);
            if position == DocPosition::AfterDocElement {
                out.write_all(b"\n")?;
            }
            if let Some(pi) = node.pi() {
                out.write_all(b"<?")?;
                out.write_all(pi.target.as_bytes())?;
                if let Some(value) = pi.value.filter(|v| !v.is_empty()) {
                    out.write_all(b" ")?;
                    out.write_all(value.as_bytes())?;
                }
                out.write_all(b"?>")?;
            }
            if position == DocPosition::BeforeDocElement {
                out.write_all(b"\n")?;
            }
        }
        _ => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ns_decl_order() {
        let mut decls = vec![NsDecl::new("b", "urn:b"), NsDecl::new("", "urn:d"), NsDecl::new("a", "urn:a")];
        decls.sort();
        let prefixes: Vec<&str> = decls.iter().map(|d| d.prefix.as_str()).collect();
        assert_eq!(prefixes, vec!["", "a", "b"]);
    }

    #[test]
    fn test_attr_order_by_namespace_then_local() {
        let mk = |ns: &str, local: &str| Attr {
            ns_uri: ns.to_owned(),
            local_name: local.to_owned(),
            qualified_name: local.to_owned(),
            value: String::new(),
        };
        let mut attrs = vec![mk("urn:z", "a"), mk("", "z"), mk("urn:a", "b"), mk("", "a")];
        attrs.sort();
        let order: Vec<(&str, &str)> = attrs
            .iter()
            .map(|a| (a.ns_uri.as_str(), a.local_name.as_str()))
            .collect();
        assert_eq!(order, vec![("", "a"), ("", "z"), ("urn:a", "b"), ("urn:z", "a")]);
    }
}

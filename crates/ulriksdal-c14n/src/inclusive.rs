#![forbid(unsafe_code)]

//! Inclusive Canonical XML 1.0 (C14N 1.0).
//!
//! Algorithm URI: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315`
//! With comments: `http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments`
//!
//! An output element renders every in-scope namespace that its nearest
//! output ancestor did not already render with the same value. When the
//! default namespace goes from non-empty to empty, `xmlns=""` is emitted.

use std::collections::BTreeMap;
use std::io::Write;

use crate::render::{self, NsDecl};
use ulriksdal_core::Result;
use ulriksdal_xml::{names, NodeSet};

/// Canonicalize a document (or the part selected by `node_set`).
pub fn canonicalize<W: Write + ?Sized>(
    doc: &roxmltree::Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
    out: &mut W,
) -> Result<()> {
    let ctx = C14nContext {
        with_comments,
        node_set,
    };
    ctx.process_node(doc.root(), out, &BTreeMap::new())
}

struct C14nContext<'a> {
    with_comments: bool,
    node_set: Option<&'a NodeSet>,
}

impl C14nContext<'_> {
    fn is_visible(&self, node: &roxmltree::Node<'_, '_>) -> bool {
        self.node_set.map_or(true, |ns| ns.contains(node))
    }

    fn process_node<W: Write + ?Sized>(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut W,
        rendered: &BTreeMap<String, String>,
    ) -> Result<()> {
        match node.node_type() {
            roxmltree::NodeType::Root => {
                for child in node.children() {
                    self.process_node(child, out, rendered)?;
                }
                Ok(())
            }
            roxmltree::NodeType::Element => self.process_element(node, out, rendered),
            _ if self.is_visible(&node) => render::write_leaf(out, node, self.with_comments),
            _ => Ok(()),
        }
    }

    fn process_element<W: Write + ?Sized>(
        &self,
        node: roxmltree::Node<'_, '_>,
        out: &mut W,
        rendered: &BTreeMap<String, String>,
    ) -> Result<()> {
        if !self.is_visible(&node) {
            // An omitted element contributes nothing itself; its output
            // descendants still compare against the nearest output ancestor.
            for child in node.children() {
                self.process_node(child, out, rendered)?;
            }
            return Ok(());
        }

        let in_scope = names::in_scope_namespaces(node);
        let mut ns_decls: Vec<NsDecl> = in_scope
            .iter()
            .filter(|(prefix, uri)| rendered.get(*prefix) != Some(*uri))
            .map(|(prefix, uri)| NsDecl::new(prefix, uri))
            .collect();
        if !in_scope.contains_key("") && rendered.get("").is_some_and(|u| !u.is_empty()) {
            ns_decls.push(NsDecl::new("", ""));
        }
        ns_decls.sort();

        let mut attrs = render::element_attrs(node);
        if self.node_set.is_some() {
            let parent_omitted = node
                .parent()
                .map_or(true, |p| !p.is_element() || !self.is_visible(&p));
            if parent_omitted {
                let extra = render::inherited_xml_attrs(node, &attrs);
                attrs.extend(extra);
                attrs.sort();
            }
        }

        let qname = names::element_qname(node);
        render::write_start_tag(out, qname, &ns_decls, &attrs)?;
        for child in node.children() {
            self.process_node(child, out, &in_scope)?;
        }
        render::write_end_tag(out, qname)
    }
}

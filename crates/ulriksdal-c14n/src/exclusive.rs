#![forbid(unsafe_code)]

//! Exclusive Canonical XML 1.0 (exc-C14N).
//!
//! Algorithm URI: `http://www.w3.org/2001/10/xml-exc-c14n#`
//! With comments: `http://www.w3.org/2001/10/xml-exc-c14n#WithComments`
//!
//! Only "visibly utilized" namespace declarations are output: the prefix
//! of the element name (the default namespace for an unprefixed element),
//! the prefixes of its attributes, and the prefixes listed in the
//! InclusiveNamespaces PrefixList (`#default` names the default namespace).
//! A declaration is skipped when an output ancestor already rendered the
//! same binding.

use std::collections::{BTreeMap, BTreeSet};
use std::io::Write;

use crate::render::{self, NsDecl};
use ulriksdal_core::Result;
use ulriksdal_xml::{names, NodeSet};

/// Canonicalize using Exclusive C14N 1.0.
pub fn canonicalize<W: Write + ?Sized>(
    doc: &roxmltree::Document<'_>,
    with_comments: bool,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
    out: &mut W,
) -> Result<()> {
    let inclusive: BTreeSet<String> = inclusive_prefixes
        .iter()
        .map(|p| if p == "#default" { String::new() } else { p.clone() })
        .collect();
    let ctx = ExcC14nContext {
        with_comments,
        node_set,
        inclusive,
    };
    ctx.process_node(doc.root(), out, &BTreeMap::new())
}

struct ExcC14nContext<'a> {
    with_comments: bool,
    node_set: Option<&'a NodeSet>,
    inclusive: BTreeSet<String>,
}

impl ExcC14nContext<'_> {
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
            for child in node.children() {
                self.process_node(child, out, rendered)?;
            }
            return Ok(());
        }

        let in_scope = names::in_scope_namespaces(node);

        let mut utilized: BTreeSet<String> = BTreeSet::new();
        utilized.insert(names::element_prefix(node).unwrap_or("").to_owned());
        for attr in node.attributes() {
            if let Some(prefix) = names::attr_prefix_in(node, &attr) {
                if prefix != "xml" {
                    utilized.insert(prefix);
                }
            }
        }
        utilized.extend(
            self.inclusive
                .iter()
                .filter(|p| in_scope.contains_key(p.as_str()))
                .cloned(),
        );

        let mut ns_decls: Vec<NsDecl> = Vec::new();
        for prefix in &utilized {
            match in_scope.get(prefix) {
                Some(uri) if rendered.get(prefix) != Some(uri) => {
                    ns_decls.push(NsDecl::new(prefix, uri));
                }
                None if prefix.is_empty() && rendered.get("").is_some_and(|u| !u.is_empty()) => {
                    ns_decls.push(NsDecl::new("", ""));
                }
                _ => {}
            }
        }
        ns_decls.sort();

        let attrs = render::element_attrs(node);
        let qname = names::element_qname(node);
        render::write_start_tag(out, qname, &ns_decls, &attrs)?;

        let mut child_rendered = rendered.clone();
        for decl in &ns_decls {
            child_rendered.insert(decl.prefix.clone(), decl.uri.clone());
        }
        for child in node.children() {
            self.process_node(child, out, &child_rendered)?;
        }
        render::write_end_tag(out, qname)
    }
}

#![forbid(unsafe_code)]

//! Qualified names and namespace context.
//!
//! roxmltree resolves prefixes to namespace URIs but does not keep the
//! prefixes themselves, and canonical output must reproduce them exactly.
//! They are recovered from the source text through node ranges.

use std::collections::{BTreeMap, BTreeSet};

use ulriksdal_core::{ns, Error, Result};

/// The qualified name of an element as written in the source (`ds:Signature`).
pub fn element_qname<'input>(node: roxmltree::Node<'_, 'input>) -> &'input str {
    let text = node.document().input_text();
    let raw = text
        .get(node.range().start..)
        .and_then(|s| s.strip_prefix('<'))
        .unwrap_or("");
    let end = raw
        .find(|c: char| c.is_whitespace() || c == '>' || c == '/')
        .unwrap_or(raw.len());
    let qname = &raw[..end];
    if qname.is_empty() || !qname.ends_with(node.tag_name().name()) {
        node.tag_name().name()
    } else {
        qname
    }
}

/// The prefix of an element, or `None` for an unprefixed name.
pub fn element_prefix<'input>(node: roxmltree::Node<'_, 'input>) -> Option<&'input str> {
    element_qname(node).split_once(':').map(|(p, _)| p)
}

/// The qualified name of `attr` on `node`, recovered from the source text.
pub fn attr_qname_in(node: roxmltree::Node<'_, '_>, attr: &roxmltree::Attribute<'_, '_>) -> String {
    if attr.namespace() == Some(ns::XML) {
        return format!("xml:{}", attr.name());
    }
    let Some(uri) = attr.namespace() else {
        return attr.name().to_owned();
    };
    let text = node.document().input_text();
    if let Some(raw) = text.get(attr.range()) {
        let qname = raw.split('=').next().unwrap_or("").trim();
        if qname.ends_with(attr.name()) && qname.contains(':') {
            return qname.to_owned();
        }
    }
    match node.lookup_prefix(uri) {
        Some(prefix) if !prefix.is_empty() => format!("{prefix}:{}", attr.name()),
        _ => attr.name().to_owned(),
    }
}

/// The prefix of a namespaced attribute on `node`.
pub fn attr_prefix_in(node: roxmltree::Node<'_, '_>, attr: &roxmltree::Attribute<'_, '_>) -> Option<String> {
    attr.namespace()?;
    attr_qname_in(node, attr)
        .split_once(':')
        .map(|(p, _)| p.to_owned())
}

/// Namespaces in scope at `node`, keyed by prefix ("" for the default).
///
/// The `xml` prefix and default-namespace undeclarations are left out.
pub fn in_scope_namespaces(node: roxmltree::Node<'_, '_>) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    if !node.is_element() {
        return out;
    }
    for decl in node.namespaces() {
        let prefix = decl.name().unwrap_or("");
        if prefix == "xml" || decl.uri().is_empty() {
            continue;
        }
        out.insert(prefix.to_owned(), decl.uri().to_owned());
    }
    out
}

/// Namespaces in scope at `node` that it inherits unchanged from its parent.
pub fn inherited_namespaces(node: roxmltree::Node<'_, '_>) -> BTreeMap<String, String> {
    let own = in_scope_namespaces(node);
    let parent = node
        .parent()
        .filter(|p| p.is_element())
        .map(in_scope_namespaces)
        .unwrap_or_default();
    own.into_iter()
        .filter(|(prefix, uri)| parent.get(prefix) == Some(uri))
        .collect()
}

/// Source text of `node` with every inherited namespace declaration copied
/// onto its start tag, so the fragment can stand on its own.
pub fn outer_xml_with_context(node: roxmltree::Node<'_, '_>) -> String {
    let text = node.document().input_text();
    let raw = &text[node.range()];
    if !node.is_element() {
        return raw.to_owned();
    }
    let declared = declared_prefixes(raw);
    let inherited: BTreeMap<String, String> = inherited_namespaces(node)
        .into_iter()
        .filter(|(prefix, _)| !declared.contains(prefix))
        .collect();
    insert_declarations(raw, element_qname(node), &inherited)
}

/// Prefixes declared on the start tag at the head of `raw` ("" for a
/// default namespace declaration).
fn declared_prefixes(raw: &str) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    let mut quote: Option<char> = None;
    for (i, c) in raw.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '"' || c == '\'' => quote = Some(c),
            None if c == '>' => break,
            None if c.is_whitespace() => {
                let rest = &raw[i + c.len_utf8()..];
                if let Some(after) = rest.strip_prefix("xmlns") {
                    let end = after
                        .find(|ch: char| ch == '=' || ch.is_whitespace())
                        .unwrap_or(after.len());
                    let name = &after[..end];
                    if name.is_empty() {
                        out.insert(String::new());
                    } else if let Some(prefix) = name.strip_prefix(':') {
                        out.insert(prefix.to_owned());
                    }
                }
            }
            None => {}
        }
    }
    out
}

/// Source text of the children of `node`.
pub fn inner_xml(node: roxmltree::Node<'_, '_>) -> String {
    let text = node.document().input_text();
    match (node.first_child(), node.last_child()) {
        (Some(first), Some(last)) => text[first.range().start..last.range().end].to_owned(),
        _ => String::new(),
    }
}

/// Add `context` namespace declarations to the root element of `xml` for
/// every prefix the root does not already bind.
pub fn propagate_namespaces(xml: &str, context: &BTreeMap<String, String>) -> Result<String> {
    if context.is_empty() {
        return Ok(xml.to_owned());
    }
    let doc = roxmltree::Document::parse_with_options(xml, crate::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    let root = doc.root_element();
    let bound: BTreeMap<String, String> = root
        .namespaces()
        .map(|d| (d.name().unwrap_or("").to_owned(), d.uri().to_owned()))
        .collect();
    let missing: BTreeMap<String, String> = context
        .iter()
        .filter(|(prefix, _)| !bound.contains_key(prefix.as_str()))
        .map(|(p, u)| (p.clone(), u.clone()))
        .collect();
    let start = root.range().start;
    let qname = element_qname(root);
    let head = &xml[..start];
    let tail = insert_declarations(&xml[start..], qname, &missing);
    Ok(format!("{head}{tail}"))
}

fn insert_declarations(raw: &str, qname: &str, decls: &BTreeMap<String, String>) -> String {
    if decls.is_empty() {
        return raw.to_owned();
    }
    let split = 1 + qname.len();
    let mut out = String::with_capacity(raw.len() + 64);
    out.push_str(&raw[..split.min(raw.len())]);
    for (prefix, uri) in decls {
        let uri = crate::writer::escape_attr(uri);
        if prefix.is_empty() {
            out.push_str(&format!(" xmlns=\"{uri}\""));
        } else {
            out.push_str(&format!(" xmlns:{prefix}=\"{uri}\""));
        }
    }
    out.push_str(&raw[split.min(raw.len())..]);
    out
}

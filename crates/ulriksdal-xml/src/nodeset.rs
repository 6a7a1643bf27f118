#![forbid(unsafe_code)]

//! NodeSet type for XML canonicalization and transforms.
//!
//! A `NodeSet` marks which nodes of a parsed document are "in the set".
//! Canonicalization walks the whole tree and consults the set per node,
//! so an arbitrary subset (a same-document reference, the output of an
//! XPath filter, a document minus one signature) serializes without
//! restructuring the tree. Attributes and namespace declarations follow
//! their element.

use std::collections::HashSet;

use roxmltree::{Node, NodeId, NodeType};

/// A set of XML document nodes identified by `NodeId`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeSet {
    nodes: HashSet<NodeId>,
}

impl NodeSet {
    /// Create an empty node set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every node of the document, comments included.
    pub fn all(doc: &roxmltree::Document<'_>) -> Self {
        Self {
            nodes: doc.descendants().map(|n| n.id()).collect(),
        }
    }

    /// Every node except comments: the target of `URI=""`.
    pub fn all_without_comments(doc: &roxmltree::Document<'_>) -> Self {
        Self::tree(doc.root(), false)
    }

    /// `root` and all of its descendants.
    pub fn tree(root: Node<'_, '_>, with_comments: bool) -> Self {
        let nodes = root
            .descendants()
            .filter(|n| with_comments || n.node_type() != NodeType::Comment)
            .map(|n| n.id())
            .collect();
        Self { nodes }
    }

    /// Subtree rooted at `root`, without comments.
    pub fn tree_without_comments(root: Node<'_, '_>) -> Self {
        Self::tree(root, false)
    }

    /// Subtree rooted at `root`, with comments.
    pub fn tree_with_comments(root: Node<'_, '_>) -> Self {
        Self::tree(root, true)
    }

    /// Check if a node is in this set.
    pub fn contains(&self, node: &Node<'_, '_>) -> bool {
        self.nodes.contains(&node.id())
    }

    pub fn contains_id(&self, id: NodeId) -> bool {
        self.nodes.contains(&id)
    }

    pub fn insert_id(&mut self, id: NodeId) {
        self.nodes.insert(id);
    }

    pub fn remove_id(&mut self, id: NodeId) {
        self.nodes.remove(&id);
    }

    /// Drop `root` and every descendant.
    pub fn remove_subtree(&mut self, root: Node<'_, '_>) {
        for n in root.descendants() {
            self.nodes.remove(&n.id());
        }
    }

    /// Keep only the nodes for which `keep` returns true.
    pub fn retain(&mut self, doc: &roxmltree::Document<'_>, mut keep: impl FnMut(Node<'_, '_>) -> bool) {
        let drop: Vec<NodeId> = doc
            .descendants()
            .filter(|n| self.nodes.contains(&n.id()) && !keep(*n))
            .map(|n| n.id())
            .collect();
        for id in drop {
            self.nodes.remove(&id);
        }
    }

    pub fn intersection(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.intersection(&other.nodes).copied().collect(),
        }
    }

    pub fn union(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.union(&other.nodes).copied().collect(),
        }
    }

    /// Compute self - other.
    pub fn subtract(&self, other: &NodeSet) -> NodeSet {
        NodeSet {
            nodes: self.nodes.difference(&other.nodes).copied().collect(),
        }
    }

    /// Nodes of the set that are text nodes, in document order.
    pub fn text_nodes<'a, 'input>(&self, doc: &'a roxmltree::Document<'input>) -> Vec<Node<'a, 'input>> {
        doc.descendants()
            .filter(|n| n.is_text() && self.contains(n))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::XmlDocument;

    const XML: &str = "<r><!--c--><a>t<b/></a><c/></r>";

    #[test]
    fn test_all_without_comments() {
        let doc = XmlDocument::parse(XML).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let all = NodeSet::all(&parsed);
        let no_comments = NodeSet::all_without_comments(&parsed);
        assert_eq!(all.len(), no_comments.len() + 1);
        let comment = parsed.descendants().find(|n| n.is_comment()).unwrap();
        assert!(all.contains(&comment));
        assert!(!no_comments.contains(&comment));
    }

    #[test]
    fn test_tree_and_remove_subtree() {
        let doc = XmlDocument::parse(XML).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let a = XmlDocument::find_element(&parsed, "", "a").unwrap();
        let mut set = NodeSet::all(&parsed);
        let sub = NodeSet::tree_without_comments(a);
        assert_eq!(sub.len(), 3);
        set.remove_subtree(a);
        assert!(set.intersection(&sub).is_empty());
        assert_eq!(set.union(&sub), NodeSet::all(&parsed));
    }

    #[test]
    fn test_retain() {
        let doc = XmlDocument::parse(XML).unwrap();
        let parsed = doc.parse_doc().unwrap();
        let mut set = NodeSet::all(&parsed);
        set.retain(&parsed, |n| n.is_element());
        assert_eq!(set.len(), 4);
        assert!(set.text_nodes(&parsed).is_empty());
    }
}

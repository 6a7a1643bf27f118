#![forbid(unsafe_code)]

//! Classification of reference URIs.
//!
//! | URI                   | selects                                   |
//! |-----------------------|-------------------------------------------|
//! | absent                | caller-supplied detached content          |
//! | `""`                  | whole document, comments removed          |
//! | `#xpointer(/)`        | whole document, comments kept             |
//! | `#id`                 | element with that id, comments removed    |
//! | `#xpointer(id('id'))` | element with that id, comments kept       |
//! | anything else         | external resource (not resolved here)     |

use ulriksdal_core::{Error, Result};
use ulriksdal_xml::{NodeSet, XmlDocument};

use crate::pipeline::TransformData;

/// A parsed reference URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceUri {
    Absent,
    WholeDocument,
    WholeDocumentWithComments,
    Id { id: String, with_comments: bool },
    External(String),
}

impl ReferenceUri {
    pub fn parse(uri: Option<&str>) -> Result<Self> {
        let Some(uri) = uri else {
            return Ok(Self::Absent);
        };
        if uri.is_empty() {
            return Ok(Self::WholeDocument);
        }
        let Some(fragment) = uri.strip_prefix('#') else {
            return Ok(Self::External(uri.to_owned()));
        };
        if fragment == "xpointer(/)" {
            return Ok(Self::WholeDocumentWithComments);
        }
        if let Some(inner) = fragment
            .strip_prefix("xpointer(id(")
            .and_then(|s| s.strip_suffix("))"))
        {
            let id = inner
                .strip_prefix('\'')
                .and_then(|s| s.strip_suffix('\''))
                .or_else(|| inner.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
                .ok_or_else(|| Error::InvalidUri(format!("malformed xpointer: {uri}")))?;
            return Ok(Self::Id {
                id: id.to_owned(),
                with_comments: true,
            });
        }
        if fragment.is_empty() || fragment.starts_with("xpointer(") {
            return Err(Error::InvalidUri(format!("unsupported fragment: {uri}")));
        }
        Ok(Self::Id {
            id: fragment.to_owned(),
            with_comments: false,
        })
    }

    /// The id named by a same-document fragment.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Id { id, .. } => Some(id),
            _ => None,
        }
    }

    pub fn is_same_document(&self) -> bool {
        matches!(
            self,
            Self::WholeDocument | Self::WholeDocumentWithComments | Self::Id { .. }
        )
    }
}

/// The whole of `document` as a node set.
pub fn whole_document(document: XmlDocument, with_comments: bool) -> Result<TransformData> {
    let nodes = {
        let doc = document.parse_doc()?;
        NodeSet::tree(doc.root(), with_comments)
    };
    Ok(TransformData::NodeSet { document, nodes })
}

/// The subtree of `document` rooted at `node` as a node set.
pub fn subtree(document: XmlDocument, node: roxmltree::NodeId, with_comments: bool) -> Result<TransformData> {
    let nodes = {
        let doc = document.parse_doc()?;
        let root = doc
            .get_node(node)
            .ok_or_else(|| Error::InvalidUri(format!("node {node:?} is not in the document")))?;
        NodeSet::tree(root, with_comments)
    };
    Ok(TransformData::NodeSet { document, nodes })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_forms() {
        assert_eq!(ReferenceUri::parse(None).unwrap(), ReferenceUri::Absent);
        assert_eq!(ReferenceUri::parse(Some("")).unwrap(), ReferenceUri::WholeDocument);
        assert_eq!(
            ReferenceUri::parse(Some("#xpointer(/)")).unwrap(),
            ReferenceUri::WholeDocumentWithComments
        );
        assert_eq!(
            ReferenceUri::parse(Some("#body")).unwrap(),
            ReferenceUri::Id {
                id: "body".into(),
                with_comments: false
            }
        );
        assert_eq!(
            ReferenceUri::parse(Some("#xpointer(id('body'))")).unwrap(),
            ReferenceUri::Id {
                id: "body".into(),
                with_comments: true
            }
        );
        assert_eq!(
            ReferenceUri::parse(Some("http://example.com/doc.xml")).unwrap(),
            ReferenceUri::External("http://example.com/doc.xml".into())
        );
    }

    #[test]
    fn test_bad_fragments() {
        assert!(ReferenceUri::parse(Some("#")).is_err());
        assert!(ReferenceUri::parse(Some("#xpointer(id(body))")).is_err());
        assert!(ReferenceUri::parse(Some("#xpointer(//a)")).is_err());
    }

    #[test]
    fn test_comment_handling() {
        let doc = XmlDocument::parse("<r Id='x'><!--c--><a/></r>").unwrap();
        let out = whole_document(doc.clone(), false).unwrap().into_stream().unwrap();
        assert_eq!(out, br#"<r Id="x"><a></a></r>"#);

        let id = doc.parse_doc().unwrap().root_element().id();
        let data = subtree(doc, id, true).unwrap();
        let TransformData::NodeSet { document, nodes } = data else {
            panic!("expected node set");
        };
        let mut out = Vec::new();
        let parsed = document.parse_doc().unwrap();
        ulriksdal_c14n::canonicalize_to(
            &parsed,
            ulriksdal_c14n::C14nMode::InclusiveWithComments,
            Some(&nodes),
            &[],
            &mut out,
        )
        .unwrap();
        assert_eq!(out, br#"<r Id="x"><!--c--><a></a></r>"#);
    }
}

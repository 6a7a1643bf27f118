#![forbid(unsafe_code)]

//! XML document abstraction for the ulriksdal XML Security library.
//!
//! Provides an owned document over `roxmltree`, `NodeSet` operations
//! needed for canonicalization and signature transforms, prefix recovery,
//! and the XPath subset used by the XPath filter transform.

pub mod document;
pub mod names;
pub mod nodeset;
pub mod writer;
pub mod xpath;

pub use document::XmlDocument;
pub use nodeset::NodeSet;
pub use writer::XmlWriter;

/// Return roxmltree parsing options that allow DTD.
///
/// roxmltree does not fetch external entities, and only expands internal
/// ones, so accepting a DTD does not open the document to the network.
pub fn parsing_options() -> roxmltree::ParsingOptions {
    roxmltree::ParsingOptions {
        allow_dtd: true,
        ..roxmltree::ParsingOptions::default()
    }
}

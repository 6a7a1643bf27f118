#![forbid(unsafe_code)]

//! XML Canonicalization (C14N) for the ulriksdal XML Security library.
//!
//! Implements the four W3C canonicalization variants used by XML-DSig:
//! - Canonical XML 1.0 (with and without comments)
//! - Exclusive Canonical XML 1.0 (with and without comments)
//!
//! Output goes to any [`std::io::Write`], so a digest can be fed directly
//! without materializing the canonical bytes.

pub mod escape;
pub mod exclusive;
pub mod inclusive;
pub mod render;

use std::io::Write;

use ulriksdal_core::{algorithm, Error, Result};
use ulriksdal_xml::NodeSet;

/// The canonicalization mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum C14nMode {
    /// Canonical XML 1.0
    Inclusive,
    /// Canonical XML 1.0 with comments
    InclusiveWithComments,
    /// Exclusive Canonical XML 1.0
    Exclusive,
    /// Exclusive Canonical XML 1.0 with comments
    ExclusiveWithComments,
}

/// Where a node sits relative to the document element. Comments and
/// processing instructions outside the document element are separated
/// from it by a line feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocPosition {
    BeforeDocElement,
    InsideDocElement,
    AfterDocElement,
}

impl C14nMode {
    /// Get the algorithm URI for this mode.
    pub fn uri(&self) -> &'static str {
        match self {
            Self::Inclusive => algorithm::C14N,
            Self::InclusiveWithComments => algorithm::C14N_WITH_COMMENTS,
            Self::Exclusive => algorithm::EXC_C14N,
            Self::ExclusiveWithComments => algorithm::EXC_C14N_WITH_COMMENTS,
        }
    }

    /// Parse a C14N mode from an algorithm URI.
    pub fn from_uri(uri: &str) -> Option<Self> {
        match uri {
            algorithm::C14N => Some(Self::Inclusive),
            algorithm::C14N_WITH_COMMENTS => Some(Self::InclusiveWithComments),
            algorithm::EXC_C14N => Some(Self::Exclusive),
            algorithm::EXC_C14N_WITH_COMMENTS => Some(Self::ExclusiveWithComments),
            _ => None,
        }
    }

    pub fn with_comments(&self) -> bool {
        matches!(self, Self::InclusiveWithComments | Self::ExclusiveWithComments)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self, Self::Exclusive | Self::ExclusiveWithComments)
    }
}

/// Canonicalize XML text.
///
/// - `node_set`: optional node set (for document-subset canonicalization)
/// - `inclusive_prefixes`: for exclusive C14N, the InclusiveNamespaces PrefixList
pub fn canonicalize(
    xml: &str,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let doc = roxmltree::Document::parse_with_options(xml, ulriksdal_xml::parsing_options())
        .map_err(|e| Error::XmlParse(e.to_string()))?;
    canonicalize_doc(&doc, mode, node_set, inclusive_prefixes)
}

/// Canonicalize a pre-parsed document into a buffer.
pub fn canonicalize_doc(
    doc: &roxmltree::Document<'_>,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    canonicalize_to(doc, mode, node_set, inclusive_prefixes, &mut out)?;
    Ok(out)
}

/// Canonicalize a pre-parsed document, streaming into `out`.
pub fn canonicalize_to<W: Write + ?Sized>(
    doc: &roxmltree::Document<'_>,
    mode: C14nMode,
    node_set: Option<&NodeSet>,
    inclusive_prefixes: &[String],
    out: &mut W,
) -> Result<()> {
    if mode.is_exclusive() {
        exclusive::canonicalize(doc, mode.with_comments(), node_set, inclusive_prefixes, out)
    } else {
        inclusive::canonicalize(doc, mode.with_comments(), node_set, out)
    }
}

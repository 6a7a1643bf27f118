#![forbid(unsafe_code)]

//! The closed set of reference transforms.

use std::collections::BTreeMap;

use ulriksdal_c14n::C14nMode;
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_xml::document::{element_text, find_child_element};
use ulriksdal_xml::{names, XmlWriter};

use crate::pipeline::{DataType, TransformContext, TransformData};

const ANY: &[DataType] = &[DataType::ByteStream, DataType::NodeSet, DataType::Document];
const STREAM: &[DataType] = &[DataType::ByteStream];
const NODE_SET: &[DataType] = &[DataType::NodeSet];
const XML: &[DataType] = &[DataType::NodeSet, DataType::Document];
const STREAM_OR_DOCUMENT: &[DataType] = &[DataType::ByteStream, DataType::Document];
const DOCUMENT: &[DataType] = &[DataType::Document];

/// One step of a reference's transform chain.
#[derive(Debug, Clone, PartialEq)]
pub enum Transform {
    /// Base64-decode the input's text.
    Base64,
    /// Canonical XML 1.0.
    C14n { with_comments: bool },
    /// Exclusive Canonical XML 1.0.
    ExcC14n {
        with_comments: bool,
        inclusive_prefixes: Vec<String>,
    },
    /// Remove the `position`-th (1-based, document order) `ds:Signature`.
    /// Zero removes nothing.
    EnvelopedSignature { position: usize },
    /// Keep the nodes for which `expression` is true.
    XPath {
        expression: String,
        namespaces: BTreeMap<String, String>,
    },
    /// Apply a stylesheet through the caller's XSLT processor.
    Xslt { stylesheet: String },
    /// Decrypt `EncryptedData` elements except those named by `except` (`#id` URIs).
    Decryption { except: Vec<String> },
    /// MPEG-21 REL license transform.
    License,
}

impl Transform {
    /// The transform for `uri` with default parameters.
    pub fn from_uri(uri: &str) -> Result<Self> {
        Ok(match uri {
            algorithm::BASE64 => Self::Base64,
            algorithm::C14N => Self::C14n { with_comments: false },
            algorithm::C14N_WITH_COMMENTS => Self::C14n { with_comments: true },
            algorithm::EXC_C14N => Self::ExcC14n {
                with_comments: false,
                inclusive_prefixes: Vec::new(),
            },
            algorithm::EXC_C14N_WITH_COMMENTS => Self::ExcC14n {
                with_comments: true,
                inclusive_prefixes: Vec::new(),
            },
            algorithm::ENVELOPED_SIGNATURE => Self::EnvelopedSignature { position: 0 },
            algorithm::XPATH => Self::XPath {
                expression: String::new(),
                namespaces: BTreeMap::new(),
            },
            algorithm::XSLT => Self::Xslt {
                stylesheet: String::new(),
            },
            algorithm::XML_DECRYPTION => Self::Decryption { except: Vec::new() },
            algorithm::LICENSE_TRANSFORM => Self::License,
            _ => return Err(Error::UnsupportedAlgorithm(format!("transform: {uri}"))),
        })
    }

    pub fn uri(&self) -> &'static str {
        match self {
            Self::Base64 => algorithm::BASE64,
            Self::C14n { with_comments } | Self::ExcC14n { with_comments, .. } => {
                self.c14n_mode(*with_comments).uri()
            }
            Self::EnvelopedSignature { .. } => algorithm::ENVELOPED_SIGNATURE,
            Self::XPath { .. } => algorithm::XPATH,
            Self::Xslt { .. } => algorithm::XSLT,
            Self::Decryption { .. } => algorithm::XML_DECRYPTION,
            Self::License => algorithm::LICENSE_TRANSFORM,
        }
    }

    fn c14n_mode(&self, with_comments: bool) -> C14nMode {
        match (self, with_comments) {
            (Self::ExcC14n { .. }, false) => C14nMode::Exclusive,
            (Self::ExcC14n { .. }, true) => C14nMode::ExclusiveWithComments,
            (_, false) => C14nMode::Inclusive,
            (_, true) => C14nMode::InclusiveWithComments,
        }
    }

    pub fn input_types(&self) -> &'static [DataType] {
        match self {
            Self::Base64 | Self::C14n { .. } | Self::ExcC14n { .. } => ANY,
            Self::EnvelopedSignature { .. } | Self::XPath { .. } | Self::Xslt { .. } => ANY,
            Self::Decryption { .. } => STREAM_OR_DOCUMENT,
            Self::License => XML,
        }
    }

    pub fn output_types(&self) -> &'static [DataType] {
        match self {
            Self::Base64 | Self::C14n { .. } | Self::ExcC14n { .. } | Self::Xslt { .. } => STREAM,
            Self::EnvelopedSignature { .. } | Self::XPath { .. } | Self::License => NODE_SET,
            Self::Decryption { .. } => DOCUMENT,
        }
    }

    /// Apply the transform. `input` must already be one of [`Self::input_types`].
    pub fn execute(&self, input: TransformData, ctx: &TransformContext<'_>) -> Result<TransformData> {
        match self {
            Self::Base64 => crate::base64_transform::decode(input),
            Self::C14n { with_comments } => canonicalize(input, self.c14n_mode(*with_comments), &[]),
            Self::ExcC14n {
                with_comments,
                inclusive_prefixes,
            } => canonicalize(input, self.c14n_mode(*with_comments), inclusive_prefixes),
            Self::EnvelopedSignature { position } => crate::enveloped::remove_signature(input, *position),
            Self::XPath {
                expression,
                namespaces,
            } => crate::xpath_filter::filter(input, expression, namespaces),
            Self::Xslt { stylesheet } => crate::xslt::apply(input, stylesheet, ctx),
            Self::Decryption { except } => crate::decrypt::decrypt(input, except, ctx),
            Self::License => crate::license::apply(input, ctx),
        }
    }

    /// Parse a `<ds:Transform>` element with its parameters.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let uri = node
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on Transform".into()))?;
        let mut transform = Self::from_uri(uri)?;
        match &mut transform {
            Self::ExcC14n {
                inclusive_prefixes, ..
            } => *inclusive_prefixes = read_inclusive_prefixes(node),
            Self::XPath {
                expression,
                namespaces,
            } => {
                let xpath = find_child_element(node, ns::DSIG, ns::node::XPATH)
                    .ok_or_else(|| Error::MissingElement("XPath".into()))?;
                *expression = element_text(xpath).trim().to_owned();
                *namespaces = names::in_scope_namespaces(xpath);
            }
            Self::Xslt { stylesheet } => {
                let sheet = node
                    .children()
                    .find(|c| c.is_element())
                    .ok_or_else(|| Error::MissingElement("XSLT stylesheet".into()))?;
                *stylesheet = names::outer_xml_with_context(sheet);
            }
            Self::Decryption { except } => {
                for e in node.children().filter(|c| c.is_element()) {
                    if e.tag_name().namespace() != Some(ns::DECRYPT)
                        || e.tag_name().name() != ns::node::EXCEPT
                    {
                        continue;
                    }
                    let uri = e
                        .attribute(ns::attr::URI)
                        .ok_or_else(|| Error::MissingAttribute("URI on Except".into()))?;
                    if !uri.starts_with('#') {
                        return Err(Error::InvalidUri(format!(
                            "Except URI must be a same-document reference: {uri}"
                        )));
                    }
                    except.push(uri.to_owned());
                }
            }
            _ => {}
        }
        Ok(transform)
    }

    /// Write `<Transform Algorithm="...">` with parameters.
    pub fn write_xml(&self, w: &mut XmlWriter) {
        let attrs = [(ns::attr::ALGORITHM, self.uri())];
        match self {
            Self::ExcC14n {
                inclusive_prefixes, ..
            } if !inclusive_prefixes.is_empty() => {
                let list = inclusive_prefixes.join(" ");
                w.start_element(ns::node::TRANSFORM, &attrs);
                w.empty_element(
                    ns::node::INCLUSIVE_NAMESPACES,
                    &[("xmlns", ns::EXC_C14N), (ns::attr::PREFIX_LIST, list.as_str())],
                );
                w.end_element(ns::node::TRANSFORM);
            }
            Self::XPath {
                expression,
                namespaces,
            } => {
                let decls: Vec<(String, &str)> = namespaces
                    .iter()
                    .filter(|(p, _)| !p.is_empty() && p.as_str() != "xml")
                    .map(|(p, u)| (format!("xmlns:{p}"), u.as_str()))
                    .collect();
                let decl_attrs: Vec<(&str, &str)> =
                    decls.iter().map(|(n, u)| (n.as_str(), *u)).collect();
                w.start_element(ns::node::TRANSFORM, &attrs);
                w.text_element(ns::node::XPATH, &decl_attrs, expression);
                w.end_element(ns::node::TRANSFORM);
            }
            Self::Xslt { stylesheet } if !stylesheet.is_empty() => {
                w.start_element(ns::node::TRANSFORM, &attrs);
                w.write_raw(stylesheet);
                w.end_element(ns::node::TRANSFORM);
            }
            Self::Decryption { except } if !except.is_empty() => {
                w.start_element(ns::node::TRANSFORM, &attrs);
                for uri in except {
                    w.empty_element(
                        ns::node::EXCEPT,
                        &[("xmlns", ns::DECRYPT), (ns::attr::URI, uri.as_str())],
                    );
                }
                w.end_element(ns::node::TRANSFORM);
            }
            _ => w.empty_element(ns::node::TRANSFORM, &attrs),
        }
    }
}

fn canonicalize(input: TransformData, mode: C14nMode, prefixes: &[String]) -> Result<TransformData> {
    let mut out = Vec::new();
    match input {
        TransformData::NodeSet { document, nodes } => {
            let doc = document.parse_doc()?;
            ulriksdal_c14n::canonicalize_to(&doc, mode, Some(&nodes), prefixes, &mut out)?;
        }
        other => {
            let document = other.into_document()?;
            let doc = document.parse_doc()?;
            ulriksdal_c14n::canonicalize_to(&doc, mode, None, prefixes, &mut out)?;
        }
    }
    Ok(TransformData::Stream(out))
}

/// Read the `PrefixList` of an `ec:InclusiveNamespaces` child. `#default`
/// stands for the default namespace.
pub fn read_inclusive_prefixes(node: roxmltree::Node<'_, '_>) -> Vec<String> {
    find_child_element(node, ns::EXC_C14N, ns::node::INCLUSIVE_NAMESPACES)
        .and_then(|n| n.attribute(ns::attr::PREFIX_LIST))
        .map(|list| list.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

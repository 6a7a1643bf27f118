#![forbid(unsafe_code)]

//! `<ds:Reference>`: what is signed, how it is transformed and its digest.

use base64::Engine;
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_transforms::{Transform, TransformChain};
use ulriksdal_xml::document::{element_text, find_child_element};
use ulriksdal_xml::{names, XmlDocument, XmlWriter};

/// One signed item of a `SignedInfo`.
///
/// Mutators drop the serialized form cached by [`Reference::load_xml`].
#[derive(Debug, Clone)]
pub struct Reference {
    id: Option<String>,
    uri: Option<String>,
    reference_type: Option<String>,
    digest_method: String,
    digest_value: Vec<u8>,
    transform_chain: TransformChain,
    detached: Option<Vec<u8>>,
    cached_xml: Option<String>,
}

impl Default for Reference {
    fn default() -> Self {
        Self {
            id: None,
            uri: None,
            reference_type: None,
            digest_method: algorithm::SHA256.to_owned(),
            digest_value: Vec::new(),
            transform_chain: TransformChain::new(),
            detached: None,
            cached_xml: None,
        }
    }
}

impl PartialEq for Reference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.uri == other.uri
            && self.reference_type == other.reference_type
            && self.digest_method == other.digest_method
            && self.digest_value == other.digest_value
            && self.transform_chain == other.transform_chain
    }
}

impl Reference {
    pub fn new() -> Self {
        Self::default()
    }

    /// A reference to `uri` (`""`, `#id`, `#xpointer(...)`).
    pub fn with_uri(uri: impl Into<String>) -> Self {
        Self {
            uri: Some(uri.into()),
            ..Self::default()
        }
    }

    /// A reference without a URI whose content is `data`.
    pub fn from_stream(data: impl Into<Vec<u8>>) -> Self {
        Self {
            detached: Some(data.into()),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
        self.cached_xml = None;
    }

    pub fn uri(&self) -> Option<&str> {
        self.uri.as_deref()
    }

    pub fn set_uri(&mut self, uri: Option<String>) {
        self.uri = uri;
        self.cached_xml = None;
    }

    pub fn reference_type(&self) -> Option<&str> {
        self.reference_type.as_deref()
    }

    pub fn set_reference_type(&mut self, reference_type: Option<String>) {
        self.reference_type = reference_type;
        self.cached_xml = None;
    }

    pub fn digest_method(&self) -> &str {
        &self.digest_method
    }

    pub fn set_digest_method(&mut self, uri: impl Into<String>) {
        self.digest_method = uri.into();
        self.cached_xml = None;
    }

    pub fn digest_value(&self) -> &[u8] {
        &self.digest_value
    }

    pub fn set_digest_value(&mut self, digest: Vec<u8>) {
        self.digest_value = digest;
        self.cached_xml = None;
    }

    pub fn transform_chain(&self) -> &TransformChain {
        &self.transform_chain
    }

    pub fn add_transform(&mut self, transform: Transform) {
        self.transform_chain.add(transform);
        self.cached_xml = None;
    }

    /// Content bound by [`Reference::from_stream`].
    pub fn detached_content(&self) -> Option<&[u8]> {
        self.detached.as_deref()
    }

    /// Point every enveloped-signature transform at the `position`-th
    /// signature of the document. Not a content change: the cache stays.
    pub(crate) fn set_enveloped_position(&mut self, position: usize) {
        for t in self.transform_chain.transforms_mut() {
            if let Transform::EnvelopedSignature { position: p } = t {
                *p = position;
            }
        }
    }

    pub fn is_cached(&self) -> bool {
        self.cached_xml.is_some()
    }

    /// Parse a `<ds:Reference>` element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let transform_chain = match find_child_element(node, ns::DSIG, ns::node::TRANSFORMS) {
            Some(t) => TransformChain::load_xml(t)?,
            None => TransformChain::new(),
        };
        let digest_method = find_child_element(node, ns::DSIG, ns::node::DIGEST_METHOD)
            .ok_or_else(|| Error::MissingElement("DigestMethod".into()))?
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on DigestMethod".into()))?
            .to_owned();
        let digest_value = find_child_element(node, ns::DSIG, ns::node::DIGEST_VALUE)
            .ok_or_else(|| Error::MissingElement("DigestValue".into()))?;
        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            uri: node.attribute(ns::attr::URI).map(str::to_owned),
            reference_type: node.attribute(ns::attr::TYPE).map(str::to_owned),
            digest_method,
            digest_value: decode_base64(&element_text(digest_value), "DigestValue")?,
            transform_chain,
            detached: None,
            cached_xml: Some(names::outer_xml_with_context(node)),
        })
    }

    /// Parse a standalone `<ds:Reference>` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    /// Serialize with the dsig namespace as default on the root.
    pub fn get_xml(&self) -> String {
        if let Some(xml) = &self.cached_xml {
            return xml.clone();
        }
        let mut w = XmlWriter::new();
        let mut attrs = vec![("xmlns", ns::DSIG)];
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(uri) = &self.uri {
            attrs.push((ns::attr::URI, uri.as_str()));
        }
        if let Some(t) = &self.reference_type {
            attrs.push((ns::attr::TYPE, t.as_str()));
        }
        w.start_element(ns::node::REFERENCE, &attrs);
        self.transform_chain.write_xml(&mut w);
        w.empty_element(
            ns::node::DIGEST_METHOD,
            &[(ns::attr::ALGORITHM, self.digest_method.as_str())],
        );
        let digest = base64::engine::general_purpose::STANDARD.encode(&self.digest_value);
        w.text_element(ns::node::DIGEST_VALUE, &[], &digest);
        w.end_element(ns::node::REFERENCE);
        w.into_string()
    }
}

/// Decode base64 element content, ignoring embedded whitespace.
pub(crate) fn decode_base64(text: &str, what: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

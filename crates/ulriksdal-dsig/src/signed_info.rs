#![forbid(unsafe_code)]

//! `<ds:SignedInfo>`: the block the signature value is computed over.

use ulriksdal_c14n::C14nMode;
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_transforms::read_inclusive_prefixes;
use ulriksdal_xml::document::{element_text, find_child_element, find_child_elements};
use ulriksdal_xml::{names, XmlDocument, XmlWriter};

use crate::reference::Reference;

#[derive(Debug, Clone)]
pub struct SignedInfo {
    id: Option<String>,
    canonicalization_method: String,
    inclusive_prefixes: Vec<String>,
    signature_method: Option<String>,
    signature_length: Option<usize>,
    references: Vec<Reference>,
    cached_xml: Option<String>,
}

impl Default for SignedInfo {
    fn default() -> Self {
        Self {
            id: None,
            canonicalization_method: algorithm::C14N.to_owned(),
            inclusive_prefixes: Vec::new(),
            signature_method: None,
            signature_length: None,
            references: Vec::new(),
            cached_xml: None,
        }
    }
}

impl PartialEq for SignedInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.canonicalization_method == other.canonicalization_method
            && self.inclusive_prefixes == other.inclusive_prefixes
            && self.signature_method == other.signature_method
            && self.signature_length == other.signature_length
            && self.references == other.references
    }
}

impl SignedInfo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn set_id(&mut self, id: Option<String>) {
        self.id = id;
        self.cached_xml = None;
    }

    pub fn canonicalization_method(&self) -> &str {
        &self.canonicalization_method
    }

    pub fn set_canonicalization_method(&mut self, uri: impl Into<String>) {
        self.canonicalization_method = uri.into();
        self.cached_xml = None;
    }

    /// `InclusiveNamespaces PrefixList` for an exclusive canonicalization method.
    pub fn inclusive_prefixes(&self) -> &[String] {
        &self.inclusive_prefixes
    }

    pub fn set_inclusive_prefixes(&mut self, prefixes: Vec<String>) {
        self.inclusive_prefixes = prefixes;
        self.cached_xml = None;
    }

    pub fn signature_method(&self) -> Option<&str> {
        self.signature_method.as_deref()
    }

    pub fn set_signature_method(&mut self, uri: impl Into<String>) {
        self.signature_method = Some(uri.into());
        self.cached_xml = None;
    }

    /// Declared MAC length in bits (`HMACOutputLength`).
    pub fn signature_length(&self) -> Option<usize> {
        self.signature_length
    }

    pub fn set_signature_length(&mut self, bits: Option<usize>) {
        self.signature_length = bits;
        self.cached_xml = None;
    }

    pub fn references(&self) -> &[Reference] {
        &self.references
    }

    pub fn references_mut(&mut self) -> &mut [Reference] {
        self.cached_xml = None;
        &mut self.references
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.references.push(reference);
        self.cached_xml = None;
    }

    pub(crate) fn set_enveloped_position(&mut self, position: usize) {
        for r in &mut self.references {
            r.set_enveloped_position(position);
        }
    }

    /// Whether this is still the form loaded from a document.
    pub fn is_cached(&self) -> bool {
        self.cached_xml.is_some()
    }

    /// The canonicalization mode named by `CanonicalizationMethod`.
    pub fn c14n_mode(&self) -> Result<C14nMode> {
        C14nMode::from_uri(&self.canonicalization_method).ok_or_else(|| {
            Error::UnsupportedAlgorithm(format!(
                "canonicalization method: {}",
                self.canonicalization_method
            ))
        })
    }

    /// Parse a `<ds:SignedInfo>` element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let c14n = find_child_element(node, ns::DSIG, ns::node::CANONICALIZATION_METHOD)
            .ok_or_else(|| Error::MissingElement("CanonicalizationMethod".into()))?;
        let canonicalization_method = c14n
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on CanonicalizationMethod".into()))?
            .to_owned();

        let method = find_child_element(node, ns::DSIG, ns::node::SIGNATURE_METHOD)
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;
        let signature_method = method
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on SignatureMethod".into()))?
            .to_owned();
        let signature_length = find_child_element(method, ns::DSIG, ns::node::HMAC_OUTPUT_LENGTH)
            .map(|n| {
                let text = element_text(n);
                text.trim().parse::<usize>().map_err(|_| {
                    Error::XmlStructure(format!("invalid HMACOutputLength '{}'", text.trim()))
                })
            })
            .transpose()?;

        let references = find_child_elements(node, ns::DSIG, ns::node::REFERENCE)
            .into_iter()
            .map(Reference::load_xml)
            .collect::<Result<Vec<_>>>()?;
        if references.is_empty() {
            return Err(Error::MissingElement("Reference".into()));
        }

        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            canonicalization_method,
            inclusive_prefixes: read_inclusive_prefixes(c14n),
            signature_method: Some(signature_method),
            signature_length,
            references,
            cached_xml: Some(names::outer_xml_with_context(node)),
        })
    }

    /// Parse a standalone `<ds:SignedInfo>` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    /// Serialize with the dsig namespace as default on the root. Needs a
    /// signature method and at least one reference.
    pub fn get_xml(&self) -> Result<String> {
        if let Some(xml) = &self.cached_xml {
            return Ok(xml.clone());
        }
        let method = self
            .signature_method
            .as_deref()
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;
        if self.references.is_empty() {
            return Err(Error::MissingElement("Reference".into()));
        }

        let mut w = XmlWriter::new();
        let mut attrs = vec![("xmlns", ns::DSIG)];
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        w.start_element(ns::node::SIGNED_INFO, &attrs);

        let c14n_attrs = [(ns::attr::ALGORITHM, self.canonicalization_method.as_str())];
        if self.inclusive_prefixes.is_empty() {
            w.empty_element(ns::node::CANONICALIZATION_METHOD, &c14n_attrs);
        } else {
            let list = self.inclusive_prefixes.join(" ");
            w.start_element(ns::node::CANONICALIZATION_METHOD, &c14n_attrs);
            w.empty_element(
                ns::node::INCLUSIVE_NAMESPACES,
                &[("xmlns", ns::EXC_C14N), (ns::attr::PREFIX_LIST, list.as_str())],
            );
            w.end_element(ns::node::CANONICALIZATION_METHOD);
        }

        let method_attrs = [(ns::attr::ALGORITHM, method)];
        match self.signature_length {
            Some(bits) => {
                w.start_element(ns::node::SIGNATURE_METHOD, &method_attrs);
                w.text_element(ns::node::HMAC_OUTPUT_LENGTH, &[], &bits.to_string());
                w.end_element(ns::node::SIGNATURE_METHOD);
            }
            None => w.empty_element(ns::node::SIGNATURE_METHOD, &method_attrs),
        }

        for r in &self.references {
            w.write_raw(&r.get_xml());
        }
        w.end_element(ns::node::SIGNED_INFO);
        Ok(w.into_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SignedInfo {
        let mut si = SignedInfo::new();
        si.set_canonicalization_method(algorithm::EXC_C14N);
        si.set_inclusive_prefixes(vec!["a".into()]);
        si.set_signature_method(algorithm::HMAC_SHA256);
        si.set_signature_length(Some(256));
        let mut r = Reference::with_uri("");
        r.set_digest_value(vec![0xAB; 32]);
        si.add_reference(r);
        si
    }

    #[test]
    fn test_defaults() {
        let si = SignedInfo::new();
        assert_eq!(si.canonicalization_method(), algorithm::C14N);
        assert!(si.signature_method().is_none());
    }

    #[test]
    fn test_requires_reference_and_method() {
        let mut si = SignedInfo::new();
        assert!(si.get_xml().is_err());
        si.set_signature_method(algorithm::RSA_SHA256);
        assert!(matches!(si.get_xml(), Err(Error::MissingElement(_))));
        si.add_reference(Reference::with_uri(""));
        assert!(si.get_xml().is_ok());
    }

    #[test]
    fn test_xml_roundtrip() {
        let si = sample();
        let xml = si.get_xml().unwrap();
        assert!(xml.contains("<HMACOutputLength>256</HMACOutputLength>"));
        let loaded = SignedInfo::from_xml(&xml).unwrap();
        assert_eq!(loaded, si);
        assert_eq!(loaded.c14n_mode().unwrap(), C14nMode::Exclusive);
    }

    #[test]
    fn test_bad_output_length() {
        let xml = sample()
            .get_xml()
            .unwrap()
            .replace("<HMACOutputLength>256<", "<HMACOutputLength>lots<");
        assert!(matches!(SignedInfo::from_xml(&xml), Err(Error::XmlStructure(_))));
    }

    #[test]
    fn test_mutation_drops_cache() {
        let mut si = SignedInfo::from_xml(&sample().get_xml().unwrap()).unwrap();
        assert!(si.is_cached());
        si.references_mut()[0].set_digest_value(vec![1]);
        assert!(!si.is_cached());
        assert!(si.get_xml().unwrap().contains("<DigestValue>AQ==</DigestValue>"));
    }
}

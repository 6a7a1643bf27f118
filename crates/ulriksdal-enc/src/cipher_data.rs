#![forbid(unsafe_code)]

//! `<xenc:CipherData>`: the ciphertext, inline or by reference.

use std::collections::BTreeMap;

use base64::Engine;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_transforms::TransformChain;
use ulriksdal_xml::document::{element_text, find_child_element, is_element_named};
use ulriksdal_xml::{names, XmlWriter};

/// Where the ciphertext lives when it is not inline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CipherReference {
    pub uri: String,
    /// Applied to the referenced data to obtain the cipher octets.
    pub transforms: TransformChain,
}

impl CipherReference {
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            transforms: TransformChain::new(),
        }
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let uri = node
            .attribute(ns::attr::URI)
            .ok_or_else(|| Error::MissingAttribute("URI on CipherReference".into()))?
            .to_owned();
        let transforms = node
            .children()
            .find(|c| {
                is_element_named(c, ns::ENC, ns::node::TRANSFORMS)
                    || is_element_named(c, ns::DSIG, ns::node::TRANSFORMS)
            })
            .map(TransformChain::load_xml)
            .transpose()?
            .unwrap_or_default();
        Ok(Self { uri, transforms })
    }

    /// Write in the ambient (xenc default) namespace; each `Transform`
    /// carries its own dsig namespace declaration.
    pub fn write_xml(&self, w: &mut XmlWriter) -> Result<()> {
        let attrs = [(ns::attr::URI, self.uri.as_str())];
        if self.transforms.is_empty() {
            w.empty_element(ns::node::CIPHER_REFERENCE, &attrs);
            return Ok(());
        }
        w.start_element(ns::node::CIPHER_REFERENCE, &attrs);
        w.start_element(ns::node::TRANSFORMS, &[]);
        let dsig: BTreeMap<String, String> =
            [(String::new(), ns::DSIG.to_owned())].into_iter().collect();
        for t in self.transforms.transforms() {
            let mut tw = XmlWriter::new();
            t.write_xml(&mut tw);
            w.write_raw(&names::propagate_namespaces(&tw.into_string(), &dsig)?);
        }
        w.end_element(ns::node::TRANSFORMS);
        w.end_element(ns::node::CIPHER_REFERENCE);
        Ok(())
    }
}

/// Exactly one of an inline cipher value or a [`CipherReference`].
///
/// The two are exclusive from the moment one is set: assigning the other
/// kind fails with [`Error::CipherDataConflict`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CipherData {
    value: Option<Vec<u8>>,
    reference: Option<CipherReference>,
}

impl CipherData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_value(value: Vec<u8>) -> Self {
        Self {
            value: Some(value),
            reference: None,
        }
    }

    pub fn with_reference(reference: CipherReference) -> Self {
        Self {
            value: None,
            reference: Some(reference),
        }
    }

    pub fn cipher_value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn set_cipher_value(&mut self, value: Vec<u8>) -> Result<()> {
        if self.reference.is_some() {
            return Err(Error::CipherDataConflict(
                "CipherData already holds a CipherReference".into(),
            ));
        }
        self.value = Some(value);
        Ok(())
    }

    pub fn cipher_reference(&self) -> Option<&CipherReference> {
        self.reference.as_ref()
    }

    pub fn set_cipher_reference(&mut self, reference: CipherReference) -> Result<()> {
        if self.value.is_some() {
            return Err(Error::CipherDataConflict(
                "CipherData already holds a CipherValue".into(),
            ));
        }
        self.reference = Some(reference);
        Ok(())
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_none() && self.reference.is_none()
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let value = find_child_element(node, ns::ENC, ns::node::CIPHER_VALUE);
        let reference = find_child_element(node, ns::ENC, ns::node::CIPHER_REFERENCE);
        match (value, reference) {
            (Some(_), Some(_)) => Err(Error::CipherDataConflict(
                "CipherData carries both CipherValue and CipherReference".into(),
            )),
            (Some(v), None) => {
                let clean: String = element_text(v).chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(clean)
                    .map_err(|e| Error::Base64(format!("CipherValue: {e}")))?;
                Ok(Self::with_value(bytes))
            }
            (None, Some(r)) => Ok(Self::with_reference(CipherReference::load_xml(r)?)),
            (None, None) => Err(Error::MissingElement("CipherValue or CipherReference".into())),
        }
    }

    pub fn write_xml(&self, w: &mut XmlWriter) -> Result<()> {
        w.start_element(ns::node::CIPHER_DATA, &[]);
        match (&self.value, &self.reference) {
            (Some(v), _) => {
                let text = base64::engine::general_purpose::STANDARD.encode(v);
                w.text_element(ns::node::CIPHER_VALUE, &[], &text);
            }
            (None, Some(r)) => r.write_xml(w)?,
            (None, None) => {
                return Err(Error::MissingElement("CipherValue or CipherReference".into()))
            }
        }
        w.end_element(ns::node::CIPHER_DATA);
        Ok(())
    }
}

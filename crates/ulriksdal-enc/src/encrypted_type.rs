#![forbid(unsafe_code)]

//! The `EncryptedData` / `EncryptedKey` object model.
//!
//! Both share the [`EncryptedType`] fields; `EncryptedKey` adds a
//! recipient, a carried key name and a reference list. Serialization puts
//! the xenc namespace on the root as default and the dsig namespace on
//! `KeyInfo` and `DigestMethod`.

use base64::Engine;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_crypto::OaepParams;
use ulriksdal_keys::KeyInfo;
use ulriksdal_xml::document::{element_text, find_child_element, find_child_elements, is_element_named};
use ulriksdal_xml::{names, XmlDocument, XmlWriter};

use crate::cipher_data::CipherData;

fn decode_base64(text: &str, what: &str) -> Result<Vec<u8>> {
    let clean: String = text.chars().filter(|c| !c.is_whitespace()).collect();
    base64::engine::general_purpose::STANDARD
        .decode(clean)
        .map_err(|e| Error::Base64(format!("{what}: {e}")))
}

/// `<xenc:EncryptionMethod>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptionMethod {
    pub algorithm: String,
    /// Declared key size in bits.
    pub key_size: Option<usize>,
    /// RSA-OAEP digest and label; ignored by other algorithms.
    pub oaep: OaepParams,
}

impl EncryptionMethod {
    pub fn new(algorithm: impl Into<String>) -> Self {
        Self {
            algorithm: algorithm.into(),
            ..Self::default()
        }
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let algorithm = node
            .attribute(ns::attr::ALGORITHM)
            .ok_or_else(|| Error::MissingAttribute("Algorithm on EncryptionMethod".into()))?
            .to_owned();
        let key_size = find_child_element(node, ns::ENC, ns::node::KEY_SIZE)
            .map(|n| {
                let text = element_text(n);
                text.trim()
                    .parse::<usize>()
                    .map_err(|_| Error::XmlStructure(format!("invalid KeySize '{}'", text.trim())))
            })
            .transpose()?;
        let label = find_child_element(node, ns::ENC, ns::node::OAEP_PARAMS)
            .map(|n| decode_base64(&element_text(n), "OAEPparams"))
            .transpose()?;
        // Older documents put DigestMethod in the xenc namespace.
        let digest_uri = find_child_element(node, ns::DSIG, ns::node::DIGEST_METHOD)
            .or_else(|| find_child_element(node, ns::ENC, ns::node::DIGEST_METHOD))
            .and_then(|n| n.attribute(ns::attr::ALGORITHM))
            .map(str::to_owned);
        Ok(Self {
            algorithm,
            key_size,
            oaep: OaepParams { digest_uri, label },
        })
    }

    pub fn write_xml(&self, w: &mut XmlWriter) {
        let attrs = [(ns::attr::ALGORITHM, self.algorithm.as_str())];
        if self.key_size.is_none() && self.oaep == OaepParams::default() {
            w.empty_element(ns::node::ENCRYPTION_METHOD, &attrs);
            return;
        }
        w.start_element(ns::node::ENCRYPTION_METHOD, &attrs);
        if let Some(bits) = self.key_size {
            w.text_element(ns::node::KEY_SIZE, &[], &bits.to_string());
        }
        if let Some(label) = &self.oaep.label {
            let text = base64::engine::general_purpose::STANDARD.encode(label);
            w.text_element(ns::node::OAEP_PARAMS, &[], &text);
        }
        if let Some(digest) = &self.oaep.digest_uri {
            w.empty_element(
                ns::node::DIGEST_METHOD,
                &[("xmlns", ns::DSIG), (ns::attr::ALGORITHM, digest.as_str())],
            );
        }
        w.end_element(ns::node::ENCRYPTION_METHOD);
    }
}

/// One `<xenc:EncryptionProperty>`; the content is kept as raw XML.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptionProperty {
    pub id: Option<String>,
    pub target: Option<String>,
    pub content: String,
}

impl EncryptionProperty {
    fn load_xml(node: roxmltree::Node<'_, '_>) -> Self {
        Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            target: node.attribute(ns::attr::TARGET).map(str::to_owned),
            content: names::inner_xml(node),
        }
    }

    fn write_xml(&self, w: &mut XmlWriter) {
        let mut attrs = Vec::new();
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(target) = &self.target {
            attrs.push((ns::attr::TARGET, target.as_str()));
        }
        w.start_element(ns::node::ENCRYPTION_PROPERTY, &attrs);
        w.write_raw(&self.content);
        w.end_element(ns::node::ENCRYPTION_PROPERTY);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReferenceKind {
    Data,
    Key,
}

/// A `DataReference` or `KeyReference` in an `EncryptedKey`'s reference list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptedReference {
    pub kind: ReferenceKind,
    pub uri: String,
}

impl EncryptedReference {
    pub fn data(uri: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Data,
            uri: uri.into(),
        }
    }

    pub fn key(uri: impl Into<String>) -> Self {
        Self {
            kind: ReferenceKind::Key,
            uri: uri.into(),
        }
    }

    fn element_name(&self) -> &'static str {
        match self.kind {
            ReferenceKind::Data => ns::node::DATA_REFERENCE,
            ReferenceKind::Key => ns::node::KEY_REFERENCE,
        }
    }
}

/// Fields common to `EncryptedData` and `EncryptedKey`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptedType {
    pub id: Option<String>,
    /// `Type` attribute, e.g. [`ns::ENC_TYPE_ELEMENT`].
    pub type_uri: Option<String>,
    pub mime_type: Option<String>,
    pub encoding: Option<String>,
    pub encryption_method: Option<EncryptionMethod>,
    pub key_info: Option<KeyInfo>,
    pub cipher_data: CipherData,
    pub properties: Vec<EncryptionProperty>,
}

impl EncryptedType {
    /// The `EncryptionMethod` algorithm, or a structural error when absent.
    pub fn algorithm(&self) -> Result<&str> {
        self.encryption_method
            .as_ref()
            .map(|m| m.algorithm.as_str())
            .ok_or_else(|| Error::MissingElement("EncryptionMethod".into()))
    }

    fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let encryption_method = find_child_element(node, ns::ENC, ns::node::ENCRYPTION_METHOD)
            .map(EncryptionMethod::load_xml)
            .transpose()?;
        let key_info = find_child_element(node, ns::DSIG, ns::node::KEY_INFO)
            .map(KeyInfo::load_xml)
            .transpose()?;
        let cipher_data = find_child_element(node, ns::ENC, ns::node::CIPHER_DATA)
            .ok_or_else(|| Error::MissingElement("CipherData".into()))?;
        let properties = find_child_element(node, ns::ENC, ns::node::ENCRYPTION_PROPERTIES)
            .map(|props| {
                find_child_elements(props, ns::ENC, ns::node::ENCRYPTION_PROPERTY)
                    .into_iter()
                    .map(EncryptionProperty::load_xml)
                    .collect()
            })
            .unwrap_or_default();
        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            type_uri: node.attribute(ns::attr::TYPE).map(str::to_owned),
            mime_type: node.attribute(ns::attr::MIME_TYPE).map(str::to_owned),
            encoding: node.attribute(ns::attr::ENCODING).map(str::to_owned),
            encryption_method,
            key_info,
            cipher_data: CipherData::load_xml(cipher_data)?,
            properties,
        })
    }

    fn root_attrs<'s>(&'s self, attrs: &mut Vec<(&'s str, &'s str)>) {
        attrs.push(("xmlns", ns::ENC));
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(t) = &self.type_uri {
            attrs.push((ns::attr::TYPE, t.as_str()));
        }
        if let Some(m) = &self.mime_type {
            attrs.push((ns::attr::MIME_TYPE, m.as_str()));
        }
        if let Some(e) = &self.encoding {
            attrs.push((ns::attr::ENCODING, e.as_str()));
        }
    }

    fn write_body(&self, w: &mut XmlWriter) -> Result<()> {
        if let Some(method) = &self.encryption_method {
            method.write_xml(w);
        }
        if let Some(ki) = self.key_info.as_ref().filter(|ki| !ki.is_empty()) {
            w.write_raw(&ki.get_xml());
        }
        self.cipher_data.write_xml(w)?;
        if !self.properties.is_empty() {
            w.start_element(ns::node::ENCRYPTION_PROPERTIES, &[]);
            for p in &self.properties {
                p.write_xml(w);
            }
            w.end_element(ns::node::ENCRYPTION_PROPERTIES);
        }
        Ok(())
    }
}

/// `<xenc:EncryptedData>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptedData {
    pub common: EncryptedType,
}

impl EncryptedData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        if !is_element_named(&node, ns::ENC, ns::node::ENCRYPTED_DATA) {
            return Err(Error::XmlStructure(format!(
                "expected EncryptedData, found {}",
                node.tag_name().name()
            )));
        }
        Ok(Self {
            common: EncryptedType::load_xml(node)?,
        })
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    /// Serialize; fails when the cipher data is empty.
    pub fn get_xml(&self) -> Result<String> {
        let mut w = XmlWriter::new();
        let mut attrs = Vec::new();
        self.common.root_attrs(&mut attrs);
        w.start_element(ns::node::ENCRYPTED_DATA, &attrs);
        self.common.write_body(&mut w)?;
        w.end_element(ns::node::ENCRYPTED_DATA);
        Ok(w.into_string())
    }
}

/// `<xenc:EncryptedKey>`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EncryptedKey {
    pub common: EncryptedType,
    /// Who the key is meant for; decryption can be limited to one recipient.
    pub recipient: Option<String>,
    pub carried_key_name: Option<String>,
    pub references: Vec<EncryptedReference>,
}

impl EncryptedKey {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_reference(&mut self, reference: EncryptedReference) {
        self.references.push(reference);
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        if !is_element_named(&node, ns::ENC, ns::node::ENCRYPTED_KEY) {
            return Err(Error::XmlStructure(format!(
                "expected EncryptedKey, found {}",
                node.tag_name().name()
            )));
        }
        let mut references = Vec::new();
        if let Some(list) = find_child_element(node, ns::ENC, ns::node::REFERENCE_LIST) {
            for r in list.children().filter(|c| c.is_element()) {
                let kind = if is_element_named(&r, ns::ENC, ns::node::DATA_REFERENCE) {
                    ReferenceKind::Data
                } else if is_element_named(&r, ns::ENC, ns::node::KEY_REFERENCE) {
                    ReferenceKind::Key
                } else {
                    return Err(Error::XmlStructure(format!(
                        "unexpected {} inside ReferenceList",
                        r.tag_name().name()
                    )));
                };
                let uri = r
                    .attribute(ns::attr::URI)
                    .ok_or_else(|| Error::MissingAttribute("URI on ReferenceList entry".into()))?;
                references.push(EncryptedReference {
                    kind,
                    uri: uri.to_owned(),
                });
            }
        }
        Ok(Self {
            common: EncryptedType::load_xml(node)?,
            recipient: node.attribute(ns::attr::RECIPIENT).map(str::to_owned),
            carried_key_name: find_child_element(node, ns::ENC, ns::node::CARRIED_KEY_NAME)
                .map(|n| element_text(n).trim().to_owned()),
            references,
        })
    }

    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    pub fn get_xml(&self) -> Result<String> {
        let mut w = XmlWriter::new();
        let mut attrs = Vec::new();
        self.common.root_attrs(&mut attrs);
        if let Some(r) = &self.recipient {
            attrs.push((ns::attr::RECIPIENT, r.as_str()));
        }
        w.start_element(ns::node::ENCRYPTED_KEY, &attrs);
        self.common.write_body(&mut w)?;
        if !self.references.is_empty() {
            w.start_element(ns::node::REFERENCE_LIST, &[]);
            for r in &self.references {
                w.empty_element(r.element_name(), &[(ns::attr::URI, r.uri.as_str())]);
            }
            w.end_element(ns::node::REFERENCE_LIST);
        }
        if let Some(name) = &self.carried_key_name {
            w.text_element(ns::node::CARRIED_KEY_NAME, &[], name);
        }
        w.end_element(ns::node::ENCRYPTED_KEY);
        Ok(w.into_string())
    }
}

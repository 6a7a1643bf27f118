#![forbid(unsafe_code)]

//! The `<ds:KeyInfo>` object model.
//!
//! A `KeyInfo` is an ordered list of clauses; order matters because key
//! resolution tries them first to last. Loaded instances keep the XML they
//! were read from and hand it back verbatim from [`KeyInfo::get_xml`] until
//! they are modified.

use base64::Engine;
use rsa::traits::PublicKeyParts;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_xml::document::{element_text, is_element_named};
use ulriksdal_xml::{names, XmlDocument, XmlWriter};

/// RSA public parameters of an `RSAKeyValue`, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RsaKeyValue {
    pub modulus: Vec<u8>,
    pub exponent: Vec<u8>,
}

impl RsaKeyValue {
    pub fn from_public_key(key: &rsa::RsaPublicKey) -> Self {
        Self {
            modulus: key.n().to_bytes_be(),
            exponent: key.e().to_bytes_be(),
        }
    }

    pub fn to_public_key(&self) -> Result<rsa::RsaPublicKey> {
        let n = rsa::BigUint::from_bytes_be(&self.modulus);
        let e = rsa::BigUint::from_bytes_be(&self.exponent);
        rsa::RsaPublicKey::new(n, e)
            .map_err(|err| Error::Key(format!("invalid RSA public key: {err}")))
    }
}

/// DSA domain parameters and public value of a `DSAKeyValue`, big-endian.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DsaKeyValue {
    pub p: Vec<u8>,
    pub q: Vec<u8>,
    pub g: Vec<u8>,
    pub y: Vec<u8>,
}

impl DsaKeyValue {
    pub fn from_verifying_key(key: &dsa::VerifyingKey) -> Self {
        let c = key.components();
        Self {
            p: c.p().to_bytes_be(),
            q: c.q().to_bytes_be(),
            g: c.g().to_bytes_be(),
            y: key.y().to_bytes_be(),
        }
    }

    pub fn to_verifying_key(&self) -> Result<dsa::VerifyingKey> {
        let components = dsa::Components::from_components(
            dsa::BigUint::from_bytes_be(&self.p),
            dsa::BigUint::from_bytes_be(&self.q),
            dsa::BigUint::from_bytes_be(&self.g),
        )
        .map_err(|e| Error::Key(format!("invalid DSA components: {e}")))?;
        dsa::VerifyingKey::from_components(components, dsa::BigUint::from_bytes_be(&self.y))
            .map_err(|e| Error::Key(format!("invalid DSA public key: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct X509IssuerSerial {
    pub issuer_name: String,
    /// Decimal serial number as written in the document.
    pub serial_number: String,
}

/// Contents of an `X509Data` clause. Any subset may be present.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct X509Data {
    /// DER certificates.
    pub certificates: Vec<Vec<u8>>,
    pub subject_names: Vec<String>,
    pub skis: Vec<Vec<u8>>,
    pub issuer_serials: Vec<X509IssuerSerial>,
    /// DER CRL.
    pub crl: Option<Vec<u8>>,
}

/// One child of a `KeyInfo`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInfoClause {
    KeyName(String),
    RsaKeyValue(RsaKeyValue),
    DsaKeyValue(DsaKeyValue),
    X509Data(X509Data),
    /// Indirection to key material elsewhere, usually `#id` in the same document.
    RetrievalMethod {
        uri: String,
        type_uri: Option<String>,
    },
    /// A nested `xenc:EncryptedKey`, kept as standalone XML.
    EncryptedKey(String),
    /// Any other element, passed through untouched.
    Generic(String),
}

impl KeyInfoClause {
    /// Parse a single `KeyInfo` child element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        let local = node.tag_name().name();
        let in_dsig = node.tag_name().namespace() == Some(ns::DSIG);
        if is_element_named(&node, ns::ENC, ns::node::ENCRYPTED_KEY) {
            return Ok(Self::EncryptedKey(names::outer_xml_with_context(node)));
        }
        if !in_dsig {
            return Ok(Self::Generic(names::outer_xml_with_context(node)));
        }
        match local {
            ns::node::KEY_NAME => Ok(Self::KeyName(element_text(node).trim().to_owned())),
            ns::node::KEY_VALUE => parse_key_value(node),
            // A bare RSAKeyValue/DSAKeyValue shows up as a RetrievalMethod target.
            ns::node::RSA_KEY_VALUE => parse_rsa_key_value(node),
            ns::node::DSA_KEY_VALUE => parse_dsa_key_value(node),
            ns::node::X509_DATA => parse_x509_data(node).map(Self::X509Data),
            ns::node::RETRIEVAL_METHOD => {
                let uri = node
                    .attribute(ns::attr::URI)
                    .ok_or_else(|| Error::MissingAttribute("URI on RetrievalMethod".into()))?;
                Ok(Self::RetrievalMethod {
                    uri: uri.to_owned(),
                    type_uri: node.attribute(ns::attr::TYPE).map(str::to_owned),
                })
            }
            _ => Ok(Self::Generic(names::outer_xml_with_context(node))),
        }
    }

    fn write_xml(&self, w: &mut XmlWriter) {
        let engine = base64::engine::general_purpose::STANDARD;
        match self {
            Self::KeyName(name) => w.text_element(ns::node::KEY_NAME, &[], name),
            Self::RsaKeyValue(kv) => {
                w.start_element(ns::node::KEY_VALUE, &[]);
                w.start_element(ns::node::RSA_KEY_VALUE, &[]);
                w.text_element(ns::node::RSA_MODULUS, &[], &engine.encode(&kv.modulus));
                w.text_element(ns::node::RSA_EXPONENT, &[], &engine.encode(&kv.exponent));
                w.end_element(ns::node::RSA_KEY_VALUE);
                w.end_element(ns::node::KEY_VALUE);
            }
            Self::DsaKeyValue(kv) => {
                w.start_element(ns::node::KEY_VALUE, &[]);
                w.start_element(ns::node::DSA_KEY_VALUE, &[]);
                w.text_element(ns::node::DSA_P, &[], &engine.encode(&kv.p));
                w.text_element(ns::node::DSA_Q, &[], &engine.encode(&kv.q));
                w.text_element(ns::node::DSA_G, &[], &engine.encode(&kv.g));
                w.text_element(ns::node::DSA_Y, &[], &engine.encode(&kv.y));
                w.end_element(ns::node::DSA_KEY_VALUE);
                w.end_element(ns::node::KEY_VALUE);
            }
            Self::X509Data(data) => {
                w.start_element(ns::node::X509_DATA, &[]);
                for is in &data.issuer_serials {
                    w.start_element(ns::node::X509_ISSUER_SERIAL, &[]);
                    w.text_element(ns::node::X509_ISSUER_NAME, &[], &is.issuer_name);
                    w.text_element(ns::node::X509_SERIAL_NUMBER, &[], &is.serial_number);
                    w.end_element(ns::node::X509_ISSUER_SERIAL);
                }
                for ski in &data.skis {
                    w.text_element(ns::node::X509_SKI, &[], &engine.encode(ski));
                }
                for name in &data.subject_names {
                    w.text_element(ns::node::X509_SUBJECT_NAME, &[], name);
                }
                for cert in &data.certificates {
                    w.text_element(ns::node::X509_CERTIFICATE, &[], &engine.encode(cert));
                }
                if let Some(crl) = &data.crl {
                    w.text_element(ns::node::X509_CRL, &[], &engine.encode(crl));
                }
                w.end_element(ns::node::X509_DATA);
            }
            Self::RetrievalMethod { uri, type_uri } => {
                let mut attrs = vec![(ns::attr::URI, uri.as_str())];
                if let Some(t) = type_uri {
                    attrs.push((ns::attr::TYPE, t.as_str()));
                }
                w.empty_element(ns::node::RETRIEVAL_METHOD, &attrs);
            }
            Self::EncryptedKey(xml) | Self::Generic(xml) => w.write_raw(xml),
        }
    }
}

/// An ordered list of key descriptors.
#[derive(Debug, Clone, Default)]
pub struct KeyInfo {
    id: Option<String>,
    clauses: Vec<KeyInfoClause>,
    cached_xml: Option<String>,
}

impl PartialEq for KeyInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.clauses == other.clauses
    }
}

impl KeyInfo {
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

    pub fn clauses(&self) -> &[KeyInfoClause] {
        &self.clauses
    }

    pub fn add_clause(&mut self, clause: KeyInfoClause) {
        self.clauses.push(clause);
        self.cached_xml = None;
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Parse a `<ds:KeyInfo>` element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        if !is_element_named(&node, ns::DSIG, ns::node::KEY_INFO) {
            return Err(Error::XmlStructure(format!(
                "expected KeyInfo, found {}",
                node.tag_name().name()
            )));
        }
        let clauses = node
            .children()
            .filter(|c| c.is_element())
            .map(KeyInfoClause::load_xml)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            clauses,
            cached_xml: Some(names::outer_xml_with_context(node)),
        })
    }

    /// Parse a standalone `<ds:KeyInfo>` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    /// Serialize to XML, declaring the dsig namespace as default on the root.
    pub fn get_xml(&self) -> String {
        if let Some(xml) = &self.cached_xml {
            return xml.clone();
        }
        let mut w = XmlWriter::new();
        let mut attrs = vec![("xmlns", ns::DSIG)];
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        w.start_element(ns::node::KEY_INFO, &attrs);
        for clause in &self.clauses {
            clause.write_xml(&mut w);
        }
        w.end_element(ns::node::KEY_INFO);
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

fn child_base64(parent: roxmltree::Node<'_, '_>, name: &str) -> Result<Vec<u8>> {
    let node = ulriksdal_xml::document::find_child_element(parent, ns::DSIG, name)
        .ok_or_else(|| Error::MissingElement(name.into()))?;
    decode_base64(&element_text(node), name)
}

fn parse_key_value(node: roxmltree::Node<'_, '_>) -> Result<KeyInfoClause> {
    let Some(inner) = node.children().find(|c| c.is_element()) else {
        return Err(Error::MissingElement("KeyValue content".into()));
    };
    if is_element_named(&inner, ns::DSIG, ns::node::RSA_KEY_VALUE) {
        parse_rsa_key_value(inner)
    } else if is_element_named(&inner, ns::DSIG, ns::node::DSA_KEY_VALUE) {
        parse_dsa_key_value(inner)
    } else {
        Ok(KeyInfoClause::Generic(names::outer_xml_with_context(node)))
    }
}

fn parse_rsa_key_value(node: roxmltree::Node<'_, '_>) -> Result<KeyInfoClause> {
    Ok(KeyInfoClause::RsaKeyValue(RsaKeyValue {
        modulus: child_base64(node, ns::node::RSA_MODULUS)?,
        exponent: child_base64(node, ns::node::RSA_EXPONENT)?,
    }))
}

fn parse_dsa_key_value(node: roxmltree::Node<'_, '_>) -> Result<KeyInfoClause> {
    Ok(KeyInfoClause::DsaKeyValue(DsaKeyValue {
        p: child_base64(node, ns::node::DSA_P)?,
        q: child_base64(node, ns::node::DSA_Q)?,
        g: child_base64(node, ns::node::DSA_G)?,
        y: child_base64(node, ns::node::DSA_Y)?,
    }))
}

fn parse_x509_data(node: roxmltree::Node<'_, '_>) -> Result<X509Data> {
    let mut data = X509Data::default();
    for child in node.children().filter(|c| c.is_element()) {
        if child.tag_name().namespace() != Some(ns::DSIG) {
            continue;
        }
        match child.tag_name().name() {
            ns::node::X509_CERTIFICATE => data
                .certificates
                .push(decode_base64(&element_text(child), "X509Certificate")?),
            ns::node::X509_SUBJECT_NAME => {
                data.subject_names.push(element_text(child).trim().to_owned())
            }
            ns::node::X509_SKI => data.skis.push(decode_base64(&element_text(child), "X509SKI")?),
            ns::node::X509_CRL => data.crl = Some(decode_base64(&element_text(child), "X509CRL")?),
            ns::node::X509_ISSUER_SERIAL => {
                let text_of = |name: &str| {
                    ulriksdal_xml::document::find_child_element(child, ns::DSIG, name)
                        .map(|n| element_text(n).trim().to_owned())
                        .ok_or_else(|| Error::MissingElement(name.into()))
                };
                data.issuer_serials.push(X509IssuerSerial {
                    issuer_name: text_of(ns::node::X509_ISSUER_NAME)?,
                    serial_number: text_of(ns::node::X509_SERIAL_NUMBER)?,
                });
            }
            _ => {}
        }
    }
    Ok(data)
}

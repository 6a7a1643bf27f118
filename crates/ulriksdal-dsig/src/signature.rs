#![forbid(unsafe_code)]

//! `<ds:Signature>` and `<ds:Object>`.

use base64::Engine;
use ulriksdal_core::{ns, Error, Result};
use ulriksdal_keys::KeyInfo;
use ulriksdal_xml::document::{element_text, find_child_element, find_child_elements, is_element_named};
use ulriksdal_xml::{names, XmlDocument, XmlWriter};

use crate::reference::decode_base64;
use crate::signed_info::SignedInfo;

/// An `<ds:Object>` carried inside the signature, typically the target of
/// an enveloping reference.
#[derive(Debug, Clone, Default)]
pub struct DataObject {
    id: Option<String>,
    mime_type: Option<String>,
    encoding: Option<String>,
    content: String,
    cached_xml: Option<String>,
}

impl PartialEq for DataObject {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.mime_type == other.mime_type
            && self.encoding == other.encoding
            && self.content == other.content
    }
}

impl DataObject {
    /// An object whose children are the XML fragment `content`.
    pub fn new(id: Option<String>, content: impl Into<String>) -> Self {
        Self {
            id,
            content: content.into(),
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

    pub fn mime_type(&self) -> Option<&str> {
        self.mime_type.as_deref()
    }

    pub fn set_mime_type(&mut self, mime_type: Option<String>) {
        self.mime_type = mime_type;
        self.cached_xml = None;
    }

    pub fn encoding(&self) -> Option<&str> {
        self.encoding.as_deref()
    }

    pub fn set_encoding(&mut self, encoding: Option<String>) {
        self.encoding = encoding;
        self.cached_xml = None;
    }

    /// Raw XML of the object's children.
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn set_content(&mut self, content: impl Into<String>) {
        self.content = content.into();
        self.cached_xml = None;
    }

    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        if !is_element_named(&node, ns::DSIG, ns::node::OBJECT) {
            return Err(Error::XmlStructure(format!(
                "expected Object, found {}",
                node.tag_name().name()
            )));
        }
        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            mime_type: node.attribute(ns::attr::MIME_TYPE).map(str::to_owned),
            encoding: node.attribute(ns::attr::ENCODING).map(str::to_owned),
            content: names::inner_xml(node),
            cached_xml: Some(names::outer_xml_with_context(node)),
        })
    }

    pub fn get_xml(&self) -> String {
        if let Some(xml) = &self.cached_xml {
            return xml.clone();
        }
        let mut w = XmlWriter::new();
        let mut attrs = vec![("xmlns", ns::DSIG)];
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        if let Some(m) = &self.mime_type {
            attrs.push((ns::attr::MIME_TYPE, m.as_str()));
        }
        if let Some(e) = &self.encoding {
            attrs.push((ns::attr::ENCODING, e.as_str()));
        }
        w.start_element(ns::node::OBJECT, &attrs);
        w.write_raw(&self.content);
        w.end_element(ns::node::OBJECT);
        w.into_string()
    }
}

/// The signature envelope.
#[derive(Debug, Clone, Default)]
pub struct Signature {
    id: Option<String>,
    signed_info: SignedInfo,
    signature_value: Vec<u8>,
    signature_value_id: Option<String>,
    key_info: Option<KeyInfo>,
    objects: Vec<DataObject>,
    cached_xml: Option<String>,
}

impl PartialEq for Signature {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.signed_info == other.signed_info
            && self.signature_value == other.signature_value
            && self.signature_value_id == other.signature_value_id
            && self.key_info == other.key_info
            && self.objects == other.objects
    }
}

impl Signature {
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

    pub fn signed_info(&self) -> &SignedInfo {
        &self.signed_info
    }

    pub fn signed_info_mut(&mut self) -> &mut SignedInfo {
        self.cached_xml = None;
        &mut self.signed_info
    }

    pub fn signature_value(&self) -> &[u8] {
        &self.signature_value
    }

    pub fn set_signature_value(&mut self, value: Vec<u8>) {
        self.signature_value = value;
        self.cached_xml = None;
    }

    pub fn signature_value_id(&self) -> Option<&str> {
        self.signature_value_id.as_deref()
    }

    pub fn set_signature_value_id(&mut self, id: Option<String>) {
        self.signature_value_id = id;
        self.cached_xml = None;
    }

    pub fn key_info(&self) -> Option<&KeyInfo> {
        self.key_info.as_ref()
    }

    pub fn set_key_info(&mut self, key_info: Option<KeyInfo>) {
        self.key_info = key_info;
        self.cached_xml = None;
    }

    pub fn objects(&self) -> &[DataObject] {
        &self.objects
    }

    pub fn add_object(&mut self, object: DataObject) {
        self.objects.push(object);
        self.cached_xml = None;
    }

    /// Whether the whole envelope is still the form loaded from a document.
    pub fn is_cached(&self) -> bool {
        self.cached_xml.is_some()
    }

    pub(crate) fn set_enveloped_position(&mut self, position: usize) {
        self.signed_info.set_enveloped_position(position);
    }

    /// Parse a `<ds:Signature>` element.
    pub fn load_xml(node: roxmltree::Node<'_, '_>) -> Result<Self> {
        if !is_element_named(&node, ns::DSIG, ns::node::SIGNATURE) {
            return Err(Error::XmlStructure(format!(
                "expected Signature, found {}",
                node.tag_name().name()
            )));
        }
        let signed_info = find_child_element(node, ns::DSIG, ns::node::SIGNED_INFO)
            .ok_or_else(|| Error::MissingElement("SignedInfo".into()))?;
        let value = find_child_element(node, ns::DSIG, ns::node::SIGNATURE_VALUE)
            .ok_or_else(|| Error::MissingElement("SignatureValue".into()))?;
        let key_info = find_child_element(node, ns::DSIG, ns::node::KEY_INFO)
            .map(KeyInfo::load_xml)
            .transpose()?;
        let objects = find_child_elements(node, ns::DSIG, ns::node::OBJECT)
            .into_iter()
            .map(DataObject::load_xml)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            id: node.attribute(ns::attr::ID).map(str::to_owned),
            signed_info: SignedInfo::load_xml(signed_info)?,
            signature_value: decode_base64(&element_text(value), "SignatureValue")?,
            signature_value_id: value.attribute(ns::attr::ID).map(str::to_owned),
            key_info,
            objects,
            cached_xml: Some(names::outer_xml_with_context(node)),
        })
    }

    /// Parse a standalone `<ds:Signature>` document.
    pub fn from_xml(xml: &str) -> Result<Self> {
        let doc = XmlDocument::parse(xml)?;
        let parsed = doc.parse_doc()?;
        Self::load_xml(parsed.root_element())
    }

    /// Serialize with the dsig namespace as default on the root.
    pub fn get_xml(&self) -> Result<String> {
        if let Some(xml) = &self.cached_xml {
            return Ok(xml.clone());
        }
        let mut w = XmlWriter::new();
        let mut attrs = vec![("xmlns", ns::DSIG)];
        if let Some(id) = &self.id {
            attrs.push((ns::attr::ID, id.as_str()));
        }
        w.start_element(ns::node::SIGNATURE, &attrs);
        w.write_raw(&self.signed_info.get_xml()?);
        let value = base64::engine::general_purpose::STANDARD.encode(&self.signature_value);
        match &self.signature_value_id {
            Some(id) => w.text_element(ns::node::SIGNATURE_VALUE, &[(ns::attr::ID, id.as_str())], &value),
            None => w.text_element(ns::node::SIGNATURE_VALUE, &[], &value),
        }
        if let Some(ki) = self.key_info.as_ref().filter(|ki| !ki.is_empty()) {
            w.write_raw(&ki.get_xml());
        }
        for o in &self.objects {
            w.write_raw(&o.get_xml());
        }
        w.end_element(ns::node::SIGNATURE);
        Ok(w.into_string())
    }
}

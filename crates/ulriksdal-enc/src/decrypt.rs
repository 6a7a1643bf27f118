#![forbid(unsafe_code)]

//! XML-Enc decryption.
//!
//! The key for an `EncryptedData` comes from its `KeyInfo`: a key name,
//! a `RetrievalMethod`, or a nested `EncryptedKey` that is itself
//! decrypted with keys from the manager. Indirections share one depth
//! bound, so a cycle ends in [`Error::RecursionLimit`].

use tracing::{debug, info};
use ulriksdal_core::{algorithm, ns, Error, ErrorKind, Result};
use ulriksdal_crypto::{cipher, keytransport, keywrap};
use ulriksdal_keys::{EncryptedKeyResolver, Key, KeyData, KeyResolver, KeyUsage};
use ulriksdal_transforms::{
    decrypt_document_with, uri, DocumentDecryptor, ReferenceUri, TransformContext,
};
use ulriksdal_xml::document::{find_by_id, is_element_named};
use ulriksdal_xml::XmlDocument;

use crate::encrypted_type::{EncryptedData, EncryptedKey, EncryptedType};
use crate::encrypted_xml::EncryptedXml;

impl EncryptedXml {
    /// The cipher octets of `encrypted`: the inline value, or the result of
    /// resolving its `CipherReference` against the bound document.
    pub fn get_cipher_value(&self, encrypted: &EncryptedType) -> Result<Vec<u8>> {
        self.cipher_value_in(self.document.as_ref(), encrypted)
    }

    /// The IV at the head of the cipher value, sized for `algorithm_uri`
    /// (the data's own `EncryptionMethod` when `None`).
    pub fn get_decryption_iv(&self, encrypted: &EncryptedData, algorithm_uri: Option<&str>) -> Result<Vec<u8>> {
        let uri = match algorithm_uri {
            Some(u) => u,
            None => encrypted.common.algorithm()?,
        };
        let size = cipher::iv_size(uri)?;
        let value = self.get_cipher_value(&encrypted.common)?;
        value
            .get(..size)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| Error::Decryption(format!("cipher value shorter than the {size} byte IV")))
    }

    /// The symmetric key described by `encrypted`'s `KeyInfo`, or `None`
    /// when it names nothing usable.
    pub fn get_decryption_key(&self, encrypted: &EncryptedData, algorithm_uri: Option<&str>) -> Result<Option<Key>> {
        self.decryption_key_in(self.document.as_ref(), encrypted, algorithm_uri)
    }

    /// Decrypt the key carried by `encrypted_key`. `None` when no held key
    /// fits, or when the key is addressed to a different recipient.
    pub fn decrypt_encrypted_key(&self, encrypted_key: &EncryptedKey) -> Result<Option<Vec<u8>>> {
        self.encrypted_key_in(self.document.as_ref(), encrypted_key, 0)
    }

    /// Decrypt the cipher value of `encrypted` with `key`. A key longer
    /// than the algorithm needs is cut to size.
    pub fn decrypt_data(&self, encrypted: &EncryptedData, key: &Key) -> Result<Vec<u8>> {
        self.decrypt_data_in(self.document.as_ref(), encrypted, key)
    }

    /// Replace the `EncryptedData` element `encrypted_data` of the bound
    /// document with `plaintext`.
    pub fn replace_data(&mut self, encrypted_data: roxmltree::NodeId, plaintext: &[u8]) -> Result<()> {
        let next = replace_in(self.require_document()?, encrypted_data, plaintext)?;
        self.document = Some(next);
        Ok(())
    }

    /// Decrypt every `EncryptedData` of the bound document in place,
    /// including ones exposed by earlier decryptions.
    pub fn decrypt_document(&mut self) -> Result<()> {
        let document = self.require_document()?.clone();
        let next = decrypt_document_with(&*self, document, &[])?;
        info!("decrypted document");
        self.document = Some(next);
        Ok(())
    }

    fn cipher_value_in(&self, document: Option<&XmlDocument>, encrypted: &EncryptedType) -> Result<Vec<u8>> {
        if let Some(value) = encrypted.cipher_data.cipher_value() {
            return Ok(value.to_vec());
        }
        let reference = encrypted
            .cipher_data
            .cipher_reference()
            .ok_or_else(|| Error::MissingElement("CipherValue or CipherReference".into()))?;
        if self.ctx.disable_cipher_reference {
            return Err(Error::XmlStructure(format!(
                "CipherReference resolution is disabled: {}",
                reference.uri
            )));
        }
        let document = document
            .ok_or_else(|| Error::XmlStructure("CipherReference needs a document".into()))?
            .clone();
        let input = match ReferenceUri::parse(Some(&reference.uri))? {
            ReferenceUri::WholeDocument => uri::whole_document(document, false)?,
            ReferenceUri::WholeDocumentWithComments => uri::whole_document(document, true)?,
            ReferenceUri::Id { id, with_comments } => {
                let node = {
                    let parsed = document.parse_doc()?;
                    let found = find_by_id(&parsed, &id, &self.ctx.id_attrs)?.ok_or_else(|| {
                        Error::InvalidUri(format!("CipherReference target '#{id}' not found"))
                    })?;
                    found.id()
                };
                uri::subtree(document, node, with_comments)?
            }
            ReferenceUri::Absent | ReferenceUri::External(_) => {
                return Err(Error::InvalidUri(format!(
                    "unsupported CipherReference URI: {}",
                    reference.uri
                )))
            }
        };
        debug!(uri = %reference.uri, transforms = reference.transforms.len(), "resolving CipherReference");
        reference
            .transforms
            .execute(input, &TransformContext::default())?
            .into_stream()
    }

    fn decryption_key_in(
        &self,
        document: Option<&XmlDocument>,
        encrypted: &EncryptedData,
        algorithm_uri: Option<&str>,
    ) -> Result<Option<Key>> {
        let uri = match algorithm_uri {
            Some(u) => u,
            None => encrypted.common.algorithm()?,
        };
        let Some(key_info) = &encrypted.common.key_info else {
            return Ok(None);
        };
        let keys = self.resolver(document, uri).resolve_key_info(key_info, 0)?;
        Ok(keys.into_iter().find(Key::is_symmetric))
    }

    fn encrypted_key_in(
        &self,
        document: Option<&XmlDocument>,
        encrypted_key: &EncryptedKey,
        depth: usize,
    ) -> Result<Option<Vec<u8>>> {
        if let Some(wanted) = &self.ctx.recipient {
            if encrypted_key.recipient.as_ref() != Some(wanted) {
                debug!(
                    recipient = ?encrypted_key.recipient,
                    "skipping EncryptedKey addressed to another recipient"
                );
                return Ok(None);
            }
        }
        let method = encrypted_key.common.algorithm()?;
        let wrapped = self.cipher_value_in(document, &encrypted_key.common)?;

        let mut candidates = match &encrypted_key.common.key_info {
            Some(ki) if !ki.is_empty() => self.resolver(document, method).resolve_key_info(ki, depth)?,
            _ => Vec::new(),
        };
        if !candidates.iter().any(|k| can_unwrap(k, method)) {
            candidates.extend(self.ctx.keys_manager.keys().cloned());
        }

        let mut failure = None;
        for key in candidates.iter().filter(|k| can_unwrap(k, method)) {
            match unwrap_with(method, &encrypted_key.common, key, &wrapped) {
                Ok(bytes) => {
                    debug!(method, key = ?key.name, "decrypted EncryptedKey");
                    return Ok(Some(bytes));
                }
                Err(e) if e.kind() == ErrorKind::Crypto => {
                    debug!(error = %e, "EncryptedKey did not decrypt with candidate key");
                    failure.get_or_insert(e);
                }
                Err(e) => return Err(e),
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(None),
        }
    }

    fn decrypt_data_in(&self, document: Option<&XmlDocument>, encrypted: &EncryptedData, key: &Key) -> Result<Vec<u8>> {
        let uri = encrypted.common.algorithm()?;
        let cipher = cipher::from_uri_with(uri, self.ctx.mode, self.ctx.padding)?;
        let bytes = key
            .symmetric_key_bytes()
            .ok_or_else(|| Error::Key("data decryption needs a symmetric key".into()))?;
        let bytes = bytes.get(..cipher.key_size()).unwrap_or(bytes);
        let value = self.cipher_value_in(document, &encrypted.common)?;
        cipher.decrypt(bytes, &value)
    }

    fn decrypt_encrypted_data_in(&self, document: &XmlDocument, node: roxmltree::NodeId) -> Result<XmlDocument> {
        let encrypted = {
            let parsed = document.parse_doc()?;
            let element = parsed
                .get_node(node)
                .ok_or_else(|| Error::XmlStructure(format!("{node:?} is not in the document")))?;
            EncryptedData::load_xml(element)?
        };
        let key = self
            .decryption_key_in(Some(document), &encrypted, None)?
            .ok_or_else(|| {
                Error::KeyNotFound(format!(
                    "no key to decrypt EncryptedData{}",
                    encrypted
                        .common
                        .id
                        .as_deref()
                        .map(|id| format!(" '{id}'"))
                        .unwrap_or_default()
                ))
            })?;
        let plaintext = self.decrypt_data_in(Some(document), &encrypted, &key)?;
        replace_in(document, node, &plaintext)
    }
}

impl DocumentDecryptor for EncryptedXml {
    fn decrypt_encrypted_data(
        &self,
        document: &XmlDocument,
        encrypted_data: roxmltree::NodeId,
    ) -> Result<XmlDocument> {
        self.decrypt_encrypted_data_in(document, encrypted_data)
    }
}

impl EncryptedKeyResolver for EncryptedXml {
    fn resolve_encrypted_key(
        &self,
        encrypted_key_xml: &str,
        resolver: &KeyResolver<'_>,
        depth: usize,
    ) -> Result<Option<Key>> {
        let encrypted_key = EncryptedKey::from_xml(encrypted_key_xml)?;
        let Some(bytes) = self.encrypted_key_in(resolver.document(), &encrypted_key, depth)? else {
            return Ok(None);
        };
        let key = match resolver.target_algorithm() {
            Some(uri) => Key::from_symmetric(uri, bytes)?,
            None => Key::new(KeyData::Hmac(bytes), KeyUsage::Any),
        };
        Ok(Some(match &encrypted_key.carried_key_name {
            Some(name) => key.with_name(name.clone()),
            None => key,
        }))
    }
}

fn can_unwrap(key: &Key, method: &str) -> bool {
    match method {
        algorithm::RSA_PKCS1 | algorithm::RSA_OAEP => key.rsa_private_key().is_some(),
        algorithm::KW_TRIPLEDES => matches!(key.data, KeyData::Des3(_)),
        algorithm::KW_AES128 | algorithm::KW_AES192 | algorithm::KW_AES256 => {
            matches!(&key.data, KeyData::Aes(k) if keywrap::aes_uri_for_kek(k.len()).ok() == Some(method))
        }
        _ => false,
    }
}

fn unwrap_with(method: &str, encrypted_key: &EncryptedType, key: &Key, wrapped: &[u8]) -> Result<Vec<u8>> {
    if keytransport::is_key_transport(method) {
        let oaep = encrypted_key
            .encryption_method
            .as_ref()
            .map(|m| m.oaep.clone())
            .unwrap_or_default();
        let private = key
            .rsa_private_key()
            .ok_or_else(|| Error::Key("key transport needs an RSA private key".into()))?;
        return keytransport::from_uri_with_params(method, oaep)?.decrypt(private, wrapped);
    }
    if keywrap::is_key_wrap(method) {
        let kek = key
            .symmetric_key_bytes()
            .ok_or_else(|| Error::Key("key unwrap needs a symmetric key".into()))?;
        return keywrap::from_uri(method)?.unwrap(kek, wrapped);
    }
    Err(Error::UnsupportedAlgorithm(format!("EncryptedKey method: {method}")))
}

/// `document` with the `EncryptedData` at `node` replaced by `plaintext`.
fn replace_in(document: &XmlDocument, node: roxmltree::NodeId, plaintext: &[u8]) -> Result<XmlDocument> {
    let text = std::str::from_utf8(plaintext)
        .map_err(|e| Error::Decryption(format!("plaintext is not UTF-8: {e}")))?;
    let text = strip_xml_declaration(text);
    let parsed = document.parse_doc()?;
    let element = parsed
        .get_node(node)
        .filter(|n| is_element_named(n, ns::ENC, ns::node::ENCRYPTED_DATA))
        .ok_or_else(|| Error::XmlStructure(format!("{node:?} is not an EncryptedData element")))?;
    document.splice(element.range(), text)
}

fn strip_xml_declaration(text: &str) -> &str {
    let trimmed = text.trim_start_matches('\u{feff}');
    match trimmed.strip_prefix("<?xml") {
        Some(rest) if rest.starts_with(|c: char| c.is_whitespace()) => rest
            .find("?>")
            .map(|end| rest[end + 2..].trim_start())
            .unwrap_or(trimmed),
        _ => trimmed,
    }
}

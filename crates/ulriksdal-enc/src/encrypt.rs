#![forbid(unsafe_code)]

//! XML-Enc encryption.
//!
//! `encrypt` turns one element (or its content) into an `EncryptedData`
//! under a fresh session key, and wraps that key for the recipient in a
//! nested `EncryptedKey`. `replace_element` then swaps the
//! `EncryptedData` into the document.

use rand::RngCore;
use tracing::debug;
use ulriksdal_core::{algorithm, ns, Error, Result};
use ulriksdal_crypto::{cipher, keytransport, keywrap};
use ulriksdal_keys::{loader, Key, KeyInfo, KeyInfoClause, X509Data};
use ulriksdal_xml::names;

use crate::cipher_data::CipherData;
use crate::encrypted_type::{EncryptedData, EncryptedKey, EncryptedType, EncryptionMethod};
use crate::encrypted_xml::{EncryptedXml, RecipientKey};

impl EncryptedXml {
    /// Encrypt `plaintext` under the symmetric `key` with the configured
    /// mode and padding. CBC output carries the IV in front.
    pub fn encrypt_data(&self, plaintext: &[u8], key: &Key) -> Result<Vec<u8>> {
        let uri = key.block_cipher_uri()?;
        let bytes = key
            .symmetric_key_bytes()
            .ok_or_else(|| Error::Key("data encryption needs a symmetric key".into()))?;
        let cipher = cipher::from_uri_with(uri, self.ctx.mode, self.ctx.padding)?;
        cipher.encrypt(bytes, plaintext)
    }

    /// Encrypt `key_data` for `kek`: RSA keys transport it (OAEP when
    /// `use_oaep`, PKCS#1 v1.5 otherwise), symmetric keys wrap it with the
    /// key wrap matching their type and size. Returns the algorithm used.
    pub fn encrypt_key(key_data: &[u8], kek: &Key, use_oaep: bool) -> Result<(&'static str, Vec<u8>)> {
        if let Some(public) = kek.rsa_public_key() {
            let uri = if use_oaep {
                algorithm::RSA_OAEP
            } else {
                algorithm::RSA_PKCS1
            };
            let wrapped = keytransport::from_uri(uri)?.encrypt(public, key_data)?;
            return Ok((uri, wrapped));
        }
        let uri = kek.key_wrap_uri()?;
        let bytes = kek
            .symmetric_key_bytes()
            .ok_or_else(|| Error::Key("key wrap needs a symmetric key".into()))?;
        Ok((uri, keywrap::from_uri(uri)?.wrap(bytes, key_data)?))
    }

    /// Encrypt `element` of the bound document for `recipient`.
    ///
    /// With `content` set only the element's children are encrypted and
    /// the result is typed `Content`; otherwise the whole element is, typed
    /// `Element`. The document itself is left untouched.
    pub fn encrypt(
        &self,
        element: roxmltree::NodeId,
        recipient: RecipientKey<'_>,
        content: bool,
    ) -> Result<EncryptedData> {
        let document = self.require_document()?;
        let plaintext = {
            let parsed = document.parse_doc()?;
            let node = parsed
                .get_node(element)
                .filter(|n| n.is_element())
                .ok_or_else(|| Error::XmlStructure(format!("{element:?} is not an element")))?;
            if content {
                names::inner_xml(node)
            } else {
                names::outer_xml_with_context(node)
            }
        };

        let session_uri = self.ctx.session_algorithm.as_str();
        let mut session_bytes = vec![0u8; cipher::key_size(session_uri)?];
        rand::thread_rng().fill_bytes(&mut session_bytes);
        let session = Key::from_symmetric(session_uri, session_bytes)?;
        let cipher_value = self.encrypt_data(plaintext.as_bytes(), &session)?;
        let session_bytes = session
            .symmetric_key_bytes()
            .ok_or_else(|| Error::Key("session key has no bytes".into()))?;

        let (key_uri, wrapped, key_info) = match recipient {
            RecipientKey::Certificate(der) => {
                let cert_key = loader::load_x509_cert_der(der)?;
                let public = cert_key
                    .rsa_public_key()
                    .ok_or_else(|| Error::Key("certificate does not carry an RSA key".into()))?;
                let wrapped = keytransport::from_uri(algorithm::RSA_PKCS1)?.encrypt(public, session_bytes)?;
                let mut ki = KeyInfo::new();
                ki.add_clause(KeyInfoClause::X509Data(X509Data {
                    certificates: vec![der.to_vec()],
                    ..X509Data::default()
                }));
                (algorithm::RSA_PKCS1, wrapped, ki)
            }
            RecipientKey::KeyName(name) => {
                let kek = self
                    .ctx
                    .keys_manager
                    .find_by_name(name)
                    .ok_or_else(|| Error::KeyNotFound(format!("no key named '{name}'")))?;
                let (uri, wrapped) = Self::encrypt_key(session_bytes, kek, false)?;
                let mut ki = KeyInfo::new();
                ki.add_clause(KeyInfoClause::KeyName(name.to_owned()));
                (uri, wrapped, ki)
            }
        };
        debug!(session = session_uri, key_transport = key_uri, content, "encrypting element");

        let encrypted_key = EncryptedKey {
            common: EncryptedType {
                encryption_method: Some(EncryptionMethod::new(key_uri)),
                key_info: Some(key_info),
                cipher_data: CipherData::with_value(wrapped),
                ..EncryptedType::default()
            },
            ..EncryptedKey::default()
        };
        let mut key_info = KeyInfo::new();
        key_info.add_clause(KeyInfoClause::EncryptedKey(encrypted_key.get_xml()?));

        let type_uri = if content {
            ns::ENC_TYPE_CONTENT
        } else {
            ns::ENC_TYPE_ELEMENT
        };
        Ok(EncryptedData {
            common: EncryptedType {
                type_uri: Some(type_uri.to_owned()),
                encryption_method: Some(EncryptionMethod::new(session_uri)),
                key_info: Some(key_info),
                cipher_data: CipherData::with_value(cipher_value),
                ..EncryptedType::default()
            },
        })
    }

    /// Put `encrypted` in place of `element` in the bound document, or in
    /// place of its children when `content` is set.
    pub fn replace_element(
        &mut self,
        element: roxmltree::NodeId,
        encrypted: &EncryptedData,
        content: bool,
    ) -> Result<()> {
        let xml = encrypted.get_xml()?;
        let document = self.require_document()?;
        let next = {
            let parsed = document.parse_doc()?;
            let node = parsed
                .get_node(element)
                .filter(|n| n.is_element())
                .ok_or_else(|| Error::XmlStructure(format!("{element:?} is not an element")))?;
            if !content {
                document.splice(node.range(), &xml)?
            } else {
                match (node.first_child(), node.last_child()) {
                    (Some(first), Some(last)) => {
                        document.splice(first.range().start..last.range().end, &xml)?
                    }
                    _ => document.append_child(element, &xml)?,
                }
            }
        };
        self.document = Some(next);
        Ok(())
    }
}

#![forbid(unsafe_code)]

//! `EncryptedXml`: the encryption engine bound to one document.
//!
//! Encryption lives in `encrypt.rs` and decryption in `decrypt.rs`; both
//! add methods to [`EncryptedXml`].

use ulriksdal_core::{Error, Result};
use ulriksdal_keys::{Key, KeyResolver};
use ulriksdal_xml::XmlDocument;

use crate::context::EncContext;

/// Who a session key is wrapped for by [`EncryptedXml::encrypt`].
#[derive(Debug, Clone, Copy)]
pub enum RecipientKey<'k> {
    /// DER certificate; the session key is transported under its RSA key.
    Certificate(&'k [u8]),
    /// A key registered under this name with the keys manager.
    KeyName(&'k str),
}

/// Encrypts elements of, and decrypts `EncryptedData` in, one document.
#[derive(Debug)]
pub struct EncryptedXml {
    pub(crate) ctx: EncContext,
    pub(crate) document: Option<XmlDocument>,
}

impl EncryptedXml {
    /// An engine with no document, for `encrypt_data` / `decrypt_data`
    /// and other standalone operations.
    pub fn new(ctx: EncContext) -> Self {
        Self { ctx, document: None }
    }

    pub fn with_document(ctx: EncContext, document: XmlDocument) -> Self {
        Self {
            ctx,
            document: Some(document),
        }
    }

    pub fn context(&self) -> &EncContext {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut EncContext {
        &mut self.ctx
    }

    pub fn document(&self) -> Option<&XmlDocument> {
        self.document.as_ref()
    }

    pub fn set_document(&mut self, document: XmlDocument) {
        self.document = Some(document);
    }

    pub fn into_document(self) -> Option<XmlDocument> {
        self.document
    }

    /// Register `key` under `name` for `KeyName` lookups.
    pub fn add_key_name_mapping(&mut self, name: impl Into<String>, key: Key) {
        self.ctx.keys_manager.add_named_key(name, key);
    }

    /// Drop every name registered with [`Self::add_key_name_mapping`].
    pub fn clear_key_name_mappings(&mut self) {
        self.ctx.keys_manager.clear_named_keys();
    }

    pub(crate) fn require_document(&self) -> Result<&XmlDocument> {
        self.document
            .as_ref()
            .ok_or_else(|| Error::XmlStructure("EncryptedXml has no document".into()))
    }

    /// A key resolver over this engine's keys, with nested `EncryptedKey`
    /// clauses routed back to this engine.
    pub(crate) fn resolver<'s>(
        &'s self,
        document: Option<&'s XmlDocument>,
        target_algorithm: &'s str,
    ) -> KeyResolver<'s> {
        let resolver = KeyResolver::new(&self.ctx.keys_manager)
            .with_id_attrs(&self.ctx.id_attrs)
            .with_encrypted_key_resolver(self)
            .with_target_algorithm(target_algorithm)
            .with_max_depth(self.ctx.max_recursion_depth);
        match document {
            Some(d) => resolver.with_document(d),
            None => resolver,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher_data::CipherData;
    use crate::encrypted_type::{EncryptedData, EncryptedKey, EncryptionMethod};
    use ulriksdal_c14n::{canonicalize_doc, C14nMode};
    use ulriksdal_core::{algorithm, ns};
    use ulriksdal_crypto::{CipherMode, PaddingMode};
    use ulriksdal_keys::{KeyData, KeyUsage, KeysManager};

    const DOC: &str = concat!(
        r#"<order xmlns:p="urn:pay"><item>book</item>"#,
        r#"<p:card Id="c"><p:number>4111</p:number><!--cvv--></p:card>"#,
        r#"<note/></order>"#
    );

    fn canonical(doc: &XmlDocument) -> Vec<u8> {
        let parsed = doc.parse_doc().unwrap();
        canonicalize_doc(&parsed, C14nMode::Inclusive, None, &[]).unwrap()
    }

    fn card(doc: &XmlDocument) -> roxmltree::NodeId {
        let parsed = doc.parse_doc().unwrap();
        let id = parsed
            .descendants()
            .find(|n| n.attribute("Id") == Some("c"))
            .unwrap()
            .id();
        id
    }

    fn rsa_key() -> Key {
        let pk = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        Key::new(
            KeyData::Rsa {
                public: pk.to_public_key(),
                private: Some(pk),
            },
            KeyUsage::Any,
        )
    }

    fn roundtrip(ctx: EncContext, recipient: &str, content: bool) {
        let original = XmlDocument::parse(DOC).unwrap();
        let mut ex = EncryptedXml::with_document(ctx, original.clone());
        let target = card(&original);
        let ed = ex.encrypt(target, RecipientKey::KeyName(recipient), content).unwrap();
        let expected_type = if content { ns::ENC_TYPE_CONTENT } else { ns::ENC_TYPE_ELEMENT };
        assert_eq!(ed.common.type_uri.as_deref(), Some(expected_type));

        ex.replace_element(target, &ed, content).unwrap();
        let encrypted = ex.document().unwrap().text().to_owned();
        assert!(!encrypted.contains("4111"));
        assert_eq!(encrypted.contains("<p:card"), content);

        ex.decrypt_document().unwrap();
        assert_eq!(canonical(ex.document().unwrap()), canonical(&original));
    }

    #[test]
    fn test_element_roundtrip_with_named_rsa_key() {
        let mut ctx = EncContext::default();
        ctx.keys_manager.add_named_key("rsa", rsa_key());
        roundtrip(ctx, "rsa", false);
    }

    #[test]
    fn test_content_roundtrip_with_aes_kek() {
        let mut ctx = EncContext::default();
        ctx.keys_manager
            .add_named_key("kek", Key::new(KeyData::Aes(vec![7; 32]), KeyUsage::Any));
        roundtrip(ctx, "kek", true);
    }

    #[test]
    fn test_triple_des_kek_with_ecb_pkcs7() {
        let mut ctx = EncContext::default();
        ctx.mode = CipherMode::Ecb;
        ctx.padding = PaddingMode::Pkcs7;
        ctx.session_algorithm = algorithm::AES128_CBC.into();
        ctx.keys_manager
            .add_named_key("des", Key::new(KeyData::Des3(vec![0x2A; 24]), KeyUsage::Any));
        roundtrip(ctx, "des", false);
    }

    #[test]
    fn test_unknown_key_name_is_key_error() {
        let doc = XmlDocument::parse(DOC).unwrap();
        let ex = EncryptedXml::with_document(EncContext::default(), doc.clone());
        let err = ex.encrypt(card(&doc), RecipientKey::KeyName("nobody"), false).unwrap_err();
        assert!(matches!(err, Error::KeyNotFound(_)));
    }

    #[test]
    fn test_missing_key_on_decrypt() {
        let mut ctx = EncContext::default();
        ctx.keys_manager.add_named_key("kek", Key::new(KeyData::Aes(vec![1; 16]), KeyUsage::Any));
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut ex = EncryptedXml::with_document(ctx, doc.clone());
        let ed = ex.encrypt(card(&doc), RecipientKey::KeyName("kek"), false).unwrap();
        ex.replace_element(card(&doc), &ed, false).unwrap();
        ex.clear_key_name_mappings();
        assert!(matches!(ex.decrypt_document(), Err(Error::KeyNotFound(_))));
    }

    #[test]
    fn test_data_roundtrip_and_iv() {
        let ex = EncryptedXml::new(EncContext::default());
        let key = Key::from_symmetric(algorithm::AES128_CBC, vec![1; 16]).unwrap();
        let value = ex.encrypt_data(b"hello", &key).unwrap();

        let mut ed = EncryptedData::new();
        ed.common.encryption_method = Some(EncryptionMethod::new(algorithm::AES128_CBC));
        ed.common.cipher_data = CipherData::with_value(value.clone());
        assert_eq!(ex.get_decryption_iv(&ed, None).unwrap(), value[..16].to_vec());
        assert_eq!(
            ex.get_decryption_iv(&ed, Some(algorithm::TRIPLEDES_CBC)).unwrap(),
            value[..8].to_vec()
        );
        assert_eq!(ex.decrypt_data(&ed, &key).unwrap(), b"hello");

        let wrong = Key::from_symmetric(algorithm::AES128_CBC, vec![2; 16]).unwrap();
        assert!(ex.decrypt_data(&ed, &wrong).map(|p| p != b"hello").unwrap_or(true));
    }

    #[test]
    fn test_longer_key_is_truncated_to_algorithm_size() {
        let ex = EncryptedXml::new(EncContext::default());
        let key = Key::from_symmetric(algorithm::AES128_CBC, vec![4; 16]).unwrap();
        let value = ex.encrypt_data(b"data", &key).unwrap();
        let mut ed = EncryptedData::new();
        ed.common.encryption_method = Some(EncryptionMethod::new(algorithm::AES128_CBC));
        ed.common.cipher_data = CipherData::with_value(value);
        let long = Key::new(KeyData::Aes(vec![4; 32]), KeyUsage::Any);
        assert_eq!(ex.decrypt_data(&ed, &long).unwrap(), b"data");
    }

    #[test]
    fn test_recipient_filter() {
        let kek = Key::new(KeyData::Aes(vec![3; 16]), KeyUsage::Any);
        let (uri, wrapped) = EncryptedXml::encrypt_key(&[5; 32], &kek, false).unwrap();
        assert_eq!(uri, algorithm::KW_AES128);
        let mut ek = EncryptedKey::new();
        ek.common.encryption_method = Some(EncryptionMethod::new(uri));
        ek.common.cipher_data = CipherData::with_value(wrapped);
        ek.recipient = Some("alice".into());

        let mut mgr = KeysManager::new();
        mgr.add_key(kek);
        let mut ctx = EncContext::new(mgr);
        ctx.recipient = Some("bob".into());
        let mut ex = EncryptedXml::new(ctx);
        assert_eq!(ex.decrypt_encrypted_key(&ek).unwrap(), None);

        ex.context_mut().recipient = Some("alice".into());
        assert_eq!(ex.decrypt_encrypted_key(&ek).unwrap(), Some(vec![5; 32]));
    }

    #[test]
    fn test_oaep_key_transport() {
        let rsa = rsa_key();
        let (uri, wrapped) = EncryptedXml::encrypt_key(&[8; 16], &rsa, true).unwrap();
        assert_eq!(uri, algorithm::RSA_OAEP);
        let mut ek = EncryptedKey::new();
        ek.common.encryption_method = Some(EncryptionMethod::new(uri));
        ek.common.cipher_data = CipherData::with_value(wrapped);
        let mut mgr = KeysManager::new();
        mgr.add_key(rsa);
        let ex = EncryptedXml::new(EncContext::new(mgr));
        assert_eq!(ex.decrypt_encrypted_key(&ek).unwrap(), Some(vec![8; 16]));
    }

    #[test]
    fn test_retrieval_method_cycle_hits_recursion_limit() {
        let xml = format!(
            concat!(
                r##"<root xmlns:ds="{dsig}"><ds:RetrievalMethod Id="loop" URI="#loop"/>"##,
                r#"<EncryptedData xmlns="{enc}"><EncryptionMethod Algorithm="{alg}"/>"#,
                r##"<ds:KeyInfo><ds:RetrievalMethod URI="#loop"/></ds:KeyInfo>"##,
                r#"<CipherData><CipherValue>AAAAAAAAAAAAAAAAAAAAAA==</CipherValue></CipherData>"#,
                r#"</EncryptedData></root>"#
            ),
            dsig = ns::DSIG,
            enc = ns::ENC,
            alg = algorithm::AES128_CBC
        );
        let mut ctx = EncContext::default();
        ctx.max_recursion_depth = 4;
        let mut ex = EncryptedXml::with_document(ctx, XmlDocument::parse(xml).unwrap());
        let err = ex.decrypt_document().unwrap_err();
        assert!(err.is_recursion_limit());
    }

    fn cipher_reference_doc(ex: &EncryptedXml, key: &Key, uri: &str) -> XmlDocument {
        use base64::Engine;
        let value = ex.encrypt_data(b"<secret>42</secret>", key).unwrap();
        let text = base64::engine::general_purpose::STANDARD.encode(value);
        let xml = format!(
            concat!(
                r#"<root><payload Id="cv">{text}</payload>"#,
                r#"<EncryptedData xmlns="{enc}" Type="{ty}"><EncryptionMethod Algorithm="{alg}"/>"#,
                r#"<KeyInfo xmlns="{dsig}"><KeyName>k</KeyName></KeyInfo>"#,
                r#"<CipherData><CipherReference URI="{uri}"><Transforms>"#,
                r#"<Transform xmlns="{dsig}" Algorithm="{b64}"/>"#,
                r#"</Transforms></CipherReference></CipherData></EncryptedData></root>"#
            ),
            text = text,
            enc = ns::ENC,
            ty = ns::ENC_TYPE_ELEMENT,
            alg = algorithm::AES128_CBC,
            dsig = ns::DSIG,
            uri = uri,
            b64 = algorithm::BASE64
        );
        XmlDocument::parse(xml).unwrap()
    }

    #[test]
    fn test_cipher_reference_with_base64_transform() {
        let key = Key::from_symmetric(algorithm::AES128_CBC, vec![9; 16]).unwrap();
        let mut ctx = EncContext::default();
        ctx.keys_manager.add_named_key("k", key.clone());
        let mut ex = EncryptedXml::new(ctx);
        let doc = cipher_reference_doc(&ex, &key, "#cv");
        ex.set_document(doc.clone());
        ex.decrypt_document().unwrap();
        let text = ex.document().unwrap().text();
        assert!(text.contains("<secret>42</secret>"));
        assert!(!text.contains("EncryptedData"));

        ex.set_document(doc);
        ex.context_mut().disable_cipher_reference = true;
        assert!(matches!(ex.decrypt_document(), Err(Error::XmlStructure(_))));
    }

    #[test]
    fn test_external_cipher_reference_rejected() {
        let key = Key::from_symmetric(algorithm::AES128_CBC, vec![9; 16]).unwrap();
        let mut ctx = EncContext::default();
        ctx.keys_manager.add_named_key("k", key.clone());
        let mut ex = EncryptedXml::new(ctx);
        let doc = cipher_reference_doc(&ex, &key, "http://example.com/cipher");
        ex.set_document(doc);
        assert!(matches!(ex.decrypt_document(), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_non_utf8_plaintext_rejected() {
        let mut ex = EncryptedXml::new(EncContext::default());
        let node = {
            let xml = format!(
                r#"<root><EncryptedData xmlns="{}"><CipherData><CipherValue>AA==</CipherValue></CipherData></EncryptedData></root>"#,
                ns::ENC
            );
            ex.set_document(XmlDocument::parse(xml).unwrap());
            let parsed = ex.document().unwrap().parse_doc().unwrap();
            let id = parsed.root_element().first_child().unwrap().id();
            id
        };
        assert!(matches!(ex.replace_data(node, &[0xFF, 0xFE]), Err(Error::Decryption(_))));
    }
}

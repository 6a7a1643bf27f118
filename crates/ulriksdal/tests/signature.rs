//! Signing and verification across the workspace crates.

use tracing_subscriber::EnvFilter;
use ulriksdal::core::{algorithm, ns};
use ulriksdal::dsig::{find_signatures, DsigContext, Reference, SignedXml, VerifyFailure, VerifyResult};
use ulriksdal::enc::{CipherData, EncContext, EncryptedKey, EncryptedType, EncryptedXml, EncryptionMethod};
use ulriksdal::keys::{loader, Key, KeyData, KeyInfo, KeyInfoClause, KeyUsage, KeysManager};
use ulriksdal::transforms::Transform;
use ulriksdal::xml::XmlDocument;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn rsa_pair() -> (Key, Key) {
    let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
    let public = private.to_public_key();
    let signer = Key::new(
        KeyData::Rsa {
            private: Some(private),
            public: public.clone(),
        },
        KeyUsage::Any,
    );
    let verifier = Key::new(KeyData::Rsa { private: None, public }, KeyUsage::Any);
    (signer, verifier)
}

fn id_reference() -> Reference {
    let mut r = Reference::with_uri("#x");
    r.set_digest_method(algorithm::SHA256);
    r.add_transform(Transform::EnvelopedSignature { position: 0 });
    r.add_transform(Transform::ExcC14n {
        with_comments: false,
        inclusive_prefixes: vec![],
    });
    r
}

fn verify(ctx: DsigContext<'_>, text: &str) -> VerifyResult {
    let document = XmlDocument::parse(text).unwrap();
    let node = find_signatures(&document).unwrap()[0];
    let mut signed = SignedXml::new(ctx);
    signed.load_xml(document, node).unwrap();
    signed.check_signature().unwrap()
}

fn manager_with(key: Key) -> KeysManager {
    let mut keys = KeysManager::new();
    keys.add_key(key);
    keys
}

#[test]
fn rsa_sha256_enveloped_survives_serialization() {
    init_tracing();
    let (signer, verifier) = rsa_pair();
    let document = XmlDocument::parse(r#"<root Id="x">hello</root>"#).unwrap();
    let mut signed = SignedXml::with_document(DsigContext::default(), document);
    signed.signed_info_mut().set_canonicalization_method(algorithm::EXC_C14N);
    signed.signed_info_mut().set_signature_method(algorithm::RSA_SHA256);
    signed.add_reference(id_reference());
    signed.set_signing_key(signer);
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();

    let ctx = DsigContext::new(manager_with(verifier.clone()));
    assert_eq!(verify(ctx, &text), VerifyResult::Valid);

    let tampered = text.replace(">hello<", ">hell0<");
    let ctx = DsigContext::new(manager_with(verifier));
    assert_eq!(
        verify(ctx, &tampered),
        VerifyResult::Invalid(VerifyFailure::DigestMismatch { uri: Some("#x".into()) })
    );
}

#[test]
fn altered_signature_value_is_mismatch() {
    init_tracing();
    let (signer, verifier) = rsa_pair();
    let document = XmlDocument::parse(r#"<root Id="x">hello</root>"#).unwrap();
    let mut signed = SignedXml::with_document(DsigContext::default(), document);
    signed.add_reference(id_reference());
    signed.set_signing_key(signer);
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();

    let start = text.find("<SignatureValue>").unwrap() + "<SignatureValue>".len();
    let first = &text[start..start + 1];
    let flipped = if first == "A" { "B" } else { "A" };
    let tampered = format!("{}{}{}", &text[..start], flipped, &text[start + 1..]);
    let ctx = DsigContext::new(manager_with(verifier));
    assert_eq!(
        verify(ctx, &tampered),
        VerifyResult::Invalid(VerifyFailure::SignatureMismatch)
    );
}

#[test]
fn format_validator_can_veto() {
    init_tracing();
    let document = XmlDocument::parse(r#"<root Id="x">hello</root>"#).unwrap();
    let mut ctx = DsigContext::default();
    ctx.keys_manager.add_key(loader::load_hmac_key(b"secret"));
    let mut signed = SignedXml::with_document(ctx, document);
    signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
    signed.add_reference(id_reference());
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();

    let mut ctx = DsigContext::new(manager_with(loader::load_hmac_key(b"secret")));
    ctx.set_format_validator(|si| si.references().len() > 1);
    assert_eq!(verify(ctx, &text), VerifyResult::Invalid(VerifyFailure::FormatRejected));
}

#[test]
fn retrieval_method_cycle_hits_recursion_limit() {
    init_tracing();
    let source = format!(
        r##"<root Id="x"><ds:RetrievalMethod xmlns:ds="{}" Id="loop" URI="#loop"/></root>"##,
        ns::DSIG
    );
    let mut ctx = DsigContext::default();
    ctx.keys_manager.add_key(loader::load_hmac_key(b"secret"));
    let mut signed = SignedXml::with_document(ctx, XmlDocument::parse(source).unwrap());
    signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
    signed.add_reference(id_reference());
    let mut key_info = KeyInfo::new();
    key_info.add_clause(KeyInfoClause::RetrievalMethod {
        uri: "#loop".into(),
        type_uri: None,
    });
    signed.set_key_info(Some(key_info));
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();

    let mut ctx = DsigContext::new(manager_with(loader::load_hmac_key(b"secret")));
    ctx.max_recursion_depth = 5;
    assert_eq!(verify(ctx, &text), VerifyResult::Invalid(VerifyFailure::RecursionLimit));
}

#[test]
fn hmac_key_carried_in_encrypted_key() {
    init_tracing();
    let (kek_private, kek_public) = rsa_pair();
    let secret = b"a shared mac secret";
    let (uri, wrapped) = EncryptedXml::encrypt_key(secret, &kek_public, true).unwrap();
    let mut ek_key_info = KeyInfo::new();
    ek_key_info.add_clause(KeyInfoClause::KeyName("transport".into()));
    let encrypted_key = EncryptedKey {
        common: EncryptedType {
            encryption_method: Some(EncryptionMethod::new(uri)),
            key_info: Some(ek_key_info),
            cipher_data: CipherData::with_value(wrapped),
            ..EncryptedType::default()
        },
        ..EncryptedKey::default()
    };

    let document = XmlDocument::parse(r#"<root Id="x">hello</root>"#).unwrap();
    let mut signed = SignedXml::with_document(DsigContext::default(), document);
    signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
    signed.add_reference(id_reference());
    signed.set_signing_key(loader::load_hmac_key(secret));
    let mut key_info = KeyInfo::new();
    key_info.add_clause(KeyInfoClause::EncryptedKey(encrypted_key.get_xml().unwrap()));
    signed.set_key_info(Some(key_info));
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();

    let mut enc = EncryptedXml::new(EncContext::default());
    enc.add_key_name_mapping("transport", kek_private);
    let mut ctx = DsigContext::default();
    ctx.set_encrypted_key_resolver(&enc);
    assert_eq!(verify(ctx, &text), VerifyResult::Valid);
}

#[test]
fn decryption_transform_signs_the_plaintext() {
    init_tracing();
    let mut enc = EncryptedXml::with_document(
        EncContext::default(),
        XmlDocument::parse("<root><card>4111</card><note>public</note></root>").unwrap(),
    );
    enc.add_key_name_mapping("k", loader::load_aes_key(&[7u8; 16]).unwrap());
    let card = {
        let parsed = enc.document().unwrap().parse_doc().unwrap();
        parsed
            .descendants()
            .find(|n| n.has_tag_name("card"))
            .unwrap()
            .id()
    };
    let encrypted = enc
        .encrypt(card, ulriksdal::enc::RecipientKey::KeyName("k"), false)
        .unwrap();
    enc.replace_element(card, &encrypted, false).unwrap();
    let protected = enc.document().unwrap().clone();
    assert!(!protected.text().contains("4111"));

    let mut reference = Reference::with_uri("");
    reference.set_digest_method(algorithm::SHA256);
    reference.add_transform(Transform::Decryption { except: vec![] });
    reference.add_transform(Transform::EnvelopedSignature { position: 0 });
    reference.add_transform(Transform::ExcC14n {
        with_comments: false,
        inclusive_prefixes: vec![],
    });

    let mut ctx = DsigContext::new(manager_with(loader::load_hmac_key(b"secret")));
    ctx.set_decryptor(&enc);
    let mut signed = SignedXml::with_document(ctx, protected);
    signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
    signed.add_reference(reference);
    signed.compute_signature().unwrap();
    let text = signed.signed_document().unwrap().text().to_owned();
    assert!(!text.contains("4111"));

    let mut ctx = DsigContext::new(manager_with(loader::load_hmac_key(b"secret")));
    ctx.set_decryptor(&enc);
    assert_eq!(verify(ctx, &text), VerifyResult::Valid);

    let tampered = text.replace(">public<", ">private<");
    let mut ctx = DsigContext::new(manager_with(loader::load_hmac_key(b"secret")));
    ctx.set_decryptor(&enc);
    assert!(matches!(
        verify(ctx, &tampered),
        VerifyResult::Invalid(VerifyFailure::DigestMismatch { .. })
    ));
}

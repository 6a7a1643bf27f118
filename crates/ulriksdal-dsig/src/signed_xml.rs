#![forbid(unsafe_code)]

//! Signing and verifying a [`Signature`] against its document.
//!
//! A [`SignedXml`] owns the signature model and, optionally, the document
//! the signature lives in (or will be inserted into). Verification runs in
//! a fixed order: the format gate, the signature value, the transform
//! policy, then every reference digest. The first failing step decides the
//! [`VerifyFailure`].

use std::collections::BTreeMap;

use roxmltree::NodeId;
use tracing::{debug, warn};
use ulriksdal_core::{algorithm, ns, Error, ErrorKind, Result};
use ulriksdal_crypto::digest::DigestWriter;
use ulriksdal_crypto::sign;
use ulriksdal_keys::x509::{self, CertValidationConfig};
use ulriksdal_keys::{loader, Key, KeyData, KeyInfo, KeyResolver};
use ulriksdal_transforms::{uri, ReferenceUri, TransformContext, TransformData};
use ulriksdal_xml::document::find_by_id;
use ulriksdal_xml::{names, XmlDocument};

use crate::context::DsigContext;
use crate::reference::Reference;
use crate::signature::{DataObject, Signature};
use crate::signed_info::SignedInfo;

/// Why a signature did not verify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyFailure {
    /// The format validator refused the `SignedInfo`.
    FormatRejected,
    /// No candidate key reproduced the signature value.
    SignatureMismatch,
    /// A reference uses a transform outside the context's safe set.
    DisallowedTransform { uri: String },
    /// A reference digest does not match its content.
    DigestMismatch { uri: Option<String> },
    /// Key resolution nested deeper than the context allows.
    RecursionLimit,
    /// No key compatible with the signature method was found.
    NoUsableKey,
    /// The supplied certificate failed the key usage or chain checks.
    UntrustedCertificate,
}

impl std::fmt::Display for VerifyFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FormatRejected => write!(f, "signature format rejected"),
            Self::SignatureMismatch => write!(f, "signature value mismatch"),
            Self::DisallowedTransform { uri } => write!(f, "transform not allowed: {uri}"),
            Self::DigestMismatch { uri: Some(uri) } => write!(f, "digest mismatch for '{uri}'"),
            Self::DigestMismatch { uri: None } => write!(f, "digest mismatch for detached content"),
            Self::RecursionLimit => write!(f, "key resolution recursion limit reached"),
            Self::NoUsableKey => write!(f, "no usable key"),
            Self::UntrustedCertificate => write!(f, "certificate not trusted"),
        }
    }
}

/// Outcome of a signature check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid,
    Invalid(VerifyFailure),
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid)
    }

    pub fn failure(&self) -> Option<&VerifyFailure> {
        match self {
            VerifyResult::Valid => None,
            VerifyResult::Invalid(f) => Some(f),
        }
    }
}

/// Node ids of every `ds:Signature` element, in document order.
pub fn find_signatures(document: &XmlDocument) -> Result<Vec<NodeId>> {
    let doc = document.parse_doc()?;
    Ok(XmlDocument::find_elements(&doc, ns::DSIG, ns::node::SIGNATURE)
        .into_iter()
        .map(|n| n.id())
        .collect())
}

/// Whether `signed_info` declares an HMAC output shorter than the hash.
pub fn uses_truncated_hmac(signed_info: &SignedInfo) -> bool {
    let native = signed_info.signature_method().and_then(sign::hmac_native_bits);
    match (native, signed_info.signature_length()) {
        (Some(native), Some(bits)) => bits < native,
        _ => false,
    }
}

/// A signature together with the document it signs.
pub struct SignedXml<'a> {
    ctx: DsigContext<'a>,
    document: Option<XmlDocument>,
    signature: Signature,
    signature_node: Option<NodeId>,
    signing_key: Option<Key>,
    detached_content: Option<Vec<u8>>,
}

impl<'a> SignedXml<'a> {
    /// An empty signature with no document, for enveloping or detached use.
    pub fn new(ctx: DsigContext<'a>) -> Self {
        Self {
            ctx,
            document: None,
            signature: Signature::new(),
            signature_node: None,
            signing_key: None,
            detached_content: None,
        }
    }

    /// An empty signature over `document`.
    pub fn with_document(ctx: DsigContext<'a>, document: XmlDocument) -> Self {
        Self {
            document: Some(document),
            ..Self::new(ctx)
        }
    }

    pub fn context(&self) -> &DsigContext<'a> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut DsigContext<'a> {
        &mut self.ctx
    }

    pub fn document(&self) -> Option<&XmlDocument> {
        self.document.as_ref()
    }

    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    pub fn signature_mut(&mut self) -> &mut Signature {
        &mut self.signature
    }

    pub fn signed_info(&self) -> &SignedInfo {
        self.signature.signed_info()
    }

    pub fn signed_info_mut(&mut self) -> &mut SignedInfo {
        self.signature.signed_info_mut()
    }

    /// Node id of the loaded `ds:Signature` within the document.
    pub fn signature_node(&self) -> Option<NodeId> {
        self.signature_node
    }

    pub fn add_reference(&mut self, reference: Reference) {
        self.signature.signed_info_mut().add_reference(reference);
    }

    pub fn add_object(&mut self, object: DataObject) {
        self.signature.add_object(object);
    }

    pub fn set_key_info(&mut self, key_info: Option<KeyInfo>) {
        self.signature.set_key_info(key_info);
    }

    /// Key used by [`SignedXml::compute_signature`]. Without one, the first
    /// suitable key of the keys manager signs.
    pub fn set_signing_key(&mut self, key: Key) {
        self.signing_key = Some(key);
    }

    /// Content of references that carry no URI.
    pub fn set_detached_content(&mut self, content: impl Into<Vec<u8>>) {
        self.detached_content = Some(content.into());
    }

    /// Load the `ds:Signature` at `signature` from `document`, which also
    /// becomes the document references resolve against.
    pub fn load_xml(&mut self, document: XmlDocument, signature: NodeId) -> Result<()> {
        let (mut loaded, position) = {
            let doc = document.parse_doc()?;
            let node = doc
                .get_node(signature)
                .ok_or_else(|| Error::XmlStructure(format!("node {signature:?} is not in the document")))?;
            let loaded = Signature::load_xml(node)?;
            let position = XmlDocument::find_elements(&doc, ns::DSIG, ns::node::SIGNATURE)
                .iter()
                .position(|n| n.id() == signature)
                .map_or(0, |p| p + 1);
            (loaded, position)
        };
        loaded.set_enveloped_position(position);
        debug!(position, references = loaded.signed_info().references().len(), "loaded signature");
        self.signature = loaded;
        self.signature_node = Some(signature);
        self.document = Some(document);
        Ok(())
    }

    /// Load a standalone `ds:Signature`, keeping the current document (if
    /// any) as the target of its references.
    pub fn load_signature_xml(&mut self, xml: &str) -> Result<()> {
        self.signature = Signature::from_xml(xml)?;
        self.signature_node = None;
        Ok(())
    }

    /// The `ds:Signature` element as text.
    pub fn get_xml(&self) -> Result<String> {
        self.signature.get_xml()
    }

    /// The document with the signature in place: replacing the loaded
    /// signature element, or appended as the last child of the root.
    pub fn signed_document(&self) -> Result<XmlDocument> {
        let document = self.require_document()?;
        let xml = self.signature.get_xml()?;
        match self.signature_node {
            Some(node) => {
                let range = {
                    let doc = document.parse_doc()?;
                    doc.get_node(node)
                        .ok_or_else(|| Error::XmlStructure(format!("node {node:?} is not in the document")))?
                        .range()
                };
                document.splice(range, &xml)
            }
            None => {
                let root = document.parse_doc()?.root_element().id();
                document.append_child(root, &xml)
            }
        }
    }

    /// Digest every reference and sign the `SignedInfo`.
    ///
    /// References that point at another reference are digested after it.
    /// Without an explicit signature method, one matching the key is chosen.
    pub fn compute_signature(&mut self) -> Result<()> {
        if self.signature.signed_info().references().is_empty() {
            return Err(Error::MissingElement("Reference".into()));
        }
        let key = self.signing_key_for_compute()?;
        let method = match self.signature.signed_info().signature_method() {
            Some(m) => m.to_owned(),
            None => {
                let m = default_signature_method(&key)?;
                self.signature.signed_info_mut().set_signature_method(m);
                m.to_owned()
            }
        };

        let levels = reference_levels(self.signature.signed_info().references())?;
        let mut order: Vec<usize> = (0..levels.len()).collect();
        order.sort_by_key(|&i| levels[i]);
        for i in order {
            let digest = self.digest_reference(&self.signature.signed_info().references()[i])?;
            self.signature.signed_info_mut().references_mut()[i].set_digest_value(digest);
        }

        let octets = self.signed_info_octets()?;
        let alg = sign::from_uri(&method)?;
        let signing_key = key
            .to_signing_key()
            .ok_or_else(|| Error::Key("key cannot sign".into()))?;
        let mut value = alg.sign(&signing_key, &octets)?;
        if algorithm::is_hmac(&method) {
            if let Some(bits) = self.signature.signed_info().signature_length() {
                value = sign::truncate_mac(value, bits)?;
            }
        }
        debug!(method = %method, len = value.len(), "computed signature value");
        self.signature.set_signature_value(value);
        Ok(())
    }

    /// Check the signature with keys from its `KeyInfo`, or every key of the
    /// keys manager when it has none.
    pub fn check_signature(&self) -> Result<VerifyResult> {
        Ok(self.check_signature_returning_key()?.0)
    }

    /// As [`SignedXml::check_signature`], also returning the key that verified.
    pub fn check_signature_returning_key(&self) -> Result<(VerifyResult, Option<Key>)> {
        let candidates = match self.candidate_keys() {
            Ok(keys) => keys,
            Err(e) if e.is_recursion_limit() => {
                warn!(error = %e, "key resolution aborted");
                return Ok((VerifyResult::Invalid(VerifyFailure::RecursionLimit), None));
            }
            Err(e) => return Err(e),
        };
        let candidates = candidates.into_iter().filter(may_sign).collect();
        self.check_with(candidates)
    }

    /// Check the signature with exactly `key`.
    pub fn check_signature_with_key(&self, key: &Key) -> Result<VerifyResult> {
        Ok(self.check_with(vec![key.clone()])?.0)
    }

    /// Check the signature with the key of a DER certificate. Unless
    /// `verify_signature_only` is set, the certificate must allow signing
    /// and chain to a trusted certificate of the keys manager.
    pub fn check_signature_with_certificate(
        &self,
        cert_der: &[u8],
        verify_signature_only: bool,
    ) -> Result<VerifyResult> {
        let key = loader::load_x509_cert_der(cert_der)?;
        if !verify_signature_only {
            if !x509::has_signing_key_usage(cert_der)? {
                warn!("certificate key usage does not allow signing");
                return Ok(VerifyResult::Invalid(VerifyFailure::UntrustedCertificate));
            }
            let manager = &self.ctx.keys_manager;
            let config = CertValidationConfig {
                untrusted_certs: manager.untrusted_certs(),
                ..CertValidationConfig::new(manager.trusted_certs())
            };
            if let Err(e) = x509::validate_cert_chain(cert_der, &[], &config) {
                warn!(error = %e, "certificate chain rejected");
                return Ok(VerifyResult::Invalid(VerifyFailure::UntrustedCertificate));
            }
        }
        self.check_signature_with_key(&key)
    }

    fn check_with(&self, candidates: Vec<Key>) -> Result<(VerifyResult, Option<Key>)> {
        match self.check_steps(candidates) {
            Err(e) if e.is_recursion_limit() => {
                warn!(error = %e, "verification aborted");
                Ok((VerifyResult::Invalid(VerifyFailure::RecursionLimit), None))
            }
            other => other,
        }
    }

    fn check_steps(&self, candidates: Vec<Key>) -> Result<(VerifyResult, Option<Key>)> {
        let invalid = |f: VerifyFailure| -> Result<(VerifyResult, Option<Key>)> {
            Ok((VerifyResult::Invalid(f), None))
        };
        let signed_info = self.signature.signed_info();

        if !self.check_signature_format() {
            warn!(
                c14n = signed_info.canonicalization_method(),
                method = signed_info.signature_method(),
                "signature format rejected"
            );
            return invalid(VerifyFailure::FormatRejected);
        }

        let method = signed_info
            .signature_method()
            .ok_or_else(|| Error::MissingElement("SignatureMethod".into()))?;
        let compatible: Vec<Key> = candidates
            .into_iter()
            .filter(|k| can_verify(k, method))
            .collect();
        if compatible.is_empty() {
            warn!(method, "no key compatible with the signature method");
            return invalid(VerifyFailure::NoUsableKey);
        }

        let octets = self.signed_info_octets()?;
        let mut verified = None;
        for key in compatible {
            if self.verify_value(method, &octets, &key)? {
                verified = Some(key);
                break;
            }
        }
        let Some(key) = verified else {
            warn!(method, "signature value mismatch");
            return invalid(VerifyFailure::SignatureMismatch);
        };

        for r in signed_info.references() {
            if let Some(t) = r
                .transform_chain()
                .transforms()
                .iter()
                .find(|t| !self.ctx.is_safe_transform(t.uri()))
            {
                warn!(transform = t.uri(), "reference uses a transform outside the safe set");
                return invalid(VerifyFailure::DisallowedTransform { uri: t.uri().to_owned() });
            }
        }

        for r in signed_info.references() {
            let digest = self.digest_reference(r)?;
            if !sign::constant_time_eq(&digest, r.digest_value()) {
                warn!(uri = r.uri(), "digest mismatch");
                return invalid(VerifyFailure::DigestMismatch {
                    uri: r.uri().map(str::to_owned),
                });
            }
        }

        debug!(key = ?key.name, "signature verified");
        Ok((VerifyResult::Valid, Some(key)))
    }

    /// The format gate: the context's validator if set, otherwise refuse
    /// truncated HMACs and canonicalization methods outside the safe list.
    fn check_signature_format(&self) -> bool {
        let signed_info = self.signature.signed_info();
        if let Some(validator) = self.ctx.format_validator() {
            return validator(signed_info);
        }
        !uses_truncated_hmac(signed_info)
            && self
                .ctx
                .is_safe_canonicalization_method(signed_info.canonicalization_method())
    }

    fn verify_value(&self, method: &str, octets: &[u8], key: &Key) -> Result<bool> {
        let alg = sign::from_uri(method)?;
        let Some(signing_key) = key.to_signing_key() else {
            return Ok(false);
        };
        let expected = self.signature.signature_value();
        if algorithm::is_hmac(method) {
            let mut mac = alg.sign(&signing_key, octets)?;
            if let Some(bits) = self.signature.signed_info().signature_length() {
                mac = sign::truncate_mac(mac, bits)?;
            }
            return Ok(sign::constant_time_eq(&mac, expected));
        }
        match alg.verify(&signing_key, octets, expected) {
            Ok(valid) => Ok(valid),
            Err(e) if e.kind() == ErrorKind::Crypto => {
                debug!(error = %e, "key failed to verify");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    fn candidate_keys(&self) -> Result<Vec<Key>> {
        let Some(key_info) = self.signature.key_info().filter(|ki| !ki.is_empty()) else {
            return Ok(self.ctx.keys_manager.keys().cloned().collect());
        };
        let mut resolver = KeyResolver::new(&self.ctx.keys_manager)
            .with_id_attrs(&self.ctx.id_attrs)
            .with_max_depth(self.ctx.max_recursion_depth);
        if let Some(document) = &self.document {
            resolver = resolver.with_document(document);
        }
        if let Some(r) = self.ctx.encrypted_key_resolver() {
            resolver = resolver.with_encrypted_key_resolver(r);
        }
        if let Some(hook) = self.ctx.id_element_hook() {
            resolver = resolver.with_id_lookup(&**hook);
        }
        resolver.resolve_all(key_info)
    }

    fn signing_key_for_compute(&self) -> Result<Key> {
        if let Some(key) = &self.signing_key {
            return Ok(key.clone());
        }
        let method = self.signature.signed_info().signature_method();
        self.ctx
            .keys_manager
            .keys()
            .find(|k| match method {
                Some(m) => can_sign(k, m),
                None => default_signature_method(k).is_ok(),
            })
            .cloned()
            .ok_or_else(|| Error::KeyNotFound("no key able to sign".into()))
    }

    /// Namespaces the signature inherits where it sits (or will sit).
    fn context_namespaces(&self) -> Result<BTreeMap<String, String>> {
        let Some(document) = &self.document else {
            return Ok(BTreeMap::new());
        };
        let doc = document.parse_doc()?;
        let scope = match self.signature_node.and_then(|id| doc.get_node(id)) {
            Some(node) => node.parent().filter(|p| p.is_element()),
            None => Some(doc.root_element()),
        };
        Ok(scope.map(names::in_scope_namespaces).unwrap_or_default())
    }

    /// Canonical `SignedInfo`, the input of the signature value.
    ///
    /// A loaded `SignedInfo` already carries its inherited namespaces; a
    /// built one receives those of the place the signature goes.
    fn signed_info_octets(&self) -> Result<Vec<u8>> {
        let signed_info = self.signature.signed_info();
        let mut xml = signed_info.get_xml()?;
        if !signed_info.is_cached() {
            xml = names::propagate_namespaces(&xml, &self.context_namespaces()?)?;
        }
        let document = XmlDocument::parse(xml)?;
        let doc = document.parse_doc()?;
        ulriksdal_c14n::canonicalize_doc(
            &doc,
            signed_info.c14n_mode()?,
            None,
            signed_info.inclusive_prefixes(),
        )
    }

    /// The signature as a document of its own, for `#id` references to its
    /// objects or references.
    fn standalone_signature(&self) -> Result<XmlDocument> {
        let mut xml = self.signature.get_xml()?;
        if !self.signature.is_cached() {
            xml = names::propagate_namespaces(&xml, &self.context_namespaces()?)?;
        }
        XmlDocument::parse(xml)
    }

    fn require_document(&self) -> Result<&XmlDocument> {
        self.document
            .as_ref()
            .ok_or_else(|| Error::InvalidUri("same-document reference without a document".into()))
    }

    fn lookup_id(&self, document: &XmlDocument, id: &str) -> Result<Option<NodeId>> {
        let doc = document.parse_doc()?;
        match self.ctx.id_element_hook() {
            Some(hook) => hook(&doc, id),
            None => Ok(find_by_id(&doc, id, &self.ctx.id_attrs)?.map(|n| n.id())),
        }
    }

    fn resolve_id(&self, id: &str, with_comments: bool) -> Result<TransformData> {
        if let Some(document) = &self.document {
            if let Some(node) = self.lookup_id(document, id)? {
                return uri::subtree(document.clone(), node, with_comments);
            }
        }
        let standalone = self.standalone_signature()?;
        match self.lookup_id(&standalone, id)? {
            Some(node) => uri::subtree(standalone, node, with_comments),
            None => Err(Error::InvalidUri(format!("no element with id '{id}'"))),
        }
    }

    fn reference_input(&self, reference: &Reference) -> Result<TransformData> {
        match ReferenceUri::parse(reference.uri())? {
            ReferenceUri::Absent => {
                let data = reference
                    .detached_content()
                    .or(self.detached_content.as_deref())
                    .ok_or_else(|| {
                        Error::InvalidUri("reference without URI and no detached content".into())
                    })?;
                Ok(TransformData::Stream(data.to_vec()))
            }
            ReferenceUri::WholeDocument => uri::whole_document(self.require_document()?.clone(), false),
            ReferenceUri::WholeDocumentWithComments => {
                uri::whole_document(self.require_document()?.clone(), true)
            }
            ReferenceUri::Id { id, with_comments } => self.resolve_id(&id, with_comments),
            ReferenceUri::External(u) => {
                Err(Error::InvalidUri(format!("external references are not supported: {u}")))
            }
        }
    }

    fn digest_reference(&self, reference: &Reference) -> Result<Vec<u8>> {
        let input = self.reference_input(reference)?;
        let tctx = TransformContext {
            decryptor: self.ctx.decryptor(),
            xslt: self.ctx.xslt_processor(),
        };
        let output = reference.transform_chain().execute(input, &tctx)?;
        let mut writer = DigestWriter::new(reference.digest_method())?;
        output.write_octets(&mut writer)?;
        let digest = writer.finalize();
        debug!(uri = reference.uri(), method = reference.digest_method(), "digested reference");
        Ok(digest)
    }
}

impl std::fmt::Debug for SignedXml<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignedXml")
            .field("ctx", &self.ctx)
            .field("has_document", &self.document.is_some())
            .field("signature", &self.signature)
            .field("signature_node", &self.signature_node)
            .finish()
    }
}

/// X.509-backed keys must carry a signing key usage.
fn may_sign(key: &Key) -> bool {
    match key.x509_chain.first() {
        Some(leaf) => x509::has_signing_key_usage(leaf).unwrap_or(false),
        None => true,
    }
}

fn can_verify(key: &Key, method: &str) -> bool {
    match &key.data {
        KeyData::Rsa { .. } => method.contains("rsa-sha"),
        KeyData::Dsa { .. } => method == algorithm::DSA_SHA1,
        _ => algorithm::is_hmac(method),
    }
}

fn can_sign(key: &Key, method: &str) -> bool {
    match &key.data {
        KeyData::Rsa { private, .. } => private.is_some() && can_verify(key, method),
        KeyData::Dsa { private, .. } => private.is_some() && can_verify(key, method),
        _ => can_verify(key, method),
    }
}

fn default_signature_method(key: &Key) -> Result<&'static str> {
    match &key.data {
        KeyData::Rsa { private: Some(_), .. } => Ok(algorithm::RSA_SHA256),
        KeyData::Dsa { private: Some(_), .. } => Ok(algorithm::DSA_SHA1),
        KeyData::Rsa { .. } | KeyData::Dsa { .. } => Err(Error::Key("public key cannot sign".into())),
        _ => Ok(algorithm::HMAC_SHA256),
    }
}

/// Nesting level of each reference: a reference whose `#id` names another
/// reference sits one level above it.
fn reference_levels(references: &[Reference]) -> Result<Vec<usize>> {
    let mut memo = vec![None; references.len()];
    let mut visiting = vec![false; references.len()];
    for i in 0..references.len() {
        level_of(references, i, &mut memo, &mut visiting)?;
    }
    Ok(memo.into_iter().map(|l| l.unwrap_or(0)).collect())
}

fn level_of(
    references: &[Reference],
    i: usize,
    memo: &mut [Option<usize>],
    visiting: &mut [bool],
) -> Result<usize> {
    if let Some(level) = memo[i] {
        return Ok(level);
    }
    if visiting[i] {
        return Err(Error::XmlStructure("references refer to each other in a cycle".into()));
    }
    visiting[i] = true;
    let target = references[i]
        .uri()
        .and_then(|u| u.strip_prefix('#'))
        .and_then(|id| references.iter().position(|r| r.id() == Some(id)));
    let level = match target {
        Some(j) => 1 + level_of(references, j, memo, visiting)?,
        None => 0,
    };
    visiting[i] = false;
    memo[i] = Some(level);
    Ok(level)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulriksdal_keys::{KeyInfoClause, KeyUsage};
    use ulriksdal_transforms::Transform;

    const DOC: &str = r#"<root Id="x">hello</root>"#;

    fn hmac_ctx(secret: &[u8]) -> DsigContext<'static> {
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(loader::load_hmac_key(secret));
        ctx
    }

    fn enveloped_reference(uri: &str) -> Reference {
        let mut r = Reference::with_uri(uri);
        r.add_transform(Transform::EnvelopedSignature { position: 0 });
        r.add_transform(Transform::ExcC14n {
            with_comments: false,
            inclusive_prefixes: vec![],
        });
        r
    }

    fn sign_hmac(bits: Option<usize>) -> XmlDocument {
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(hmac_ctx(b"secret"), doc);
        signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
        signed.signed_info_mut().set_signature_length(bits);
        signed.add_reference(enveloped_reference("#x"));
        signed.compute_signature().unwrap();
        signed.signed_document().unwrap()
    }

    fn load(ctx: DsigContext<'_>, document: XmlDocument) -> SignedXml<'_> {
        let node = find_signatures(&document).unwrap()[0];
        let mut signed = SignedXml::new(ctx);
        signed.load_xml(document, node).unwrap();
        signed
    }

    fn rsa_key() -> Key {
        let private = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap();
        let public = private.to_public_key();
        Key::new(
            KeyData::Rsa {
                private: Some(private),
                public,
            },
            KeyUsage::Any,
        )
    }

    #[test]
    fn test_hmac_enveloped_roundtrip() {
        let out = sign_hmac(None);
        assert!(out.text().starts_with(r#"<root Id="x">hello<Signature"#));
        let signed = load(hmac_ctx(b"secret"), out);
        assert_eq!(signed.check_signature().unwrap(), VerifyResult::Valid);
    }

    #[test]
    fn test_wrong_key_is_mismatch() {
        let signed = load(hmac_ctx(b"other"), sign_hmac(None));
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::SignatureMismatch)
        );
    }

    #[test]
    fn test_tampered_content_is_digest_mismatch() {
        let out = sign_hmac(None);
        let tampered = XmlDocument::parse(out.text().replace(">hello<", ">hullo<")).unwrap();
        let signed = load(hmac_ctx(b"secret"), tampered);
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::DigestMismatch { uri: Some("#x".into()) })
        );
    }

    #[test]
    fn test_truncated_hmac_rejected_by_default() {
        let out = sign_hmac(Some(128));
        let signed = load(hmac_ctx(b"secret"), out.clone());
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::FormatRejected)
        );

        let mut ctx = hmac_ctx(b"secret");
        ctx.set_format_validator(|_| true);
        let signed = load(ctx, out);
        assert!(signed.check_signature().unwrap().is_valid());
    }

    #[test]
    fn test_unsafe_canonicalization_rejected() {
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(hmac_ctx(b"secret"), doc);
        signed.add_reference(enveloped_reference("#x"));
        signed.compute_signature().unwrap();
        signed.context_mut().safe_canonicalization_methods.clear();
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::FormatRejected)
        );
    }

    #[test]
    fn test_disallowed_transform() {
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(hmac_ctx(b"secret"), doc);
        let mut r = Reference::with_uri("");
        r.add_transform(Transform::XPath {
            expression: "true()".into(),
            namespaces: BTreeMap::new(),
        });
        r.add_transform(Transform::EnvelopedSignature { position: 0 });
        signed.add_reference(r);
        signed.compute_signature().unwrap();
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::DisallowedTransform {
                uri: algorithm::XPATH.into()
            })
        );
    }

    #[test]
    fn test_enveloping_object_with_rsa() {
        let key = rsa_key();
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(key.clone());
        let mut signed = SignedXml::new(ctx);
        signed.add_object(DataObject::new(Some("obj".into()), "<data>payload</data>"));
        signed.add_reference(Reference::with_uri("#obj"));
        signed.compute_signature().unwrap();
        assert_eq!(signed.signed_info().signature_method(), Some(algorithm::RSA_SHA256));

        let xml = signed.get_xml().unwrap();
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(key.clone());
        let verifier = load(ctx, XmlDocument::parse(xml.clone()).unwrap());
        let (result, used) = verifier.check_signature_returning_key().unwrap();
        assert!(result.is_valid());
        assert!(used.is_some());

        let tampered = XmlDocument::parse(xml.replace("payload", "paylaod")).unwrap();
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(key);
        let verifier = load(ctx, tampered);
        assert_eq!(
            verifier.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::DigestMismatch { uri: Some("#obj".into()) })
        );

        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(rsa_key());
        let verifier = load(ctx, XmlDocument::parse(xml).unwrap());
        assert_eq!(
            verifier.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::SignatureMismatch)
        );
    }

    #[test]
    fn test_detached_content() {
        let mut signed = SignedXml::new(hmac_ctx(b"k"));
        signed.add_reference(Reference::new());
        signed.set_detached_content(b"external bytes".to_vec());
        signed.compute_signature().unwrap();
        assert!(signed.check_signature().unwrap().is_valid());

        signed.set_detached_content(b"other bytes".to_vec());
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::DigestMismatch { uri: None })
        );
    }

    #[test]
    fn test_reference_without_content_fails() {
        let mut signed = SignedXml::new(hmac_ctx(b"k"));
        signed.add_reference(Reference::new());
        assert!(matches!(signed.compute_signature(), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_no_usable_key() {
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_key(loader::load_hmac_key(b"secret"));
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(ctx, doc);
        signed.add_reference(enveloped_reference("#x"));
        signed.set_signing_key(rsa_key());
        signed.compute_signature().unwrap();
        assert_eq!(
            signed.check_signature().unwrap(),
            VerifyResult::Invalid(VerifyFailure::NoUsableKey)
        );
    }

    #[test]
    fn test_key_name_selects_key() {
        let mut ctx = DsigContext::default();
        ctx.keys_manager.add_named_key("a", loader::load_hmac_key(b"first"));
        ctx.keys_manager.add_named_key("b", loader::load_hmac_key(b"second"));
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(ctx, doc);
        signed.add_reference(enveloped_reference("#x"));
        signed.set_signing_key(loader::load_hmac_key(b"second"));
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::KeyName("b".into()));
        signed.set_key_info(Some(ki));
        signed.compute_signature().unwrap();
        let (result, key) = signed.check_signature_returning_key().unwrap();
        assert!(result.is_valid());
        assert_eq!(key.unwrap().symmetric_key_bytes(), Some(&b"second"[..]));
    }

    fn by_ref_attribute(doc: &roxmltree::Document<'_>, id: &str) -> Result<Option<NodeId>> {
        Ok(doc
            .descendants()
            .find(|n| n.attribute("ref") == Some(id) || n.attribute("Id") == Some(id))
            .map(|n| n.id()))
    }

    #[test]
    fn test_id_hook_resolves_retrieval_method() {
        let source = format!(
            r#"<root Id="x">hello<KeyName xmlns="{}" ref="which">mac</KeyName></root>"#,
            ns::DSIG
        );
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::RetrievalMethod {
            uri: "#which".into(),
            type_uri: None,
        });
        let mut signed = SignedXml::with_document(DsigContext::default(), XmlDocument::parse(source).unwrap());
        signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
        signed.add_reference(enveloped_reference("#x"));
        signed.set_signing_key(loader::load_hmac_key(b"secret"));
        signed.set_key_info(Some(ki));
        signed.compute_signature().unwrap();
        let out = signed.signed_document().unwrap();

        let named = || {
            let mut ctx = DsigContext::default();
            ctx.keys_manager.add_named_key("mac", loader::load_hmac_key(b"secret"));
            ctx
        };
        let mut ctx = named();
        ctx.set_id_element_hook(by_ref_attribute);
        assert_eq!(load(ctx, out.clone()).check_signature().unwrap(), VerifyResult::Valid);

        let without_hook = load(named(), out).check_signature();
        assert!(!matches!(without_hook, Ok(VerifyResult::Valid)));
    }

    #[test]
    fn test_id_hook_used_inside_standalone_signature() {
        let mut ctx = DsigContext::default();
        ctx.set_id_element_hook(by_ref_attribute);
        let mut signed = SignedXml::new(ctx);
        signed.add_object(DataObject::new(None, r#"<data ref="p">payload</data>"#));
        signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
        signed.add_reference(Reference::with_uri("#p"));
        signed.set_signing_key(loader::load_hmac_key(b"secret"));
        signed.compute_signature().unwrap();

        let mut plain = SignedXml::new(DsigContext::default());
        plain.add_object(DataObject::new(None, r#"<data ref="p">payload</data>"#));
        plain.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
        plain.add_reference(Reference::with_uri("#p"));
        plain.set_signing_key(loader::load_hmac_key(b"secret"));
        assert!(matches!(plain.compute_signature(), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_reference_levels_follow_dependencies() {
        let mut a = Reference::with_uri("#r2");
        a.set_id(Some("r1".into()));
        let mut b = Reference::with_uri("#obj");
        b.set_id(Some("r2".into()));
        assert_eq!(reference_levels(&[a.clone(), b]).unwrap(), vec![1, 0]);

        let mut c = Reference::with_uri("#r1");
        c.set_id(Some("r2".into()));
        assert!(matches!(reference_levels(&[a, c]), Err(Error::XmlStructure(_))));
    }

    #[test]
    fn test_comments_follow_reference_uri_form() {
        let cases = [
            ("", true),
            ("#x", true),
            ("#xpointer(/)", false),
            ("#xpointer(id('x'))", false),
        ];
        for (uri, comments_ignored) in cases {
            let doc = XmlDocument::parse(r#"<root Id="x"><!--draft-->hello</root>"#).unwrap();
            let mut signed = SignedXml::with_document(hmac_ctx(b"secret"), doc);
            let mut r = Reference::with_uri(uri);
            r.add_transform(Transform::EnvelopedSignature { position: 0 });
            r.add_transform(Transform::ExcC14n {
                with_comments: true,
                inclusive_prefixes: vec![],
            });
            signed.add_reference(r);
            signed.compute_signature().unwrap();
            let text = signed.signed_document().unwrap().text().replace("<!--draft-->", "<!--final-->");

            let result = load(hmac_ctx(b"secret"), XmlDocument::parse(text).unwrap())
                .check_signature()
                .unwrap();
            if comments_ignored {
                assert_eq!(result, VerifyResult::Valid, "uri {uri:?}");
            } else {
                assert!(
                    matches!(result, VerifyResult::Invalid(VerifyFailure::DigestMismatch { .. })),
                    "uri {uri:?}: {result:?}"
                );
            }
        }
    }

    #[test]
    fn test_truncated_length_over_hash_size_fails_to_sign() {
        let doc = XmlDocument::parse(DOC).unwrap();
        let mut signed = SignedXml::with_document(hmac_ctx(b"secret"), doc);
        signed.signed_info_mut().set_signature_method(algorithm::HMAC_SHA256);
        signed.signed_info_mut().set_signature_length(Some(512));
        signed.add_reference(enveloped_reference("#x"));
        assert!(matches!(signed.compute_signature(), Err(Error::Crypto(_))));
    }
}

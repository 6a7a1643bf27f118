#![forbid(unsafe_code)]

//! Turning a `KeyInfo` into candidate keys.
//!
//! Clauses are resolved in document order and every key they yield is
//! returned, so a verifier can try them one after another. Indirections
//! (`RetrievalMethod`, nested `EncryptedKey`) carry an explicit depth and
//! fail with [`Error::RecursionLimit`] once it exceeds the configured bound.

use tracing::debug;
use ulriksdal_core::{algorithm, ns, Error, ErrorKind, Result};
use ulriksdal_xml::document::{find_by_id, is_element_named};
use ulriksdal_xml::XmlDocument;

use crate::key::{Key, KeyData, KeyUsage};
use crate::keyinfo::{DsaKeyValue, KeyInfo, KeyInfoClause, RsaKeyValue, X509Data};
use crate::loader;
use crate::manager::KeysManager;

/// Default bound on nested `RetrievalMethod` / `EncryptedKey` resolution.
pub const DEFAULT_MAX_DEPTH: usize = 20;

/// Decrypts a nested `xenc:EncryptedKey` into a usable key.
///
/// Implementations resolve the encrypted key's own `KeyInfo` back through
/// `resolver` at `depth`, which keeps the recursion bound in force.
pub trait EncryptedKeyResolver {
    fn resolve_encrypted_key(
        &self,
        encrypted_key_xml: &str,
        resolver: &KeyResolver<'_>,
        depth: usize,
    ) -> Result<Option<Key>>;
}

/// Caller-supplied `#id` lookup used in place of the default
/// `Id`/`id`/`ID` attribute search.
pub type IdLookup<'a> =
    dyn Fn(&roxmltree::Document<'_>, &str) -> Result<Option<roxmltree::NodeId>> + 'a;

/// Resolves `KeyInfo` clauses against a keys manager and, for same-document
/// indirections, the document being processed.
#[derive(Clone, Copy)]
pub struct KeyResolver<'a> {
    manager: &'a KeysManager,
    document: Option<&'a XmlDocument>,
    id_attrs: &'a [String],
    id_lookup: Option<&'a IdLookup<'a>>,
    encrypted_key_resolver: Option<&'a dyn EncryptedKeyResolver>,
    target_algorithm: Option<&'a str>,
    max_depth: usize,
}

impl<'a> KeyResolver<'a> {
    pub fn new(manager: &'a KeysManager) -> Self {
        Self {
            manager,
            document: None,
            id_attrs: &[],
            id_lookup: None,
            encrypted_key_resolver: None,
            target_algorithm: None,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Document consulted for `RetrievalMethod URI="#id"`.
    pub fn with_document(mut self, document: &'a XmlDocument) -> Self {
        self.document = Some(document);
        self
    }

    /// Extra attribute names accepted as ids, after `Id`, `id` and `ID`.
    pub fn with_id_attrs(mut self, id_attrs: &'a [String]) -> Self {
        self.id_attrs = id_attrs;
        self
    }

    /// Look up `RetrievalMethod` targets with `lookup` instead of by
    /// attribute.
    pub fn with_id_lookup(mut self, lookup: &'a IdLookup<'a>) -> Self {
        self.id_lookup = Some(lookup);
        self
    }

    pub fn with_encrypted_key_resolver(mut self, resolver: &'a dyn EncryptedKeyResolver) -> Self {
        self.encrypted_key_resolver = Some(resolver);
        self
    }

    /// Algorithm the resolved key is wanted for. Used to type keys
    /// recovered from an `EncryptedKey`.
    pub fn with_target_algorithm(mut self, uri: &'a str) -> Self {
        self.target_algorithm = Some(uri);
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn manager(&self) -> &'a KeysManager {
        self.manager
    }

    pub fn document(&self) -> Option<&'a XmlDocument> {
        self.document
    }

    pub fn target_algorithm(&self) -> Option<&'a str> {
        self.target_algorithm
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// All candidate keys described by `key_info`, in clause order.
    pub fn resolve_all(&self, key_info: &KeyInfo) -> Result<Vec<Key>> {
        self.resolve_key_info(key_info, 0)
    }

    /// First candidate key, or `KeyNotFound`.
    pub fn resolve_first(&self, key_info: &KeyInfo) -> Result<Key> {
        self.resolve_all(key_info)?
            .into_iter()
            .next()
            .ok_or_else(|| Error::KeyNotFound("KeyInfo did not resolve to any key".into()))
    }

    /// Resolve every clause of `key_info` at `depth`.
    ///
    /// A clause that names an unknown key is skipped. Recursion-limit and
    /// structural errors abort; a crypto failure (a nested key that does
    /// not unwrap) is reported only if no clause yields a key.
    pub fn resolve_key_info(&self, key_info: &KeyInfo, depth: usize) -> Result<Vec<Key>> {
        self.check_depth(depth)?;
        let mut keys = Vec::new();
        let mut deferred: Option<Error> = None;
        for clause in key_info.clauses() {
            match self.resolve_clause(clause, depth) {
                Ok(found) => keys.extend(found),
                Err(e) => match e.kind() {
                    ErrorKind::Key => debug!(error = %e, "KeyInfo clause yielded no key"),
                    ErrorKind::Crypto => {
                        debug!(error = %e, "KeyInfo clause failed to decrypt");
                        deferred.get_or_insert(e);
                    }
                    _ => return Err(e),
                },
            }
        }
        match deferred {
            Some(e) if keys.is_empty() => Err(e),
            _ => Ok(keys),
        }
    }

    /// Resolve a single clause at `depth`.
    pub fn resolve_clause(&self, clause: &KeyInfoClause, depth: usize) -> Result<Vec<Key>> {
        self.check_depth(depth)?;
        match clause {
            KeyInfoClause::KeyName(name) => Ok(self.manager.find_by_name(name).cloned().into_iter().collect()),
            KeyInfoClause::RsaKeyValue(kv) => Ok(vec![self.rsa_key(kv)?]),
            KeyInfoClause::DsaKeyValue(kv) => Ok(vec![self.dsa_key(kv)?]),
            KeyInfoClause::X509Data(data) => self.x509_keys(data),
            KeyInfoClause::RetrievalMethod { uri, type_uri } => {
                self.follow_retrieval_method(uri, type_uri.as_deref(), depth + 1)
            }
            KeyInfoClause::EncryptedKey(xml) => self.encrypted_key(xml, depth + 1),
            KeyInfoClause::Generic(_) => Ok(Vec::new()),
        }
    }

    fn check_depth(&self, depth: usize) -> Result<()> {
        if depth > self.max_depth {
            return Err(Error::RecursionLimit(self.max_depth));
        }
        Ok(())
    }

    /// The public key from the document, upgraded to the manager's key
    /// when the manager holds the matching private half.
    fn rsa_key(&self, kv: &RsaKeyValue) -> Result<Key> {
        let public = kv.to_public_key()?;
        let held = self
            .manager
            .keys()
            .find(|k| matches!(&k.data, KeyData::Rsa { private: Some(_), public: p } if *p == public));
        Ok(held.cloned().unwrap_or_else(|| {
            Key::new(KeyData::Rsa { private: None, public }, KeyUsage::Verify)
        }))
    }

    fn dsa_key(&self, kv: &DsaKeyValue) -> Result<Key> {
        let public = kv.to_verifying_key()?;
        let held = self
            .manager
            .keys()
            .find(|k| matches!(&k.data, KeyData::Dsa { private: Some(_), public: p } if *p == public));
        Ok(held.cloned().unwrap_or_else(|| {
            Key::new(KeyData::Dsa { private: None, public }, KeyUsage::Verify)
        }))
    }

    /// Every embedded certificate yields its public key, with the whole
    /// `X509Data` certificate list as the chain (leaf first). Issuer/serial
    /// references match certificates the manager already holds.
    fn x509_keys(&self, data: &X509Data) -> Result<Vec<Key>> {
        let mut keys = Vec::new();
        for (i, cert) in data.certificates.iter().enumerate() {
            if let Some(held) = self.manager.keys().find(|k| k.x509_chain.first() == Some(cert)) {
                keys.push(held.clone());
                continue;
            }
            let mut key = loader::load_x509_cert_der(cert)?;
            let mut chain = vec![cert.clone()];
            chain.extend(
                data.certificates
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(_, c)| c.clone()),
            );
            key.x509_chain = chain;
            keys.push(key);
        }
        for is in &data.issuer_serials {
            if let Some(held) = find_key_by_serial(self.manager, is.serial_number.trim()) {
                keys.push(held.clone());
            }
        }
        Ok(keys)
    }

    fn follow_retrieval_method(
        &self,
        uri: &str,
        type_uri: Option<&str>,
        depth: usize,
    ) -> Result<Vec<Key>> {
        self.check_depth(depth)?;
        let Some(id) = uri.strip_prefix('#') else {
            return Err(Error::InvalidUri(format!(
                "RetrievalMethod URI '{uri}' is not a same-document reference"
            )));
        };
        let document = self.document.ok_or_else(|| {
            Error::Key(format!("RetrievalMethod '{uri}' needs a document to resolve against"))
        })?;
        let parsed = document.parse_doc()?;
        let found = match self.id_lookup {
            Some(lookup) => lookup(&parsed, id)?.and_then(|node| parsed.get_node(node)),
            None => find_by_id(&parsed, id, self.id_attrs)?,
        };
        let target = found
            .ok_or_else(|| Error::InvalidUri(format!("RetrievalMethod target '{uri}' not found")))?;
        debug!(uri, ?type_uri, depth, "following RetrievalMethod");

        if is_element_named(&target, ns::ENC, ns::node::ENCRYPTED_KEY)
            || type_uri == Some(algorithm::ENCRYPTED_KEY)
        {
            return self.encrypted_key(&ulriksdal_xml::names::outer_xml_with_context(target), depth);
        }
        if is_element_named(&target, ns::DSIG, ns::node::KEY_INFO) {
            return self.resolve_key_info(&KeyInfo::load_xml(target)?, depth);
        }
        let clause = KeyInfoClause::load_xml(target)?;
        self.resolve_clause(&clause, depth)
    }

    fn encrypted_key(&self, xml: &str, depth: usize) -> Result<Vec<Key>> {
        self.check_depth(depth)?;
        let Some(resolver) = self.encrypted_key_resolver else {
            debug!("no EncryptedKey resolver configured; skipping nested EncryptedKey");
            return Ok(Vec::new());
        };
        Ok(resolver
            .resolve_encrypted_key(xml, self, depth)?
            .into_iter()
            .collect())
    }
}

impl std::fmt::Debug for KeyResolver<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyResolver")
            .field("keys", &self.manager.len())
            .field("has_document", &self.document.is_some())
            .field("id_lookup", &self.id_lookup.is_some())
            .field("target_algorithm", &self.target_algorithm)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

/// Find a manager key whose leaf certificate has this decimal serial number.
fn find_key_by_serial<'m>(manager: &'m KeysManager, serial: &str) -> Option<&'m Key> {
    use der::Decode;
    manager.keys().find(|key| {
        key.x509_chain
            .first()
            .and_then(|der| x509_cert::Certificate::from_der(der).ok())
            .is_some_and(|cert| {
                let bytes = cert.tbs_certificate.serial_number.as_bytes();
                rsa::BigUint::from_bytes_be(bytes).to_string() == serial
            })
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rsa_key() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    fn private_key(pk: &rsa::RsaPrivateKey) -> Key {
        Key::new(
            KeyData::Rsa {
                private: Some(pk.clone()),
                public: pk.to_public_key(),
            },
            KeyUsage::Any,
        )
    }

    #[test]
    fn test_key_name_and_unknown_name() {
        let mut mgr = KeysManager::new();
        mgr.add_named_key("alice", Key::new(KeyData::Aes(vec![1; 16]), KeyUsage::Any));
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::KeyName("nobody".into()));
        ki.add_clause(KeyInfoClause::KeyName("alice".into()));
        let keys = KeyResolver::new(&mgr).resolve_all(&ki).unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0].name.as_deref(), Some("alice"));
    }

    #[test]
    fn test_rsa_key_value_upgrades_to_held_private_key() {
        let pk = rsa_key();
        let mut mgr = KeysManager::new();
        mgr.add_key(private_key(&pk));
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::RsaKeyValue(RsaKeyValue::from_public_key(&pk.to_public_key())));

        let key = KeyResolver::new(&mgr).resolve_first(&ki).unwrap();
        assert!(key.rsa_private_key().is_some());

        let key = KeyResolver::new(&KeysManager::new()).resolve_first(&ki).unwrap();
        assert!(key.rsa_private_key().is_none());
    }

    #[test]
    fn test_retrieval_method_to_key_value() {
        let pk = rsa_key();
        let kv = RsaKeyValue::from_public_key(&pk.to_public_key());
        let mut target = KeyInfo::new();
        target.set_id(Some("k1".into()));
        target.add_clause(KeyInfoClause::RsaKeyValue(kv));
        let doc = XmlDocument::parse(format!("<root>{}</root>", target.get_xml())).unwrap();

        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::RetrievalMethod { uri: "#k1".into(), type_uri: None });
        let mgr = KeysManager::new();
        let key = KeyResolver::new(&mgr).with_document(&doc).resolve_first(&ki).unwrap();
        assert_eq!(key.rsa_public_key(), Some(&pk.to_public_key()));
    }

    #[test]
    fn test_self_referencing_retrieval_method_hits_limit() {
        let doc = XmlDocument::parse(concat!(
            r#"<root xmlns:ds="http://www.w3.org/2000/09/xmldsig#">"#,
            r##"<ds:RetrievalMethod Id="loop" URI="#loop"/>"##,
            r#"</root>"#
        ))
        .unwrap();
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::RetrievalMethod { uri: "#loop".into(), type_uri: None });
        let mgr = KeysManager::new();
        let err = KeyResolver::new(&mgr)
            .with_document(&doc)
            .with_max_depth(5)
            .resolve_all(&ki)
            .unwrap_err();
        assert!(matches!(err, Error::RecursionLimit(5)));
    }

    #[test]
    fn test_external_retrieval_method_is_structural() {
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::RetrievalMethod {
            uri: "http://example.com/key".into(),
            type_uri: None,
        });
        let mgr = KeysManager::new();
        assert!(matches!(KeyResolver::new(&mgr).resolve_all(&ki), Err(Error::InvalidUri(_))));
    }

    #[test]
    fn test_x509_certificate_and_serial() {
        let pk = rsa_key();
        let cert = crate::x509::tests::self_signed(&pk, false);
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::X509Data(X509Data {
            certificates: vec![cert.clone()],
            ..X509Data::default()
        }));
        let mgr = KeysManager::new();
        let key = KeyResolver::new(&mgr).resolve_first(&ki).unwrap();
        assert_eq!(key.x509_chain, vec![cert.clone()]);
        assert_eq!(key.rsa_public_key(), Some(&pk.to_public_key()));

        let mut held = private_key(&pk);
        held.x509_chain = vec![cert];
        let mut mgr = KeysManager::new();
        mgr.add_key(held);
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::X509Data(X509Data {
            issuer_serials: vec![crate::keyinfo::X509IssuerSerial {
                issuer_name: "CN=ulriksdal test".into(),
                serial_number: "7".into(),
            }],
            ..X509Data::default()
        }));
        let key = KeyResolver::new(&mgr).resolve_first(&ki).unwrap();
        assert!(key.rsa_private_key().is_some());
    }

    struct FixedKey;

    impl EncryptedKeyResolver for FixedKey {
        fn resolve_encrypted_key(
            &self,
            _xml: &str,
            resolver: &KeyResolver<'_>,
            depth: usize,
        ) -> Result<Option<Key>> {
            assert_eq!(depth, 1);
            let uri = resolver.target_algorithm().unwrap_or(algorithm::AES128_CBC);
            Key::from_symmetric(uri, vec![3; 16]).map(Some)
        }
    }

    #[test]
    fn test_encrypted_key_clause_uses_resolver() {
        let mut ki = KeyInfo::new();
        ki.add_clause(KeyInfoClause::EncryptedKey("<EncryptedKey/>".into()));
        let mgr = KeysManager::new();
        assert!(KeyResolver::new(&mgr).resolve_all(&ki).unwrap().is_empty());

        let keys = KeyResolver::new(&mgr)
            .with_encrypted_key_resolver(&FixedKey)
            .with_target_algorithm(algorithm::HMAC_SHA256)
            .resolve_all(&ki)
            .unwrap();
        assert!(matches!(keys[0].data, KeyData::Hmac(_)));
    }
}

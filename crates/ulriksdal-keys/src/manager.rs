#![forbid(unsafe_code)]

//! Key manager with named key store.

use crate::key::{Key, KeyData, KeyUsage};
use ulriksdal_core::Error;

/// Manages a collection of keys for lookup during signature/encryption processing.
///
/// Doubles as the key-name table of `EncryptedXml`: a `KeyName` in a
/// `KeyInfo` resolves through [`KeysManager::find_by_name`].
#[derive(Debug, Clone, Default)]
pub struct KeysManager {
    keys: Vec<Key>,
    /// Trusted CA certificates (DER-encoded).
    trusted_certs: Vec<Vec<u8>>,
    /// Untrusted intermediate certificates (DER-encoded).
    untrusted_certs: Vec<Vec<u8>>,
}

impl KeysManager {
    /// Create an empty keys manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key to the manager.
    pub fn add_key(&mut self, key: Key) {
        self.keys.push(key);
    }

    /// Register `key` under `name`, replacing any key already holding that name.
    pub fn add_named_key(&mut self, name: impl Into<String>, key: Key) {
        let name = name.into();
        self.remove_by_name(&name);
        self.keys.push(key.with_name(name));
    }

    /// Drop every key registered under `name`.
    pub fn remove_by_name(&mut self, name: &str) {
        self.keys.retain(|k| k.name.as_deref() != Some(name));
    }

    /// Drop every named key, keeping anonymous ones.
    pub fn clear_named_keys(&mut self) {
        self.keys.retain(|k| k.name.is_none());
    }

    /// Find a key by name.
    pub fn find_by_name(&self, name: &str) -> Option<&Key> {
        self.keys.iter().find(|k| k.name.as_deref() == Some(name))
    }

    /// Find the first key matching the given usage.
    pub fn find_by_usage(&self, usage: KeyUsage) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| k.usage == usage || k.usage == KeyUsage::Any)
    }

    /// Find the first key that has an RSA public key.
    pub fn find_rsa(&self) -> Option<&Key> {
        self.keys.iter().find(|k| matches!(&k.data, KeyData::Rsa { .. }))
    }

    /// Find an RSA key with a private key component.
    pub fn find_rsa_private(&self) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Rsa { private: Some(_), .. }))
    }

    pub fn find_dsa(&self) -> Option<&Key> {
        self.keys.iter().find(|k| matches!(&k.data, KeyData::Dsa { .. }))
    }

    /// Find the first HMAC key.
    pub fn find_hmac(&self) -> Option<&Key> {
        self.keys.iter().find(|k| matches!(&k.data, KeyData::Hmac(_)))
    }

    /// Find an AES key with the specified byte length.
    pub fn find_aes_by_size(&self, size_bytes: usize) -> Option<&Key> {
        self.keys
            .iter()
            .find(|k| matches!(&k.data, KeyData::Aes(bytes) if bytes.len() == size_bytes))
    }

    /// Find the first 3DES key.
    pub fn find_des3(&self) -> Option<&Key> {
        self.keys.iter().find(|k| matches!(&k.data, KeyData::Des3(_)))
    }

    /// Iterator over all keys.
    pub fn keys(&self) -> impl Iterator<Item = &Key> {
        self.keys.iter()
    }

    /// Get the first key available (for simple single-key scenarios).
    pub fn first_key(&self) -> Result<&Key, Error> {
        self.keys
            .first()
            .ok_or_else(|| Error::KeyNotFound("no keys in manager".into()))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Add a trusted CA certificate (DER-encoded).
    pub fn add_trusted_cert(&mut self, der: Vec<u8>) {
        self.trusted_certs.push(der);
    }

    /// Add an untrusted intermediate certificate (DER-encoded).
    pub fn add_untrusted_cert(&mut self, der: Vec<u8>) {
        self.untrusted_certs.push(der);
    }

    pub fn trusted_certs(&self) -> &[Vec<u8>] {
        &self.trusted_certs
    }

    pub fn untrusted_certs(&self) -> &[Vec<u8>] {
        &self.untrusted_certs
    }

    pub fn has_trusted_certs(&self) -> bool {
        !self.trusted_certs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aes(len: usize) -> Key {
        Key::new(KeyData::Aes(vec![0; len]), KeyUsage::Any)
    }

    #[test]
    fn test_named_keys_replace_and_clear() {
        let mut mgr = KeysManager::new();
        mgr.add_key(aes(16));
        mgr.add_named_key("bob", aes(16));
        mgr.add_named_key("bob", aes(32));
        assert_eq!(mgr.len(), 2);
        assert_eq!(mgr.find_by_name("bob").unwrap().symmetric_key_bytes().unwrap().len(), 32);
        mgr.clear_named_keys();
        assert!(mgr.find_by_name("bob").is_none());
        assert_eq!(mgr.len(), 1);
    }

    #[test]
    fn test_find_by_type() {
        let mut mgr = KeysManager::new();
        mgr.add_key(aes(24));
        mgr.add_key(Key::new(KeyData::Des3(vec![0; 24]), KeyUsage::Any));
        assert!(mgr.find_aes_by_size(24).is_some());
        assert!(mgr.find_aes_by_size(16).is_none());
        assert!(mgr.find_des3().is_some());
        assert!(mgr.find_rsa().is_none());
    }

    #[test]
    fn test_first_key_on_empty_manager() {
        let mgr = KeysManager::default();
        assert!(matches!(mgr.first_key(), Err(Error::KeyNotFound(_))));
    }
}

#![forbid(unsafe_code)]

//! Encryption context: keys and configuration.

use ulriksdal_core::algorithm;
use ulriksdal_crypto::{CipherMode, PaddingMode};
use ulriksdal_keys::{KeysManager, DEFAULT_MAX_DEPTH};

/// Settings for XML-Enc operations.
#[derive(Debug)]
pub struct EncContext {
    /// Keys, including the key-name table consulted for `KeyName` clauses.
    pub keys_manager: KeysManager,
    /// Additional ID attribute names.
    pub id_attrs: Vec<String>,
    /// Reject every `CipherReference` instead of resolving it.
    pub disable_cipher_reference: bool,
    pub mode: CipherMode,
    pub padding: PaddingMode,
    /// Only `EncryptedKey` elements addressed to this recipient are decrypted.
    pub recipient: Option<String>,
    /// Bound on nested `EncryptedKey` / `RetrievalMethod` resolution.
    pub max_recursion_depth: usize,
    /// Block cipher for session keys generated by `encrypt`.
    pub session_algorithm: String,
}

impl Default for EncContext {
    fn default() -> Self {
        Self::new(KeysManager::new())
    }
}

impl EncContext {
    pub fn new(keys_manager: KeysManager) -> Self {
        Self {
            keys_manager,
            id_attrs: Vec::new(),
            disable_cipher_reference: false,
            mode: CipherMode::default(),
            padding: PaddingMode::default(),
            recipient: None,
            max_recursion_depth: DEFAULT_MAX_DEPTH,
            session_algorithm: algorithm::AES256_CBC.to_owned(),
        }
    }

    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }
}

#![forbid(unsafe_code)]

//! DSig context: keys, policy and hooks for signature operations.

use ulriksdal_core::{algorithm, Result};
use ulriksdal_keys::{EncryptedKeyResolver, KeysManager, DEFAULT_MAX_DEPTH};
use ulriksdal_transforms::{DocumentDecryptor, XsltProcessor};

use crate::signed_info::SignedInfo;

/// Replaces the default signature-format policy. Returns whether the
/// signature may be checked at all.
pub type FormatValidator<'a> = Box<dyn Fn(&SignedInfo) -> bool + 'a>;

/// Replaces the default `Id`/`id`/`ID` lookup for `#id` references.
pub type IdElementHook<'a> =
    Box<dyn Fn(&roxmltree::Document<'_>, &str) -> Result<Option<roxmltree::NodeId>> + 'a>;

/// Context for XML-DSig operations.
pub struct DsigContext<'a> {
    /// Keys manager for key lookup and trusted certificates.
    pub keys_manager: KeysManager,
    /// Additional ID attribute names, consulted after `Id`, `id` and `ID`.
    pub id_attrs: Vec<String>,
    /// Canonicalization methods a verified signature may use. Transforms
    /// in references may use these plus the always-safe set.
    pub safe_canonicalization_methods: Vec<String>,
    /// Bound on nested KeyInfo indirection.
    pub max_recursion_depth: usize,
    format_validator: Option<FormatValidator<'a>>,
    id_element_hook: Option<IdElementHook<'a>>,
    decryptor: Option<&'a dyn DocumentDecryptor>,
    xslt: Option<&'a dyn XsltProcessor>,
    encrypted_key_resolver: Option<&'a dyn EncryptedKeyResolver>,
}

impl<'a> DsigContext<'a> {
    /// Create a new DSig context with the given keys manager.
    pub fn new(keys_manager: KeysManager) -> Self {
        Self {
            keys_manager,
            id_attrs: Vec::new(),
            safe_canonicalization_methods: algorithm::KNOWN_CANONICALIZATION_METHODS
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            max_recursion_depth: DEFAULT_MAX_DEPTH,
            format_validator: None,
            id_element_hook: None,
            decryptor: None,
            xslt: None,
            encrypted_key_resolver: None,
        }
    }

    /// Add an ID attribute name to consult during `#id` lookup.
    pub fn add_id_attr(&mut self, name: &str) {
        self.id_attrs.push(name.to_owned());
    }

    pub fn set_format_validator(&mut self, validator: impl Fn(&SignedInfo) -> bool + 'a) {
        self.format_validator = Some(Box::new(validator));
    }

    pub fn format_validator(&self) -> Option<&FormatValidator<'a>> {
        self.format_validator.as_ref()
    }

    pub fn set_id_element_hook(
        &mut self,
        hook: impl Fn(&roxmltree::Document<'_>, &str) -> Result<Option<roxmltree::NodeId>> + 'a,
    ) {
        self.id_element_hook = Some(Box::new(hook));
    }

    pub fn id_element_hook(&self) -> Option<&IdElementHook<'a>> {
        self.id_element_hook.as_ref()
    }

    /// Decryptor used by the XML decryption and license transforms.
    pub fn set_decryptor(&mut self, decryptor: &'a dyn DocumentDecryptor) {
        self.decryptor = Some(decryptor);
    }

    pub fn decryptor(&self) -> Option<&'a dyn DocumentDecryptor> {
        self.decryptor
    }

    pub fn set_xslt_processor(&mut self, xslt: &'a dyn XsltProcessor) {
        self.xslt = Some(xslt);
    }

    pub fn xslt_processor(&self) -> Option<&'a dyn XsltProcessor> {
        self.xslt
    }

    /// Resolver for `EncryptedKey` clauses inside a signature's `KeyInfo`.
    pub fn set_encrypted_key_resolver(&mut self, resolver: &'a dyn EncryptedKeyResolver) {
        self.encrypted_key_resolver = Some(resolver);
    }

    pub fn encrypted_key_resolver(&self) -> Option<&'a dyn EncryptedKeyResolver> {
        self.encrypted_key_resolver
    }

    /// Whether a reference may use transform `uri` under this context's policy.
    pub fn is_safe_transform(&self, uri: &str) -> bool {
        algorithm::DEFAULT_SAFE_TRANSFORM_METHODS.contains(&uri)
            || self.safe_canonicalization_methods.iter().any(|m| m == uri)
    }

    pub fn is_safe_canonicalization_method(&self, uri: &str) -> bool {
        self.safe_canonicalization_methods.iter().any(|m| m == uri)
    }
}

impl Default for DsigContext<'_> {
    fn default() -> Self {
        Self::new(KeysManager::new())
    }
}

impl std::fmt::Debug for DsigContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DsigContext")
            .field("keys", &self.keys_manager.len())
            .field("id_attrs", &self.id_attrs)
            .field("safe_canonicalization_methods", &self.safe_canonicalization_methods)
            .field("max_recursion_depth", &self.max_recursion_depth)
            .field("format_validator", &self.format_validator.is_some())
            .field("id_element_hook", &self.id_element_hook.is_some())
            .field("decryptor", &self.decryptor.is_some())
            .field("xslt", &self.xslt.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy() {
        let ctx = DsigContext::default();
        assert!(ctx.is_safe_canonicalization_method(algorithm::EXC_C14N));
        assert!(ctx.is_safe_transform(algorithm::ENVELOPED_SIGNATURE));
        assert!(ctx.is_safe_transform(algorithm::C14N_WITH_COMMENTS));
        assert!(!ctx.is_safe_transform(algorithm::XSLT));
        assert!(!ctx.is_safe_transform(algorithm::XPATH));
        assert_eq!(ctx.max_recursion_depth, 20);
    }

    #[test]
    fn test_policy_is_per_instance() {
        let mut a = DsigContext::default();
        a.safe_canonicalization_methods.push(algorithm::XPATH.to_owned());
        let b = DsigContext::default();
        assert!(a.is_safe_transform(algorithm::XPATH));
        assert!(!b.is_safe_transform(algorithm::XPATH));
    }
}

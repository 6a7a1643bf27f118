#![forbid(unsafe_code)]

//! Algorithm URI constants for XML Security.
//!
//! Each constant is the exact string that appears in an `Algorithm`
//! attribute. The spelling is part of the wire format, so these are
//! compared byte-for-byte and never normalized.

// ── Canonicalization ─────────────────────────────────────────────────

pub const C14N: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const C14N_WITH_COMMENTS: &str =
    "http://www.w3.org/TR/2001/REC-xml-c14n-20010315#WithComments";
pub const EXC_C14N: &str = "http://www.w3.org/2001/10/xml-exc-c14n#";
pub const EXC_C14N_WITH_COMMENTS: &str = "http://www.w3.org/2001/10/xml-exc-c14n#WithComments";

// ── Digest algorithms ────────────────────────────────────────────────

pub const SHA1: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const SHA256: &str = "http://www.w3.org/2001/04/xmlenc#sha256";
pub const SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#sha384";
pub const SHA512: &str = "http://www.w3.org/2001/04/xmlenc#sha512";
pub const MD5: &str = "http://www.w3.org/2001/04/xmldsig-more#md5";
pub const RIPEMD160: &str = "http://www.w3.org/2001/04/xmlenc#ripemd160";

// ── RSA signature algorithms ─────────────────────────────────────────

pub const RSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const RSA_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha256";
pub const RSA_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha384";
pub const RSA_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#rsa-sha512";

// ── DSA signature algorithms ─────────────────────────────────────────

pub const DSA_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#dsa-sha1";

// ── HMAC signature algorithms ────────────────────────────────────────

pub const HMAC_SHA1: &str = "http://www.w3.org/2000/09/xmldsig#hmac-sha1";
pub const HMAC_SHA256: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha256";
pub const HMAC_SHA384: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha384";
pub const HMAC_SHA512: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-sha512";
pub const HMAC_MD5: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-md5";
pub const HMAC_RIPEMD160: &str = "http://www.w3.org/2001/04/xmldsig-more#hmac-ripemd160";

// ── Block ciphers ────────────────────────────────────────────────────

pub const DES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#des-cbc";
pub const TRIPLEDES_CBC: &str = "http://www.w3.org/2001/04/xmlenc#tripledes-cbc";
pub const AES128_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes128-cbc";
pub const AES192_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes192-cbc";
pub const AES256_CBC: &str = "http://www.w3.org/2001/04/xmlenc#aes256-cbc";

// ── Key wrap ─────────────────────────────────────────────────────────

pub const KW_TRIPLEDES: &str = "http://www.w3.org/2001/04/xmlenc#kw-tripledes";
pub const KW_AES128: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes128";
pub const KW_AES192: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes192";
pub const KW_AES256: &str = "http://www.w3.org/2001/04/xmlenc#kw-aes256";

// ── Key transport ────────────────────────────────────────────────────

pub const RSA_PKCS1: &str = "http://www.w3.org/2001/04/xmlenc#rsa-1_5";
pub const RSA_OAEP: &str = "http://www.w3.org/2001/04/xmlenc#rsa-oaep-mgf1p";

// ── Transforms ───────────────────────────────────────────────────────

pub const BASE64: &str = "http://www.w3.org/2000/09/xmldsig#base64";
pub const ENVELOPED_SIGNATURE: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
pub const XPATH: &str = "http://www.w3.org/TR/1999/REC-xpath-19991116";
pub const XSLT: &str = "http://www.w3.org/TR/1999/REC-xslt-19991116";
pub const XML_DECRYPTION: &str = "http://www.w3.org/2002/07/decrypt#XML";
pub const LICENSE_TRANSFORM: &str = "urn:mpeg:mpeg21:2003:01-REL-R-NS:licenseTransform";

// ── KeyInfo / RetrievalMethod types ──────────────────────────────────

pub const DSA_KEY_VALUE: &str = "http://www.w3.org/2000/09/xmldsig#DSAKeyValue";
pub const RSA_KEY_VALUE: &str = "http://www.w3.org/2000/09/xmldsig#RSAKeyValue";
pub const X509_DATA: &str = "http://www.w3.org/2000/09/xmldsig#X509Data";
pub const ENCRYPTED_KEY: &str = "http://www.w3.org/2001/04/xmlenc#EncryptedKey";

// ── Policy tables ────────────────────────────────────────────────────

/// Canonicalization methods accepted for `SignedInfo` unless a caller
/// installs its own allow-list.
pub const KNOWN_CANONICALIZATION_METHODS: &[&str] = &[
    C14N,
    C14N_WITH_COMMENTS,
    EXC_C14N,
    EXC_C14N_WITH_COMMENTS,
];

/// Transforms that are always accepted inside a reference, on top of the
/// canonicalization allow-list.
pub const DEFAULT_SAFE_TRANSFORM_METHODS: &[&str] = &[
    ENVELOPED_SIGNATURE,
    BASE64,
    LICENSE_TRANSFORM,
    XML_DECRYPTION,
];

/// Whether `uri` names one of the HMAC signature methods.
pub fn is_hmac(uri: &str) -> bool {
    matches!(
        uri,
        HMAC_SHA1 | HMAC_SHA256 | HMAC_SHA384 | HMAC_SHA512 | HMAC_MD5 | HMAC_RIPEMD160
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_c14n_table() {
        assert_eq!(KNOWN_CANONICALIZATION_METHODS.len(), 4);
        assert!(KNOWN_CANONICALIZATION_METHODS.contains(&EXC_C14N));
        assert!(!KNOWN_CANONICALIZATION_METHODS.contains(&XSLT));
    }

    #[test]
    fn test_is_hmac() {
        assert!(is_hmac(HMAC_RIPEMD160));
        assert!(!is_hmac(RSA_SHA256));
    }
}

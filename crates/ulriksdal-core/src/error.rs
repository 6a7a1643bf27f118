#![forbid(unsafe_code)]

//! Error types for ulriksdal.
//!
//! Every failure an operation can return is one of these variants. A
//! signature that merely fails to verify is *not* an error: the
//! verification entry points report that through their own result type,
//! so callers can tell "this document is unreadable" apart from "this
//! signature is invalid".

/// Coarse classification of an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed XML, a missing or conflicting element, an unknown
    /// algorithm or transform URI, or an unresolvable reference.
    Structural,
    /// No usable key: unresolvable KeyInfo, missing decryption key,
    /// unsupported key type.
    Key,
    /// Failure reported by a cryptographic primitive (bad padding, wrong
    /// key, integrity check of a key wrap).
    Crypto,
    /// Nested KeyInfo / EncryptedKey / RetrievalMethod indirection went
    /// deeper than the configured limit.
    RecursionLimit,
    /// I/O failure while writing canonical output.
    Io,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("XML parse error: {0}")]
    XmlParse(String),

    #[error("XML structure error: {0}")]
    XmlStructure(String),

    #[error("missing element: {0}")]
    MissingElement(String),

    #[error("missing attribute: {0}")]
    MissingAttribute(String),

    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("invalid URI: {0}")]
    InvalidUri(String),

    #[error("invalid input type for this transform: {0}")]
    InvalidInputType(String),

    #[error("canonicalization error: {0}")]
    Canonicalization(String),

    #[error("transform error: {0}")]
    Transform(String),

    #[error("base64 decode error: {0}")]
    Base64(String),

    #[error("cipher data conflict: {0}")]
    CipherDataConflict(String),

    #[error("key error: {0}")]
    Key(String),

    #[error("key not found: {0}")]
    KeyNotFound(String),

    #[error("certificate error: {0}")]
    Certificate(String),

    #[error("crypto error: {0}")]
    Crypto(String),

    #[error("encryption error: {0}")]
    Encryption(String),

    #[error("decryption error: {0}")]
    Decryption(String),

    #[error("recursion limit of {0} exceeded while resolving key material")]
    RecursionLimit(usize),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::XmlParse(_)
            | Self::XmlStructure(_)
            | Self::MissingElement(_)
            | Self::MissingAttribute(_)
            | Self::UnsupportedAlgorithm(_)
            | Self::InvalidUri(_)
            | Self::InvalidInputType(_)
            | Self::Canonicalization(_)
            | Self::Transform(_)
            | Self::Base64(_)
            | Self::CipherDataConflict(_) => ErrorKind::Structural,
            Self::Key(_) | Self::KeyNotFound(_) | Self::Certificate(_) => ErrorKind::Key,
            Self::Crypto(_) | Self::Encryption(_) | Self::Decryption(_) => {
                ErrorKind::Crypto
            }
            Self::RecursionLimit(_) => ErrorKind::RecursionLimit,
            Self::Io(_) => ErrorKind::Io,
        }
    }

    /// Whether this is the recursion-limit condition.
    pub fn is_recursion_limit(&self) -> bool {
        matches!(self, Self::RecursionLimit(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_are_distinct() {
        assert_eq!(Error::MissingElement("SignedInfo".into()).kind(), ErrorKind::Structural);
        assert_eq!(Error::KeyNotFound("bob".into()).kind(), ErrorKind::Key);
        assert_eq!(Error::Decryption("bad padding".into()).kind(), ErrorKind::Crypto);
        assert_eq!(Error::RecursionLimit(20).kind(), ErrorKind::RecursionLimit);
        assert!(Error::RecursionLimit(20).is_recursion_limit());
    }

    #[test]
    fn test_display() {
        let e = Error::UnsupportedAlgorithm("urn:x".into());
        assert_eq!(e.to_string(), "unsupported algorithm: urn:x");
    }
}

#![forbid(unsafe_code)]

//! Cryptographic algorithm implementations for the ulriksdal XML Security library.
//!
//! Provides traits and implementations for the crypto operations needed by
//! XML-DSig and XML-Enc: digests, signatures, block ciphers, key wrapping,
//! and key transport. Every family is looked up by algorithm URI.

pub mod cipher;
pub mod digest;
pub mod keytransport;
pub mod keywrap;
pub mod registry;
pub mod sign;

pub use cipher::{CipherAlgorithm, CipherMode, PaddingMode};
pub use digest::{DigestAlgorithm, DigestWriter};
pub use keytransport::{KeyTransportAlgorithm, OaepParams};
pub use keywrap::KeyWrapAlgorithm;
pub use registry::AlgorithmRegistry;
pub use sign::{SignatureAlgorithm, SigningKey};

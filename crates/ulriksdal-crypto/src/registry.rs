#![forbid(unsafe_code)]

//! Algorithm registry mapping URIs to factory functions.

use ulriksdal_core::Error;

use crate::cipher::{CipherAlgorithm, CipherMode, PaddingMode};
use crate::digest::DigestAlgorithm;
use crate::keytransport::{KeyTransportAlgorithm, OaepParams};
use crate::keywrap::KeyWrapAlgorithm;
use crate::sign::SignatureAlgorithm;

/// Central registry for all cryptographic algorithms.
pub struct AlgorithmRegistry;

impl AlgorithmRegistry {
    /// Look up a digest algorithm by URI.
    pub fn digest(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
        crate::digest::from_uri(uri)
    }

    /// Look up a signature algorithm by URI.
    pub fn signature(uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
        crate::sign::from_uri(uri)
    }

    /// Look up a block cipher by URI with the given mode and padding.
    pub fn cipher(
        uri: &str,
        mode: CipherMode,
        padding: PaddingMode,
    ) -> Result<Box<dyn CipherAlgorithm>, Error> {
        crate::cipher::from_uri_with(uri, mode, padding)
    }

    /// Look up a key wrap algorithm by URI.
    pub fn key_wrap(uri: &str) -> Result<Box<dyn KeyWrapAlgorithm>, Error> {
        crate::keywrap::from_uri(uri)
    }

    /// Look up a key transport algorithm by URI.
    pub fn key_transport(
        uri: &str,
        params: OaepParams,
    ) -> Result<Box<dyn KeyTransportAlgorithm>, Error> {
        crate::keytransport::from_uri_with_params(uri, params)
    }
}

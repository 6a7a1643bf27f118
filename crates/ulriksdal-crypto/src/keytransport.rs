#![forbid(unsafe_code)]

//! Key transport algorithms (RSA PKCS#1 v1.5, RSA-OAEP).

use ulriksdal_core::{algorithm, Error};

/// Trait for key transport algorithms.
pub trait KeyTransportAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn encrypt(&self, public_key: &rsa::RsaPublicKey, key_data: &[u8]) -> Result<Vec<u8>, Error>;
    fn decrypt(&self, private_key: &rsa::RsaPrivateKey, encrypted: &[u8]) -> Result<Vec<u8>, Error>;
}

/// RSA-OAEP parameters carried by `EncryptionMethod`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OaepParams {
    /// `DigestMethod` URI; SHA-1 when absent.
    pub digest_uri: Option<String>,
    /// Decoded `OAEPparams` label.
    pub label: Option<Vec<u8>>,
}

/// Create a key transport algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn KeyTransportAlgorithm>, Error> {
    from_uri_with_params(uri, OaepParams::default())
}

/// Create a key transport algorithm from its URI with RSA-OAEP parameters.
pub fn from_uri_with_params(
    uri: &str,
    params: OaepParams,
) -> Result<Box<dyn KeyTransportAlgorithm>, Error> {
    match uri {
        algorithm::RSA_PKCS1 => Ok(Box::new(RsaPkcs1Transport)),
        algorithm::RSA_OAEP => {
            let digest = OaepDigest::from_uri(params.digest_uri.as_deref())?;
            Ok(Box::new(RsaOaepTransport {
                digest,
                label: params.label,
            }))
        }
        _ => Err(Error::UnsupportedAlgorithm(format!("key transport: {uri}"))),
    }
}

/// Returns true when `uri` names an RSA key transport algorithm.
pub fn is_key_transport(uri: &str) -> bool {
    matches!(uri, algorithm::RSA_PKCS1 | algorithm::RSA_OAEP)
}

struct RsaPkcs1Transport;

impl KeyTransportAlgorithm for RsaPkcs1Transport {
    fn uri(&self) -> &'static str {
        algorithm::RSA_PKCS1
    }

    fn encrypt(&self, public_key: &rsa::RsaPublicKey, key_data: &[u8]) -> Result<Vec<u8>, Error> {
        use rsa::Pkcs1v15Encrypt;
        public_key
            .encrypt(&mut rand::thread_rng(), Pkcs1v15Encrypt, key_data)
            .map_err(|e| Error::Crypto(format!("RSA PKCS#1 encrypt: {e}")))
    }

    fn decrypt(&self, private_key: &rsa::RsaPrivateKey, encrypted: &[u8]) -> Result<Vec<u8>, Error> {
        use rsa::Pkcs1v15Encrypt;
        private_key
            .decrypt(Pkcs1v15Encrypt, encrypted)
            .map_err(|e| Error::Crypto(format!("RSA PKCS#1 decrypt: {e}")))
    }
}

#[derive(Debug, Clone, Copy)]
enum OaepDigest {
    Sha1,
    Sha256,
}

impl OaepDigest {
    fn from_uri(uri: Option<&str>) -> Result<Self, Error> {
        match uri {
            None | Some(algorithm::SHA1) => Ok(Self::Sha1),
            Some(algorithm::SHA256) => Ok(Self::Sha256),
            Some(other) => Err(Error::UnsupportedAlgorithm(format!(
                "RSA-OAEP digest: {other}"
            ))),
        }
    }
}

/// `rsa-oaep-mgf1p`: MGF1 is always SHA-1, the digest follows `DigestMethod`.
struct RsaOaepTransport {
    digest: OaepDigest,
    label: Option<Vec<u8>>,
}

impl RsaOaepTransport {
    fn padding(&self) -> rsa::Oaep {
        let mut padding = match self.digest {
            OaepDigest::Sha1 => rsa::Oaep::new_with_mgf_hash::<sha1::Sha1, sha1::Sha1>(),
            OaepDigest::Sha256 => rsa::Oaep::new_with_mgf_hash::<sha2::Sha256, sha1::Sha1>(),
        };
        if let Some(label) = &self.label {
            padding.label = Some(String::from_utf8_lossy(label).into_owned());
        }
        padding
    }
}

impl KeyTransportAlgorithm for RsaOaepTransport {
    fn uri(&self) -> &'static str {
        algorithm::RSA_OAEP
    }

    fn encrypt(&self, public_key: &rsa::RsaPublicKey, key_data: &[u8]) -> Result<Vec<u8>, Error> {
        public_key
            .encrypt(&mut rand::thread_rng(), self.padding(), key_data)
            .map_err(|e| Error::Crypto(format!("RSA-OAEP encrypt: {e}")))
    }

    fn decrypt(&self, private_key: &rsa::RsaPrivateKey, encrypted: &[u8]) -> Result<Vec<u8>, Error> {
        private_key
            .decrypt(self.padding(), encrypted)
            .map_err(|e| Error::Crypto(format!("RSA-OAEP decrypt: {e}")))
    }
}

#![forbid(unsafe_code)]

//! Key types and data structures.

use ulriksdal_core::{algorithm, Error};
use ulriksdal_crypto::sign::SigningKey;

/// Usage flags for a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyUsage {
    Sign,
    Verify,
    Encrypt,
    Decrypt,
    Any,
}

/// The underlying key data.
#[derive(Clone)]
pub enum KeyData {
    Rsa {
        private: Option<rsa::RsaPrivateKey>,
        public: rsa::RsaPublicKey,
    },
    Dsa {
        private: Option<dsa::SigningKey>,
        public: dsa::VerifyingKey,
    },
    Hmac(Vec<u8>),
    Aes(Vec<u8>),
    Des3(Vec<u8>),
    Des(Vec<u8>),
}

impl std::fmt::Debug for KeyData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Rsa { private, .. } => {
                if private.is_some() {
                    write!(f, "RSA private+public key")
                } else {
                    write!(f, "RSA public key")
                }
            }
            Self::Dsa { private, .. } => {
                if private.is_some() {
                    write!(f, "DSA private+public key")
                } else {
                    write!(f, "DSA public key")
                }
            }
            Self::Hmac(k) => write!(f, "HMAC key ({} bytes)", k.len()),
            Self::Aes(k) => write!(f, "AES key ({} bytes)", k.len()),
            Self::Des3(_) => write!(f, "3DES key"),
            Self::Des(_) => write!(f, "DES key"),
        }
    }
}

/// A named key with associated data.
#[derive(Debug, Clone)]
pub struct Key {
    /// Optional name for key lookup.
    pub name: Option<String>,
    /// The key data.
    pub data: KeyData,
    /// The intended usage.
    pub usage: KeyUsage,
    /// X.509 certificates the key was taken from (DER, leaf first).
    pub x509_chain: Vec<Vec<u8>>,
}

impl Key {
    /// Create a new key.
    pub fn new(data: KeyData, usage: KeyUsage) -> Self {
        Self {
            name: None,
            data,
            usage,
            x509_chain: Vec::new(),
        }
    }

    /// Set the key name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Convert to a `SigningKey` for use with crypto algorithms.
    pub fn to_signing_key(&self) -> Option<SigningKey> {
        match &self.data {
            KeyData::Rsa { private: Some(pk), .. } => Some(SigningKey::Rsa(pk.clone())),
            KeyData::Rsa { public, .. } => Some(SigningKey::RsaPublic(public.clone())),
            KeyData::Dsa { private: Some(sk), .. } => Some(SigningKey::Dsa(sk.clone())),
            KeyData::Dsa { public, .. } => Some(SigningKey::DsaPublic(public.clone())),
            // Any symmetric key can key an HMAC.
            KeyData::Hmac(k) | KeyData::Aes(k) | KeyData::Des3(k) | KeyData::Des(k) => {
                Some(SigningKey::Hmac(k.clone()))
            }
        }
    }

    /// Get the raw symmetric key bytes.
    pub fn symmetric_key_bytes(&self) -> Option<&[u8]> {
        match &self.data {
            KeyData::Hmac(k) | KeyData::Aes(k) | KeyData::Des3(k) | KeyData::Des(k) => Some(k),
            _ => None,
        }
    }

    pub fn is_symmetric(&self) -> bool {
        self.symmetric_key_bytes().is_some()
    }

    /// Get the RSA public key if available.
    pub fn rsa_public_key(&self) -> Option<&rsa::RsaPublicKey> {
        match &self.data {
            KeyData::Rsa { public, .. } => Some(public),
            _ => None,
        }
    }

    /// Get the RSA private key if available.
    pub fn rsa_private_key(&self) -> Option<&rsa::RsaPrivateKey> {
        match &self.data {
            KeyData::Rsa { private: Some(pk), .. } => Some(pk),
            _ => None,
        }
    }

    /// The key wrap algorithm this key uses as a key-encryption key.
    ///
    /// 3DES keys wrap with the CMS TripleDES key wrap, AES keys with the AES
    /// key wrap matching their length. RSA keys transport rather than wrap.
    pub fn key_wrap_uri(&self) -> Result<&'static str, Error> {
        match &self.data {
            KeyData::Des3(_) => Ok(algorithm::KW_TRIPLEDES),
            KeyData::Aes(k) => ulriksdal_crypto::keywrap::aes_uri_for_kek(k.len()),
            other => Err(Error::Key(format!("{other:?} cannot wrap keys"))),
        }
    }

    /// The block cipher URI matching a symmetric key, used when it encrypts data directly.
    pub fn block_cipher_uri(&self) -> Result<&'static str, Error> {
        match &self.data {
            KeyData::Des(_) => Ok(algorithm::DES_CBC),
            KeyData::Des3(_) => Ok(algorithm::TRIPLEDES_CBC),
            KeyData::Aes(k) => match k.len() {
                16 => Ok(algorithm::AES128_CBC),
                24 => Ok(algorithm::AES192_CBC),
                32 => Ok(algorithm::AES256_CBC),
                n => Err(Error::Key(format!("invalid AES key size: {n}"))),
            },
            other => Err(Error::Key(format!("{other:?} is not a block cipher key"))),
        }
    }

    /// Build a symmetric key from unwrapped bytes for the given block cipher URI.
    pub fn from_symmetric(uri: &str, bytes: Vec<u8>) -> Result<Self, Error> {
        let data = match uri {
            algorithm::DES_CBC => KeyData::Des(bytes),
            algorithm::TRIPLEDES_CBC | algorithm::KW_TRIPLEDES => KeyData::Des3(bytes),
            algorithm::AES128_CBC
            | algorithm::AES192_CBC
            | algorithm::AES256_CBC
            | algorithm::KW_AES128
            | algorithm::KW_AES192
            | algorithm::KW_AES256 => KeyData::Aes(bytes),
            _ if algorithm::is_hmac(uri) => KeyData::Hmac(bytes),
            _ => return Err(Error::UnsupportedAlgorithm(format!("symmetric key for {uri}"))),
        };
        Ok(Key::new(data, KeyUsage::Any))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_wrap_uri_by_type_and_size() {
        let aes = Key::new(KeyData::Aes(vec![0; 24]), KeyUsage::Any);
        assert_eq!(aes.key_wrap_uri().unwrap(), algorithm::KW_AES192);
        let des3 = Key::new(KeyData::Des3(vec![0; 24]), KeyUsage::Any);
        assert_eq!(des3.key_wrap_uri().unwrap(), algorithm::KW_TRIPLEDES);
        let hmac = Key::new(KeyData::Hmac(vec![0; 24]), KeyUsage::Any);
        assert!(hmac.key_wrap_uri().is_err());
    }

    #[test]
    fn test_from_symmetric() {
        let key = Key::from_symmetric(algorithm::TRIPLEDES_CBC, vec![1; 24]).unwrap();
        assert!(matches!(key.data, KeyData::Des3(_)));
        assert_eq!(key.block_cipher_uri().unwrap(), algorithm::TRIPLEDES_CBC);
        let key = Key::from_symmetric(algorithm::AES256_CBC, vec![1; 32]).unwrap();
        assert_eq!(key.block_cipher_uri().unwrap(), algorithm::AES256_CBC);
        assert!(Key::from_symmetric(algorithm::RSA_PKCS1, vec![1; 16]).is_err());
    }

    #[test]
    fn test_symmetric_key_signs_as_hmac() {
        let key = Key::new(KeyData::Aes(vec![7; 16]), KeyUsage::Any).with_name("k");
        assert_eq!(key.name.as_deref(), Some("k"));
        assert!(matches!(key.to_signing_key(), Some(SigningKey::Hmac(_))));
    }
}

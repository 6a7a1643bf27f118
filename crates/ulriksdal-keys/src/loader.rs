#![forbid(unsafe_code)]

//! Key loading from PEM, DER and raw binary.

use crate::key::{Key, KeyData, KeyUsage};
use ulriksdal_core::Error;

fn pem_str(pem_data: &[u8]) -> Result<&str, Error> {
    std::str::from_utf8(pem_data).map_err(|e| Error::Key(format!("invalid PEM encoding: {e}")))
}

fn rsa_private(pk: rsa::RsaPrivateKey) -> Key {
    let public = pk.to_public_key();
    Key::new(
        KeyData::Rsa {
            private: Some(pk),
            public,
        },
        KeyUsage::Any,
    )
}

fn rsa_public(pk: rsa::RsaPublicKey) -> Key {
    Key::new(
        KeyData::Rsa {
            private: None,
            public: pk,
        },
        KeyUsage::Verify,
    )
}

/// Load an RSA private key from PEM data, PKCS#8 or PKCS#1.
pub fn load_rsa_private_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs1::DecodeRsaPrivateKey;
    use pkcs8::DecodePrivateKey;
    let pem = pem_str(pem_data)?;

    if let Ok(pk) = rsa::RsaPrivateKey::from_pkcs8_pem(pem) {
        return Ok(rsa_private(pk));
    }
    let pk = rsa::RsaPrivateKey::from_pkcs1_pem(pem)
        .map_err(|e| Error::Key(format!("failed to parse RSA private key PEM: {e}")))?;
    Ok(rsa_private(pk))
}

/// Load an RSA public key from PEM data, SubjectPublicKeyInfo or PKCS#1.
pub fn load_rsa_public_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs1::DecodeRsaPublicKey;
    use pkcs8::DecodePublicKey;
    let pem = pem_str(pem_data)?;

    if let Ok(pk) = rsa::RsaPublicKey::from_public_key_pem(pem) {
        return Ok(rsa_public(pk));
    }
    let pk = rsa::RsaPublicKey::from_pkcs1_pem(pem)
        .map_err(|e| Error::Key(format!("failed to parse RSA public key PEM: {e}")))?;
    Ok(rsa_public(pk))
}

/// Load a DSA private key from PKCS#8 PEM.
pub fn load_dsa_private_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use pkcs8::DecodePrivateKey;
    let sk = dsa::SigningKey::from_pkcs8_pem(pem_str(pem_data)?)
        .map_err(|e| Error::Key(format!("failed to parse DSA private key PEM: {e}")))?;
    let public = sk.verifying_key().clone();
    Ok(Key::new(
        KeyData::Dsa {
            private: Some(sk),
            public,
        },
        KeyUsage::Any,
    ))
}

/// Load an HMAC key from raw binary data.
pub fn load_hmac_key(data: &[u8]) -> Key {
    Key::new(KeyData::Hmac(data.to_vec()), KeyUsage::Any)
}

/// Load an AES key from raw binary data.
pub fn load_aes_key(data: &[u8]) -> Result<Key, Error> {
    match data.len() {
        16 | 24 | 32 => Ok(Key::new(KeyData::Aes(data.to_vec()), KeyUsage::Any)),
        n => Err(Error::Key(format!(
            "invalid AES key size: {n} (expected 16, 24, or 32)"
        ))),
    }
}

/// Load a 3DES key from raw binary data.
pub fn load_des3_key(data: &[u8]) -> Result<Key, Error> {
    if data.len() != 24 {
        return Err(Error::Key(format!(
            "invalid 3DES key size: {} (expected 24)",
            data.len()
        )));
    }
    Ok(Key::new(KeyData::Des3(data.to_vec()), KeyUsage::Any))
}

pub fn load_des_key(data: &[u8]) -> Result<Key, Error> {
    if data.len() != 8 {
        return Err(Error::Key(format!(
            "invalid DES key size: {} (expected 8)",
            data.len()
        )));
    }
    Ok(Key::new(KeyData::Des(data.to_vec()), KeyUsage::Any))
}

/// Load the public key of a PEM-encoded X.509 certificate.
pub fn load_x509_cert_pem(pem_data: &[u8]) -> Result<Key, Error> {
    use der::{DecodePem, Encode};
    let cert = x509_cert::Certificate::from_pem(pem_str(pem_data)?.trim().as_bytes())
        .map_err(|e| Error::Key(format!("failed to decode certificate PEM: {e}")))?;
    let der = cert
        .to_der()
        .map_err(|e| Error::Key(format!("failed to encode certificate: {e}")))?;
    load_x509_cert_der(&der)
}

/// Load the public key of a DER-encoded X.509 certificate.
///
/// The certificate itself becomes the key's one-element `x509_chain`.
pub fn load_x509_cert_der(data: &[u8]) -> Result<Key, Error> {
    use der::{Decode, Encode};

    let cert = x509_cert::Certificate::from_der(data)
        .map_err(|e| Error::Key(format!("failed to parse X.509 certificate: {e}")))?;
    let spki_der = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| Error::Key(format!("failed to encode SPKI: {e}")))?;

    let mut key = load_spki_der(&spki_der)
        .map_err(|_| Error::Key("unsupported public key algorithm in X.509 certificate".into()))?;
    key.x509_chain = vec![data.to_vec()];
    Ok(key)
}

/// Load a public key from raw SubjectPublicKeyInfo DER bytes. RSA and DSA are recognized.
pub fn load_spki_der(spki_der: &[u8]) -> Result<Key, Error> {
    use der::Decode;
    use spki::DecodePublicKey;

    if let Ok(pk) = rsa::RsaPublicKey::from_public_key_der(spki_der) {
        return Ok(rsa_public(pk));
    }
    if let Ok(spki_ref) = spki::SubjectPublicKeyInfoRef::from_der(spki_der) {
        if let Ok(vk) = dsa::VerifyingKey::try_from(spki_ref) {
            return Ok(Key::new(
                KeyData::Dsa {
                    private: None,
                    public: vk,
                },
                KeyUsage::Verify,
            ));
        }
    }
    Err(Error::Key("unsupported public key algorithm in SPKI DER".into()))
}

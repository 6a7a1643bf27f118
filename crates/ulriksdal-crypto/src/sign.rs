#![forbid(unsafe_code)]

//! Signature algorithm implementations (RSA PKCS#1 v1.5, DSA, HMAC).

use signature::SignatureEncoding;
use ulriksdal_core::{algorithm, Error};

/// Key material for signature operations.
pub enum SigningKey {
    Rsa(rsa::RsaPrivateKey),
    RsaPublic(rsa::RsaPublicKey),
    Dsa(dsa::SigningKey),
    DsaPublic(dsa::VerifyingKey),
    Hmac(Vec<u8>),
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Rsa(_) => "Rsa",
            Self::RsaPublic(_) => "RsaPublic",
            Self::Dsa(_) => "Dsa",
            Self::DsaPublic(_) => "DsaPublic",
            Self::Hmac(_) => "Hmac",
        };
        write!(f, "SigningKey::{name}(..)")
    }
}

/// Trait for signature algorithms.
pub trait SignatureAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error>;
    fn verify(&self, key: &SigningKey, data: &[u8], signature: &[u8]) -> Result<bool, Error>;
}

/// Create a signature algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn SignatureAlgorithm>, Error> {
    match uri {
        algorithm::RSA_SHA1 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA1, hash: HashType::Sha1 })),
        algorithm::RSA_SHA256 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA256, hash: HashType::Sha256 })),
        algorithm::RSA_SHA384 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA384, hash: HashType::Sha384 })),
        algorithm::RSA_SHA512 => Ok(Box::new(RsaPkcs1v15 { uri: algorithm::RSA_SHA512, hash: HashType::Sha512 })),

        algorithm::DSA_SHA1 => Ok(Box::new(DsaSha1)),

        algorithm::HMAC_SHA1 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA1, hash: HashType::Sha1 })),
        algorithm::HMAC_SHA256 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA256, hash: HashType::Sha256 })),
        algorithm::HMAC_SHA384 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA384, hash: HashType::Sha384 })),
        algorithm::HMAC_SHA512 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_SHA512, hash: HashType::Sha512 })),
        algorithm::HMAC_MD5 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_MD5, hash: HashType::Md5 })),
        algorithm::HMAC_RIPEMD160 => Ok(Box::new(HmacSign { uri: algorithm::HMAC_RIPEMD160, hash: HashType::Ripemd160 })),

        _ => Err(Error::UnsupportedAlgorithm(format!("signature algorithm: {uri}"))),
    }
}

/// Native output size in bits of an HMAC signature method, `None` if `uri`
/// is not an HMAC.
pub fn hmac_native_bits(uri: &str) -> Option<usize> {
    match uri {
        algorithm::HMAC_SHA1 | algorithm::HMAC_RIPEMD160 => Some(160),
        algorithm::HMAC_SHA256 => Some(256),
        algorithm::HMAC_SHA384 => Some(384),
        algorithm::HMAC_SHA512 => Some(512),
        algorithm::HMAC_MD5 => Some(128),
        _ => None,
    }
}

/// Cut a MAC down to `bits`.
///
/// `bits` must be a multiple of 8 and no larger than the MAC itself.
pub fn truncate_mac(mut mac: Vec<u8>, bits: usize) -> Result<Vec<u8>, Error> {
    if bits % 8 != 0 {
        return Err(Error::Crypto(format!(
            "HMAC output length {bits} is not a multiple of 8"
        )));
    }
    if bits > mac.len() * 8 {
        return Err(Error::Crypto(format!(
            "HMAC output length {bits} exceeds the {} bit hash size",
            mac.len() * 8
        )));
    }
    mac.truncate(bits / 8);
    Ok(mac)
}

/// Compare two byte strings without exiting early on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[derive(Debug, Clone, Copy)]
enum HashType { Sha1, Sha256, Sha384, Sha512, Md5, Ripemd160 }

// ── RSA PKCS#1 v1.5 ─────────────────────────────────────────────────

struct RsaPkcs1v15 { uri: &'static str, hash: HashType }

impl RsaPkcs1v15 {
    fn sign_with_key(&self, private_key: &rsa::RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        use signature::Signer;
        macro_rules! do_sign {
            ($hasher:ty) => {{
                let sk = rsa::pkcs1v15::SigningKey::<$hasher>::new(private_key.clone());
                let sig = sk
                    .try_sign(data)
                    .map_err(|e| Error::Crypto(format!("RSA sign: {e}")))?;
                Ok(sig.to_vec())
            }};
        }
        match self.hash {
            HashType::Sha1 => do_sign!(sha1::Sha1),
            HashType::Sha256 => do_sign!(sha2::Sha256),
            HashType::Sha384 => do_sign!(sha2::Sha384),
            HashType::Sha512 => do_sign!(sha2::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!("RSA with {other:?}"))),
        }
    }

    fn verify_with_key(&self, public_key: &rsa::RsaPublicKey, data: &[u8], sig_bytes: &[u8]) -> Result<bool, Error> {
        use signature::Verifier;
        let Ok(sig) = rsa::pkcs1v15::Signature::try_from(sig_bytes) else {
            return Ok(false);
        };
        macro_rules! do_verify {
            ($hasher:ty) => {{
                let vk = rsa::pkcs1v15::VerifyingKey::<$hasher>::new(public_key.clone());
                Ok(vk.verify(data, &sig).is_ok())
            }};
        }
        match self.hash {
            HashType::Sha1 => do_verify!(sha1::Sha1),
            HashType::Sha256 => do_verify!(sha2::Sha256),
            HashType::Sha384 => do_verify!(sha2::Sha384),
            HashType::Sha512 => do_verify!(sha2::Sha512),
            other => Err(Error::UnsupportedAlgorithm(format!("RSA with {other:?}"))),
        }
    }
}

impl SignatureAlgorithm for RsaPkcs1v15 {
    fn uri(&self) -> &'static str { self.uri }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        match key {
            SigningKey::Rsa(pk) => self.sign_with_key(pk, data),
            _ => Err(Error::Key("RSA private key required".into())),
        }
    }

    fn verify(&self, key: &SigningKey, data: &[u8], sig_bytes: &[u8]) -> Result<bool, Error> {
        let pubk = match key {
            SigningKey::Rsa(pk) => pk.to_public_key(),
            SigningKey::RsaPublic(pk) => pk.clone(),
            _ => return Err(Error::Key("RSA key required".into())),
        };
        self.verify_with_key(&pubk, data, sig_bytes)
    }
}

// ── DSA-SHA1 ─────────────────────────────────────────────────────────

struct DsaSha1;

/// Width of one DSA signature component in the XML-DSig `r || s` form.
const DSA_COMPONENT_LEN: usize = 20;

/// Convert a DSA signature to the fixed-width XML-DSig `r || s` form.
pub fn dsa_to_xmldsig(sig: &dsa::Signature) -> Result<Vec<u8>, Error> {
    let mut out = Vec::with_capacity(2 * DSA_COMPONENT_LEN);
    for part in [sig.r(), sig.s()] {
        let bytes = part.to_bytes_be();
        if bytes.len() > DSA_COMPONENT_LEN {
            return Err(Error::Crypto("DSA signature component too large".into()));
        }
        out.extend(std::iter::repeat(0u8).take(DSA_COMPONENT_LEN - bytes.len()));
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

/// Parse the XML-DSig `r || s` form.
pub fn xmldsig_to_dsa(rs: &[u8]) -> Result<dsa::Signature, Error> {
    if rs.len() != 2 * DSA_COMPONENT_LEN {
        return Err(Error::Crypto(format!(
            "DSA signature must be {} bytes, got {}",
            2 * DSA_COMPONENT_LEN,
            rs.len()
        )));
    }
    let r = dsa::BigUint::from_bytes_be(&rs[..DSA_COMPONENT_LEN]);
    let s = dsa::BigUint::from_bytes_be(&rs[DSA_COMPONENT_LEN..]);
    dsa::Signature::from_components(r, s)
        .map_err(|e| Error::Crypto(format!("invalid DSA signature: {e}")))
}

impl SignatureAlgorithm for DsaSha1 {
    fn uri(&self) -> &'static str { algorithm::DSA_SHA1 }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        use sha1::Digest;
        use signature::DigestSigner;
        let SigningKey::Dsa(sk) = key else {
            return Err(Error::Key("DSA private key required".into()));
        };
        let sig: dsa::Signature = sk
            .try_sign_digest(sha1::Sha1::new_with_prefix(data))
            .map_err(|e| Error::Crypto(format!("DSA sign: {e}")))?;
        dsa_to_xmldsig(&sig)
    }

    fn verify(&self, key: &SigningKey, data: &[u8], sig_bytes: &[u8]) -> Result<bool, Error> {
        use sha1::Digest;
        use signature::DigestVerifier;
        let vk = match key {
            SigningKey::Dsa(sk) => sk.verifying_key().clone(),
            SigningKey::DsaPublic(vk) => vk.clone(),
            _ => return Err(Error::Key("DSA key required".into())),
        };
        let Ok(sig) = xmldsig_to_dsa(sig_bytes) else {
            return Ok(false);
        };
        Ok(vk
            .verify_digest(sha1::Sha1::new_with_prefix(data), &sig)
            .is_ok())
    }
}

// ── HMAC ─────────────────────────────────────────────────────────────

struct HmacSign { uri: &'static str, hash: HashType }

impl SignatureAlgorithm for HmacSign {
    fn uri(&self) -> &'static str { self.uri }

    fn sign(&self, key: &SigningKey, data: &[u8]) -> Result<Vec<u8>, Error> {
        let SigningKey::Hmac(key_bytes) = key else {
            return Err(Error::Key("HMAC key required".into()));
        };
        compute_hmac(self.hash, key_bytes, data)
    }

    /// Full-length comparison. A declared `HMACOutputLength` is enforced
    /// before this is reached.
    fn verify(&self, key: &SigningKey, data: &[u8], sig_bytes: &[u8]) -> Result<bool, Error> {
        let SigningKey::Hmac(key_bytes) = key else {
            return Err(Error::Key("HMAC key required".into()));
        };
        let expected = compute_hmac(self.hash, key_bytes, data)?;
        Ok(constant_time_eq(&expected, sig_bytes))
    }
}

fn compute_hmac(hash: HashType, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
    use hmac::{Hmac, Mac};
    macro_rules! hmac_compute {
        ($hasher:ty) => {{
            let mut mac = <Hmac<$hasher>>::new_from_slice(key)
                .map_err(|e| Error::Key(format!("HMAC key: {e}")))?;
            mac.update(data);
            Ok(mac.finalize().into_bytes().to_vec())
        }};
    }
    match hash {
        HashType::Sha1 => hmac_compute!(sha1::Sha1),
        HashType::Sha256 => hmac_compute!(sha2::Sha256),
        HashType::Sha384 => hmac_compute!(sha2::Sha384),
        HashType::Sha512 => hmac_compute!(sha2::Sha512),
        HashType::Md5 => hmac_compute!(md5::Md5),
        HashType::Ripemd160 => hmac_compute!(ripemd::Ripemd160),
    }
}

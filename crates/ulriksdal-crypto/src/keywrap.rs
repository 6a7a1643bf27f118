#![forbid(unsafe_code)]

//! Key wrap algorithms (AES-KW per RFC 3394, 3DES-KW per RFC 3217).

use aes_kw::Kek;
use rand::RngCore;
use ulriksdal_core::{algorithm, Error};

use crate::cipher::{self, CipherMode, PaddingMode};

/// Trait for key wrap algorithms.
pub trait KeyWrapAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>, Error>;
    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, Error>;
    fn kek_size(&self) -> usize;
}

/// Create a key wrap algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn KeyWrapAlgorithm>, Error> {
    match uri {
        algorithm::KW_AES128 => Ok(Box::new(AesKeyWrap { kek_size: 16, uri: algorithm::KW_AES128 })),
        algorithm::KW_AES192 => Ok(Box::new(AesKeyWrap { kek_size: 24, uri: algorithm::KW_AES192 })),
        algorithm::KW_AES256 => Ok(Box::new(AesKeyWrap { kek_size: 32, uri: algorithm::KW_AES256 })),
        algorithm::KW_TRIPLEDES => Ok(Box::new(TripleDesKeyWrap)),
        _ => Err(Error::UnsupportedAlgorithm(format!("key wrap: {uri}"))),
    }
}

/// AES key wrap URI matching an AES key-encryption key of `len` bytes.
pub fn aes_uri_for_kek(len: usize) -> Result<&'static str, Error> {
    match len {
        16 => Ok(algorithm::KW_AES128),
        24 => Ok(algorithm::KW_AES192),
        32 => Ok(algorithm::KW_AES256),
        _ => Err(Error::Key(format!("no AES key wrap for a {len} byte key"))),
    }
}

/// Returns true when `uri` names a symmetric key wrap algorithm.
pub fn is_key_wrap(uri: &str) -> bool {
    matches!(
        uri,
        algorithm::KW_AES128 | algorithm::KW_AES192 | algorithm::KW_AES256 | algorithm::KW_TRIPLEDES
    )
}

struct AesKeyWrap {
    kek_size: usize,
    uri: &'static str,
}

impl AesKeyWrap {
    fn check_kek(&self, kek: &[u8]) -> Result<(), Error> {
        if kek.len() != self.kek_size {
            return Err(Error::Crypto(format!(
                "expected {} byte KEK, got {}",
                self.kek_size,
                kek.len()
            )));
        }
        Ok(())
    }
}

impl KeyWrapAlgorithm for AesKeyWrap {
    fn uri(&self) -> &'static str {
        self.uri
    }
    fn kek_size(&self) -> usize {
        self.kek_size
    }

    fn wrap(&self, kek_bytes: &[u8], key_data: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_kek(kek_bytes)?;
        if key_data.len() < 16 || key_data.len() % 8 != 0 {
            return Err(Error::Crypto(format!(
                "AES-KW input must be a multiple of 8 bytes and at least 16, got {}",
                key_data.len()
            )));
        }
        let mut out = vec![0u8; key_data.len() + 8];
        macro_rules! do_wrap {
            ($aes:ty) => {{
                let kek = Kek::<$aes>::new(kek_bytes.into());
                kek.wrap(key_data, &mut out)
                    .map_err(|e| Error::Crypto(format!("AES-KW wrap: {e}")))?;
            }};
        }
        match self.kek_size {
            16 => do_wrap!(aes::Aes128),
            24 => do_wrap!(aes::Aes192),
            _ => do_wrap!(aes::Aes256),
        }
        Ok(out)
    }

    fn unwrap(&self, kek_bytes: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_kek(kek_bytes)?;
        if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
            return Err(Error::Crypto("AES-KW wrapped key has an invalid length".into()));
        }
        let mut out = vec![0u8; wrapped.len() - 8];
        macro_rules! do_unwrap {
            ($aes:ty) => {{
                let kek = Kek::<$aes>::new(kek_bytes.into());
                kek.unwrap(wrapped, &mut out)
                    .map_err(|e| Error::Crypto(format!("AES-KW unwrap: {e}")))?;
            }};
        }
        match self.kek_size {
            16 => do_unwrap!(aes::Aes128),
            24 => do_unwrap!(aes::Aes192),
            _ => do_unwrap!(aes::Aes256),
        }
        Ok(out)
    }
}

/// CMS Triple-DES Key Wrap per RFC 3217.
struct TripleDesKeyWrap;

/// Fixed IV for the outer 3DES-CBC pass.
const TDES_KW_IV: [u8; 8] = [0x4a, 0xdd, 0xa2, 0x2c, 0x79, 0xe8, 0x21, 0x05];

fn cms_checksum(key_data: &[u8]) -> [u8; 8] {
    use sha1::Digest;
    let hash = sha1::Sha1::digest(key_data);
    let mut out = [0u8; 8];
    out.copy_from_slice(&hash[..8]);
    out
}

fn tdes_cbc(kek: &[u8], iv: &[u8], data: &[u8], encrypt: bool) -> Result<Vec<u8>, Error> {
    let cipher = cipher::from_uri_with(algorithm::TRIPLEDES_CBC, CipherMode::Cbc, PaddingMode::None)?;
    if encrypt {
        // Strip the IV prefix; the key wrap lays out its own.
        let out = cipher.encrypt_with_iv(kek, iv, data)?;
        Ok(out[iv.len()..].to_vec())
    } else {
        cipher.decrypt_with_iv(kek, iv, data)
    }
}

impl KeyWrapAlgorithm for TripleDesKeyWrap {
    fn uri(&self) -> &'static str {
        algorithm::KW_TRIPLEDES
    }
    fn kek_size(&self) -> usize {
        24
    }

    fn wrap(&self, kek: &[u8], key_data: &[u8]) -> Result<Vec<u8>, Error> {
        if key_data.len() % 8 != 0 {
            return Err(Error::Crypto("3DES-KW input must be a multiple of 8 bytes".into()));
        }
        let mut wkcks = key_data.to_vec();
        wkcks.extend_from_slice(&cms_checksum(key_data));

        let mut iv = [0u8; 8];
        rand::thread_rng().fill_bytes(&mut iv);
        let inner = tdes_cbc(kek, &iv, &wkcks, true)?;

        let mut temp = Vec::with_capacity(8 + inner.len());
        temp.extend_from_slice(&iv);
        temp.extend_from_slice(&inner);
        temp.reverse();

        tdes_cbc(kek, &TDES_KW_IV, &temp, true)
    }

    fn unwrap(&self, kek: &[u8], wrapped: &[u8]) -> Result<Vec<u8>, Error> {
        if wrapped.len() < 24 || wrapped.len() % 8 != 0 {
            return Err(Error::Crypto("3DES-KW wrapped key has an invalid length".into()));
        }
        let mut temp = tdes_cbc(kek, &TDES_KW_IV, wrapped, false)?;
        temp.reverse();
        let (iv, inner) = temp.split_at(8);
        let wkcks = tdes_cbc(kek, iv, inner, false)?;

        let (key_data, checksum) = wkcks.split_at(wkcks.len() - 8);
        if !crate::sign::constant_time_eq(checksum, &cms_checksum(key_data)) {
            return Err(Error::Crypto("3DES-KW: key checksum verification failed".into()));
        }
        Ok(key_data.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tdes_key_wrap_roundtrip() {
        let kek: Vec<u8> = (1..=24).collect();
        let key_data: Vec<u8> = (0xa1..=0xb8).collect();
        let kw = from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let wrapped = kw.wrap(&kek, &key_data).unwrap();
        assert_eq!(wrapped.len(), key_data.len() + 16);
        assert_eq!(kw.unwrap(&kek, &wrapped).unwrap(), key_data);
    }

    #[test]
    fn test_tdes_key_wrap_detects_tampering() {
        let kek = [0x5au8; 24];
        let kw = from_uri(algorithm::KW_TRIPLEDES).unwrap();
        let mut wrapped = kw.wrap(&kek, &[0x33u8; 16]).unwrap();
        wrapped[10] ^= 1;
        assert!(kw.unwrap(&kek, &wrapped).is_err());
    }

    fn aes_kw_vector(kek: &str, pt: &str, ct: &str) {
        let kek = hex::decode(kek).unwrap();
        let pt = hex::decode(pt).unwrap();
        let ct = hex::decode(ct).unwrap();
        let kw = from_uri(aes_uri_for_kek(kek.len()).unwrap()).unwrap();
        assert_eq!(kw.wrap(&kek, &pt).unwrap(), ct);
        assert_eq!(kw.unwrap(&kek, &ct).unwrap(), pt);
    }

    #[test]
    fn test_rfc3394_aes128_kek() {
        aes_kw_vector(
            "000102030405060708090A0B0C0D0E0F",
            "00112233445566778899AABBCCDDEEFF",
            "1FA68B0A8112B447AEF34BD8FB5A7B829D3E862371D2CFE5",
        );
    }

    #[test]
    fn test_rfc3394_aes256_kek_256_bit_data() {
        aes_kw_vector(
            "000102030405060708090A0B0C0D0E0F101112131415161718191A1B1C1D1E1F",
            "00112233445566778899AABBCCDDEEFF000102030405060708090A0B0C0D0E0F",
            "28C9F404C4B810F4CBCCB35CFB87F8263F5786E2D80ED326CBC7F0E71A99F43BFB988B9B7A02DD21",
        );
    }

    #[test]
    fn test_aes_kw_integrity_failure() {
        let kek = [0x01u8; 16];
        let kw = from_uri(algorithm::KW_AES128).unwrap();
        let mut wrapped = kw.wrap(&kek, &[0x22u8; 32]).unwrap();
        wrapped[0] ^= 0xFF;
        assert!(kw.unwrap(&kek, &wrapped).is_err());
    }

    #[test]
    fn test_aes_kw_wrong_kek_size() {
        let kw = from_uri(algorithm::KW_AES192).unwrap();
        assert!(kw.wrap(&[0u8; 16], &[0u8; 16]).is_err());
    }

    #[test]
    fn test_is_key_wrap() {
        assert!(is_key_wrap(algorithm::KW_TRIPLEDES));
        assert!(!is_key_wrap(algorithm::RSA_OAEP));
    }
}

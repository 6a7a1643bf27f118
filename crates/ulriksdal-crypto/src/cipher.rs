#![forbid(unsafe_code)]

//! Block cipher algorithm implementations (AES, 3DES and DES in CBC or ECB mode).
//!
//! In CBC mode the IV is generated per encryption and prefixed to the
//! ciphertext; ECB output carries no IV. Padding is applied here rather than
//! by the `cbc` crate because XML Encryption recognizes several schemes.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt, KeyInit};
use rand::RngCore;
use ulriksdal_core::{algorithm, Error};

/// Block chaining mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipherMode {
    #[default]
    Cbc,
    Ecb,
}

/// Block padding scheme.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PaddingMode {
    /// Random filler, last byte holds the pad length.
    #[default]
    Iso10126,
    Pkcs7,
    /// Zero filler, last byte holds the pad length.
    AnsiX923,
    /// Zero filler up to the block boundary; trailing zeros are stripped on decrypt.
    Zeros,
    /// Input must already be block aligned.
    None,
}

/// Trait for cipher algorithms.
pub trait CipherAlgorithm: Send {
    fn uri(&self) -> &'static str;
    fn key_size(&self) -> usize;
    /// Block size, which is also the IV length in CBC mode.
    fn block_size(&self) -> usize;
    fn mode(&self) -> CipherMode;
    /// Encrypt with a fresh random IV (CBC), returning `IV || ciphertext`.
    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    /// Encrypt with a caller-chosen IV, returning `IV || ciphertext` (CBC)
    /// or the bare ciphertext (ECB, `iv` ignored).
    fn encrypt_with_iv(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error>;
    /// Decrypt `IV || ciphertext` (CBC) or a bare ciphertext (ECB).
    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error>;
    /// Decrypt a ciphertext whose IV is supplied separately.
    fn decrypt_with_iv(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error>;
}

/// Create a cipher algorithm from its URI, in CBC mode with ISO 10126 padding.
pub fn from_uri(uri: &str) -> Result<Box<dyn CipherAlgorithm>, Error> {
    from_uri_with(uri, CipherMode::default(), PaddingMode::default())
}

/// Create a cipher algorithm from its URI with an explicit mode and padding.
pub fn from_uri_with(
    uri: &str,
    mode: CipherMode,
    padding: PaddingMode,
) -> Result<Box<dyn CipherAlgorithm>, Error> {
    let kind = CipherKind::from_uri(uri)?;
    Ok(Box::new(SymmetricCipher { kind, mode, padding }))
}

/// IV length for a block cipher URI: 8 bytes for DES/3DES, 16 for AES.
pub fn iv_size(uri: &str) -> Result<usize, Error> {
    Ok(CipherKind::from_uri(uri)?.block_size())
}

/// Key length in bytes for a block cipher URI.
pub fn key_size(uri: &str) -> Result<usize, Error> {
    Ok(CipherKind::from_uri(uri)?.key_size())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CipherKind {
    Des,
    TripleDes,
    Aes128,
    Aes192,
    Aes256,
}

impl CipherKind {
    fn from_uri(uri: &str) -> Result<Self, Error> {
        match uri {
            algorithm::DES_CBC => Ok(Self::Des),
            algorithm::TRIPLEDES_CBC => Ok(Self::TripleDes),
            algorithm::AES128_CBC => Ok(Self::Aes128),
            algorithm::AES192_CBC => Ok(Self::Aes192),
            algorithm::AES256_CBC => Ok(Self::Aes256),
            _ => Err(Error::UnsupportedAlgorithm(format!("cipher: {uri}"))),
        }
    }

    fn uri(self) -> &'static str {
        match self {
            Self::Des => algorithm::DES_CBC,
            Self::TripleDes => algorithm::TRIPLEDES_CBC,
            Self::Aes128 => algorithm::AES128_CBC,
            Self::Aes192 => algorithm::AES192_CBC,
            Self::Aes256 => algorithm::AES256_CBC,
        }
    }

    fn key_size(self) -> usize {
        match self {
            Self::Des => 8,
            Self::TripleDes | Self::Aes192 => 24,
            Self::Aes128 => 16,
            Self::Aes256 => 32,
        }
    }

    fn block_size(self) -> usize {
        match self {
            Self::Des | Self::TripleDes => 8,
            _ => 16,
        }
    }
}

struct SymmetricCipher {
    kind: CipherKind,
    mode: CipherMode,
    padding: PaddingMode,
}

impl SymmetricCipher {
    fn check_key(&self, key: &[u8]) -> Result<(), Error> {
        if key.len() != self.kind.key_size() {
            return Err(Error::Crypto(format!(
                "expected {} byte key, got {}",
                self.kind.key_size(),
                key.len()
            )));
        }
        Ok(())
    }

    fn check_iv(&self, iv: &[u8]) -> Result<(), Error> {
        if self.mode == CipherMode::Cbc && iv.len() != self.kind.block_size() {
            return Err(Error::Crypto(format!(
                "expected {} byte IV, got {}",
                self.kind.block_size(),
                iv.len()
            )));
        }
        Ok(())
    }
}

impl CipherAlgorithm for SymmetricCipher {
    fn uri(&self) -> &'static str {
        self.kind.uri()
    }
    fn key_size(&self) -> usize {
        self.kind.key_size()
    }
    fn block_size(&self) -> usize {
        self.kind.block_size()
    }
    fn mode(&self) -> CipherMode {
        self.mode
    }

    fn encrypt(&self, key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        let mut iv = vec![0u8; self.kind.block_size()];
        rand::thread_rng().fill_bytes(&mut iv);
        self.encrypt_with_iv(key, &iv, plaintext)
    }

    fn encrypt_with_iv(&self, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_key(key)?;
        self.check_iv(iv)?;
        let mut buf = pad(self.padding, plaintext, self.kind.block_size())?;
        match self.kind {
            CipherKind::Des => encrypt_blocks::<des::Des>(key, self.mode, iv, &mut buf)?,
            CipherKind::TripleDes => encrypt_blocks::<des::TdesEde3>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes128 => encrypt_blocks::<aes::Aes128>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes192 => encrypt_blocks::<aes::Aes192>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes256 => encrypt_blocks::<aes::Aes256>(key, self.mode, iv, &mut buf)?,
        }
        if self.mode == CipherMode::Ecb {
            return Ok(buf);
        }
        let mut result = Vec::with_capacity(iv.len() + buf.len());
        result.extend_from_slice(iv);
        result.extend_from_slice(&buf);
        Ok(result)
    }

    fn decrypt(&self, key: &[u8], data: &[u8]) -> Result<Vec<u8>, Error> {
        match self.mode {
            CipherMode::Ecb => self.decrypt_with_iv(key, &[], data),
            CipherMode::Cbc => {
                let bs = self.kind.block_size();
                if data.len() < bs {
                    return Err(Error::Crypto("ciphertext shorter than the IV".into()));
                }
                self.decrypt_with_iv(key, &data[..bs], &data[bs..])
            }
        }
    }

    fn decrypt_with_iv(&self, key: &[u8], iv: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, Error> {
        self.check_key(key)?;
        self.check_iv(iv)?;
        let bs = self.kind.block_size();
        if ciphertext.len() % bs != 0 {
            return Err(Error::Crypto(format!(
                "ciphertext length {} is not a multiple of {bs}",
                ciphertext.len()
            )));
        }
        let mut buf = ciphertext.to_vec();
        match self.kind {
            CipherKind::Des => decrypt_blocks::<des::Des>(key, self.mode, iv, &mut buf)?,
            CipherKind::TripleDes => decrypt_blocks::<des::TdesEde3>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes128 => decrypt_blocks::<aes::Aes128>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes192 => decrypt_blocks::<aes::Aes192>(key, self.mode, iv, &mut buf)?,
            CipherKind::Aes256 => decrypt_blocks::<aes::Aes256>(key, self.mode, iv, &mut buf)?,
        }
        unpad(self.padding, buf, bs)
    }
}

fn encrypt_blocks<C>(key: &[u8], mode: CipherMode, iv: &[u8], buf: &mut [u8]) -> Result<(), Error>
where
    C: BlockCipher + BlockEncrypt + KeyInit,
{
    match mode {
        CipherMode::Cbc => {
            use cbc::cipher::{BlockEncryptMut, KeyIvInit};
            let len = buf.len();
            let enc = cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?;
            enc.encrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(buf, len)
                .map_err(|e| Error::Crypto(format!("CBC encrypt: {e}")))?;
        }
        CipherMode::Ecb => {
            let cipher = C::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("ECB init: {e}")))?;
            for block in buf.chunks_exact_mut(C::block_size()) {
                cipher.encrypt_block(GenericArray::from_mut_slice(block));
            }
        }
    }
    Ok(())
}

fn decrypt_blocks<C>(key: &[u8], mode: CipherMode, iv: &[u8], buf: &mut [u8]) -> Result<(), Error>
where
    C: BlockCipher + BlockDecrypt + KeyInit,
{
    match mode {
        CipherMode::Cbc => {
            use cbc::cipher::{BlockDecryptMut, KeyIvInit};
            let dec = cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| Error::Crypto(format!("CBC init: {e}")))?;
            dec.decrypt_padded_mut::<cbc::cipher::block_padding::NoPadding>(buf)
                .map_err(|e| Error::Crypto(format!("CBC decrypt: {e}")))?;
        }
        CipherMode::Ecb => {
            let cipher = C::new_from_slice(key)
                .map_err(|e| Error::Crypto(format!("ECB init: {e}")))?;
            for block in buf.chunks_exact_mut(C::block_size()) {
                cipher.decrypt_block(GenericArray::from_mut_slice(block));
            }
        }
    }
    Ok(())
}

// ── Padding ──────────────────────────────────────────────────────────

fn pad(mode: PaddingMode, data: &[u8], block_size: usize) -> Result<Vec<u8>, Error> {
    let rem = data.len() % block_size;
    let pad_len = block_size - rem;
    let mut padded = Vec::with_capacity(data.len() + pad_len);
    padded.extend_from_slice(data);
    match mode {
        PaddingMode::Pkcs7 => {
            padded.extend(std::iter::repeat(pad_len as u8).take(pad_len));
        }
        PaddingMode::Iso10126 => {
            let mut filler = vec![0u8; pad_len - 1];
            rand::thread_rng().fill_bytes(&mut filler);
            padded.extend_from_slice(&filler);
            padded.push(pad_len as u8);
        }
        PaddingMode::AnsiX923 => {
            padded.extend(std::iter::repeat(0u8).take(pad_len - 1));
            padded.push(pad_len as u8);
        }
        PaddingMode::Zeros => {
            if rem != 0 {
                padded.extend(std::iter::repeat(0u8).take(pad_len));
            }
        }
        PaddingMode::None => {
            if rem != 0 {
                return Err(Error::Crypto(format!(
                    "input length {} is not a multiple of {block_size} and padding is disabled",
                    data.len()
                )));
            }
        }
    }
    Ok(padded)
}

fn unpad(mode: PaddingMode, mut data: Vec<u8>, block_size: usize) -> Result<Vec<u8>, Error> {
    match mode {
        PaddingMode::None => Ok(data),
        PaddingMode::Zeros => {
            while data.last() == Some(&0) {
                data.pop();
            }
            Ok(data)
        }
        PaddingMode::Iso10126 | PaddingMode::Pkcs7 | PaddingMode::AnsiX923 => {
            let pad_len = match data.last() {
                Some(&b) => b as usize,
                None => return Err(Error::Crypto("invalid padding: no padded block".into())),
            };
            if pad_len == 0 || pad_len > block_size || pad_len > data.len() {
                return Err(Error::Crypto("invalid padding".into()));
            }
            let start = data.len() - pad_len;
            let filler = &data[start..data.len() - 1];
            let ok = match mode {
                PaddingMode::Pkcs7 => filler.iter().all(|&b| b as usize == pad_len),
                PaddingMode::AnsiX923 => filler.iter().all(|&b| b == 0),
                _ => true,
            };
            if !ok {
                return Err(Error::Crypto("invalid padding".into()));
            }
            data.truncate(start);
            Ok(data)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkcs7_pad() {
        let padded = pad(PaddingMode::Pkcs7, b"hello", 16).unwrap();
        assert_eq!(padded.len(), 16);
        assert!(padded[5..].iter().all(|&b| b == 11));
        assert_eq!(unpad(PaddingMode::Pkcs7, padded, 16).unwrap(), b"hello");
    }

    #[test]
    fn test_aligned_input_gets_full_block() {
        let padded = pad(PaddingMode::Iso10126, &[1u8; 16], 16).unwrap();
        assert_eq!(padded.len(), 32);
        assert_eq!(padded[31], 16);
        assert_eq!(pad(PaddingMode::Zeros, &[1u8; 16], 16).unwrap().len(), 16);
    }

    #[test]
    fn test_iso10126_unpad_ignores_filler() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[0xAB, 0xCD, 0xEF, 0x04]);
        assert_eq!(unpad(PaddingMode::Iso10126, data, 16).unwrap(), b"hello world!");
    }

    #[test]
    fn test_ansix923_rejects_nonzero_filler() {
        let mut data = b"hello world!".to_vec();
        data.extend_from_slice(&[0x00, 0x01, 0x00, 0x04]);
        assert!(unpad(PaddingMode::AnsiX923, data, 16).is_err());
    }

    #[test]
    fn test_padded_modes_reject_empty_plaintext_block() {
        for mode in [PaddingMode::Iso10126, PaddingMode::Pkcs7, PaddingMode::AnsiX923] {
            assert!(matches!(unpad(mode, Vec::new(), 16), Err(Error::Crypto(_))), "{mode:?}");
        }
        assert!(unpad(PaddingMode::None, Vec::new(), 16).unwrap().is_empty());

        let cipher = from_uri(algorithm::AES128_CBC).unwrap();
        let iv_only = [0u8; 16];
        assert!(matches!(cipher.decrypt(&[0x42; 16], &iv_only), Err(Error::Crypto(_))));
    }

    #[test]
    fn test_none_requires_alignment() {
        assert!(pad(PaddingMode::None, b"abc", 8).is_err());
        assert_eq!(pad(PaddingMode::None, b"abcdefgh", 8).unwrap().len(), 8);
    }

    #[test]
    fn test_cbc_roundtrip_all_ciphers() {
        let pt = b"This is a longer test message that spans several blocks.";
        for uri in [
            algorithm::DES_CBC,
            algorithm::TRIPLEDES_CBC,
            algorithm::AES128_CBC,
            algorithm::AES192_CBC,
            algorithm::AES256_CBC,
        ] {
            let cipher = from_uri(uri).unwrap();
            let key: Vec<u8> = (0..cipher.key_size()).map(|i| (i * 7 + 1) as u8).collect();
            let ct = cipher.encrypt(&key, pt).unwrap();
            assert_eq!(ct.len() % cipher.block_size(), 0);
            assert_eq!(cipher.decrypt(&key, &ct).unwrap(), pt, "{uri}");
        }
    }

    #[test]
    fn test_ecb_has_no_iv_prefix() {
        let key = [0x42u8; 16];
        let cipher = from_uri_with(algorithm::AES128_CBC, CipherMode::Ecb, PaddingMode::Pkcs7).unwrap();
        let ct = cipher.encrypt(&key, b"0123456789").unwrap();
        assert_eq!(ct.len(), 16);
        assert_eq!(cipher.decrypt(&key, &ct).unwrap(), b"0123456789");
    }

    #[test]
    fn test_padding_modes_roundtrip() {
        let key = [0x11u8; 24];
        for padding in [
            PaddingMode::Iso10126,
            PaddingMode::Pkcs7,
            PaddingMode::AnsiX923,
            PaddingMode::Zeros,
        ] {
            let cipher = from_uri_with(algorithm::TRIPLEDES_CBC, CipherMode::Cbc, padding).unwrap();
            let ct = cipher.encrypt(&key, b"<a>text</a>").unwrap();
            assert_eq!(cipher.decrypt(&key, &ct).unwrap(), b"<a>text</a>", "{padding:?}");
        }
    }

    #[test]
    fn test_explicit_iv_is_prefixed() {
        let key = [0x42u8; 16];
        let iv = [0x07u8; 16];
        let cipher = from_uri(algorithm::AES128_CBC).unwrap();
        let ct = cipher.encrypt_with_iv(&key, &iv, b"data").unwrap();
        assert_eq!(&ct[..16], &iv);
        assert_eq!(cipher.decrypt_with_iv(&key, &iv, &ct[16..]).unwrap(), b"data");
    }

    #[test]
    fn test_wrong_key_size() {
        let cipher = from_uri(algorithm::AES256_CBC).unwrap();
        assert!(cipher.encrypt(&[0u8; 16], b"x").is_err());
    }

    #[test]
    fn test_iv_and_key_sizes() {
        assert_eq!(iv_size(algorithm::DES_CBC).unwrap(), 8);
        assert_eq!(iv_size(algorithm::TRIPLEDES_CBC).unwrap(), 8);
        assert_eq!(iv_size(algorithm::AES192_CBC).unwrap(), 16);
        assert_eq!(key_size(algorithm::AES256_CBC).unwrap(), 32);
        assert!(iv_size("http://example.com/fake-cipher").is_err());
    }
}

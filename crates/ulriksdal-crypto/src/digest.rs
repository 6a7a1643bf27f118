#![forbid(unsafe_code)]

//! Digest (hash) algorithm implementations.
//!
//! Digests are driven incrementally: canonical bytes are streamed into a
//! [`DigestWriter`] so the canonicalizer never has to materialize a whole
//! reference before hashing it.

use digest::Digest;
use ulriksdal_core::{algorithm, Error};

/// Trait for digest algorithms.
pub trait DigestAlgorithm: Send {
    /// Feed data into the hash.
    fn update(&mut self, data: &[u8]);
    /// Finalize and return the hash value.
    fn finalize(self: Box<Self>) -> Vec<u8>;
    /// Algorithm URI.
    fn uri(&self) -> &'static str;
    /// Length of the hash value in bytes.
    fn output_size(&self) -> usize;
}

/// Create a digest algorithm from its URI.
pub fn from_uri(uri: &str) -> Result<Box<dyn DigestAlgorithm>, Error> {
    match uri {
        algorithm::SHA1 => Ok(Box::new(Sha1Digest::new())),
        algorithm::SHA256 => Ok(Box::new(Sha256Digest::new())),
        algorithm::SHA384 => Ok(Box::new(Sha384Digest::new())),
        algorithm::SHA512 => Ok(Box::new(Sha512Digest::new())),
        algorithm::MD5 => Ok(Box::new(Md5Digest::new())),
        algorithm::RIPEMD160 => Ok(Box::new(Ripemd160Digest::new())),
        _ => Err(Error::UnsupportedAlgorithm(format!(
            "digest algorithm: {uri}"
        ))),
    }
}

/// Compute a digest in one shot.
pub fn digest(uri: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    let mut hasher = from_uri(uri)?;
    hasher.update(data);
    Ok(hasher.finalize())
}

/// `std::io::Write` adapter that hashes everything written to it.
pub struct DigestWriter {
    inner: Box<dyn DigestAlgorithm>,
}

impl DigestWriter {
    pub fn new(uri: &str) -> Result<Self, Error> {
        Ok(Self {
            inner: from_uri(uri)?,
        })
    }

    pub fn finalize(self) -> Vec<u8> {
        self.inner.finalize()
    }
}

impl std::io::Write for DigestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.inner.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

macro_rules! impl_digest {
    ($name:ident, $hasher:ty, $uri:expr) => {
        struct $name {
            inner: $hasher,
        }

        impl $name {
            fn new() -> Self {
                Self {
                    inner: <$hasher>::new(),
                }
            }
        }

        impl DigestAlgorithm for $name {
            fn update(&mut self, data: &[u8]) {
                Digest::update(&mut self.inner, data);
            }

            fn finalize(self: Box<Self>) -> Vec<u8> {
                Digest::finalize(self.inner).to_vec()
            }

            fn uri(&self) -> &'static str {
                $uri
            }

            fn output_size(&self) -> usize {
                <$hasher as Digest>::output_size()
            }
        }
    };
}

impl_digest!(Sha1Digest, sha1::Sha1, algorithm::SHA1);
impl_digest!(Sha256Digest, sha2::Sha256, algorithm::SHA256);
impl_digest!(Sha384Digest, sha2::Sha384, algorithm::SHA384);
impl_digest!(Sha512Digest, sha2::Sha512, algorithm::SHA512);
impl_digest!(Md5Digest, md5::Md5, algorithm::MD5);
impl_digest!(Ripemd160Digest, ripemd::Ripemd160, algorithm::RIPEMD160);

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_sha256() {
        let result = digest(algorithm::SHA256, b"hello").unwrap();
        assert_eq!(
            hex::encode(result),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_output_sizes() {
        for (uri, len) in [
            (algorithm::SHA1, 20),
            (algorithm::SHA256, 32),
            (algorithm::SHA384, 48),
            (algorithm::SHA512, 64),
            (algorithm::MD5, 16),
            (algorithm::RIPEMD160, 20),
        ] {
            assert_eq!(from_uri(uri).unwrap().output_size(), len);
            assert_eq!(digest(uri, b"abc").unwrap().len(), len);
        }
    }

    #[test]
    fn test_writer_matches_one_shot() {
        let mut w = DigestWriter::new(algorithm::SHA1).unwrap();
        w.write_all(b"hel").unwrap();
        w.write_all(b"lo").unwrap();
        assert_eq!(w.finalize(), digest(algorithm::SHA1, b"hello").unwrap());
    }

    #[test]
    fn test_unknown_digest() {
        assert!(matches!(
            from_uri("urn:nope"),
            Err(Error::UnsupportedAlgorithm(_))
        ));
    }
}

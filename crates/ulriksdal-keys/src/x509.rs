#![forbid(unsafe_code)]

//! X.509 checks used by explicit certificate verification.
//!
//! Two independent checks: whether a certificate may sign at all (key
//! usage), and whether it chains to one of the trusted roots. Chains are
//! RSA-signed; each link is checked for time validity and signature.

use der::{Decode, Encode};
use ulriksdal_core::Error;
use x509_cert::Certificate;

/// Configuration for X.509 certificate chain validation.
#[derive(Debug, Clone, Copy)]
pub struct CertValidationConfig<'a> {
    /// Trusted CA certificates (DER-encoded).
    pub trusted_certs: &'a [Vec<u8>],
    /// Untrusted intermediate certificates (DER-encoded).
    pub untrusted_certs: &'a [Vec<u8>],
    /// Check validity at this instant instead of now.
    pub verification_time: Option<der::DateTime>,
    pub skip_time_checks: bool,
}

impl<'a> CertValidationConfig<'a> {
    pub fn new(trusted_certs: &'a [Vec<u8>]) -> Self {
        Self {
            trusted_certs,
            untrusted_certs: &[],
            verification_time: None,
            skip_time_checks: false,
        }
    }
}

/// Whether the certificate's key may be used for signatures.
///
/// True when the KeyUsage extension is absent, or present with either the
/// digitalSignature or nonRepudiation bit.
pub fn has_signing_key_usage(cert_der: &[u8]) -> Result<bool, Error> {
    use der::oid::AssociatedOid;
    use x509_cert::ext::pkix::KeyUsage;

    let cert = Certificate::from_der(cert_der)
        .map_err(|e| Error::Certificate(format!("failed to parse certificate: {e}")))?;
    let Some(extensions) = &cert.tbs_certificate.extensions else {
        return Ok(true);
    };
    let Some(ext) = extensions.iter().find(|e| e.extn_id == KeyUsage::OID) else {
        return Ok(true);
    };
    let usage = KeyUsage::from_der(ext.extn_value.as_bytes())
        .map_err(|e| Error::Certificate(format!("malformed key usage extension: {e}")))?;
    Ok(usage.digital_signature() || usage.non_repudiation())
}

/// Validate a certificate chain from a leaf cert to a trusted root.
///
/// `additional_certs` are certificates carried next to the leaf, typically
/// the rest of an `X509Data`.
pub fn validate_cert_chain(
    leaf_der: &[u8],
    additional_certs: &[Vec<u8>],
    config: &CertValidationConfig<'_>,
) -> Result<(), Error> {
    let leaf = Certificate::from_der(leaf_der)
        .map_err(|e| Error::Certificate(format!("failed to parse leaf certificate: {e}")))?;

    let available: Vec<(Certificate, &Vec<u8>)> = additional_certs
        .iter()
        .filter(|der| der.as_slice() != leaf_der)
        .chain(config.untrusted_certs)
        .filter_map(|der| Certificate::from_der(der).ok().map(|c| (c, der)))
        .collect();
    let trusted: Vec<(Certificate, &Vec<u8>)> = config
        .trusted_certs
        .iter()
        .filter_map(|der| Certificate::from_der(der).ok().map(|c| (c, der)))
        .collect();

    if trusted.is_empty() {
        return Err(Error::Certificate("no trusted certificates available".into()));
    }

    let verif_time = if config.skip_time_checks {
        None
    } else {
        Some(resolve_verification_time(config.verification_time)?)
    };
    if let Some(t) = &verif_time {
        check_cert_time_validity(&leaf, t)?;
    }

    build_and_verify_chain(&leaf, leaf_der, &available, &trusted, verif_time.as_ref())
}

fn resolve_verification_time(override_time: Option<der::DateTime>) -> Result<der::DateTime, Error> {
    if let Some(t) = override_time {
        return Ok(t);
    }
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_err(|e| Error::Certificate(format!("system time error: {e}")))?;
    der::DateTime::from_unix_duration(now)
        .map_err(|e| Error::Certificate(format!("time conversion error: {e}")))
}

fn check_cert_time_validity(cert: &Certificate, verif_time: &der::DateTime) -> Result<(), Error> {
    let validity = &cert.tbs_certificate.validity;
    let not_before = validity.not_before.to_date_time();
    let not_after = validity.not_after.to_date_time();

    if *verif_time < not_before {
        return Err(Error::Certificate(format!(
            "certificate is not yet valid (notBefore: {not_before})"
        )));
    }
    if *verif_time > not_after {
        return Err(Error::Certificate(format!(
            "certificate has expired (notAfter: {not_after})"
        )));
    }
    Ok(())
}

fn name_der(name: &x509_cert::name::Name) -> Result<Vec<u8>, Error> {
    name.to_der()
        .map_err(|e| Error::Certificate(format!("failed to encode name: {e}")))
}

const MAX_CHAIN_DEPTH: usize = 10;

fn build_and_verify_chain(
    leaf: &Certificate,
    leaf_der: &[u8],
    available: &[(Certificate, &Vec<u8>)],
    trusted: &[(Certificate, &Vec<u8>)],
    verif_time: Option<&der::DateTime>,
) -> Result<(), Error> {
    // A trusted leaf must still carry a valid self-signature.
    if let Some((tc, _)) = trusted.iter().find(|(_, der)| der.as_slice() == leaf_der) {
        return verify_cert_signature(leaf, &tc.tbs_certificate.subject_public_key_info);
    }

    let mut current = leaf.clone();
    let mut visited: Vec<&[u8]> = vec![leaf_der];

    for _ in 0..MAX_CHAIN_DEPTH {
        let issuer = name_der(&current.tbs_certificate.issuer)?;

        for (tc, _) in trusted {
            if name_der(&tc.tbs_certificate.subject)? == issuer
                && verify_cert_signature(&current, &tc.tbs_certificate.subject_public_key_info)
                    .is_ok()
            {
                if let Some(t) = verif_time {
                    check_cert_time_validity(tc, t)?;
                }
                return Ok(());
            }
        }

        if issuer == name_der(&current.tbs_certificate.subject)? {
            return Err(Error::Certificate(
                "self-signed certificate not in trusted store".into(),
            ));
        }

        let mut next = None;
        for (ic, ic_der) in available {
            if visited.contains(&ic_der.as_slice()) {
                continue;
            }
            if name_der(&ic.tbs_certificate.subject)? == issuer
                && verify_cert_signature(&current, &ic.tbs_certificate.subject_public_key_info)
                    .is_ok()
            {
                if let Some(t) = verif_time {
                    check_cert_time_validity(ic, t)?;
                }
                visited.push(ic_der.as_slice());
                next = Some(ic.clone());
                break;
            }
        }
        match next {
            Some(c) => current = c,
            None => {
                return Err(Error::Certificate(
                    "cannot find issuer certificate (incomplete chain)".into(),
                ))
            }
        }
    }

    Err(Error::Certificate("certificate chain too long".into()))
}

/// Verify a certificate's signature using the issuer's SPKI.
fn verify_cert_signature(
    cert: &Certificate,
    issuer_spki: &spki::SubjectPublicKeyInfoOwned,
) -> Result<(), Error> {
    const SHA1_RSA: &str = "1.2.840.113549.1.1.5";
    const SHA256_RSA: &str = "1.2.840.113549.1.1.11";
    const SHA384_RSA: &str = "1.2.840.113549.1.1.12";
    const SHA512_RSA: &str = "1.2.840.113549.1.1.13";

    let tbs_der = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| Error::Certificate(format!("failed to encode TBS: {e}")))?;
    let sig_bytes = cert
        .signature
        .as_bytes()
        .ok_or_else(|| Error::Certificate("no signature bytes".into()))?;
    let spki_der = issuer_spki
        .to_der()
        .map_err(|e| Error::Certificate(format!("failed to encode issuer SPKI: {e}")))?;

    let oid = cert.signature_algorithm.oid.to_string();
    match oid.as_str() {
        SHA1_RSA => verify_rsa_signature::<sha1::Sha1>(&spki_der, &tbs_der, sig_bytes),
        SHA256_RSA => verify_rsa_signature::<sha2::Sha256>(&spki_der, &tbs_der, sig_bytes),
        SHA384_RSA => verify_rsa_signature::<sha2::Sha384>(&spki_der, &tbs_der, sig_bytes),
        SHA512_RSA => verify_rsa_signature::<sha2::Sha512>(&spki_der, &tbs_der, sig_bytes),
        _ => Err(Error::Certificate(format!(
            "unsupported certificate signature algorithm: {oid}"
        ))),
    }
}

fn verify_rsa_signature<D>(
    issuer_spki_der: &[u8],
    tbs_der: &[u8],
    signature: &[u8],
) -> Result<(), Error>
where
    D: sha2::Digest + der::oid::AssociatedOid,
    rsa::pkcs1v15::VerifyingKey<D>: signature::Verifier<rsa::pkcs1v15::Signature>,
{
    use signature::Verifier;
    use spki::DecodePublicKey;

    let public_key = rsa::RsaPublicKey::from_public_key_der(issuer_spki_der)
        .map_err(|e| Error::Certificate(format!("invalid RSA public key: {e}")))?;
    let verifying_key = rsa::pkcs1v15::VerifyingKey::<D>::new(public_key);
    let sig = rsa::pkcs1v15::Signature::try_from(signature)
        .map_err(|e| Error::Certificate(format!("invalid RSA signature: {e}")))?;
    verifying_key
        .verify(tbs_der, &sig)
        .map_err(|e| Error::Certificate(format!("certificate signature verification failed: {e}")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::str::FromStr;
    use std::time::Duration;
    use x509_cert::builder::{Builder, CertificateBuilder, Profile};
    use x509_cert::name::Name;
    use x509_cert::serial_number::SerialNumber;
    use x509_cert::time::Validity;

    /// Self-signed RSA certificate. A root profile gets certificate-signing
    /// key usage only; a leaf profile gets digitalSignature and nonRepudiation.
    pub(crate) fn self_signed(private: &rsa::RsaPrivateKey, root: bool) -> Vec<u8> {
        let signer = rsa::pkcs1v15::SigningKey::<sha2::Sha256>::new(private.clone());
        let spki =
            spki::SubjectPublicKeyInfoOwned::from_key(private.to_public_key()).unwrap();
        let subject = Name::from_str("CN=ulriksdal test").unwrap();
        let profile = if root {
            Profile::Root
        } else {
            Profile::Leaf {
                issuer: subject.clone(),
                enable_key_agreement: false,
                enable_key_encipherment: false,
            }
        };
        let builder = CertificateBuilder::new(
            profile,
            SerialNumber::from(7u32),
            Validity::from_now(Duration::from_secs(3600)).unwrap(),
            subject,
            spki,
            &signer,
        )
        .unwrap();
        builder
            .build::<rsa::pkcs1v15::Signature>()
            .unwrap()
            .to_der()
            .unwrap()
    }

    fn key() -> rsa::RsaPrivateKey {
        rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 1024).unwrap()
    }

    #[test]
    fn test_key_usage() {
        let k = key();
        assert!(!has_signing_key_usage(&self_signed(&k, true)).unwrap());
        assert!(has_signing_key_usage(&self_signed(&k, false)).unwrap());
        assert!(has_signing_key_usage(b"junk").is_err());
    }

    #[test]
    fn test_trusted_self_signed_validates() {
        let cert = self_signed(&key(), true);
        let trusted = vec![cert.clone()];
        validate_cert_chain(&cert, &[], &CertValidationConfig::new(&trusted)).unwrap();
    }

    #[test]
    fn test_untrusted_self_signed_rejected() {
        let cert = self_signed(&key(), true);
        let other = vec![self_signed(&key(), true)];
        let err = validate_cert_chain(&cert, &[], &CertValidationConfig::new(&other));
        assert!(matches!(err, Err(Error::Certificate(_))));
        assert!(validate_cert_chain(&cert, &[], &CertValidationConfig::new(&[])).is_err());
    }

    #[test]
    fn test_expired_at_verification_time() {
        let cert = self_signed(&key(), true);
        let trusted = vec![cert.clone()];
        let mut config = CertValidationConfig::new(&trusted);
        config.verification_time = Some(der::DateTime::new(2000, 1, 1, 0, 0, 0).unwrap());
        assert!(validate_cert_chain(&cert, &[], &config).is_err());
        config.skip_time_checks = true;
        assert!(validate_cert_chain(&cert, &[], &config).is_ok());
    }
}

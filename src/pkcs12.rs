//! PKCS#12 bundling built on OpenSSL.
//!
//! Bundles are written without a password so operators can import the CA into
//! a trusted root store without friction.

use openssl::nid::Nid;
use openssl::pkcs12::Pkcs12;
use openssl::pkey::{Id, PKey, Private};
use openssl::x509::X509;

use crate::algorithm::KeyAlgorithm;
use crate::errors::CertError;

const SHROUD_ITERATIONS: u32 = 2048;

/// Encodes a certificate and its private key as a password-less PKCS#12
/// container, AES-256-CBC shrouded.
pub(crate) fn bundle(
    cert_pem: &str,
    key_pem: &str,
    friendly_name: &str,
) -> Result<Vec<u8>, CertError> {
    let cert = X509::from_pem(cert_pem.as_bytes())?;
    let key = private_key_from_pem(key_pem)?;

    let mut builder = Pkcs12::builder();
    builder.name(friendly_name);
    builder.pkey(&key);
    builder.cert(&cert);
    builder.key_algorithm(Nid::AES_256_CBC);
    builder.cert_algorithm(Nid::AES_256_CBC);
    builder.key_iter(SHROUD_ITERATIONS);
    builder.mac_iter(SHROUD_ITERATIONS);
    let pkcs12 = builder.build2("")?;
    Ok(pkcs12.to_der()?)
}

/// Certificate material recovered from a PKCS#12 round trip.
pub(crate) struct RebuiltMaterial {
    pub cert_pem: String,
    pub key_pkcs8_pem: String,
    pub algorithm: KeyAlgorithm,
}

/// Routes a certificate and key through a PKCS#12 container and back. The
/// round trip sidesteps key-store defects by never handing the key to the
/// platform store in its original form.
pub(crate) fn rebuild(
    cert_pem: &str,
    key_pem: &str,
    friendly_name: &str,
) -> Result<RebuiltMaterial, CertError> {
    let der = bundle(cert_pem, key_pem, friendly_name)?;
    let parsed = Pkcs12::from_der(&der)?.parse2("")?;
    let cert = parsed.cert.ok_or_else(|| {
        CertError::CaMaterial("PKCS#12 container is missing its certificate".to_string())
    })?;
    let key = parsed.pkey.ok_or_else(|| {
        CertError::CaMaterial("PKCS#12 container is missing its private key".to_string())
    })?;

    let algorithm = match key.id() {
        Id::EC => KeyAlgorithm::EcdsaP256,
        Id::RSA => KeyAlgorithm::Rsa,
        other => {
            return Err(CertError::UnsupportedAlgorithm(format!(
                "no strategy matches key type {other:?}"
            )))
        }
    };

    Ok(RebuiltMaterial {
        cert_pem: pem_text(cert.to_pem()?)?,
        key_pkcs8_pem: pem_text(key.private_key_to_pem_pkcs8()?)?,
        algorithm,
    })
}

/// Verifies that a certificate's public key matches the private key before
/// the pair is trusted as a CA.
pub(crate) fn validate_key_match(cert_pem: &str, key_pem: &str) -> Result<(), CertError> {
    let cert = X509::from_pem(cert_pem.as_bytes())?;
    let key = private_key_from_pem(key_pem)?;
    let public = cert.public_key()?;
    if !public.public_eq(&key) {
        return Err(CertError::CaMaterial(
            "certificate and private key do not match".to_string(),
        ));
    }
    Ok(())
}

// EC first, then RSA, to determine the key type of an algorithm-native PEM.
fn private_key_from_pem(key_pem: &str) -> Result<PKey<Private>, CertError> {
    if let Ok(ec) = openssl::ec::EcKey::private_key_from_pem(key_pem.as_bytes()) {
        return Ok(PKey::from_ec_key(ec)?);
    }
    let rsa = openssl::rsa::Rsa::private_key_from_pem(key_pem.as_bytes())?;
    Ok(PKey::from_rsa(rsa)?)
}

fn pem_text(bytes: Vec<u8>) -> Result<String, CertError> {
    String::from_utf8(bytes)
        .map_err(|error| CertError::CaMaterial(format!("PEM output is not UTF-8: {error}")))
}

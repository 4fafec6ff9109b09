use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use rand::RngCore;
use rcgen::{
    BasicConstraints, CertificateParams, DistinguishedName, DnType, ExtendedKeyUsagePurpose, IsCa,
    Issuer, KeyPair, KeyUsagePurpose, SanType, SerialNumber,
};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::ServerConfig;
use time::{Duration, OffsetDateTime};
use tracing::info;

use crate::algorithm::{AlgorithmKey, KeyAlgorithm};
use crate::config::KeyStoreCompat;
use crate::errors::CertError;
use crate::pkcs12;

const CA_VALIDITY_DAYS: i64 = 3650;
const LEAF_VALIDITY_DAYS: i64 = 365;
const BACKDATE_DAYS: i64 = 1;
const SERIAL_BYTES: usize = 16;

/// The root of trust: a self-signed certificate with its signing key attached.
/// Losing the key invalidates every leaf issued from it, so it is only handed
/// out by the persistence store or the factory.
pub struct CaCertificate {
    pub algorithm: KeyAlgorithm,
    pub cert_pem: String,
    pub cert_der: CertificateDer<'static>,
    /// Private key in the algorithm-native PEM format.
    pub key_pem: String,
    pub(crate) issuer: Issuer<'static, KeyPair>,
}

// Keeps the private key (and the non-Debug issuer handle) out of logs.
impl fmt::Debug for CaCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CaCertificate")
            .field("algorithm", &self.algorithm)
            .field("cert_pem", &self.cert_pem)
            .finish_non_exhaustive()
    }
}

/// A leaf certificate bundled with its private key, ready to hand to a TLS
/// stack.
pub struct IssuedCertificate {
    pub cert_pem: String,
    pub cert_der: CertificateDer<'static>,
    /// Private key in the algorithm-native PEM format.
    pub key_pem: String,
    pub ca_cert_pem: String,
    key_pkcs8_der: Vec<u8>,
    ca_cert_der: CertificateDer<'static>,
}

// Keeps the private key out of logs.
impl fmt::Debug for IssuedCertificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedCertificate")
            .field("cert_pem", &self.cert_pem)
            .field("ca_cert_pem", &self.ca_cert_pem)
            .finish_non_exhaustive()
    }
}

impl IssuedCertificate {
    /// Leaf first, then the CA, as presented during the handshake.
    pub fn chain(&self) -> Vec<CertificateDer<'static>> {
        vec![self.cert_der.clone(), self.ca_cert_der.clone()]
    }

    pub fn server_config(&self) -> Result<Arc<ServerConfig>, CertError> {
        let private_key =
            PrivateKeyDer::from(PrivatePkcs8KeyDer::from(self.key_pkcs8_der.clone()));
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(self.chain(), private_key)?;
        Ok(Arc::new(config))
    }

    /// Exports the leaf and its key as a password-less PKCS#12 container.
    pub fn to_pkcs12(&self, friendly_name: &str) -> Result<Vec<u8>, CertError> {
        pkcs12::bundle(&self.cert_pem, &self.key_pem, friendly_name)
    }
}

/// Collects subject-alternative-name entries for a leaf certificate.
#[derive(Default)]
pub struct SanBuilder {
    names: Vec<SanType>,
    error: Option<rcgen::Error>,
}

impl SanBuilder {
    pub fn add_ip(&mut self, address: IpAddr) {
        self.names.push(SanType::IpAddress(address));
    }

    pub fn add_dns(&mut self, name: &str) {
        match name.try_into() {
            Ok(value) => self.names.push(SanType::DnsName(value)),
            Err(error) => {
                if self.error.is_none() {
                    self.error = Some(error);
                }
            }
        }
    }

    fn finish(self) -> Result<Vec<SanType>, CertError> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(self.names),
        }
    }
}

/// Signing mechanics for one platform profile. The default goes straight
/// through rcgen; the PKCS#12 variant routes every produced certificate
/// through a manually assembled container.
pub trait CertificateCreator: Send + Sync {
    fn create_self_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
    ) -> Result<CaCertificate, CertError>;

    fn create_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
        ca: &CaCertificate,
    ) -> Result<IssuedCertificate, CertError>;
}

pub struct DefaultCertificateCreator;

impl CertificateCreator for DefaultCertificateCreator {
    fn create_self_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
    ) -> Result<CaCertificate, CertError> {
        let AlgorithmKey {
            algorithm,
            key_pair,
            private_key_pem,
        } = key;
        let cert = params.self_signed(&key_pair)?;
        let cert_pem = cert.pem();
        let cert_der = cert.der().clone();
        let issuer = Issuer::new(params, key_pair);
        Ok(CaCertificate {
            algorithm,
            cert_pem,
            cert_der,
            key_pem: private_key_pem,
            issuer,
        })
    }

    fn create_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
        ca: &CaCertificate,
    ) -> Result<IssuedCertificate, CertError> {
        let cert = params.signed_by(&key.key_pair, &ca.issuer)?;
        Ok(IssuedCertificate {
            cert_pem: cert.pem(),
            cert_der: cert.der().clone(),
            key_pkcs8_der: key.key_pair.serialize_der(),
            key_pem: key.private_key_pem,
            ca_cert_pem: ca.cert_pem.clone(),
            ca_cert_der: ca.cert_der.clone(),
        })
    }
}

/// Workaround creator: signs with rcgen, then round-trips the result through
/// a password-less PKCS#12 container so the platform key store never sees the
/// key in a form it refuses to export.
pub struct Pkcs12CertificateCreator;

impl CertificateCreator for Pkcs12CertificateCreator {
    fn create_self_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
    ) -> Result<CaCertificate, CertError> {
        let AlgorithmKey {
            key_pair,
            private_key_pem,
            ..
        } = key;
        let cert = params.self_signed(&key_pair)?;
        let rebuilt = pkcs12::rebuild(&cert.pem(), &private_key_pem, "certmint-ca")?;
        let cert_der = certificate_der_from_pem(&rebuilt.cert_pem)?;
        let signing_key = KeyPair::from_pem_and_sign_algo(
            &rebuilt.key_pkcs8_pem,
            rebuilt.algorithm.signature_algorithm(),
        )?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, signing_key).map_err(|error| {
            CertError::CaMaterial(format!(
                "failed to rebuild issuer from PKCS#12 output: {error}"
            ))
        })?;
        Ok(CaCertificate {
            algorithm: rebuilt.algorithm,
            cert_pem: rebuilt.cert_pem,
            cert_der,
            key_pem: private_key_pem,
            issuer,
        })
    }

    fn create_signed(
        &self,
        params: CertificateParams,
        key: AlgorithmKey,
        ca: &CaCertificate,
    ) -> Result<IssuedCertificate, CertError> {
        let cert = params.signed_by(&key.key_pair, &ca.issuer)?;
        let rebuilt = pkcs12::rebuild(&cert.pem(), &key.private_key_pem, "certmint-leaf")?;
        let cert_der = certificate_der_from_pem(&rebuilt.cert_pem)?;
        let key_pkcs8_der = PrivatePkcs8KeyDer::from_pem_slice(rebuilt.key_pkcs8_pem.as_bytes())
            .map_err(|error| {
                CertError::KeyMaterial(format!(
                    "failed to parse PKCS#8 key from PKCS#12 output: {error}"
                ))
            })?
            .secret_pkcs8_der()
            .to_vec();
        Ok(IssuedCertificate {
            cert_pem: rebuilt.cert_pem,
            cert_der,
            key_pem: key.private_key_pem,
            key_pkcs8_der,
            ca_cert_pem: ca.cert_pem.clone(),
            ca_cert_der: ca.cert_der.clone(),
        })
    }
}

/// Builds certificate requests, fills the required X.509 extensions, and
/// delegates signing to the configured creator strategy.
pub struct CertificateFactory {
    creator: Box<dyn CertificateCreator>,
}

impl CertificateFactory {
    pub fn new(compat: KeyStoreCompat) -> Self {
        let creator: Box<dyn CertificateCreator> = match compat {
            KeyStoreCompat::Standard => Box::new(DefaultCertificateCreator),
            KeyStoreCompat::Pkcs12Rebuild => Box::new(Pkcs12CertificateCreator),
        };
        Self { creator }
    }

    pub fn with_creator(creator: Box<dyn CertificateCreator>) -> Self {
        Self { creator }
    }

    /// Creates a self-signed root CA: path-length 0, certificate signing
    /// only, valid [now-1d, now+10y].
    pub fn create_ca(
        &self,
        key: AlgorithmKey,
        subject_name: &str,
    ) -> Result<CaCertificate, CertError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = parse_subject_name(subject_name)?;
        params.is_ca = IsCa::Ca(BasicConstraints::Constrained(0));
        params.key_usages = vec![KeyUsagePurpose::KeyCertSign];

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(BACKDATE_DAYS);
        params.not_after = now + Duration::days(CA_VALIDITY_DAYS);

        info!(
            subject = subject_name,
            algorithm = %key.algorithm,
            "creating certificate authority"
        );
        self.creator.create_self_signed(params, key)
    }

    /// Issues a CA-signed leaf for TLS server authentication, valid
    /// [now-1d, now+1y], with a random 16-byte serial. The caller populates
    /// the subject-alternative-name set through the builder callback.
    pub fn create_certificate(
        &self,
        key: AlgorithmKey,
        ca: &CaCertificate,
        subject_name: &str,
        configure_san: impl FnOnce(&mut SanBuilder),
    ) -> Result<IssuedCertificate, CertError> {
        let mut params = CertificateParams::new(Vec::<String>::new())?;
        params.distinguished_name = parse_subject_name(subject_name)?;

        let mut san = SanBuilder::default();
        configure_san(&mut san);
        params.subject_alt_names = san.finish()?;

        params.is_ca = IsCa::ExplicitNoCa;
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(random_serial());

        let now = OffsetDateTime::now_utc();
        params.not_before = now - Duration::days(BACKDATE_DAYS);
        params.not_after = now + Duration::days(LEAF_VALIDITY_DAYS);

        info!(subject = subject_name, "issuing leaf certificate");
        self.creator.create_signed(params, key, ca)
    }
}

fn random_serial() -> SerialNumber {
    let mut bytes = [0u8; SERIAL_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    // Keep the encoded INTEGER positive.
    bytes[0] &= 0x7f;
    SerialNumber::from_slice(&bytes)
}

pub(crate) fn certificate_der_from_pem(pem: &str) -> Result<CertificateDer<'static>, CertError> {
    CertificateDer::from_pem_slice(pem.as_bytes())
        .map_err(|error| CertError::CaMaterial(format!("failed to parse certificate PEM: {error}")))
}

/// Parses a distinguished-name string such as `CN=Certmint Root CA, O=Lab`.
fn parse_subject_name(subject: &str) -> Result<DistinguishedName, CertError> {
    let mut dn = DistinguishedName::new();
    let mut attributes = 0usize;
    for part in subject.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }
        let (attribute, value) = part.split_once('=').ok_or_else(|| {
            CertError::InvalidSubjectName(format!("expected ATTR=value, found '{part}'"))
        })?;
        let dn_type = match attribute.trim().to_ascii_uppercase().as_str() {
            "CN" => DnType::CommonName,
            "O" => DnType::OrganizationName,
            "OU" => DnType::OrganizationalUnitName,
            "C" => DnType::CountryName,
            "ST" => DnType::StateOrProvinceName,
            "L" => DnType::LocalityName,
            other => {
                return Err(CertError::InvalidSubjectName(format!(
                    "unsupported attribute '{other}'"
                )))
            }
        };
        dn.push(dn_type, value.trim());
        attributes += 1;
    }
    if attributes == 0 {
        return Err(CertError::InvalidSubjectName(
            "subject must contain at least one attribute".to_string(),
        ));
    }
    Ok(dn)
}

use std::path::PathBuf;
use std::sync::Arc;

use rcgen::Issuer;
use tracing::info;

use crate::algorithm::KeyAlgorithm;
use crate::config::SelfSignedOptions;
use crate::errors::CertError;
use crate::factory::{certificate_der_from_pem, CaCertificate};
use crate::fs_store::FileStore;
use crate::pkcs12;

const CERT_SUFFIX: &str = ".crt.pem";
const KEY_SUFFIX: &str = ".key.pem";
const PFX_SUFFIX: &str = ".pfx";

/// Reconstructs a usable [`CaCertificate`] from persisted PEM text. Paired
/// with the matching creator strategy by the manager builder.
pub trait CaLoader: Send + Sync {
    fn load(&self, cert_pem: &str, key_pem: &str) -> Result<CaCertificate, CertError>;
}

/// Standard loader: the persisted material is taken at face value.
pub struct DefaultCaLoader;

impl CaLoader for DefaultCaLoader {
    fn load(&self, cert_pem: &str, key_pem: &str) -> Result<CaCertificate, CertError> {
        load_from_pem(cert_pem.to_string(), key_pem)
    }
}

/// Workaround loader: persisted material is routed through a PKCS#12 round
/// trip before use, mirroring how it was created.
pub struct Pkcs12CaLoader;

impl CaLoader for Pkcs12CaLoader {
    fn load(&self, cert_pem: &str, key_pem: &str) -> Result<CaCertificate, CertError> {
        let rebuilt = pkcs12::rebuild(cert_pem, key_pem, "certmint-ca")?;
        let cert_der = certificate_der_from_pem(&rebuilt.cert_pem)?;
        let signing_key = rcgen::KeyPair::from_pem_and_sign_algo(
            &rebuilt.key_pkcs8_pem,
            rebuilt.algorithm.signature_algorithm(),
        )?;
        let issuer = Issuer::from_ca_cert_der(&cert_der, signing_key).map_err(|error| {
            CertError::CaMaterial(format!("persisted CA certificate is unusable: {error}"))
        })?;
        Ok(CaCertificate {
            algorithm: rebuilt.algorithm,
            cert_pem: rebuilt.cert_pem,
            cert_der,
            key_pem: key_pem.to_string(),
            issuer,
        })
    }
}

fn load_from_pem(cert_pem: String, key_pem: &str) -> Result<CaCertificate, CertError> {
    let algorithm = KeyAlgorithm::detect_private_key_pem(key_pem)?;
    let signing_key = algorithm.signing_key_from_pem(key_pem)?;
    let cert_der = certificate_der_from_pem(&cert_pem)?;
    let issuer = Issuer::from_ca_cert_der(&cert_der, signing_key).map_err(|error| {
        CertError::CaMaterial(format!("persisted CA certificate is unusable: {error}"))
    })?;
    Ok(CaCertificate {
        algorithm,
        cert_pem,
        cert_der,
        key_pem: key_pem.to_string(),
        issuer,
    })
}

/// Persists the CA as three sibling files under the configured directory:
/// `<name>.crt.pem`, `<name>.key.pem` and `<name>.pfx`.
pub struct CaStore {
    files: Arc<dyn FileStore>,
    loader: Box<dyn CaLoader>,
}

impl CaStore {
    pub fn new(files: Arc<dyn FileStore>, loader: Box<dyn CaLoader>) -> Self {
        Self { files, loader }
    }

    /// Loads the persisted CA, or `Ok(None)` when either PEM file is absent.
    /// A present-but-broken pair is an error, not a silent regeneration.
    pub fn load_ca(&self, options: &SelfSignedOptions) -> Result<Option<CaCertificate>, CertError> {
        let cert_path = self.path_for(options, CERT_SUFFIX);
        let key_path = self.path_for(options, KEY_SUFFIX);
        if !self.files.exists(&cert_path) || !self.files.exists(&key_path) {
            info!(
                path = %options.ca_storage_path.display(),
                name = %options.ca_name,
                "no persisted certificate authority found"
            );
            return Ok(None);
        }

        let cert_pem = self.files.read_to_string(&cert_path)?;
        let key_pem = self.files.read_to_string(&key_path)?;
        pkcs12::validate_key_match(&cert_pem, &key_pem)?;

        let ca = self.loader.load(&cert_pem, &key_pem)?;
        info!(
            path = %cert_path.display(),
            algorithm = %ca.algorithm,
            "loaded persisted certificate authority"
        );
        Ok(Some(ca))
    }

    /// Writes the CA's certificate, private key and PKCS#12 bundle. The key
    /// text that was generated is written verbatim so a reload sees the exact
    /// bytes that produced the certificate. All three files are written or
    /// none: the bundle is built before the first write.
    pub fn save_ca(
        &self,
        options: &SelfSignedOptions,
        ca: &CaCertificate,
    ) -> Result<(), CertError> {
        let cert_path = self.path_for(options, CERT_SUFFIX);
        let key_path = self.path_for(options, KEY_SUFFIX);
        let pfx_path = self.path_for(options, PFX_SUFFIX);

        let pfx = pkcs12::bundle(&ca.cert_pem, &ca.key_pem, &options.ca_name)?;
        self.files.write_text(&cert_path, &ca.cert_pem)?;
        self.files.write_text(&key_path, &ca.key_pem)?;
        self.files.write_bytes(&pfx_path, &pfx)?;
        info!(
            path = %options.ca_storage_path.display(),
            name = %options.ca_name,
            "persisted certificate authority"
        );
        Ok(())
    }

    fn path_for(&self, options: &SelfSignedOptions, suffix: &str) -> PathBuf {
        let file_name = format!("{}{suffix}", options.ca_name);
        self.files.combine(&options.ca_storage_path, &file_name)
    }
}

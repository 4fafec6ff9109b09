use std::env;
use std::path::{Path, PathBuf};

use crate::algorithm::ECDSA_OID;
use crate::errors::CertError;

pub const DEFAULT_CA_NAME: &str = "certmint";
pub const DEFAULT_CA_SUBJECT: &str = "CN=Certmint Root CA";

/// Token inside the configured storage path that expands to `CERTMINT_HOME`
/// when set, otherwise to the user's home directory.
pub const HOME_TOKEN: &str = "{CERTMINT_HOME}";

/// Validated issuance options. Constructed fresh per resolution call and
/// immutable once returned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelfSignedOptions {
    pub ca_storage_path: PathBuf,
    pub ca_name: String,
    pub algorithm_oid: String,
    pub subject_name: String,
}

/// Supplies resolved options to the certificate manager. Implementations live
/// outside the core; `StaticCertificateConfig` covers the common case.
pub trait CertificateConfig: Send + Sync {
    fn resolve(&self) -> Result<SelfSignedOptions, CertError>;
}

/// Fixed configuration with defaults applied on resolution. The storage path
/// is the only required field.
#[derive(Debug, Clone, Default)]
pub struct StaticCertificateConfig {
    pub ca_storage_path: Option<PathBuf>,
    pub ca_name: Option<String>,
    pub algorithm_oid: Option<String>,
    pub subject_name: Option<String>,
}

impl CertificateConfig for StaticCertificateConfig {
    fn resolve(&self) -> Result<SelfSignedOptions, CertError> {
        let raw_path = self
            .ca_storage_path
            .as_deref()
            .filter(|path| !path.as_os_str().is_empty())
            .ok_or_else(|| {
                CertError::InvalidConfig("CA storage path is not configured".to_string())
            })?;

        Ok(SelfSignedOptions {
            ca_storage_path: expand_home_token(raw_path)?,
            ca_name: non_blank_or(self.ca_name.as_deref(), DEFAULT_CA_NAME),
            algorithm_oid: non_blank_or(self.algorithm_oid.as_deref(), ECDSA_OID),
            subject_name: non_blank_or(self.subject_name.as_deref(), DEFAULT_CA_SUBJECT),
        })
    }
}

/// Runtime capability switch selecting the certificate-creation and CA-loading
/// strategy pair. `Pkcs12Rebuild` routes material through a manually assembled
/// PKCS#12 container instead of the standard pipeline, for platforms whose key
/// stores refuse certain key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyStoreCompat {
    #[default]
    Standard,
    Pkcs12Rebuild,
}

fn non_blank_or(value: Option<&str>, default: &str) -> String {
    match value {
        Some(text) if !text.trim().is_empty() => text.to_string(),
        _ => default.to_string(),
    }
}

fn expand_home_token(path: &Path) -> Result<PathBuf, CertError> {
    let text = path.to_string_lossy();
    if !text.contains(HOME_TOKEN) {
        return Ok(path.to_path_buf());
    }
    let home = env::var("CERTMINT_HOME")
        .or_else(|_| env::var("HOME"))
        .or_else(|_| env::var("USERPROFILE"))
        .map_err(|_| {
            CertError::InvalidConfig(format!(
                "storage path contains {HOME_TOKEN} but no home directory is available"
            ))
        })?;
    Ok(PathBuf::from(text.replace(HOME_TOKEN, &home)))
}

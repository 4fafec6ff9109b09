//! On-demand TLS certificate authority for development and edge proxies.
//!
//! A [`CertificateManager`] owns a persisted root CA and issues host
//! certificates on demand, caching one certificate per host. The CA lives as
//! `<name>.crt.pem`, `<name>.key.pem` and `<name>.pfx` under a configured
//! directory and survives restarts.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use certmint::{CertificateManager, StaticCertificateConfig};
//!
//! # fn main() -> Result<(), certmint::CertError> {
//! let config = StaticCertificateConfig {
//!     ca_storage_path: Some("/var/lib/certmint".into()),
//!     ..StaticCertificateConfig::default()
//! };
//! let manager = CertificateManager::builder()
//!     .config(Arc::new(config))
//!     .build()?;
//! let certificate = manager.get_certificate("example.com")?;
//! let tls = certificate.server_config()?;
//! # let _ = tls;
//! # Ok(())
//! # }
//! ```

pub mod algorithm;
pub mod config;
pub mod errors;
pub mod factory;
pub mod fs_store;
pub mod manager;
pub mod store;

mod pkcs12;

pub use algorithm::{AlgorithmKey, KeyAlgorithm, ECDSA_OID, RSA_OID};
pub use config::{
    CertificateConfig, KeyStoreCompat, SelfSignedOptions, StaticCertificateConfig,
    DEFAULT_CA_NAME, DEFAULT_CA_SUBJECT, HOME_TOKEN,
};
pub use errors::CertError;
pub use factory::{CaCertificate, CertificateFactory, IssuedCertificate, SanBuilder};
pub use fs_store::{FileStore, MemoryFileStore, OsFileStore};
pub use manager::{CertificateManager, CertificateManagerBuilder, IssuerMetricsSnapshot, LeafCacheStatus};
pub use store::{CaLoader, CaStore, DefaultCaLoader, Pkcs12CaLoader};

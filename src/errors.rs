use thiserror::Error;

#[derive(Debug, Error)]
pub enum CertError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),
    #[error("invalid certificate authority material: {0}")]
    CaMaterial(String),
    #[error("invalid key material: {0}")]
    KeyMaterial(String),
    #[error("invalid subject name: {0}")]
    InvalidSubjectName(String),
    #[error("certificate generation failed: {0}")]
    CertificateGeneration(#[from] rcgen::Error),
    #[error("PKCS#12 operation failed: {0}")]
    Pkcs12(#[from] openssl::error::ErrorStack),
    #[error("TLS config build failed: {0}")]
    ConfigBuild(#[from] rustls::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("certificate store lock poisoned")]
    LockPoisoned,
}

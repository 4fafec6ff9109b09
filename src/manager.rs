use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{debug, info};

use crate::algorithm::KeyAlgorithm;
use crate::config::{CertificateConfig, KeyStoreCompat, SelfSignedOptions};
use crate::errors::CertError;
use crate::factory::{CertificateFactory, IssuedCertificate};
use crate::fs_store::{FileStore, OsFileStore};
use crate::store::{CaStore, DefaultCaLoader, Pkcs12CaLoader};

/// Whether a certificate request was served from the cache or freshly issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafCacheStatus {
    Hit,
    Miss,
}

/// Per-host certificate cache with single-flight issuance: concurrent
/// requests for the same host block on one slot, and exactly one of them
/// runs the issue closure.
struct LeafCache {
    slots: Mutex<HashMap<String, Arc<LeafSlot>>>,
}

#[derive(Default)]
struct LeafSlot {
    cell: Mutex<Option<Arc<IssuedCertificate>>>,
}

impl LeafCache {
    fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn get_or_issue(
        &self,
        host: &str,
        issue: impl FnOnce() -> Result<Arc<IssuedCertificate>, CertError>,
    ) -> Result<(Arc<IssuedCertificate>, LeafCacheStatus), CertError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| CertError::LockPoisoned)?;
            slots.entry(host.to_string()).or_default().clone()
        };
        // Holding only the slot lock keeps unrelated hosts issuing in
        // parallel.
        let mut cell = slot.cell.lock().map_err(|_| CertError::LockPoisoned)?;
        if let Some(existing) = cell.as_ref() {
            return Ok((existing.clone(), LeafCacheStatus::Hit));
        }
        let issued = issue()?;
        *cell = Some(issued.clone());
        Ok((issued, LeafCacheStatus::Miss))
    }
}

/// Counters exported by [`CertificateManager::metrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IssuerMetricsSnapshot {
    pub cache_hits: u64,
    pub cache_misses: u64,
    pub leaves_issued: u64,
    pub cas_created: u64,
}

/// Hands out host certificates on demand: resolves configuration, loads or
/// creates the persisted CA, issues leaves and caches them per host.
pub struct CertificateManager {
    config: Arc<dyn CertificateConfig>,
    store: CaStore,
    factory: CertificateFactory,
    cache: LeafCache,
    // Serializes CA load-or-create so a cold start with many hosts produces
    // exactly one CA.
    ca_bootstrap: Mutex<()>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    leaves_issued: AtomicU64,
    cas_created: AtomicU64,
}

impl CertificateManager {
    pub fn builder() -> CertificateManagerBuilder {
        CertificateManagerBuilder::default()
    }

    /// Returns the certificate for `host_name`, issuing and caching it on
    /// first request. `*.example.com` issues for `example.com` with both the
    /// bare and wildcard names in the SAN set. The cache is keyed by the
    /// string exactly as requested.
    pub fn get_certificate(&self, host_name: &str) -> Result<Arc<IssuedCertificate>, CertError> {
        if host_name.trim().is_empty() {
            return Err(CertError::InvalidSubjectName(
                "host name must not be empty".to_string(),
            ));
        }

        let (certificate, status) = self
            .cache
            .get_or_issue(host_name, || self.issue_leaf(host_name))?;
        match status {
            LeafCacheStatus::Hit => {
                self.cache_hits.fetch_add(1, Ordering::Relaxed);
                debug!(host = host_name, "serving cached certificate");
            }
            LeafCacheStatus::Miss => {
                self.cache_misses.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(certificate)
    }

    /// PEM of the CA certificate, for export to client trust stores. Creates
    /// the CA if it does not exist yet.
    pub fn ca_certificate_pem(&self) -> Result<String, CertError> {
        let options = self.config.resolve()?;
        let algorithm = KeyAlgorithm::from_oid(&options.algorithm_oid)?;
        let ca = self.get_or_create_ca(&options, algorithm)?;
        Ok(ca.cert_pem)
    }

    pub fn metrics(&self) -> IssuerMetricsSnapshot {
        IssuerMetricsSnapshot {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            leaves_issued: self.leaves_issued.load(Ordering::Relaxed),
            cas_created: self.cas_created.load(Ordering::Relaxed),
        }
    }

    fn issue_leaf(&self, host_name: &str) -> Result<Arc<IssuedCertificate>, CertError> {
        let options = self.config.resolve()?;
        // Reject unknown algorithms before touching the CA or the cache.
        let algorithm = KeyAlgorithm::from_oid(&options.algorithm_oid)?;
        let ca = self.get_or_create_ca(&options, algorithm)?;

        let (effective_host, wildcard) = match host_name.strip_prefix("*.") {
            Some(domain) => (domain, true),
            None => (host_name, false),
        };
        if effective_host.is_empty() {
            return Err(CertError::InvalidSubjectName(
                "wildcard host has no domain".to_string(),
            ));
        }

        let leaf_key = algorithm.generate_key()?;
        let subject = format!("CN={effective_host}");
        let certificate = self.factory.create_certificate(leaf_key, &ca, &subject, |san| {
            san.add_ip(IpAddr::V4(Ipv4Addr::LOCALHOST));
            san.add_dns(effective_host);
            if wildcard {
                san.add_dns(&format!("*.{effective_host}"));
            }
        })?;

        self.leaves_issued.fetch_add(1, Ordering::Relaxed);
        info!(host = host_name, "issued host certificate");
        Ok(Arc::new(certificate))
    }

    fn get_or_create_ca(
        &self,
        options: &SelfSignedOptions,
        algorithm: KeyAlgorithm,
    ) -> Result<crate::factory::CaCertificate, CertError> {
        let _bootstrap = self.ca_bootstrap.lock().map_err(|_| CertError::LockPoisoned)?;
        if let Some(ca) = self.store.load_ca(options)? {
            // A persisted CA keeps its stored key type even when the
            // configured algorithm has changed; only new leaves follow the
            // configuration.
            return Ok(ca);
        }

        let key = algorithm.generate_key()?;
        let ca = self.factory.create_ca(key, &options.subject_name)?;
        self.store.save_ca(options, &ca)?;
        self.cas_created.fetch_add(1, Ordering::Relaxed);
        Ok(ca)
    }
}

/// Assembles a [`CertificateManager`], pairing the creation and loading
/// strategies that match the requested key-store compatibility mode.
#[derive(Default)]
pub struct CertificateManagerBuilder {
    config: Option<Arc<dyn CertificateConfig>>,
    file_store: Option<Arc<dyn FileStore>>,
    compat: KeyStoreCompat,
}

impl CertificateManagerBuilder {
    pub fn config(mut self, config: Arc<dyn CertificateConfig>) -> Self {
        self.config = Some(config);
        self
    }

    pub fn file_store(mut self, file_store: Arc<dyn FileStore>) -> Self {
        self.file_store = Some(file_store);
        self
    }

    pub fn key_store_compat(mut self, compat: KeyStoreCompat) -> Self {
        self.compat = compat;
        self
    }

    pub fn build(self) -> Result<CertificateManager, CertError> {
        let config = self.config.ok_or_else(|| {
            CertError::InvalidConfig("certificate configuration is required".to_string())
        })?;
        let file_store = self
            .file_store
            .unwrap_or_else(|| Arc::new(OsFileStore));
        let loader: Box<dyn crate::store::CaLoader> = match self.compat {
            KeyStoreCompat::Standard => Box::new(DefaultCaLoader),
            KeyStoreCompat::Pkcs12Rebuild => Box::new(Pkcs12CaLoader),
        };
        Ok(CertificateManager {
            config,
            store: CaStore::new(file_store, loader),
            factory: CertificateFactory::new(self.compat),
            cache: LeafCache::new(),
            ca_bootstrap: Mutex::new(()),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            leaves_issued: AtomicU64::new(0),
            cas_created: AtomicU64::new(0),
        })
    }
}

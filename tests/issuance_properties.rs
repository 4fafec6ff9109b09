//! End-to-end issuance checks against the persisted CA and the produced
//! X.509 material.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use time::{Duration, OffsetDateTime};
use x509_parser::extensions::GeneralName;
use x509_parser::parse_x509_certificate;
use x509_parser::prelude::FromDer;
use x509_parser::x509::X509Name;

use certmint::{
    CertError, CertificateManager, KeyStoreCompat, StaticCertificateConfig, ECDSA_OID, RSA_OID,
};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).expect("clock");
    std::env::temp_dir().join(format!(
        "{prefix}-{}-{}",
        std::process::id(),
        now.as_nanos()
    ))
}

fn manager_in(dir: &PathBuf, algorithm_oid: &str) -> CertificateManager {
    let config = StaticCertificateConfig {
        ca_storage_path: Some(dir.clone()),
        ca_name: Some("testca".to_string()),
        algorithm_oid: Some(algorithm_oid.to_string()),
        subject_name: Some("CN=Issuance Test CA".to_string()),
    };
    CertificateManager::builder()
        .config(Arc::new(config))
        .build()
        .expect("build manager")
}

fn common_name(name: &X509Name<'_>) -> String {
    name.iter_common_name()
        .next()
        .expect("common name")
        .as_str()
        .expect("utf8")
        .to_string()
}

fn dns_names(cert: &x509_parser::certificate::X509Certificate<'_>) -> Vec<String> {
    let san = cert
        .subject_alternative_name()
        .expect("san parse")
        .expect("san present");
    san.value
        .general_names
        .iter()
        .filter_map(|name| match name {
            GeneralName::DNSName(dns) => Some(dns.to_string()),
            _ => None,
        })
        .collect()
}

fn has_loopback_ip(cert: &x509_parser::certificate::X509Certificate<'_>) -> bool {
    let san = cert
        .subject_alternative_name()
        .expect("san parse")
        .expect("san present");
    san.value
        .general_names
        .iter()
        .any(|name| matches!(name, GeneralName::IPAddress(bytes) if *bytes == [127, 0, 0, 1]))
}

#[test]
fn issued_certificate_carries_subject_san_and_chain() {
    let dir = unique_temp_dir("certmint-issue");
    let manager = manager_in(&dir, ECDSA_OID);

    let issued = manager.get_certificate("svc.example.com").expect("issue");
    let (_, leaf) = parse_x509_certificate(issued.cert_der.as_ref()).expect("parse leaf");

    assert_eq!(common_name(leaf.subject()), "svc.example.com");
    assert_eq!(common_name(leaf.issuer()), "Issuance Test CA");
    assert_eq!(dns_names(&leaf), vec!["svc.example.com".to_string()]);
    assert!(has_loopback_ip(&leaf));

    // The chain presented to clients is leaf then CA, and the CA really
    // signed the leaf.
    let chain = issued.chain();
    assert_eq!(chain.len(), 2);
    let (_, ca) = parse_x509_certificate(chain[1].as_ref()).expect("parse ca");
    leaf.verify_signature(Some(ca.public_key()))
        .expect("leaf verifies against ca");

    issued.server_config().expect("rustls config");
    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn wildcard_request_issues_for_the_domain_with_both_san_forms() {
    let dir = unique_temp_dir("certmint-wildcard");
    let manager = manager_in(&dir, ECDSA_OID);

    let issued = manager.get_certificate("*.example.com").expect("issue");
    let (_, leaf) = parse_x509_certificate(issued.cert_der.as_ref()).expect("parse");

    assert_eq!(common_name(leaf.subject()), "example.com");
    let names = dns_names(&leaf);
    assert!(names.contains(&"example.com".to_string()));
    assert!(names.contains(&"*.example.com".to_string()));
    assert_eq!(names.len(), 2);

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn ca_is_persisted_as_three_files_and_reused_across_managers() {
    let dir = unique_temp_dir("certmint-persist");
    let first = manager_in(&dir, ECDSA_OID);
    let issued = first.get_certificate("one.test").expect("issue");

    for name in ["testca.crt.pem", "testca.key.pem", "testca.pfx"] {
        assert!(dir.join(name).exists(), "missing {name}");
    }
    let entries = fs::read_dir(&dir).expect("read dir").count();
    assert_eq!(entries, 3, "no stray files next to the CA");

    // A second manager picks up the same CA from disk, even with a different
    // configured subject.
    let config = StaticCertificateConfig {
        ca_storage_path: Some(dir.clone()),
        ca_name: Some("testca".to_string()),
        algorithm_oid: Some(ECDSA_OID.to_string()),
        subject_name: Some("CN=Some Other Subject".to_string()),
    };
    let second = CertificateManager::builder()
        .config(Arc::new(config))
        .build()
        .expect("build");
    let reissued = second.get_certificate("two.test").expect("issue");

    assert_eq!(issued.ca_cert_pem, reissued.ca_cert_pem);
    assert_eq!(second.metrics().cas_created, 0);
    let (_, leaf) = parse_x509_certificate(reissued.cert_der.as_ref()).expect("parse");
    assert_eq!(common_name(leaf.issuer()), "Issuance Test CA");

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn rsa_configuration_produces_pkcs1_key_material() {
    let dir = unique_temp_dir("certmint-rsa");
    let manager = manager_in(&dir, RSA_OID);

    let issued = manager.get_certificate("rsa.test").expect("issue");
    assert!(issued.key_pem.contains("BEGIN RSA PRIVATE KEY"));

    let key_file = fs::read_to_string(dir.join("testca.key.pem")).expect("read key");
    assert!(key_file.contains("BEGIN RSA PRIVATE KEY"));

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn ecdsa_configuration_produces_sec1_key_material() {
    let dir = unique_temp_dir("certmint-ec");
    let manager = manager_in(&dir, ECDSA_OID);

    let issued = manager.get_certificate("ec.test").expect("issue");
    assert!(issued.key_pem.contains("BEGIN EC PRIVATE KEY"));

    let key_file = fs::read_to_string(dir.join("testca.key.pem")).expect("read key");
    assert!(key_file.contains("BEGIN EC PRIVATE KEY"));

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn validity_windows_are_backdated_one_day() {
    let dir = unique_temp_dir("certmint-validity");
    let manager = manager_in(&dir, ECDSA_OID);

    let issued = manager.get_certificate("window.test").expect("issue");
    let (_, leaf) = parse_x509_certificate(issued.cert_der.as_ref()).expect("parse leaf");
    let chain = issued.chain();
    let (_, ca) = parse_x509_certificate(chain[1].as_ref()).expect("parse ca");
    let now = OffsetDateTime::now_utc();

    let tolerance = Duration::seconds(30);
    let leaf_not_before =
        OffsetDateTime::from_unix_timestamp(leaf.validity().not_before.timestamp()).expect("ts");
    let leaf_not_after =
        OffsetDateTime::from_unix_timestamp(leaf.validity().not_after.timestamp()).expect("ts");
    assert!((now - Duration::days(1) - leaf_not_before).abs() < tolerance);
    assert!((now + Duration::days(365) - leaf_not_after).abs() < tolerance);

    let ca_not_before =
        OffsetDateTime::from_unix_timestamp(ca.validity().not_before.timestamp()).expect("ts");
    let ca_not_after =
        OffsetDateTime::from_unix_timestamp(ca.validity().not_after.timestamp()).expect("ts");
    assert!((now - Duration::days(1) - ca_not_before).abs() < tolerance);
    assert!((now + Duration::days(3650) - ca_not_after).abs() < tolerance);

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn unsupported_algorithm_leaves_the_storage_directory_untouched() {
    let dir = unique_temp_dir("certmint-badoid");
    let config = StaticCertificateConfig {
        ca_storage_path: Some(dir.clone()),
        algorithm_oid: Some("1.2.3.4".to_string()),
        ..StaticCertificateConfig::default()
    };
    let manager = CertificateManager::builder()
        .config(Arc::new(config))
        .build()
        .expect("build");

    let error = manager.get_certificate("example.com").expect_err("bad oid");
    assert!(matches!(error, CertError::UnsupportedAlgorithm(_)), "{error}");
    assert!(!dir.exists());
}

#[test]
fn pfx_bundle_opens_without_a_password() {
    let dir = unique_temp_dir("certmint-pfx");
    let manager = manager_in(&dir, ECDSA_OID);
    manager.get_certificate("pfx.test").expect("issue");

    let der = fs::read(dir.join("testca.pfx")).expect("read pfx");
    let parsed = openssl::pkcs12::Pkcs12::from_der(&der)
        .expect("pkcs12 der")
        .parse2("")
        .expect("password-less parse");
    let cert = parsed.cert.expect("certificate present");
    let key = parsed.pkey.expect("key present");
    assert!(cert.public_key().expect("public key").public_eq(&key));

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn pkcs12_rebuild_mode_issues_working_certificates() {
    let dir = unique_temp_dir("certmint-rebuild");
    let config = StaticCertificateConfig {
        ca_storage_path: Some(dir.clone()),
        ca_name: Some("testca".to_string()),
        algorithm_oid: Some(ECDSA_OID.to_string()),
        subject_name: Some("CN=Rebuild Test CA".to_string()),
    };
    let manager = CertificateManager::builder()
        .config(Arc::new(config.clone()))
        .key_store_compat(KeyStoreCompat::Pkcs12Rebuild)
        .build()
        .expect("build");

    let issued = manager.get_certificate("rebuild.test").expect("issue");
    let (_, leaf) = parse_x509_certificate(issued.cert_der.as_ref()).expect("parse");
    assert_eq!(common_name(leaf.issuer()), "Rebuild Test CA");
    issued.server_config().expect("rustls config");

    // A rebuild-mode manager reloads the CA it persisted.
    let reloaded = CertificateManager::builder()
        .config(Arc::new(config))
        .key_store_compat(KeyStoreCompat::Pkcs12Rebuild)
        .build()
        .expect("build");
    reloaded.get_certificate("second.test").expect("issue");
    assert_eq!(reloaded.metrics().cas_created, 0);

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn corrupted_key_file_fails_loudly_instead_of_regenerating() {
    let dir = unique_temp_dir("certmint-corrupt");
    let manager = manager_in(&dir, ECDSA_OID);
    manager.get_certificate("first.test").expect("issue");

    let cert_pem = fs::read_to_string(dir.join("testca.crt.pem")).expect("read cert");
    fs::write(dir.join("testca.key.pem"), "not a key").expect("corrupt");

    let fresh = manager_in(&dir, ECDSA_OID);
    fresh
        .get_certificate("second.test")
        .expect_err("corrupt key must not be silently replaced");
    // The certificate on disk is untouched.
    assert_eq!(
        fs::read_to_string(dir.join("testca.crt.pem")).expect("read cert"),
        cert_pem
    );

    fs::remove_dir_all(&dir).expect("cleanup");
}

#[test]
fn der_and_pem_describe_the_same_certificate() {
    let dir = unique_temp_dir("certmint-derpem");
    let manager = manager_in(&dir, ECDSA_OID);

    let issued = manager.get_certificate("same.test").expect("issue");
    let from_pem = x509_parser::pem::parse_x509_pem(issued.cert_pem.as_bytes())
        .expect("pem")
        .1;
    assert_eq!(from_pem.contents, issued.cert_der.as_ref());

    let _ = x509_parser::certificate::X509Certificate::from_der(issued.cert_der.as_ref())
        .expect("der parses");
    fs::remove_dir_all(&dir).expect("cleanup");
}

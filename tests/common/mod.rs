#![allow(dead_code)]

use std::sync::{Arc, Once};

use identity_ca::generate_root_ca::RsaRootCABuilder;
use identity_ca::pki_generator::{CryptoGenerator, SubjectTemplate};
use identity_ca::service::CertificateService;
use identity_ca::storage::MemoryStore;

static INIT: Once = Once::new();

/// Route `tracing` output to the test harness when `RUST_LOG` is set.
pub fn init_test_logging() {
    INIT.call_once(|| {
        if std::env::var("RUST_LOG").is_ok() {
            tracing_subscriber::fmt()
                .with_test_writer()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .try_init()
                .ok();
        }
    });
}

/// Throwaway self-signed root CA as `(certificate PEM, key PEM)`.
pub fn root_ca_pem() -> (String, String) {
    RsaRootCABuilder::new()
        .subject(SubjectTemplate {
            common_name: "Integration Test Root".to_string(),
            ..SubjectTemplate::default()
        })
        .key_size(2048)
        .validity_days(30)
        .build_pem()
        .expect("root CA generation")
}

pub fn generator() -> CryptoGenerator {
    let (cert_pem, key_pem) = root_ca_pem();
    CryptoGenerator::builder()
        .default_ttl_days(30)
        .rsa_bits(2048)
        .load_root_ca(cert_pem.as_bytes(), key_pem.as_bytes())
        .expect("root CA load")
}

pub type TestService = CertificateService<CryptoGenerator, MemoryStore>;

pub fn service() -> TestService {
    init_test_logging();
    CertificateService::new(Arc::new(generator()), Arc::new(MemoryStore::new()))
}

/// RFC 3339 timestamp `days` from now (negative for the past).
pub fn days_from_now(days: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::days(days)).to_rfc3339()
}

//! Root CA Certificate Generation Module
//!
//! Bootstraps the trust root every issued identity certificate chains to. The service itself
//! only ever loads root material from disk; this module creates it once.
//!
//! # Certificate Properties
//! - **Self-signed**: Issuer and subject are the same
//! - **Key Usage**: keyCertSign, cRLSign, digitalSignature
//! - **Basic Constraints**: CA=true, pathlen=1
//! - **Default Key Size**: RSA 4096-bit
//! - **Default Validity**: 3650 days
//!
//! # Example
//! ```rust,no_run
//! use identity_ca::generate_root_ca::RsaRootCABuilder;
//! # fn example() -> identity_ca::error::CaResult<()> {
//! let (cert_pem, key_pem) = RsaRootCABuilder::new()
//!     .validity_days(3650)
//!     .build_pem()?;
//! # Ok(())
//! # }
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage};
use openssl::x509::X509;
use tracing::info;

use crate::error::{CaError, CaResult};
use crate::pki_generator::{build_subject_name, SubjectTemplate};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const RSA_KEY_SIZE_DEFAULT: u32 = 4096;
const ROOT_CA_PATH_LENGTH: u32 = 1;
const ROOT_CA_VALIDITY_DAYS_DEFAULT: u32 = 3650;

fn generation(context: &'static str) -> impl FnOnce(ErrorStack) -> CaError {
    move |e| CaError::Generation(format!("{}: {}", context, e))
}

// ================= RSA Root CA Builder =================

/// Builder for a self-signed RSA root CA.
///
/// Distinguished name fields come from a [`SubjectTemplate`]; empty fields are omitted.
#[derive(Debug, Clone)]
pub struct RsaRootCABuilder {
    subject: SubjectTemplate,
    key_size: u32,
    validity_days: u32,
}

impl Default for RsaRootCABuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RsaRootCABuilder {
    pub fn new() -> Self {
        Self {
            subject: SubjectTemplate::default(),
            key_size: RSA_KEY_SIZE_DEFAULT,
            validity_days: ROOT_CA_VALIDITY_DAYS_DEFAULT,
        }
    }

    pub fn subject(mut self, subject: SubjectTemplate) -> Self {
        self.subject = subject;
        self
    }

    pub fn key_size(mut self, bits: u32) -> Self {
        self.key_size = bits;
        self
    }

    pub fn validity_days(mut self, days: u32) -> Self {
        self.validity_days = days;
        self
    }

    /// Generate the RSA key pair and the self-signed certificate.
    pub fn build(self) -> CaResult<(PKey<Private>, X509)> {
        let rsa =
            Rsa::generate(self.key_size).map_err(generation("Failed to generate RSA keypair"))?;
        let private_key = PKey::from_rsa(rsa).map_err(generation("Failed to create private key"))?;

        let mut builder = X509::builder().map_err(generation("Failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(generation("Failed to set version"))?;

        // Generate random 128-bit (16-byte) serial number
        let mut serial = BigNum::new().map_err(generation("Failed to allocate serial"))?;
        serial
            .rand(128, MsbOption::MAYBE_ZERO, false)
            .map_err(generation("Failed to generate serial"))?;
        let asn1_serial = serial
            .to_asn1_integer()
            .map_err(generation("Failed to encode serial"))?;
        builder
            .set_serial_number(&asn1_serial)
            .map_err(generation("Failed to set serial"))?;

        let name =
            build_subject_name(&self.subject, None).map_err(generation("Failed to build name"))?;
        builder
            .set_subject_name(&name)
            .map_err(generation("Failed to set subject"))?;
        builder
            .set_issuer_name(&name)
            .map_err(generation("Failed to set issuer"))?;

        let not_before = openssl::asn1::Asn1Time::days_from_now(0)
            .map_err(generation("Failed to create not_before"))?;
        builder
            .set_not_before(&not_before)
            .map_err(generation("Failed to set not_before"))?;
        let not_after = openssl::asn1::Asn1Time::days_from_now(self.validity_days)
            .map_err(generation("Failed to create not_after"))?;
        builder
            .set_not_after(&not_after)
            .map_err(generation("Failed to set not_after"))?;

        builder
            .set_pubkey(&private_key)
            .map_err(generation("Failed to set public key"))?;

        let bc = BasicConstraints::new()
            .critical()
            .ca()
            .pathlen(ROOT_CA_PATH_LENGTH)
            .build()
            .map_err(generation("Failed to build BasicConstraints"))?;
        builder
            .append_extension(bc)
            .map_err(generation("Failed to add BasicConstraints"))?;

        let ku = KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()
            .map_err(generation("Failed to build KeyUsage"))?;
        builder
            .append_extension(ku)
            .map_err(generation("Failed to add KeyUsage"))?;

        builder
            .sign(&private_key, MessageDigest::sha256())
            .map_err(generation("Failed to sign certificate"))?;

        Ok((private_key, builder.build()))
    }

    /// Like [`build`](Self::build), returning `(certificate PEM, PKCS#1 key PEM)`.
    pub fn build_pem(self) -> CaResult<(String, String)> {
        let (private_key, certificate) = self.build()?;
        let cert_pem = certificate
            .to_pem()
            .map_err(generation("Failed to encode certificate"))?;
        let key_pem = private_key
            .rsa()
            .and_then(|rsa| rsa.private_key_to_pem())
            .map_err(generation("Failed to encode private key"))?;
        let cert_pem = String::from_utf8(cert_pem).map_err(|e| CaError::Generation(e.to_string()))?;
        let key_pem = String::from_utf8(key_pem).map_err(|e| CaError::Generation(e.to_string()))?;
        Ok((cert_pem, key_pem))
    }
}

#[cfg(unix)]
fn restrict_permissions(options: &mut OpenOptions) {
    use std::os::unix::fs::OpenOptionsExt;
    options.mode(0o600);
}

#[cfg(not(unix))]
fn restrict_permissions(_options: &mut OpenOptions) {}

fn create_new(path: &Path, contents: &[u8], private: bool) -> CaResult<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    if private {
        restrict_permissions(&mut options);
    }
    let mut file = options.open(path).map_err(|e| {
        CaError::Config(format!("Failed to create {}: {}", path.display(), e))
    })?;
    file.write_all(contents)?;
    file.flush()?;
    Ok(())
}

/// Write a freshly generated root CA to `cert_path` and `key_path`.
///
/// Refuses to run when either file already exists; a trust root is never replaced in place.
pub fn write_root_ca_files(
    builder: RsaRootCABuilder,
    cert_path: &Path,
    key_path: &Path,
) -> CaResult<()> {
    for path in [cert_path, key_path] {
        if path.exists() {
            return Err(CaError::Config(format!(
                "{} already exists, refusing to overwrite",
                path.display()
            )));
        }
    }
    let (cert_pem, key_pem) = builder.build_pem()?;
    create_new(key_path, key_pem.as_bytes(), true)?;
    create_new(cert_path, cert_pem.as_bytes(), false)?;
    info!(
        cert = %cert_path.display(),
        key = %key_path.display(),
        "root CA written"
    );
    Ok(())
}

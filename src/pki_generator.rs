//! Certificate Generator Module
//!
//! All cryptography lives here: key generation, signing, chain verification and the identity
//! embedding/extraction scheme. The generator holds the root CA material for the lifetime of
//! the process and never touches storage.
//!
//! # Issued Certificate Properties
//! - **Version**: X.509v3, SHA-256 signature by the root CA key
//! - **Key**: RSA (configurable bit length, default 2048) or EC (`P256`, `P384`, `P521`)
//! - **Serial Number**: random 128-bit number, reported in decimal
//! - **Subject**: organizational template plus `serialNumber` = decimal serial
//! - **Issuer**: the root CA's subject
//! - **Basic Constraints**: CA=true, critical
//! - **Key Usage**: digitalSignature, keyEncipherment, keyCertSign
//! - **Extended Key Usage**: clientAuth, serverAuth
//! - **Identity**: `UID:<uid>` and `DID:<did>` under [`IDENTITY_OID`]
//!
//! # Example
//! ```rust,no_run
//! use identity_ca::pki_generator::{CryptoGenerator, GenerationOptions, Generator, SubjectTemplate};
//! # fn example(root_crt: &[u8], root_key: &[u8]) -> identity_ca::error::CaResult<()> {
//! let generator = CryptoGenerator::builder()
//!     .subject(SubjectTemplate::default())
//!     .default_ttl_days(30)
//!     .rsa_bits(2048)
//!     .load_root_ca(root_crt, root_key)?;
//!
//! let material = generator.generate(&GenerationOptions::new("alice", "phone-1"))?;
//! assert_eq!(
//!     generator.parse_uid_did(&material.certificate),
//!     ("alice".to_string(), "phone-1".to_string())
//! );
//! # Ok(())
//! # }
//! ```

use chrono::{DateTime, Duration, Utc};
use openssl::asn1::{Asn1Object, Asn1OctetString, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::ec::{EcGroup, EcKey};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::nid::Nid;
use openssl::pkey::{Id, PKey, Private};
use openssl::rsa::Rsa;
use openssl::stack::Stack;
use openssl::symm::Cipher;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage};
use openssl::x509::store::X509StoreBuilder;
use openssl::x509::{X509Extension, X509Name, X509Req, X509StoreContext, X509};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tracing::debug;
use x509_parser::pem::parse_x509_pem;

use crate::error::{CaError, CaResult};
use crate::identity::{self, IDENTITY_OID};

const X509_VERSION_3: i32 = 2; // X509 version 3 is represented by 2
const SERIAL_BITS: i32 = 128;
const MIN_RSA_BITS: u32 = 1024;
pub const DEFAULT_RSA_BITS: u32 = 2048;
pub const DEFAULT_TTL_DAYS: u32 = 30;

/// Operations the lifecycle service needs from the cryptographic engine.
pub trait Generator: Send + Sync {
    /// Create a fresh key pair and a certificate for it signed by the root CA.
    fn generate(&self, options: &GenerationOptions) -> CaResult<CertificateMaterial>;

    /// Verify `candidate_pem` chains to the root CA, optionally through `trust_anchor_pem`,
    /// and that the current time lies within its validity window.
    fn validate(&self, candidate_pem: &str, trust_anchor_pem: Option<&str>) -> CaResult<bool>;

    /// Embedded `(uid, did)`; empty strings when absent or unparseable.
    fn parse_uid_did(&self, content: &str) -> (String, String);

    /// Validity bounds as `(not_after, not_before)`.
    fn parse_dates(&self, content: &str) -> CaResult<(DateTime<Utc>, DateTime<Utc>)>;

    /// Decimal serial number.
    fn parse_serial(&self, content: &str) -> CaResult<String>;
}

/// Organizational fields every issued subject starts from. Empty fields are left out.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectTemplate {
    pub common_name: String,
    pub country: String,
    pub province: String,
    pub locality: String,
    pub organization: String,
    pub organizational_unit: String,
}

impl Default for SubjectTemplate {
    fn default() -> Self {
        Self {
            common_name: "identity-ca".to_string(),
            country: "US".to_string(),
            province: String::new(),
            locality: String::new(),
            organization: "Identity CA".to_string(),
            organizational_unit: "IT Department".to_string(),
        }
    }
}

/// Key algorithm for the issued certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa { bits: u32 },
    /// Named curve: `P256`, `P384` or `P521`.
    Ec { curve: String },
}

/// Request-scoped issuance parameters. Never persisted.
#[derive(Debug, Default)]
pub struct GenerationOptions {
    pub uid: String,
    pub did: String,
    /// Encrypts the issued private key when present.
    pub password: Option<SecretString>,
    /// RFC 3339 `notBefore`; defaults to now.
    pub valid_from: Option<String>,
    /// RFC 3339 `notAfter`; defaults to now + TTL.
    pub valid_for: Option<String>,
    /// Defaults to RSA with the generator's configured bit length.
    pub key_algorithm: Option<KeyAlgorithm>,
}

impl GenerationOptions {
    pub fn new(uid: impl Into<String>, did: impl Into<String>) -> Self {
        Self {
            uid: uid.into(),
            did: did.into(),
            ..Default::default()
        }
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(SecretString::from(password.into()));
        self
    }

    pub fn valid_from(mut self, timestamp: impl Into<String>) -> Self {
        self.valid_from = Some(timestamp.into());
        self
    }

    pub fn valid_for(mut self, timestamp: impl Into<String>) -> Self {
        self.valid_for = Some(timestamp.into());
        self
    }

    pub fn key_algorithm(mut self, algorithm: KeyAlgorithm) -> Self {
        self.key_algorithm = Some(algorithm);
        self
    }
}

/// Output of a successful [`Generator::generate`].
#[derive(Debug, Clone)]
pub struct CertificateMaterial {
    /// PEM `CERTIFICATE` block.
    pub certificate: String,
    /// PEM `RSA PRIVATE KEY` / `EC PRIVATE KEY` block, encrypted when a password was given.
    pub private_key: String,
    pub serial: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

fn generation(context: &'static str) -> impl FnOnce(ErrorStack) -> CaError {
    move |e| CaError::Generation(format!("{}: {}", context, e))
}

fn validation(context: &'static str) -> impl FnOnce(ErrorStack) -> CaError {
    move |e| CaError::Validation(format!("{}: {}", context, e))
}

/// Build an X.509 name from the template, skipping empty fields.
pub(crate) fn build_subject_name(
    template: &SubjectTemplate,
    serial: Option<&str>,
) -> Result<X509Name, ErrorStack> {
    let mut name_builder = X509Name::builder()?;
    let entries = [
        (Nid::COMMONNAME, template.common_name.as_str()),
        (Nid::COUNTRYNAME, template.country.as_str()),
        (Nid::STATEORPROVINCENAME, template.province.as_str()),
        (Nid::LOCALITYNAME, template.locality.as_str()),
        (Nid::ORGANIZATIONNAME, template.organization.as_str()),
        (Nid::ORGANIZATIONALUNITNAME, template.organizational_unit.as_str()),
        (Nid::SERIALNUMBER, serial.unwrap_or_default()),
    ];
    for (nid, value) in entries {
        if !value.is_empty() {
            name_builder.append_entry_by_nid(nid, value)?;
        }
    }
    Ok(name_builder.build())
}

fn parse_timestamp(value: Option<&str>, what: &str) -> CaResult<Option<DateTime<Utc>>> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(text) => DateTime::parse_from_rfc3339(text)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| CaError::Generation(format!("Failed to parse {} date: {}", what, e))),
    }
}

// Certificates carry whole seconds only.
fn truncate_to_seconds(t: DateTime<Utc>) -> CaResult<DateTime<Utc>> {
    DateTime::from_timestamp(t.timestamp(), 0)
        .ok_or_else(|| CaError::Generation(format!("timestamp out of range: {}", t)))
}

fn asn1_time(t: DateTime<Utc>) -> Result<Asn1Time, ErrorStack> {
    Asn1Time::from_unix(t.timestamp() as _)
}

// ================= Generator Builder =================

/// Builder for [`CryptoGenerator`]. The generator only comes into existence once root CA
/// material has been parsed.
#[derive(Debug, Clone)]
pub struct CryptoGeneratorBuilder {
    subject: SubjectTemplate,
    default_ttl_days: u32,
    rsa_bits: u32,
}

impl CryptoGeneratorBuilder {
    pub fn subject(mut self, subject: SubjectTemplate) -> Self {
        self.subject = subject;
        self
    }

    /// Lifetime applied when a request does not carry `valid_for`.
    pub fn default_ttl_days(mut self, days: u32) -> Self {
        self.default_ttl_days = days;
        self
    }

    pub fn rsa_bits(mut self, bits: u32) -> Self {
        self.rsa_bits = bits;
        self
    }

    /// Parse the root CA certificate and its RSA private key (PEM).
    ///
    /// # Errors
    /// `CaError::Config` if either is empty or malformed, or if the key does not belong to
    /// the certificate.
    pub fn load_root_ca(self, cert_pem: &[u8], key_pem: &[u8]) -> CaResult<CryptoGenerator> {
        if cert_pem.is_empty() {
            return Err(CaError::Config("root certificate is empty".to_string()));
        }
        if key_pem.is_empty() {
            return Err(CaError::Config(
                "root certificate private key is empty".to_string(),
            ));
        }
        let root_cert = X509::from_pem(cert_pem)
            .map_err(|e| CaError::Config(format!("Failed to parse root certificate: {}", e)))?;
        let rsa = Rsa::private_key_from_pem(key_pem).map_err(|e| {
            CaError::Config(format!(
                "Failed to parse root certificate private key: {}",
                e
            ))
        })?;
        let root_key = PKey::from_rsa(rsa)
            .map_err(|e| CaError::Config(format!("Failed to wrap root private key: {}", e)))?;

        let matches = root_cert
            .public_key()
            .map(|public| public.public_eq(&root_key))
            .map_err(|e| CaError::Config(format!("Failed to read root public key: {}", e)))?;
        if !matches {
            return Err(CaError::Config(
                "root private key does not match root certificate".to_string(),
            ));
        }

        Ok(CryptoGenerator {
            subject: self.subject,
            default_ttl_days: self.default_ttl_days,
            rsa_bits: self.rsa_bits,
            root_cert,
            root_key,
        })
    }
}

// ================= Generator =================

/// openssl-backed [`Generator`].
///
/// Immutable after construction, so a single instance is shared by every request.
pub struct CryptoGenerator {
    subject: SubjectTemplate,
    default_ttl_days: u32,
    rsa_bits: u32,
    root_cert: X509,
    root_key: PKey<Private>,
}

impl std::fmt::Debug for CryptoGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CryptoGenerator")
            .field("subject", &self.subject)
            .field("default_ttl_days", &self.default_ttl_days)
            .field("rsa_bits", &self.rsa_bits)
            .field("root_key", &"<redacted>")
            .finish()
    }
}

impl CryptoGenerator {
    pub fn builder() -> CryptoGeneratorBuilder {
        CryptoGeneratorBuilder {
            subject: SubjectTemplate::default(),
            default_ttl_days: DEFAULT_TTL_DAYS,
            rsa_bits: DEFAULT_RSA_BITS,
        }
    }

    /// PEM of the trust root, for clients that need to pin it.
    pub fn root_certificate_pem(&self) -> CaResult<String> {
        let pem = self
            .root_cert
            .to_pem()
            .map_err(|e| CaError::Config(format!("Failed to encode root certificate: {}", e)))?;
        String::from_utf8(pem).map_err(|e| CaError::Config(e.to_string()))
    }

    fn generate_key(&self, algorithm: Option<&KeyAlgorithm>) -> CaResult<PKey<Private>> {
        match algorithm {
            None => self.generate_rsa(self.rsa_bits),
            Some(KeyAlgorithm::Rsa { bits }) => self.generate_rsa(*bits),
            Some(KeyAlgorithm::Ec { curve }) => {
                let nid = match curve.to_ascii_uppercase().as_str() {
                    "P256" | "P-256" => Nid::X9_62_PRIME256V1,
                    "P384" | "P-384" => Nid::SECP384R1,
                    "P521" | "P-521" => Nid::SECP521R1,
                    other => {
                        return Err(CaError::Generation(format!(
                            "Unrecognized elliptic curve: {}",
                            other
                        )))
                    }
                };
                let group =
                    EcGroup::from_curve_name(nid).map_err(generation("Failed to load curve"))?;
                let ec = EcKey::generate(&group)
                    .map_err(generation("Failed to generate EC private key"))?;
                PKey::from_ec_key(ec).map_err(generation("Failed to create private key"))
            }
        }
    }

    fn generate_rsa(&self, bits: u32) -> CaResult<PKey<Private>> {
        if bits < MIN_RSA_BITS {
            return Err(CaError::Generation(format!(
                "RSA key size {} is below the minimum of {} bits",
                bits, MIN_RSA_BITS
            )));
        }
        let rsa = Rsa::generate(bits).map_err(generation("Failed to generate private key"))?;
        PKey::from_rsa(rsa).map_err(generation("Failed to create private key"))
    }

    /// Signing request carrying the subject, the new public key and the identity extensions.
    fn build_request(
        &self,
        options: &GenerationOptions,
        private_key: &PKey<Private>,
        serial: &str,
    ) -> CaResult<X509Req> {
        let mut req = X509Req::builder().map_err(generation("Failed to create CSR builder"))?;
        let subject = build_subject_name(&self.subject, Some(serial))
            .map_err(generation("Failed to build subject"))?;
        req.set_subject_name(&subject)
            .map_err(generation("Failed to set CSR subject"))?;
        req.set_pubkey(private_key)
            .map_err(generation("Failed to set CSR public key"))?;

        let oid =
            Asn1Object::from_str(IDENTITY_OID).map_err(generation("Failed to load identity OID"))?;
        let mut extensions: Stack<X509Extension> =
            Stack::new().map_err(generation("Failed to allocate extensions"))?;
        for value in [
            identity::uid_value(&options.uid),
            identity::did_value(&options.did),
        ] {
            let contents = Asn1OctetString::new_from_bytes(value.as_bytes())
                .map_err(generation("Failed to encode identity value"))?;
            let extension = X509Extension::new_from_der(&oid, false, &contents)
                .map_err(generation("Failed to build identity extension"))?;
            extensions
                .push(extension)
                .map_err(generation("Failed to collect identity extension"))?;
        }
        req.add_extensions(&extensions)
            .map_err(generation("Failed to add CSR extensions"))?;
        req.sign(private_key, MessageDigest::sha256())
            .map_err(generation("Failed to sign CSR"))?;
        let req = req.build();

        let public = req
            .public_key()
            .map_err(generation("Failed to read CSR public key"))?;
        if !req
            .verify(&public)
            .map_err(generation("Failed to verify CSR"))?
        {
            return Err(CaError::Generation("CSR signature does not verify".to_string()));
        }
        Ok(req)
    }

    fn sign_request(
        &self,
        req: &X509Req,
        serial: &BigNum,
        not_before: DateTime<Utc>,
        not_after: DateTime<Utc>,
    ) -> CaResult<X509> {
        let mut builder = X509::builder().map_err(generation("Failed to create X509 builder"))?;
        builder
            .set_version(X509_VERSION_3)
            .map_err(generation("Failed to set version"))?;
        let asn1_serial = serial
            .to_asn1_integer()
            .map_err(generation("Failed to encode serial"))?;
        builder
            .set_serial_number(&asn1_serial)
            .map_err(generation("Failed to set serial"))?;
        builder
            .set_subject_name(req.subject_name())
            .map_err(generation("Failed to set subject"))?;
        builder
            .set_issuer_name(self.root_cert.subject_name())
            .map_err(generation("Failed to set issuer from root CA"))?;

        let start = asn1_time(not_before).map_err(generation("Failed to create not_before"))?;
        builder
            .set_not_before(&start)
            .map_err(generation("Failed to set not_before"))?;
        let end = asn1_time(not_after).map_err(generation("Failed to create not_after"))?;
        builder
            .set_not_after(&end)
            .map_err(generation("Failed to set not_after"))?;

        let public = req
            .public_key()
            .map_err(generation("Failed to read CSR public key"))?;
        builder
            .set_pubkey(&public)
            .map_err(generation("Failed to set public key"))?;

        let bc = BasicConstraints::new()
            .critical()
            .ca()
            .build()
            .map_err(generation("Failed to build BasicConstraints"))?;
        builder
            .append_extension(bc)
            .map_err(generation("Failed to add BasicConstraints"))?;

        let ku = KeyUsage::new()
            .critical()
            .digital_signature()
            .key_encipherment()
            .key_cert_sign()
            .build()
            .map_err(generation("Failed to build KeyUsage"))?;
        builder
            .append_extension(ku)
            .map_err(generation("Failed to add KeyUsage"))?;

        let eku = ExtendedKeyUsage::new()
            .client_auth()
            .server_auth()
            .build()
            .map_err(generation("Failed to build ExtendedKeyUsage"))?;
        builder
            .append_extension(eku)
            .map_err(generation("Failed to add ExtendedKeyUsage"))?;

        // Identity extensions travel from the request unchanged.
        let requested = req
            .extensions()
            .map_err(generation("Failed to read CSR extensions"))?;
        for extension in requested {
            builder
                .append_extension(extension)
                .map_err(generation("Failed to copy CSR extension"))?;
        }

        builder
            .sign(&self.root_key, MessageDigest::sha256())
            .map_err(generation("Failed to sign certificate"))?;
        Ok(builder.build())
    }

    fn encode_private_key(
        private_key: &PKey<Private>,
        password: Option<&SecretString>,
    ) -> CaResult<String> {
        let password = password
            .map(|p| p.expose_secret().as_bytes())
            .filter(|p| !p.is_empty());
        let cipher = Cipher::aes_128_cbc();
        let pem = match private_key.id() {
            Id::RSA => {
                let rsa = private_key
                    .rsa()
                    .map_err(generation("Failed to access RSA key"))?;
                match password {
                    Some(pass) => rsa.private_key_to_pem_passphrase(cipher, pass),
                    None => rsa.private_key_to_pem(),
                }
            }
            Id::EC => {
                let ec = private_key
                    .ec_key()
                    .map_err(generation("Failed to access EC key"))?;
                match password {
                    Some(pass) => ec.private_key_to_pem_passphrase(cipher, pass),
                    None => ec.private_key_to_pem(),
                }
            }
            other => {
                return Err(CaError::Generation(format!(
                    "Unsupported key type {:?}",
                    other
                )))
            }
        }
        .map_err(generation("Failed to encode private key"))?;
        String::from_utf8(pem).map_err(|e| CaError::Generation(e.to_string()))
    }
}

impl Generator for CryptoGenerator {
    fn generate(&self, options: &GenerationOptions) -> CaResult<CertificateMaterial> {
        let private_key = self.generate_key(options.key_algorithm.as_ref())?;

        let mut serial = BigNum::new().map_err(generation("Failed to allocate serial"))?;
        serial
            .rand(SERIAL_BITS, MsbOption::MAYBE_ZERO, false)
            .map_err(generation("Failed to generate serial number"))?;
        let serial_dec = serial
            .to_dec_str()
            .map_err(generation("Failed to format serial number"))?
            .to_string();

        let req = self.build_request(options, &private_key, &serial_dec)?;

        let now = Utc::now();
        let not_before = parse_timestamp(options.valid_from.as_deref(), "creation")?.unwrap_or(now);
        let not_after = parse_timestamp(options.valid_for.as_deref(), "expiration")?
            .unwrap_or_else(|| now + Duration::days(i64::from(self.default_ttl_days)));
        let not_before = truncate_to_seconds(not_before)?;
        let not_after = truncate_to_seconds(not_after)?;

        let certificate = self.sign_request(&req, &serial, not_before, not_after)?;
        let certificate_pem = certificate
            .to_pem()
            .map_err(generation("Failed to encode certificate"))?;
        let certificate_pem =
            String::from_utf8(certificate_pem).map_err(|e| CaError::Generation(e.to_string()))?;
        let private_key_pem = Self::encode_private_key(&private_key, options.password.as_ref())?;

        debug!(
            uid = %options.uid,
            did = %options.did,
            serial = %serial_dec,
            %not_before,
            %not_after,
            "certificate signed"
        );

        Ok(CertificateMaterial {
            certificate: certificate_pem,
            private_key: private_key_pem,
            serial: serial_dec,
            not_before,
            not_after,
        })
    }

    fn validate(&self, candidate_pem: &str, trust_anchor_pem: Option<&str>) -> CaResult<bool> {
        let candidate = X509::from_pem(candidate_pem.as_bytes())
            .map_err(validation("Failed to parse certificate"))?;

        let mut store = X509StoreBuilder::new().map_err(validation("Failed to create store"))?;
        store
            .add_cert(self.root_cert.clone())
            .map_err(validation("Failed to add root certificate"))?;
        let store = store.build();

        let mut intermediates: Stack<X509> =
            Stack::new().map_err(validation("Failed to allocate intermediates"))?;
        if let Some(anchor) = trust_anchor_pem.filter(|a| !a.trim().is_empty()) {
            let anchor = X509::from_pem(anchor.as_bytes())
                .map_err(validation("Failed to parse trust anchor certificate"))?;
            intermediates
                .push(anchor)
                .map_err(validation("Failed to add trust anchor"))?;
        }

        let mut context =
            X509StoreContext::new().map_err(validation("Failed to create verify context"))?;
        let (verified, result) = context
            .init(&store, &candidate, &intermediates, |c| {
                let verified = c.verify_cert()?;
                Ok((verified, c.error()))
            })
            .map_err(validation("Failed to run chain verification"))?;

        if verified {
            Ok(true)
        } else {
            Err(CaError::Validation(format!(
                "Failed to validate certificate: {}",
                result.error_string()
            )))
        }
    }

    fn parse_uid_did(&self, content: &str) -> (String, String) {
        let parsed = parse_x509_pem(content.as_bytes());
        let pem = match parsed {
            Ok((_, pem)) => pem,
            Err(e) => {
                debug!(error = %e, "candidate is not PEM, no identity extracted");
                return (String::new(), String::new());
            }
        };
        let certificate = match pem.parse_x509() {
            Ok(certificate) => certificate,
            Err(e) => {
                debug!(error = %e, "candidate is not X.509, no identity extracted");
                return (String::new(), String::new());
            }
        };
        identity::collect_identity(
            certificate
                .extensions()
                .iter()
                .filter(|ext| ext.oid.to_id_string() == IDENTITY_OID)
                .map(|ext| ext.value),
        )
    }

    fn parse_dates(&self, content: &str) -> CaResult<(DateTime<Utc>, DateTime<Utc>)> {
        let (_, pem) = parse_x509_pem(content.as_bytes())
            .map_err(|e| CaError::Validation(format!("Failed to decode PEM: {}", e)))?;
        let certificate = pem
            .parse_x509()
            .map_err(|e| CaError::Validation(format!("Failed to parse certificate: {}", e)))?;
        let validity = certificate.validity();
        let to_utc = |ts: i64| {
            DateTime::from_timestamp(ts, 0)
                .ok_or_else(|| CaError::Validation(format!("timestamp out of range: {}", ts)))
        };
        Ok((
            to_utc(validity.not_after.timestamp())?,
            to_utc(validity.not_before.timestamp())?,
        ))
    }

    fn parse_serial(&self, content: &str) -> CaResult<String> {
        let certificate = X509::from_pem(content.as_bytes())
            .map_err(validation("Failed to parse certificate"))?;
        let serial = certificate
            .serial_number()
            .to_bn()
            .map_err(validation("Failed to read serial number"))?;
        let serial = serial
            .to_dec_str()
            .map_err(validation("Failed to format serial number"))?;
        Ok(serial.to_string())
    }
}

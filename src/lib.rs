//! Identity CA - Private Certificate Authority Library
//!
//! Issues, validates and withdraws X.509 identity certificates bound to a two-part principal:
//! a user identifier (`uid`) and a device identifier (`did`). Every issued certificate is signed
//! by a single root CA loaded at startup, and each principal has at most one `Active`
//! certificate at a time.
//!
//! # Overview
//!
//! ```text
//! HTTP (webserver) ──▶ Protocol ──▶ CertificateService ──┬──▶ Generator (openssl)
//!                                         ▲              └──▶ CertificateStore
//!                                  sweeper (RemoveExpired)
//! ```
//!
//! - **Generator**: key generation, CSR construction, signing, chain verification and the
//!   `UID:`/`DID:` identity extensions
//! - **Store**: upsert-by-serial persistence of certificate records, in memory or in a JSON file
//! - **Service**: supersede-on-issue, validation against the active certificate, withdrawal and
//!   the expiry sweep
//!
//! # Quick Start
//!
//! ```bash
//! # Create root.crt / root.key (first run only)
//! identity-ca init-root
//!
//! # Serve the API
//! identity-ca --config config.toml serve
//! ```
//!
//! # Library Use
//!
//! ```no_run
//! use std::sync::Arc;
//! use identity_ca::generate_root_ca::RsaRootCABuilder;
//! use identity_ca::pki_generator::{CryptoGenerator, GenerationOptions};
//! use identity_ca::service::CertificateService;
//! use identity_ca::storage::MemoryStore;
//!
//! # async fn example() -> identity_ca::error::CaResult<()> {
//! let (root_crt, root_key) = RsaRootCABuilder::new().build_pem()?;
//! let generator = CryptoGenerator::builder().load_root_ca(root_crt.as_bytes(), root_key.as_bytes())?;
//! let service = CertificateService::new(Arc::new(generator), Arc::new(MemoryStore::new()));
//!
//! let issued = service
//!     .generate_certificate(GenerationOptions::new("alice", "laptop-3"))
//!     .await?;
//! assert!(service.validate_certificate("alice", "laptop-3", &issued.certificate).await?);
//! # Ok(())
//! # }
//! ```

pub mod certificate;
pub mod configs;
pub mod error;
pub mod file_storage;
pub mod generate_root_ca;
pub mod identity;
pub mod pki_generator;
pub mod protocol;
pub mod service;
pub mod storage;
pub mod sweeper;
pub mod webserver;

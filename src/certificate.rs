//! Certificate Entity Module
//!
//! The persisted record of an issued identity certificate and its lifecycle state.
//!
//! # Lifecycle
//! ```text
//!            issue (not yet expired)          withdraw
//!   ──────────────────────────────▶ Active ───────────────▶ Withdrawn
//!                                     │                        ▲
//!              supersede / sweep      │                        │ withdraw
//!                                     ▼                        │
//!   ──────────────────────────────▶ NotActive ─────────────────┘
//!            issue (already expired)
//! ```
//!
//! Records are never deleted. Every transition is an in-place status update persisted by
//! upserting on `serial`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{CaError, CaResult};

/// Lifecycle state of a certificate record.
///
/// Serialized as its numeric code (`0`, `1`, `2`) so stored records stay compatible with
/// existing collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum CertificateStatus {
    NotActive = 0,
    Active = 1,
    Withdrawn = 2,
}

impl From<CertificateStatus> for u8 {
    fn from(status: CertificateStatus) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for CertificateStatus {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(CertificateStatus::NotActive),
            1 => Ok(CertificateStatus::Active),
            2 => Ok(CertificateStatus::Withdrawn),
            other => Err(format!("unknown certificate status code {}", other)),
        }
    }
}

impl std::fmt::Display for CertificateStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            CertificateStatus::NotActive => "NotActive",
            CertificateStatus::Active => "Active",
            CertificateStatus::Withdrawn => "Withdrawn",
        };
        f.write_str(name)
    }
}

/// An issued identity certificate.
///
/// `certificate` and `private_key` hold PEM text in memory; any at-rest encoding is the
/// store's concern. `uid`, `did` and `serial` never change after issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Certificate {
    pub uid: String,
    pub did: String,
    /// Decimal form of the random 128-bit serial number. Primary key.
    pub serial: String,
    pub certificate: String,
    /// PEM private key, password-encrypted when a password was supplied at issuance.
    pub private_key: String,
    pub creation_date_time: DateTime<Utc>,
    /// The certificate's `notAfter`.
    pub valid_till: DateTime<Utc>,
    pub withdrawal_date_time: Option<DateTime<Utc>>,
    pub status: CertificateStatus,
}

/// Status a freshly issued certificate starts in.
pub fn initial_status(valid_till: DateTime<Utc>, now: DateTime<Utc>) -> CertificateStatus {
    if valid_till < now {
        CertificateStatus::NotActive
    } else {
        CertificateStatus::Active
    }
}

/// A certificate counts as expired once `now` has reached its `valid_till`.
pub fn is_expired(certificate: &Certificate, now: DateTime<Utc>) -> bool {
    certificate.valid_till <= now
}

pub fn mark_not_active(certificate: &mut Certificate) {
    certificate.status = CertificateStatus::NotActive;
}

/// Withdraw a certificate, stamping the withdrawal time. Repeated calls overwrite the stamp.
pub fn mark_withdrawn(certificate: &mut Certificate, at: DateTime<Utc>) {
    certificate.status = CertificateStatus::Withdrawn;
    certificate.withdrawal_date_time = Some(at);
}

/// Reject principals that could not be embedded and recovered from a certificate: blank parts
/// and parts carrying control characters.
pub fn validate_identity(uid: &str, did: &str) -> CaResult<()> {
    for (name, value) in [("uid", uid), ("did", did)] {
        if value.trim().is_empty() {
            return Err(CaError::Validation(format!("{} must not be empty", name)));
        }
        if value.chars().any(char::is_control) {
            return Err(CaError::Validation(format!(
                "{} must not contain control characters",
                name
            )));
        }
    }
    Ok(())
}

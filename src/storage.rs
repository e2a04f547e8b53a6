//! Certificate persistence contract and the in-memory reference store.
//!
//! All operations are async. Records are keyed by `serial`; `store` is an upsert, so a
//! retried write of the same record is harmless.

use std::collections::HashMap;
use std::future::Future;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::certificate::{self, Certificate, CertificateStatus};
use crate::error::{CaError, CaResult};

pub trait CertificateStore: Send + Sync {
    /// Insert or replace the record with this serial.
    fn store(&self, certificate: &Certificate) -> impl Future<Output = CaResult<()>> + Send;

    /// Point lookup. `CaError::NotFound` on a miss.
    fn find(&self, serial: &str) -> impl Future<Output = CaResult<Certificate>> + Send;

    /// Every record, unordered.
    fn find_all(&self) -> impl Future<Output = CaResult<Vec<Certificate>>> + Send;

    /// Records whose `valid_till <= now`, whatever their status.
    fn find_expired(
        &self,
        now: DateTime<Utc>,
    ) -> impl Future<Output = CaResult<Vec<Certificate>>> + Send;

    /// Equality filter on `(uid, did, status)`.
    fn find_by_identity_and_status(
        &self,
        uid: &str,
        did: &str,
        status: CertificateStatus,
    ) -> impl Future<Output = CaResult<Vec<Certificate>>> + Send;
}

pub(crate) fn check_serial(certificate: &Certificate) -> CaResult<()> {
    if certificate.serial.is_empty() {
        return Err(CaError::Persistence(
            "certificate has no serial".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn matches_identity(
    certificate: &Certificate,
    uid: &str,
    did: &str,
    status: CertificateStatus,
) -> bool {
    certificate.uid == uid && certificate.did == did && certificate.status == status
}

/// Process-local store. Writers are serialized by the lock, so concurrent upserts of one
/// serial never interleave.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Certificate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl CertificateStore for MemoryStore {
    async fn store(&self, certificate: &Certificate) -> CaResult<()> {
        check_serial(certificate)?;
        self.records
            .write()
            .await
            .insert(certificate.serial.clone(), certificate.clone());
        Ok(())
    }

    async fn find(&self, serial: &str) -> CaResult<Certificate> {
        self.records
            .read()
            .await
            .get(serial)
            .cloned()
            .ok_or_else(|| CaError::NotFound(format!("certificate with serial {}", serial)))
    }

    async fn find_all(&self) -> CaResult<Vec<Certificate>> {
        Ok(self.records.read().await.values().cloned().collect())
    }

    async fn find_expired(&self, now: DateTime<Utc>) -> CaResult<Vec<Certificate>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|c| certificate::is_expired(c, now))
            .cloned()
            .collect())
    }

    async fn find_by_identity_and_status(
        &self,
        uid: &str,
        did: &str,
        status: CertificateStatus,
    ) -> CaResult<Vec<Certificate>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|c| matches_identity(c, uid, did, status))
            .cloned()
            .collect())
    }
}

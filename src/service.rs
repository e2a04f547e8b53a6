//! Certificate Lifecycle Service
//!
//! Orchestrates a [`Generator`] and a [`CertificateStore`]. This is the only component that
//! changes a certificate's status.
//!
//! # At-most-one-active
//! Supersede-on-issue ("flip every active certificate of the identity, then store the new one")
//! and withdrawal both run under a per-identity async mutex, so concurrent requests for the same
//! `(uid, did)` cannot leave two certificates `Active`. Requests for different identities never
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError};

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::certificate::{self, Certificate, CertificateStatus};
use crate::error::{CaError, CaResult};
use crate::pki_generator::{GenerationOptions, Generator};
use crate::storage::CertificateStore;

type IdentityKey = (String, String);

/// One async mutex per identity that currently has a request in flight.
#[derive(Debug, Default)]
struct IdentityLocks {
    locks: std::sync::Mutex<HashMap<IdentityKey, Arc<Mutex<()>>>>,
}

impl IdentityLocks {
    fn handle(&self, uid: &str, did: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        // Entries only the map still references are idle.
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks
            .entry((uid.to_string(), did.to_string()))
            .or_default()
            .clone()
    }
}

pub struct CertificateService<G, S> {
    generator: Arc<G>,
    store: Arc<S>,
    locks: Arc<IdentityLocks>,
}

impl<G, S> Clone for CertificateService<G, S> {
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
            store: Arc::clone(&self.store),
            locks: Arc::clone(&self.locks),
        }
    }
}

impl<G, S> CertificateService<G, S>
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    pub fn new(generator: Arc<G>, store: Arc<S>) -> Self {
        Self {
            generator,
            store,
            locks: Arc::new(IdentityLocks::default()),
        }
    }

    pub fn generator(&self) -> &G {
        &self.generator
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Issue a certificate for `(options.uid, options.did)` and supersede any active one.
    ///
    /// Key generation runs on the blocking pool. The stored record starts `Active`, or
    /// `NotActive` when its `notAfter` is already in the past.
    pub async fn generate_certificate(&self, options: GenerationOptions) -> CaResult<Certificate> {
        certificate::validate_identity(&options.uid, &options.did)?;

        let generator = Arc::clone(&self.generator);
        let (options, material) = tokio::task::spawn_blocking(move || {
            let material = generator.generate(&options);
            (options, material)
        })
        .await
        .map_err(|e| CaError::Generation(format!("Generation task failed: {}", e)))?;
        let material = material?;

        let lock = self.locks.handle(&options.uid, &options.did);
        let _guard = lock.lock().await;

        let active = self
            .store
            .find_by_identity_and_status(&options.uid, &options.did, CertificateStatus::Active)
            .await?;
        for mut previous in active {
            certificate::mark_not_active(&mut previous);
            self.store.store(&previous).await?;
            debug!(
                uid = %options.uid,
                did = %options.did,
                serial = %previous.serial,
                "certificate superseded"
            );
        }

        let now = Utc::now();
        let issued = Certificate {
            uid: options.uid,
            did: options.did,
            serial: material.serial,
            certificate: material.certificate,
            private_key: material.private_key,
            creation_date_time: now,
            valid_till: material.not_after,
            withdrawal_date_time: None,
            status: certificate::initial_status(material.not_after, now),
        };
        self.store.store(&issued).await?;

        info!(
            uid = %issued.uid,
            did = %issued.did,
            serial = %issued.serial,
            status = %issued.status,
            valid_till = %issued.valid_till,
            "certificate issued"
        );
        Ok(issued)
    }

    /// Check that `candidate_pem` belongs to `(uid, did)` and chains to the root CA through the
    /// identity's active certificate.
    ///
    /// Identity parts that cannot be read from the candidate are not compared.
    pub async fn validate_certificate(
        &self,
        uid: &str,
        did: &str,
        candidate_pem: &str,
    ) -> CaResult<bool> {
        let (found_uid, found_did) = self.generator.parse_uid_did(candidate_pem);
        let uid_differs = !found_uid.is_empty() && found_uid != uid;
        let did_differs = !found_did.is_empty() && found_did != did;
        if uid_differs || did_differs {
            warn!(uid, did, %found_uid, %found_did, "certificate identity mismatch");
            return Err(CaError::IdentityMismatch {
                expected_uid: uid.to_string(),
                expected_did: did.to_string(),
                found_uid,
                found_did,
            });
        }

        let active = self.fetch_active(uid, did).await?;
        self.generator
            .validate(candidate_pem, Some(&active.certificate))
    }

    /// The identity's active certificate. When the store holds several, the newest wins.
    pub async fn fetch_active(&self, uid: &str, did: &str) -> CaResult<Certificate> {
        self.store
            .find_by_identity_and_status(uid, did, CertificateStatus::Active)
            .await?
            .into_iter()
            .max_by_key(|c| c.creation_date_time)
            .ok_or_else(|| {
                CaError::NotFound(format!("no active certificate for uid {} did {}", uid, did))
            })
    }

    /// Stored record of a PEM certificate, resolved by its serial number.
    pub async fn find_by_content(&self, candidate_pem: &str) -> CaResult<Certificate> {
        let serial = self.generator.parse_serial(candidate_pem)?;
        self.store.find(&serial).await
    }

    /// Move `certificate` to `Withdrawn` and stamp the withdrawal time.
    ///
    /// Already-withdrawn certificates are accepted; the timestamp is overwritten.
    pub async fn withdraw(&self, mut certificate: Certificate) -> CaResult<Certificate> {
        let lock = self.locks.handle(&certificate.uid, &certificate.did);
        let _guard = lock.lock().await;

        certificate::mark_withdrawn(&mut certificate, Utc::now());
        self.store.store(&certificate).await?;
        info!(
            uid = %certificate.uid,
            did = %certificate.did,
            serial = %certificate.serial,
            "certificate withdrawn"
        );
        Ok(certificate)
    }

    /// Validate `candidate_pem` for `(uid, did)`, then withdraw the stored record it belongs to.
    pub async fn withdraw_certificate(
        &self,
        uid: &str,
        did: &str,
        candidate_pem: &str,
    ) -> CaResult<Certificate> {
        self.validate_certificate(uid, did, candidate_pem).await?;
        let stored = self.find_by_content(candidate_pem).await?;
        self.withdraw(stored).await
    }

    /// Force every expired certificate to `NotActive`, whatever its status, including
    /// `Withdrawn`. Returns how many records changed.
    pub async fn remove_expired(&self) -> CaResult<usize> {
        let now = Utc::now();
        let expired = self.store.find_expired(now).await?;
        let mut changed = 0;
        for candidate in expired {
            if candidate.status == CertificateStatus::NotActive {
                continue;
            }
            let lock = self.locks.handle(&candidate.uid, &candidate.did);
            let _guard = lock.lock().await;

            // Re-read under the identity lock; the snapshot may predate a withdrawal.
            let mut record = self.store.find(&candidate.serial).await?;
            if record.status == CertificateStatus::NotActive || !certificate::is_expired(&record, now)
            {
                continue;
            }
            let previous = record.status;
            certificate::mark_not_active(&mut record);
            self.store.store(&record).await?;
            debug!(
                uid = %record.uid,
                did = %record.did,
                serial = %record.serial,
                %previous,
                "expired certificate deactivated"
            );
            changed += 1;
        }
        if changed > 0 {
            info!(count = changed, "expiry sweep deactivated certificates");
        }
        Ok(changed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_locks_are_shared_per_identity() {
        let locks = IdentityLocks::default();
        let a = locks.handle("u1", "d1");
        let b = locks.handle("u1", "d1");
        let c = locks.handle("u1", "d2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));
    }

    #[test]
    fn test_idle_identity_locks_are_pruned() {
        let locks = IdentityLocks::default();
        drop(locks.handle("u1", "d1"));
        let _held = locks.handle("u2", "d2");
        let map = locks.locks.lock().unwrap();
        assert_eq!(map.len(), 1);
        assert!(map.contains_key(&("u2".to_string(), "d2".to_string())));
    }
}

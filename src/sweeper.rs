//! Periodic expiry sweep.
//!
//! Each tick awaits the previous sweep before the next one can start, and ticks missed while a
//! sweep was running are skipped, so two sweeps never overlap.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::pki_generator::Generator;
use crate::service::CertificateService;
use crate::storage::CertificateStore;

pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the sweep loop forever.
pub async fn run_sweeper<G, S>(service: CertificateService<G, S>, period: Duration)
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    let period = if period.is_zero() {
        warn!(
            fallback_secs = DEFAULT_SWEEP_INTERVAL.as_secs(),
            "sweep interval of zero, using fallback"
        );
        DEFAULT_SWEEP_INTERVAL
    } else {
        period
    };
    info!(interval_secs = period.as_secs_f64(), "expiry sweeper started");

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        match service.remove_expired().await {
            Ok(0) => debug!("expiry sweep found nothing to do"),
            Ok(count) => debug!(count, "expiry sweep finished"),
            Err(e) => error!(error = %e, "expiry sweep failed"),
        }
    }
}

/// Spawn [`run_sweeper`] on the current runtime. Abort the handle to stop it.
pub fn spawn_sweeper<G, S>(service: CertificateService<G, S>, period: Duration) -> JoinHandle<()>
where
    G: Generator + 'static,
    S: CertificateStore + 'static,
{
    tokio::spawn(run_sweeper(service, period))
}

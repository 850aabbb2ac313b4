use crate::error::StoreResult;
use crate::fields::EMPTY_FIELD_TOKEN;
use crate::store::{Backend, Commit, Session, WriteOp};

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A running renewal task bound to one backing hash.
///
/// The first renewal happens immediately, then every `period`. A failed renewal
/// is logged and the schedule continues; only [`Lease::stop`] or dropping the
/// lease ends it. If the hash has expired in the meantime it is recreated
/// holding only the empty marker.
pub struct Lease {
    /// Hash whose expiration this lease resets.
    key: String,
    /// The renewal loop; aborted on stop and on drop.
    task: JoinHandle<()>,
    stopped: AtomicBool,
    /// Renewals that reached the store, restorations included.
    renewals: Arc<AtomicU64>,
}

impl Lease {
    /// Spawns the renewal task on the current tokio runtime.
    pub fn start(backend: Arc<dyn Backend>, key: String, ttl: Duration, period: Duration) -> Self {
        let renewals = Arc::new(AtomicU64::new(0));
        let task = tokio::spawn(renew_loop(
            backend,
            key.clone(),
            ttl,
            period,
            renewals.clone(),
        ));

        tracing::debug!("Started lease on {} (ttl={:?}, period={:?})", key, ttl, period);

        Self {
            key,
            task,
            stopped: AtomicBool::new(false),
            renewals,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Number of renewals that reached the store.
    pub fn renewals(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    pub fn is_running(&self) -> bool {
        !self.stopped.load(Ordering::Acquire) && !self.task.is_finished()
    }

    /// Cancels future renewals. The hash then expires on its own schedule.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            self.task.abort();
            tracing::debug!("Stopped lease on {}", self.key);
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn renew_loop(
    backend: Arc<dyn Backend>,
    key: String,
    ttl: Duration,
    period: Duration,
    renewals: Arc<AtomicU64>,
) {
    // interval() rejects a zero period.
    let mut interval = tokio::time::interval(period.max(Duration::from_millis(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        interval.tick().await;

        let result = match backend.session().await {
            Ok(mut session) => renew(session.as_mut(), &key, ttl).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(Renewal::Extended) => {
                renewals.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Renewed lease on {}", key);
            }
            Ok(Renewal::Recreated) => {
                renewals.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("Lease target {} had expired, recreated it empty", key);
            }
            Ok(Renewal::Deferred) => {
                tracing::debug!("Recreating {} conflicted, retrying next tick", key);
            }
            Err(e) => {
                tracing::warn!("Failed to renew lease on {}: {}", key, e);
            }
        }
    }
}

enum Renewal {
    Extended,
    Recreated,
    Deferred,
}

/// Resets the expiration of `key`, recreating the hash with its marker if it
/// is gone.
async fn renew(session: &mut dyn Session, key: &str, ttl: Duration) -> StoreResult<Renewal> {
    if session.expire(key, ttl).await? {
        return Ok(Renewal::Extended);
    }

    let ops = [
        WriteOp::HSet {
            key: key.to_string(),
            field: EMPTY_FIELD_TOKEN.to_string(),
            value: EMPTY_FIELD_TOKEN.to_string(),
        },
        WriteOp::Expire {
            key: key.to_string(),
            ttl,
        },
    ];
    session.unwatch().await?;
    match session.exec(&ops).await? {
        Commit::Applied => Ok(Renewal::Recreated),
        Commit::Aborted => Ok(Renewal::Deferred),
    }
}

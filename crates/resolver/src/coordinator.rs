//! Single-flight cache coordinator.
//!
//! Per identifier the coordinator is in one of four states:
//!
//! * **Absent**: nothing cached, nothing in flight.
//! * **Pending**: a fetch+compute is running; new callers attach to it.
//! * **Fresh**: a cached report younger than the TTL; served directly.
//! * **Stale**: a cached report past its TTL; triggers a refresh and is
//!   served with `degraded = true` if that refresh fails.
//!
//! The only synchronized steps are registering and deregistering a flight
//! in the `DashMap`. The upstream call and the computation run in a spawned
//! task, so a caller giving up never cancels work other callers wait on.

use common::{
    FetchError, FetchErrorKind, FrequencyReport, Resolution, ResolveError, VariantIdentifier,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dbsnp_client::VariantSource;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::cache::{CacheEntry, CacheStore};

type FlightOutcome = Result<Resolution, ResolveError>;
type FlightReceiver = watch::Receiver<Option<FlightOutcome>>;

/// An in-flight fetch. Waiters only ever see the outcome of the generation
/// they attached to.
struct Flight {
    generation: u64,
    outcome: FlightReceiver,
}

#[derive(Clone)]
pub struct Coordinator {
    source: Arc<dyn VariantSource>,
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    inflight: Arc<DashMap<VariantIdentifier, Flight>>,
    generations: Arc<AtomicU64>,
    shutdown: CancellationToken,
}

impl Coordinator {
    pub fn new(source: Arc<dyn VariantSource>, store: Arc<dyn CacheStore>, ttl: Duration) -> Self {
        Self {
            source,
            store,
            ttl,
            inflight: Arc::new(DashMap::new()),
            generations: Arc::new(AtomicU64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Number of identifiers with a fetch in flight.
    pub fn in_flight(&self) -> usize {
        self.inflight.len()
    }

    /// Evict cache entries past their retention window.
    pub async fn sweep(&self) -> usize {
        match self.store.sweep().await {
            Ok(n) => n,
            Err(e) => {
                warn!("Cache sweep failed: {}", e);
                0
            }
        }
    }

    /// Abort in-flight upstream calls. Their waiters receive `cancelled`.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Resolve `id` to a report.
    ///
    /// `cancel` aborts only this caller's wait; a shared fetch keeps running
    /// for the remaining waiters and still populates the cache.
    pub async fn resolve(
        &self,
        id: &VariantIdentifier,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        if let Some(entry) = self.lookup(id).await {
            if entry.is_fresh() {
                debug!("Cache hit for {} (age {}s)", id, entry.age().as_secs());
                return Ok(Resolution {
                    report: entry.report,
                    cache_hit: true,
                    degraded: false,
                });
            }
        }

        let outcome = self.join_or_lead(id);
        Self::wait(outcome, cancel).await
    }

    /// Attach to the in-flight fetch for `id`, or start one.
    fn join_or_lead(&self, id: &VariantIdentifier) -> FlightReceiver {
        let (rx, generation) = match self.inflight.entry(id.clone()) {
            Entry::Occupied(flight) => {
                debug!(
                    "Joining in-flight fetch for {} (generation {})",
                    id,
                    flight.get().generation
                );
                return flight.get().outcome.clone();
            }
            Entry::Vacant(slot) => {
                let generation = self.generations.fetch_add(1, Ordering::Relaxed);
                let (tx, rx) = watch::channel(None);
                slot.insert(Flight {
                    generation,
                    outcome: rx.clone(),
                });
                let this = self.clone();
                let flight_id = id.clone();
                tokio::spawn(async move {
                    // A panicking source or store must still deregister the
                    // flight, or the key would stay Pending forever.
                    let worker = this.clone();
                    let worker_id = flight_id.clone();
                    let outcome =
                        match tokio::spawn(async move { worker.refresh(&worker_id).await }).await {
                            Ok(outcome) => outcome,
                            Err(e) => {
                                error!("Fetch task for {} aborted: {}", flight_id, e);
                                Err(FetchError::transient(format!(
                                    "fetch for {flight_id} aborted"
                                ))
                                .into())
                            }
                        };
                    this.inflight
                        .remove_if(&flight_id, |_, f| f.generation == generation);
                    // Receivers may all be gone; the cache is already written.
                    let _ = tx.send(Some(outcome));
                });
                (rx, generation)
            }
        };

        debug!("Started fetch for {} (generation {})", id, generation);
        rx
    }

    async fn wait(mut outcome: FlightReceiver, cancel: &CancellationToken) -> FlightOutcome {
        let settled = async {
            outcome
                .wait_for(Option::is_some)
                .await
                .map(|value| (*value).clone())
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(FetchError::cancelled().into()),
            settled = settled => match settled {
                Ok(Some(result)) => result,
                _ => Err(FetchError::transient("in-flight fetch ended without a result").into()),
            },
        }
    }

    /// Body of a flight: re-check the cache, fetch, compute, store.
    async fn refresh(&self, id: &VariantIdentifier) -> FlightOutcome {
        // A previous generation may have stored a fresh entry between the
        // caller's lookup and this flight's registration.
        let previous = self.lookup(id).await;
        if let Some(entry) = &previous {
            if entry.is_fresh() {
                return Ok(Resolution {
                    report: entry.report.clone(),
                    cache_hit: true,
                    degraded: false,
                });
            }
        }

        match self.fetch_and_compute(id).await {
            Ok(report) => {
                let report = Arc::new(report);
                let entry = CacheEntry::new(report.clone(), self.ttl);
                if let Err(e) = self.store.set(id.clone(), entry).await {
                    warn!("Failed to cache report for {}: {}", id, e);
                }
                info!(
                    "Resolved {}: {} populations, {} warnings",
                    id,
                    report.populations.len(),
                    report.warnings.len()
                );
                Ok(Resolution {
                    report,
                    cache_hit: false,
                    degraded: false,
                })
            }
            Err(err) => {
                if let ResolveError::Computation(e) = &err {
                    error!("Frequency computation defect for {}: {}", id, e);
                }
                match previous {
                    Some(stale) => {
                        warn!(
                            "Refresh of {} failed ({}); serving stale report aged {}s",
                            id,
                            err,
                            stale.age().as_secs()
                        );
                        Ok(Resolution {
                            report: stale.report,
                            cache_hit: false,
                            degraded: true,
                        })
                    }
                    None => {
                        match &err {
                            ResolveError::Fetch(e) if e.kind != FetchErrorKind::NotFound => {
                                warn!("Resolving {} failed: {}", id, e)
                            }
                            _ => debug!("Resolving {} failed: {}", id, err),
                        }
                        Err(err)
                    }
                }
            }
        }
    }

    async fn fetch_and_compute(&self, id: &VariantIdentifier) -> Result<FrequencyReport, ResolveError> {
        let record = self.source.fetch(id, &self.shutdown).await?;
        Ok(genotype::compute(&record)?)
    }

    /// Cache read that degrades to a miss when the store fails.
    async fn lookup(&self, id: &VariantIdentifier) -> Option<CacheEntry> {
        match self.store.get(id).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Cache read for {} failed, bypassing cache: {}", id, e);
                None
            }
        }
    }
}

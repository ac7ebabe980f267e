//! Inbound interface: validate, check quota, resolve, journal.

use chrono::Utc;
use common::{
    FetchError, FetchErrorKind, HistoryError, HistoryRecord, RequesterId, Resolution,
    ResolveError,
};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::coordinator::Coordinator;
use crate::history::HistoryLedger;
use crate::quota::RequesterQuota;

#[derive(Clone)]
pub struct VariantService {
    coordinator: Coordinator,
    ledger: HistoryLedger,
    quota: RequesterQuota,
    history_window: Duration,
}

impl VariantService {
    pub fn new(
        coordinator: Coordinator,
        ledger: HistoryLedger,
        quota: RequesterQuota,
        history_window: Duration,
    ) -> Self {
        Self {
            coordinator,
            ledger,
            quota,
            history_window,
        }
    }

    /// Resolve one raw rsID for `requester`, giving up at `deadline`.
    pub async fn resolve(
        &self,
        raw: &str,
        requester: &RequesterId,
        deadline: Option<Instant>,
    ) -> Result<Resolution, ResolveError> {
        self.resolve_with_cancel(raw, requester, deadline, &CancellationToken::new())
            .await
    }

    /// Like [`resolve`](Self::resolve), additionally abandoned when `cancel`
    /// fires. Abandoning never stops a fetch other callers share.
    pub async fn resolve_with_cancel(
        &self,
        raw: &str,
        requester: &RequesterId,
        deadline: Option<Instant>,
        cancel: &CancellationToken,
    ) -> Result<Resolution, ResolveError> {
        let id = common::validate(raw)?;
        self.quota.check(requester)?;

        let resolution = match deadline {
            Some(deadline) => {
                match timeout_at(deadline, self.coordinator.resolve(&id, cancel)).await {
                    Ok(outcome) => outcome?,
                    Err(_) => {
                        debug!("Deadline passed resolving {} for {}", id, requester);
                        return Err(FetchError::new(
                            FetchErrorKind::Cancelled,
                            format!("deadline exceeded resolving {id}"),
                        )
                        .into());
                    }
                }
            }
            None => self.coordinator.resolve(&id, cancel).await?,
        };

        info!(
            "{} resolved {} (cache_hit={}, degraded={})",
            requester, id, resolution.cache_hit, resolution.degraded
        );
        self.ledger.submit(requester, &id, &resolution, Utc::now());
        Ok(resolution)
    }

    /// Full history for `requester`, newest first.
    pub async fn history(&self, requester: &RequesterId) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.ledger.list_for(requester).await
    }

    /// History within the configured window, newest first.
    pub async fn recent_history(
        &self,
        requester: &RequesterId,
    ) -> Result<Vec<HistoryRecord>, HistoryError> {
        self.ledger
            .list_recent(requester, self.history_window, Utc::now())
            .await
    }

    /// Wait for queued history writes.
    pub async fn flush_history(&self) {
        self.ledger.flush().await;
    }

    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }

    /// Every `every`, evict expired cache entries and forget requesters
    /// whose quota has fully refilled. Stops when `shutdown` fires.
    pub fn spawn_maintenance(&self, every: Duration, shutdown: CancellationToken) -> JoinHandle<()> {
        let service = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = ticker.tick() => {}
                }
                let evicted = service.coordinator.sweep().await;
                if evicted > 0 {
                    debug!(
                        "Cache sweep evicted {} entries ({} lookups in flight)",
                        evicted,
                        service.coordinator.in_flight()
                    );
                }
                service.quota.prune();
            }
            debug!("Maintenance task stopped");
        })
    }
}

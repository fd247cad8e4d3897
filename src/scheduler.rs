use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::PollConfig;
use crate::fetchers::{AlertFetcher, FetchError, IdentityFetcher, SshFetcher, MAP};
use crate::map_filter::MapLayerFilters;
use crate::models::{DomainId, FetchOutcome, MapSnapshot};
use crate::store::SnapshotStore;
use crate::transport::Transport;

struct Inner {
    store: Arc<SnapshotStore>,
    transport: Arc<dyn Transport>,
    ssh: SshFetcher,
    identity: IdentityFetcher,
    alerts: AlertFetcher,
    // one flag per DomainId, indexed by discriminant
    in_flight: [AtomicBool; 3],
}

impl Inner {
    fn slot(&self, domain: DomainId) -> &AtomicBool {
        &self.in_flight[domain as usize]
    }

    async fn run_fetch(&self, domain: DomainId) {
        match domain {
            DomainId::Ssh => {
                let outcome = self.ssh.fetch().await;
                log_outcome(domain, &outcome);
                self.store.record_ssh(outcome);
            }
            DomainId::Identity => {
                let outcome = self.identity.fetch().await;
                log_outcome(domain, &outcome);
                self.store.record_identity(outcome);
            }
            DomainId::Alerts => {
                let outcome = self.alerts.fetch().await;
                log_outcome(domain, &outcome);
                self.store.record_alerts(outcome);
            }
        }
    }

    async fn fetch_map(&self, filters: MapLayerFilters) {
        let query = filters.to_query();
        let outcome = match self.transport.get(MAP, &query).await {
            Ok(value) => {
                let map_html = value
                    .get("map_html")
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string();
                info!("Map refreshed ({} hidden layer(s))", query.len());
                FetchOutcome::success(MapSnapshot { map_html, filters })
            }
            Err(source) => {
                warn!("Map fetch failed: {source}");
                FetchOutcome::failure(FetchError {
                    endpoint: MAP,
                    source,
                })
            }
        };
        self.store.record_map(outcome);
    }
}

fn log_outcome<T>(domain: DomainId, outcome: &FetchOutcome<T>) {
    match outcome {
        FetchOutcome::Success { .. } => info!("{} snapshot refreshed", domain.label()),
        FetchOutcome::Failure { error, .. } => {
            warn!("{} fetch failed, keeping previous snapshot: {error}", domain.label())
        }
    }
}

/// Owns the per-domain polling timers.
///
/// Each domain has at most one fetch outstanding: a tick (or manual
/// refresh) that lands while the previous fetch is still running is
/// dropped, never queued. Failures never cross domains — each completion
/// handler only writes its own store slot.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
    cfg: PollConfig,
    cancel: CancellationToken,
    map_tx: mpsc::UnboundedSender<MapLayerFilters>,
    map_rx: Arc<Mutex<Option<mpsc::UnboundedReceiver<MapLayerFilters>>>>,
}

impl Scheduler {
    pub fn new(store: Arc<SnapshotStore>, transport: Arc<dyn Transport>, cfg: PollConfig) -> Self {
        let (map_tx, map_rx) = mpsc::unbounded_channel();
        Self {
            inner: Arc::new(Inner {
                ssh: SshFetcher::new(Arc::clone(&transport)),
                identity: IdentityFetcher::new(Arc::clone(&transport)),
                alerts: AlertFetcher::new(Arc::clone(&transport)),
                store,
                transport,
                in_flight: [AtomicBool::new(false), AtomicBool::new(false), AtomicBool::new(false)],
            }),
            cfg,
            cancel: CancellationToken::new(),
            map_tx,
            map_rx: Arc::new(Mutex::new(Some(map_rx))),
        }
    }

    /// Fetch every domain once right away, then arm the periodic timers
    /// and the map worker.
    pub fn start(&self) {
        let Some(map_rx) = self.map_rx.lock().expect("map receiver poisoned").take() else {
            warn!("Scheduler started twice — ignoring");
            return;
        };

        info!(
            "Scheduler started — dashboard every {}s, alerts every {}s",
            self.cfg.dashboard_interval, self.cfg.alerts_interval
        );

        for domain in DomainId::ALL {
            self.refresh(domain);
        }

        let dashboard = Duration::from_secs(self.cfg.dashboard_interval);
        let alerts = Duration::from_secs(self.cfg.alerts_interval);
        self.spawn_timer(DomainId::Ssh, dashboard);
        self.spawn_timer(DomainId::Identity, dashboard);
        self.spawn_timer(DomainId::Alerts, alerts);

        self.spawn_map_worker(map_rx);
    }

    /// Cancel all timers. In-flight fetches run to completion in the
    /// background; their results land in the store and nothing reads them.
    pub fn stop(&self) {
        info!("Scheduler stopping — cancelling timers");
        self.cancel.cancel();
    }

    /// Trigger one fetch for a domain, timer-driven or user-driven.
    ///
    /// Returns false when that domain already has a fetch outstanding; the
    /// caller gets the outstanding fetch's eventual result via the store.
    pub fn refresh(&self, domain: DomainId) -> bool {
        let claimed = self
            .inner
            .slot(domain)
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok();

        if !claimed {
            debug!("{} fetch already in flight — tick coalesced", domain.label());
            return false;
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run_fetch(domain).await;
            inner.slot(domain).store(false, Ordering::SeqCst);
        });
        true
    }

    /// Replace the map layer filters. Changes arriving close together are
    /// batched into a single refetch.
    pub fn set_layer_filters(&self, filters: MapLayerFilters) {
        if self.map_tx.send(filters).is_err() {
            warn!("Map worker not running — filter change dropped");
        }
    }

    fn spawn_timer(&self, domain: DomainId, period: Duration) {
        let sched = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately; start() already fetched
            ticker.tick().await;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        sched.refresh(domain);
                    }
                }
            }
        });
    }

    /// Map data is slow-changing: fetched once at startup and afterwards
    /// only when the layer filters change. No periodic cadence.
    fn spawn_map_worker(&self, mut rx: mpsc::UnboundedReceiver<MapLayerFilters>) {
        let inner = Arc::clone(&self.inner);
        let cancel = self.cancel.clone();
        let debounce = Duration::from_millis(self.cfg.map_debounce_ms);

        tokio::spawn(async move {
            inner.fetch_map(MapLayerFilters::default()).await;

            loop {
                let mut filters = tokio::select! {
                    _ = cancel.cancelled() => return,
                    next = rx.recv() => match next {
                        Some(f) => f,
                        None => return,
                    },
                };

                // drain further toggles within the debounce window so one
                // change batch costs one refetch
                while let Ok(Some(next)) = tokio::time::timeout(debounce, rx.recv()).await {
                    filters = next;
                }

                inner.fetch_map(filters).await;
            }
        });
    }
}

use std::sync::RwLock;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::models::{Alert, DomainId, FetchOutcome, IdentitySnapshot, MapSnapshot, SshSnapshot};

/// Latest known-good payload for one domain plus attempt metadata.
///
/// A failed fetch only touches `last_attempt_at`/`last_error`; the payload
/// from the previous success stays on screen. Slots are created empty at
/// startup and never deleted.
#[derive(Debug, Clone)]
pub struct DomainSnapshot<T> {
    pub payload: Option<T>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl<T> Default for DomainSnapshot<T> {
    fn default() -> Self {
        Self {
            payload: None,
            last_success_at: None,
            last_attempt_at: None,
            last_error: None,
        }
    }
}

impl<T> DomainSnapshot<T> {
    fn apply(&mut self, outcome: FetchOutcome<T>) {
        match outcome {
            FetchOutcome::Success { data, fetched_at } => {
                self.payload = Some(data);
                self.last_success_at = Some(fetched_at);
                self.last_attempt_at = Some(fetched_at);
                self.last_error = None;
            }
            FetchOutcome::Failure {
                error,
                attempted_at,
            } => {
                self.last_attempt_at = Some(attempted_at);
                self.last_error = Some(error.to_string());
            }
        }
    }

    /// Stale means never fetched successfully, or the last success is
    /// older than twice the domain's polling cadence.
    pub fn is_stale_at(&self, now: DateTime<Utc>, cadence: Duration) -> bool {
        match self.last_success_at {
            None => true,
            Some(t) => {
                let limit = chrono::Duration::from_std(cadence * 2)
                    .unwrap_or(chrono::Duration::MAX);
                now.signed_duration_since(t) > limit
            }
        }
    }

    pub fn is_stale(&self, cadence: Duration) -> bool {
        self.is_stale_at(Utc::now(), cadence)
    }
}

/// Process-wide home of the latest snapshot per domain.
///
/// Writes are serialized per domain by the scheduler's one-in-flight rule;
/// the locks only guard against readers observing a torn update and are
/// never held across an await.
#[derive(Default)]
pub struct SnapshotStore {
    ssh: RwLock<DomainSnapshot<SshSnapshot>>,
    identity: RwLock<DomainSnapshot<IdentitySnapshot>>,
    alerts: RwLock<DomainSnapshot<Vec<Alert>>>,
    map: RwLock<DomainSnapshot<MapSnapshot>>,
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ── writers (fetch completion handlers) ─────────────────────

    pub fn record_ssh(&self, outcome: FetchOutcome<SshSnapshot>) {
        self.ssh.write().expect("ssh slot poisoned").apply(outcome);
    }

    pub fn record_identity(&self, outcome: FetchOutcome<IdentitySnapshot>) {
        self.identity
            .write()
            .expect("identity slot poisoned")
            .apply(outcome);
    }

    pub fn record_alerts(&self, outcome: FetchOutcome<Vec<Alert>>) {
        self.alerts
            .write()
            .expect("alerts slot poisoned")
            .apply(outcome);
    }

    pub fn record_map(&self, outcome: FetchOutcome<MapSnapshot>) {
        self.map.write().expect("map slot poisoned").apply(outcome);
    }

    // ── readers (presentation layer) ────────────────────────────

    pub fn ssh(&self) -> DomainSnapshot<SshSnapshot> {
        self.ssh.read().expect("ssh slot poisoned").clone()
    }

    pub fn identity(&self) -> DomainSnapshot<IdentitySnapshot> {
        self.identity.read().expect("identity slot poisoned").clone()
    }

    pub fn alerts(&self) -> DomainSnapshot<Vec<Alert>> {
        self.alerts.read().expect("alerts slot poisoned").clone()
    }

    pub fn map(&self) -> DomainSnapshot<MapSnapshot> {
        self.map.read().expect("map slot poisoned").clone()
    }

    /// Staleness for one polled domain against its cadence.
    pub fn is_stale(&self, domain: DomainId, cadence: Duration) -> bool {
        match domain {
            DomainId::Ssh => self.ssh().is_stale(cadence),
            DomainId::Identity => self.identity().is_stale(cadence),
            DomainId::Alerts => self.alerts().is_stale(cadence),
        }
    }
}

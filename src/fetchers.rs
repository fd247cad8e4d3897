use std::sync::Arc;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

use crate::consolidate::consolidate;
use crate::models::{
    Alert, FetchOutcome, IdentitySnapshot, IdentityUser, SessionDetail, SessionRecord, SshSnapshot,
};
use crate::transport::{Transport, TransportError};

// ── Backend endpoints ───────────────────────────────────────────

pub const SSH_ACTIVE: &str = "/api/ssh/active";
pub const SUMMARY: &str = "/api/summary";
pub const IDENTITY_ACTIVE_USERS: &str = "/api/openproject/users";
pub const IDENTITY_USER_DIRECTORY: &str = "/api/openproject/users-db";
pub const IDENTITY_FAILED_LOGINS: &str = "/api/openproject/failed-logins";
pub const IDENTITY_SUCCESSFUL_LOGINS: &str = "/api/openproject/successful-logins";
pub const IDENTITY_WEB_CONNECTIONS: &str = "/api/openproject/connections";
pub const INTRUSION_DETECTION: &str = "/api/security/intrusion-detection";
pub const MAP: &str = "/api/map";

/// How a fetcher's join barrier treats sub-request failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanInPolicy {
    /// Every sub-request must succeed or the whole domain fetch fails.
    Strict,
    /// Failures degrade to an empty payload instead of a domain failure.
    BestEffort,
}

/// A required sub-request failed, sinking the whole domain fetch.
#[derive(Debug, Clone, Error)]
#[error("{endpoint}: {source}")]
pub struct FetchError {
    pub endpoint: &'static str,
    #[source]
    pub source: TransportError,
}

// ── JSON normalization helpers ──────────────────────────────────

/// Non-arrays where an array is expected are empty collections, not errors.
fn array(value: Value) -> Vec<Value> {
    match value {
        Value::Array(items) => items,
        _ => Vec::new(),
    }
}

/// Parse each array element independently so one malformed record does
/// not sink the rest.
fn parse_list<T: DeserializeOwned>(value: Value) -> Vec<T> {
    array(value)
        .into_iter()
        .filter_map(|item| serde_json::from_value(item).ok())
        .collect()
}

fn counter(summary: &Value, key: &str) -> u64 {
    summary.get(key).and_then(Value::as_u64).unwrap_or(0)
}

// ── SSH fetcher ─────────────────────────────────────────────────

/// Fans out to the active-sessions and summary endpoints and joins
/// [`FanInPolicy::Strict`]: counters without the session list (or vice
/// versa) are not a coherent SSH view, so partial data is never published.
pub struct SshFetcher {
    transport: Arc<dyn Transport>,
}

impl SshFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self) -> FetchOutcome<SshSnapshot> {
        let (active, summary) = tokio::join!(
            self.transport.get(SSH_ACTIVE, &[]),
            self.transport.get(SUMMARY, &[]),
        );

        let active = match active {
            Ok(v) => v,
            Err(source) => {
                return FetchOutcome::failure(FetchError {
                    endpoint: SSH_ACTIVE,
                    source,
                })
            }
        };
        let summary = match summary {
            Ok(v) => v,
            Err(source) => {
                return FetchOutcome::failure(FetchError {
                    endpoint: SUMMARY,
                    source,
                })
            }
        };

        FetchOutcome::success(SshSnapshot {
            attacks: counter(&summary, "ssh_failed_logins"),
            successful_logins: counter(&summary, "ssh_successful_logins"),
            blocked_ips: counter(&summary, "ssh_blocked_ips"),
            unique_ips: counter(&summary, "ssh_unique_ips"),
            active_sessions: parse_sessions(active),
        })
    }
}

#[derive(Debug, Deserialize)]
struct UserSessionWire {
    user: String,
    ip: String,
    #[serde(default)]
    terminal: Option<String>,
    #[serde(default)]
    login_time: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    is_trusted: bool,
}

#[derive(Debug, Deserialize)]
struct NetworkConnectionWire {
    remote_ip: String,
    #[serde(default)]
    remote_port: Option<String>,
    #[serde(default)]
    service: String,
    #[serde(default)]
    country: String,
    #[serde(default)]
    is_trusted: bool,
    #[serde(default, alias = "connection_time")]
    connection_status: String,
}

/// The active-sessions payload is an object holding two arrays; user
/// sessions are listed before bare network connections.
fn parse_sessions(value: Value) -> Vec<SessionRecord> {
    let take = |key: &str| value.get(key).cloned().unwrap_or(Value::Null);

    let users: Vec<UserSessionWire> = parse_list(take("user_sessions"));
    let connections: Vec<NetworkConnectionWire> = parse_list(take("network_connections"));

    let mut sessions = Vec::with_capacity(users.len() + connections.len());
    for s in users {
        sessions.push(SessionRecord {
            ip: s.ip,
            country: s.country,
            is_trusted: s.is_trusted,
            detail: SessionDetail::UserSession {
                user: s.user,
                login_time: s.login_time,
                terminal: s.terminal,
            },
        });
    }
    for c in connections {
        sessions.push(SessionRecord {
            ip: c.remote_ip,
            country: c.country,
            is_trusted: c.is_trusted,
            detail: SessionDetail::NetworkConnection {
                service: c.service,
                connection_status: c.connection_status,
                remote_port: c.remote_port,
            },
        });
    }
    sessions
}

// ── Identity fetcher ────────────────────────────────────────────

/// Fans out to five identity-platform endpoints as a unit, joined
/// [`FanInPolicy::Strict`]: consolidating against a partial directory
/// would misclassify real connections as ghosts.
pub struct IdentityFetcher {
    transport: Arc<dyn Transport>,
}

impl IdentityFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn fetch(&self) -> FetchOutcome<IdentitySnapshot> {
        let (active, directory, failed, successful, web) = tokio::join!(
            self.transport.get(IDENTITY_ACTIVE_USERS, &[]),
            self.transport.get(IDENTITY_USER_DIRECTORY, &[]),
            self.transport.get(IDENTITY_FAILED_LOGINS, &[]),
            self.transport.get(IDENTITY_SUCCESSFUL_LOGINS, &[]),
            self.transport.get(IDENTITY_WEB_CONNECTIONS, &[]),
        );

        let unwrap = |endpoint: &'static str,
                      result: Result<Value, TransportError>|
         -> Result<Value, FetchError> {
            result.map_err(|source| FetchError { endpoint, source })
        };

        let joined: Result<_, FetchError> = (|| {
            Ok((
                unwrap(IDENTITY_ACTIVE_USERS, active)?,
                unwrap(IDENTITY_USER_DIRECTORY, directory)?,
                unwrap(IDENTITY_FAILED_LOGINS, failed)?,
                unwrap(IDENTITY_SUCCESSFUL_LOGINS, successful)?,
                unwrap(IDENTITY_WEB_CONNECTIONS, web)?,
            ))
        })();

        let (active, directory, failed, successful, web) = match joined {
            Ok(values) => values,
            Err(error) => return FetchOutcome::failure(error),
        };

        let users: Vec<IdentityUser> = parse_list(directory);
        let connections = parse_list(active);

        let consolidated = consolidate(&users, connections, Utc::now());
        let active_users = consolidated
            .users
            .iter()
            .filter(|u| u.is_currently_active)
            .count();

        if consolidated.ghost_count > 0 {
            debug!(
                "Identity fetch filtered {} ghost connection(s)",
                consolidated.ghost_count
            );
        }

        FetchOutcome::success(IdentitySnapshot {
            total_users: users.len(),
            active_users,
            failed_logins_today: array(failed).len(),
            successful_logins_today: array(successful).len(),
            web_connections: array(web).len(),
            ghost_count: consolidated.ghost_count,
            users: consolidated.users,
        })
    }
}

// ── Alert fetcher ───────────────────────────────────────────────

/// Single request against the intrusion-detection service, joined
/// [`FanInPolicy::BestEffort`] by default: the service is allowed to be
/// down, and its absence degrades to an empty alert list instead of a
/// domain failure.
pub struct AlertFetcher {
    transport: Arc<dyn Transport>,
    policy: FanInPolicy,
}

impl AlertFetcher {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            policy: FanInPolicy::BestEffort,
        }
    }

    pub fn with_policy(transport: Arc<dyn Transport>, policy: FanInPolicy) -> Self {
        Self { transport, policy }
    }

    pub async fn fetch(&self) -> FetchOutcome<Vec<Alert>> {
        match self.transport.get(INTRUSION_DETECTION, &[]).await {
            Ok(value) => FetchOutcome::success(parse_alerts(value)),
            Err(source) if self.policy == FanInPolicy::BestEffort => {
                warn!("Alert feed unavailable ({source}) — degrading to empty list");
                FetchOutcome::success(Vec::new())
            }
            Err(source) => FetchOutcome::failure(FetchError {
                endpoint: INTRUSION_DETECTION,
                source,
            }),
        }
    }
}

/// The endpoint answers either a bare array or `{ alerts: [...] }`.
fn parse_alerts(value: Value) -> Vec<Alert> {
    match value.get("alerts") {
        Some(inner) => parse_list(inner.clone()),
        None => parse_list(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    struct FakeTransport {
        responses: HashMap<&'static str, Value>,
        failing: HashSet<&'static str>,
    }

    impl FakeTransport {
        fn new(responses: Vec<(&'static str, Value)>) -> Self {
            Self {
                responses: responses.into_iter().collect(),
                failing: HashSet::new(),
            }
        }

        fn failing(mut self, path: &'static str) -> Self {
            self.failing.insert(path);
            self
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn get(&self, path: &str, _query: &[(&str, &str)]) -> Result<Value, TransportError> {
            if self.failing.contains(path) {
                return Err(TransportError::HttpStatus(500));
            }
            self.responses
                .get(path)
                .cloned()
                .ok_or(TransportError::HttpStatus(404))
        }
    }

    fn summary_body() -> Value {
        json!({
            "ssh_failed_logins": 42,
            "ssh_successful_logins": 3,
            "ssh_blocked_ips": 7,
            "ssh_unique_ips": 12,
        })
    }

    fn sessions_body() -> Value {
        json!({
            "user_sessions": [
                {"user": "admin", "terminal": "pts/0", "login_time": "10:02",
                 "ip": "10.0.0.2", "country": "Spain", "is_trusted": true}
            ],
            "network_connections": [
                {"remote_ip": "203.0.113.9", "remote_port": "51234", "service": "SSH",
                 "country": "Unknown", "is_trusted": false, "connection_time": "Activa"}
            ]
        })
    }

    #[tokio::test]
    async fn ssh_fetch_merges_both_endpoints() {
        let transport = Arc::new(FakeTransport::new(vec![
            (SSH_ACTIVE, sessions_body()),
            (SUMMARY, summary_body()),
        ]));

        let outcome = SshFetcher::new(transport).fetch().await;
        let snap = match outcome {
            FetchOutcome::Success { data, .. } => data,
            FetchOutcome::Failure { error, .. } => panic!("unexpected failure: {error}"),
        };

        assert_eq!(snap.attacks, 42);
        assert_eq!(snap.successful_logins, 3);
        assert_eq!(snap.blocked_ips, 7);
        assert_eq!(snap.unique_ips, 12);
        assert_eq!(snap.active_sessions.len(), 2);

        // user sessions come first, network connections after
        assert!(matches!(
            snap.active_sessions[0].detail,
            SessionDetail::UserSession { .. }
        ));
        assert_eq!(snap.active_sessions[1].ip, "203.0.113.9");
        match &snap.active_sessions[1].detail {
            SessionDetail::NetworkConnection {
                connection_status, ..
            } => assert_eq!(connection_status, "Activa"),
            other => panic!("expected network connection, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn ssh_counters_default_to_zero_when_missing() {
        let transport = Arc::new(FakeTransport::new(vec![
            (SSH_ACTIVE, json!({})),
            (SUMMARY, json!({"ssh_failed_logins": 5})),
        ]));

        let outcome = SshFetcher::new(transport).fetch().await;
        let FetchOutcome::Success { data, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(data.attacks, 5);
        assert_eq!(data.successful_logins, 0);
        assert_eq!(data.blocked_ips, 0);
        assert_eq!(data.unique_ips, 0);
        assert!(data.active_sessions.is_empty());
    }

    #[tokio::test]
    async fn ssh_fetch_is_all_or_nothing() {
        // summary down, active sessions fine — no partial snapshot
        let transport = Arc::new(
            FakeTransport::new(vec![(SSH_ACTIVE, sessions_body())]).failing(SUMMARY),
        );

        let outcome = SshFetcher::new(transport).fetch().await;
        let FetchOutcome::Failure { error, .. } = outcome else {
            panic!("expected failure");
        };
        assert_eq!(error.endpoint, SUMMARY);
        assert_eq!(error.source, TransportError::HttpStatus(500));
    }

    fn identity_responses() -> Vec<(&'static str, Value)> {
        vec![
            (
                IDENTITY_ACTIVE_USERS,
                json!([
                    {"user_id": "4", "ip": "10.0.0.9", "country": "Spain",
                     "is_trusted": true, "last_activity": "2024-06-01T10:00:00Z"},
                    {"user_id": "99", "ip": "5.6.7.8", "country": "Unknown",
                     "is_trusted": false, "last_activity": "2024-06-01T10:00:00Z"},
                ]),
            ),
            (
                IDENTITY_USER_DIRECTORY,
                json!([
                    {"id": 4, "display_name": "Ana", "last_login": "2024-06-01T09:00:00Z"},
                    {"id": 5, "display_name": "Bram", "last_login": null},
                ]),
            ),
            (IDENTITY_FAILED_LOGINS, json!([{"a": 1}, {"a": 2}, {"a": 3}])),
            (IDENTITY_SUCCESSFUL_LOGINS, json!([{"b": 1}])),
            (IDENTITY_WEB_CONNECTIONS, json!([{"c": 1}, {"c": 2}])),
        ]
    }

    #[tokio::test]
    async fn identity_fetch_consolidates_and_counts() {
        let transport = Arc::new(FakeTransport::new(identity_responses()));

        let outcome = IdentityFetcher::new(transport).fetch().await;
        let FetchOutcome::Success { data, .. } = outcome else {
            panic!("expected success");
        };

        assert_eq!(data.total_users, 2);
        assert_eq!(data.active_users, 1);
        assert_eq!(data.ghost_count, 1);
        assert_eq!(data.failed_logins_today, 3);
        assert_eq!(data.successful_logins_today, 1);
        assert_eq!(data.web_connections, 2);
        assert_eq!(data.users.len(), 2);
        assert_eq!(data.users[0].id, "4"); // active first
    }

    #[tokio::test]
    async fn identity_fetch_requires_all_five_endpoints() {
        for endpoint in [
            IDENTITY_ACTIVE_USERS,
            IDENTITY_USER_DIRECTORY,
            IDENTITY_FAILED_LOGINS,
            IDENTITY_SUCCESSFUL_LOGINS,
            IDENTITY_WEB_CONNECTIONS,
        ] {
            let transport =
                Arc::new(FakeTransport::new(identity_responses()).failing(endpoint));

            let outcome = IdentityFetcher::new(transport).fetch().await;
            let FetchOutcome::Failure { error, .. } = outcome else {
                panic!("expected failure when {endpoint} is down");
            };
            assert_eq!(error.endpoint, endpoint);
        }
    }

    #[tokio::test]
    async fn identity_non_array_bodies_normalize_to_empty() {
        let mut responses = identity_responses();
        for (_, value) in responses.iter_mut() {
            *value = json!({"error": "db offline"});
        }
        let transport = Arc::new(FakeTransport::new(responses));

        let outcome = IdentityFetcher::new(transport).fetch().await;
        let FetchOutcome::Success { data, .. } = outcome else {
            panic!("expected success");
        };
        assert_eq!(data.total_users, 0);
        assert_eq!(data.failed_logins_today, 0);
        assert!(data.users.is_empty());
    }

    #[tokio::test]
    async fn alert_failure_degrades_to_empty_list() {
        let transport = Arc::new(FakeTransport::new(vec![]).failing(INTRUSION_DETECTION));

        let outcome = AlertFetcher::new(transport).fetch().await;
        let FetchOutcome::Success { data, .. } = outcome else {
            panic!("alert failures must not surface as domain failures");
        };
        assert!(data.is_empty());
    }

    #[tokio::test]
    async fn strict_alert_policy_propagates_failures() {
        let transport = Arc::new(FakeTransport::new(vec![]).failing(INTRUSION_DETECTION));

        let fetcher = AlertFetcher::with_policy(transport, FanInPolicy::Strict);
        let FetchOutcome::Failure { error, .. } = fetcher.fetch().await else {
            panic!("strict policy must surface the failure");
        };
        assert_eq!(error.endpoint, INTRUSION_DETECTION);
    }

    #[tokio::test]
    async fn alerts_accept_bare_arrays_and_wrapped_objects() {
        let bare = Arc::new(FakeTransport::new(vec![(
            INTRUSION_DETECTION,
            json!([{"type": "critical", "severity": "high", "message": "m"}]),
        )]));
        let FetchOutcome::Success { data, .. } = AlertFetcher::new(bare).fetch().await else {
            panic!("expected success");
        };
        assert_eq!(data.len(), 1);

        let wrapped = Arc::new(FakeTransport::new(vec![(
            INTRUSION_DETECTION,
            json!({"total_registered": 5, "total_active": 1, "alerts": [
                {"type": "warning", "severity": "medium", "message": "m"},
                {"type": "critical", "severity": "high", "message": "m"},
            ]}),
        )]));
        let FetchOutcome::Success { data, .. } = AlertFetcher::new(wrapped).fetch().await else {
            panic!("expected success");
        };
        assert_eq!(data.len(), 2);
        assert_eq!(data[1].severity, crate::models::Severity::High);
    }
}

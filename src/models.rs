use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::fetchers::FetchError;
use crate::map_filter::MapLayerFilters;

// ── Domains ─────────────────────────────────────────────────────

/// One independently pollable category of backend telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DomainId {
    Ssh,
    Identity,
    Alerts,
}

impl DomainId {
    pub const ALL: [DomainId; 3] = [DomainId::Ssh, DomainId::Identity, DomainId::Alerts];

    pub fn label(self) -> &'static str {
        match self {
            DomainId::Ssh => "ssh",
            DomainId::Identity => "identity",
            DomainId::Alerts => "alerts",
        }
    }
}

// ── Fetch outcome ───────────────────────────────────────────────

/// Result of one complete domain fetch. Never both data and error.
#[derive(Debug, Clone)]
pub enum FetchOutcome<T> {
    Success { data: T, fetched_at: DateTime<Utc> },
    Failure { error: FetchError, attempted_at: DateTime<Utc> },
}

impl<T> FetchOutcome<T> {
    pub fn success(data: T) -> Self {
        FetchOutcome::Success {
            data,
            fetched_at: Utc::now(),
        }
    }

    pub fn failure(error: FetchError) -> Self {
        FetchOutcome::Failure {
            error,
            attempted_at: Utc::now(),
        }
    }
}

// ── SSH domain ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize)]
pub struct SshSnapshot {
    pub attacks: u64,
    pub successful_logins: u64,
    pub blocked_ips: u64,
    pub unique_ips: u64,
    pub active_sessions: Vec<SessionRecord>,
}

/// One live SSH session — either a logged-in user or a raw socket.
#[derive(Debug, Clone, Serialize)]
pub struct SessionRecord {
    pub ip: String,
    pub country: String,
    pub is_trusted: bool,
    #[serde(flatten)]
    pub detail: SessionDetail,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "source_type", rename_all = "snake_case")]
pub enum SessionDetail {
    UserSession {
        user: String,
        login_time: String,
        terminal: Option<String>,
    },
    NetworkConnection {
        service: String,
        connection_status: String,
        remote_port: Option<String>,
    },
}

// ── Identity domain ─────────────────────────────────────────────

/// A registered user from the identity-platform directory.
///
/// The backend emits the id as a number here but as a string in the
/// active-connection feed; both are normalized to `String` on the way in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentityUser {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub display_name: String,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub last_login: Option<DateTime<Utc>>,
}

/// A user observed active on the identity platform recently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveConnection {
    #[serde(deserialize_with = "de_id")]
    pub user_id: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub is_trusted: bool,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub last_activity: Option<DateTime<Utc>>,
}

/// An identity user with its bound connection (if any) attached.
#[derive(Debug, Clone, Serialize)]
pub struct ConsolidatedUser {
    pub id: String,
    pub display_name: String,
    pub last_login: Option<DateTime<Utc>>,
    pub connection: Option<ActiveConnection>,
    pub is_currently_active: bool,
    pub is_recent_activity: bool,
}

/// The merged identity-domain view published to the dashboard.
#[derive(Debug, Clone, Default, Serialize)]
pub struct IdentitySnapshot {
    pub users: Vec<ConsolidatedUser>,
    /// Registered users in the directory — never counts connections,
    /// which may contain ghosts.
    pub total_users: usize,
    /// Connections that bound to a real directory user.
    pub active_users: usize,
    pub failed_logins_today: usize,
    pub successful_logins_today: usize,
    pub web_connections: usize,
    /// Connections referencing a user that does not exist. Diagnostic only.
    pub ghost_count: usize,
}

// ── Alert domain ────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub ip: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default = "one")]
    pub attempts: u64,
    #[serde(default, deserialize_with = "de_opt_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

fn one() -> u64 {
    1
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    High,
    Medium,
    Low,
    #[default]
    #[serde(other)]
    Unknown,
}

// ── Map domain ──────────────────────────────────────────────────

/// Rendered map payload plus the layer filters it was fetched with.
#[derive(Debug, Clone, Serialize)]
pub struct MapSnapshot {
    pub map_html: String,
    pub filters: MapLayerFilters,
}

// ── Lenient deserializers ───────────────────────────────────────

/// Accept a numeric or string identifier; normalize to `String` so the
/// consolidator compares ids by value instead of by wire type.
fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Num(i64),
        Str(String),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Num(n) => n.to_string(),
        RawId::Str(s) => s,
    })
}

/// Accept null, RFC 3339, naive `YYYY-MM-DDTHH:MM:SS[.f]`, or the
/// postgres `YYYY-MM-DD HH:MM:SS` flavor. Anything else (the backend
/// sometimes emits "unknown") becomes `None` rather than an error.
fn de_opt_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    Ok(raw.as_deref().and_then(parse_timestamp))
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_and_string_ids_normalize_to_string() {
        let user: IdentityUser =
            serde_json::from_value(serde_json::json!({"id": 7, "display_name": "A"})).unwrap();
        assert_eq!(user.id, "7");

        let conn: ActiveConnection =
            serde_json::from_value(serde_json::json!({"user_id": "7"})).unwrap();
        assert_eq!(conn.user_id, "7");
    }

    #[test]
    fn unknown_timestamp_becomes_none() {
        let conn: ActiveConnection =
            serde_json::from_value(serde_json::json!({"user_id": 3, "last_activity": "unknown"}))
                .unwrap();
        assert!(conn.last_activity.is_none());
    }

    #[test]
    fn naive_and_rfc3339_timestamps_parse() {
        assert!(parse_timestamp("2024-06-01T00:00:00Z").is_some());
        assert!(parse_timestamp("2024-06-01T12:30:00.123").is_some());
        assert!(parse_timestamp("2024-06-01 12:30:00").is_some());
        assert!(parse_timestamp("Activa").is_none());
    }

    #[test]
    fn alert_defaults() {
        let alert: Alert = serde_json::from_value(serde_json::json!({
            "type": "warning",
            "message": "High user activity",
            "severity": "critical",
        }))
        .unwrap();
        assert_eq!(alert.severity, Severity::Unknown);
        assert_eq!(alert.attempts, 1);
        assert!(alert.timestamp.is_none());

        let alert: Alert =
            serde_json::from_value(serde_json::json!({"type": "x", "severity": "high"})).unwrap();
        assert_eq!(alert.severity, Severity::High);
    }
}

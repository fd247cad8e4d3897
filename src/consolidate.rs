use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{ActiveConnection, ConsolidatedUser, IdentityUser};

/// Output of one consolidation pass. The user list always has exactly as
/// many entries as the directory — connections get filtered, users never do.
#[derive(Debug, Clone, Default)]
pub struct Consolidated {
    pub users: Vec<ConsolidatedUser>,
    /// Connections whose user id matched nothing in the directory.
    pub ghost_count: usize,
}

/// Cross-reference the user directory against the active-connection feed.
///
/// Connections bind to users by string-normalized id. A connection that
/// binds nowhere is a ghost: counted, logged, dropped. When several
/// connections bind to the same user, the one with the latest activity
/// wins. The result is sorted active-first, most recent first, with the
/// original order preserved on ties.
pub fn consolidate(
    users: &[IdentityUser],
    connections: Vec<ActiveConnection>,
    now: DateTime<Utc>,
) -> Consolidated {
    let index: HashMap<&str, usize> = users
        .iter()
        .enumerate()
        .map(|(i, u)| (u.id.as_str(), i))
        .collect();

    let mut bound: Vec<Option<ActiveConnection>> = vec![None; users.len()];
    let mut ghost_count = 0;

    for conn in connections {
        match index.get(conn.user_id.as_str()) {
            Some(&i) => match &bound[i] {
                // Last writer wins on duplicate bindings
                Some(prev) if prev.last_activity >= conn.last_activity => {}
                _ => bound[i] = Some(conn),
            },
            None => {
                debug!("👻 Ghost connection filtered: user id {}", conn.user_id);
                ghost_count += 1;
            }
        }
    }

    let mut out: Vec<ConsolidatedUser> = users
        .iter()
        .zip(bound)
        .map(|(user, connection)| {
            let is_currently_active = connection.is_some();
            let is_recent_activity = !is_currently_active
                && user
                    .last_login
                    .is_some_and(|t| now.signed_duration_since(t) <= Duration::hours(24));

            ConsolidatedUser {
                id: user.id.clone(),
                display_name: user.display_name.clone(),
                last_login: user.last_login,
                connection,
                is_currently_active,
                is_recent_activity,
            }
        })
        .collect();

    // Active users first by latest activity, everyone else by last login
    // (never logged in sorts oldest). Stable, so input order breaks ties.
    out.sort_by(|a, b| {
        b.is_currently_active
            .cmp(&a.is_currently_active)
            .then_with(|| sort_instant(b).cmp(&sort_instant(a)))
    });

    debug_assert_eq!(out.len(), users.len(), "consolidation must never drop users");

    Consolidated {
        users: out,
        ghost_count,
    }
}

fn sort_instant(user: &ConsolidatedUser) -> DateTime<Utc> {
    let t = match &user.connection {
        Some(conn) => conn.last_activity,
        None => user.last_login,
    };
    t.unwrap_or(DateTime::<Utc>::MIN_UTC)
}

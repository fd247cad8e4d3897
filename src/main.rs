use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use secdash::config::AppConfig;
use secdash::models::DomainId;
use secdash::scheduler::Scheduler;
use secdash::store::SnapshotStore;
use secdash::transport::HttpTransport;

const BANNER: &str = r#"
  ____            ____            _
 / ___|  ___  ___|  _ \  __ _ ___| |__
 \___ \ / _ \/ __| | | |/ _` / __| '_ \
  ___) |  __/ (__| |_| | (_| \__ \ | | |
 |____/ \___|\___|____/ \__,_|___/_| |_|
  Security Dashboard Telemetry Agent
"#;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── Logging ─────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "secdash=info".into()),
        )
        .compact()
        .init();

    println!("{BANNER}");

    // ── Config ──────────────────────────────────────────────────
    let cfg = AppConfig::load(None)?;
    info!(
        "Config loaded — backend {}, dashboard every {}s, alerts every {}s",
        cfg.backend.base_url, cfg.poll.dashboard_interval, cfg.poll.alerts_interval
    );

    // ── Wiring ──────────────────────────────────────────────────
    let transport = Arc::new(HttpTransport::new(&cfg.backend)?);
    let store = Arc::new(SnapshotStore::new());
    let scheduler = Scheduler::new(Arc::clone(&store), transport, cfg.poll.clone());

    // ── Poll until shutdown ─────────────────────────────────────
    scheduler.start();

    // Periodic one-line status so an operator tailing the log can see
    // what the dashboard would show.
    {
        let store = Arc::clone(&store);
        let dashboard_cadence = Duration::from_secs(cfg.poll.dashboard_interval);
        let alerts_cadence = Duration::from_secs(cfg.poll.alerts_interval);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.tick().await;
            loop {
                ticker.tick().await;

                let ssh = store.ssh();
                let identity = store.identity();
                let alerts = store.alerts();

                let stale: Vec<&str> = [
                    (DomainId::Ssh, dashboard_cadence),
                    (DomainId::Identity, dashboard_cadence),
                    (DomainId::Alerts, alerts_cadence),
                ]
                .into_iter()
                .filter(|(d, cadence)| store.is_stale(*d, *cadence))
                .map(|(d, _)| d.label())
                .collect();

                info!(
                    "Status — attacks: {}, sessions: {}, users: {}/{}, alerts: {}, map: {}, stale: [{}]",
                    ssh.payload.as_ref().map_or(0, |s| s.attacks),
                    ssh.payload.as_ref().map_or(0, |s| s.active_sessions.len()),
                    identity.payload.as_ref().map_or(0, |i| i.active_users),
                    identity.payload.as_ref().map_or(0, |i| i.total_users),
                    alerts.payload.as_ref().map_or(0, |a| a.len()),
                    if store.map().payload.is_some() { "loaded" } else { "pending" },
                    stale.join(", "),
                );
            }
        });
    }

    tokio::signal::ctrl_c().await?;
    info!("Ctrl-C received — shutting down");
    scheduler.stop();

    // In-flight fetches finish in the background; nothing waits on them.
    Ok(())
}

use serde::Deserialize;
use std::path::Path;
use tracing::info;

/// Root configuration loaded from `config.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub backend: BackendConfig,
    pub poll: PollConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base address of the dashboard backend, e.g. `http://localhost:8080`.
    pub base_url: String,
    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".into(),
            timeout_secs: 10,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    /// Seconds between full SSH + identity refreshes.
    pub dashboard_interval: u64,
    /// Seconds between intrusion-alert refreshes.
    pub alerts_interval: u64,
    /// Milliseconds to wait for further layer toggles before refetching
    /// the map. One refetch per change batch.
    pub map_debounce_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            dashboard_interval: 900,
            alerts_interval: 300,
            map_debounce_ms: 250,
        }
    }
}

impl AppConfig {
    /// Load and parse the config file. Falls back to `./config.toml` next to
    /// the executable if no explicit path is given; a missing file means
    /// built-in defaults rather than an error.
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let path = match path {
            Some(p) => std::path::PathBuf::from(p),
            None => {
                // Look next to the executable first, then CWD
                let exe_dir = std::env::current_exe()
                    .ok()
                    .and_then(|p| p.parent().map(Path::to_path_buf));

                if let Some(dir) = exe_dir {
                    let candidate = dir.join("config.toml");
                    if candidate.exists() {
                        candidate
                    } else {
                        std::path::PathBuf::from("config.toml")
                    }
                } else {
                    std::path::PathBuf::from("config.toml")
                }
            }
        };

        if !path.exists() {
            info!("No config file at {} — using defaults", path.display());
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| anyhow::anyhow!("Failed to read config at {}: {e}", path.display()))?;

        let config: AppConfig = toml::from_str(&raw)?;
        Ok(config)
    }
}

use panelmon_common::types::{Alert, SaveAlertsCommand, Severity};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub alerting: AlertingConfig,
    #[serde(default)]
    pub notifications: Vec<NotificationConfig>,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Address for the Prometheus scrape endpoint, e.g. `0.0.0.0:9464`.
    /// Metrics are recorded but not exported when unset.
    #[serde(default)]
    pub listen: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertingConfig {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Stable id of this process in the cluster; random per start when unset.
    #[serde(default)]
    pub server_id: Option<String>,
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    #[serde(default = "default_eval_timeout_secs")]
    pub eval_timeout_secs: u64,
    #[serde(default = "default_heartbeat_liveness_secs")]
    pub heartbeat_liveness_secs: u64,
    #[serde(default = "default_heartbeat_cleanup_secs")]
    pub heartbeat_cleanup_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationConfig {
    pub name: String,
    pub channel_type: String,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_database_url() -> String {
    "sqlite://data/panelmon.db?mode=rwc".to_string()
}

fn default_enabled() -> bool {
    true
}

fn default_tick_secs() -> u64 {
    1
}

fn default_eval_timeout_secs() -> u64 {
    5
}

fn default_heartbeat_liveness_secs() -> u64 {
    60
}

fn default_heartbeat_cleanup_secs() -> u64 {
    300
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl Default for AlertingConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            server_id: None,
            tick_secs: default_tick_secs(),
            eval_timeout_secs: default_eval_timeout_secs(),
            heartbeat_liveness_secs: default_heartbeat_liveness_secs(),
            heartbeat_cleanup_secs: default_heartbeat_cleanup_secs(),
        }
    }
}

impl DatabaseConfig {
    /// Directory holding the SQLite file, if the url points at one.
    pub fn sqlite_dir(&self) -> Option<PathBuf> {
        let rest = self.url.strip_prefix("sqlite://")?;
        let path = rest.split('?').next().unwrap_or(rest);
        if path.is_empty() || path == ":memory:" {
            return None;
        }
        Path::new(path)
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(Path::to_path_buf)
    }
}

impl AlertingConfig {
    pub fn resolve_server_id(&self) -> String {
        self.server_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn eval_timeout(&self) -> Duration {
        Duration::from_secs(self.eval_timeout_secs)
    }

    pub fn heartbeat_liveness(&self) -> Duration {
        Duration::from_secs(self.heartbeat_liveness_secs)
    }

    pub fn heartbeat_cleanup(&self) -> Duration {
        Duration::from_secs(self.heartbeat_cleanup_secs)
    }
}

impl ServerConfig {
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path`, falling back to defaults when the default config file
    /// does not exist. A missing explicit path is an error.
    pub fn load_or_default(path: &str) -> anyhow::Result<Self> {
        if path == DEFAULT_CONFIG_PATH && !Path::new(path).exists() {
            tracing::warn!(path, "Config file not found, using defaults");
            return Ok(Self::default());
        }
        Self::load(path)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let a = &self.alerting;
        if a.tick_secs == 0 {
            anyhow::bail!("alerting.tick_secs must be positive");
        }
        if a.eval_timeout_secs == 0 {
            anyhow::bail!("alerting.eval_timeout_secs must be positive");
        }
        if a.heartbeat_liveness_secs == 0 {
            anyhow::bail!("alerting.heartbeat_liveness_secs must be positive");
        }
        if a.heartbeat_cleanup_secs == 0 {
            anyhow::bail!("alerting.heartbeat_cleanup_secs must be positive");
        }
        if let Some(listen) = &self.metrics.listen {
            listen
                .parse::<std::net::SocketAddr>()
                .map_err(|e| anyhow::anyhow!("metrics.listen '{}' is not a socket address: {}", listen, e))?;
        }
        let mut names = std::collections::HashSet::new();
        for n in &self.notifications {
            if !names.insert(n.name.as_str()) {
                anyhow::bail!("duplicate notification channel name '{}'", n.name);
            }
        }
        Ok(())
    }
}

// ---- Alerts import file (used by `import-alerts` CLI subcommand) ----

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertsImportFile {
    pub org_id: i64,
    pub dashboard_id: i64,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default)]
    pub alerts: Vec<ImportAlert>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportAlert {
    pub panel_id: i64,
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default = "default_import_severity")]
    pub severity: Severity,
    #[serde(default = "default_import_frequency")]
    pub frequency: i64,
    #[serde(default)]
    pub silenced: bool,
    pub settings: serde_json::Value,
}

fn default_import_severity() -> Severity {
    Severity::Warning
}

fn default_import_frequency() -> i64 {
    60
}

impl AlertsImportFile {
    pub fn into_command(self) -> SaveAlertsCommand {
        let alerts = self
            .alerts
            .into_iter()
            .map(|a| {
                let mut alert = Alert::new(self.org_id, self.dashboard_id, a.panel_id, a.name);
                alert.message = a.message;
                alert.severity = a.severity;
                alert.frequency = a.frequency;
                alert.silenced = a.silenced;
                alert.settings = Some(a.settings);
                alert
            })
            .collect();

        SaveAlertsCommand {
            dashboard_id: self.dashboard_id,
            user_id: self.user_id,
            org_id: self.org_id,
            alerts,
        }
    }
}

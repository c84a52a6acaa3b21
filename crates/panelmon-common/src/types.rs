use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle phase of a persisted alert.
///
/// # Examples
///
/// ```
/// use panelmon_common::types::AlertState;
///
/// let state: AlertState = "execution_error".parse().unwrap();
/// assert_eq!(state, AlertState::ExecutionError);
/// assert_eq!(state.to_string(), "execution_error");
/// assert!(!AlertState::is_valid("firing"));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertState {
    Pending,
    ExecutionError,
    Paused,
    Critical,
    Warning,
    Ok,
}

impl AlertState {
    pub const ALL: [AlertState; 6] = [
        AlertState::Pending,
        AlertState::ExecutionError,
        AlertState::Paused,
        AlertState::Critical,
        AlertState::Warning,
        AlertState::Ok,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlertState::Pending => "pending",
            AlertState::ExecutionError => "execution_error",
            AlertState::Paused => "paused",
            AlertState::Critical => "critical",
            AlertState::Warning => "warning",
            AlertState::Ok => "ok",
        }
    }

    /// Returns true only for the six state literals.
    pub fn is_valid(s: &str) -> bool {
        s.parse::<AlertState>().is_ok()
    }

    /// Whether an alert in this state is currently firing.
    pub fn is_firing(&self) -> bool {
        matches!(self, AlertState::Critical | AlertState::Warning)
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for AlertState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AlertState::ALL
            .into_iter()
            .find(|state| state.as_str() == s)
            .ok_or_else(|| format!("unknown alert state: {s}"))
    }
}

/// Alert severity level, ordered from lowest to highest.
///
/// # Examples
///
/// ```
/// use panelmon_common::types::Severity;
///
/// let sev: Severity = "warning".parse().unwrap();
/// assert_eq!(sev, Severity::Warning);
/// assert!(Severity::Critical > Severity::Info);
/// assert!("fatal".parse::<Severity>().is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Ok,
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Ok => "ok",
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }

    pub fn is_valid(s: &str) -> bool {
        s.parse::<Severity>().is_ok()
    }

    /// The state an alert enters when its rule fires at this severity.
    ///
    /// There is no `info` state, so informational rules surface as `warning`.
    pub fn firing_state(&self) -> AlertState {
        match self {
            Severity::Critical => AlertState::Critical,
            Severity::Warning | Severity::Info => AlertState::Warning,
            Severity::Ok => AlertState::Ok,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ok" => Ok(Severity::Ok),
            "info" => Ok(Severity::Info),
            "warning" => Ok(Severity::Warning),
            "critical" => Ok(Severity::Critical),
            _ => Err(format!("unknown severity: {s}")),
        }
    }
}

/// A persisted alert: one per (dashboard, panel) alert definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub version: i64,
    pub org_id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub name: String,
    pub message: String,
    pub severity: Severity,
    pub state: AlertState,
    pub handler: i64,
    pub silenced: bool,
    /// Text of the last execution error, empty when the last run succeeded.
    pub execution_error: String,
    /// Evaluation frequency in seconds.
    pub frequency: i64,
    pub eval_data: Option<Value>,
    pub eval_date: Option<DateTime<Utc>>,
    pub new_state_date: DateTime<Utc>,
    pub state_changes: i32,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    pub settings: Option<Value>,
}

impl Alert {
    /// A fresh, not yet persisted alert definition for one dashboard panel.
    pub fn new(org_id: i64, dashboard_id: i64, panel_id: i64, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            version: 0,
            org_id,
            dashboard_id,
            panel_id,
            name: name.into(),
            message: String::new(),
            severity: Severity::Warning,
            state: AlertState::Pending,
            handler: 0,
            silenced: false,
            execution_error: String::new(),
            frequency: 60,
            eval_data: None,
            eval_date: None,
            new_state_date: now,
            state_changes: 0,
            created: now,
            updated: now,
            settings: None,
        }
    }

    pub fn valid_to_save(&self) -> bool {
        self.dashboard_id != 0 && self.org_id != 0 && self.panel_id != 0
    }

    pub fn should_update_state(&self, new_state: AlertState) -> bool {
        self.state != new_state
    }

    /// Reports whether the rule definition differs from `other`.
    ///
    /// Only name, message and serialized settings are compared. State is
    /// evaluation output and never counts as a definition change.
    pub fn contains_updates(&self, other: &Alert) -> bool {
        let mut result = self.name != other.name || self.message != other.message;

        if let (Some(ours), Some(theirs)) = (&self.settings, &other.settings) {
            match (serde_json::to_string(ours), serde_json::to_string(theirs)) {
                (Ok(a), Ok(b)) => result = result || a != b,
                _ => return false,
            }
        }

        result
    }

    /// Whether the scheduler should evaluate this alert at all.
    pub fn is_active(&self) -> bool {
        !self.silenced && self.state != AlertState::Paused
    }
}

/// Liveness record of one server process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartBeat {
    pub id: i64,
    pub server_id: String,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

// ---- Commands ----

#[derive(Debug, Clone)]
pub struct SaveAlertsCommand {
    pub dashboard_id: i64,
    pub user_id: i64,
    pub org_id: i64,
    pub alerts: Vec<Alert>,
}

/// Result of one evaluation, written back to the alert row.
///
/// Severity, eval payload and eval date are always written; state, the
/// state-change counter and the new-state date only move when `state`
/// differs from the stored one.
#[derive(Debug, Clone)]
pub struct SetAlertStateCommand {
    pub alert_id: i64,
    pub org_id: i64,
    pub state: AlertState,
    pub severity: Severity,
    pub error: String,
    pub eval_data: Option<Value>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteAlertCommand {
    pub alert_id: i64,
}

#[derive(Debug, Clone)]
pub struct HeartBeatCommand {
    pub server_id: String,
    /// Heartbeats not refreshed within this many seconds are not counted.
    pub liveness_secs: i64,
}

// ---- Queries ----

/// Alert lookup filters. `None` or empty fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct GetAlertsQuery {
    pub org_id: i64,
    pub state: Vec<AlertState>,
    pub dashboard_id: Option<i64>,
    pub panel_id: Option<i64>,
}

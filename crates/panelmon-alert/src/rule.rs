use panelmon_common::types::{Alert, Severity};
use serde_json::Value;
use std::sync::Arc;

use crate::error::RuleError;
use crate::registry::ConditionRegistry;
use crate::Condition;

/// An executable alert rule: the alert definition plus its resolved
/// condition chain.
pub struct AlertRule {
    pub id: i64,
    pub org_id: i64,
    pub dashboard_id: i64,
    pub panel_id: i64,
    pub name: String,
    pub message: String,
    pub severity: Severity,
    /// Evaluation frequency in seconds.
    pub frequency: i64,
    /// Evaluated in order; the chain stops at the first non-firing result.
    pub conditions: Vec<Arc<dyn Condition>>,
}

impl AlertRule {
    /// The rule header of `alert` with an empty condition chain.
    pub fn without_conditions(alert: &Alert) -> Self {
        Self {
            id: alert.id,
            org_id: alert.org_id,
            dashboard_id: alert.dashboard_id,
            panel_id: alert.panel_id,
            name: alert.name.clone(),
            message: alert.message.clone(),
            severity: alert.severity,
            frequency: alert.frequency,
            conditions: Vec::new(),
        }
    }

    /// Builds a rule from an alert's `settings.conditions` array.
    ///
    /// Each entry must carry a `type` naming a plugin in `registry`; the whole
    /// entry is handed to that plugin as the condition model.
    pub fn from_alert(alert: &Alert, registry: &ConditionRegistry) -> Result<Self, RuleError> {
        let models = alert
            .settings
            .as_ref()
            .and_then(|s| s.get("conditions"))
            .and_then(Value::as_array)
            .filter(|c| !c.is_empty())
            .ok_or(RuleError::MissingConditions)?;

        let mut rule = Self::without_conditions(alert);
        for (index, model) in models.iter().enumerate() {
            let condition_type = model
                .get("type")
                .and_then(Value::as_str)
                .ok_or(RuleError::MissingConditionType { index })?;

            let condition = registry
                .create_condition(condition_type, model)
                .map_err(|e| RuleError::InvalidCondition {
                    index,
                    condition_type: condition_type.to_string(),
                    reason: e.to_string(),
                })?;
            rule.conditions.push(condition);
        }

        Ok(rule)
    }
}

impl std::fmt::Debug for AlertRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let types: Vec<&str> = self.conditions.iter().map(|c| c.condition_type()).collect();
        f.debug_struct("AlertRule")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("severity", &self.severity)
            .field("frequency", &self.frequency)
            .field("conditions", &types)
            .finish()
    }
}

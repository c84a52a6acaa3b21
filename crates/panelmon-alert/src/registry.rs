use crate::Condition;
use anyhow::Result;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Factory for [`Condition`] instances from a condition's JSON model.
///
/// Each plugin is registered in the [`ConditionRegistry`] by its `name()`,
/// which is the `type` field of a condition in the alert settings.
pub trait ConditionPlugin: Send + Sync {
    /// Returns the condition type name (e.g. `"query"`).
    fn name(&self) -> &str;

    /// Builds a condition from its JSON model.
    fn create_condition(&self, model: &Value) -> Result<Arc<dyn Condition>>;
}

/// Lookup from condition type name to the plugin that builds it.
///
/// Built once at startup from a known list of plugins and shared with the
/// scheduler.
///
/// # Examples
///
/// ```
/// use panelmon_alert::registry::ConditionRegistry;
///
/// let registry = ConditionRegistry::new();
/// assert!(!registry.has_plugin("query"));
/// assert!(registry.create_condition("query", &serde_json::json!({})).is_err());
/// ```
#[derive(Default)]
pub struct ConditionRegistry {
    plugins: HashMap<String, Box<dyn ConditionPlugin>>,
}

impl ConditionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Box<dyn ConditionPlugin>) {
        let name = plugin.name().to_string();
        self.plugins.insert(name, plugin);
    }

    pub fn create_condition(&self, type_name: &str, model: &Value) -> Result<Arc<dyn Condition>> {
        let plugin = self
            .plugins
            .get(type_name)
            .ok_or_else(|| anyhow::anyhow!("Unknown condition type: {type_name}"))?;
        plugin.create_condition(model)
    }

    pub fn has_plugin(&self, type_name: &str) -> bool {
        self.plugins.contains_key(type_name)
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }
}

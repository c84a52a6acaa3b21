use crate::error::{NotifyError, Result};
use crate::plugin::ChannelPlugin;
use crate::NotificationChannel;
use async_trait::async_trait;
use panelmon_common::types::Severity;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
}

#[derive(Debug, Deserialize)]
struct LogConfig {
    #[serde(default = "default_level")]
    level: LogLevel,
}

fn default_level() -> LogLevel {
    LogLevel::Warn
}

/// Writes notifications to the process log at a fixed level.
pub struct LogChannel {
    name: String,
    level: LogLevel,
}

impl LogChannel {
    pub fn new(name: &str, level: LogLevel) -> Self {
        Self {
            name: name.to_string(),
            level,
        }
    }
}

#[async_trait]
impl NotificationChannel for LogChannel {
    async fn send(&self, severity: Severity, message: &str) -> Result<()> {
        match self.level {
            LogLevel::Info => {
                tracing::info!(channel = %self.name, severity = %severity, "{}", message)
            }
            LogLevel::Warn => {
                tracing::warn!(channel = %self.name, severity = %severity, "{}", message)
            }
            LogLevel::Error => {
                tracing::error!(channel = %self.name, severity = %severity, "{}", message)
            }
        }
        Ok(())
    }

    fn channel_type(&self) -> &str {
        "log"
    }

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct LogPlugin;

impl ChannelPlugin for LogPlugin {
    fn name(&self) -> &str {
        "log"
    }

    fn validate_config(&self, config: &Value) -> Result<()> {
        if !config.is_null() && !config.is_object() {
            return Err(NotifyError::InvalidConfig(
                "log channel settings must be a table".to_string(),
            ));
        }
        parse_config(config).map(|_| ())
    }

    fn create_channel(&self, instance_name: &str, config: &Value) -> Result<Box<dyn NotificationChannel>> {
        let config = parse_config(config)?;
        Ok(Box::new(LogChannel::new(instance_name, config.level)))
    }
}

fn parse_config(config: &Value) -> Result<LogConfig> {
    if config.is_null() {
        return Ok(LogConfig {
            level: default_level(),
        });
    }
    Ok(serde_json::from_value(config.clone())?)
}

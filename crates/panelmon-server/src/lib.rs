//! Alerting server: configuration, the scheduling engine and result
//! handling, wired together by the `panelmon-server` binary.

pub mod config;
pub mod error;
pub mod result_handler;
pub mod scheduler;
pub mod telemetry;

#[cfg(test)]
mod tests;

use panelmon_notify::plugin::ChannelRegistry;
use panelmon_notify::NotificationChannel;

use config::NotificationConfig;
use error::EngineError;

/// Builds every configured notification channel.
///
/// Any channel that fails to build fails the whole call; the server must
/// not start with a partial channel set.
pub fn build_channels(
    registry: &ChannelRegistry,
    configs: &[NotificationConfig],
) -> error::Result<Vec<Box<dyn NotificationChannel>>> {
    configs
        .iter()
        .map(|c| {
            registry
                .create_channel(&c.channel_type, &c.name, &c.settings)
                .map_err(|source| EngineError::Channel {
                    name: c.name.clone(),
                    source,
                })
        })
        .collect()
}

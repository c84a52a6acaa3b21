//! Notification delivery for firing alerts.
//!
//! Channels are built from configuration through the
//! [`plugin::ChannelRegistry`] and fanned out to by the
//! [`dispatcher::NotificationDispatcher`]. Transport mechanics (SMTP, chat,
//! webhooks) live outside this crate; the only built-in channel writes to the
//! process log.

pub mod channels;
pub mod dispatcher;
pub mod error;
pub mod plugin;


use async_trait::async_trait;
use error::NotifyError;
use panelmon_common::types::Severity;

/// A configured notification target.
///
/// Implementations are created by the corresponding [`plugin::ChannelPlugin`].
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    /// Delivers one notification.
    ///
    /// # Errors
    ///
    /// Returns an error if delivery failed. The dispatcher logs it and moves
    /// on; no retry happens here.
    async fn send(&self, severity: Severity, message: &str) -> Result<(), NotifyError>;

    /// Returns the channel type name (e.g., `"log"`).
    fn channel_type(&self) -> &str;

    /// Returns the configured instance name.
    fn name(&self) -> &str;
}

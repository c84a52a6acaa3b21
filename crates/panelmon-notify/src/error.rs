/// Errors that can occur within the notification subsystem.
///
/// # Examples
///
/// ```rust
/// use panelmon_notify::error::NotifyError;
///
/// let err = NotifyError::InvalidConfig("missing level".to_string());
/// assert!(err.to_string().contains("level"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Channel configuration is missing a required field or contains an invalid value.
    #[error("Notify: invalid channel configuration: {0}")]
    InvalidConfig(String),

    /// The channel type is not registered in the plugin registry.
    #[error("Notify: unknown channel type '{0}'")]
    UnknownChannelType(String),

    /// JSON deserialization of channel settings failed.
    #[error("Notify: JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// The channel could not deliver the notification.
    #[error("Notify: delivery through {channel} failed: {reason}")]
    Delivery { channel: String, reason: String },
}

/// Convenience `Result` alias for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

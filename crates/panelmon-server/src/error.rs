use panelmon_notify::error::NotifyError;
use panelmon_storage::error::StorageError;

/// Errors surfaced by the alerting engine.
///
/// Storage errors are scoped to one tick or one rule; channel errors only
/// occur while building the dispatcher at startup.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Engine: storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Engine: notification channel '{name}' could not be built: {source}")]
    Channel {
        name: String,
        #[source]
        source: NotifyError,
    },
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a rule evaluation did not produce a firing/not-firing result.
///
/// Stored in the evaluation context's error slot; the text ends up in the
/// alert's `execution_error` column.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    /// The condition chain did not complete within the evaluation timeout.
    #[error("Timeout")]
    Timeout,

    /// A condition reported a failure.
    #[error("{0}")]
    Condition(String),

    /// The evaluation task ended without reporting a result.
    #[error("evaluation task exited without reporting a result")]
    Aborted,

    /// The rule's conditions could not be built from its settings.
    #[error("{0}")]
    RuleLoad(#[from] RuleError),
}

/// Errors raised while building an [`crate::rule::AlertRule`] from alert
/// settings.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleError {
    #[error("alert is missing conditions")]
    MissingConditions,

    #[error("condition {index} has no type")]
    MissingConditionType { index: usize },

    #[error("condition {index} ({condition_type}) is invalid: {reason}")]
    InvalidCondition {
        index: usize,
        condition_type: String,
        reason: String,
    },
}

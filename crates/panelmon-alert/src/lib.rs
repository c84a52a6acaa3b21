//! Rule evaluation for panel alerts.
//!
//! An [`rule::AlertRule`] is an ordered chain of [`Condition`]s resolved
//! through a [`registry::ConditionRegistry`]. The [`eval_handler::EvalHandler`]
//! runs the chain for one rule under a hard timeout and reports the outcome
//! through an [`context::EvalContext`]. Built-in condition types live in
//! [`conditions`].

pub mod conditions;
pub mod context;
pub mod error;
pub mod eval_handler;
pub mod registry;
pub mod rule;


use async_trait::async_trait;
use context::EvalContext;

/// One step of a rule's condition chain.
///
/// Implementations are created by the matching [`registry::ConditionPlugin`]
/// when a rule is loaded. A rule fires only when every condition in its chain
/// reports `true`; the chain stops at the first `false` or error.
#[async_trait]
pub trait Condition: Send + Sync {
    /// The registered type name (e.g. `"query"`).
    fn condition_type(&self) -> &str;

    /// Evaluates the condition, returning whether it is firing.
    ///
    /// Side effects must stay within `context` (for example appending
    /// [`context::EvalMatch`]es).
    ///
    /// # Errors
    ///
    /// Returns an error if the condition could not be evaluated; the rule
    /// then transitions to `execution_error`.
    async fn evaluate(&self, context: &mut EvalContext) -> anyhow::Result<bool>;
}

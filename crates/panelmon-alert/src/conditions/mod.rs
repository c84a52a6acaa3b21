//! Built-in condition types.

pub mod query;

pub use query::{QueryCondition, QueryConditionPlugin, SeriesSource};

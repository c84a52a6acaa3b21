//! Shared domain types for the panelmon alerting engine.
//!
//! [`types`] holds the persisted [`types::Alert`] entity together with its
//! state model, the cluster heartbeat records and the storage commands and
//! queries exchanged with the storage layer. [`metrics`] provides the
//! injectable metrics registry used by evaluation and notification code.

pub mod cluster;
pub mod metrics;
pub mod types;

#[cfg(test)]
mod tests;

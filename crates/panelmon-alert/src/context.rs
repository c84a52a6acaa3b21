use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::time::Instant;

use crate::error::EvalError;
use crate::rule::AlertRule;

/// A series value that satisfied a condition, kept as evaluation payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalMatch {
    pub metric: String,
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub tags: HashMap<String, String>,
}

/// State of one evaluation attempt of one rule.
///
/// Created fresh for every attempt and discarded once the result has been
/// applied. The completion signal is the `oneshot` channel owned by
/// [`crate::eval_handler::EvalHandler`], not a field here.
#[derive(Clone)]
pub struct EvalContext {
    pub rule: Arc<AlertRule>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub error: Option<EvalError>,
    pub firing: bool,
    pub eval_matches: Vec<EvalMatch>,
    started: Instant,
}

impl EvalContext {
    pub fn new(rule: Arc<AlertRule>) -> Self {
        Self {
            rule,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            firing: false,
            eval_matches: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Marks the evaluation finished now.
    pub fn finish(&mut self) {
        self.end_time = Some(Utc::now());
    }

    /// Wall-clock time since the context was created.
    pub fn elapsed(&self) -> std::time::Duration {
        self.started.elapsed()
    }

    /// Duration between start and end, once finished.
    pub fn duration_ms(&self) -> Option<i64> {
        self.end_time
            .map(|end| (end - self.start_time).num_milliseconds())
    }
}

impl std::fmt::Debug for EvalContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalContext")
            .field("rule_id", &self.rule.id)
            .field("start_time", &self.start_time)
            .field("end_time", &self.end_time)
            .field("error", &self.error)
            .field("firing", &self.firing)
            .field("eval_matches", &self.eval_matches.len())
            .finish()
    }
}

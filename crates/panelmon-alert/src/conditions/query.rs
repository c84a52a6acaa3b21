//! The `query` condition: fetch series from a data source, reduce each
//! series to one value and compare it against an evaluator.
//!
//! Query execution itself belongs to the [`SeriesSource`] collaborator; this
//! module only reduces and compares.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::context::{EvalContext, EvalMatch};
use crate::registry::ConditionPlugin;
use crate::Condition;

#[derive(Debug, Clone, PartialEq)]
pub struct DataPoint {
    pub timestamp: DateTime<Utc>,
    pub value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TimeSeries {
    pub name: String,
    pub tags: HashMap<String, String>,
    pub points: Vec<DataPoint>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesQuery {
    pub query: String,
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

/// A data source able to execute a query over a time range.
#[async_trait]
pub trait SeriesSource: Send + Sync {
    async fn query(&self, query: &SeriesQuery) -> anyhow::Result<Vec<TimeSeries>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reducer {
    Avg,
    Min,
    Max,
    Sum,
    Count,
    Last,
}

impl FromStr for Reducer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "avg" => Ok(Self::Avg),
            "min" => Ok(Self::Min),
            "max" => Ok(Self::Max),
            "sum" => Ok(Self::Sum),
            "count" => Ok(Self::Count),
            "last" => Ok(Self::Last),
            _ => Err(format!("unknown reducer: {s}")),
        }
    }
}

impl Reducer {
    /// Reduces a series to one value, ignoring null points.
    ///
    /// Returns `None` when the series has no non-null value (except for
    /// `count`, which is then zero).
    pub fn reduce(&self, points: &[DataPoint]) -> Option<f64> {
        let mut values = points.iter().filter_map(|p| p.value);
        match self {
            Self::Count => Some(values.count() as f64),
            Self::Last => values.last(),
            Self::Min => values.reduce(f64::min),
            Self::Max => values.reduce(f64::max),
            Self::Sum => values.reduce(|a, b| a + b),
            Self::Avg => {
                let (sum, n) = values.fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));
                (n > 0).then(|| sum / n as f64)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    GreaterThan(f64),
    LessThan(f64),
    WithinRange(f64, f64),
    OutsideRange(f64, f64),
    NoValue,
}

impl Evaluator {
    pub fn matches(&self, reduced: Option<f64>) -> bool {
        let Some(value) = reduced else {
            return matches!(self, Self::NoValue);
        };
        match self {
            Self::GreaterThan(threshold) => value > *threshold,
            Self::LessThan(threshold) => value < *threshold,
            Self::WithinRange(a, b) => value >= a.min(*b) && value <= a.max(*b),
            Self::OutsideRange(a, b) => value < a.min(*b) || value > a.max(*b),
            Self::NoValue => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct EvaluatorModel {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    params: Vec<f64>,
}

impl TryFrom<EvaluatorModel> for Evaluator {
    type Error = String;

    fn try_from(model: EvaluatorModel) -> Result<Self, Self::Error> {
        let param = |i: usize| {
            model
                .params
                .get(i)
                .copied()
                .ok_or_else(|| format!("evaluator {} needs {} param(s)", model.kind, i + 1))
        };
        match model.kind.as_str() {
            "gt" => Ok(Self::GreaterThan(param(0)?)),
            "lt" => Ok(Self::LessThan(param(0)?)),
            "within_range" => Ok(Self::WithinRange(param(0)?, param(1)?)),
            "outside_range" => Ok(Self::OutsideRange(param(0)?, param(1)?)),
            "no_value" => Ok(Self::NoValue),
            other => Err(format!("unknown evaluator: {other}")),
        }
    }
}

#[derive(Debug, Deserialize)]
struct QueryConditionModel {
    datasource: String,
    query: String,
    #[serde(default = "default_range_secs")]
    range_secs: i64,
    reducer: String,
    evaluator: EvaluatorModel,
}

fn default_range_secs() -> i64 {
    300
}

pub struct QueryCondition {
    source: Arc<dyn SeriesSource>,
    query: String,
    range: Duration,
    reducer: Reducer,
    evaluator: Evaluator,
}

impl QueryCondition {
    pub fn new(
        source: Arc<dyn SeriesSource>,
        query: impl Into<String>,
        range: Duration,
        reducer: Reducer,
        evaluator: Evaluator,
    ) -> Self {
        Self {
            source,
            query: query.into(),
            range,
            reducer,
            evaluator,
        }
    }
}

#[async_trait]
impl Condition for QueryCondition {
    fn condition_type(&self) -> &str {
        "query"
    }

    /// Fires when any returned series matches the evaluator.
    async fn evaluate(&self, context: &mut EvalContext) -> anyhow::Result<bool> {
        let to = Utc::now();
        let series = self
            .source
            .query(&SeriesQuery {
                query: self.query.clone(),
                from: to - self.range,
                to,
            })
            .await?;

        let mut firing = false;
        for s in series {
            let reduced = self.reducer.reduce(&s.points);
            if self.evaluator.matches(reduced) {
                firing = true;
                context.eval_matches.push(EvalMatch {
                    metric: s.name,
                    value: reduced,
                    tags: s.tags,
                });
            }
        }

        Ok(firing)
    }
}

/// Builds [`QueryCondition`]s against a fixed set of named data sources.
#[derive(Default)]
pub struct QueryConditionPlugin {
    sources: HashMap<String, Arc<dyn SeriesSource>>,
}

impl QueryConditionPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_source(mut self, name: impl Into<String>, source: Arc<dyn SeriesSource>) -> Self {
        self.sources.insert(name.into(), source);
        self
    }

    /// Names of the registered series sources, sorted.
    pub fn source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sources.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl ConditionPlugin for QueryConditionPlugin {
    fn name(&self) -> &str {
        "query"
    }

    fn create_condition(&self, model: &Value) -> anyhow::Result<Arc<dyn Condition>> {
        let model: QueryConditionModel = serde_json::from_value(model.clone())?;
        let source = self
            .sources
            .get(&model.datasource)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("unknown datasource: {}", model.datasource))?;
        if model.range_secs <= 0 {
            anyhow::bail!("range_secs must be positive");
        }
        let reducer: Reducer = model.reducer.parse().map_err(anyhow::Error::msg)?;
        let evaluator = Evaluator::try_from(model.evaluator).map_err(anyhow::Error::msg)?;

        Ok(Arc::new(QueryCondition::new(
            source,
            model.query,
            Duration::seconds(model.range_secs),
            reducer,
            evaluator,
        )))
    }
}

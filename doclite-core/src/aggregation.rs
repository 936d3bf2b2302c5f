// src/aggregation.rs
// Grouped aggregation pipeline

use ahash::AHashMap;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use tracing::debug;

use crate::error::{DocLiteError, Result};
use crate::executor::{self, Projection, SelectSpec};
use crate::index::IndexDefinition;
use crate::path::{lookup, validate_field_path};
use crate::query::Query;
use crate::query_planner::QueryPlanner;

/// Aggregate functions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AggregateFunction {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggregateFunction {
    /// Case-insensitive; accepts `COUNT` as well as `$count`
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim_start_matches('$').to_ascii_uppercase().as_str() {
            "COUNT" => Ok(AggregateFunction::Count),
            "SUM" => Ok(AggregateFunction::Sum),
            "AVG" => Ok(AggregateFunction::Avg),
            "MIN" => Ok(AggregateFunction::Min),
            "MAX" => Ok(AggregateFunction::Max),
            _ => Err(DocLiteError::Plan(format!("Unknown aggregate function: {}", name))),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateFunction::Count => "count",
            AggregateFunction::Sum => "sum",
            AggregateFunction::Avg => "avg",
            AggregateFunction::Min => "min",
            AggregateFunction::Max => "max",
        }
    }
}

/// One grouping stage, evaluated independently against the base collection
#[derive(Debug, Clone, PartialEq)]
pub struct AggregationStage {
    /// `None` puts every document in a single group
    pub group_by: Option<String>,
    pub function: AggregateFunction,
    /// Required for everything except COUNT
    pub target: Option<String>,
    pub alias: String,
    /// Optional narrowing of the scanned documents
    pub filter: Option<Query>,
}

impl AggregationStage {
    pub fn new(
        group_by: Option<&str>,
        function: AggregateFunction,
        target: Option<&str>,
        alias: Option<&str>,
    ) -> Result<Self> {
        if let Some(field) = group_by {
            validate_field_path(field)?;
        }
        if let Some(field) = target {
            validate_field_path(field)?;
        }
        if function != AggregateFunction::Count && target.is_none() {
            return Err(DocLiteError::Plan(format!(
                "{} requires a target field",
                function.as_str().to_uppercase()
            )));
        }

        let alias = match (alias, target) {
            (Some(alias), _) => alias.to_string(),
            (None, Some(target)) if function != AggregateFunction::Count => {
                format!("{}_{}", function.as_str(), target.replace('.', "_"))
            }
            (None, _) => function.as_str().to_string(),
        };

        Ok(AggregationStage {
            group_by: group_by.map(str::to_string),
            function,
            target: target.map(str::to_string),
            alias,
            filter: None,
        })
    }

    pub fn with_filter(mut self, filter: Query) -> Self {
        self.filter = Some(filter);
        self
    }

    /// `{"group": {"field", "function", "target", "alias", "match"}}`
    pub fn from_json(stage_json: &Value) -> Result<Self> {
        let spec = match stage_json.get("group") {
            Some(Value::Object(spec)) => spec,
            _ => {
                return Err(DocLiteError::Plan(
                    "Each stage must be a {\"group\": {...}} mapping".to_string(),
                ))
            }
        };

        let function = text(spec, "function")?
            .ok_or_else(|| DocLiteError::Plan("group.function is required".to_string()))?;
        let stage = Self::new(
            text(spec, "field")?,
            AggregateFunction::parse(function)?,
            text(spec, "target")?,
            text(spec, "alias")?,
        )?;

        match spec.get("match") {
            None | Some(Value::Null) => Ok(stage),
            Some(filter) => Ok(stage.with_filter(Query::from_json(filter)?)),
        }
    }

    /// Stream every matching document of `collection` through the accumulators.
    pub fn execute(
        &self,
        conn: &Connection,
        collection: &str,
        indexes: &[IndexDefinition],
        batch_size: usize,
    ) -> Result<Vec<Value>> {
        let conditions = self.filter.as_ref().map(|q| q.conditions.as_slice()).unwrap_or(&[]);
        let plan = QueryPlanner::plan(conditions, indexes);
        let spec = SelectSpec {
            collection,
            plan: &plan,
            sort: &[],
            limit: None,
            skip: None,
            projection: Projection::Documents,
        };

        let mut grouper = Grouper::new(self);
        let scanned = executor::find_batches(conn, &spec, batch_size, |batch| {
            for doc in &batch {
                grouper.feed(doc);
            }
            Ok(())
        })?;

        let rows = grouper.finish();
        debug!(
            "Aggregated {} documents of {} into {} groups ({})",
            scanned,
            collection,
            rows.len(),
            self.alias
        );
        Ok(rows)
    }
}

fn text<'a>(spec: &'a Map<String, Value>, key: &str) -> Result<Option<&'a str>> {
    match spec.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(DocLiteError::Plan(format!("group.{} must be a string", key))),
    }
}

/// Aggregation pipeline: stages run independently, results concatenated in stage order.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<AggregationStage>,
}

impl Pipeline {
    pub fn new(stages: Vec<AggregationStage>) -> Self {
        Pipeline { stages }
    }

    /// Create pipeline from JSON array
    pub fn from_json(pipeline_json: &Value) -> Result<Self> {
        let Value::Array(stages_array) = pipeline_json else {
            return Err(DocLiteError::Plan("Pipeline must be an array".to_string()));
        };
        if stages_array.is_empty() {
            return Err(DocLiteError::Plan("Pipeline cannot be empty".to_string()));
        }

        let stages = stages_array
            .iter()
            .map(AggregationStage::from_json)
            .collect::<Result<Vec<_>>>()?;
        Ok(Pipeline { stages })
    }

    pub fn stages(&self) -> &[AggregationStage] {
        &self.stages
    }

    pub fn execute(
        &self,
        conn: &Connection,
        collection: &str,
        indexes: &[IndexDefinition],
        batch_size: usize,
    ) -> Result<Vec<Value>> {
        let mut results = Vec::new();
        for stage in &self.stages {
            results.extend(stage.execute(conn, collection, indexes, batch_size)?);
        }
        Ok(results)
    }
}

#[derive(Debug, Default)]
struct Accumulator {
    /// Bucket size
    docs: u64,
    /// Numeric target values seen
    included: u64,
    /// Exact integer sum while every value is an in-range integer
    int_sum: Option<i64>,
    float_sum: f64,
    min: Option<(f64, Number)>,
    max: Option<(f64, Number)>,
}

impl Accumulator {
    fn new() -> Self {
        Accumulator {
            int_sum: Some(0),
            ..Self::default()
        }
    }

    fn add(&mut self, value: Option<&Value>) {
        self.docs += 1;
        let Some(Value::Number(n)) = value else {
            return;
        };
        let Some(f) = n.as_f64() else {
            return;
        };

        self.included += 1;
        self.float_sum += f;
        self.int_sum = match (self.int_sum, n.as_i64()) {
            (Some(sum), Some(i)) => sum.checked_add(i),
            _ => None,
        };
        if self.min.as_ref().map_or(true, |(m, _)| f < *m) {
            self.min = Some((f, n.clone()));
        }
        if self.max.as_ref().map_or(true, |(m, _)| f > *m) {
            self.max = Some((f, n.clone()));
        }
    }

    /// `None` when the bucket has no numeric values to aggregate
    fn result(&self, function: AggregateFunction) -> Option<Value> {
        if function == AggregateFunction::Count {
            return Some(Value::from(self.docs));
        }
        if self.included == 0 {
            return None;
        }
        match function {
            AggregateFunction::Count => None,
            AggregateFunction::Sum => Some(match self.int_sum {
                Some(sum) => Value::from(sum),
                None => float_value(self.float_sum),
            }),
            AggregateFunction::Avg => Some(float_value(self.float_sum / self.included as f64)),
            AggregateFunction::Min => self.min.as_ref().map(|(_, n)| Value::Number(n.clone())),
            AggregateFunction::Max => self.max.as_ref().map(|(_, n)| Value::Number(n.clone())),
        }
    }
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

struct Bucket {
    key: Value,
    acc: Accumulator,
}

/// Streaming group-by: buckets keep first-seen order.
struct Grouper<'s> {
    stage: &'s AggregationStage,
    buckets: Vec<Bucket>,
    positions: AHashMap<String, usize>,
}

impl<'s> Grouper<'s> {
    fn new(stage: &'s AggregationStage) -> Self {
        Grouper {
            stage,
            buckets: Vec::new(),
            positions: AHashMap::new(),
        }
    }

    fn feed(&mut self, doc: &Value) {
        let key = match &self.stage.group_by {
            Some(field) => lookup(doc, field).cloned().unwrap_or(Value::Null),
            None => Value::Null,
        };
        // Canonical JSON text keeps 1 and "1" in different buckets
        let canonical = key.to_string();

        let position = match self.positions.get(&canonical) {
            Some(&position) => position,
            None => {
                self.buckets.push(Bucket {
                    key,
                    acc: Accumulator::new(),
                });
                self.positions.insert(canonical, self.buckets.len() - 1);
                self.buckets.len() - 1
            }
        };

        let target = self.stage.target.as_deref().and_then(|t| lookup(doc, t));
        self.buckets[position].acc.add(target);
    }

    fn finish(self) -> Vec<Value> {
        let stage = self.stage;

        if self.buckets.is_empty() && stage.group_by.is_none() && stage.function == AggregateFunction::Count {
            let mut row = Map::new();
            row.insert(stage.alias.clone(), Value::from(0));
            return vec![Value::Object(row)];
        }

        self.buckets
            .into_iter()
            .filter_map(|bucket| {
                let value = bucket.acc.result(stage.function)?;
                let mut row = Map::new();
                if let Some(field) = &stage.group_by {
                    row.insert(field.clone(), bucket.key);
                }
                row.insert(stage.alias.clone(), value);
                Some(Value::Object(row))
            })
            .collect()
    }
}

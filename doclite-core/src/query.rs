// src/query.rs
// Predicate model: conditions, queries and the dictionary query form

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{DocLiteError, Result};
use crate::path::{validate_field_path, WILDCARD_FIELD};

/// Comparison operators supported by a single condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryOperator {
    Eq,       // $eq
    Ne,       // $ne
    Gt,       // $gt
    Gte,      // $gte
    Lt,       // $lt
    Lte,      // $lte
    In,       // $in
    Contains, // $contains
}

impl QueryOperator {
    /// Parse an operator token; the leading `$` is optional.
    pub fn from_token(token: &str) -> Result<Self> {
        match token.trim_start_matches('$') {
            "eq" => Ok(QueryOperator::Eq),
            "ne" => Ok(QueryOperator::Ne),
            "gt" => Ok(QueryOperator::Gt),
            "gte" => Ok(QueryOperator::Gte),
            "lt" => Ok(QueryOperator::Lt),
            "lte" => Ok(QueryOperator::Lte),
            "in" => Ok(QueryOperator::In),
            "contains" => Ok(QueryOperator::Contains),
            _ => Err(DocLiteError::Plan(format!("Unknown operator: {}", token))),
        }
    }

    pub fn token(&self) -> &'static str {
        match self {
            QueryOperator::Eq => "$eq",
            QueryOperator::Ne => "$ne",
            QueryOperator::Gt => "$gt",
            QueryOperator::Gte => "$gte",
            QueryOperator::Lt => "$lt",
            QueryOperator::Lte => "$lte",
            QueryOperator::In => "$in",
            QueryOperator::Contains => "$contains",
        }
    }

    pub fn is_range(&self) -> bool {
        matches!(
            self,
            QueryOperator::Gt | QueryOperator::Gte | QueryOperator::Lt | QueryOperator::Lte
        )
    }

    /// Operators an ordered index can serve
    pub fn is_index_friendly(&self) -> bool {
        matches!(self, QueryOperator::Eq | QueryOperator::In) || self.is_range()
    }
}

/// One `(field, operator, value)` predicate term
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub op: QueryOperator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, op: QueryOperator, value: Value) -> Result<Self> {
        let field = field.into();
        validate_field_path(&field)?;

        match (op, &value) {
            (QueryOperator::In, Value::Array(_)) => {}
            (QueryOperator::In, _) => {
                return Err(DocLiteError::Plan(format!("$in on '{}' requires an array", field)))
            }
            (QueryOperator::Eq | QueryOperator::Ne, Value::Null) => {}
            (_, Value::Null) => {
                return Err(DocLiteError::Plan(format!(
                    "{} on '{}' cannot compare against null",
                    op.token(),
                    field
                )))
            }
            _ => {}
        }

        Ok(Condition { field, op, value })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn parse(direction: &str) -> Result<Self> {
        match direction.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortDirection::Ascending),
            "desc" => Ok(SortDirection::Descending),
            _ => Err(DocLiteError::Plan("Sort direction must be 'asc' or 'desc'".into())),
        }
    }

    pub fn as_sql(&self) -> &'static str {
        match self {
            SortDirection::Ascending => "ASC",
            SortDirection::Descending => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortSpec {
    pub field: String,
    pub direction: SortDirection,
}

/// Conjunctive query over one collection
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub collection: Option<String>,
    pub conditions: Vec<Condition>,
    pub sort: Vec<SortSpec>,
    pub limit: Option<usize>,
    pub skip: Option<usize>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_collection(collection: &str) -> Self {
        Query {
            collection: Some(collection.to_string()),
            ..Self::default()
        }
    }

    /// Append a condition (AND)
    pub fn where_field(mut self, field: &str, op: QueryOperator, value: impl Into<Value>) -> Result<Self> {
        self.conditions.push(Condition::new(field, op, value.into())?);
        Ok(self)
    }

    /// Append a sort key; later keys break ties of earlier ones.
    pub fn sort(mut self, field: &str, ascending: bool) -> Result<Self> {
        validate_field_path(field)?;
        self.sort.push(SortSpec {
            field: field.to_string(),
            direction: if ascending {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            },
        });
        Ok(self)
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Parse the dictionary form (`{field: value}` / `{field: {"$op": value}}`).
    ///
    /// A lone `{"*": {"$contains": term}}` becomes a whole-document search.
    pub fn parse_filter(json: &Value) -> Result<Filter> {
        let map = match json {
            Value::Object(map) => map,
            Value::Null => return Ok(Filter::Conditions(Query::new())),
            _ => return Err(DocLiteError::Plan("query must be a mapping".into())),
        };

        if let Some(term) = Self::full_text_term(map)? {
            return Ok(Filter::FullText(term));
        }

        let mut query = Query::new();
        for (field, condition) in map {
            query.conditions.extend(Self::parse_field(field, condition)?);
        }
        Ok(Filter::Conditions(query))
    }

    /// Parse the dictionary form, rejecting the whole-document search form.
    pub fn from_json(json: &Value) -> Result<Self> {
        match Self::parse_filter(json)? {
            Filter::Conditions(query) => Ok(query),
            Filter::FullText(_) => Err(DocLiteError::Plan(
                "whole-document search cannot be combined with query options".into(),
            )),
        }
    }

    fn full_text_term(map: &Map<String, Value>) -> Result<Option<String>> {
        let Some(spec) = map.get(WILDCARD_FIELD) else {
            return Ok(None);
        };

        match spec {
            Value::Object(ops) if map.len() == 1 && ops.len() == 1 => match ops.get("$contains") {
                Some(Value::String(term)) => Ok(Some(term.clone())),
                Some(Value::Null) | None => Err(DocLiteError::Plan(
                    "'*' requires a non-null $contains term".into(),
                )),
                Some(other) => Ok(Some(other.to_string())),
            },
            _ => Err(DocLiteError::Plan(
                "'*' is only supported alone with a single $contains operator".into(),
            )),
        }
    }

    fn parse_field(field: &str, condition: &Value) -> Result<Vec<Condition>> {
        let Value::Object(ops) = condition else {
            return Ok(vec![Condition::new(field, QueryOperator::Eq, condition.clone())?]);
        };

        let operator_keys = ops.keys().filter(|k| k.starts_with('$')).count();
        if operator_keys == 0 {
            // Literal sub-document equality
            return Ok(vec![Condition::new(field, QueryOperator::Eq, condition.clone())?]);
        }
        if operator_keys != ops.len() {
            return Err(DocLiteError::Plan(format!(
                "cannot mix operators and literal keys under '{}'",
                field
            )));
        }

        ops.iter()
            .map(|(token, value)| Condition::new(field, QueryOperator::from_token(token)?, value.clone()))
            .collect()
    }

    /// Dictionary form of the conditions, one `{"$op": value}` mapping per field
    pub fn to_json(&self) -> Value {
        let mut out = Map::new();
        for cond in &self.conditions {
            let entry = out
                .entry(cond.field.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if let Value::Object(ops) = entry {
                ops.insert(cond.op.token().to_string(), cond.value.clone());
            }
        }
        Value::Object(out)
    }
}

/// A parsed filter: either conjunctive conditions or a whole-document substring search
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Conditions(Query),
    FullText(String),
}

/// Anything a collection can be queried with
pub trait IntoFilter {
    fn into_filter(self) -> Result<Filter>;
}

impl IntoFilter for Filter {
    fn into_filter(self) -> Result<Filter> {
        Ok(self)
    }
}

impl IntoFilter for Query {
    fn into_filter(self) -> Result<Filter> {
        Ok(Filter::Conditions(self))
    }
}

impl IntoFilter for &Value {
    fn into_filter(self) -> Result<Filter> {
        Query::parse_filter(self)
    }
}

impl IntoFilter for Value {
    fn into_filter(self) -> Result<Filter> {
        Query::parse_filter(&self)
    }
}

/// Case-insensitive substring search over every scalar in a document.
///
/// Strings compare literally, numbers by their string form, mappings and sequences
/// are traversed. Booleans and nulls never match.
pub fn value_contains_text(value: &Value, term_lower: &str) -> bool {
    match value {
        Value::String(s) => s.to_lowercase().contains(term_lower),
        Value::Number(n) => n.to_string().to_lowercase().contains(term_lower),
        Value::Object(map) => map.values().any(|v| value_contains_text(v, term_lower)),
        Value::Array(items) => items.iter().any(|v| value_contains_text(v, term_lower)),
        Value::Bool(b) => b.to_string().contains(term_lower),
        Value::Null => false,
    }
}

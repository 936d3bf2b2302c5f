// src/find_options.rs
// Find query options: sort, limit, skip

use std::cmp::Ordering;

use serde_json::Value;

use crate::error::Result;
use crate::path::{lookup, validate_field_path};
use crate::query::{Query, SortDirection, SortSpec};

/// Options for find queries
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    /// Sort keys; later keys break ties of earlier ones
    pub sort: Vec<SortSpec>,

    /// Limit: maximum number of documents to return
    pub limit: Option<usize>,

    /// Skip: number of documents to skip (for pagination)
    pub skip: Option<usize>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sort(mut self, field: &str, direction: SortDirection) -> Result<Self> {
        validate_field_path(field)?;
        self.sort.push(SortSpec {
            field: field.to_string(),
            direction,
        });
        Ok(self)
    }

    /// Parse `"asc"` / `"desc"`
    pub fn with_sort_str(self, field: &str, direction: &str) -> Result<Self> {
        let direction = SortDirection::parse(direction)?;
        self.with_sort(field, direction)
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Copy these options onto a query
    pub fn apply_to(&self, mut query: Query) -> Query {
        query.sort.extend(self.sort.iter().cloned());
        if self.limit.is_some() {
            query.limit = self.limit;
        }
        if self.skip.is_some() {
            query.skip = self.skip;
        }
        query
    }
}

/// Sort documents in memory (used where the engine cannot order the results).
pub fn apply_sort(docs: &mut [Value], sort: &[SortSpec]) {
    if sort.is_empty() {
        return;
    }

    docs.sort_by(|a, b| {
        for spec in sort {
            let cmp = compare_values(lookup(a, &spec.field), lookup(b, &spec.field));
            if cmp != Ordering::Equal {
                return match spec.direction {
                    SortDirection::Ascending => cmp,
                    SortDirection::Descending => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    });
}

/// Compare two JSON values for sorting
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less, // missing sorts first
        (Some(_), None) => Ordering::Greater,

        (Some(Value::Number(n1)), Some(Value::Number(n2))) => {
            let f1 = n1.as_f64().unwrap_or(0.0);
            let f2 = n2.as_f64().unwrap_or(0.0);
            f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
        }

        (Some(Value::String(s1)), Some(Value::String(s2))) => s1.cmp(s2),

        (Some(Value::Bool(b1)), Some(Value::Bool(b2))) => b1.cmp(b2),

        // Type priority: null < bool < number < string < object < array
        (Some(a_val), Some(b_val)) => type_priority(a_val).cmp(&type_priority(b_val)),
    }
}

/// Get type priority for mixed-type sorting
fn type_priority(val: &Value) -> u8 {
    match val {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Object(_) => 4,
        Value::Array(_) => 5,
    }
}

/// Apply limit and skip to documents
pub fn apply_limit_skip(docs: Vec<Value>, limit: Option<usize>, skip: Option<usize>) -> Vec<Value> {
    let skip_count = skip.unwrap_or(0);
    let iter = docs.into_iter().skip(skip_count);
    match limit {
        Some(limit_count) => iter.take(limit_count).collect(),
        None => iter.collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sort(fields: &[(&str, SortDirection)]) -> Vec<SortSpec> {
        fields
            .iter()
            .map(|(f, d)| SortSpec {
                field: f.to_string(),
                direction: *d,
            })
            .collect()
    }

    #[test]
    fn test_sort_single_field() {
        let mut docs = vec![json!({"age": 30}), json!({"age": 25}), json!({"age": 35})];

        apply_sort(&mut docs, &sort(&[("age", SortDirection::Ascending)]));

        assert_eq!(docs[0]["age"], 25);
        assert_eq!(docs[1]["age"], 30);
        assert_eq!(docs[2]["age"], 35);
    }

    #[test]
    fn test_sort_descending_nested() {
        let mut docs = vec![
            json!({"p": {"age": 30}}),
            json!({"p": {"age": 25}}),
            json!({"p": {"age": 35}}),
        ];

        apply_sort(&mut docs, &sort(&[("p.age", SortDirection::Descending)]));

        assert_eq!(docs[0]["p"]["age"], 35);
        assert_eq!(docs[2]["p"]["age"], 25);
    }

    #[test]
    fn test_sort_multi_field() {
        let mut docs = vec![
            json!({"age": 30, "name": "Bob"}),
            json!({"age": 25, "name": "Alice"}),
            json!({"age": 30, "name": "Carol"}),
        ];

        apply_sort(
            &mut docs,
            &sort(&[("age", SortDirection::Ascending), ("name", SortDirection::Descending)]),
        );

        assert_eq!(docs[0]["name"], "Alice"); // age=25
        assert_eq!(docs[1]["name"], "Carol"); // age=30, name=C
        assert_eq!(docs[2]["name"], "Bob"); // age=30, name=B
    }

    #[test]
    fn test_missing_field_sorts_first() {
        let mut docs = vec![json!({"age": 1}), json!({"name": "x"})];
        apply_sort(&mut docs, &sort(&[("age", SortDirection::Ascending)]));
        assert_eq!(docs[0], json!({"name": "x"}));
    }

    #[test]
    fn test_limit_skip() {
        let docs: Vec<Value> = (1..=5).map(|n| json!({"n": n})).collect();

        let result = apply_limit_skip(docs.clone(), Some(2), Some(1));
        assert_eq!(result, vec![json!({"n": 2}), json!({"n": 3})]);

        assert_eq!(apply_limit_skip(docs.clone(), None, Some(2)).len(), 3);
        assert_eq!(apply_limit_skip(docs.clone(), Some(3), None).len(), 3);
        assert!(apply_limit_skip(docs, None, Some(10)).is_empty());
    }

    #[test]
    fn test_options_apply_to_query() {
        let options = FindOptions::new()
            .with_sort_str("age", "desc")
            .unwrap()
            .with_limit(5)
            .with_skip(2);
        let query = options.apply_to(Query::new());
        assert_eq!(query.sort[0].direction, SortDirection::Descending);
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.skip, Some(2));

        assert!(FindOptions::new().with_sort_str("age", "up").is_err());
    }
}

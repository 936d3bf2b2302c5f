// src/query_builder.rs
// Fluent predicate builder - resolves to the same conditions as the dictionary form

use std::ops::BitAnd;

use serde_json::Value;

use crate::error::Result;
use crate::query::{Condition, Filter, IntoFilter, Query, QueryOperator};

/// Start an expression on a (possibly dotted) field path.
///
/// ```ignore
/// let expr = field("age").gt(25) & field("profile").child("city").eq("New York");
/// ```
pub fn field(path: &str) -> Field {
    Field { path: path.to_string() }
}

/// A field reference waiting for a comparison
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    path: String,
}

impl Field {
    /// Nested field: `field("profile").child("location")` is `profile.location`
    pub fn child(&self, name: &str) -> Field {
        Field {
            path: format!("{}.{}", self.path, name),
        }
    }

    /// Array element at a position
    pub fn at(&self, position: usize) -> Field {
        self.child(&position.to_string())
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    fn term(&self, op: QueryOperator, value: Value) -> Expr {
        Expr {
            terms: vec![(self.path.clone(), op, value)],
        }
    }

    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Eq, value.into())
    }

    pub fn ne(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Ne, value.into())
    }

    pub fn gt(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Gt, value.into())
    }

    pub fn gte(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Gte, value.into())
    }

    pub fn lt(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Lt, value.into())
    }

    pub fn lte(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Lte, value.into())
    }

    pub fn is_in<I, V>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.term(QueryOperator::In, Value::Array(values))
    }

    pub fn contains(&self, value: impl Into<Value>) -> Expr {
        self.term(QueryOperator::Contains, value.into())
    }

    /// Present and explicitly null
    pub fn is_null(&self) -> Expr {
        self.term(QueryOperator::Eq, Value::Null)
    }
}

/// Conjunction of builder terms. Validation happens when the expression is turned
/// into a query.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    terms: Vec<(String, QueryOperator, Value)>,
}

impl Expr {
    pub fn and(mut self, other: Expr) -> Expr {
        self.terms.extend(other.terms);
        self
    }

    pub fn into_query(self) -> Result<Query> {
        let mut query = Query::new();
        for (path, op, value) in self.terms {
            query.conditions.push(Condition::new(path, op, value)?);
        }
        Ok(query)
    }
}

impl BitAnd for Expr {
    type Output = Expr;

    fn bitand(self, rhs: Expr) -> Expr {
        self.and(rhs)
    }
}

impl IntoFilter for Expr {
    fn into_filter(self) -> Result<Filter> {
        Ok(Filter::Conditions(self.into_query()?))
    }
}

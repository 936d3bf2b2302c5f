// src/executor.rs
// Compiles planned conditions to parameter-bound SQL and streams result rows

use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, Statement};
use serde_json::Value;
use tracing::{trace, warn};

use crate::error::{DocLiteError, Result};
use crate::index::IndexManager;
use crate::path::{extract_expr, json_path, ID_FIELD};
use crate::query::{value_contains_text, Condition, Filter, QueryOperator, SortSpec};
use crate::query_planner::{QueryPlan, QueryPlanner};
use crate::storage::{json_to_sql, quote_ident};

/// SQL text plus its bound parameters
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// What a compiled statement selects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Projection {
    /// `data` column: full payloads
    Documents,
    /// `id` column only
    Ids,
    /// `COUNT(*)`; ordering, limit and skip are ignored
    Count,
}

/// Everything needed to compile one read
#[derive(Debug, Clone)]
pub struct SelectSpec<'a> {
    pub collection: &'a str,
    pub plan: &'a QueryPlan,
    pub sort: &'a [SortSpec],
    /// `None` means unbounded
    pub limit: Option<usize>,
    pub skip: Option<usize>,
    pub projection: Projection,
}

fn field_expr(field: &str) -> String {
    if field == ID_FIELD {
        "id".to_string()
    } else {
        extract_expr(field)
    }
}

fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out.push('%');
    out
}

fn contains_term(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// One predicate term. Field paths were validated when the condition was built.
pub fn compile_condition(cond: &Condition, params: &mut Vec<SqlValue>) -> String {
    let expr = field_expr(&cond.field);

    if cond.value.is_null() {
        if cond.field == ID_FIELD {
            // Identifiers are never null
            return if cond.op == QueryOperator::Eq { "0".into() } else { "1".into() };
        }
        let path = json_path(&cond.field, true);
        return match cond.op {
            QueryOperator::Eq => format!("({} IS NULL AND json_type(data, '{}') IS NOT NULL)", expr, path),
            _ => format!(
                "(json_type(data, '{path}') IS NOT NULL AND json_type(data, '{path}') != 'null')",
                path = path
            ),
        };
    }

    let symbol = match cond.op {
        QueryOperator::In => {
            let items = match &cond.value {
                Value::Array(items) => items.as_slice(),
                other => std::slice::from_ref(other),
            };
            if items.is_empty() {
                return "0".into();
            }
            let placeholders = vec!["?"; items.len()].join(", ");
            params.extend(items.iter().map(json_to_sql));
            return format!("{} IN ({})", expr, placeholders);
        }
        QueryOperator::Contains => {
            params.push(SqlValue::Text(escape_like(&contains_term(&cond.value))));
            return format!("{} LIKE ? ESCAPE '\\'", expr);
        }
        QueryOperator::Eq => "=",
        QueryOperator::Ne => "!=",
        QueryOperator::Gt => ">",
        QueryOperator::Gte => ">=",
        QueryOperator::Lt => "<",
        QueryOperator::Lte => "<=",
    };
    params.push(json_to_sql(&cond.value));
    format!("{} {} ?", expr, symbol)
}

/// `WHERE` body: the collection literal first so partial indexes qualify, then the terms.
pub fn compile_where(collection: &str, conditions: &[Condition], params: &mut Vec<SqlValue>) -> String {
    let mut terms = vec![format!("collection = '{}'", collection.replace('\'', "''"))];
    terms.extend(conditions.iter().map(|c| compile_condition(c, params)));
    terms.join(" AND ")
}

pub fn compile_select(spec: &SelectSpec<'_>, with_hint: bool) -> CompiledQuery {
    let mut params = Vec::new();
    let columns = match spec.projection {
        Projection::Documents => "data",
        Projection::Ids => "id",
        Projection::Count => "COUNT(*)",
    };
    let hint = match (with_hint, spec.plan.driving_index()) {
        (true, Some(index)) => format!(" INDEXED BY {}", quote_ident(index)),
        _ => String::new(),
    };

    let mut sql = format!(
        "SELECT {} FROM documents{} WHERE {}",
        columns,
        hint,
        compile_where(spec.collection, &spec.plan.conditions, &mut params)
    );

    if spec.projection != Projection::Count {
        let mut order: Vec<String> = spec
            .sort
            .iter()
            .map(|s| format!("{} {}", field_expr(&s.field), s.direction.as_sql()))
            .collect();
        order.push("documents.rowid ASC".into());
        sql.push_str(" ORDER BY ");
        sql.push_str(&order.join(", "));

        if spec.limit.is_some() || spec.skip.is_some() {
            let limit = spec.limit.map(|l| l as i64).unwrap_or(-1);
            sql.push_str(&format!(" LIMIT {} OFFSET {}", limit, spec.skip.unwrap_or(0)));
        }
    }

    CompiledQuery { sql, params }
}

/// Prepare with the index hint; if the engine cannot honour it, retry once without.
fn prepare<'c>(conn: &'c Connection, spec: &SelectSpec<'_>) -> Result<(Statement<'c>, CompiledQuery)> {
    let compiled = compile_select(spec, true);
    match conn.prepare(&compiled.sql) {
        Ok(stmt) => Ok((stmt, compiled)),
        Err(e) => {
            let err = DocLiteError::from(e);
            if spec.plan.driving_index().is_none() || !err.is_index_hint_failure() {
                return Err(err);
            }
            warn!("Index hint rejected ({}), retrying without it", err);
            let compiled = compile_select(spec, false);
            let stmt = conn.prepare(&compiled.sql)?;
            Ok((stmt, compiled))
        }
    }
}

/// Stream matching payloads to `visitor` in batches of at most `batch_size`.
/// Returns the number of rows delivered.
pub fn find_batches<F>(conn: &Connection, spec: &SelectSpec<'_>, batch_size: usize, mut visitor: F) -> Result<usize>
where
    F: FnMut(Vec<Value>) -> Result<()>,
{
    let (mut stmt, compiled) = prepare(conn, spec)?;
    trace!("Executing: {}", compiled.sql);

    let batch_size = batch_size.max(1);
    let mut rows = stmt.query(params_from_iter(compiled.params.iter()))?;
    let mut batch = Vec::with_capacity(batch_size);
    let mut total = 0;

    while let Some(row) = rows.next()? {
        let data: String = row.get(0)?;
        batch.push(serde_json::from_str(&data)?);
        if batch.len() == batch_size {
            total += batch.len();
            visitor(std::mem::replace(&mut batch, Vec::with_capacity(batch_size)))?;
        }
    }
    if !batch.is_empty() {
        total += batch.len();
        visitor(batch)?;
    }
    Ok(total)
}

/// All matching payloads, batches concatenated in order
pub fn find(conn: &Connection, spec: &SelectSpec<'_>, batch_size: usize) -> Result<Vec<Value>> {
    let mut out = Vec::new();
    find_batches(conn, spec, batch_size, |batch| {
        out.extend(batch);
        Ok(())
    })?;
    Ok(out)
}

/// Identifiers of matching documents
pub fn find_ids(conn: &Connection, spec: &SelectSpec<'_>) -> Result<Vec<String>> {
    let spec = SelectSpec {
        projection: Projection::Ids,
        ..spec.clone()
    };
    let (mut stmt, compiled) = prepare(conn, &spec)?;
    let ids = stmt
        .query_map(params_from_iter(compiled.params.iter()), |row| row.get::<_, String>(0))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ids)
}

pub fn count(conn: &Connection, collection: &str, plan: &QueryPlan) -> Result<u64> {
    let spec = SelectSpec {
        collection,
        plan,
        sort: &[],
        limit: None,
        skip: None,
        projection: Projection::Count,
    };
    let (mut stmt, compiled) = prepare(conn, &spec)?;
    let count: i64 = stmt.query_row(params_from_iter(compiled.params.iter()), |row| row.get(0))?;
    Ok(count as u64)
}

/// Stream the documents selected by a parsed filter.
///
/// Condition queries are planned against the collection's indexes; `default_limit` caps
/// queries without an explicit limit. Whole-document searches scan the collection and
/// keep the documents whose scalars contain the term.
pub fn find_filter<F>(
    conn: &Connection,
    collection: &str,
    filter: &Filter,
    default_limit: Option<usize>,
    batch_size: usize,
    mut visitor: F,
) -> Result<usize>
where
    F: FnMut(Vec<Value>) -> Result<()>,
{
    match filter {
        Filter::Conditions(query) => {
            let indexes = IndexManager::list_indexes(conn, Some(collection))?;
            let plan = QueryPlanner::plan(&query.conditions, &indexes);
            let spec = SelectSpec {
                collection,
                plan: &plan,
                sort: &query.sort,
                limit: query.limit.or(default_limit),
                skip: query.skip,
                projection: Projection::Documents,
            };
            find_batches(conn, &spec, batch_size, visitor)
        }
        Filter::FullText(term) => {
            let term = term.to_lowercase();
            let plan = QueryPlanner::plan(&[], &[]);
            let spec = SelectSpec {
                collection,
                plan: &plan,
                sort: &[],
                limit: None,
                skip: None,
                projection: Projection::Documents,
            };

            let mut remaining = default_limit.unwrap_or(usize::MAX);
            let mut delivered = 0;
            find_batches(conn, &spec, batch_size, |batch| {
                if remaining == 0 {
                    return Ok(());
                }
                let mut hits: Vec<Value> = batch
                    .into_iter()
                    .filter(|doc| value_contains_text(doc, &term))
                    .collect();
                hits.truncate(remaining);
                remaining -= hits.len();
                delivered += hits.len();
                if hits.is_empty() {
                    return Ok(());
                }
                visitor(hits)
            })?;
            Ok(delivered)
        }
    }
}

/// The engine's own `EXPLAIN QUERY PLAN` detail lines plus the SQL that was explained
pub fn explain_rows(conn: &Connection, spec: &SelectSpec<'_>) -> Result<(String, Vec<String>)> {
    let (_, compiled) = prepare(conn, spec)?;
    let mut stmt = conn.prepare(&format!("EXPLAIN QUERY PLAN {}", compiled.sql))?;
    let details = stmt
        .query_map(params_from_iter(compiled.params.iter()), |row| row.get::<_, String>(3))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok((compiled.sql, details))
}

// src/query_planner.rs
// Query planner - condition ordering and driving index selection

use serde_json::{json, Value};
use tracing::debug;

use crate::index::IndexDefinition;
use crate::path::{has_array_position, ID_FIELD};
use crate::query::{Condition, QueryOperator};

/// How the engine is expected to reach the rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessPath {
    /// Full scan of the collection partition
    CollectionScan,

    /// Direct identifier lookup (`_id` equality or membership)
    PrimaryKey,

    /// Equality/membership on the driving index
    IndexScan {
        index_name: String,
        fields: Vec<String>,
    },

    /// Range on the leading field of the driving index
    IndexRangeScan {
        index_name: String,
        field: String,
    },
}

/// Query plan - ordered conditions plus the access path they were ordered for.
///
/// The ordering is advisory: it never changes which documents match.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryPlan {
    pub conditions: Vec<Condition>,
    pub access: AccessPath,
}

impl QueryPlan {
    /// Index to hint to the engine, if any
    pub fn driving_index(&self) -> Option<&str> {
        match &self.access {
            AccessPath::IndexScan { index_name, .. } | AccessPath::IndexRangeScan { index_name, .. } => {
                Some(index_name)
            }
            AccessPath::CollectionScan | AccessPath::PrimaryKey => None,
        }
    }
}

/// Query planner - analyzes conditions against the declared indexes of a collection
pub struct QueryPlanner;

impl QueryPlanner {
    /// Order `conditions` for the declared `indexes` (given in storage order).
    pub fn plan(conditions: &[Condition], indexes: &[IndexDefinition]) -> QueryPlan {
        if conditions.iter().any(Self::is_primary_key_lookup) {
            return QueryPlan {
                conditions: Self::reorder(conditions, indexes, None),
                access: AccessPath::PrimaryKey,
            };
        }

        let driver = indexes.iter().find(|index| Self::can_drive(index, conditions));
        let plan = match driver {
            Some(index) => {
                let ordered = Self::reorder(conditions, indexes, Some(index));
                let leading = index.leading_field();
                let equality_on_leading = conditions
                    .iter()
                    .any(|c| c.field == leading && matches!(c.op, QueryOperator::Eq | QueryOperator::In));

                let access = if equality_on_leading {
                    AccessPath::IndexScan {
                        index_name: index.name.clone(),
                        fields: index
                            .fields
                            .iter()
                            .filter(|f| conditions.iter().any(|c| &c.field == *f))
                            .cloned()
                            .collect(),
                    }
                } else {
                    AccessPath::IndexRangeScan {
                        index_name: index.name.clone(),
                        field: leading.to_string(),
                    }
                };
                QueryPlan {
                    conditions: ordered,
                    access,
                }
            }
            None => QueryPlan {
                conditions: Self::reorder(conditions, indexes, None),
                access: AccessPath::CollectionScan,
            },
        };

        debug!("Planned {} conditions: {:?}", plan.conditions.len(), plan.access);
        plan
    }

    fn is_primary_key_lookup(condition: &Condition) -> bool {
        condition.field == ID_FIELD && matches!(condition.op, QueryOperator::Eq | QueryOperator::In)
    }

    /// Whether a condition may use an index at `position` in its field list.
    /// Equality/membership works anywhere, ranges only on the leading field.
    fn usable_at(condition: &Condition, position: usize) -> bool {
        match condition.op {
            QueryOperator::Eq | QueryOperator::In => true,
            op if op.is_range() => position == 0,
            _ => false,
        }
    }

    /// First-in-storage-order rule: the leading field must carry an index-friendly condition.
    /// Indexes over array positions are skipped; their expressions never match query expressions.
    fn can_drive(index: &IndexDefinition, conditions: &[Condition]) -> bool {
        if index.fields.is_empty() || index.fields.iter().any(|f| has_array_position(f)) {
            return false;
        }
        let leading = index.leading_field();
        conditions.iter().any(|c| c.field == leading && Self::usable_at(c, 0))
    }

    fn reorder(
        conditions: &[Condition],
        indexes: &[IndexDefinition],
        driver: Option<&IndexDefinition>,
    ) -> Vec<Condition> {
        if indexes.is_empty() {
            return conditions.to_vec();
        }

        let mut placed = vec![false; conditions.len()];
        let mut ordered = Vec::with_capacity(conditions.len());

        // Driver's usable terms first, in index field order
        if let Some(driver) = driver {
            for (position, field) in driver.fields.iter().enumerate() {
                for (i, cond) in conditions.iter().enumerate() {
                    if !placed[i] && &cond.field == field && Self::usable_at(cond, position) {
                        placed[i] = true;
                        ordered.push(cond.clone());
                    }
                }
            }
        }

        // Then every index's fields, storage order
        for index in indexes {
            for field in &index.fields {
                for (i, cond) in conditions.iter().enumerate() {
                    if !placed[i] && &cond.field == field {
                        placed[i] = true;
                        ordered.push(cond.clone());
                    }
                }
            }
        }

        for (i, cond) in conditions.iter().enumerate() {
            if !placed[i] {
                ordered.push(cond.clone());
            }
        }
        ordered
    }

    /// Create a query plan description for explain output
    pub fn explain(plan: &QueryPlan, available_indexes: &[IndexDefinition]) -> Value {
        let conditions: Vec<Value> = plan
            .conditions
            .iter()
            .map(|c| json!({"field": c.field, "op": c.op.token(), "value": c.value}))
            .collect();
        let available: Vec<&str> = available_indexes.iter().map(|i| i.name.as_str()).collect();

        match &plan.access {
            AccessPath::IndexScan { index_name, fields } => json!({
                "queryPlan": "IndexScan",
                "indexUsed": index_name,
                "fields": fields,
                "stage": "FETCH_WITH_INDEX",
                "indexType": "equality",
                "conditions": conditions,
            }),
            AccessPath::IndexRangeScan { index_name, field } => json!({
                "queryPlan": "IndexRangeScan",
                "indexUsed": index_name,
                "field": field,
                "stage": "FETCH_WITH_INDEX",
                "indexType": "range",
                "conditions": conditions,
            }),
            AccessPath::PrimaryKey => json!({
                "queryPlan": "PrimaryKey",
                "indexUsed": null,
                "stage": "FETCH_BY_ID",
                "conditions": conditions,
            }),
            AccessPath::CollectionScan => json!({
                "queryPlan": "CollectionScan",
                "indexUsed": null,
                "stage": "FULL_SCAN",
                "reason": "No suitable index found for query",
                "conditions": conditions,
                "availableIndexes": available,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Query;

    fn conditions(query: Value) -> Vec<Condition> {
        Query::from_json(&query).unwrap().conditions
    }

    fn index(fields: &[&str]) -> IndexDefinition {
        IndexDefinition::new("users", fields.iter().map(|s| s.to_string()).collect(), false).unwrap()
    }

    fn fields(plan: &QueryPlan) -> Vec<&str> {
        plan.conditions.iter().map(|c| c.field.as_str()).collect()
    }

    #[test]
    fn test_no_indexes_keeps_order() {
        let conds = conditions(json!({"name": "A", "age": {"$gt": 3}}));
        let plan = QueryPlanner::plan(&conds, &[]);
        assert_eq!(plan.conditions, conds);
        assert_eq!(plan.access, AccessPath::CollectionScan);
        assert_eq!(plan.driving_index(), None);
    }

    #[test]
    fn test_compound_index_moves_fields_forward() {
        let conds = conditions(json!({"status": "x", "city": "NYC", "age": 30}));
        let plan = QueryPlanner::plan(&conds, &[index(&["age", "city"])]);

        assert_eq!(fields(&plan), vec!["age", "city", "status"]);
        assert_eq!(plan.driving_index(), Some("idx_users_age_city"));
        assert!(matches!(plan.access, AccessPath::IndexScan { .. }));
    }

    #[test]
    fn test_range_only_drives_on_leading_field() {
        let conds = conditions(json!({"city": {"$gt": "A"}}));
        let plan = QueryPlanner::plan(&conds, &[index(&["age", "city"])]);
        assert_eq!(plan.access, AccessPath::CollectionScan);

        let conds = conditions(json!({"age": {"$gte": 18}}));
        let plan = QueryPlanner::plan(&conds, &[index(&["age", "city"])]);
        assert_eq!(
            plan.access,
            AccessPath::IndexRangeScan {
                index_name: "idx_users_age_city".into(),
                field: "age".into()
            }
        );
    }

    #[test]
    fn test_not_equal_on_leading_field_is_not_equality() {
        let conds = conditions(json!({"age": {"$ne": 5, "$gt": 3}}));
        let plan = QueryPlanner::plan(&conds, &[index(&["age"])]);
        assert_eq!(
            plan.access,
            AccessPath::IndexRangeScan {
                index_name: "idx_users_age".into(),
                field: "age".into()
            }
        );
    }

    #[test]
    fn test_first_index_in_storage_order_wins() {
        let conds = conditions(json!({"name": "A", "age": 3}));
        let indexes = [index(&["name"]), index(&["age"])];
        let plan = QueryPlanner::plan(&conds, &indexes);
        assert_eq!(plan.driving_index(), Some("idx_users_name"));
        assert_eq!(fields(&plan), vec!["name", "age"]);

        let indexes = [index(&["age"]), index(&["name"])];
        let plan = QueryPlanner::plan(&conds, &indexes);
        assert_eq!(plan.driving_index(), Some("idx_users_age"));
        assert_eq!(fields(&plan), vec!["age", "name"]);
    }

    #[test]
    fn test_contains_never_drives() {
        let conds = conditions(json!({"tags": {"$contains": "x"}}));
        let plan = QueryPlanner::plan(&conds, &[index(&["tags"])]);
        assert_eq!(plan.access, AccessPath::CollectionScan);
    }

    #[test]
    fn test_identifier_lookup_skips_index_hint() {
        let conds = conditions(json!({"age": 3, "_id": "abc"}));
        let plan = QueryPlanner::plan(&conds, &[index(&["age"])]);
        assert_eq!(plan.access, AccessPath::PrimaryKey);
        assert_eq!(fields(&plan), vec!["age", "_id"]);
    }

    #[test]
    fn test_array_position_index_never_drives() {
        let conds = conditions(json!({"tags.0": "a"}));
        let plan = QueryPlanner::plan(&conds, &[index(&["tags.0"])]);
        assert_eq!(plan.access, AccessPath::CollectionScan);
    }

    #[test]
    fn test_planning_preserves_condition_set() {
        let conds = conditions(json!({"a": 1, "b": {"$lt": 2}, "c": {"$in": [1]}, "d": {"$ne": 4}}));
        let plan = QueryPlanner::plan(&conds, &[index(&["c", "b"]), index(&["d"])]);
        assert_eq!(plan.conditions.len(), conds.len());
        for cond in &conds {
            assert!(plan.conditions.contains(cond));
        }
        assert_eq!(fields(&plan), vec!["c", "b", "d", "a"]);
    }

    #[test]
    fn test_explain_reports_index() {
        let conds = conditions(json!({"age": 25}));
        let indexes = [index(&["age"])];
        let plan = QueryPlanner::plan(&conds, &indexes);
        let explained = QueryPlanner::explain(&plan, &indexes);
        assert_eq!(explained["queryPlan"], "IndexScan");
        assert_eq!(explained["indexUsed"], "idx_users_age");

        let plan = QueryPlanner::plan(&conditions(json!({"name": "A"})), &indexes);
        let explained = QueryPlanner::explain(&plan, &indexes);
        assert_eq!(explained["queryPlan"], "CollectionScan");
        assert_eq!(explained["availableIndexes"], json!(["idx_users_age"]));
    }
}

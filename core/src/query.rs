//! Query model and the pure filter evaluator (spec §3 Query, §4.3).

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use thiserror::Error;

use crate::path::parse_field_path;
use crate::value::{FieldMap, FieldValue};

const MAX_FILTERS: usize = 100;
const MAX_ORDERS: usize = 32;
const MAX_IN_ELEMENTS: usize = 30;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("too many filters: {0} > {1}")]
    TooManyFilters(usize, usize),
    #[error("too many orders: {0} > {1}")]
    TooManyOrders(usize, usize),
    #[error("bad field path: {0}")]
    BadFieldPath(String),
    #[error("`in`/`not-in` value must be an array of at most {0} elements")]
    BadInOperand(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "==")]
    Eq,
    #[serde(rename = "!=")]
    Neq,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "array-contains")]
    ArrayContains,
    #[serde(rename = "array-contains-any")]
    ArrayContainsAny,
    #[serde(rename = "in")]
    In,
    #[serde(rename = "not-in")]
    NotIn,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composite {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field_path: String,
    pub operator: Operator,
    pub value: FieldValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Field(FieldFilter),
    Composite { composite: Composite, sub_filters: Vec<Filter> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Order {
    pub field_path: String,
    pub direction: Direction,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Query {
    pub path: String,
    pub filters: Vec<Filter>,
    pub orders: Vec<Order>,
    pub limit: Option<u32>,
    pub offset: u32,
    pub select_fields: Vec<String>,
    pub all_descendants: bool,
    pub limit_to_last: bool,
}

impl Query {
    /// Validates the invariants in spec §3 (filter count, order count, field paths).
    pub fn validate(&self) -> Result<(), QueryError> {
        let total_filters = count_filters(&self.filters);
        if total_filters > MAX_FILTERS {
            return Err(QueryError::TooManyFilters(total_filters, MAX_FILTERS));
        }
        if self.orders.len() > MAX_ORDERS {
            return Err(QueryError::TooManyOrders(self.orders.len(), MAX_ORDERS));
        }
        for order in &self.orders {
            parse_field_path(&order.field_path).map_err(|_| QueryError::BadFieldPath(order.field_path.clone()))?;
        }
        validate_filters(&self.filters)
    }

    /// Parses the client-supplied `query` object of a `subscribe` frame
    /// (spec §4.6), whose filter values use the §3 FieldValue wire form.
    pub fn from_json(path: String, v: &Json) -> Result<Query, QueryError> {
        let filters = v
            .get("filters")
            .and_then(Json::as_array)
            .map(|arr| arr.iter().map(filter_from_json).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        let orders = v
            .get("orders")
            .and_then(Json::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(|o| {
                        let field_path = o.get("fieldPath")?.as_str()?.to_string();
                        let direction = match o.get("direction").and_then(Json::as_str) {
                            Some("desc") => Direction::Desc,
                            _ => Direction::Asc,
                        };
                        Some(Order { field_path, direction })
                    })
                    .collect()
            })
            .unwrap_or_default();
        let query = Query {
            path,
            filters,
            orders,
            limit: v.get("limit").and_then(Json::as_u64).map(|n| n as u32),
            offset: v.get("offset").and_then(Json::as_u64).unwrap_or(0) as u32,
            select_fields: v
                .get("selectFields")
                .and_then(Json::as_array)
                .map(|arr| arr.iter().filter_map(|s| s.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
            all_descendants: v.get("allDescendants").and_then(Json::as_bool).unwrap_or(false),
            limit_to_last: v.get("limitToLast").and_then(Json::as_bool).unwrap_or(false),
        };
        query.validate()?;
        Ok(query)
    }
}

fn filter_from_json(v: &Json) -> Result<Filter, QueryError> {
    if let Some(composite) = v.get("composite").and_then(Json::as_str) {
        let composite = match composite {
            "or" => Composite::Or,
            _ => Composite::And,
        };
        let sub_filters = v
            .get("subFilters")
            .and_then(Json::as_array)
            .map(|arr| arr.iter().map(filter_from_json).collect::<Result<Vec<_>, _>>())
            .transpose()?
            .unwrap_or_default();
        return Ok(Filter::Composite { composite, sub_filters });
    }
    let field_path = v
        .get("fieldPath")
        .and_then(Json::as_str)
        .ok_or_else(|| QueryError::BadFieldPath(String::new()))?
        .to_string();
    let operator: Operator = v
        .get("operator")
        .cloned()
        .and_then(|op| serde_json::from_value(op).ok())
        .ok_or_else(|| QueryError::BadFieldPath(field_path.clone()))?;
    let value = v
        .get("value")
        .map(FieldValue::from_json_or_wire)
        .unwrap_or(FieldValue::Null);
    Ok(Filter::Field(FieldFilter { field_path, operator, value }))
}

fn count_filters(filters: &[Filter]) -> usize {
    filters
        .iter()
        .map(|f| match f {
            Filter::Field(_) => 1,
            Filter::Composite { sub_filters, .. } => count_filters(sub_filters),
        })
        .sum()
}

fn validate_filters(filters: &[Filter]) -> Result<(), QueryError> {
    for f in filters {
        match f {
            Filter::Field(ff) => {
                parse_field_path(&ff.field_path).map_err(|_| QueryError::BadFieldPath(ff.field_path.clone()))?;
                if matches!(ff.operator, Operator::In | Operator::NotIn) {
                    match &ff.value {
                        FieldValue::Array(items) if items.len() <= MAX_IN_ELEMENTS => {}
                        _ => return Err(QueryError::BadInOperand(MAX_IN_ELEMENTS)),
                    }
                }
            }
            Filter::Composite { sub_filters, .. } => validate_filters(sub_filters)?,
        }
    }
    Ok(())
}

/// Looks a dot-separated field path up through nested maps. `None` means the
/// field (or an intermediate map) is absent.
fn lookup<'a>(fields: &'a FieldMap, path: &str) -> Option<&'a FieldValue> {
    let segments = parse_field_path(path).ok()?;
    let mut current = fields.0.get(segments.first()?)?;
    for seg in &segments[1..] {
        match current {
            FieldValue::Map(m) => current = m.get(seg)?,
            _ => return None,
        }
    }
    Some(current)
}

fn numeric(v: &FieldValue) -> Option<f64> {
    match v {
        FieldValue::Int64(i) => Some(*i as f64),
        FieldValue::Double(d) => Some(*d),
        _ => None,
    }
}

fn type_aware_eq(a: &FieldValue, b: &FieldValue) -> bool {
    match (a, b) {
        (FieldValue::Bool(x), FieldValue::Bool(y)) => x == y,
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => x == y,
        (FieldValue::String(x), FieldValue::String(y)) => x == y,
        (FieldValue::Bytes(x), FieldValue::Bytes(y)) => x == y,
        _ => match (numeric(a), numeric(b)) {
            (Some(x), Some(y)) => x == y,
            _ => a.canonical_string() == b.canonical_string(),
        },
    }
}

/// Ordering for `<`, `<=`, `>`, `>=`. `None` means the type pair is undefined.
fn ordering(a: &FieldValue, b: &FieldValue) -> Option<std::cmp::Ordering> {
    match (numeric(a), numeric(b)) {
        (Some(x), Some(y)) => return x.partial_cmp(&y),
        _ => {}
    }
    match (a, b) {
        (FieldValue::String(x), FieldValue::String(y)) => Some(x.cmp(y)),
        (FieldValue::Bytes(x), FieldValue::Bytes(y)) => Some(x.cmp(y)),
        (FieldValue::Timestamp(x), FieldValue::Timestamp(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn eval_field_filter(fields: &FieldMap, f: &FieldFilter) -> bool {
    let lhs = match lookup(fields, &f.field_path) {
        Some(v) => v,
        // Absent field never matches, for every operator (open question resolved
        // conservatively; see DESIGN.md).
        None => return false,
    };
    match f.operator {
        Operator::Eq => type_aware_eq(lhs, &f.value),
        Operator::Neq => !type_aware_eq(lhs, &f.value),
        Operator::Lt => ordering(lhs, &f.value) == Some(std::cmp::Ordering::Less),
        Operator::Lte => matches!(ordering(lhs, &f.value), Some(std::cmp::Ordering::Less) | Some(std::cmp::Ordering::Equal)),
        Operator::Gt => ordering(lhs, &f.value) == Some(std::cmp::Ordering::Greater),
        Operator::Gte => matches!(ordering(lhs, &f.value), Some(std::cmp::Ordering::Greater) | Some(std::cmp::Ordering::Equal)),
        Operator::ArrayContains => match lhs {
            FieldValue::Array(items) => items.iter().any(|v| type_aware_eq(v, &f.value)),
            _ => false,
        },
        Operator::ArrayContainsAny => match (&f.value, lhs) {
            (FieldValue::Array(rhs_items), FieldValue::Array(lhs_items)) => {
                rhs_items.iter().any(|r| lhs_items.iter().any(|l| type_aware_eq(l, r)))
            }
            _ => false,
        },
        Operator::In => match &f.value {
            FieldValue::Array(items) => items.iter().any(|v| type_aware_eq(lhs, v)),
            _ => false,
        },
        Operator::NotIn => match &f.value {
            FieldValue::Array(items) => !items.iter().any(|v| type_aware_eq(lhs, v)),
            _ => false,
        },
    }
}

fn eval_filter(fields: &FieldMap, f: &Filter) -> bool {
    match f {
        Filter::Field(ff) => eval_field_filter(fields, ff),
        Filter::Composite { composite, sub_filters } => match composite {
            Composite::And => sub_filters.iter().all(|sf| eval_filter(fields, sf)),
            Composite::Or => sub_filters.iter().any(|sf| eval_filter(fields, sf)),
        },
    }
}

/// Pure, total predicate: never returns an error, only `bool` (spec §4.3).
pub fn matches(fields: &FieldMap, query: &Query) -> bool {
    query.filters.iter().all(|f| eval_filter(fields, f))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn fields(pairs: &[(&str, FieldValue)]) -> FieldMap {
        FieldMap(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    fn eq_filter(path: &str, value: FieldValue) -> Query {
        Query {
            path: "p".into(),
            filters: vec![Filter::Field(FieldFilter {
                field_path: path.into(),
                operator: Operator::Eq,
                value,
            })],
            ..Default::default()
        }
    }

    #[test]
    fn equality_matches() {
        let doc = fields(&[("status", FieldValue::String("active".into()))]);
        let q = eq_filter("status", FieldValue::String("active".into()));
        assert!(matches(&doc, &q));
    }

    #[test]
    fn equality_rejects_non_match() {
        let doc = fields(&[("status", FieldValue::String("draft".into()))]);
        let q = eq_filter("status", FieldValue::String("active".into()));
        assert!(!matches(&doc, &q));
    }

    #[test]
    fn absent_field_never_matches_even_for_negation() {
        let doc = fields(&[("other", FieldValue::Int64(1))]);
        let neq = Query {
            filters: vec![Filter::Field(FieldFilter {
                field_path: "missing".into(),
                operator: Operator::Neq,
                value: FieldValue::Int64(1),
            })],
            ..Default::default()
        };
        assert!(!matches(&doc, &neq));
    }

    #[test]
    fn numeric_cross_type_equality() {
        let doc = fields(&[("count", FieldValue::Int64(3))]);
        let q = eq_filter("count", FieldValue::Double(3.0));
        assert!(matches(&doc, &q));
    }

    #[test]
    fn ordering_undefined_for_mixed_types_is_false() {
        let doc = fields(&[("x", FieldValue::Bool(true))]);
        let q = Query {
            filters: vec![Filter::Field(FieldFilter {
                field_path: "x".into(),
                operator: Operator::Lt,
                value: FieldValue::Int64(5),
            })],
            ..Default::default()
        };
        assert!(!matches(&doc, &q));
    }

    #[test]
    fn array_contains() {
        let doc = fields(&[(
            "tags",
            FieldValue::Array(vec![FieldValue::String("a".into()), FieldValue::String("b".into())]),
        )]);
        let q = Query {
            filters: vec![Filter::Field(FieldFilter {
                field_path: "tags".into(),
                operator: Operator::ArrayContains,
                value: FieldValue::String("b".into()),
            })],
            ..Default::default()
        };
        assert!(matches(&doc, &q));
    }

    #[test]
    fn in_operator() {
        let doc = fields(&[("status", FieldValue::String("active".into()))]);
        let q = Query {
            filters: vec![Filter::Field(FieldFilter {
                field_path: "status".into(),
                operator: Operator::In,
                value: FieldValue::Array(vec![FieldValue::String("active".into()), FieldValue::String("pending".into())]),
            })],
            ..Default::default()
        };
        assert!(matches(&doc, &q));
    }

    #[test]
    fn nested_field_path() {
        let mut inner = BTreeMap::new();
        inner.insert("city".to_string(), FieldValue::String("berlin".into()));
        let doc = fields(&[("address", FieldValue::Map(inner))]);
        let q = eq_filter("address.city", FieldValue::String("berlin".into()));
        assert!(matches(&doc, &q));
    }

    #[test]
    fn composite_and_short_circuits() {
        let doc = fields(&[("a", FieldValue::Int64(1))]);
        let q = Query {
            filters: vec![Filter::Composite {
                composite: Composite::And,
                sub_filters: vec![
                    Filter::Field(FieldFilter {
                        field_path: "a".into(),
                        operator: Operator::Eq,
                        value: FieldValue::Int64(1),
                    }),
                    Filter::Field(FieldFilter {
                        field_path: "b".into(),
                        operator: Operator::Eq,
                        value: FieldValue::Int64(2),
                    }),
                ],
            }],
            ..Default::default()
        };
        assert!(!matches(&doc, &q));
    }

    #[test]
    fn validate_rejects_too_many_in_elements() {
        let items = (0..31).map(FieldValue::Int64).collect();
        let q = Query {
            filters: vec![Filter::Field(FieldFilter {
                field_path: "a".into(),
                operator: Operator::In,
                value: FieldValue::Array(items),
            })],
            ..Default::default()
        };
        assert!(q.validate().is_err());
    }
}

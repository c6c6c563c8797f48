//! Filter expression language.
//!
//! Filter keys arrive as `field__operator` strings (`age__gte`,
//! `created_time__year_gt`) paired with a JSON value. [`translate`] turns a
//! whole filter mapping into a vector of [`FilterExpr`] predicates against a
//! known column set. Each predicate can evaluate itself against an in-memory
//! JSON row ([`FilterExpr::matches`]) or render itself as a parameterized SQL
//! clause ([`FilterExpr::to_sql`]), so every store backend shares one
//! translation path.

use std::cmp::Ordering;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};

use crate::error::DefinitionError;

/// Separator between a field name and its operator suffix.
pub const OPERATOR_SPLITTER: &str = "__";

/// Leading character that flips an ordering expression to descending.
pub const ORDERING_REVERSER: char = '-';

/// Calendar component extracted by the date-part operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatePart {
    Year,
    Month,
    Day,
}

impl DatePart {
    /// SQL keyword for `EXTRACT(.. FROM col)`.
    pub fn keyword(self) -> &'static str {
        match self {
            DatePart::Year => "YEAR",
            DatePart::Month => "MONTH",
            DatePart::Day => "DAY",
        }
    }
}

/// Comparison applied to an extracted date part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartCmp {
    Eq,
    Ne,
    Gt,
    Ge,
    Lt,
    Le,
}

impl PartCmp {
    fn symbol(self) -> &'static str {
        match self {
            PartCmp::Eq => "=",
            PartCmp::Ne => "<>",
            PartCmp::Gt => ">",
            PartCmp::Ge => ">=",
            PartCmp::Lt => "<",
            PartCmp::Le => "<=",
        }
    }

    fn evaluate(self, ordering: Ordering) -> bool {
        match self {
            PartCmp::Eq => ordering == Ordering::Equal,
            PartCmp::Ne => ordering != Ordering::Equal,
            PartCmp::Gt => ordering == Ordering::Greater,
            PartCmp::Ge => ordering != Ordering::Less,
            PartCmp::Lt => ordering == Ordering::Less,
            PartCmp::Le => ordering != Ordering::Greater,
        }
    }
}

/// The closed set of filter operators.
///
/// String operators follow SQL `LIKE` conventions: `startswith`/`endswith`
/// are case-sensitive, the `i`-prefixed variants and `contains` are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterOp {
    /// Truthy value means IS NULL, falsy means IS NOT NULL.
    IsNull,
    Exact,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    NotIn,
    /// Inclusive on both bounds.
    Between,
    Like,
    ILike,
    StartsWith,
    IStartsWith,
    EndsWith,
    IEndsWith,
    Contains,
    /// Extract a calendar part from a date column, then compare.
    Part(DatePart, PartCmp),
}

impl FilterOp {
    /// Look up an operator by its suffix name. Returns `None` for names
    /// outside the closed set.
    pub fn parse(name: &str) -> Option<FilterOp> {
        use DatePart::*;
        use PartCmp::*;
        let op = match name {
            "isnull" => FilterOp::IsNull,
            "exact" => FilterOp::Exact,
            "ne" => FilterOp::Ne,
            "gt" => FilterOp::Gt,
            "gte" => FilterOp::Gte,
            "lt" => FilterOp::Lt,
            "lte" => FilterOp::Lte,
            "in" => FilterOp::In,
            "notin" => FilterOp::NotIn,
            "between" => FilterOp::Between,
            "like" => FilterOp::Like,
            "ilike" => FilterOp::ILike,
            "startswith" => FilterOp::StartsWith,
            "istartswith" => FilterOp::IStartsWith,
            "endswith" => FilterOp::EndsWith,
            "iendswith" => FilterOp::IEndsWith,
            "contains" => FilterOp::Contains,
            "year" => FilterOp::Part(Year, Eq),
            "year_ne" => FilterOp::Part(Year, Ne),
            "year_gt" => FilterOp::Part(Year, Gt),
            "year_ge" => FilterOp::Part(Year, Ge),
            "year_lt" => FilterOp::Part(Year, Lt),
            "year_le" => FilterOp::Part(Year, Le),
            "month" => FilterOp::Part(Month, Eq),
            "month_ne" => FilterOp::Part(Month, Ne),
            "month_gt" => FilterOp::Part(Month, Gt),
            "month_ge" => FilterOp::Part(Month, Ge),
            "month_lt" => FilterOp::Part(Month, Lt),
            "month_le" => FilterOp::Part(Month, Le),
            "day" => FilterOp::Part(Day, Eq),
            "day_ne" => FilterOp::Part(Day, Ne),
            "day_gt" => FilterOp::Part(Day, Gt),
            "day_ge" => FilterOp::Part(Day, Ge),
            "day_lt" => FilterOp::Part(Day, Lt),
            "day_le" => FilterOp::Part(Day, Le),
            _ => return None,
        };
        Some(op)
    }
}

/// A single translated predicate: one filter key, one operator, one operand.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterExpr {
    pub field: String,
    pub op: FilterOp,
    pub value: Value,
}

impl FilterExpr {
    pub fn new(field: impl Into<String>, op: FilterOp, value: Value) -> Self {
        Self {
            field: field.into(),
            op,
            value,
        }
    }

    /// Evaluate this predicate against a JSON row object.
    ///
    /// Missing fields are treated as null. Values of incomparable types
    /// never match.
    pub fn matches(&self, row: &Value) -> bool {
        let cell = row.get(&self.field).unwrap_or(&Value::Null);
        match self.op {
            FilterOp::IsNull => {
                if truthy(&self.value) {
                    cell.is_null()
                } else {
                    !cell.is_null()
                }
            }
            FilterOp::Exact => compare(cell, &self.value) == Some(Ordering::Equal),
            FilterOp::Ne => {
                matches!(compare(cell, &self.value), Some(o) if o != Ordering::Equal)
            }
            FilterOp::Gt => compare(cell, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => {
                matches!(compare(cell, &self.value), Some(o) if o != Ordering::Less)
            }
            FilterOp::Lt => compare(cell, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => {
                matches!(compare(cell, &self.value), Some(o) if o != Ordering::Greater)
            }
            FilterOp::In => in_sequence(cell, &self.value),
            FilterOp::NotIn => {
                self.value.as_array().is_some() && !in_sequence(cell, &self.value)
            }
            FilterOp::Between => match self.value.as_array() {
                Some(bounds) if bounds.len() == 2 => {
                    matches!(compare(cell, &bounds[0]), Some(o) if o != Ordering::Less)
                        && matches!(compare(cell, &bounds[1]), Some(o) if o != Ordering::Greater)
                }
                _ => false,
            },
            FilterOp::Like => like_match(cell, &text_of(&self.value), false),
            FilterOp::ILike => like_match(cell, &text_of(&self.value), true),
            FilterOp::StartsWith => {
                like_match(cell, &format!("{}%", text_of(&self.value)), false)
            }
            FilterOp::IStartsWith => {
                like_match(cell, &format!("{}%", text_of(&self.value)), true)
            }
            FilterOp::EndsWith => {
                like_match(cell, &format!("%{}", text_of(&self.value)), false)
            }
            FilterOp::IEndsWith => {
                like_match(cell, &format!("%{}", text_of(&self.value)), true)
            }
            FilterOp::Contains => {
                like_match(cell, &format!("%{}%", text_of(&self.value)), true)
            }
            FilterOp::Part(part, cmp) => {
                let Some(extracted) = extract_part(cell, part) else {
                    return false;
                };
                let Some(expected) = self.value.as_i64() else {
                    return false;
                };
                cmp.evaluate(extracted.cmp(&expected))
            }
        }
    }

    /// Render this predicate as a SQL clause with `$n`-style placeholders
    /// starting at `index`. Returns the clause and its bound parameters.
    ///
    /// The field name is interpolated directly: [`translate`] has already
    /// checked it against the model's column set.
    pub fn to_sql(&self, index: usize) -> (String, Vec<Value>) {
        match self.op {
            FilterOp::IsNull => {
                let clause = if truthy(&self.value) {
                    format!("{} IS NULL", self.field)
                } else {
                    format!("{} IS NOT NULL", self.field)
                };
                (clause, Vec::new())
            }
            FilterOp::Exact => (
                format!("{} = ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Ne => (
                format!("{} <> ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Gt => (
                format!("{} > ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Gte => (
                format!("{} >= ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Lt => (
                format!("{} < ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Lte => (
                format!("{} <= ${}", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::In => (
                format!("{} = ANY(${})", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::NotIn => (
                format!("{} <> ALL(${})", self.field, index),
                vec![self.value.clone()],
            ),
            FilterOp::Between => {
                let (low, high) = match self.value.as_array() {
                    Some(bounds) if bounds.len() == 2 => (bounds[0].clone(), bounds[1].clone()),
                    _ => (Value::Null, Value::Null),
                };
                (
                    format!("{} BETWEEN ${} AND ${}", self.field, index, index + 1),
                    vec![low, high],
                )
            }
            FilterOp::Like => (
                format!("{} LIKE ${}", self.field, index),
                vec![Value::String(text_of(&self.value))],
            ),
            FilterOp::ILike => (
                format!("{} ILIKE ${}", self.field, index),
                vec![Value::String(text_of(&self.value))],
            ),
            FilterOp::StartsWith => (
                format!("{} LIKE ${}", self.field, index),
                vec![Value::String(format!("{}%", text_of(&self.value)))],
            ),
            FilterOp::IStartsWith => (
                format!("{} ILIKE ${}", self.field, index),
                vec![Value::String(format!("{}%", text_of(&self.value)))],
            ),
            FilterOp::EndsWith => (
                format!("{} LIKE ${}", self.field, index),
                vec![Value::String(format!("%{}", text_of(&self.value)))],
            ),
            FilterOp::IEndsWith => (
                format!("{} ILIKE ${}", self.field, index),
                vec![Value::String(format!("%{}", text_of(&self.value)))],
            ),
            FilterOp::Contains => (
                format!("{} ILIKE ${}", self.field, index),
                vec![Value::String(format!("%{}%", text_of(&self.value)))],
            ),
            FilterOp::Part(part, cmp) => (
                format!(
                    "EXTRACT({} FROM {}) {} ${}",
                    part.keyword(),
                    self.field,
                    cmp.symbol(),
                    index
                ),
                vec![self.value.clone()],
            ),
        }
    }
}

/// Translate a filter mapping into predicates against a known column set.
///
/// Each key is split on its *last* `__`; a key without the splitter filters
/// with `exact`, as does a whole key naming a column that contains the
/// splitter itself. Any other unknown suffix, and any unknown field, fails
/// the whole translation. Predicate order follows the mapping's iteration
/// order.
pub fn translate(
    columns: &[&str],
    filters: &Map<String, Value>,
) -> Result<Vec<FilterExpr>, DefinitionError> {
    let mut exprs = Vec::with_capacity(filters.len());
    for (key, value) in filters {
        let (field, op) = match key.rsplit_once(OPERATOR_SPLITTER) {
            Some((field, suffix)) => match FilterOp::parse(suffix) {
                Some(op) => (field, op),
                // A declared column may itself contain the splitter; the
                // whole key then filters exact. A bad suffix on a declared
                // field is an operator typo and raises.
                None if !columns.contains(&field) && columns.contains(&key.as_str()) => {
                    (key.as_str(), FilterOp::Exact)
                }
                None => {
                    return Err(DefinitionError::UnknownOperator {
                        expression: key.clone(),
                        operator: suffix.to_string(),
                    })
                }
            },
            None => (key.as_str(), FilterOp::Exact),
        };
        if !columns.contains(&field) {
            return Err(DefinitionError::UnknownField {
                field: field.to_string(),
            });
        }
        if op == FilterOp::Between && value.as_array().map(Vec::len) != Some(2) {
            return Err(DefinitionError::BadBetweenValue {
                field: field.to_string(),
            });
        }
        exprs.push(FilterExpr::new(field, op, value.clone()));
    }
    Ok(exprs)
}

/// Sort direction for an ordering expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Direction {
    Asc,
    Desc,
}

/// One parsed ordering expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// Parse an ordering expression: a leading `-` means descending.
pub fn parse_ordering(expr: &str) -> OrderBy {
    match expr.strip_prefix(ORDERING_REVERSER) {
        Some(field) => OrderBy {
            field: field.to_string(),
            direction: Direction::Desc,
        },
        None => OrderBy {
            field: expr.to_string(),
            direction: Direction::Asc,
        },
    }
}

/// Compare two JSON cells for ordering purposes. Numbers compare
/// numerically across integer and float representations; strings and
/// booleans compare within their own type. Anything else is incomparable.
pub fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let a = a.as_f64()?;
            let b = b.as_f64()?;
            a.partial_cmp(&b)
        }
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn in_sequence(cell: &Value, operand: &Value) -> bool {
    operand
        .as_array()
        .map(|items| {
            items
                .iter()
                .any(|item| compare(cell, item) == Some(Ordering::Equal))
        })
        .unwrap_or(false)
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Match a string cell against a SQL LIKE pattern. Only the `%` wildcard is
/// supported, which is the subset the operator table produces.
fn like_match(cell: &Value, pattern: &str, case_insensitive: bool) -> bool {
    let Some(text) = cell.as_str() else {
        return false;
    };
    let (text, pattern) = if case_insensitive {
        (text.to_lowercase(), pattern.to_lowercase())
    } else {
        (text.to_string(), pattern.to_string())
    };

    let segments: Vec<&str> = pattern.split('%').collect();
    if segments.len() == 1 {
        return text == pattern;
    }

    let mut rest = text.as_str();
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        if segment.is_empty() {
            continue;
        }
        if i == 0 {
            match rest.strip_prefix(segment) {
                Some(after) => rest = after,
                None => return false,
            }
        } else if i == last {
            return rest.ends_with(segment);
        } else {
            match rest.find(segment) {
                Some(pos) => rest = &rest[pos + segment.len()..],
                None => return false,
            }
        }
    }
    true
}

fn extract_part(cell: &Value, part: DatePart) -> Option<i64> {
    let text = cell.as_str()?;
    let date = parse_date(text)?;
    let extracted = match part {
        DatePart::Year => date.year() as i64,
        DatePart::Month => date.month() as i64,
        DatePart::Day => date.day() as i64,
    };
    Some(extracted)
}

fn parse_date(text: &str) -> Option<NaiveDate> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(dt.date_naive());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(dt.date());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.date());
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d").ok()
}

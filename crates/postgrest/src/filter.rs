//! Filter expressions for PostgREST queries
//!
//! A [`Filter`] is an immutable predicate tree built with the functions in this
//! module and serialized into PostgREST's query-string grammar:
//!
//! ```
//! use supabase_rust_postgrest::filter::{and, greater_than, less_than, to_query_string};
//!
//! let range = and(vec![greater_than("value", 5), less_than("value", 7)]).unwrap();
//! assert_eq!(to_query_string(&[range]).unwrap(), "and=(value.gt.5,value.lt.7)");
//! ```

use crate::encode::{encode_column, encode_value, FilterValue};
use std::fmt;
use thiserror::Error;

/// Errors raised while building or serializing a filter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FilterError {
    #[error("logical `{0}` group requires at least one filter")]
    EmptyGroup(LogicalOperator),

    #[error("range bounds must both be numbers or both be timestamps (got {from} and {to})")]
    MismatchedRange {
        from: &'static str,
        to: &'static str,
    },

    #[error("range bounds must be finite numbers")]
    NonFiniteBound,

    #[error("raw filters cannot be nested inside logical groups or negated")]
    RawComposition,
}

/// Comparison operator of a binary filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
    Like,
    ILike,
    Match,
    IMatch,
    Is,
    IsDistinct,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Neq => "neq",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::Like => "like",
            Operator::ILike => "ilike",
            Operator::Match => "match",
            Operator::IMatch => "imatch",
            Operator::Is => "is",
            Operator::IsDistinct => "isdistinct",
        }
    }
}

/// Operator of an array-column filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOperator {
    /// Column contains every listed value
    Contains,
    /// Every column element is among the listed values
    ContainedIn,
    /// Column shares at least one element with the list
    Overlaps,
}

impl ArrayOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            ArrayOperator::Contains => "cs",
            ArrayOperator::ContainedIn => "cd",
            ArrayOperator::Overlaps => "ov",
        }
    }
}

/// Operator of a range-column filter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeOperator {
    Contains,
    ContainedIn,
    Overlaps,
    StrictlyLeft,
    StrictlyRight,
    NotExtendRight,
    NotExtendLeft,
    Adjacent,
}

impl RangeOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            RangeOperator::Contains => "cs",
            RangeOperator::ContainedIn => "cd",
            RangeOperator::Overlaps => "ov",
            RangeOperator::StrictlyLeft => "sl",
            RangeOperator::StrictlyRight => "sr",
            RangeOperator::NotExtendRight => "nxr",
            RangeOperator::NotExtendLeft => "nxl",
            RangeOperator::Adjacent => "adj",
        }
    }
}

/// Boolean connective of a logical group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "and",
            LogicalOperator::Or => "or",
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The shape of a filter
#[derive(Debug, Clone, PartialEq)]
pub enum FilterKind {
    /// `column <op> value`
    Binary {
        column: String,
        operator: Operator,
        value: FilterValue,
    },
    /// `column IN (values)`
    In {
        column: String,
        values: Vec<FilterValue>,
    },
    Array {
        column: String,
        operator: ArrayOperator,
        values: Vec<FilterValue>,
    },
    /// Bounds are both numeric or both timestamps
    Range {
        column: String,
        operator: RangeOperator,
        from: FilterValue,
        to: FilterValue,
    },
    /// Never empty
    Logical {
        operator: LogicalOperator,
        children: Vec<Filter>,
    },
    Not(Box<Filter>),
    /// Pre-encoded clause, only valid at top level
    Raw(String),
}

/// An immutable PostgREST predicate.
///
/// Filters can only be obtained from the builder functions in this module,
/// which validate group and range invariants up front.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    kind: FilterKind,
}

impl Filter {
    fn new(kind: FilterKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> &FilterKind {
        &self.kind
    }

    /// Serialize the filter into a single query-string clause.
    ///
    /// `nested` selects the dotted syntax used inside logical groups, and
    /// `negated` adds the `not.` prefix. Top-level callers pass `false` for
    /// both; see [`to_query_string`].
    pub fn to_clause_string(&self, nested: bool, negated: bool) -> Result<String, FilterError> {
        let sep = if nested { "." } else { "=" };
        let not = if negated { "not." } else { "" };

        let clause = match &self.kind {
            FilterKind::Binary {
                column,
                operator,
                value,
            } => format!(
                "{}{}{}{}.{}",
                encode_column(column),
                sep,
                not,
                operator.as_str(),
                encode_value(value, nested)
            ),
            FilterKind::In { column, values } => format!(
                "{}{}{}in.({})",
                encode_column(column),
                sep,
                not,
                encode_list(values)
            ),
            FilterKind::Array {
                column,
                operator,
                values,
            } => format!(
                "{}{}{}{}.{{{}}}",
                encode_column(column),
                sep,
                not,
                operator.as_str(),
                encode_list(values)
            ),
            FilterKind::Range {
                column,
                operator,
                from,
                to,
            } => format!(
                "{}{}{}{}.({},{})",
                encode_column(column),
                sep,
                not,
                operator.as_str(),
                encode_value(from, true),
                encode_value(to, true)
            ),
            FilterKind::Logical { operator, children } => {
                let joined = children
                    .iter()
                    .map(|child| child.to_clause_string(true, false))
                    .collect::<Result<Vec<_>, _>>()?
                    .join(",");
                let op = operator.as_str();
                let prefix = match (negated, nested) {
                    (true, true) => format!("not.{}", op),
                    (true, false) => format!("not={}", op),
                    (false, true) => op.to_string(),
                    (false, false) => format!("{}=", op),
                };
                format!("{}({})", prefix, joined)
            }
            FilterKind::Not(child) => return child.to_clause_string(nested, !negated),
            FilterKind::Raw(text) => {
                if nested || negated {
                    return Err(FilterError::RawComposition);
                }
                text.clone()
            }
        };

        Ok(clause)
    }
}

fn encode_list(values: &[FilterValue]) -> String {
    values
        .iter()
        .map(|v| encode_value(v, true))
        .collect::<Vec<_>>()
        .join(",")
}

/// Serialize top-level filters into a query string, joined with `&`.
pub fn to_query_string(filters: &[Filter]) -> Result<String, FilterError> {
    let clauses = filters
        .iter()
        .map(|f| f.to_clause_string(false, false))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(clauses.join("&"))
}

/// Build a binary filter with an arbitrary comparison operator
pub fn binary(column: &str, operator: Operator, value: impl Into<FilterValue>) -> Filter {
    Filter::new(FilterKind::Binary {
        column: column.to_string(),
        operator,
        value: value.into(),
    })
}

pub fn equals(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Eq, value)
}

pub fn not_equals(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Neq, value)
}

pub fn greater_than(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Gt, value)
}

pub fn greater_than_or_equal(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Gte, value)
}

pub fn less_than(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Lt, value)
}

pub fn less_than_or_equal(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Lte, value)
}

/// Case-sensitive pattern match, `*` is the wildcard
pub fn like(column: &str, pattern: &str) -> Filter {
    binary(column, Operator::Like, pattern)
}

/// Case-insensitive pattern match
pub fn ilike(column: &str, pattern: &str) -> Filter {
    binary(column, Operator::ILike, pattern)
}

/// POSIX regular expression match
pub fn matches(column: &str, regex: &str) -> Filter {
    binary(column, Operator::Match, regex)
}

pub fn imatches(column: &str, regex: &str) -> Filter {
    binary(column, Operator::IMatch, regex)
}

/// `IS` comparison, for `null`, `true`, `false`
pub fn is(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::Is, value)
}

pub fn is_not(column: &str, value: impl Into<FilterValue>) -> Filter {
    not(is(column, value))
}

pub fn is_distinct(column: &str, value: impl Into<FilterValue>) -> Filter {
    binary(column, Operator::IsDistinct, value)
}

pub fn is_null(column: &str) -> Filter {
    is(column, FilterValue::Null)
}

/// `NOT (column IS NULL)`.
///
/// PostgREST mishandles `isdistinct.null`, so this negates `is.null` instead.
pub fn is_not_null(column: &str) -> Filter {
    not(is_null(column))
}

/// `column IN (values)`. An empty list is allowed and matches nothing.
pub fn in_list<V: Into<FilterValue>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
    Filter::new(FilterKind::In {
        column: column.to_string(),
        values: values.into_iter().map(Into::into).collect(),
    })
}

fn array<V: Into<FilterValue>>(
    column: &str,
    operator: ArrayOperator,
    values: impl IntoIterator<Item = V>,
) -> Filter {
    Filter::new(FilterKind::Array {
        column: column.to_string(),
        operator,
        values: values.into_iter().map(Into::into).collect(),
    })
}

pub fn contains<V: Into<FilterValue>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
    array(column, ArrayOperator::Contains, values)
}

pub fn contained_in<V: Into<FilterValue>>(
    column: &str,
    values: impl IntoIterator<Item = V>,
) -> Filter {
    array(column, ArrayOperator::ContainedIn, values)
}

pub fn overlaps<V: Into<FilterValue>>(column: &str, values: impl IntoIterator<Item = V>) -> Filter {
    array(column, ArrayOperator::Overlaps, values)
}

/// Build a range filter; both bounds must be numbers or both timestamps.
///
/// `NaN` and infinite floats are rejected since PostgREST cannot parse them
/// as range bounds.
pub fn range(
    column: &str,
    operator: RangeOperator,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    let (from, to) = (from.into(), to.into());
    let same_class = (from.is_numeric() && to.is_numeric())
        || matches!(
            (&from, &to),
            (FilterValue::Timestamp(_), FilterValue::Timestamp(_))
        );
    if !same_class {
        return Err(FilterError::MismatchedRange {
            from: from.type_name(),
            to: to.type_name(),
        });
    }
    let non_finite = |value: &FilterValue| matches!(value, FilterValue::Float(n) if !n.is_finite());
    if non_finite(&from) || non_finite(&to) {
        return Err(FilterError::NonFiniteBound);
    }

    Ok(Filter::new(FilterKind::Range {
        column: column.to_string(),
        operator,
        from,
        to,
    }))
}

pub fn range_contains(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::Contains, from, to)
}

pub fn range_contained_in(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::ContainedIn, from, to)
}

pub fn range_overlaps(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::Overlaps, from, to)
}

pub fn range_strictly_left(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::StrictlyLeft, from, to)
}

pub fn range_strictly_right(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::StrictlyRight, from, to)
}

pub fn range_not_extend_right(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::NotExtendRight, from, to)
}

pub fn range_not_extend_left(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::NotExtendLeft, from, to)
}

pub fn range_adjacent(
    column: &str,
    from: impl Into<FilterValue>,
    to: impl Into<FilterValue>,
) -> Result<Filter, FilterError> {
    range(column, RangeOperator::Adjacent, from, to)
}

fn logical(operator: LogicalOperator, children: Vec<Filter>) -> Result<Filter, FilterError> {
    if children.is_empty() {
        return Err(FilterError::EmptyGroup(operator));
    }
    Ok(Filter::new(FilterKind::Logical { operator, children }))
}

/// All children must match
pub fn and(children: Vec<Filter>) -> Result<Filter, FilterError> {
    logical(LogicalOperator::And, children)
}

/// At least one child must match
pub fn or(children: Vec<Filter>) -> Result<Filter, FilterError> {
    logical(LogicalOperator::Or, children)
}

pub fn not(filter: Filter) -> Filter {
    Filter::new(FilterKind::Not(Box::new(filter)))
}

/// Escape hatch for a clause the caller has already encoded, e.g.
/// `"content=fts(english).rust"`. Cannot be grouped or negated.
pub fn raw(text: &str) -> Filter {
    Filter::new(FilterKind::Raw(text.to_string()))
}

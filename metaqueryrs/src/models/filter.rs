//! Filter trees and sorts as they arrive from views and requests.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOp {
    And,
    Or,
    Not,
}

/// Comparison operator of a filter condition. Unknown operators are kept so
/// verification can report them alongside every other problem.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparisonOp {
    Eq,
    Neq,
    Not,
    Like,
    Nlike,
    Empty,
    NotEmpty,
    Null,
    NotNull,
    Blank,
    NotBlank,
    Checked,
    NotChecked,
    AllOf,
    AnyOf,
    NAllOf,
    NAnyOf,
    Gt,
    Lt,
    Gte,
    Lte,
    Ge,
    Le,
    In,
    Btw,
    Nbtw,
    Is,
    IsNot,
    IsWithin,
    Unknown(String),
}

impl ComparisonOp {
    pub fn as_str(&self) -> &str {
        match self {
            ComparisonOp::Eq => "eq",
            ComparisonOp::Neq => "neq",
            ComparisonOp::Not => "not",
            ComparisonOp::Like => "like",
            ComparisonOp::Nlike => "nlike",
            ComparisonOp::Empty => "empty",
            ComparisonOp::NotEmpty => "notempty",
            ComparisonOp::Null => "null",
            ComparisonOp::NotNull => "notnull",
            ComparisonOp::Blank => "blank",
            ComparisonOp::NotBlank => "notblank",
            ComparisonOp::Checked => "checked",
            ComparisonOp::NotChecked => "notchecked",
            ComparisonOp::AllOf => "allof",
            ComparisonOp::AnyOf => "anyof",
            ComparisonOp::NAllOf => "nallof",
            ComparisonOp::NAnyOf => "nanyof",
            ComparisonOp::Gt => "gt",
            ComparisonOp::Lt => "lt",
            ComparisonOp::Gte => "gte",
            ComparisonOp::Lte => "lte",
            ComparisonOp::Ge => "ge",
            ComparisonOp::Le => "le",
            ComparisonOp::In => "in",
            ComparisonOp::Btw => "btw",
            ComparisonOp::Nbtw => "nbtw",
            ComparisonOp::Is => "is",
            ComparisonOp::IsNot => "isnot",
            ComparisonOp::IsWithin => "isWithin",
            ComparisonOp::Unknown(op) => op,
        }
    }

    /// Operators that never look at the filter value.
    pub fn ignores_value(&self) -> bool {
        matches!(
            self,
            ComparisonOp::Empty
                | ComparisonOp::NotEmpty
                | ComparisonOp::Null
                | ComparisonOp::NotNull
                | ComparisonOp::Blank
                | ComparisonOp::NotBlank
                | ComparisonOp::Checked
                | ComparisonOp::NotChecked
        )
    }

    /// For operators that exclude matches, the operator whose result they negate.
    /// Used when a comparison has to be lifted into an `EXISTS` over related rows.
    pub fn positive_counterpart(&self) -> Option<ComparisonOp> {
        match self {
            ComparisonOp::Neq | ComparisonOp::Not => Some(ComparisonOp::Eq),
            ComparisonOp::Nlike => Some(ComparisonOp::Like),
            ComparisonOp::NotBlank => Some(ComparisonOp::Blank),
            ComparisonOp::NotEmpty => Some(ComparisonOp::Empty),
            ComparisonOp::NotNull => Some(ComparisonOp::Null),
            ComparisonOp::NAllOf => Some(ComparisonOp::AllOf),
            ComparisonOp::NAnyOf => Some(ComparisonOp::AnyOf),
            ComparisonOp::Nbtw => Some(ComparisonOp::Btw),
            ComparisonOp::IsNot => Some(ComparisonOp::Is),
            _ => None,
        }
    }
}

impl FromStr for ComparisonOp {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "eq" => ComparisonOp::Eq,
            "neq" => ComparisonOp::Neq,
            "not" => ComparisonOp::Not,
            "like" => ComparisonOp::Like,
            "nlike" => ComparisonOp::Nlike,
            "empty" => ComparisonOp::Empty,
            "notempty" => ComparisonOp::NotEmpty,
            "null" => ComparisonOp::Null,
            "notnull" => ComparisonOp::NotNull,
            "blank" => ComparisonOp::Blank,
            "notblank" => ComparisonOp::NotBlank,
            "checked" => ComparisonOp::Checked,
            "notchecked" => ComparisonOp::NotChecked,
            "allof" => ComparisonOp::AllOf,
            "anyof" => ComparisonOp::AnyOf,
            "nallof" => ComparisonOp::NAllOf,
            "nanyof" => ComparisonOp::NAnyOf,
            "gt" => ComparisonOp::Gt,
            "lt" => ComparisonOp::Lt,
            "gte" => ComparisonOp::Gte,
            "lte" => ComparisonOp::Lte,
            "ge" => ComparisonOp::Ge,
            "le" => ComparisonOp::Le,
            "in" => ComparisonOp::In,
            "btw" => ComparisonOp::Btw,
            "nbtw" => ComparisonOp::Nbtw,
            "is" => ComparisonOp::Is,
            "isnot" => ComparisonOp::IsNot,
            "isWithin" => ComparisonOp::IsWithin,
            other => ComparisonOp::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for ComparisonOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ComparisonOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ComparisonOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(raw.parse().unwrap_or_else(|never| match never {}))
    }
}

/// Relative-date qualifier used by date comparisons.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ComparisonSubOp {
    Today,
    Tomorrow,
    Yesterday,
    OneWeekAgo,
    OneWeekFromNow,
    OneMonthAgo,
    OneMonthFromNow,
    DaysAgo,
    DaysFromNow,
    ExactDate,
    PastWeek,
    PastMonth,
    PastYear,
    NextWeek,
    NextMonth,
    NextYear,
    PastNumberOfDays,
    NextNumberOfDays,
    Unknown(String),
}

impl ComparisonSubOp {
    pub fn as_str(&self) -> &str {
        match self {
            ComparisonSubOp::Today => "today",
            ComparisonSubOp::Tomorrow => "tomorrow",
            ComparisonSubOp::Yesterday => "yesterday",
            ComparisonSubOp::OneWeekAgo => "oneWeekAgo",
            ComparisonSubOp::OneWeekFromNow => "oneWeekFromNow",
            ComparisonSubOp::OneMonthAgo => "oneMonthAgo",
            ComparisonSubOp::OneMonthFromNow => "oneMonthFromNow",
            ComparisonSubOp::DaysAgo => "daysAgo",
            ComparisonSubOp::DaysFromNow => "daysFromNow",
            ComparisonSubOp::ExactDate => "exactDate",
            ComparisonSubOp::PastWeek => "pastWeek",
            ComparisonSubOp::PastMonth => "pastMonth",
            ComparisonSubOp::PastYear => "pastYear",
            ComparisonSubOp::NextWeek => "nextWeek",
            ComparisonSubOp::NextMonth => "nextMonth",
            ComparisonSubOp::NextYear => "nextYear",
            ComparisonSubOp::PastNumberOfDays => "pastNumberOfDays",
            ComparisonSubOp::NextNumberOfDays => "nextNumberOfDays",
            ComparisonSubOp::Unknown(op) => op,
        }
    }

    /// Sub-ops valid for `isWithin`.
    pub fn is_range(&self) -> bool {
        matches!(
            self,
            ComparisonSubOp::PastWeek
                | ComparisonSubOp::PastMonth
                | ComparisonSubOp::PastYear
                | ComparisonSubOp::NextWeek
                | ComparisonSubOp::NextMonth
                | ComparisonSubOp::NextYear
                | ComparisonSubOp::PastNumberOfDays
                | ComparisonSubOp::NextNumberOfDays
        )
    }

    pub fn needs_value(&self) -> bool {
        matches!(
            self,
            ComparisonSubOp::DaysAgo
                | ComparisonSubOp::DaysFromNow
                | ComparisonSubOp::ExactDate
                | ComparisonSubOp::PastNumberOfDays
                | ComparisonSubOp::NextNumberOfDays
        )
    }
}

impl FromStr for ComparisonSubOp {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "today" => ComparisonSubOp::Today,
            "tomorrow" => ComparisonSubOp::Tomorrow,
            "yesterday" => ComparisonSubOp::Yesterday,
            "oneWeekAgo" => ComparisonSubOp::OneWeekAgo,
            "oneWeekFromNow" => ComparisonSubOp::OneWeekFromNow,
            "oneMonthAgo" => ComparisonSubOp::OneMonthAgo,
            "oneMonthFromNow" => ComparisonSubOp::OneMonthFromNow,
            "daysAgo" => ComparisonSubOp::DaysAgo,
            "daysFromNow" => ComparisonSubOp::DaysFromNow,
            "exactDate" => ComparisonSubOp::ExactDate,
            "pastWeek" => ComparisonSubOp::PastWeek,
            "pastMonth" => ComparisonSubOp::PastMonth,
            "pastYear" => ComparisonSubOp::PastYear,
            "nextWeek" => ComparisonSubOp::NextWeek,
            "nextMonth" => ComparisonSubOp::NextMonth,
            "nextYear" => ComparisonSubOp::NextYear,
            "pastNumberOfDays" => ComparisonSubOp::PastNumberOfDays,
            "nextNumberOfDays" => ComparisonSubOp::NextNumberOfDays,
            other => ComparisonSubOp::Unknown(other.to_string()),
        })
    }
}

impl fmt::Display for ComparisonSubOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Leaf of a filter tree.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCondition {
    pub column_id: String,
    pub op: ComparisonOp,
    pub sub_op: Option<ComparisonSubOp>,
    pub value: Value,
    pub negate: bool,
}

impl FilterCondition {
    pub fn new(column_id: impl Into<String>, op: ComparisonOp, value: Value) -> Self {
        Self {
            column_id: column_id.into(),
            op,
            sub_op: None,
            value,
            negate: false,
        }
    }

    pub fn with_sub_op(mut self, sub_op: ComparisonSubOp) -> Self {
        self.sub_op = Some(sub_op);
        self
    }

    /// The value as text, treating JSON null and empty strings alike.
    pub fn value_str(&self) -> Option<String> {
        match &self.value {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Group {
        logical_op: LogicalOp,
        children: Vec<Filter>,
    },
    Condition(FilterCondition),
}

impl Filter {
    pub fn and(children: Vec<Filter>) -> Self {
        Filter::Group {
            logical_op: LogicalOp::And,
            children,
        }
    }

    pub fn or(children: Vec<Filter>) -> Self {
        Filter::Group {
            logical_op: LogicalOp::Or,
            children,
        }
    }

    pub fn condition(column_id: impl Into<String>, op: &str, value: Value) -> Self {
        let op = op.parse().unwrap_or_else(|never| match never {});
        Filter::Condition(FilterCondition::new(column_id, op, value))
    }

    /// Leaf conditions in declared order.
    pub fn conditions(&self) -> Vec<&FilterCondition> {
        let mut out = Vec::new();
        self.collect_conditions(&mut out);
        out
    }

    fn collect_conditions<'a>(&'a self, out: &mut Vec<&'a FilterCondition>) {
        match self {
            Filter::Condition(cond) => out.push(cond),
            Filter::Group { children, .. } => {
                for child in children {
                    child.collect_conditions(out);
                }
            }
        }
    }
}

impl Serialize for Filter {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        match self {
            Filter::Group {
                logical_op,
                children,
            } => {
                let mut map = serializer.serialize_map(Some(3))?;
                map.serialize_entry("is_group", &true)?;
                map.serialize_entry("logical_op", logical_op)?;
                map.serialize_entry("children", children)?;
                map.end()
            }
            Filter::Condition(cond) => {
                let mut map = serializer.serialize_map(Some(5))?;
                map.serialize_entry("fk_column_id", &cond.column_id)?;
                map.serialize_entry("comparison_op", &cond.op)?;
                map.serialize_entry(
                    "comparison_sub_op",
                    &cond.sub_op.as_ref().map(ComparisonSubOp::as_str),
                )?;
                map.serialize_entry("value", &cond.value)?;
                map.serialize_entry("negate", &cond.negate)?;
                map.end()
            }
        }
    }
}

#[derive(Deserialize)]
struct RawFilter {
    #[serde(default)]
    is_group: bool,
    #[serde(default)]
    logical_op: Option<LogicalOp>,
    #[serde(default)]
    children: Option<Vec<Filter>>,
    #[serde(default, alias = "column_id")]
    fk_column_id: Option<String>,
    #[serde(default)]
    comparison_op: Option<ComparisonOp>,
    #[serde(default)]
    comparison_sub_op: Option<String>,
    #[serde(default)]
    value: Value,
    #[serde(default)]
    negate: bool,
}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = RawFilter::deserialize(deserializer)?;
        if raw.is_group || raw.children.is_some() {
            return Ok(Filter::Group {
                logical_op: raw.logical_op.unwrap_or(LogicalOp::And),
                children: raw.children.unwrap_or_default(),
            });
        }
        let column_id = raw
            .fk_column_id
            .ok_or_else(|| serde::de::Error::missing_field("fk_column_id"))?;
        let op = raw
            .comparison_op
            .ok_or_else(|| serde::de::Error::missing_field("comparison_op"))?;
        let sub_op = raw
            .comparison_sub_op
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<ComparisonSubOp>()
                    .unwrap_or_else(|never| match never {})
            });
        Ok(Filter::Condition(FilterCondition {
            column_id,
            op,
            sub_op,
            value: raw.value,
            negate: raw.negate,
        }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sort {
    #[serde(alias = "fk_column_id")]
    pub column_id: String,
    #[serde(default)]
    pub direction: SortDirection,
}

impl Sort {
    pub fn asc(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: SortDirection::Asc,
        }
    }

    pub fn desc(column_id: impl Into<String>) -> Self {
        Self {
            column_id: column_id.into(),
            direction: SortDirection::Desc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_nested_filter_tree() {
        let filter: Filter = serde_json::from_value(json!({
            "is_group": true,
            "logical_op": "or",
            "children": [
                { "fk_column_id": "c1", "comparison_op": "eq", "value": "x" },
                {
                    "is_group": true,
                    "logical_op": "and",
                    "children": [
                        { "fk_column_id": "c2", "comparison_op": "isWithin", "comparison_sub_op": "pastWeek" }
                    ]
                }
            ]
        }))
        .unwrap();
        let conds = filter.conditions();
        assert_eq!(conds.len(), 2);
        assert_eq!(conds[0].op, ComparisonOp::Eq);
        assert_eq!(conds[1].sub_op, Some(ComparisonSubOp::PastWeek));
        match filter {
            Filter::Group { logical_op, .. } => assert_eq!(logical_op, LogicalOp::Or),
            _ => panic!("expected group"),
        }
    }

    #[test]
    fn unknown_operator_survives_parsing() {
        let filter: Filter = serde_json::from_value(json!({
            "fk_column_id": "c1",
            "comparison_op": "resembles",
            "value": 1
        }))
        .unwrap();
        assert_eq!(
            filter.conditions()[0].op,
            ComparisonOp::Unknown("resembles".into())
        );
    }

    #[test]
    fn condition_requires_column() {
        let err = serde_json::from_value::<Filter>(json!({ "comparison_op": "eq" })).unwrap_err();
        assert!(err.to_string().contains("fk_column_id"));
    }

    #[test]
    fn serializes_back_to_input_shape() {
        let filter = Filter::or(vec![Filter::condition("c1", "like", json!("ab"))]);
        let value = serde_json::to_value(&filter).unwrap();
        assert_eq!(value["children"][0]["comparison_op"], json!("like"));
        let back: Filter = serde_json::from_value(value).unwrap();
        assert_eq!(back, filter);
    }

    #[test]
    fn negative_ops_have_counterparts() {
        assert_eq!(ComparisonOp::Nlike.positive_counterpart(), Some(ComparisonOp::Like));
        assert_eq!(ComparisonOp::Gt.positive_counterpart(), None);
    }
}

//! Date, date-time and time columns, including relative-date sub-operations.

use chrono::{Days, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use super::conditions::{
    apply_negate, missing_value, order_operator, scalar_condition, unsupported,
    unsupported_op_message, values_of, verify_scalar, ORDER_OPS, RANGE_OPS, SCALAR_OPS,
};
use super::{FieldHandler, FilterContext, FilterVerification};
use crate::error::{MetaqueryError, Result};
use crate::models::{Column, ComparisonOp, ComparisonSubOp, FilterCondition};
use crate::sql_ast::{SqlBinaryOperator, SqlExpr};

/// Translates a dayjs-style format (`YYYY-MM-DD HH:mm:ss`) to chrono's strftime syntax.
pub fn dayjs_to_chrono(format: &str) -> String {
    const TOKENS: &[(&str, &str)] = &[
        ("YYYY", "%Y"),
        ("MM", "%m"),
        ("DD", "%d"),
        ("HH", "%H"),
        ("mm", "%M"),
        ("ss", "%S"),
        ("Z", "%:z"),
    ];
    let mut out = String::with_capacity(format.len() * 2);
    let mut rest = format;
    'outer: while !rest.is_empty() {
        for (token, replacement) in TOKENS {
            if let Some(tail) = rest.strip_prefix(token) {
                out.push_str(replacement);
                rest = tail;
                continue 'outer;
            }
        }
        let mut chars = rest.chars();
        if let Some(c) = chars.next() {
            if c == '%' {
                out.push_str("%%");
            } else {
                out.push(c);
            }
        }
        rest = chars.as_str();
    }
    out
}

const DATE_FORMAT: &str = "%Y-%m-%d";
const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATE_OPS: &[ComparisonOp] = &[
    ComparisonOp::Is,
    ComparisonOp::IsNot,
    ComparisonOp::IsWithin,
];

fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();
    NaiveDate::parse_from_str(text, DATE_FORMAT)
        .ok()
        .or_else(|| parse_date_time(text).map(|dt| dt.date()))
}

fn parse_date_time(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    chrono::DateTime::parse_from_rfc3339(text)
        .map(|dt| dt.naive_utc())
        .ok()
        .or_else(|| NaiveDateTime::parse_from_str(text, DATE_TIME_FORMAT).ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S").ok())
        .or_else(|| NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M").ok())
}

/// Relative day offsets are capped so shifting any representable "now" stays in range.
const MAX_DAY_COUNT: u64 = 1_000_000;

fn parse_day_count(text: &str) -> Option<u64> {
    text.trim().parse::<u64>().ok().filter(|n| *n <= MAX_DAY_COUNT)
}

fn date_literal(date: NaiveDate) -> SqlExpr {
    SqlExpr::literal(date.format(DATE_FORMAT).to_string())
}

fn shift_days(date: NaiveDate, days: i64) -> Option<NaiveDate> {
    if days >= 0 {
        date.checked_add_days(Days::new(days.unsigned_abs()))
    } else {
        date.checked_sub_days(Days::new(days.unsigned_abs()))
    }
}

fn shift_months(date: NaiveDate, months: i32) -> Option<NaiveDate> {
    if months >= 0 {
        date.checked_add_months(Months::new(months.unsigned_abs()))
    } else {
        date.checked_sub_months(Months::new(months.unsigned_abs()))
    }
}

fn out_of_range(column: &Column) -> MetaqueryError {
    MetaqueryError::Validation(format!("date for field '{}' is out of range", column.title))
}

/// Single reference date for `eq`/`is`/order comparisons.
fn resolve_date(
    filter: &FilterCondition,
    column: &Column,
    ctx: &FilterContext<'_>,
) -> Result<NaiveDate> {
    let today = ctx.now.date_naive();
    let value = filter.value_str();
    let days = || -> Result<i64> {
        let text = value.clone().ok_or_else(|| missing_value(filter, column))?;
        parse_day_count(&text)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| {
                MetaqueryError::Validation(format!(
                    "'{text}' is not a number of days for field '{}'",
                    column.title
                ))
            })
    };
    let exact = || -> Result<NaiveDate> {
        let text = value.clone().ok_or_else(|| missing_value(filter, column))?;
        parse_date(&text).ok_or_else(|| {
            MetaqueryError::Validation(format!(
                "'{text}' is not a valid date for field '{}'",
                column.title
            ))
        })
    };
    let date = match &filter.sub_op {
        None | Some(ComparisonSubOp::ExactDate) => return exact(),
        Some(ComparisonSubOp::Today) => Some(today),
        Some(ComparisonSubOp::Tomorrow) => shift_days(today, 1),
        Some(ComparisonSubOp::Yesterday) => shift_days(today, -1),
        Some(ComparisonSubOp::OneWeekAgo) => shift_days(today, -7),
        Some(ComparisonSubOp::OneWeekFromNow) => shift_days(today, 7),
        Some(ComparisonSubOp::OneMonthAgo) => shift_months(today, -1),
        Some(ComparisonSubOp::OneMonthFromNow) => shift_months(today, 1),
        Some(ComparisonSubOp::DaysAgo) => shift_days(today, -days()?),
        Some(ComparisonSubOp::DaysFromNow) => shift_days(today, days()?),
        Some(other) => {
            return Err(MetaqueryError::Validation(format!(
                "'{other}' cannot be used with '{}' on field '{}'",
                filter.op, column.title
            )))
        }
    };
    date.ok_or_else(|| out_of_range(column))
}

/// Inclusive `[from, to]` window for `isWithin`.
fn resolve_range(
    filter: &FilterCondition,
    column: &Column,
    ctx: &FilterContext<'_>,
) -> Result<(NaiveDate, NaiveDate)> {
    let today = ctx.now.date_naive();
    let days = || -> Result<i64> {
        filter
            .value_str()
            .as_deref()
            .and_then(parse_day_count)
            .and_then(|n| i64::try_from(n).ok())
            .ok_or_else(|| missing_value(filter, column))
    };
    let range = match &filter.sub_op {
        Some(ComparisonSubOp::PastWeek) => shift_days(today, -7).map(|d| (d, today)),
        Some(ComparisonSubOp::PastMonth) => shift_months(today, -1).map(|d| (d, today)),
        Some(ComparisonSubOp::PastYear) => shift_months(today, -12).map(|d| (d, today)),
        Some(ComparisonSubOp::NextWeek) => shift_days(today, 7).map(|d| (today, d)),
        Some(ComparisonSubOp::NextMonth) => shift_months(today, 1).map(|d| (today, d)),
        Some(ComparisonSubOp::NextYear) => shift_months(today, 12).map(|d| (today, d)),
        Some(ComparisonSubOp::PastNumberOfDays) => shift_days(today, -days()?).map(|d| (d, today)),
        Some(ComparisonSubOp::NextNumberOfDays) => shift_days(today, days()?).map(|d| (today, d)),
        _ => {
            return Err(MetaqueryError::Validation(format!(
                "'isWithin' on field '{}' requires a range sub-operation",
                column.title
            )))
        }
    };
    range.ok_or_else(|| out_of_range(column))
}

fn verify_date(filter: &FilterCondition, column: &Column) -> FilterVerification {
    let allowed = [SCALAR_OPS, ORDER_OPS, RANGE_OPS, DATE_OPS];
    if !allowed.iter().any(|ops| ops.contains(&filter.op)) {
        return FilterVerification::from_errors(vec![unsupported_op_message(column, &filter.op)]);
    }
    if filter.op.ignores_value() {
        return FilterVerification::valid();
    }
    let mut errors = Vec::new();
    if RANGE_OPS.contains(&filter.op) {
        let bounds = values_of(&filter.value);
        if bounds.len() != 2 {
            errors.push(format!(
                "'{}' on field '{}' requires exactly two dates",
                filter.op, column.title
            ));
        }
        errors.extend(bounds.iter().filter(|b| parse_date(b).is_none()).map(|b| {
            format!("'{b}' is not a valid date for field '{}'", column.title)
        }));
        return FilterVerification::from_errors(errors);
    }

    let value = filter.value_str();
    match (&filter.op, &filter.sub_op) {
        (ComparisonOp::IsWithin, Some(sub_op)) if sub_op.is_range() => {}
        (ComparisonOp::IsWithin, _) => errors.push(format!(
            "'isWithin' on field '{}' requires a range sub-operation",
            column.title
        )),
        (_, Some(ComparisonSubOp::Unknown(name))) => errors.push(format!(
            "'{name}' is not a valid sub-operation for field '{}'",
            column.title
        )),
        (op, Some(sub_op)) if sub_op.is_range() => errors.push(format!(
            "'{sub_op}' cannot be used with '{op}' on field '{}'",
            column.title
        )),
        _ => {}
    }
    if !errors.is_empty() {
        return FilterVerification::from_errors(errors);
    }

    match &filter.sub_op {
        Some(
            ComparisonSubOp::DaysAgo
            | ComparisonSubOp::DaysFromNow
            | ComparisonSubOp::PastNumberOfDays
            | ComparisonSubOp::NextNumberOfDays,
        ) => {
            if value.as_deref().and_then(parse_day_count).is_none() {
                errors.push(format!(
                    "'{}' on field '{}' requires a non-negative number of days",
                    filter.sub_op.as_ref().map(|s| s.as_str()).unwrap_or_default(),
                    column.title
                ));
            }
        }
        None | Some(ComparisonSubOp::ExactDate) => match value {
            // `eq`/`neq` without a value mean blank/not blank.
            None if matches!(filter.op, ComparisonOp::Eq | ComparisonOp::Neq | ComparisonOp::Not) => {}
            None => errors.push(format!(
                "'{}' on field '{}' requires a date",
                filter.op, column.title
            )),
            Some(text) if parse_date(&text).is_none() => errors.push(format!(
                "'{text}' is not a valid date for field '{}'",
                column.title
            )),
            Some(_) => {}
        },
        Some(_) => {}
    }
    FilterVerification::from_errors(errors)
}

/// Shared by date and date-time columns. Both compare on the calendar date
/// unless a full timestamp value is given to a date-time column.
fn date_condition(
    filter: &FilterCondition,
    column: &Column,
    field: SqlExpr,
    ctx: &FilterContext<'_>,
    keep_time: bool,
) -> Result<SqlExpr> {
    let day = SqlExpr::DateOf(Box::new(field.clone()));
    let expr = match &filter.op {
        ComparisonOp::Empty | ComparisonOp::Null | ComparisonOp::Blank => SqlExpr::is_null(field),
        ComparisonOp::NotEmpty | ComparisonOp::NotNull | ComparisonOp::NotBlank => {
            SqlExpr::is_not_null(field)
        }
        ComparisonOp::Eq | ComparisonOp::Neq | ComparisonOp::Not
            if matches!(filter.sub_op, None | Some(ComparisonSubOp::ExactDate))
                && filter.value_str().is_none() =>
        {
            if filter.op == ComparisonOp::Eq {
                SqlExpr::is_null(field)
            } else {
                SqlExpr::is_not_null(field)
            }
        }
        ComparisonOp::IsWithin => {
            let (from, to) = resolve_range(filter, column, ctx)?;
            SqlExpr::Between {
                expr: Box::new(day),
                low: Box::new(date_literal(from)),
                high: Box::new(date_literal(to)),
                negated: false,
            }
        }
        ComparisonOp::Btw | ComparisonOp::Nbtw => {
            let bounds: Vec<NaiveDate> = values_of(&filter.value)
                .iter()
                .filter_map(|b| parse_date(b))
                .collect();
            let [from, to] = bounds.as_slice() else {
                return Err(MetaqueryError::Validation(format!(
                    "'{}' on field '{}' requires exactly two dates",
                    filter.op, column.title
                )));
            };
            SqlExpr::Between {
                expr: Box::new(day),
                low: Box::new(date_literal(*from)),
                high: Box::new(date_literal(*to)),
                negated: filter.op == ComparisonOp::Nbtw,
            }
        }
        op => {
            let exact_time = filter
                .value_str()
                .filter(|v| {
                    keep_time
                        && matches!(filter.sub_op, None | Some(ComparisonSubOp::ExactDate))
                        && v.trim().len() > 10
                })
                .and_then(|v| parse_date_time(&v));
            let (lhs, rhs) = match exact_time {
                Some(dt) => (
                    field.clone(),
                    SqlExpr::literal(dt.format(DATE_TIME_FORMAT).to_string()),
                ),
                None => (day, date_literal(resolve_date(filter, column, ctx)?)),
            };
            match op {
                ComparisonOp::Eq | ComparisonOp::Is => SqlExpr::eq(lhs, rhs),
                ComparisonOp::Neq | ComparisonOp::Not | ComparisonOp::IsNot => SqlExpr::or(vec![
                    SqlExpr::binary(SqlBinaryOperator::Neq, lhs, rhs),
                    SqlExpr::is_null(field),
                ]),
                other => {
                    let sql_op = order_operator(other).ok_or_else(|| unsupported(filter, column))?;
                    SqlExpr::binary(sql_op, lhs, rhs)
                }
            }
        }
    };
    Ok(apply_negate(filter, expr))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateHandler;

impl FieldHandler for DateHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        verify_date(filter, column)
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::String(s) => parse_date(s)
                .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
                .unwrap_or_else(|| raw.clone()),
            other => other.clone(),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => parse_date(s)
                .map(|d| Value::String(d.format(DATE_FORMAT).to_string()))
                .ok_or_else(|| {
                    MetaqueryError::Validation(format!(
                        "'{s}' is not a valid date for field '{}'",
                        column.title
                    ))
                }),
            other => Err(MetaqueryError::Validation(format!(
                "value {other} for field '{}' is not a date",
                column.title
            ))),
        }
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        date_condition(filter, column, field, ctx, false)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DateTimeHandler;

impl FieldHandler for DateTimeHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        verify_date(filter, column)
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::String(s) => parse_date_time(s)
                .map(|dt| Value::String(dt.format(DATE_TIME_FORMAT).to_string()))
                .unwrap_or_else(|| raw.clone()),
            other => other.clone(),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => parse_date_time(s)
                .or_else(|| parse_date(s).and_then(|d| d.and_hms_opt(0, 0, 0)))
                .map(|dt| Value::String(dt.format(DATE_TIME_FORMAT).to_string()))
                .ok_or_else(|| {
                    MetaqueryError::Validation(format!(
                        "'{s}' is not a valid date-time for field '{}'",
                        column.title
                    ))
                }),
            other => Err(MetaqueryError::Validation(format!(
                "value {other} for field '{}' is not a date-time",
                column.title
            ))),
        }
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        date_condition(filter, column, field, ctx, true)
    }
}

/// Time-of-day columns. The storage format is dialect specific: MySQL keeps a
/// full `YYYY-MM-DD HH:mm:ss` value anchored at 1999-01-01.
#[derive(Debug, Clone)]
pub struct TimeHandler {
    format: String,
    includes_date: bool,
}

impl TimeHandler {
    pub fn new(dayjs_format: &str) -> Self {
        Self {
            format: dayjs_to_chrono(dayjs_format),
            includes_date: dayjs_format.contains("YYYY"),
        }
    }

    fn parse_time(text: &str) -> Option<NaiveTime> {
        let text = text.trim();
        NaiveTime::parse_from_str(text, "%H:%M:%S")
            .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
            .ok()
            .or_else(|| parse_date_time(text).map(|dt| dt.time()))
    }

    fn to_storage(&self, time: NaiveTime) -> String {
        if self.includes_date {
            let anchor = NaiveDate::from_ymd_opt(1999, 1, 1).unwrap_or_default();
            anchor.and_time(time).format(&self.format).to_string()
        } else {
            time.format(&self.format).to_string()
        }
    }

    fn storage_literal(&self, column: &Column, text: &str) -> Result<SqlExpr> {
        Self::parse_time(text)
            .map(|t| SqlExpr::literal(self.to_storage(t)))
            .ok_or_else(|| {
                MetaqueryError::Validation(format!(
                    "'{text}' is not a valid time for field '{}'",
                    column.title
                ))
            })
    }
}

impl FieldHandler for TimeHandler {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification {
        FilterVerification::from_errors(verify_scalar(
            filter,
            column,
            &[SCALAR_OPS, ORDER_OPS, RANGE_OPS],
            &|v| {
                Self::parse_time(v)
                    .is_none()
                    .then(|| format!("'{v}' is not a valid time for field '{}'", column.title))
            },
        ))
    }

    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        match raw {
            Value::String(s) => Self::parse_time(s)
                .map(|t| Value::String(t.format("%H:%M:%S").to_string()))
                .unwrap_or_else(|| raw.clone()),
            other => other.clone(),
        }
    }

    fn serialize_value(&self, value: &Value, column: &Column) -> Result<Value> {
        match value {
            Value::Null => Ok(Value::Null),
            Value::String(s) if s.trim().is_empty() => Ok(Value::Null),
            Value::String(s) => match self.storage_literal(column, s)? {
                SqlExpr::Literal(v) => Ok(v),
                _ => Ok(Value::Null),
            },
            other => Err(MetaqueryError::Validation(format!(
                "value {other} for field '{}' is not a time",
                column.title
            ))),
        }
    }

    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        _ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr> {
        scalar_condition(filter, column, field, false, &|v| self.storage_literal(column, v))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::models::{Filter, Uidt};
    use crate::sql_ast::SqlRenderer;
    use chrono::TimeZone;
    use serde_json::json;

    fn due() -> Column {
        Column::plain("c1", "m1", "Due", "due", Uidt::Date)
    }

    fn cond(op: &str, sub_op: Option<&str>, value: Value) -> FilterCondition {
        let Filter::Condition(mut filter) = Filter::condition("c1", op, value) else {
            unreachable!()
        };
        filter.sub_op = sub_op.map(|s| s.parse().unwrap_or_else(|never| match never {}));
        filter
    }

    fn ctx(kind: DialectKind) -> FilterContext<'static> {
        let now = chrono::FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
            .unwrap();
        FilterContext::new(kind.dialect()).with_now(now)
    }

    fn render(filter: &FilterCondition, kind: DialectKind) -> String {
        let expr = DateHandler
            .to_sql_condition(filter, &due(), SqlExpr::column("t", "due"), &ctx(kind))
            .unwrap();
        SqlRenderer::new(kind.dialect()).render_expr(&expr)
    }

    #[test]
    fn converts_dayjs_formats() {
        assert_eq!(dayjs_to_chrono("YYYY-MM-DD HH:mm:ss"), "%Y-%m-%d %H:%M:%S");
        assert_eq!(dayjs_to_chrono("HH:mm:ss"), "%H:%M:%S");
        assert_eq!(dayjs_to_chrono("YYYY-MM-DD HH:mm:ssZ"), "%Y-%m-%d %H:%M:%S%:z");
    }

    #[test]
    fn relative_dates_use_injected_now() {
        assert_eq!(
            render(&cond("is", Some("yesterday"), Value::Null), DialectKind::Pg),
            "((\"t\".\"due\")::date = '2024-03-14')"
        );
        assert_eq!(
            render(&cond("gt", Some("daysAgo"), json!(10)), DialectKind::Sqlite3),
            "(date(\"t\".\"due\") > '2024-03-05')"
        );
        assert_eq!(
            render(&cond("isWithin", Some("pastMonth"), Value::Null), DialectKind::Mysql),
            "DATE(`t`.`due`) BETWEEN '2024-02-15' AND '2024-03-15'"
        );
    }

    #[test]
    fn verification_catches_sub_op_misuse() {
        let handler = DateHandler;
        assert!(!handler.verify_filter(&cond("isWithin", Some("today"), Value::Null), &due()).is_valid);
        assert!(!handler.verify_filter(&cond("is", Some("pastWeek"), Value::Null), &due()).is_valid);
        assert!(!handler.verify_filter(&cond("is", Some("daysAgo"), json!("x")), &due()).is_valid);
        assert!(!handler.verify_filter(&cond("eq", None, json!("not a date")), &due()).is_valid);
        assert!(!handler.verify_filter(&cond("like", None, json!("2024")), &due()).is_valid);
        assert!(handler.verify_filter(&cond("eq", Some("exactDate"), json!("2024-01-02")), &due()).is_valid);
        assert!(handler.verify_filter(&cond("isWithin", Some("nextNumberOfDays"), json!(3)), &due()).is_valid);
    }

    #[test]
    fn exact_date_without_value_means_blank() {
        let date_time = Column::plain("c1", "m1", "At", "at", Uidt::DateTime);
        for op in ["eq", "neq", "not"] {
            for value in [Value::Null, json!("")] {
                let filter = cond(op, Some("exactDate"), value);
                assert!(DateHandler.verify_filter(&filter, &due()).is_valid);
                let expected = if op == "eq" { "IS NULL" } else { "IS NOT NULL" };
                for kind in DialectKind::ALL {
                    assert!(render(&filter, kind).ends_with(expected), "{op} on {kind:?}");
                    assert!(DateTimeHandler
                        .to_sql_condition(&filter, &date_time, SqlExpr::column("t", "at"), &ctx(kind))
                        .is_ok());
                }
            }
        }
    }

    #[test]
    fn mysql_time_storage_round_trip() {
        let column = Column::plain("c1", "m1", "Start", "start", Uidt::Time);
        let mysql = TimeHandler::new("YYYY-MM-DD HH:mm:ss");
        let stored = mysql.serialize_value(&json!("08:30:00"), &column).unwrap();
        assert_eq!(stored, json!("1999-01-01 08:30:00"));
        assert_eq!(mysql.parse_value(&stored, &column), json!("08:30:00"));
        assert!(!mysql.verify_filter(&cond("eq", None, json!("25:99")), &column).is_valid);
    }

    #[test]
    fn date_time_exact_timestamp_keeps_time() {
        let column = Column::plain("c1", "m1", "At", "at", Uidt::DateTime);
        let filter = cond("eq", None, json!("2024-03-01 10:00:00"));
        let expr = DateTimeHandler
            .to_sql_condition(&filter, &column, SqlExpr::column("t", "at"), &ctx(DialectKind::Pg))
            .unwrap();
        assert_eq!(
            SqlRenderer::new(DialectKind::Pg.dialect()).render_expr(&expr),
            "(\"t\".\"at\" = '2024-03-01 10:00:00')"
        );
    }
}

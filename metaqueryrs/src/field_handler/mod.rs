//! Per-(uidt, dialect) strategies for filter verification, value conversion,
//! and WHERE-clause generation.
//!
//! Handlers are looked up in a table keyed by `(Uidt, Option<DialectKind>)`.
//! A dialect-specific entry overrides the `(uidt, None)` default, which in turn
//! falls back to the generic text handler.

mod checkbox;
mod computed;
mod conditions;
mod date_time;
mod generic;
mod json;
mod number;
mod select;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, FixedOffset, Utc};
use serde_json::Value;

use crate::dialect::{Dialect, DialectKind};
use crate::error::Result;
use crate::models::{Column, FilterCondition, Uidt};
use crate::sql_ast::SqlExpr;

pub use checkbox::CheckboxHandler;
pub use computed::{formula_filter_uidt, ButtonHandler};
pub use date_time::{dayjs_to_chrono, DateHandler, DateTimeHandler, TimeHandler};
pub use generic::GenericHandler;
pub use json::JsonHandler;
pub use number::{DecimalHandler, NumberHandler};
pub use select::{MultiSelectHandler, SingleSelectHandler};

/// Outcome of verifying one filter condition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterVerification {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl FilterVerification {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    pub fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }
}

/// Per-compilation inputs a handler may need besides the filter itself.
#[derive(Debug, Clone, Copy)]
pub struct FilterContext<'a> {
    pub dialect: &'a dyn Dialect,
    /// Reference instant for relative dates, in the configured timezone.
    pub now: DateTime<FixedOffset>,
}

impl<'a> FilterContext<'a> {
    pub fn new(dialect: &'a dyn Dialect) -> Self {
        Self {
            dialect,
            now: Utc::now().fixed_offset(),
        }
    }

    pub fn with_now(mut self, now: DateTime<FixedOffset>) -> Self {
        self.now = now;
        self
    }
}

pub trait FieldHandler: Send + Sync + fmt::Debug {
    fn verify_filter(&self, filter: &FilterCondition, column: &Column) -> FilterVerification;

    /// Storage value to API value.
    fn parse_value(&self, raw: &Value, _column: &Column) -> Value {
        raw.clone()
    }

    /// API value to storage value.
    fn serialize_value(&self, value: &Value, _column: &Column) -> Result<Value> {
        Ok(value.clone())
    }

    /// WHERE fragment comparing `field` (the column's SQL expression) with the filter.
    /// Callers verify first; this still errors on values it cannot express.
    fn to_sql_condition(
        &self,
        filter: &FilterCondition,
        column: &Column,
        field: SqlExpr,
        ctx: &FilterContext<'_>,
    ) -> Result<SqlExpr>;
}

type HandlerKey = (Uidt, Option<DialectKind>);

#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<HandlerKey, Arc<dyn FieldHandler>>,
    fallback: Arc<dyn FieldHandler>,
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("entries", &self.handlers.len())
            .finish()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl HandlerRegistry {
    /// Empty table; every lookup lands on the generic handler.
    pub fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(GenericHandler),
        }
    }

    pub fn standard() -> Self {
        let mut registry = Self::empty();

        let number: Arc<dyn FieldHandler> = Arc::new(NumberHandler);
        for uidt in [
            Uidt::Number,
            Uidt::Currency,
            Uidt::Percent,
            Uidt::Rating,
            Uidt::Duration,
            Uidt::Year,
            Uidt::AutoNumber,
            Uidt::Rollup,
            Uidt::Links,
        ] {
            registry.register_shared(uidt, None, number.clone());
        }
        registry.register(Uidt::Decimal, None, DecimalHandler::default());
        registry.register(
            Uidt::Decimal,
            Some(DialectKind::Sqlite3),
            DecimalHandler { cast_real: true },
        );

        registry.register(Uidt::Checkbox, None, CheckboxHandler::default());
        for kind in [DialectKind::Sqlite3, DialectKind::Mysql, DialectKind::Mssql] {
            registry.register(Uidt::Checkbox, Some(kind), CheckboxHandler { numeric: true });
        }

        registry.register(Uidt::SingleSelect, None, SingleSelectHandler);
        registry.register(Uidt::MultiSelect, None, MultiSelectHandler);

        registry.register(Uidt::Date, None, DateHandler);
        let date_time: Arc<dyn FieldHandler> = Arc::new(DateTimeHandler);
        for uidt in [Uidt::DateTime, Uidt::CreatedTime, Uidt::LastModifiedTime] {
            registry.register_shared(uidt, None, date_time.clone());
        }
        registry.register(Uidt::Time, None, TimeHandler::new(DialectKind::Pg.dialect().time_format()));
        registry.register(
            Uidt::Time,
            Some(DialectKind::Mysql),
            TimeHandler::new(DialectKind::Mysql.dialect().time_format()),
        );

        registry.register(Uidt::JSON, None, JsonHandler::default());
        registry.register(Uidt::JSON, Some(DialectKind::Pg), JsonHandler { jsonb: true });

        registry.register(Uidt::Button, None, ButtonHandler);
        registry
    }

    pub fn register<H: FieldHandler + 'static>(
        &mut self,
        uidt: Uidt,
        dialect: Option<DialectKind>,
        handler: H,
    ) {
        self.register_shared(uidt, dialect, Arc::new(handler));
    }

    pub fn register_shared(
        &mut self,
        uidt: Uidt,
        dialect: Option<DialectKind>,
        handler: Arc<dyn FieldHandler>,
    ) {
        self.handlers.insert((uidt, dialect), handler);
    }

    /// Exact dialect, then its family, then the uidt default, then generic.
    pub fn handler(&self, uidt: Uidt, dialect: DialectKind) -> &dyn FieldHandler {
        let handler = self
            .handlers
            .get(&(uidt, Some(dialect)))
            .or_else(|| self.handlers.get(&(uidt, Some(dialect.family()))))
            .or_else(|| self.handlers.get(&(uidt, None)))
            .unwrap_or(&self.fallback);
        &**handler
    }

    pub fn handler_for(&self, column: &Column, dialect: DialectKind) -> &dyn FieldHandler {
        self.handler(column.uidt, dialect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ComparisonOp, Filter};
    use serde_json::json;

    fn col(uidt: Uidt) -> Column {
        Column::plain("c1", "m1", "Field", "field", uidt)
    }

    fn cond(op: &str, value: Value) -> FilterCondition {
        match Filter::condition("c1", op, value) {
            Filter::Condition(c) => c,
            Filter::Group { .. } => unreachable!(),
        }
    }

    #[test]
    fn dialect_override_wins_over_default() {
        let registry = HandlerRegistry::standard();
        let column = col(Uidt::Time);
        let raw = json!("2024-03-01 10:20:30");
        let mysql = registry.handler(Uidt::Time, DialectKind::Mysql2);
        assert_eq!(
            mysql.serialize_value(&json!("10:20:30"), &column).unwrap(),
            json!("1999-01-01 10:20:30")
        );
        let pg = registry.handler(Uidt::Time, DialectKind::Pg);
        assert_eq!(pg.serialize_value(&json!("10:20:30"), &column).unwrap(), json!("10:20:30"));
        assert_eq!(pg.parse_value(&raw, &column), json!("10:20:30"));
    }

    #[test]
    fn unknown_uidt_uses_generic() {
        let registry = HandlerRegistry::empty();
        let handler = registry.handler(Uidt::Email, DialectKind::Pg);
        assert!(handler.verify_filter(&cond("like", json!("x")), &col(Uidt::Email)).is_valid);
    }

    #[test]
    fn multi_select_rejects_eq() {
        let registry = HandlerRegistry::standard();
        let handler = registry.handler(Uidt::MultiSelect, DialectKind::Pg);
        let result = handler.verify_filter(&cond("eq", json!("a")), &col(Uidt::MultiSelect));
        assert!(!result.is_valid);
        assert!(handler
            .verify_filter(&cond("anyof", json!("a,b")), &col(Uidt::MultiSelect))
            .is_valid);
    }

    #[test]
    fn every_handler_rejects_unknown_operator() {
        let registry = HandlerRegistry::standard();
        for uidt in Uidt::ALL {
            let handler = registry.handler(uidt, DialectKind::Sqlite3);
            let filter = FilterCondition::new("c1", ComparisonOp::Unknown("near".into()), json!(1));
            assert!(
                !handler.verify_filter(&filter, &col(uidt)).is_valid,
                "{uidt} accepted an unknown operator"
            );
        }
    }

    const OPS: &[&str] = &[
        "eq", "neq", "not", "like", "nlike", "empty", "notempty", "null", "notnull", "blank",
        "notblank", "checked", "notchecked", "allof", "anyof", "nallof", "nanyof", "gt", "lt",
        "gte", "lte", "ge", "le", "in", "btw", "nbtw", "is", "isnot", "isWithin",
    ];

    const SUB_OPS: &[&str] = &[
        "today", "tomorrow", "yesterday", "oneWeekAgo", "oneWeekFromNow", "oneMonthAgo",
        "oneMonthFromNow", "daysAgo", "daysFromNow", "exactDate", "pastWeek", "pastMonth",
        "pastYear", "nextWeek", "nextMonth", "nextYear", "pastNumberOfDays", "nextNumberOfDays",
    ];

    #[test]
    fn accepted_filters_always_compile() {
        use chrono::TimeZone;

        let registry = HandlerRegistry::standard();
        let now = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2024, 3, 15, 12, 0, 0)
            .unwrap();
        let values = [
            Value::Null,
            json!(""),
            json!(3),
            json!(true),
            json!("abc"),
            json!("2024-03-01"),
            json!("2024-03-01 10:20:30"),
            json!("10:20:30"),
            json!("99999999999"),
            json!("1,2"),
            json!("2024-01-01,2024-12-31"),
            json!(["a", "b"]),
            json!({"k": 1}),
        ];
        let sub_ops = std::iter::once(None).chain(SUB_OPS.iter().map(|s| Some(*s)));

        let mut failures = Vec::new();
        for sub_op in sub_ops {
            for op in OPS {
                for value in &values {
                    let mut filter = cond(op, value.clone());
                    filter.sub_op = sub_op.map(|s| s.parse().unwrap_or_else(|never| match never {}));
                    for uidt in Uidt::ALL {
                        let column = col(uidt);
                        for kind in DialectKind::ALL {
                            let handler = registry.handler(uidt, kind);
                            if !handler.verify_filter(&filter, &column).is_valid {
                                continue;
                            }
                            let ctx = FilterContext::new(kind.dialect()).with_now(now);
                            if let Err(err) =
                                handler.to_sql_condition(&filter, &column, SqlExpr::column("t", "field"), &ctx)
                            {
                                failures.push(format!("{kind} {uidt} {op} {sub_op:?} {value}: {err}"));
                            }
                        }
                    }
                }
            }
        }
        assert!(failures.is_empty(), "{} accepted filters failed:\n{}", failures.len(), failures.join("\n"));
    }
}

//! PostgreSQL dialect implementation.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct PostgresDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "length"),
    ("CEILING", "ceil"),
    ("MIN", "least"),
    ("MAX", "greatest"),
    ("SEARCH", "strpos"),
    ("SUBSTR", "substr"),
    ("LOWER", "lower"),
    ("UPPER", "upper"),
    ("TRIM", "trim"),
    ("REPLACE", "replace"),
    ("REPEAT", "repeat"),
    ("ROUND", "round"),
];

impl Dialect for PostgresDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Pg
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        match (token.to_ascii_uppercase().as_str(), args) {
            // round(double precision, int) does not exist
            ("ROUND", [value, digits]) => Some(format!("round(({value})::numeric, {digits})")),
            ("INT", [value]) => Some(format!("trunc(({value})::numeric)::bigint")),
            ("LOG", [value]) => Some(format!("ln({value})")),
            _ => None,
        }
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber => "serial",
            Uidt::ForeignKey | Uidt::Number | Uidt::Rating | Uidt::Year => "bigint",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "varchar",
            Uidt::LongText | Uidt::MultiSelect | Uidt::SingleSelect | Uidt::AIField => "text",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "boolean",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "timestamptz",
            Uidt::Time => "time",
            Uidt::JSON | Uidt::Attachment => "jsonb",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "varchar",
            _ => return None,
        })
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn render_concat(&self, args: &[String]) -> String {
        format!("concat({})", args.join(", "))
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("({expr})::text")
    }

    fn render_cast_numeric(&self, expr: &str) -> String {
        format!("({expr})::numeric")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("({expr})::date")
    }

    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("({expr})::text {not_kw}ILIKE {pattern}")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("COALESCE(json_agg({expr}), '[]'::json)"))
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("string_agg(({expr})::text, ',')")
    }
}

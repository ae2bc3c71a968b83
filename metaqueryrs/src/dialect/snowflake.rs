//! Snowflake dialect.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct SnowflakeDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "LENGTH"),
    ("CEILING", "CEIL"),
    ("MIN", "LEAST"),
    ("MAX", "GREATEST"),
];

impl Dialect for SnowflakeDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Snowflake
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        match (token.to_ascii_uppercase().as_str(), args) {
            ("SEARCH", [source, target]) => Some(format!("POSITION({target}, {source})")),
            ("INT", [value]) => Some(format!("TRUNC({value})")),
            ("LOG", [value]) => Some(format!("LN({value})")),
            _ => None,
        }
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber | Uidt::ForeignKey => "number",
            Uidt::Number | Uidt::Rating | Uidt::Year => "number",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "varchar",
            Uidt::LongText | Uidt::SingleSelect | Uidt::MultiSelect | Uidt::AIField => "text",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "boolean",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "timestamp_tz",
            Uidt::Time => "time",
            Uidt::JSON | Uidt::Attachment => "variant",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "varchar",
            _ => return None,
        })
    }

    fn format_bool(&self, b: bool) -> &'static str {
        helpers::format_bool_literal(b)
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("TO_VARCHAR({expr})")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("TO_DATE({expr})")
    }

    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("{expr} {not_kw}ILIKE {pattern}")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("ARRAY_AGG({expr})"))
    }
}

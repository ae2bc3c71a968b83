//! Databricks (Spark SQL) dialect.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct DatabricksDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "char_length"),
    ("CEILING", "ceil"),
    ("MIN", "least"),
    ("MAX", "greatest"),
];

impl Dialect for DatabricksDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Databricks
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        match (token.to_ascii_uppercase().as_str(), args) {
            ("SEARCH", [source, target]) => Some(format!("locate({target}, {source})")),
            ("INT", [value]) => Some(format!("CAST({value} AS BIGINT)")),
            ("LOG", [value]) => Some(format!("ln({value})")),
            _ => None,
        }
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber | Uidt::ForeignKey => "bigint",
            Uidt::Number | Uidt::Rating | Uidt::Year => "bigint",
            Uidt::SingleLineText
            | Uidt::LongText
            | Uidt::Email
            | Uidt::URL
            | Uidt::PhoneNumber
            | Uidt::SingleSelect
            | Uidt::MultiSelect
            | Uidt::AIField
            | Uidt::Time => "string",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "boolean",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "timestamp",
            Uidt::JSON | Uidt::Attachment => "string",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "string",
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
        format!("CAST({expr} AS STRING)")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("to_date({expr})")
    }

    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("{expr} {not_kw}ILIKE {pattern}")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("to_json(collect_list({expr}))"))
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("array_join(collect_list({expr}), ',')")
    }
}

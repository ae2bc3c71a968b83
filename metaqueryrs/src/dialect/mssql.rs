//! SQL Server dialect.
//!
//! - Bracket identifier quoting
//! - OFFSET FETCH pagination (requires ORDER BY)
//! - No boolean type; bit columns compare against 1/0

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct MssqlDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "LEN"),
    ("SUBSTR", "SUBSTRING"),
    ("MIN", "LEAST"),
    ("MAX", "GREATEST"),
    ("REPEAT", "REPLICATE"),
];

impl Dialect for MssqlDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Mssql
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_bracket(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        if let Some(sql) = helpers::modulo_operator(token, args) {
            return Some(sql);
        }
        match (token.to_ascii_uppercase().as_str(), args) {
            ("SEARCH", [source, target]) => Some(format!("CHARINDEX({target}, {source})")),
            ("SUBSTR", [s, start]) => Some(format!("SUBSTRING({s}, {start}, LEN({s}))")),
            ("LOG", [base, value]) => Some(format!("LOG({value}, {base})")),
            ("INT", [value]) => Some(format!("CAST({value} AS BIGINT)")),
            _ => None,
        }
    }

    fn date_time_format(&self) -> &'static str {
        "YYYY-MM-DD HH:mm:ss"
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber | Uidt::ForeignKey => "int",
            Uidt::Number | Uidt::Rating | Uidt::Year => "bigint",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "nvarchar",
            Uidt::LongText | Uidt::SingleSelect | Uidt::MultiSelect | Uidt::AIField => "ntext",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "bit",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "datetimeoffset",
            Uidt::Time => "time",
            Uidt::JSON | Uidt::Attachment => "nvarchar(max)",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "nvarchar",
            _ => return None,
        })
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        helpers::limit_offset_fetch(limit, offset)
    }

    fn requires_order_by_for_offset(&self) -> bool {
        true
    }

    fn render_concat(&self, args: &[String]) -> String {
        format!("CONCAT({})", args.join(", "))
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS NVARCHAR(MAX))")
    }

    // Default collations are case-insensitive.
    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("{expr} {not_kw}LIKE {pattern}")
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("STRING_AGG(CAST({expr} AS NVARCHAR(MAX)), ',')")
    }

    fn current_timestamp(&self) -> &'static str {
        "SYSDATETIMEOFFSET()"
    }
}

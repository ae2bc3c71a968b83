//! SQLite dialect implementation.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "LENGTH"),
    ("CEILING", "CEIL"),
    ("SEARCH", "INSTR"),
];

impl Dialect for SqliteDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Sqlite3
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_double(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        if let Some(sql) = helpers::left_right_substr(token, args) {
            return Some(sql);
        }
        if let Some(sql) = helpers::modulo_operator(token, args) {
            return Some(sql);
        }
        match (token.to_ascii_uppercase().as_str(), args) {
            ("REPEAT", [s, n]) => Some(format!("replace(hex(zeroblob({n})), '00', {s})")),
            ("INT", [value]) => Some(format!("CAST({value} AS INTEGER)")),
            ("LOG", [value]) => Some(format!("LN({value})")),
            _ => None,
        }
    }

    fn date_time_format(&self) -> &'static str {
        "YYYY-MM-DD HH:mm:ss"
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber | Uidt::ForeignKey => "integer",
            Uidt::Number | Uidt::Rating | Uidt::Year => "bigint",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "varchar",
            Uidt::LongText | Uidt::SingleSelect | Uidt::MultiSelect | Uidt::AIField => "text",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "boolean",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "datetime",
            Uidt::Time => "time",
            Uidt::JSON | Uidt::Attachment => "text",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "varchar",
            _ => return None,
        })
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS TEXT)")
    }

    fn render_cast_numeric(&self, expr: &str) -> String {
        format!("CAST({expr} AS REAL)")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("date({expr})")
    }

    // LIKE is case-insensitive for ASCII.
    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("{expr} {not_kw}LIKE {pattern}")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("json_group_array({expr})"))
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("group_concat({expr})")
    }
}

//! Oracle dialect.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Default, Clone, Copy)]
pub struct OracleDialect;

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "LENGTH"),
    ("CEILING", "CEIL"),
    ("MIN", "LEAST"),
    ("MAX", "GREATEST"),
    ("SEARCH", "INSTR"),
];

impl Dialect for OracleDialect {
    fn kind(&self) -> DialectKind {
        DialectKind::Oracledb
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
        match (token.to_ascii_uppercase().as_str(), args) {
            ("REPEAT", [s, n]) => Some(format!("RPAD({s}, LENGTH({s}) * ({n}), {s})")),
            ("INT", [value]) => Some(format!("TRUNC({value})")),
            ("LOG", [value]) => Some(format!("LN({value})")),
            _ => None,
        }
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber | Uidt::ForeignKey => "integer",
            Uidt::Number | Uidt::Rating | Uidt::Year => "number",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "varchar2",
            Uidt::LongText | Uidt::SingleSelect | Uidt::MultiSelect | Uidt::AIField => "clob",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "number(1)",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "timestamp",
            Uidt::Time => "varchar2",
            Uidt::JSON | Uidt::Attachment => "clob",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "varchar2",
            _ => return None,
        })
    }

    fn render_limit_offset(&self, limit: Option<u64>, offset: Option<u64>) -> String {
        helpers::limit_offset_fetch(limit, offset)
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("TO_CHAR({expr})")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("TRUNC({expr})")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("JSON_ARRAYAGG({expr})"))
    }

    fn current_timestamp(&self) -> &'static str {
        "SYSTIMESTAMP"
    }
}

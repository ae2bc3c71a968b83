//! MySQL dialect, shared by the `mysql` and `mysql2` drivers.

use crate::models::Uidt;

use super::{helpers, Dialect, DialectKind};

#[derive(Debug, Clone, Copy)]
pub struct MysqlDialect {
    kind: DialectKind,
}

impl MysqlDialect {
    pub const fn new(kind: DialectKind) -> Self {
        Self { kind }
    }
}

impl Default for MysqlDialect {
    fn default() -> Self {
        Self::new(DialectKind::Mysql2)
    }
}

const FUNCTIONS: &[(&str, &str)] = &[
    ("LEN", "CHAR_LENGTH"),
    ("MIN", "LEAST"),
    ("MAX", "GREATEST"),
];

impl Dialect for MysqlDialect {
    fn kind(&self) -> DialectKind {
        self.kind
    }

    fn quote_ident(&self, ident: &str) -> String {
        helpers::quote_backtick(ident)
    }

    fn function_overrides(&self) -> &'static [(&'static str, &'static str)] {
        FUNCTIONS
    }

    fn rewrite_call(&self, token: &str, args: &[String]) -> Option<String> {
        match (token.to_ascii_uppercase().as_str(), args) {
            ("SEARCH", [source, target]) => Some(format!("LOCATE({target}, {source})")),
            ("INT", [value]) => Some(format!("CAST({value} AS SIGNED)")),
            ("LOG", [value]) => Some(format!("LN({value})")),
            _ => None,
        }
    }

    /// TIME columns are read and written as full timestamps.
    fn time_format(&self) -> &'static str {
        "YYYY-MM-DD HH:mm:ss"
    }

    fn date_time_format(&self) -> &'static str {
        "YYYY-MM-DD HH:mm:ss"
    }

    fn native_type(&self, uidt: Uidt) -> Option<&'static str> {
        Some(match uidt {
            Uidt::ID | Uidt::AutoNumber => "int unsigned",
            Uidt::ForeignKey => "int unsigned",
            Uidt::Number | Uidt::Rating | Uidt::Year => "bigint",
            Uidt::SingleLineText | Uidt::Email | Uidt::URL | Uidt::PhoneNumber => "varchar",
            Uidt::LongText | Uidt::AIField => "text",
            Uidt::SingleSelect => "enum",
            Uidt::MultiSelect => "set",
            Uidt::Decimal | Uidt::Currency | Uidt::Percent | Uidt::Duration => "decimal",
            Uidt::Checkbox => "tinyint(1)",
            Uidt::Date => "date",
            Uidt::DateTime | Uidt::CreatedTime | Uidt::LastModifiedTime => "datetime",
            Uidt::Time => "time",
            Uidt::JSON | Uidt::Attachment => "json",
            Uidt::User | Uidt::CreatedBy | Uidt::LastModifiedBy => "varchar",
            _ => return None,
        })
    }

    fn render_concat(&self, args: &[String]) -> String {
        format!("CONCAT({})", args.join(", "))
    }

    fn render_cast_text(&self, expr: &str) -> String {
        format!("CAST({expr} AS CHAR)")
    }

    fn render_date_of(&self, expr: &str) -> String {
        format!("DATE({expr})")
    }

    // LIKE is case-insensitive under the default collations.
    fn render_like(&self, expr: &str, pattern: &str, negated: bool) -> String {
        let not_kw = if negated { "NOT " } else { "" };
        format!("{expr} {not_kw}LIKE {pattern}")
    }

    fn render_json_array_agg(&self, expr: &str) -> Option<String> {
        Some(format!("COALESCE(JSON_ARRAYAGG({expr}), JSON_ARRAY())"))
    }

    fn render_group_concat(&self, expr: &str) -> String {
        format!("GROUP_CONCAT({expr})")
    }
}

//! Shared building blocks the dialects compose.

use crate::models::RollupFunction;

/// Quote identifier with double quotes (ANSI style).
/// Used by: Postgres, SQLite, Oracle, Snowflake
pub fn quote_double(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote identifier with backticks.
/// Used by: MySQL, Databricks
pub fn quote_backtick(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

/// Quote identifier with square brackets.
/// Used by: MSSQL
pub fn quote_bracket(ident: &str) -> String {
    format!("[{}]", ident.replace(']', "]]"))
}

pub fn quote_string_single(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

pub fn format_bool_literal(b: bool) -> &'static str {
    if b {
        "true"
    } else {
        "false"
    }
}

pub fn format_bool_numeric(b: bool) -> &'static str {
    if b {
        "1"
    } else {
        "0"
    }
}

/// ` LIMIT n OFFSET m`, with a leading space when non-empty.
pub fn limit_offset_standard(limit: Option<u64>, offset: Option<u64>) -> String {
    let mut sql = String::new();
    if let Some(limit) = limit {
        sql.push_str(&format!(" LIMIT {limit}"));
    }
    if let Some(offset) = offset.filter(|o| *o > 0) {
        sql.push_str(&format!(" OFFSET {offset}"));
    }
    sql
}

/// ` OFFSET m ROWS FETCH NEXT n ROWS ONLY` (MSSQL, Oracle).
pub fn limit_offset_fetch(limit: Option<u64>, offset: Option<u64>) -> String {
    if limit.is_none() && offset.unwrap_or(0) == 0 {
        return String::new();
    }
    let mut sql = format!(" OFFSET {} ROWS", offset.unwrap_or(0));
    if let Some(limit) = limit {
        sql.push_str(&format!(" FETCH NEXT {limit} ROWS ONLY"));
    }
    sql
}

pub fn aggregation_standard(func: RollupFunction, expr: &str) -> String {
    match func {
        RollupFunction::Count => format!("COUNT({expr})"),
        RollupFunction::CountDistinct => format!("COUNT(DISTINCT {expr})"),
        RollupFunction::Min => format!("MIN({expr})"),
        RollupFunction::Max => format!("MAX({expr})"),
        RollupFunction::Avg => format!("AVG({expr})"),
        RollupFunction::Sum => format!("SUM({expr})"),
        RollupFunction::SumDistinct => format!("SUM(DISTINCT {expr})"),
        RollupFunction::AvgDistinct => format!("AVG(DISTINCT {expr})"),
    }
}

/// `MOD(a, b)` as the `%` operator for dialects without a MOD function.
pub fn modulo_operator(token: &str, args: &[String]) -> Option<String> {
    match (token.to_ascii_uppercase().as_str(), args) {
        ("MOD", [a, b]) => Some(format!("({a} % {b})")),
        _ => None,
    }
}

/// LEFT/RIGHT via SUBSTR for dialects that lack them.
pub fn left_right_substr(token: &str, args: &[String]) -> Option<String> {
    match (token.to_ascii_uppercase().as_str(), args) {
        ("LEFT", [s, n]) => Some(format!("SUBSTR({s}, 1, {n})")),
        ("RIGHT", [s, n]) => Some(format!("SUBSTR({s}, -({n}))")),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quoting_escapes_delimiters() {
        assert_eq!(quote_double("a\"b"), "\"a\"\"b\"");
        assert_eq!(quote_backtick("a`b"), "`a``b`");
        assert_eq!(quote_bracket("a]b"), "[a]]b]");
        assert_eq!(quote_string_single("it's"), "'it''s'");
    }

    #[test]
    fn offset_fetch_without_limit() {
        assert_eq!(limit_offset_fetch(None, Some(5)), " OFFSET 5 ROWS");
        assert_eq!(
            limit_offset_fetch(Some(10), None),
            " OFFSET 0 ROWS FETCH NEXT 10 ROWS ONLY"
        );
        assert_eq!(limit_offset_fetch(None, None), "");
    }

    #[test]
    fn standard_limit_skips_zero_offset() {
        assert_eq!(limit_offset_standard(Some(25), Some(0)), " LIMIT 25");
        assert_eq!(limit_offset_standard(Some(25), Some(50)), " LIMIT 25 OFFSET 50");
    }
}

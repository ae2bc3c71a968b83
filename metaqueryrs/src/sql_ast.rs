use serde_json::Value;

use crate::dialect::Dialect;
use crate::models::{RollupFunction, SortDirection};

#[derive(Debug, Clone, PartialEq)]
pub enum SqlExpr {
    Column {
        table: Option<String>,
        name: String,
    },
    Literal(Value),
    /// Generic function token, mapped through the dialect at render time.
    Function {
        name: String,
        args: Vec<SqlExpr>,
    },
    Case {
        branches: Vec<(SqlExpr, SqlExpr)>,
        else_expr: Option<Box<SqlExpr>>,
    },
    BinaryOp {
        op: SqlBinaryOperator,
        left: Box<SqlExpr>,
        right: Box<SqlExpr>,
    },
    /// AND/OR over any number of operands, rendered as one parenthesised group.
    Logical {
        op: LogicalOperator,
        exprs: Vec<SqlExpr>,
    },
    Not(Box<SqlExpr>),
    Negate(Box<SqlExpr>),
    IsNull {
        expr: Box<SqlExpr>,
        negated: bool,
    },
    InList {
        expr: Box<SqlExpr>,
        list: Vec<SqlExpr>,
        negated: bool,
    },
    Between {
        expr: Box<SqlExpr>,
        low: Box<SqlExpr>,
        high: Box<SqlExpr>,
        negated: bool,
    },
    /// Case-insensitive pattern match.
    Like {
        expr: Box<SqlExpr>,
        pattern: Box<SqlExpr>,
        negated: bool,
    },
    Concat(Vec<SqlExpr>),
    CastText(Box<SqlExpr>),
    CastNumeric(Box<SqlExpr>),
    DateOf(Box<SqlExpr>),
    Aggregate {
        func: RollupFunction,
        expr: Box<SqlExpr>,
    },
    CountAll,
    JsonArrayAgg(Box<SqlExpr>),
    GroupConcat(Box<SqlExpr>),
    CurrentTimestamp,
    Subquery(Box<SelectQuery>),
    Exists {
        query: Box<SelectQuery>,
        negated: bool,
    },
    /// Pre-rendered SQL fragment.
    Raw(String),
}

impl SqlExpr {
    pub fn column(table: impl Into<String>, name: impl Into<String>) -> Self {
        SqlExpr::Column {
            table: Some(table.into()),
            name: name.into(),
        }
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        SqlExpr::Literal(value.into())
    }

    pub fn null() -> Self {
        SqlExpr::Literal(Value::Null)
    }

    pub fn binary(op: SqlBinaryOperator, left: SqlExpr, right: SqlExpr) -> Self {
        SqlExpr::BinaryOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn eq(left: SqlExpr, right: SqlExpr) -> Self {
        Self::binary(SqlBinaryOperator::Eq, left, right)
    }

    pub fn is_null(expr: SqlExpr) -> Self {
        SqlExpr::IsNull {
            expr: Box::new(expr),
            negated: false,
        }
    }

    pub fn is_not_null(expr: SqlExpr) -> Self {
        SqlExpr::IsNull {
            expr: Box::new(expr),
            negated: true,
        }
    }

    pub fn and(exprs: Vec<SqlExpr>) -> Self {
        SqlExpr::Logical {
            op: LogicalOperator::And,
            exprs,
        }
    }

    pub fn or(exprs: Vec<SqlExpr>) -> Self {
        SqlExpr::Logical {
            op: LogicalOperator::Or,
            exprs,
        }
    }

    pub fn not(expr: SqlExpr) -> Self {
        SqlExpr::Not(Box::new(expr))
    }

    pub fn function(name: impl Into<String>, args: Vec<SqlExpr>) -> Self {
        SqlExpr::Function {
            name: name.into(),
            args,
        }
    }

    pub fn subquery(query: SelectQuery) -> Self {
        SqlExpr::Subquery(Box::new(query))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlBinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Eq,
    Neq,
    Gt,
    Gte,
    Lt,
    Lte,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SelectItem {
    pub expr: SqlExpr,
    pub alias: Option<String>,
}

impl SelectItem {
    pub fn aliased(expr: SqlExpr, alias: impl Into<String>) -> Self {
        Self {
            expr,
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRef {
    pub name: String,
    pub alias: Option<String>,
}

impl TableRef {
    pub fn new(name: impl Into<String>, alias: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            alias: Some(alias.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlJoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Join {
    pub join_type: SqlJoinType,
    pub table: TableRef,
    pub on: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderItem {
    pub expr: SqlExpr,
    pub direction: SortDirection,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SelectQuery {
    pub select: Vec<SelectItem>,
    pub from: TableRef,
    pub joins: Vec<Join>,
    pub filters: Vec<SqlExpr>,
    pub group_by: Vec<SqlExpr>,
    pub order_by: Vec<OrderItem>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
    pub table: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlExpr>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateStatement {
    pub table: String,
    pub assignments: Vec<(String, SqlExpr)>,
    pub filters: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStatement {
    pub table: String,
    pub filters: Vec<SqlExpr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Select(SelectQuery),
    Insert(InsertStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

pub struct SqlRenderer<'d> {
    dialect: &'d dyn Dialect,
}

impl<'d> SqlRenderer<'d> {
    pub fn new(dialect: &'d dyn Dialect) -> Self {
        Self { dialect }
    }

    pub fn render_statement(&self, statement: &Statement) -> String {
        match statement {
            Statement::Select(query) => self.render_select(query),
            Statement::Insert(insert) => self.render_insert(insert),
            Statement::Update(update) => self.render_update(update),
            Statement::Delete(delete) => self.render_delete(delete),
        }
    }

    pub fn render_select(&self, query: &SelectQuery) -> String {
        let select_items: Vec<String> = query
            .select
            .iter()
            .map(|item| {
                let expr_sql = self.render_expr(&item.expr);
                match &item.alias {
                    Some(alias) => format!("{expr_sql} AS {}", self.dialect.quote_ident(alias)),
                    None => expr_sql,
                }
            })
            .collect();
        let select_list = if select_items.is_empty() {
            "1".to_string()
        } else {
            select_items.join(", ")
        };

        let mut sql = format!(
            "SELECT {} FROM {}",
            select_list,
            self.render_table_ref(&query.from)
        );

        for join in &query.joins {
            let join_kw = match join.join_type {
                SqlJoinType::Inner => "INNER JOIN",
                SqlJoinType::Left => "LEFT JOIN",
            };
            let on_clause: Vec<String> = join.on.iter().map(|e| self.render_expr(e)).collect();
            sql.push_str(&format!(
                " {join_kw} {} ON {}",
                self.render_table_ref(&join.table),
                on_clause.join(" AND ")
            ));
        }

        sql.push_str(&self.render_where(&query.filters));

        if !query.group_by.is_empty() {
            let groups: Vec<String> = query.group_by.iter().map(|g| self.render_expr(g)).collect();
            sql.push_str(&format!(" GROUP BY {}", groups.join(", ")));
        }

        let paginated = query.limit.is_some() || query.offset.unwrap_or(0) > 0;
        if !query.order_by.is_empty() {
            let orders: Vec<String> = query
                .order_by
                .iter()
                .map(|o| {
                    let expr = self.render_expr(&o.expr);
                    let dir = match o.direction {
                        SortDirection::Asc => "ASC",
                        SortDirection::Desc => "DESC",
                    };
                    format!("{expr} {dir}")
                })
                .collect();
            sql.push_str(&format!(" ORDER BY {}", orders.join(", ")));
        } else if paginated && self.dialect.requires_order_by_for_offset() {
            sql.push_str(" ORDER BY (SELECT NULL)");
        }

        sql.push_str(&self.dialect.render_limit_offset(query.limit, query.offset));
        sql
    }

    fn render_insert(&self, insert: &InsertStatement) -> String {
        let columns: Vec<String> = insert
            .columns
            .iter()
            .map(|c| self.dialect.quote_ident(c))
            .collect();
        let rows: Vec<String> = insert
            .rows
            .iter()
            .map(|row| {
                let values: Vec<String> = row.iter().map(|v| self.render_expr(v)).collect();
                format!("({})", values.join(", "))
            })
            .collect();
        format!(
            "INSERT INTO {} ({}) VALUES {}",
            self.dialect.qualify_table(&insert.table),
            columns.join(", "),
            rows.join(", ")
        )
    }

    fn render_update(&self, update: &UpdateStatement) -> String {
        let assignments: Vec<String> = update
            .assignments
            .iter()
            .map(|(col, value)| {
                format!(
                    "{} = {}",
                    self.dialect.quote_ident(col),
                    self.render_expr(value)
                )
            })
            .collect();
        format!(
            "UPDATE {} SET {}{}",
            self.dialect.qualify_table(&update.table),
            assignments.join(", "),
            self.render_where(&update.filters)
        )
    }

    fn render_delete(&self, delete: &DeleteStatement) -> String {
        format!(
            "DELETE FROM {}{}",
            self.dialect.qualify_table(&delete.table),
            self.render_where(&delete.filters)
        )
    }

    fn render_where(&self, filters: &[SqlExpr]) -> String {
        if filters.is_empty() {
            return String::new();
        }
        let filters: Vec<String> = filters.iter().map(|f| self.render_expr(f)).collect();
        format!(" WHERE {}", filters.join(" AND "))
    }

    fn render_table_ref(&self, table: &TableRef) -> String {
        match &table.alias {
            Some(alias) => format!(
                "{} {}",
                self.dialect.qualify_table(&table.name),
                self.dialect.quote_ident(alias)
            ),
            None => self.dialect.qualify_table(&table.name),
        }
    }

    pub fn render_expr(&self, expr: &SqlExpr) -> String {
        match expr {
            SqlExpr::Column { table, name } => match table {
                Some(t) => format!(
                    "{}.{}",
                    self.dialect.quote_ident(t),
                    self.dialect.quote_ident(name)
                ),
                None => self.dialect.quote_ident(name),
            },
            SqlExpr::Literal(v) => self.dialect.render_literal(v),
            SqlExpr::Function { name, args } => {
                let rendered_args: Vec<String> = args.iter().map(|a| self.render_expr(a)).collect();
                self.dialect
                    .rewrite_call(name, &rendered_args)
                    .unwrap_or_else(|| {
                        format!(
                            "{}({})",
                            self.dialect.function_name(name),
                            rendered_args.join(", ")
                        )
                    })
            }
            SqlExpr::Case {
                branches,
                else_expr,
            } => {
                let mut parts = vec!["CASE".to_string()];
                for (when, then) in branches {
                    parts.push(format!(
                        " WHEN {} THEN {}",
                        self.render_expr(when),
                        self.render_expr(then)
                    ));
                }
                if let Some(else_expr) = else_expr {
                    parts.push(format!(" ELSE {}", self.render_expr(else_expr)));
                }
                parts.push(" END".to_string());
                parts.join("")
            }
            SqlExpr::BinaryOp { op, left, right } => {
                let op_sql = match op {
                    SqlBinaryOperator::Add => "+",
                    SqlBinaryOperator::Subtract => "-",
                    SqlBinaryOperator::Multiply => "*",
                    SqlBinaryOperator::Divide => "/",
                    SqlBinaryOperator::Eq => "=",
                    SqlBinaryOperator::Neq => "<>",
                    SqlBinaryOperator::Gt => ">",
                    SqlBinaryOperator::Gte => ">=",
                    SqlBinaryOperator::Lt => "<",
                    SqlBinaryOperator::Lte => "<=",
                };
                format!(
                    "({} {} {})",
                    self.render_expr(left),
                    op_sql,
                    self.render_expr(right)
                )
            }
            SqlExpr::Logical { op, exprs } => match exprs.as_slice() {
                [] => match op {
                    LogicalOperator::And => "(1 = 1)".to_string(),
                    LogicalOperator::Or => "(1 = 0)".to_string(),
                },
                [single] => self.render_expr(single),
                _ => {
                    let joiner = match op {
                        LogicalOperator::And => " AND ",
                        LogicalOperator::Or => " OR ",
                    };
                    let rendered: Vec<String> = exprs.iter().map(|e| self.render_expr(e)).collect();
                    format!("({})", rendered.join(joiner))
                }
            },
            SqlExpr::Not(inner) => format!("NOT ({})", self.render_expr(inner)),
            SqlExpr::Negate(inner) => format!("(-{})", self.render_expr(inner)),
            SqlExpr::IsNull { expr, negated } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!("{} IS {not_kw}NULL", self.render_expr(expr))
            }
            SqlExpr::InList {
                expr,
                list,
                negated,
            } => {
                let not_kw = if *negated { "NOT " } else { "" };
                if list.is_empty() {
                    // IN () is invalid SQL; an empty list matches nothing.
                    return if *negated {
                        "(1 = 1)".to_string()
                    } else {
                        "(1 = 0)".to_string()
                    };
                }
                let rendered_values: Vec<String> =
                    list.iter().map(|v| self.render_expr(v)).collect();
                format!(
                    "{} {}IN ({})",
                    self.render_expr(expr),
                    not_kw,
                    rendered_values.join(", ")
                )
            }
            SqlExpr::Between {
                expr,
                low,
                high,
                negated,
            } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!(
                    "{} {not_kw}BETWEEN {} AND {}",
                    self.render_expr(expr),
                    self.render_expr(low),
                    self.render_expr(high)
                )
            }
            SqlExpr::Like {
                expr,
                pattern,
                negated,
            } => self.dialect.render_like(
                &self.render_expr(expr),
                &self.render_expr(pattern),
                *negated,
            ),
            SqlExpr::Concat(parts) => {
                let rendered: Vec<String> = parts.iter().map(|p| self.render_expr(p)).collect();
                self.dialect.render_concat(&rendered)
            }
            SqlExpr::CastText(inner) => self.dialect.render_cast_text(&self.render_expr(inner)),
            SqlExpr::CastNumeric(inner) => {
                self.dialect.render_cast_numeric(&self.render_expr(inner))
            }
            SqlExpr::DateOf(inner) => self.dialect.render_date_of(&self.render_expr(inner)),
            SqlExpr::Aggregate { func, expr } => self
                .dialect
                .render_aggregation(*func, &self.render_expr(expr)),
            SqlExpr::CountAll => "COUNT(*)".to_string(),
            SqlExpr::JsonArrayAgg(inner) => {
                let rendered = self.render_expr(inner);
                self.dialect
                    .render_json_array_agg(&rendered)
                    .unwrap_or_else(|| self.dialect.render_group_concat(&rendered))
            }
            SqlExpr::GroupConcat(inner) => {
                self.dialect.render_group_concat(&self.render_expr(inner))
            }
            SqlExpr::CurrentTimestamp => self.dialect.current_timestamp().to_string(),
            SqlExpr::Subquery(query) => format!("({})", self.render_select(query)),
            SqlExpr::Exists { query, negated } => {
                let not_kw = if *negated { "NOT " } else { "" };
                format!("{not_kw}EXISTS ({})", self.render_select(query))
            }
            SqlExpr::Raw(sql) => sql.clone(),
        }
    }
}

//! Lowering of formula trees into dialect-neutral [`SqlExpr`]s.

use serde_json::{Number, Value};

use super::functions::{lookup_function, FormulaType};
use super::parser::{BinaryOp, FormulaAst, UnaryOp};
use super::FormulaError;
use crate::models::{ColOptions, Column, Model, RollupFunction, Uidt};
use crate::sql_ast::{SqlBinaryOperator, SqlExpr};

/// Supplies SQL for column references the formula layer cannot build itself:
/// stored columns, lookups, rollups, and relation counts.
pub trait ColumnResolver {
    /// `aggregate` is set when the reference sits directly inside an
    /// aggregating function (`AVG({Orders})`) and the column yields many values.
    fn resolve_column(
        &self,
        column: &Column,
        aggregate: Option<RollupFunction>,
    ) -> Result<SqlExpr, FormulaError>;

    fn primary_key(&self) -> Result<SqlExpr, FormulaError>;
}

pub struct FormulaCompiler<'a> {
    model: &'a Model,
    resolver: &'a dyn ColumnResolver,
}

impl<'a> FormulaCompiler<'a> {
    pub fn new(model: &'a Model, resolver: &'a dyn ColumnResolver) -> Self {
        Self { model, resolver }
    }

    pub fn compile(&self, ast: &FormulaAst) -> Result<SqlExpr, FormulaError> {
        self.lower(ast, &mut Vec::new(), None)
    }

    /// Compiles a formula column, reporting a stored parse error if there is one.
    pub fn compile_column(&self, column: &Column) -> Result<SqlExpr, FormulaError> {
        let mut stack = vec![column.id.clone()];
        self.lower_formula_column(column, &mut stack)
    }

    pub fn infer_type(&self, ast: &FormulaAst) -> FormulaType {
        self.infer(ast, &mut Vec::new())
    }

    fn lookup(&self, name: &str) -> Result<&'a Column, FormulaError> {
        self.model
            .column_by_title(name)
            .or_else(|| self.model.column(name))
            .ok_or_else(|| FormulaError::UnknownIdentifier(name.to_string()))
    }

    fn lower_formula_column(
        &self,
        column: &Column,
        stack: &mut Vec<String>,
    ) -> Result<SqlExpr, FormulaError> {
        let ColOptions::Formula(opts) = &column.options else {
            return Err(FormulaError::Unsupported(format!(
                "column '{}' is not a formula",
                column.title
            )));
        };
        if let Some(error) = &opts.error {
            return Err(FormulaError::Unsupported(format!(
                "formula '{}' is invalid: {error}",
                column.title
            )));
        }
        let ast = opts.parsed.as_ref().ok_or_else(|| {
            FormulaError::Unsupported(format!("formula '{}' has not been parsed", column.title))
        })?;
        self.lower(ast, stack, None)
    }

    fn lower_identifier(
        &self,
        name: &str,
        stack: &mut Vec<String>,
        aggregate: Option<RollupFunction>,
    ) -> Result<SqlExpr, FormulaError> {
        let column = self.lookup(name)?;
        if column.uidt != Uidt::Formula {
            return self.resolver.resolve_column(column, aggregate);
        }
        if stack.contains(&column.id) {
            return Err(FormulaError::CircularReference(column.title.clone()));
        }
        stack.push(column.id.clone());
        let lowered = self.lower_formula_column(column, stack);
        stack.pop();
        lowered
    }

    fn lower(
        &self,
        ast: &FormulaAst,
        stack: &mut Vec<String>,
        aggregate: Option<RollupFunction>,
    ) -> Result<SqlExpr, FormulaError> {
        match ast {
            FormulaAst::Identifier(name) => self.lower_identifier(name, stack, aggregate),
            FormulaAst::Literal(value) => Ok(SqlExpr::Literal(value.clone())),
            FormulaAst::Unary { op, operand } => {
                let inner = self.lower(operand, stack, None)?;
                Ok(match op {
                    UnaryOp::Neg => SqlExpr::Negate(Box::new(inner)),
                    UnaryOp::Plus => inner,
                })
            }
            FormulaAst::Binary { op, left, right } => {
                let l = self.lower(left, stack, None)?;
                let r = self.lower(right, stack, None)?;
                Ok(match op {
                    BinaryOp::Concat => SqlExpr::Concat(vec![l, r]),
                    other => SqlExpr::binary(binary_operator(*other), l, r),
                })
            }
            FormulaAst::Call { name, args } => self.lower_call(name, args, stack),
        }
    }

    fn lower_args(
        &self,
        args: &[FormulaAst],
        stack: &mut Vec<String>,
        aggregate: Option<RollupFunction>,
    ) -> Result<Vec<SqlExpr>, FormulaError> {
        args.iter()
            .map(|arg| self.lower(arg, stack, aggregate))
            .collect()
    }

    fn lower_condition(
        &self,
        ast: &FormulaAst,
        stack: &mut Vec<String>,
    ) -> Result<SqlExpr, FormulaError> {
        let ty = self.infer(ast, &mut stack.clone());
        let expr = self.lower(ast, stack, None)?;
        Ok(truthy(expr, ty))
    }

    fn lower_call(
        &self,
        name: &str,
        args: &[FormulaAst],
        stack: &mut Vec<String>,
    ) -> Result<SqlExpr, FormulaError> {
        lookup_function(name, args.len())?;
        let hint = aggregate_hint(name);
        match name {
            "ADD" => {
                let lowered = self.lower_args(args, stack, hint)?;
                Ok(fold_binary(SqlBinaryOperator::Add, lowered))
            }
            "AVG" => {
                let count = args.len() as i64;
                let lowered = self.lower_args(args, stack, hint)?;
                if count == 1 {
                    return Ok(first(lowered));
                }
                Ok(SqlExpr::binary(
                    SqlBinaryOperator::Divide,
                    fold_binary(SqlBinaryOperator::Add, lowered),
                    SqlExpr::literal(count),
                ))
            }
            "MIN" | "MAX" | "COUNT" if args.len() == 1 => {
                Ok(first(self.lower_args(args, stack, hint)?))
            }
            "COUNT" => {
                let lowered = self.lower_args(args, stack, None)?;
                let indicators = lowered
                    .into_iter()
                    .map(|expr| indicator(SqlExpr::is_not_null(expr)))
                    .collect();
                Ok(fold_binary(SqlBinaryOperator::Add, indicators))
            }
            "CONCAT" => Ok(SqlExpr::Concat(self.lower_args(args, stack, None)?)),
            "MID" => Ok(SqlExpr::function(
                "SUBSTR",
                self.lower_args(args, stack, None)?,
            )),
            "IF" => {
                let condition = self.lower_condition(&args[0], stack)?;
                let then = self.lower(&args[1], stack, None)?;
                let else_expr = match args.get(2) {
                    Some(arg) => self.lower(arg, stack, None)?,
                    None => SqlExpr::null(),
                };
                Ok(SqlExpr::Case {
                    branches: vec![(condition, then)],
                    else_expr: Some(Box::new(else_expr)),
                })
            }
            "SWITCH" => {
                let subject = self.lower(&args[0], stack, None)?;
                let rest = self.lower_args(&args[1..], stack, None)?;
                let mut pairs = rest.chunks_exact(2);
                let branches = pairs
                    .by_ref()
                    .map(|pair| (SqlExpr::eq(subject.clone(), pair[0].clone()), pair[1].clone()))
                    .collect();
                let default = pairs.remainder().first().cloned().unwrap_or_else(SqlExpr::null);
                Ok(SqlExpr::Case {
                    branches,
                    else_expr: Some(Box::new(default)),
                })
            }
            "AND" | "OR" => {
                let conditions = args
                    .iter()
                    .map(|arg| self.lower_condition(arg, stack))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(if name == "AND" {
                    SqlExpr::and(conditions)
                } else {
                    SqlExpr::or(conditions)
                })
            }
            "NOT" => Ok(SqlExpr::not(self.lower_condition(&args[0], stack)?)),
            "XOR" => {
                let indicators = args
                    .iter()
                    .map(|arg| self.lower_condition(arg, stack).map(indicator))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(SqlExpr::eq(
                    SqlExpr::function(
                        "MOD",
                        vec![fold_binary(SqlBinaryOperator::Add, indicators), SqlExpr::literal(2)],
                    ),
                    SqlExpr::literal(1),
                ))
            }
            "ISBLANK" => {
                let expr = self.lower(&args[0], stack, None)?;
                Ok(SqlExpr::or(vec![
                    SqlExpr::is_null(expr.clone()),
                    SqlExpr::eq(SqlExpr::CastText(Box::new(expr)), SqlExpr::literal("")),
                ]))
            }
            "ISNOTBLANK" => {
                let expr = self.lower(&args[0], stack, None)?;
                Ok(SqlExpr::and(vec![
                    SqlExpr::is_not_null(expr.clone()),
                    SqlExpr::binary(
                        SqlBinaryOperator::Neq,
                        SqlExpr::CastText(Box::new(expr)),
                        SqlExpr::literal(""),
                    ),
                ]))
            }
            "BLANK" => Ok(SqlExpr::null()),
            "TRUE" => Ok(SqlExpr::literal(true)),
            "FALSE" => Ok(SqlExpr::literal(false)),
            "NOW" => Ok(SqlExpr::CurrentTimestamp),
            "RECORD_ID" => self.resolver.primary_key(),
            "EVEN" | "ODD" => {
                let x = first(self.lower_args(args, stack, None)?);
                Ok(round_to_parity(x, name == "ODD"))
            }
            _ => Ok(SqlExpr::function(
                name,
                self.lower_args(args, stack, None)?,
            )),
        }
    }

    fn infer(&self, ast: &FormulaAst, stack: &mut Vec<String>) -> FormulaType {
        match ast {
            FormulaAst::Literal(Value::Number(_)) => FormulaType::Numeric,
            FormulaAst::Literal(Value::String(_)) => FormulaType::String,
            FormulaAst::Literal(Value::Bool(_)) => FormulaType::Boolean,
            FormulaAst::Literal(_) => FormulaType::Unknown,
            FormulaAst::Unary { .. } => FormulaType::Numeric,
            FormulaAst::Binary { op, .. } => match op {
                BinaryOp::Concat => FormulaType::String,
                op if op.is_comparison() => FormulaType::Boolean,
                _ => FormulaType::Numeric,
            },
            FormulaAst::Identifier(name) => {
                let Ok(column) = self.lookup(name) else {
                    return FormulaType::Unknown;
                };
                match (&column.options, column.uidt) {
                    (ColOptions::Formula(opts), _) => {
                        if stack.contains(&column.id) {
                            return FormulaType::Unknown;
                        }
                        let Some(parsed) = &opts.parsed else {
                            return FormulaType::Unknown;
                        };
                        stack.push(column.id.clone());
                        let ty = self.infer(parsed, stack);
                        stack.pop();
                        ty
                    }
                    (_, Uidt::Checkbox) => FormulaType::Boolean,
                    (_, Uidt::Lookup) => FormulaType::Unknown,
                    (_, uidt) if uidt.is_numeric() => FormulaType::Numeric,
                    (_, uidt) if uidt.is_date_like() => FormulaType::Date,
                    _ => FormulaType::String,
                }
            }
            FormulaAst::Call { name, args } => match name.as_str() {
                "IF" => args
                    .get(1)
                    .map(|a| self.infer(a, stack))
                    .unwrap_or(FormulaType::Unknown),
                "SWITCH" => args
                    .get(2)
                    .map(|a| self.infer(a, stack))
                    .unwrap_or(FormulaType::Unknown),
                _ => lookup_function(name, args.len())
                    .map(|spec| spec.returns)
                    .unwrap_or(FormulaType::Unknown),
            },
        }
    }
}

fn binary_operator(op: BinaryOp) -> SqlBinaryOperator {
    match op {
        BinaryOp::Add => SqlBinaryOperator::Add,
        BinaryOp::Sub => SqlBinaryOperator::Subtract,
        BinaryOp::Mul => SqlBinaryOperator::Multiply,
        BinaryOp::Div => SqlBinaryOperator::Divide,
        BinaryOp::Eq => SqlBinaryOperator::Eq,
        BinaryOp::Neq => SqlBinaryOperator::Neq,
        BinaryOp::Lt => SqlBinaryOperator::Lt,
        BinaryOp::Lte => SqlBinaryOperator::Lte,
        BinaryOp::Gt => SqlBinaryOperator::Gt,
        BinaryOp::Gte => SqlBinaryOperator::Gte,
        // `&` is lowered to Concat before this is reached.
        BinaryOp::Concat => SqlBinaryOperator::Add,
    }
}

fn aggregate_hint(function: &str) -> Option<RollupFunction> {
    match function {
        "ADD" => Some(RollupFunction::Sum),
        "AVG" => Some(RollupFunction::Avg),
        "MIN" => Some(RollupFunction::Min),
        "MAX" => Some(RollupFunction::Max),
        "COUNT" => Some(RollupFunction::Count),
        _ => None,
    }
}

fn first(mut exprs: Vec<SqlExpr>) -> SqlExpr {
    if exprs.is_empty() {
        SqlExpr::null()
    } else {
        exprs.swap_remove(0)
    }
}

fn fold_binary(op: SqlBinaryOperator, exprs: Vec<SqlExpr>) -> SqlExpr {
    let mut iter = exprs.into_iter();
    match iter.next() {
        Some(head) => iter.fold(head, |acc, next| SqlExpr::binary(op, acc, next)),
        None => SqlExpr::null(),
    }
}

/// `CASE WHEN cond THEN 1 ELSE 0 END`
fn indicator(condition: SqlExpr) -> SqlExpr {
    SqlExpr::Case {
        branches: vec![(condition, SqlExpr::literal(1))],
        else_expr: Some(Box::new(SqlExpr::literal(0))),
    }
}

/// Coerces a non-boolean expression into a predicate.
fn truthy(expr: SqlExpr, ty: FormulaType) -> SqlExpr {
    match ty {
        FormulaType::Boolean => expr,
        FormulaType::Numeric => SqlExpr::and(vec![
            SqlExpr::is_not_null(expr.clone()),
            SqlExpr::binary(SqlBinaryOperator::Neq, expr, SqlExpr::literal(0)),
        ]),
        FormulaType::String => SqlExpr::and(vec![
            SqlExpr::is_not_null(expr.clone()),
            SqlExpr::binary(SqlBinaryOperator::Neq, expr, SqlExpr::literal("")),
        ]),
        FormulaType::Date | FormulaType::Unknown => SqlExpr::is_not_null(expr),
    }
}

/// Rounds away from zero to the nearest even (or odd) integer.
fn round_to_parity(x: SqlExpr, odd: bool) -> SqlExpr {
    let two = SqlExpr::Literal(Value::Number(
        Number::from_f64(2.0).unwrap_or_else(|| Number::from(2)),
    ));
    let one = SqlExpr::literal(1);
    let shifted = |op| {
        if odd {
            SqlExpr::binary(op, x.clone(), one.clone())
        } else {
            x.clone()
        }
    };
    let scaled = |func: &str, inner: SqlExpr| {
        SqlExpr::binary(
            SqlBinaryOperator::Multiply,
            SqlExpr::function(
                func,
                vec![SqlExpr::binary(SqlBinaryOperator::Divide, inner, two.clone())],
            ),
            SqlExpr::literal(2),
        )
    };
    let positive = scaled("CEILING", shifted(SqlBinaryOperator::Subtract));
    let negative = scaled("FLOOR", shifted(SqlBinaryOperator::Add));
    let (positive, negative) = if odd {
        (
            SqlExpr::binary(SqlBinaryOperator::Add, positive, one.clone()),
            SqlExpr::binary(SqlBinaryOperator::Subtract, negative, one.clone()),
        )
    } else {
        (positive, negative)
    };
    SqlExpr::Case {
        branches: vec![(
            SqlExpr::binary(SqlBinaryOperator::Gte, x.clone(), SqlExpr::literal(0)),
            positive,
        )],
        else_expr: Some(Box::new(negative)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::DialectKind;
    use crate::formula::parse_formula;
    use crate::models::{FormulaOptions, TableMeta};
    use crate::sql_ast::SqlRenderer;

    struct Stored;

    impl ColumnResolver for Stored {
        fn resolve_column(
            &self,
            column: &Column,
            aggregate: Option<RollupFunction>,
        ) -> Result<SqlExpr, FormulaError> {
            let col = SqlExpr::column("t", column.column_name.clone());
            Ok(match (column.uidt, aggregate) {
                (Uidt::Rollup, Some(func)) => SqlExpr::Aggregate {
                    func,
                    expr: Box::new(col),
                },
                _ => col,
            })
        }

        fn primary_key(&self) -> Result<SqlExpr, FormulaError> {
            Ok(SqlExpr::column("t", "id"))
        }
    }

    fn formula(id: &str, title: &str, text: &str) -> Column {
        Column::plain(id, "m1", title, title, Uidt::Formula)
            .with_options(ColOptions::Formula(FormulaOptions::new(text)))
    }

    fn model(extra: Vec<Column>) -> Model {
        let mut columns = vec![
            Column::plain("c_id", "m1", "Id", "id", Uidt::ID).primary(),
            Column::plain("c_price", "m1", "Price", "price", Uidt::Decimal),
            Column::plain("c_qty", "m1", "Qty", "qty", Uidt::Number),
            Column::plain("c_name", "m1", "Name", "name", Uidt::SingleLineText),
        ];
        columns.extend(extra);
        Model::new(
            TableMeta {
                id: "m1".into(),
                base_id: "b1".into(),
                title: "Items".into(),
                table_name: "items".into(),
            },
            columns,
        )
    }

    fn render(model: &Model, text: &str, kind: DialectKind) -> Result<String, FormulaError> {
        let ast = parse_formula(text)?;
        let expr = FormulaCompiler::new(model, &Stored).compile(&ast)?;
        Ok(SqlRenderer::new(kind.dialect()).render_expr(&expr))
    }

    #[test]
    fn arithmetic_over_columns() {
        let m = model(vec![]);
        assert_eq!(
            render(&m, "{Price} * {Qty}", DialectKind::Pg).unwrap(),
            "(\"t\".\"price\" * \"t\".\"qty\")"
        );
    }

    #[test]
    fn len_uses_dialect_function_name() {
        let m = model(vec![]);
        assert_eq!(
            render(&m, "LEN({Name})", DialectKind::Mysql2).unwrap(),
            "CHAR_LENGTH(`t`.`name`)"
        );
    }

    #[test]
    fn if_wraps_numeric_condition() {
        let m = model(vec![]);
        let sql = render(&m, "IF({Qty}, \"some\", \"none\")", DialectKind::Sqlite3).unwrap();
        assert_eq!(
            sql,
            "CASE WHEN (\"t\".\"qty\" IS NOT NULL AND (\"t\".\"qty\" <> 0)) THEN 'some' ELSE 'none' END"
        );
    }

    #[test]
    fn nested_formula_columns_inline() {
        let m = model(vec![formula("c_total", "Total", "{Price} * {Qty}")]);
        assert_eq!(
            render(&m, "{Total} + 1", DialectKind::Pg).unwrap(),
            "((\"t\".\"price\" * \"t\".\"qty\") + 1)"
        );
    }

    #[test]
    fn detects_cycles() {
        let m = model(vec![
            formula("c_a", "A", "{B} + 1"),
            formula("c_b", "B", "{A} + 1"),
        ]);
        let err = FormulaCompiler::new(&m, &Stored)
            .compile_column(m.column("c_a").unwrap())
            .unwrap_err();
        assert_eq!(err, FormulaError::CircularReference("A".into()));
    }

    #[test]
    fn unknown_field_is_reported() {
        let m = model(vec![]);
        assert_eq!(
            render(&m, "{Missing} + 1", DialectKind::Pg).unwrap_err(),
            FormulaError::UnknownIdentifier("Missing".into())
        );
    }

    #[test]
    fn aggregate_hint_reaches_resolver() {
        let mut rollup = Column::plain("c_r", "m1", "Amounts", "amounts", Uidt::Rollup);
        rollup.options = ColOptions::Plain;
        let m = model(vec![rollup]);
        assert_eq!(
            render(&m, "AVG({Amounts})", DialectKind::Pg).unwrap(),
            "AVG(\"t\".\"amounts\")"
        );
    }

    #[test]
    fn infers_types() {
        let m = model(vec![formula("c_total", "Total", "{Price} * {Qty}")]);
        let compiler = FormulaCompiler::new(&m, &Stored);
        let ty = |text: &str| compiler.infer_type(&parse_formula(text).unwrap());
        assert_eq!(ty("{Total}"), FormulaType::Numeric);
        assert_eq!(ty("{Name} & \"x\""), FormulaType::String);
        assert_eq!(ty("{Qty} > 1"), FormulaType::Boolean);
        assert_eq!(ty("IF({Qty} > 1, {Name}, \"\")"), FormulaType::String);
        assert_eq!(ty("NOW()"), FormulaType::Date);
    }

    #[test]
    fn record_id_uses_primary_key() {
        let m = model(vec![]);
        assert_eq!(
            render(&m, "RECORD_ID()", DialectKind::Pg).unwrap(),
            "\"t\".\"id\""
        );
    }
}

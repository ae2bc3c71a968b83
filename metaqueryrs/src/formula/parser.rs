//! Formula AST, precedence-climbing parser, and canonical re-serialization.

use std::fmt;

use serde_json::Value;

use super::lexer::{tokenize, Spanned, Token};
use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Concat,
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl BinaryOp {
    fn precedence(&self) -> u8 {
        match self {
            BinaryOp::Eq
            | BinaryOp::Neq
            | BinaryOp::Lt
            | BinaryOp::Lte
            | BinaryOp::Gt
            | BinaryOp::Gte => 1,
            BinaryOp::Concat => 2,
            BinaryOp::Add | BinaryOp::Sub => 3,
            BinaryOp::Mul | BinaryOp::Div => 4,
        }
    }

    fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Concat => "&",
            BinaryOp::Eq => "=",
            BinaryOp::Neq => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Lte => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Gte => ">=",
        }
    }

    fn from_symbol(symbol: &str) -> Option<Self> {
        Some(match symbol {
            "+" => BinaryOp::Add,
            "-" => BinaryOp::Sub,
            "*" => BinaryOp::Mul,
            "/" => BinaryOp::Div,
            "&" => BinaryOp::Concat,
            "=" | "==" => BinaryOp::Eq,
            "!=" | "<>" => BinaryOp::Neq,
            "<" => BinaryOp::Lt,
            "<=" => BinaryOp::Lte,
            ">" => BinaryOp::Gt,
            ">=" => BinaryOp::Gte,
            _ => return None,
        })
    }

    pub fn is_comparison(&self) -> bool {
        self.precedence() == 1
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Neg,
    Plus,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FormulaAst {
    /// Reference to a column by title.
    Identifier(String),
    /// String or number literal.
    Literal(Value),
    Binary {
        op: BinaryOp,
        left: Box<FormulaAst>,
        right: Box<FormulaAst>,
    },
    Unary {
        op: UnaryOp,
        operand: Box<FormulaAst>,
    },
    Call {
        name: String,
        args: Vec<FormulaAst>,
    },
}

impl FormulaAst {
    /// Titles referenced anywhere in the expression, in order of appearance.
    pub fn identifiers(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.walk(&mut |node| {
            if let FormulaAst::Identifier(name) = node {
                out.push(name.as_str());
            }
        });
        out
    }

    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a FormulaAst)) {
        f(self);
        match self {
            FormulaAst::Binary { left, right, .. } => {
                left.walk(f);
                right.walk(f);
            }
            FormulaAst::Unary { operand, .. } => operand.walk(f),
            FormulaAst::Call { args, .. } => {
                for arg in args {
                    arg.walk(f);
                }
            }
            FormulaAst::Identifier(_) | FormulaAst::Literal(_) => {}
        }
    }
}

pub fn parse_formula(input: &str) -> Result<FormulaAst, FormulaError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let ast = parser.parse_expr(0)?;
    match parser.peek() {
        Token::Eof => Ok(ast),
        other => Err(FormulaError::syntax(
            parser.position(),
            format!("unexpected {}", describe(other)),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        self.tokens
            .get(self.pos)
            .map(|s| &s.token)
            .unwrap_or(&Token::Eof)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.position).unwrap_or(0)
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn parse_expr(&mut self, min_precedence: u8) -> Result<FormulaAst, FormulaError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Token::Op(symbol) => match BinaryOp::from_symbol(symbol) {
                    Some(op) if op.precedence() > min_precedence => op,
                    _ => break,
                },
                _ => break,
            };
            self.advance();
            let right = self.parse_expr(op.precedence())?;
            left = FormulaAst::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<FormulaAst, FormulaError> {
        let op = match self.peek() {
            Token::Op("-") => Some(UnaryOp::Neg),
            Token::Op("+") => Some(UnaryOp::Plus),
            _ => None,
        };
        match op {
            Some(op) => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(FormulaAst::Unary {
                    op,
                    operand: Box::new(operand),
                })
            }
            None => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<FormulaAst, FormulaError> {
        let position = self.position();
        match self.advance() {
            Token::Field(name) => Ok(FormulaAst::Identifier(name)),
            Token::Number(n) => Ok(FormulaAst::Literal(Value::Number(n))),
            Token::Str(s) => Ok(FormulaAst::Literal(Value::String(s))),
            Token::LParen => {
                let inner = self.parse_expr(0)?;
                self.expect_rparen()?;
                Ok(inner)
            }
            Token::Word(word) => {
                if matches!(self.peek(), Token::LParen) {
                    self.advance();
                    let args = self.parse_args()?;
                    Ok(FormulaAst::Call {
                        name: word.to_ascii_uppercase(),
                        args,
                    })
                } else {
                    Ok(FormulaAst::Identifier(word))
                }
            }
            other => Err(FormulaError::syntax(
                position,
                format!("unexpected {}", describe(&other)),
            )),
        }
    }

    fn parse_args(&mut self) -> Result<Vec<FormulaAst>, FormulaError> {
        let mut args = Vec::new();
        if matches!(self.peek(), Token::RParen) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(0)?);
            match self.advance() {
                Token::Comma => continue,
                Token::RParen => return Ok(args),
                other => {
                    return Err(FormulaError::syntax(
                        self.position(),
                        format!("expected ',' or ')', found {}", describe(&other)),
                    ))
                }
            }
        }
    }

    fn expect_rparen(&mut self) -> Result<(), FormulaError> {
        let position = self.position();
        match self.advance() {
            Token::RParen => Ok(()),
            other => Err(FormulaError::syntax(
                position,
                format!("expected ')', found {}", describe(&other)),
            )),
        }
    }
}

fn describe(token: &Token) -> String {
    match token {
        Token::Field(name) => format!("field {{{name}}}"),
        Token::Word(word) => format!("'{word}'"),
        Token::Number(n) => format!("number {n}"),
        Token::Str(_) => "string".to_string(),
        Token::Op(op) => format!("'{op}'"),
        Token::LParen => "'('".to_string(),
        Token::RParen => "')'".to_string(),
        Token::Comma => "','".to_string(),
        Token::Eof => "end of formula".to_string(),
    }
}

fn write_string_literal(f: &mut fmt::Formatter<'_>, s: &str) -> fmt::Result {
    f.write_str("\"")?;
    for ch in s.chars() {
        match ch {
            '"' => f.write_str("\\\"")?,
            '\\' => f.write_str("\\\\")?,
            '\n' => f.write_str("\\n")?,
            '\t' => f.write_str("\\t")?,
            other => write!(f, "{other}")?,
        }
    }
    f.write_str("\"")
}

impl FormulaAst {
    fn fmt_child(
        &self,
        f: &mut fmt::Formatter<'_>,
        parent: BinaryOp,
        right_side: bool,
    ) -> fmt::Result {
        let needs_parens = match self {
            FormulaAst::Binary { op, .. } => {
                op.precedence() < parent.precedence()
                    || (right_side && op.precedence() == parent.precedence())
            }
            _ => false,
        };
        if needs_parens {
            write!(f, "({self})")
        } else {
            write!(f, "{self}")
        }
    }
}

/// Canonical text: `{Title}` fields, double-quoted strings, `NAME(a, b)` calls,
/// and only the parentheses precedence requires.
impl fmt::Display for FormulaAst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormulaAst::Identifier(name) => write!(f, "{{{name}}}"),
            FormulaAst::Literal(Value::String(s)) => write_string_literal(f, s),
            FormulaAst::Literal(value) => write!(f, "{value}"),
            FormulaAst::Binary { op, left, right } => {
                left.fmt_child(f, *op, false)?;
                write!(f, " {} ", op.symbol())?;
                right.fmt_child(f, *op, true)
            }
            FormulaAst::Unary { op, operand } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Plus => "+",
                };
                match operand.as_ref() {
                    FormulaAst::Binary { .. } => write!(f, "{symbol}({operand})"),
                    _ => write!(f, "{symbol}{operand}"),
                }
            }
            FormulaAst::Call { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                f.write_str(")")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_call_with_fields_and_literals() {
        let ast = parse_formula(r#"concat({Field A}, "-", {Field B})"#).unwrap();
        assert_eq!(
            ast,
            FormulaAst::Call {
                name: "CONCAT".into(),
                args: vec![
                    FormulaAst::Identifier("Field A".into()),
                    FormulaAst::Literal(Value::String("-".into())),
                    FormulaAst::Identifier("Field B".into()),
                ],
            }
        );
        assert_eq!(ast.to_string(), r#"CONCAT({Field A}, "-", {Field B})"#);
    }

    #[test]
    fn precedence_and_associativity() {
        let ast = parse_formula("{A} - ({B} - {C}) * 2 + 1").unwrap();
        assert_eq!(ast.to_string(), "{A} - ({B} - {C}) * 2 + 1");
        let ast = parse_formula("({A} + {B}) * {C}").unwrap();
        assert_eq!(ast.to_string(), "({A} + {B}) * {C}");
        let ast = parse_formula("{A} + {B} * {C} > 3 & \"x\"").unwrap();
        assert_eq!(ast.to_string(), "{A} + {B} * {C} > 3 & \"x\"");
    }

    #[test]
    fn normalizes_operator_spelling() {
        let ast = parse_formula("{A} <> 1").unwrap();
        assert_eq!(ast.to_string(), "{A} != 1");
        let ast = parse_formula("{A}==1").unwrap();
        assert_eq!(ast.to_string(), "{A} = 1");
    }

    #[test]
    fn serialization_is_stable() {
        for input in [
            "IF({Qty} > 10, \"bulk\", 'single')",
            "-{Price} * 1.50",
            "ROUND(({A} + {B}) / 2, 2)",
            "\"say \\\"hi\\\"\"",
            "NOW()",
            "10000000000000000000000",
            "18446744073709551615 + 0.0000001",
            "IF({A}, 1.50, 2e3)",
        ] {
            let once = parse_formula(input).unwrap().to_string();
            let twice = parse_formula(&once).unwrap().to_string();
            assert_eq!(once, twice, "unstable for {input}");
        }
    }

    #[test]
    fn bare_words_are_identifiers() {
        let ast = parse_formula("Price * 2").unwrap();
        assert_eq!(ast.identifiers(), vec!["Price"]);
    }

    #[test]
    fn rejects_trailing_tokens() {
        let err = parse_formula("{A} {B}").unwrap_err();
        assert!(err.to_string().contains("unexpected field {B}"));
        assert!(parse_formula("CONCAT({A},").is_err());
    }
}

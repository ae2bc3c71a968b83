//! Formula language: parsing, column renames, type inference, and SQL lowering.
//!
//! Formulas reference other columns by title (`{Price} * {Qty}`). The parsed
//! tree is stored on the column so renames and compilation never re-tokenize.

mod compile;
mod functions;
mod lexer;
mod parser;
mod rename;

use thiserror::Error;

pub use compile::{ColumnResolver, FormulaCompiler};
pub use functions::{lookup_function, FormulaType, FunctionSpec, FUNCTIONS};
pub use parser::{parse_formula, BinaryOp, FormulaAst, UnaryOp};
pub use rename::{rename_identifier, rename_identifiers, rename_in_formula};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormulaError {
    #[error("formula syntax error at {position}: {message}")]
    Syntax { position: usize, message: String },
    #[error("field '{0}' not found")]
    UnknownIdentifier(String),
    #[error("function '{0}' is not available")]
    UnknownFunction(String),
    #[error("{function} expects {expected} argument(s), got {got}")]
    Arity {
        function: String,
        expected: String,
        got: usize,
    },
    #[error("circular reference through '{0}'")]
    CircularReference(String),
    #[error("{0}")]
    Unsupported(String),
}

impl FormulaError {
    pub(crate) fn syntax(position: usize, message: impl Into<String>) -> Self {
        FormulaError::Syntax {
            position,
            message: message.into(),
        }
    }
}

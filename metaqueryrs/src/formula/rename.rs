use std::collections::HashMap;

use super::parser::{parse_formula, FormulaAst};
use super::FormulaError;

/// Rewrites every reference to `old` into `new`. Returns whether anything changed.
pub fn rename_identifier(ast: &mut FormulaAst, old: &str, new: &str) -> bool {
    let mut renames = HashMap::new();
    renames.insert(old.to_string(), new.to_string());
    rename_identifiers(ast, &renames)
}

/// Applies all renames in a single pass, so `A -> B, B -> A` swaps cleanly.
pub fn rename_identifiers(ast: &mut FormulaAst, renames: &HashMap<String, String>) -> bool {
    match ast {
        FormulaAst::Identifier(name) => match renames.get(name.as_str()) {
            Some(new) if new != name => {
                *name = new.clone();
                true
            }
            _ => false,
        },
        FormulaAst::Literal(_) => false,
        FormulaAst::Binary { left, right, .. } => {
            let l = rename_identifiers(left, renames);
            let r = rename_identifiers(right, renames);
            l || r
        }
        FormulaAst::Unary { operand, .. } => rename_identifiers(operand, renames),
        FormulaAst::Call { args, .. } => args
            .iter_mut()
            .fold(false, |changed, arg| rename_identifiers(arg, renames) || changed),
    }
}

/// Parses, renames, and re-serializes a stored formula.
pub fn rename_in_formula(formula: &str, old: &str, new: &str) -> Result<String, FormulaError> {
    let mut ast = parse_formula(formula)?;
    rename_identifier(&mut ast, old, new);
    Ok(ast.to_string())
}

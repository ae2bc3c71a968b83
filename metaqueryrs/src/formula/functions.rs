use serde::Serialize;

use super::FormulaError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FormulaType {
    Numeric,
    String,
    Boolean,
    Date,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic functions.
    pub max_args: Option<usize>,
    pub returns: FormulaType,
}

const fn spec(
    name: &'static str,
    min_args: usize,
    max_args: Option<usize>,
    returns: FormulaType,
) -> FunctionSpec {
    FunctionSpec {
        name,
        min_args,
        max_args,
        returns,
    }
}

use FormulaType::{Boolean, Date, Numeric, String as Text, Unknown};

pub static FUNCTIONS: &[FunctionSpec] = &[
    // numeric
    spec("ADD", 1, None, Numeric),
    spec("AVG", 1, None, Numeric),
    spec("ABS", 1, Some(1), Numeric),
    spec("CEILING", 1, Some(1), Numeric),
    spec("FLOOR", 1, Some(1), Numeric),
    spec("ROUND", 1, Some(2), Numeric),
    spec("MOD", 2, Some(2), Numeric),
    spec("POWER", 2, Some(2), Numeric),
    spec("SQRT", 1, Some(1), Numeric),
    spec("EXP", 1, Some(1), Numeric),
    spec("LOG", 1, Some(2), Numeric),
    spec("INT", 1, Some(1), Numeric),
    spec("EVEN", 1, Some(1), Numeric),
    spec("ODD", 1, Some(1), Numeric),
    spec("MIN", 1, None, Numeric),
    spec("MAX", 1, None, Numeric),
    spec("COUNT", 1, None, Numeric),
    // string
    spec("CONCAT", 1, None, Text),
    spec("LEN", 1, Some(1), Numeric),
    spec("LOWER", 1, Some(1), Text),
    spec("UPPER", 1, Some(1), Text),
    spec("TRIM", 1, Some(1), Text),
    spec("LEFT", 2, Some(2), Text),
    spec("RIGHT", 2, Some(2), Text),
    spec("MID", 3, Some(3), Text),
    spec("SUBSTR", 2, Some(3), Text),
    spec("REPLACE", 3, Some(3), Text),
    spec("REPEAT", 2, Some(2), Text),
    spec("SEARCH", 2, Some(2), Numeric),
    // logical
    spec("IF", 2, Some(3), Unknown),
    spec("SWITCH", 3, None, Unknown),
    spec("AND", 1, None, Boolean),
    spec("OR", 1, None, Boolean),
    spec("NOT", 1, Some(1), Boolean),
    spec("XOR", 1, None, Boolean),
    spec("ISBLANK", 1, Some(1), Boolean),
    spec("ISNOTBLANK", 1, Some(1), Boolean),
    spec("BLANK", 0, Some(0), Unknown),
    spec("TRUE", 0, Some(0), Boolean),
    spec("FALSE", 0, Some(0), Boolean),
    // misc
    spec("NOW", 0, Some(0), Date),
    spec("RECORD_ID", 0, Some(0), Text),
];

/// Resolves a function by its uppercased name and checks the argument count.
pub fn lookup_function(name: &str, argc: usize) -> Result<&'static FunctionSpec, FormulaError> {
    let spec = FUNCTIONS
        .iter()
        .find(|f| f.name == name)
        .ok_or_else(|| FormulaError::UnknownFunction(name.to_string()))?;
    let too_many = spec.max_args.is_some_and(|max| argc > max);
    if argc < spec.min_args || too_many {
        let expected = match spec.max_args {
            Some(max) if max == spec.min_args => max.to_string(),
            Some(max) => format!("{}..{}", spec.min_args, max),
            None => format!("at least {}", spec.min_args),
        };
        return Err(FormulaError::Arity {
            function: name.to_string(),
            expected,
            got: argc,
        });
    }
    Ok(spec)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arity_is_checked() {
        assert!(lookup_function("ROUND", 2).is_ok());
        let err = lookup_function("ROUND", 3).unwrap_err();
        assert_eq!(err.to_string(), "ROUND expects 1..2 argument(s), got 3");
        let err = lookup_function("CONCAT", 0).unwrap_err();
        assert_eq!(err.to_string(), "CONCAT expects at least 1 argument(s), got 0");
    }

    #[test]
    fn unknown_function() {
        assert_eq!(
            lookup_function("VLOOKUP", 1).unwrap_err(),
            FormulaError::UnknownFunction("VLOOKUP".into())
        );
    }
}

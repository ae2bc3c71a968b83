use serde_json::Number;

use super::FormulaError;

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    /// `{Column Title}`
    Field(String),
    /// Bare word: a function name or an unbraced column title.
    Word(String),
    Number(Number),
    Str(String),
    Op(&'static str),
    LParen,
    RParen,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Spanned {
    pub token: Token,
    pub position: usize,
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<>", "<=", ">=", "=", "<", ">", "+", "-", "*", "/", "&",
];

pub(crate) fn tokenize(input: &str) -> Result<Vec<Spanned>, FormulaError> {
    let chars: Vec<(usize, char)> = input.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let (position, c) = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }
        let token = match c {
            '(' => {
                i += 1;
                Token::LParen
            }
            ')' => {
                i += 1;
                Token::RParen
            }
            ',' => {
                i += 1;
                Token::Comma
            }
            '{' => {
                let start = i + 1;
                let end = chars[start..]
                    .iter()
                    .position(|(_, ch)| *ch == '}')
                    .map(|offset| start + offset)
                    .ok_or_else(|| FormulaError::syntax(position, "unterminated field reference"))?;
                let name: String = chars[start..end].iter().map(|(_, ch)| ch).collect();
                if name.trim().is_empty() {
                    return Err(FormulaError::syntax(position, "empty field reference"));
                }
                i = end + 1;
                Token::Field(name)
            }
            '"' | '\'' => {
                let (value, next) = read_string(&chars, i, c)?;
                i = next;
                Token::Str(value)
            }
            c if c.is_ascii_digit() || (c == '.' && next_is_digit(&chars, i)) => {
                let (number, next) = read_number(&chars, i)?;
                i = next;
                Token::Number(number)
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
                while i < chars.len() {
                    let ch = chars[i].1;
                    if ch.is_alphanumeric() || ch == '_' || ch == '$' {
                        i += 1;
                    } else {
                        break;
                    }
                }
                Token::Word(chars[start..i].iter().map(|(_, ch)| ch).collect())
            }
            _ => {
                let rest: String = chars[i..].iter().take(2).map(|(_, ch)| ch).collect();
                let op = OPERATORS
                    .iter()
                    .find(|op| rest.starts_with(**op))
                    .ok_or_else(|| {
                        FormulaError::syntax(position, format!("unexpected character '{c}'"))
                    })?;
                i += op.chars().count();
                Token::Op(*op)
            }
        };
        tokens.push(Spanned { token, position });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        position: input.len(),
    });
    Ok(tokens)
}

fn next_is_digit(chars: &[(usize, char)], i: usize) -> bool {
    chars
        .get(i + 1)
        .map(|(_, ch)| ch.is_ascii_digit())
        .unwrap_or(false)
}

fn read_string(
    chars: &[(usize, char)],
    start: usize,
    quote: char,
) -> Result<(String, usize), FormulaError> {
    let mut value = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        let ch = chars[i].1;
        if ch == '\\' {
            match chars.get(i + 1) {
                Some((_, 'n')) => value.push('\n'),
                Some((_, 't')) => value.push('\t'),
                Some((_, escaped)) => value.push(*escaped),
                None => break,
            }
            i += 2;
            continue;
        }
        if ch == quote {
            return Ok((value, i + 1));
        }
        value.push(ch);
        i += 1;
    }
    Err(FormulaError::syntax(chars[start].0, "unterminated string literal"))
}

fn read_number(chars: &[(usize, char)], start: usize) -> Result<(Number, usize), FormulaError> {
    let mut i = start;
    let mut seen_dot = false;
    while i < chars.len() {
        let ch = chars[i].1;
        if ch.is_ascii_digit() {
            i += 1;
        } else if ch == '.' && !seen_dot {
            seen_dot = true;
            i += 1;
        } else {
            break;
        }
    }
    let mut seen_exponent = false;
    if matches!(chars.get(i), Some((_, 'e' | 'E'))) {
        let digits_at = match chars.get(i + 1) {
            Some((_, '+' | '-')) => i + 2,
            _ => i + 1,
        };
        if next_is_digit(chars, digits_at - 1) {
            seen_exponent = true;
            i = digits_at;
            while chars.get(i).is_some_and(|(_, ch)| ch.is_ascii_digit()) {
                i += 1;
            }
        }
    }
    let text: String = chars[start..i].iter().map(|(_, ch)| ch).collect();
    let position = chars[start].0;
    let number = if seen_dot || seen_exponent {
        None
    } else {
        text.parse::<i64>()
            .ok()
            .map(Number::from)
            .or_else(|| text.parse::<u64>().ok().map(Number::from))
    };
    let number = match number {
        Some(n) => n,
        None => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .ok_or_else(|| FormulaError::syntax(position, format!("invalid number '{text}'")))?,
    };
    Ok((number, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn tokenizes_fields_strings_and_operators() {
        assert_eq!(
            kinds("CONCAT({First Name}, \"-\") >= 1.5"),
            vec![
                Token::Word("CONCAT".into()),
                Token::LParen,
                Token::Field("First Name".into()),
                Token::Comma,
                Token::Str("-".into()),
                Token::RParen,
                Token::Op(">="),
                Token::Number(Number::from_f64(1.5).unwrap()),
                Token::Eof,
            ]
        );
    }

    #[test]
    fn reads_exponent_numbers() {
        assert_eq!(
            kinds("2e3 1.5E-2 1e+22"),
            vec![
                Token::Number(Number::from_f64(2000.0).unwrap()),
                Token::Number(Number::from_f64(0.015).unwrap()),
                Token::Number(Number::from_f64(1e22).unwrap()),
                Token::Eof,
            ]
        );
        assert_eq!(
            kinds("2e"),
            vec![Token::Number(Number::from(2i64)), Token::Word("e".into()), Token::Eof]
        );
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            kinds(r#"'it\'s'"#),
            vec![Token::Str("it's".into()), Token::Eof]
        );
    }

    #[test]
    fn reports_unterminated_field() {
        let err = tokenize("{Title").unwrap_err();
        assert!(err.to_string().contains("unterminated field reference"));
    }
}

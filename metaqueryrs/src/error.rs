use std::fmt;

use thiserror::Error;

use crate::formula::FormulaError;

pub type Result<T> = std::result::Result<T, MetaqueryError>;

#[derive(Debug, Error)]
pub enum MetaqueryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database not supported: {0}")]
    UnsupportedDialect(String),
    #[error("validation error: {0}")]
    Validation(String),
    #[error(transparent)]
    FilterVerification(#[from] FilterVerificationError),
    #[error(transparent)]
    Formula(#[from] FormulaError),
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },
    #[error("sql generation error: {0}")]
    Sql(String),
    #[error("execution error: {0}")]
    Execution(String),
    #[error("{} of {total} fan-out tasks failed", failures.len())]
    Fanout {
        total: usize,
        failures: Vec<String>,
    },
    #[cfg(feature = "sqlite")]
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl MetaqueryError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        MetaqueryError::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// True for errors the caller can fix by changing the request.
    pub fn is_user_correctable(&self) -> bool {
        matches!(
            self,
            MetaqueryError::Validation(_)
                | MetaqueryError::FilterVerification(_)
                | MetaqueryError::Formula(_)
                | MetaqueryError::NotFound { .. }
        )
    }
}

/// Every problem found while verifying a request's filters, in tree order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterVerificationError {
    pub errors: Vec<String>,
}

impl FilterVerificationError {
    pub fn new(errors: Vec<String>) -> Self {
        Self { errors }
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for FilterVerificationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid filters: {}", self.errors.join("; "))
    }
}

impl std::error::Error for FilterVerificationError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_errors_render_as_list() {
        let err: MetaqueryError =
            FilterVerificationError::new(vec!["a".to_string(), "b".to_string()]).into();
        assert_eq!(err.to_string(), "invalid filters: a; b");
        assert!(err.is_user_correctable());
    }

    #[test]
    fn not_found_names_kind_and_id() {
        let err = MetaqueryError::not_found("column", "c_42");
        assert_eq!(err.to_string(), "column not found: c_42");
    }

    #[test]
    fn unsupported_dialect_is_fatal() {
        let err = MetaqueryError::UnsupportedDialect("db2".into());
        assert_eq!(err.to_string(), "database not supported: db2");
        assert!(!err.is_user_correctable());
    }
}

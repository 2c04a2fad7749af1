//! Error types for query construction and execution
//!
//! Structural errors are raised while the builder is being mutated (or at the
//! latest when it is frozen for a terminal call). Multiplicity and backend
//! errors can only surface at the terminal call.

use std::fmt;

use crate::config::ConfigError;

/// Result type alias for query operations
pub type QueryResult<T> = Result<T, QueryError>;

/// The clause of a query an error refers to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Clause {
    Select,
    From,
    /// A join, identified by the alias it introduces
    Join(String),
    Where,
    GroupBy,
    Having,
    OrderBy,
    Limit,
}

impl fmt::Display for Clause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Clause::Select => write!(f, "select"),
            Clause::From => write!(f, "from"),
            Clause::Join(alias) => write!(f, "join `{}`", alias),
            Clause::Where => write!(f, "where"),
            Clause::GroupBy => write!(f, "group by"),
            Clause::Having => write!(f, "having"),
            Clause::OrderBy => write!(f, "order by"),
            Clause::Limit => write!(f, "limit"),
        }
    }
}

/// Error types for query operations
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// Entity type is not registered
    #[error("Unknown entity '{entity}'")]
    UnknownEntity { entity: String },

    /// Attribute is not declared on the entity
    #[error("Unknown attribute '{attribute}' on entity '{entity}'")]
    UnknownAttribute { entity: String, attribute: String },

    /// Relation is not declared on the entity
    #[error("Unknown relation '{relation}' on entity '{entity}'")]
    UnknownRelation { entity: String, relation: String },

    /// Operand types are incompatible
    #[error("Type mismatch in {context}: expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// Structural rule violation detected while building the query
    #[error("Invalid query state in {clause}: {reason}")]
    InvalidQueryState { clause: Clause, reason: String },

    /// Fetch marking on a join that has no declared relation
    #[error("Invalid fetch join on {join}: only association joins can be fetched")]
    InvalidFetchJoin { join: String },

    /// Join shape that cannot be expressed
    #[error("Unsupported join {join}: {reason}")]
    UnsupportedJoin { join: String, reason: String },

    /// Single-result fetch produced more than one row
    #[error("Non-unique result: expected at most one row, got {rows}")]
    NonUniqueResult { rows: usize },

    /// A NULL reached a slot decoded as non-nullable
    #[error("Unexpected NULL in {column}")]
    UnexpectedNull { column: String },

    /// A value could not be decoded into the requested type
    #[error("Decode error: {0}")]
    Decode(String),

    /// Entity model definition is inconsistent
    #[error("Invalid entity model: {0}")]
    InvalidModel(String),

    /// Configuration error
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Failure surfaced by the execution backend, passed through unchanged
    #[error("Backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl QueryError {
    pub(crate) fn invalid_state(clause: Clause, reason: impl Into<String>) -> Self {
        QueryError::InvalidQueryState {
            clause,
            reason: reason.into(),
        }
    }

    /// Returns true for errors raised while building, before any execution
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            QueryError::UnknownEntity { .. }
                | QueryError::UnknownAttribute { .. }
                | QueryError::UnknownRelation { .. }
                | QueryError::TypeMismatch { .. }
                | QueryError::InvalidQueryState { .. }
                | QueryError::InvalidFetchJoin { .. }
                | QueryError::UnsupportedJoin { .. }
        )
    }
}

impl From<sqlx::Error> for QueryError {
    fn from(err: sqlx::Error) -> Self {
        QueryError::Backend(Box::new(err))
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::InvalidModel(err.to_string())
    }
}

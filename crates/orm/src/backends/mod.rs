//! Execution Backends
//!
//! A backend receives a frozen [`QueryState`] (or a derived [`CountQuery`]),
//! runs it and returns hydrated rows. Failures it raises are passed through
//! to the caller unchanged; retries and timeouts are the backend's business.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::QueryResult;
use crate::hydration::{EntityRecord, Row};
use crate::query::{CountQuery, QueryState};

pub use memory::InMemoryBackend;
pub use postgres::PostgresBackend;

/// Backend type enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Memory,
    PostgreSQL,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BackendKind::Memory => write!(f, "memory"),
            BackendKind::PostgreSQL => write!(f, "postgresql"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memory" | "in-memory" => Ok(BackendKind::Memory),
            "postgresql" | "postgres" => Ok(BackendKind::PostgreSQL),
            _ => Err(format!("Unsupported execution backend: {}", s)),
        }
    }
}

/// The boundary between query construction and execution
#[async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Run a frozen query; one row per result, selection order preserved
    async fn fetch(&self, state: &QueryState) -> QueryResult<Vec<Row>>;

    /// Run a derived count query
    async fn count(&self, query: &CountQuery) -> QueryResult<u64>;

    /// Whether `relation` was materialized on `record` by the query that produced it
    fn is_loaded(&self, record: &EntityRecord, relation: &str) -> bool {
        record.is_loaded(relation)
    }

    fn kind(&self) -> BackendKind;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_kind_parsing() {
        assert_eq!("postgres".parse::<BackendKind>().unwrap(), BackendKind::PostgreSQL);
        assert_eq!("Memory".parse::<BackendKind>().unwrap(), BackendKind::Memory);
        assert!("oracle".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::PostgreSQL.to_string(), "postgresql");
    }
}

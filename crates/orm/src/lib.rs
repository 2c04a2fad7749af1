//! # quarry-orm: Typed Query Construction
//!
//! Queries are composed from typed expressions over a statically described
//! entity model, validated clause by clause while they are built, and handed
//! to an execution backend only at a terminal call.
//!
//! Structural mistakes (an unknown attribute, a join to the wrong entity, an
//! ungrouped projection in an aggregate query) surface as [`QueryError`]s
//! before any backend is touched.

pub mod backends;
pub mod config;
pub mod error;
pub mod expr;
pub mod hydration;
pub mod models;
pub mod query;
pub mod registry;
pub mod sql;
pub mod value;

// Re-export core traits and types
pub use backends::{BackendKind, ExecutionBackend, InMemoryBackend, PostgresBackend};
pub use config::{BackendConfig, ConfigError, QueryConfig};
pub use error::{Clause, QueryError, QueryResult};
pub use expr::{
    Direction, EntityPath, Expr, NullPlacement, Operand, OrderSpecifier, RelationPath, TypedExpr,
};
pub use hydration::{Association, EntityRecord, FromRow, Row, Tuple};
pub use query::{CountMode, CountQuery, JoinKind, Query, QueryFactory, QueryResults, QueryState};
pub use registry::{
    AttributeDescriptor, Cardinality, EntityDescriptor, EntityRegistry, RegistryBuilder,
    RelationDescriptor, RelationSide, ScalarKind,
};
pub use sql::SqlStatement;
pub use value::{Numeric, ScalarType, Value};

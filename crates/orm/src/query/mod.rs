//! Query Builder Module - staged, validated query construction
//!
//! A [`QueryFactory`] starts a [`Query`] from a selection; chained calls add
//! sources, joins, predicates, grouping, ordering and paging. Each call
//! validates what it can immediately, and every terminal call freezes the
//! builder into a [`QueryState`] checked as a whole.

pub mod builder;
pub mod execution;
pub mod joins;
pub mod pagination;
pub mod state;
pub mod validation;

pub use builder::{Query, QueryFactory};
pub use joins::resolve_association;
pub use pagination::{CountMode, CountQuery, QueryResults};
pub use state::{JoinBasis, JoinKind, JoinSpec, QueryState};

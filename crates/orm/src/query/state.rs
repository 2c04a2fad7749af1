//! Query state - the clause lists accumulated by a builder
//!
//! A [`QueryState`] is what execution backends receive. Once a builder has
//! been frozen the state is only ever read.

use std::fmt;

use crate::expr::ordering::OrderKey;
use crate::expr::{EntityPath, Expr};
use crate::registry::{Cardinality, RelationDescriptor};

/// Join types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

impl fmt::Display for JoinKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinKind::Inner => write!(f, "INNER JOIN"),
            JoinKind::Left => write!(f, "LEFT JOIN"),
        }
    }
}

/// How a join's predicate is obtained
#[derive(Debug, Clone, PartialEq)]
pub enum JoinBasis {
    /// Navigates a declared relation from an existing source alias
    Association {
        owner: String,
        relation: RelationDescriptor,
    },
    /// Independent source joined on an explicit predicate (or none, for a cross join)
    AdHoc,
}

/// One entry of the join list
#[derive(Debug, Clone, PartialEq)]
pub struct JoinSpec {
    pub kind: JoinKind,
    pub basis: JoinBasis,
    pub target: EntityPath,
    /// Predicate derived from the relation's key columns
    pub derived: Option<Expr>,
    /// Caller-supplied `on` predicate
    pub on: Option<Expr>,
    pub fetch: bool,
}

impl JoinSpec {
    /// The effective join predicate: derived and `on` conjoined
    pub fn predicate(&self) -> Option<Expr> {
        Expr::conjoin(self.derived.clone(), self.on.clone())
    }

    pub fn is_association(&self) -> bool {
        matches!(self.basis, JoinBasis::Association { .. })
    }

    pub fn relation(&self) -> Option<&RelationDescriptor> {
        match &self.basis {
            JoinBasis::Association { relation, .. } => Some(relation),
            JoinBasis::AdHoc => None,
        }
    }
}

impl fmt::Display for JoinSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            JoinKind::Inner => "join",
            JoinKind::Left => "left join",
        };
        match &self.basis {
            JoinBasis::Association { owner, relation } => write!(
                f,
                "{} {}.{} {}",
                kind,
                owner,
                relation.name,
                self.target.alias()
            ),
            JoinBasis::AdHoc => write!(f, "{} {}", kind, self.target),
        }
    }
}

/// Accumulated clauses of a single query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryState {
    pub selection: Vec<Expr>,
    pub distinct: bool,
    pub root: Option<EntityPath>,
    pub joins: Vec<JoinSpec>,
    pub filter: Option<Expr>,
    pub group_by: Vec<Expr>,
    pub having: Option<Expr>,
    pub order_by: Vec<OrderKey>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl QueryState {
    /// Root followed by every join target, in declaration order
    pub fn sources(&self) -> impl Iterator<Item = &EntityPath> {
        self.root
            .iter()
            .chain(self.joins.iter().map(|join| &join.target))
    }

    pub fn source(&self, alias: &str) -> Option<&EntityPath> {
        self.sources().find(|source| source.alias() == alias)
    }

    pub fn source_index(&self, alias: &str) -> Option<usize> {
        self.sources().position(|source| source.alias() == alias)
    }

    /// True when rows collapse into groups (explicit keys, aggregates or `having`)
    pub fn is_grouped(&self) -> bool {
        !self.group_by.is_empty()
            || self.having.is_some()
            || self.selection.iter().any(Expr::contains_aggregate)
    }

    pub fn fetch_joins(&self) -> impl Iterator<Item = &JoinSpec> {
        self.joins.iter().filter(|join| join.fetch)
    }

    /// Whether a to-many association is fetched, so owners repeat across rows
    pub fn fetches_collection(&self) -> bool {
        self.fetch_joins().any(|join| {
            join.relation()
                .map(|relation| relation.cardinality == Cardinality::ToMany)
                .unwrap_or(false)
        })
    }
}

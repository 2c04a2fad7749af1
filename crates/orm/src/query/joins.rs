//! Query Builder JOIN operations and the join resolver

use crate::error::{Clause, QueryError, QueryResult};
use crate::expr::{BinaryOp, EntityPath, Expr, RelationPath, TypedExpr};
use crate::registry::{RelationDescriptor, RelationSide};

use super::builder::Query;
use super::state::{JoinBasis, JoinKind, JoinSpec};
use super::validation;

/// Derive the join predicate for navigating `relation` from `owner` to `target`.
///
/// Owning side: `owner.join_column = target.referenced`.
/// Inverse side: the owning relation named by `mapped_by` on the target
/// supplies the columns, giving `target.join_column = owner.referenced`.
pub fn resolve_association(
    owner: &EntityPath,
    relation: &RelationDescriptor,
    target: &EntityPath,
) -> QueryResult<Expr> {
    let join = || format!("{}.{} {}", owner.alias(), relation.name, target.alias());

    if target.entity().name != relation.target {
        return Err(QueryError::UnsupportedJoin {
            join: join(),
            reason: format!(
                "alias `{}` is a {}, but the relation targets {}",
                target.alias(),
                target.entity().name,
                relation.target
            ),
        });
    }

    match &relation.side {
        RelationSide::Owning {
            join_column,
            referenced,
        } => Expr::binary(
            BinaryOp::Eq,
            owner.attribute(join_column)?,
            target.attribute(referenced)?,
        ),
        RelationSide::Inverse { mapped_by } => {
            let owning = target.entity().rel(mapped_by)?;
            match &owning.side {
                RelationSide::Owning {
                    join_column,
                    referenced,
                } => Expr::binary(
                    BinaryOp::Eq,
                    target.attribute(join_column)?,
                    owner.attribute(referenced)?,
                ),
                RelationSide::Inverse { .. } => Err(QueryError::UnsupportedJoin {
                    join: join(),
                    reason: format!(
                        "relation `{}` is mapped by `{}.{}`, which is not an owning relation",
                        relation.name,
                        target.entity().name,
                        mapped_by
                    ),
                }),
            }
        }
    }
}

impl<R> Query<R> {
    fn check_new_alias(&self, target: &EntityPath) -> QueryResult<()> {
        if self.state.root.is_none() {
            return Err(QueryError::invalid_state(
                Clause::From,
                "joins need a root entity; call `from` first",
            ));
        }
        if self.state.source(target.alias()).is_some() {
            return Err(QueryError::invalid_state(
                Clause::Join(target.alias().to_string()),
                format!("alias `{}` is already in use", target.alias()),
            ));
        }
        self.ensure_registered(target)
    }

    fn association_join(
        mut self,
        kind: JoinKind,
        relation: &RelationPath,
        target: &EntityPath,
    ) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        self.check_new_alias(target)?;

        let owner = relation.owner();
        if self.state.source(owner.alias()) != Some(owner) {
            return Err(QueryError::invalid_state(
                Clause::Join(target.alias().to_string()),
                format!("owner alias `{}` is not a source of this query", owner.alias()),
            ));
        }

        let derived = resolve_association(owner, relation.relation(), target)?;
        tracing::debug!("Resolved association join {} as `{}`", relation, derived);

        self.state.joins.push(JoinSpec {
            kind,
            basis: JoinBasis::Association {
                owner: owner.alias().to_string(),
                relation: relation.relation().clone(),
            },
            target: target.clone(),
            derived: Some(derived),
            on: None,
            fetch: false,
        });
        Ok(self)
    }

    fn ad_hoc_join(mut self, kind: JoinKind, target: &EntityPath) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        self.check_new_alias(target)?;

        self.state.joins.push(JoinSpec {
            kind,
            basis: JoinBasis::AdHoc,
            target: target.clone(),
            derived: None,
            on: None,
            fetch: false,
        });
        Ok(self)
    }

    /// Inner join along a declared relation
    pub fn join(self, relation: &RelationPath, target: &EntityPath) -> QueryResult<Self> {
        self.association_join(JoinKind::Inner, relation, target)
    }

    /// Left outer join along a declared relation
    pub fn left_join(self, relation: &RelationPath, target: &EntityPath) -> QueryResult<Self> {
        self.association_join(JoinKind::Left, relation, target)
    }

    /// Inner join of an unrelated source; without `on` it is a cross join
    pub fn join_entity(self, target: &EntityPath) -> QueryResult<Self> {
        self.ad_hoc_join(JoinKind::Inner, target)
    }

    /// Left outer join of an unrelated source. Must be followed by `on`.
    pub fn left_join_entity(self, target: &EntityPath) -> QueryResult<Self> {
        self.ad_hoc_join(JoinKind::Left, target)
    }

    /// Add a source for a theta join; the join predicate goes in `filter`
    pub fn cross_join(self, target: &EntityPath) -> QueryResult<Self> {
        self.ad_hoc_join(JoinKind::Inner, target)
    }

    /// Extra predicate for the most recent join, conjoined with the derived one
    pub fn on(mut self, predicate: TypedExpr<bool>) -> QueryResult<Self> {
        let visible = self.state.sources().count();
        let join = self.state.joins.last().ok_or_else(|| {
            QueryError::invalid_state(Clause::From, "`on` requires a preceding join")
        })?;
        let clause = Clause::Join(join.target.alias().to_string());

        let predicate = predicate.into_expr();
        validation::check_references(&self.state, &predicate, clause.clone(), visible)?;
        validation::check_no_aggregate(&predicate, clause)?;

        if let Some(join) = self.state.joins.last_mut() {
            join.on = Expr::conjoin(join.on.take(), Some(predicate));
        }
        Ok(self)
    }

    /// Mark the most recent join to eagerly materialize its association
    pub fn fetch_join(mut self) -> QueryResult<Self> {
        validation::check_pending_join(&self.state)?;
        let join = self.state.joins.last_mut().ok_or_else(|| {
            QueryError::invalid_state(Clause::From, "`fetch_join` requires a preceding join")
        })?;
        if !join.is_association() {
            return Err(QueryError::InvalidFetchJoin {
                join: join.to_string(),
            });
        }
        join.fetch = true;
        validation::check_fetch_joins(&self.state)?;
        Ok(self)
    }
}
